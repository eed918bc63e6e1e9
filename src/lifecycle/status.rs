//! Bot and session status types plus the vendor vocabulary mapping.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Normalized bot status. Vendor codes never travel past [`normalize_vendor_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<BotStatus> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => anyhow::bail!("Invalid bot status: {}", s),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Position in the partial order pending < active < {completed, failed}.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Active => 1,
            Self::Completed | Self::Failed => 2,
        }
    }
}

/// Lowercase, `_`-separated, without a `bot.` event prefix.
fn canonical_code(code: &str) -> String {
    let code = code.trim().to_ascii_lowercase().replace(['-', ' '], "_");
    match code.strip_prefix("bot.") {
        Some(rest) => rest.to_string(),
        None => code,
    }
}

/// Map a vendor status code onto the internal set.
///
/// Returns `None` for codes that carry no lifecycle meaning (e.g. `media_expired`)
/// or that are not recognized at all. Matching is case-insensitive and accepts
/// `.` or `-` as separators (`bot.done`, `in-call-recording`).
pub fn normalize_vendor_status(code: &str) -> Option<BotStatus> {
    match canonical_code(code).as_str() {
        "ready" | "pending" | "queued" | "joining" | "joining_call" | "in_waiting_room"
        | "waiting_room" => Some(BotStatus::Pending),
        "in_call" | "in_call_not_recording" | "in_call_recording" | "recording"
        | "recording_permission_allowed" | "recording_permission_denied" | "active" => {
            Some(BotStatus::Active)
        }
        "call_ended" | "done" | "analysis_done" | "completed" | "ended" => {
            Some(BotStatus::Completed)
        }
        "fatal" | "error" | "failed" | "analysis_failed" => Some(BotStatus::Failed),
        _ => None,
    }
}

/// Vendor codes that mark the moment recording began. Used to derive vendor-side duration.
pub fn is_recording_start_code(code: &str) -> bool {
    matches!(
        canonical_code(code).as_str(),
        "in_call_recording" | "recording" | "recording_permission_allowed"
    )
}

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Active,
    Stopping,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<SessionStatus> {
        match s {
            "created" => Ok(Self::Created),
            "active" => Ok(Self::Active),
            "stopping" => Ok(Self::Stopping),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => anyhow::bail!("Invalid session status: {}", s),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Session status a terminal bot status settles the session into.
    pub fn from_terminal_bot(status: BotStatus) -> Option<SessionStatus> {
        match status {
            BotStatus::Completed => Some(Self::Completed),
            BotStatus::Failed => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Which path proposed a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionSource {
    Webhook,
    Poller,
}

impl TransitionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Poller => "poller",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_status_round_trip() {
        for status in [
            BotStatus::Pending,
            BotStatus::Active,
            BotStatus::Completed,
            BotStatus::Failed,
        ] {
            assert_eq!(BotStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(BotStatus::parse("joining").is_err());
    }

    #[test]
    fn test_terminal_set() {
        assert!(!BotStatus::Pending.is_terminal());
        assert!(!BotStatus::Active.is_terminal());
        assert!(BotStatus::Completed.is_terminal());
        assert!(BotStatus::Failed.is_terminal());
    }

    #[test]
    fn test_rank_order() {
        assert!(BotStatus::Pending.rank() < BotStatus::Active.rank());
        assert!(BotStatus::Active.rank() < BotStatus::Completed.rank());
        assert_eq!(BotStatus::Completed.rank(), BotStatus::Failed.rank());
    }

    #[test]
    fn test_normalize_recall_codes() {
        assert_eq!(normalize_vendor_status("joining_call"), Some(BotStatus::Pending));
        assert_eq!(normalize_vendor_status("in_waiting_room"), Some(BotStatus::Pending));
        assert_eq!(
            normalize_vendor_status("in_call_not_recording"),
            Some(BotStatus::Active)
        );
        assert_eq!(normalize_vendor_status("in_call_recording"), Some(BotStatus::Active));
        assert_eq!(normalize_vendor_status("call_ended"), Some(BotStatus::Completed));
        assert_eq!(normalize_vendor_status("done"), Some(BotStatus::Completed));
        assert_eq!(normalize_vendor_status("fatal"), Some(BotStatus::Failed));
    }

    #[test]
    fn test_normalize_is_lenient_about_format() {
        assert_eq!(normalize_vendor_status("bot.done"), Some(BotStatus::Completed));
        assert_eq!(normalize_vendor_status("In-Call-Recording"), Some(BotStatus::Active));
        assert_eq!(normalize_vendor_status("  DONE "), Some(BotStatus::Completed));
    }

    #[test]
    fn test_normalize_unknown_codes() {
        assert_eq!(normalize_vendor_status("media_expired"), None);
        assert_eq!(normalize_vendor_status(""), None);
        assert_eq!(normalize_vendor_status("something_new"), None);
    }

    #[test]
    fn test_recording_start_codes() {
        assert!(is_recording_start_code("in_call_recording"));
        assert!(!is_recording_start_code("in_call_not_recording"));
        assert!(!is_recording_start_code("done"));
        assert!(is_recording_start_code("bot.in_call_recording"));
        assert!(is_recording_start_code("In-Call-Recording"));
    }

    #[test]
    fn test_session_status() {
        assert_eq!(SessionStatus::parse("stopping").unwrap(), SessionStatus::Stopping);
        assert!(SessionStatus::Completed.is_terminal());
        assert!(!SessionStatus::Stopping.is_terminal());
        assert_eq!(
            SessionStatus::from_terminal_bot(BotStatus::Failed),
            Some(SessionStatus::Failed)
        );
        assert_eq!(SessionStatus::from_terminal_bot(BotStatus::Active), None);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&BotStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        let parsed: SessionStatus = serde_json::from_str("\"active\"").unwrap();
        assert_eq!(parsed, SessionStatus::Active);
    }
}
