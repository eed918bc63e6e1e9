//! Shared-secret checks for the admin and cron endpoints.

use axum::http::HeaderMap;

use super::error::ApiError;
use crate::webhook::signature::constant_time_eq;

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Admin endpoints are open when no token is configured.
pub fn check_admin(headers: &HeaderMap, token: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = token else {
        return Ok(());
    };
    let presented = bearer(headers).unwrap_or("");
    if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(ApiError::unauthorized("Invalid or missing bearer token"))
    }
}

/// The cron entry point always requires its secret, as `x-cron-secret` or a
/// bearer token.
pub fn check_cron(headers: &HeaderMap, secret: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = secret else {
        return Err(ApiError::unauthorized("Cron secret is not configured"));
    };
    let presented = headers
        .get(CRON_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| bearer(headers))
        .unwrap_or("");
    if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(ApiError::unauthorized("Invalid or missing cron secret"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with(name: &'static str, value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_admin_token() {
        assert!(check_admin(&HeaderMap::new(), None).is_ok());
        assert!(check_admin(&with("authorization", "Bearer t0k"), Some("t0k")).is_ok());
        assert!(check_admin(&with("authorization", "Bearer nope"), Some("t0k")).is_err());
        assert!(check_admin(&HeaderMap::new(), Some("t0k")).is_err());
    }

    #[test]
    fn test_cron_secret() {
        assert!(check_cron(&with(CRON_SECRET_HEADER, "c"), Some("c")).is_ok());
        assert!(check_cron(&with("authorization", "Bearer c"), Some("c")).is_ok());
        assert!(check_cron(&with(CRON_SECRET_HEADER, "x"), Some("c")).is_err());
        assert!(check_cron(&with(CRON_SECRET_HEADER, "c"), None).is_err());
    }
}
