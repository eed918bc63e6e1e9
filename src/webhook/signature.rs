//! Webhook authenticity checks.

use anyhow::{anyhow, bail, Context, Result};
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::WebhookConfig;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const SECRET_HEADER: &str = "x-webhook-secret";

/// Verify a `sha256=<hex>` HMAC of `payload` under `secret`.
pub fn verify_sha256_signature(payload: &[u8], signature_header: &str, secret: &str) -> Result<()> {
    let digest_hex = signature_header
        .trim()
        .strip_prefix("sha256=")
        .ok_or_else(|| anyhow!("signature must use sha256=<hex> format"))?;
    if digest_hex.is_empty() {
        bail!("signature digest cannot be empty");
    }
    let signature = hex::decode(digest_hex).context("signature digest is not valid hex")?;

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).context("failed to initialize hmac verifier")?;
    mac.update(payload);
    mac.verify_slice(&signature)
        .map_err(|_| anyhow!("signature verification failed"))
}

/// `sha256=<hex>` signature for `payload`, as the provider would send it.
pub fn sign_sha256(payload: &[u8], secret: &str) -> Result<String> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).context("failed to initialize hmac signer")?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Length mismatch is reported as unequal without comparing contents.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    bool::from(a.ct_eq(b))
}

/// Checks incoming deliveries against the configured secrets.
#[derive(Debug, Clone, Default)]
pub struct WebhookVerifier {
    secret: Option<String>,
    signing_secret: Option<String>,
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>, signing_secret: Option<String>) -> Self {
        let non_empty = |s: Option<String>| s.filter(|v| !v.is_empty());
        Self {
            secret: non_empty(secret),
            signing_secret: non_empty(signing_secret),
        }
    }

    pub fn from_config(config: &WebhookConfig) -> Self {
        Self::new(config.secret.clone(), config.signing_secret.clone())
    }

    /// A signature header is checked against the signing secret; otherwise the
    /// shared-secret header is compared. With no secrets configured every
    /// delivery is rejected.
    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<()> {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        if let Some(signature) = header(SIGNATURE_HEADER) {
            let secret = self
                .signing_secret
                .as_deref()
                .ok_or_else(|| anyhow!("signed delivery but no signing secret is configured"))?;
            return verify_sha256_signature(body, signature, secret);
        }

        if let Some(presented) = header(SECRET_HEADER) {
            let expected = self
                .secret
                .as_deref()
                .ok_or_else(|| anyhow!("shared-secret delivery but no webhook secret is configured"))?;
            if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
                return Ok(());
            }
            bail!("shared secret mismatch");
        }

        bail!("delivery carries neither {} nor {}", SIGNATURE_HEADER, SECRET_HEADER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_signature_roundtrip() {
        let body = br#"{"event":"bot.status_change"}"#;
        let signature = sign_sha256(body, "s3cret").unwrap();
        assert!(verify_sha256_signature(body, &signature, "s3cret").is_ok());
        assert!(verify_sha256_signature(body, &signature, "other").is_err());
        assert!(verify_sha256_signature(b"tampered", &signature, "s3cret").is_err());
    }

    #[test]
    fn test_signature_format_errors() {
        assert!(verify_sha256_signature(b"x", "md5=abcd", "s").is_err());
        assert!(verify_sha256_signature(b"x", "sha256=", "s").is_err());
        assert!(verify_sha256_signature(b"x", "sha256=zz", "s").is_err());
    }

    #[test]
    fn test_verifier_paths() {
        let verifier = WebhookVerifier::new(Some("shared".to_string()), Some("signing".to_string()));
        let body = b"{}";

        let signed = headers(SIGNATURE_HEADER, &sign_sha256(body, "signing").unwrap());
        assert!(verifier.verify(&signed, body).is_ok());

        assert!(verifier.verify(&headers(SECRET_HEADER, "shared"), body).is_ok());
        assert!(verifier.verify(&headers(SECRET_HEADER, "sharex"), body).is_err());
        assert!(verifier.verify(&HeaderMap::new(), body).is_err());
    }

    #[test]
    fn test_unconfigured_verifier_rejects() {
        let verifier = WebhookVerifier::new(None, Some(String::new()));
        assert!(verifier.verify(&headers(SECRET_HEADER, ""), b"{}").is_err());
        let signed = headers(SIGNATURE_HEADER, &sign_sha256(b"{}", "k").unwrap());
        assert!(verifier.verify(&signed, b"{}").is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
