//! Webhook signature handling
//!
//! HMAC-SHA256 over the exact request body, hex-encoded with a `sha256=`
//! prefix. The verifier side additionally validates timestamp skew for
//! replay protection.

use crate::{Result, WebhookError};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Receivers reject timestamps more than this far in the future.
pub const MAX_FUTURE_SKEW_SECONDS: i64 = 60;
/// Receivers reject timestamps older than this.
pub const MAX_PAST_SKEW_SECONDS: i64 = 300;

/// Current Unix time in whole seconds.
pub fn unix_timestamp() -> i64 {
    Utc::now().timestamp()
}

fn compute_signature(secret: &[u8], payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret).expect("HMAC can accept any key length");
    mac.update(payload);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Signs outbound payload bytes.
pub struct WebhookSigner {
    secret: Vec<u8>,
}

impl WebhookSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Signature for the exact bytes that will go on the wire.
    pub fn sign(&self, payload: &[u8]) -> String {
        compute_signature(&self.secret, payload)
    }

    /// Signature and timestamp headers for a request carrying `payload`.
    pub fn headers(&self, payload: &[u8]) -> [(&'static str, String); 2] {
        [
            (SIGNATURE_HEADER, self.sign(payload)),
            (TIMESTAMP_HEADER, unix_timestamp().to_string()),
        ]
    }
}

/// Receiver-side verification: constant-time signature comparison plus
/// timestamp-skew rejection when a timestamp header is present.
pub struct WebhookVerifier {
    secret: Vec<u8>,
    max_future_skew: i64,
    max_past_skew: i64,
}

impl WebhookVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            max_future_skew: MAX_FUTURE_SKEW_SECONDS,
            max_past_skew: MAX_PAST_SKEW_SECONDS,
        }
    }

    pub fn with_skew(mut self, max_future: i64, max_past: i64) -> Self {
        self.max_future_skew = max_future;
        self.max_past_skew = max_past;
        self
    }

    pub fn verify(&self, payload: &[u8], signature: &str, timestamp: Option<i64>) -> Result<()> {
        if let Some(ts) = timestamp {
            self.verify_timestamp(ts)?;
        }

        let expected = compute_signature(&self.secret, payload);
        if constant_time_compare(signature, &expected) {
            Ok(())
        } else {
            Err(WebhookError::SignatureVerificationFailed(
                "Signature mismatch".to_string(),
            ))
        }
    }

    fn verify_timestamp(&self, timestamp: i64) -> Result<()> {
        let now = unix_timestamp();

        if timestamp > now + self.max_future_skew {
            return Err(WebhookError::SignatureVerificationFailed(format!(
                "Timestamp {} seconds in the future",
                timestamp - now
            )));
        }

        if timestamp < now - self.max_past_skew {
            return Err(WebhookError::SignatureVerificationFailed(format!(
                "Timestamp {} seconds old",
                now - timestamp
            )));
        }

        Ok(())
    }
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let secret = "test-secret-key";
        let signer = WebhookSigner::new(secret);
        let verifier = WebhookVerifier::new(secret);

        let payload = br#"{"event":"order.confirmed"}"#;
        let signature = signer.sign(payload);

        assert!(signature.starts_with("sha256="));
        assert!(verifier.verify(payload, &signature, None).is_ok());
    }

    #[test]
    fn test_wrong_secret() {
        let signer = WebhookSigner::new("secret-1");
        let verifier = WebhookVerifier::new("secret-2");

        let payload = b"test payload";
        let signature = signer.sign(payload);

        assert!(verifier.verify(payload, &signature, None).is_err());
    }

    #[test]
    fn test_modified_payload() {
        let secret = "test-secret";
        let signer = WebhookSigner::new(secret);
        let verifier = WebhookVerifier::new(secret);

        let signature = signer.sign(b"original payload");

        assert!(verifier.verify(b"modified payload", &signature, None).is_err());
    }

    #[test]
    fn test_timestamp_within_skew() {
        let secret = "test-secret";
        let signer = WebhookSigner::new(secret);
        let verifier = WebhookVerifier::new(secret);

        let payload = b"test payload";
        let signature = signer.sign(payload);

        assert!(verifier
            .verify(payload, &signature, Some(unix_timestamp()))
            .is_ok());
        assert!(verifier
            .verify(payload, &signature, Some(unix_timestamp() - 200))
            .is_ok());
    }

    #[test]
    fn test_timestamp_too_old() {
        let secret = "test-secret";
        let signer = WebhookSigner::new(secret);
        let verifier = WebhookVerifier::new(secret);

        let payload = b"test payload";
        let signature = signer.sign(payload);

        let result = verifier.verify(payload, &signature, Some(unix_timestamp() - 301));
        assert!(result.is_err());
    }

    #[test]
    fn test_timestamp_too_far_in_future() {
        let secret = "test-secret";
        let signer = WebhookSigner::new(secret);
        let verifier = WebhookVerifier::new(secret);

        let payload = b"test payload";
        let signature = signer.sign(payload);

        let result = verifier.verify(payload, &signature, Some(unix_timestamp() + 61));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_timestamp_skips_skew_check() {
        let secret = "test-secret";
        let signer = WebhookSigner::new(secret);
        let verifier = WebhookVerifier::new(secret);

        let payload = b"test payload";
        let signature = signer.sign(payload);

        assert!(verifier.verify(payload, &signature, None).is_ok());
    }

    #[test]
    fn test_headers() {
        let signer = WebhookSigner::new("test-secret");
        let headers = signer.headers(b"test payload");

        assert_eq!(headers[0].0, "X-Webhook-Signature");
        assert!(headers[0].1.starts_with("sha256="));
        assert_eq!(headers[1].0, "X-Webhook-Timestamp");
        assert!(headers[1].1.parse::<i64>().is_ok());
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "ab"));
        assert!(!constant_time_compare("abc", "abcd"));
    }
}
