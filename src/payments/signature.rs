//! Stripe-style webhook signature verification.
//!
//! Header format: `t=<unix>,v1=<hex>[,v1=<hex>...]`. The signed payload is
//! the exact bytes `<t>.<raw body>`; the body is never decoded or re-encoded
//! before hashing.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed timestamp (Stripe's recommended 5 minutes).
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Allowed clock skew for timestamps from the future.
pub const FUTURE_SKEW_SECS: i64 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,

    #[error("malformed signature header")]
    Malformed,

    #[error("timestamp outside tolerance (age {age}s)")]
    StaleTimestamp { age: i64 },

    #[error("signature mismatch")]
    Mismatch,

    #[error("webhook secret not configured")]
    NotConfigured,
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into().into_bytes(),
        }
    }

    pub fn verify(&self, payload: &[u8], header: &str) -> Result<(), SignatureError> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())
    }

    /// Verify against an explicit clock.
    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<(), SignatureError> {
        if self.secret.is_empty() {
            return Err(SignatureError::NotConfigured);
        }

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                signatures.push(s);
            }
        }

        let timestamp_str = timestamp.ok_or(SignatureError::Malformed)?;
        if signatures.is_empty() {
            return Err(SignatureError::Malformed);
        }
        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| SignatureError::Malformed)?;

        let age = now.saturating_sub(timestamp);
        if age > TIMESTAMP_TOLERANCE_SECS || age < -FUTURE_SKEW_SECS {
            tracing::warn!(age, "Webhook rejected: timestamp outside tolerance");
            return Err(SignatureError::StaleTimestamp { age });
        }

        let expected = self.mac(timestamp_str, payload)?;

        // Any v1 entry may match; Stripe sends several while a secret rolls.
        let matched = signatures.iter().any(|candidate| {
            hex::decode(candidate)
                .map(|bytes| bytes.len() == expected.len() && bool::from(bytes.ct_eq(&expected)))
                .unwrap_or(false)
        });

        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// Produce a header value for `payload` signed at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, SignatureError> {
        let ts = timestamp.to_string();
        let mac = self.mac(&ts, payload)?;
        Ok(format!("t={},v1={}", ts, hex::encode(mac)))
    }

    fn mac(&self, timestamp: &str, payload: &[u8]) -> Result<Vec<u8>, SignatureError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| SignatureError::NotConfigured)?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new("whsec_test_secret")
    }

    #[test]
    fn test_valid_signature() {
        let body = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;
        let header = verifier().sign(body, NOW).unwrap();
        assert_eq!(verifier().verify_at(body, &header, NOW), Ok(()));
    }

    #[test]
    fn test_non_utf8_body_is_hashed_verbatim() {
        let body = [0xff, 0xfe, b'{', b'}'];
        let header = verifier().sign(&body, NOW).unwrap();
        assert_eq!(verifier().verify_at(&body, &header, NOW), Ok(()));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let header = verifier().sign(b"{\"amount\":100}", NOW).unwrap();
        assert_eq!(
            verifier().verify_at(b"{\"amount\":999}", &header, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_any_v1_entry_may_match() {
        let body = b"{}";
        let good = verifier().sign(body, NOW).unwrap();
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1={},v1={}", NOW, "00".repeat(32), good_sig);
        assert_eq!(verifier().verify_at(body, &header, NOW), Ok(()));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = b"{}";
        let header = WebhookVerifier::new("whsec_other").sign(body, NOW).unwrap();
        assert_eq!(
            verifier().verify_at(body, &header, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_timestamp_window() {
        let body = b"{}";
        let old = verifier().sign(body, NOW - TIMESTAMP_TOLERANCE_SECS - 1).unwrap();
        assert!(matches!(
            verifier().verify_at(body, &old, NOW),
            Err(SignatureError::StaleTimestamp { .. })
        ));

        let edge = verifier().sign(body, NOW - TIMESTAMP_TOLERANCE_SECS).unwrap();
        assert_eq!(verifier().verify_at(body, &edge, NOW), Ok(()));

        let future = verifier().sign(body, NOW + FUTURE_SKEW_SECS + 1).unwrap();
        assert!(matches!(
            verifier().verify_at(body, &future, NOW),
            Err(SignatureError::StaleTimestamp { .. })
        ));
    }

    #[test]
    fn test_malformed_headers() {
        let v = verifier();
        assert_eq!(v.verify_at(b"{}", "", NOW), Err(SignatureError::Malformed));
        assert_eq!(v.verify_at(b"{}", "v1=abcd", NOW), Err(SignatureError::Malformed));
        assert_eq!(v.verify_at(b"{}", "t=123", NOW), Err(SignatureError::Malformed));
        assert_eq!(
            v.verify_at(b"{}", "t=soon,v1=abcd", NOW),
            Err(SignatureError::Malformed)
        );
    }

    #[test]
    fn test_non_hex_signature_is_mismatch() {
        let header = format!("t={},v1=zzzz", NOW);
        assert_eq!(
            verifier().verify_at(b"{}", &header, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_empty_secret_never_verifies() {
        let v = WebhookVerifier::new("");
        assert_eq!(
            v.verify_at(b"{}", &format!("t={},v1=00", NOW), NOW),
            Err(SignatureError::NotConfigured)
        );
    }

    #[test]
    fn test_extreme_timestamps_are_stale() {
        let v = verifier();
        assert_eq!(
            v.verify_at(b"{}", &format!("t={},v1=00", i64::MIN), NOW),
            Err(SignatureError::StaleTimestamp { age: i64::MAX })
        );
        assert!(matches!(
            v.verify_at(b"{}", &format!("t={},v1=00", i64::MAX), NOW),
            Err(SignatureError::StaleTimestamp { age }) if age < 0
        ));
        assert!(matches!(
            v.verify_at(b"{}", "t=0,v1=00", i64::MIN),
            Err(SignatureError::StaleTimestamp { .. })
        ));
    }
}
