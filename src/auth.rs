use argon2::{
    Argon2,
    PasswordHash,
    PasswordVerifier,
    PasswordHasher,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

use argon2::password_hash::{SaltString, rand_core::OsRng as PHOsRng};

type HmacSha256 = Hmac<Sha256>;

/// Webhook timestamps older (or newer) than this are rejected.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Verify password using Argon2 hash stored in DB.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let parsed = match PasswordHash::new(stored_hash) {
        Ok(p) => p,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Hash a new password using Argon2id with a random salt.
/// Store the returned string in users.password_hash.
pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut PHOsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|phc| phc.to_string())
        .map_err(|e| format!("argon2 hash error: {e}"))
}

/// Opaque bearer token handed to the client. Only its hash is persisted.
pub fn generate_access_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash token for DB storage (SHA-256 hex).
pub fn hash_access_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is malformed")]
    Malformed,
    #[error("signature timestamp is outside the tolerance window")]
    Stale,
    #[error("signature does not match payload")]
    Mismatch,
}

fn mac_for(secret: &str, timestamp: i64, body: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac key length is unrestricted"));
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac
}

/// Hex signature for `"{timestamp}.{body}"`.
#[cfg(test)]
pub fn sign_webhook_payload(secret: &str, timestamp: i64, body: &[u8]) -> String {
    hex::encode(mac_for(secret, timestamp, body).finalize().into_bytes())
}

/// Check a `t=<unix>,v1=<hex>[,v1=<hex>...]` header against the raw body.
pub fn verify_webhook_signature(
    secret: &str,
    header: &str,
    body: &[u8],
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    candidates.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if candidates.is_empty() {
        return Err(SignatureError::Malformed);
    }
    let skew = now
        .checked_sub(timestamp)
        .map(i64::unsigned_abs)
        .ok_or(SignatureError::Stale)?;
    if skew > WEBHOOK_TOLERANCE_SECS.unsigned_abs() {
        return Err(SignatureError::Stale);
    }

    let matched = candidates
        .iter()
        .any(|sig| mac_for(secret, timestamp, body).verify_slice(sig).is_ok());

    if matched { Ok(()) } else { Err(SignatureError::Mismatch) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_roundtrip_and_rejects_wrong_password() {
        let hash = hash_password("s3cret-pass").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("s3cret-pass", &hash));
        assert!(!verify_password("other", &hash));
        assert!(!verify_password("s3cret-pass", "not-a-phc-string"));
    }

    #[test]
    fn access_tokens_are_unique_and_hash_is_stable() {
        let a = generate_access_token();
        let b = generate_access_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert_eq!(hash_access_token(&a), hash_access_token(&a));
        assert_eq!(hash_access_token(&a).len(), 64);
    }

    #[test]
    fn webhook_signature_accepts_valid_header() {
        let body = br#"{"type":"payment.succeeded"}"#;
        let sig = sign_webhook_payload("whsec", 1_700_000_000, body);
        let header = format!("t=1700000000,v1={sig}");
        assert_eq!(
            verify_webhook_signature("whsec", &header, body, 1_700_000_010),
            Ok(())
        );
    }

    #[test]
    fn webhook_signature_accepts_any_matching_candidate() {
        let body = b"{}";
        let sig = sign_webhook_payload("whsec", 100, body);
        let header = format!("t=100, v1=deadbeef, v1={sig}");
        assert_eq!(verify_webhook_signature("whsec", &header, body, 100), Ok(()));
    }

    #[test]
    fn webhook_signature_rejects_tampering_and_staleness() {
        let body = b"{\"amount\":100}";
        let sig = sign_webhook_payload("whsec", 100, body);
        let header = format!("t=100,v1={sig}");

        assert_eq!(
            verify_webhook_signature("whsec", &header, b"{\"amount\":1}", 100),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_webhook_signature("other", &header, body, 100),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_webhook_signature("whsec", &header, body, 100 + WEBHOOK_TOLERANCE_SECS + 1),
            Err(SignatureError::Stale)
        );
    }

    #[test]
    fn webhook_signature_rejects_malformed_headers() {
        assert_eq!(
            verify_webhook_signature("whsec", "v1=abcd", b"", 0),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_webhook_signature("whsec", "t=0", b"", 0),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_webhook_signature("whsec", "garbage", b"", 0),
            Err(SignatureError::Malformed)
        );
    }

    #[test]
    fn webhook_signature_treats_extreme_timestamps_as_stale() {
        assert_eq!(
            verify_webhook_signature("whsec", "t=-9223372036854775808,v1=00", b"{}", 1_700_000_000),
            Err(SignatureError::Stale)
        );
        assert_eq!(
            verify_webhook_signature("whsec", "t=9223372036854775807,v1=00", b"{}", -1_700_000_000),
            Err(SignatureError::Stale)
        );
        assert_eq!(
            verify_webhook_signature("whsec", "t=9223372036854775807,v1=00", b"{}", 1_700_000_000),
            Err(SignatureError::Stale)
        );
    }
}
