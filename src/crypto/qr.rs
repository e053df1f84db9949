//! Signed QR access tokens.
//!
//! A token is `base64url(payload) "." base64url(mac)`, where the payload is the
//! bincode encoding of [`QrPayload`] and the MAC is HMAC-SHA256 over exactly
//! those bytes. The token is self-describing: a scanner can verify it without a
//! database round-trip, and the booking lifecycle then enforces single use.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bincode::{Decode, Encode};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::crypto::secrets::SecretStore;
use crate::error::{AppError, Result, VerificationError};

type HmacSha256 = Hmac<Sha256>;

const SEPARATOR: char = '.';
/// Upper bound on the encoded token; anything longer is rejected before decoding.
const MAX_TOKEN_LEN: usize = 512;
const MAX_PAYLOAD_BYTES: usize = 256;

/// The claims carried by a QR token.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct QrPayload {
    #[bincode(with_serde)]
    pub booking_id: Uuid,
    #[bincode(with_serde)]
    pub user_id: Uuid,
    #[bincode(with_serde)]
    pub venue_id: Uuid,
    /// Start of validity, unix milliseconds.
    pub valid_from: i64,
    /// End of validity, unix milliseconds.
    pub valid_to: i64,
    /// Per-issue random value; a reissue or revocation changes it.
    pub nonce: String,
}

impl QrPayload {
    pub fn new(
        booking_id: Uuid,
        user_id: Uuid,
        venue_id: Uuid,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
        nonce: String,
    ) -> Self {
        Self {
            booking_id,
            user_id,
            venue_id,
            valid_from: valid_from.timestamp_millis(),
            valid_to: valid_to.timestamp_millis(),
            nonce,
        }
    }

    pub fn valid_to_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.valid_to)
    }
}

fn bincode_config() -> impl bincode::config::Config {
    bincode::config::standard().with_limit::<MAX_PAYLOAD_BYTES>()
}

fn compute_mac(secret: &[u8], message: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(message);
    Some(mac.finalize().into_bytes().to_vec())
}

fn mac_matches(secret: &[u8], message: &[u8], presented: &[u8]) -> bool {
    match compute_mac(secret, message) {
        Some(expected) => expected.ct_eq(presented).into(),
        None => false,
    }
}

/// Signs `payload` with `secret` and returns the token string.
pub fn mint(payload: &QrPayload, secret: &[u8]) -> Result<String> {
    let bytes = bincode::encode_to_vec(payload, bincode_config())
        .map_err(|e| AppError::Internal(format!("QR payload encoding failed: {}", e)))?;
    let mac = compute_mac(secret, &bytes)
        .ok_or_else(|| AppError::Internal("QR signing key rejected".to_string()))?;

    Ok(format!(
        "{}{}{}",
        URL_SAFE_NO_PAD.encode(&bytes),
        SEPARATOR,
        URL_SAFE_NO_PAD.encode(mac)
    ))
}

/// Verifies `token` against the current secret (and the previous one, if any)
/// and returns its payload when the signature holds and `now <= valid_to`.
pub fn verify<S>(
    token: &str,
    secrets: &S,
    now: DateTime<Utc>,
) -> std::result::Result<QrPayload, VerificationError>
where
    S: SecretStore + ?Sized,
{
    if token.len() > MAX_TOKEN_LEN {
        return Err(VerificationError::MalformedToken);
    }

    let mut parts = token.split(SEPARATOR);
    let (encoded_payload, encoded_mac) = match (parts.next(), parts.next(), parts.next()) {
        (Some(p), Some(m), None) if !p.is_empty() && !m.is_empty() => (p, m),
        _ => return Err(VerificationError::MalformedToken),
    };

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(encoded_payload)
        .map_err(|_| VerificationError::MalformedToken)?;
    let presented_mac = URL_SAFE_NO_PAD
        .decode(encoded_mac)
        .map_err(|_| VerificationError::MalformedToken)?;

    let current_ok = mac_matches(secrets.current_secret(), &payload_bytes, &presented_mac);
    let previous_ok = secrets
        .previous_secret()
        .map(|previous| mac_matches(previous, &payload_bytes, &presented_mac))
        .unwrap_or(false);
    if !(current_ok || previous_ok) {
        return Err(VerificationError::BadSignature);
    }

    let (payload, consumed): (QrPayload, usize) =
        bincode::decode_from_slice(&payload_bytes, bincode_config())
            .map_err(|_| VerificationError::MalformedPayload)?;
    if consumed != payload_bytes.len() {
        return Err(VerificationError::MalformedPayload);
    }

    if now.timestamp_millis() > payload.valid_to {
        return Err(VerificationError::Expired);
    }

    Ok(payload)
}
