use rand::RngCore;
use rand::rngs::OsRng;
use base64::{Engine as _, engine::general_purpose};

/// The size of a QR nonce in bytes.
const QR_NONCE_SIZE: usize = 16;

/// Generates a new random QR nonce.
///
/// # Returns
///
/// A URL-safe base64-encoded nonce.
pub fn generate_qr_nonce() -> String {
    let mut nonce = [0u8; QR_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    general_purpose::URL_SAFE_NO_PAD.encode(nonce)
}
