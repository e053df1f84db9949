use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::{Config, MIN_SECRET_BYTES};
use crate::error::{AppError, Result};

/// Supplies the keys used to sign and verify QR tokens.
pub trait SecretStore: Send + Sync {
    /// The key new tokens are signed with.
    fn current_secret(&self) -> &[u8];

    /// A retired key still accepted during a rotation window.
    fn previous_secret(&self) -> Option<&[u8]>;
}

/// A secret key wrapper that is zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    /// Creates a new `SecretKey`, rejecting keys shorter than 32 bytes.
    pub fn new(key: Vec<u8>) -> Result<Self> {
        if key.len() < MIN_SECRET_BYTES {
            return Err(AppError::Validation(format!(
                "Signing secret must be at least {} bytes",
                MIN_SECRET_BYTES
            )));
        }
        Ok(Self(key))
    }

    /// Returns the key as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Server-held QR signing keys: the current one and, while rotating, the previous one.
#[derive(Debug)]
pub struct QrSecrets {
    current: SecretKey,
    previous: Option<SecretKey>,
}

impl QrSecrets {
    pub fn new(current: SecretKey, previous: Option<SecretKey>) -> Self {
        Self { current, previous }
    }

    /// Builds the key set from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let current = SecretKey::new(config.qr_secret.to_vec())?;
        let previous = config
            .qr_previous_secret
            .as_ref()
            .map(|secret| SecretKey::new(secret.to_vec()))
            .transpose()?;
        Ok(Self::new(current, previous))
    }

    /// Promotes `next` to the signing key and keeps the old one for verification.
    pub fn rotate(self, next: SecretKey) -> Self {
        let QrSecrets { current, previous } = self;
        drop(previous);
        Self {
            current: next,
            previous: Some(current),
        }
    }
}

impl SecretStore for QrSecrets {
    fn current_secret(&self) -> &[u8] {
        self.current.as_bytes()
    }

    fn previous_secret(&self) -> Option<&[u8]> {
        self.previous.as_ref().map(SecretKey::as_bytes)
    }
}
