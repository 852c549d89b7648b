//! Decryption capability
//!
//! The indexer treats decryption as a black box behind [`Decryptor`]. An
//! AES-256-GCM implementation is provided in [`aead`].

use base64::{engine::general_purpose, Engine as _};

use crate::error::{IndexError, Result};

pub mod aead;

pub use aead::AeadDecryptor;

/// The user's private key material
#[derive(Clone)]
pub struct KeyMaterial {
    private_key: Vec<u8>,
}

impl KeyMaterial {
    pub fn new(private_key: Vec<u8>) -> Self {
        Self { private_key }
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let private_key = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| IndexError::Config(format!("Invalid key material: {}", e)))?;
        Ok(Self::new(private_key))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.private_key
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial").finish_non_exhaustive()
    }
}

/// Per-email symmetric key
#[derive(Clone)]
pub struct SessionKey(Vec<u8>);

impl SessionKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Decryption primitives used by the indexer
pub trait Decryptor: Send + Sync {
    /// Recover an email's session key with the user's key material
    fn decrypt_session_key(&self, keys: &KeyMaterial, encrypted: &str) -> Result<SessionKey>;

    /// Open one datagram sealed with a session key
    fn decrypt_datagram(&self, session_key: &SessionKey, datagram: &str) -> Result<Vec<u8>>;

    /// Open a datagram holding UTF-8 text
    fn decrypt_text(&self, session_key: &SessionKey, datagram: &str) -> Result<String> {
        let bytes = self.decrypt_datagram(session_key, datagram)?;
        String::from_utf8(bytes)
            .map_err(|e| IndexError::Decryption(format!("Datagram is not UTF-8: {}", e)))
    }
}
