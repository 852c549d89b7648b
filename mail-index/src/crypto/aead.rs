//! AES-256-GCM datagrams
//!
//! A sealed value is `base64(nonce || ciphertext || tag)`. Session keys are
//! sealed with the user's 32-byte private key, every other datagram with the
//! email's session key.

use base64::{engine::general_purpose, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

use super::{Decryptor, KeyMaterial, SessionKey};
use crate::error::{IndexError, Result};

/// Key length for AES-256
pub const KEY_LEN: usize = 32;

#[derive(Debug, Default, Clone, Copy)]
pub struct AeadDecryptor;

impl AeadDecryptor {
    pub fn new() -> Self {
        Self
    }
}

impl Decryptor for AeadDecryptor {
    fn decrypt_session_key(&self, keys: &KeyMaterial, encrypted: &str) -> Result<SessionKey> {
        let bytes = open(keys.as_bytes(), encrypted)?;
        if bytes.len() != KEY_LEN {
            return Err(IndexError::Decryption(format!(
                "Session key has {} bytes, expected {}",
                bytes.len(),
                KEY_LEN
            )));
        }
        Ok(SessionKey::new(bytes))
    }

    fn decrypt_datagram(&self, session_key: &SessionKey, datagram: &str) -> Result<Vec<u8>> {
        open(session_key.as_bytes(), datagram)
    }
}

fn aead_key(key: &[u8]) -> Result<LessSafeKey> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| IndexError::Decryption(format!("Invalid key length: {}", key.len())))?;
    Ok(LessSafeKey::new(unbound))
}

/// Open a sealed value
pub fn open(key: &[u8], sealed: &str) -> Result<Vec<u8>> {
    let raw = general_purpose::STANDARD
        .decode(sealed.trim())
        .map_err(|e| IndexError::Decryption(format!("Invalid base64: {}", e)))?;
    if raw.len() < NONCE_LEN + AES_256_GCM.tag_len() {
        return Err(IndexError::Decryption("Sealed value is truncated".to_string()));
    }

    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
        .map_err(|_| IndexError::Decryption("Invalid nonce".to_string()))?;

    let key = aead_key(key)?;
    let mut in_out = ciphertext.to_vec();
    let plaintext = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| IndexError::Decryption("Authentication failed".to_string()))?;
    Ok(plaintext.to_vec())
}

/// Seal `plaintext` under `key` with a random nonce
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<String> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| IndexError::Decryption("Random source unavailable".to_string()))?;

    let key = aead_key(key)?;
    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce_bytes),
        Aad::empty(),
        &mut in_out,
    )
    .map_err(|_| IndexError::Decryption("Sealing failed".to_string()))?;

    let mut sealed = nonce_bytes.to_vec();
    sealed.extend_from_slice(&in_out);
    Ok(general_purpose::STANDARD.encode(sealed))
}

/// Generate a random 32-byte key
pub fn generate_key() -> Result<Vec<u8>> {
    let mut key = vec![0u8; KEY_LEN];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| IndexError::Decryption("Random source unavailable".to_string()))?;
    Ok(key)
}
