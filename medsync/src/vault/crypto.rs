//! Key derivation and field encryption.
//!
//! Two PBKDF2 derivations share one salt: HMAC-SHA-256 produces the AES key,
//! HMAC-SHA-512 produces the stored verification hash. A leaked hash does
//! not reveal the key.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Sha256, Sha512};
use zeroize::Zeroize;

use super::VaultError;

/// Default PBKDF2 iteration count for new vaults.
pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const SALT_LEN: usize = 32;
pub const KEY_LEN: usize = 32;
pub const VERIFICATION_HASH_LEN: usize = 64;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// AES-256 key held in memory while the vault is unlocked.
///
/// Bytes are wiped when the value is dropped.
pub struct VaultKey {
    bytes: [u8; KEY_LEN],
}

impl VaultKey {
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    fn cipher(&self) -> Result<Aes256Gcm, VaultError> {
        Aes256Gcm::new_from_slice(&self.bytes)
            .map_err(|_| VaultError::Crypto("invalid key length".to_string()))
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(**redacted**)")
    }
}

impl Drop for VaultKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    rand::random()
}

/// PBKDF2-HMAC-SHA-256 → AES-256 key.
pub fn derive_encryption_key(password: &str, salt: &[u8], iterations: u32) -> VaultKey {
    let mut bytes = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut bytes);
    let key = VaultKey::from_bytes(bytes);
    bytes.zeroize();
    key
}

/// PBKDF2-HMAC-SHA-512 → verification hash, base64 encoded.
pub fn verification_hash(password: &str, salt: &[u8], iterations: u32) -> String {
    let mut hash = [0u8; VERIFICATION_HASH_LEN];
    pbkdf2::pbkdf2_hmac::<Sha512>(password.as_bytes(), salt, iterations, &mut hash);
    BASE64.encode(hash)
}

/// Compare two byte strings without an early exit on the first mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Encrypt a UTF-8 field as `base64(iv):base64(authTag):base64(ciphertext)`.
///
/// A fresh random 96-bit IV is used for every call.
pub fn encrypt_field(key: &VaultKey, plaintext: &str) -> Result<String, VaultError> {
    let cipher = key.cipher()?;
    let iv: [u8; IV_LEN] = rand::random();

    // aes-gcm appends the tag to the ciphertext.
    let mut sealed = cipher
        .encrypt((&iv).into(), plaintext.as_bytes())
        .map_err(|_| VaultError::Crypto("AES-GCM encryption failed".to_string()))?;
    let tag = sealed.split_off(sealed.len() - TAG_LEN);

    Ok(format!(
        "{}:{}:{}",
        BASE64.encode(iv),
        BASE64.encode(tag),
        BASE64.encode(sealed)
    ))
}

/// Inverse of [`encrypt_field`].
pub fn decrypt_field(key: &VaultKey, value: &str) -> Result<String, VaultError> {
    let mut parts = value.split(':');
    let (Some(iv), Some(tag), Some(ciphertext), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(VaultError::InvalidCiphertext("expected iv:authTag:ciphertext"));
    };

    let iv = BASE64
        .decode(iv)
        .map_err(|_| VaultError::InvalidCiphertext("iv is not base64"))?;
    let tag = BASE64
        .decode(tag)
        .map_err(|_| VaultError::InvalidCiphertext("auth tag is not base64"))?;
    let mut sealed = BASE64
        .decode(ciphertext)
        .map_err(|_| VaultError::InvalidCiphertext("ciphertext is not base64"))?;

    let iv: [u8; IV_LEN] = iv
        .try_into()
        .map_err(|_| VaultError::InvalidCiphertext("iv must be 12 bytes"))?;
    if tag.len() != TAG_LEN {
        return Err(VaultError::InvalidCiphertext("auth tag must be 16 bytes"));
    }
    sealed.extend_from_slice(&tag);

    let cipher = key.cipher()?;
    let mut plaintext = cipher
        .decrypt((&iv).into(), sealed.as_slice())
        .map_err(|_| VaultError::InvalidCiphertext("authentication failed"))?;

    let text = String::from_utf8(plaintext.clone())
        .map_err(|_| VaultError::InvalidCiphertext("plaintext is not UTF-8"));
    plaintext.zeroize();
    text
}
