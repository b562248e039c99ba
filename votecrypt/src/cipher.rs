//! Per-ballot symmetric encryption.
//!
//! Every call to [`encrypt`] draws a fresh AES-256 key and nonce. The key is
//! handed back as 64 lowercase hex characters so it can be wrapped one
//! character at a time; the ciphertext is base64 of `nonce ‖ ciphertext ‖ tag`.

use crate::Error;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// Raw key length in bytes; the serialized key is twice as many hex characters.
pub const KEY_LENGTH: usize = 32;

const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

/// Encrypt `plaintext` under a freshly generated key.
///
/// Returns `(ciphertext, key)`.
pub fn encrypt(plaintext: &str) -> Result<(String, String), Error> {
    let mut key = [0u8; KEY_LENGTH];
    OsRng.fill_bytes(&mut key);

    let mut nonce = [0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = aes_encrypt(&key, &nonce, plaintext.as_bytes())?;
    Ok((ciphertext, hex::encode(key)))
}

/// Reverse [`encrypt`].
pub fn decrypt(ciphertext: &str, key: &str) -> Result<String, Error> {
    let key = hex::decode(key).map_err(|e| Error::Cipher(format!("key is not hex: {}", e)))?;
    if key.len() != KEY_LENGTH {
        return Err(Error::Cipher(format!(
            "wrong key length: expected {} bytes, found {}",
            KEY_LENGTH,
            key.len()
        )));
    }

    let raw = STANDARD
        .decode(ciphertext.trim())
        .map_err(|e| Error::Cipher(format!("ciphertext is not base64: {}", e)))?;
    if raw.len() < NONCE_LENGTH + TAG_LENGTH {
        return Err(Error::Cipher(format!(
            "ciphertext too short: {} bytes",
            raw.len()
        )));
    }

    let plaintext = aes_decrypt(&key, &raw)?;
    String::from_utf8(plaintext)
        .map_err(|_| Error::Cipher("decrypted ballot is not valid UTF-8".to_owned()))
}

fn aes_encrypt(key: &[u8], nonce: &[u8; NONCE_LENGTH], msg: &[u8]) -> Result<String, Error> {
    let aead = Aes256Gcm::new_from_slice(key)
        .map_err(|_| Error::Cipher("invalid key length".to_owned()))?;

    let encrypted = aead
        .encrypt(Nonce::from_slice(nonce), msg)
        .map_err(|_| Error::Cipher("encryption failure".to_owned()))?;

    let mut output = Vec::with_capacity(NONCE_LENGTH + encrypted.len());
    output.extend_from_slice(nonce);
    output.extend(encrypted);

    Ok(STANDARD.encode(output))
}

fn aes_decrypt(key: &[u8], raw: &[u8]) -> Result<Vec<u8>, Error> {
    let aead = Aes256Gcm::new_from_slice(key)
        .map_err(|_| Error::Cipher("invalid key length".to_owned()))?;

    let (nonce, encrypted) = raw.split_at(NONCE_LENGTH);
    aead.decrypt(Nonce::from_slice(nonce), encrypted)
        .map_err(|_| Error::Cipher("ciphertext does not match key".to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        for plaintext in &["Candidate - A", "", "Żółw 候选人"] {
            let (ciphertext, key) = encrypt(plaintext).unwrap();
            assert_eq!(decrypt(&ciphertext, &key).unwrap(), *plaintext);
        }
    }

    #[test]
    fn test_fresh_key_per_call() {
        let (c1, k1) = encrypt("Candidate - A").unwrap();
        let (c2, k2) = encrypt("Candidate - A").unwrap();
        assert_ne!(k1, k2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_key_alphabet() {
        let (_, key) = encrypt("Candidate - B").unwrap();
        assert_eq!(key.len(), KEY_LENGTH * 2);
        assert!(key.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
    }

    #[test]
    fn test_wrong_key() {
        let (ciphertext, _) = encrypt("Candidate - C").unwrap();
        let (_, other_key) = encrypt("Candidate - C").unwrap();
        assert!(matches!(decrypt(&ciphertext, &other_key), Err(Error::Cipher(_))));
    }

    #[test]
    fn test_malformed_inputs() {
        let (ciphertext, key) = encrypt("Candidate - A").unwrap();

        // Truncated key
        assert!(matches!(decrypt(&ciphertext, &key[..40]), Err(Error::Cipher(_))));
        // Odd-length / non-hex key
        assert!(matches!(decrypt(&ciphertext, &key[..63]), Err(Error::Cipher(_))));
        assert!(matches!(decrypt(&ciphertext, "zz"), Err(Error::Cipher(_))));
        // Empty key, as left by an empty wrapped-key list
        assert!(matches!(decrypt(&ciphertext, ""), Err(Error::Cipher(_))));
        // Garbage and truncated ciphertext
        assert!(matches!(decrypt("not base64!", &key), Err(Error::Cipher(_))));
        assert!(matches!(decrypt(&ciphertext[..8], &key), Err(Error::Cipher(_))));
    }
}
