//! ChaCha20-Poly1305 session cipher
//!
//! Each client session is protected by one 256-bit key. Every encryption
//! generates a fresh random 96-bit nonce which is prepended to the
//! ciphertext, so the wire format of a protected payload is
//! `nonce(12) || ciphertext || tag(16)` with no additional data.

use super::keys::SessionKey;
use super::{NONCE_SIZE, TAG_SIZE};
use chacha20poly1305::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce,
};

pub struct SessionCipher {
    cipher: ChaCha20Poly1305,
}

impl SessionCipher {
    pub fn new(key: &SessionKey) -> Self {
        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
        Self { cipher }
    }

    /// Generates a random 12-byte nonce
    ///
    /// Nonce reuse under one key breaks the AEAD; freshness comes from the
    /// system CSPRNG, uniform over the full 96-bit space.
    fn generate_nonce() -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        nonce
    }

    /// Encrypts data in-place
    ///
    /// On return `data` holds `nonce || ciphertext || tag`.
    pub fn seal(&self, data: &mut Vec<u8>) -> crate::Result<()> {
        let nonce_bytes = Self::generate_nonce();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, data.as_ref())
            .map_err(|e| format!("encryption failed: {}", e))?;

        data.clear();
        data.extend_from_slice(&nonce_bytes);
        data.extend_from_slice(&ciphertext);

        Ok(())
    }

    /// Decrypts data in-place
    ///
    /// Expects `nonce || ciphertext || tag`; on return `data` holds the
    /// plaintext. On any failure, including tag mismatch, `data` is left
    /// untouched and no plaintext is produced.
    pub fn open(&self, data: &mut Vec<u8>) -> crate::Result<()> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err("ciphertext too short".into());
        }

        let nonce = Nonce::from_slice(&data[0..NONCE_SIZE]);
        let ciphertext = &data[NONCE_SIZE..];

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| format!("decryption failed: {}", e))?;

        data.clear();
        data.extend_from_slice(&plaintext);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn test_key() -> SessionKey {
        SessionKey::from_bytes(*b"test_key_32_bytes_long_secret!!!")
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = SessionCipher::new(&test_key());

        let original = b"one tunneled ip packet".to_vec();
        let mut data = original.clone();

        cipher.seal(&mut data).unwrap();
        assert_ne!(data, original);
        assert_eq!(data.len(), original.len() + NONCE_SIZE + TAG_SIZE);

        cipher.open(&mut data).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let cipher = SessionCipher::new(&test_key());
        let mut data = Vec::new();
        cipher.seal(&mut data).unwrap();
        assert_eq!(data.len(), NONCE_SIZE + TAG_SIZE);
        cipher.open(&mut data).unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn test_single_bit_tamper_fails() {
        let cipher = SessionCipher::new(&test_key());
        let mut sealed = b"authenticated payload".to_vec();
        cipher.seal(&mut sealed).unwrap();

        // flip one bit in the nonce, the ciphertext body, and the tag
        for index in [0, NONCE_SIZE + 2, sealed.len() - 1] {
            let mut tampered = sealed.clone();
            tampered[index] ^= 0x01;
            assert!(
                cipher.open(&mut tampered).is_err(),
                "tamper at byte {} accepted",
                index
            );
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = SessionCipher::new(&test_key());
        let other = SessionCipher::new(&SessionKey::from_bytes([0x77; 32]));

        let mut data = b"secret".to_vec();
        cipher.seal(&mut data).unwrap();
        assert!(other.open(&mut data).is_err());
    }

    #[test]
    fn test_nonce_freshness() {
        let cipher = SessionCipher::new(&test_key());
        let mut seen = HashSet::new();
        for _ in 0..256 {
            let mut data = b"same plaintext".to_vec();
            cipher.seal(&mut data).unwrap();
            let nonce: [u8; NONCE_SIZE] = data[..NONCE_SIZE].try_into().unwrap();
            assert!(seen.insert(nonce), "nonce repeated");
        }
    }
}
