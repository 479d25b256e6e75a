//! Curve25519 identities and session-key derivation
//!
//! A keypair is generated fresh at process start on both ends; nothing is
//! persisted. The session key is derived from the raw ECDH output with a
//! keyed BLAKE2b step parameterized by a subkey id and an 8-byte context
//! label. Both peers must use identical parameters to agree.

use super::KEY_SIZE;
use blake2::digest::consts::U32;
use blake2::digest::Mac;
use blake2::Blake2bMac;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// KDF context label; must match on both ends of the handshake
const KDF_CONTEXT: &[u8; 8] = b"VPN_SESS";
/// KDF subkey identifier; must match on both ends of the handshake
const KDF_SUBKEY_ID: u64 = 1;

/// A 256-bit symmetric session key
///
/// Wiped from memory when dropped; the raw bytes are only reachable
/// through [`SessionKey::as_bytes`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        SessionKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// A Curve25519 identity keypair
///
/// The private half never leaves this struct and is zeroed on drop by the
/// underlying `StaticSecret`.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    /// Computes the ECDH shared secret with a peer's public key
    ///
    /// The returned secret zeroizes itself on drop; callers derive the
    /// session key from it and let it fall out of scope.
    pub fn diffie_hellman(&self, peer_public: &[u8; 32]) -> SharedSecret {
        self.secret.diffie_hellman(&PublicKey::from(*peer_public))
    }
}

/// Derives the symmetric session key from an ECDH shared secret
///
/// Keyed BLAKE2b-256 over an empty message with
/// salt = LE64(subkey id) and personalization = context label, both
/// zero-padded to 16 bytes.
pub fn derive_session_key(shared: &SharedSecret) -> SessionKey {
    let mut salt = [0u8; 16];
    salt[..8].copy_from_slice(&KDF_SUBKEY_ID.to_le_bytes());
    let mut personal = [0u8; 16];
    personal[..8].copy_from_slice(KDF_CONTEXT);

    let mac = Blake2bMac::<U32>::new_with_salt_and_personal(shared.as_bytes(), &salt, &personal)
        .expect("KDF parameter lengths are fixed");
    SessionKey(mac.finalize().into_bytes().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_agreement() {
        let server = KeyPair::generate();
        let client = KeyPair::generate();

        let server_shared = server.diffie_hellman(&client.public_bytes());
        let client_shared = client.diffie_hellman(&server.public_bytes());
        assert_eq!(server_shared.as_bytes(), client_shared.as_bytes());

        let server_key = derive_session_key(&server_shared);
        let client_key = derive_session_key(&client_shared);
        assert_eq!(server_key.as_bytes(), client_key.as_bytes());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();

        let first = derive_session_key(&a.diffie_hellman(&b.public_bytes()));
        let second = derive_session_key(&a.diffie_hellman(&b.public_bytes()));
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_distinct_peers_distinct_keys() {
        let server = KeyPair::generate();
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let alice_key = derive_session_key(&server.diffie_hellman(&alice.public_bytes()));
        let bob_key = derive_session_key(&server.diffie_hellman(&bob.public_bytes()));
        assert_ne!(alice_key.as_bytes(), bob_key.as_bytes());
    }

    #[test]
    fn test_session_key_differs_from_shared_secret() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let shared = a.diffie_hellman(&b.public_bytes());
        let key = derive_session_key(&shared);
        assert_ne!(key.as_bytes(), shared.as_bytes());
    }
}
