//! Cryptographic primitives for the tunnel
//!
//! Two concerns live here:
//! - `aead`: the ChaCha20-Poly1305 session cipher that protects data frames
//! - `keys`: Curve25519 identities, ECDH, and session-key derivation

pub mod aead;
pub mod keys;

/// Session key size in bytes
pub const KEY_SIZE: usize = 32;
/// AEAD nonce size in bytes
pub const NONCE_SIZE: usize = 12;
/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;
