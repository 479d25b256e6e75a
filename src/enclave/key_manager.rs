//! Session key table and server identity
//!
//! Fixed-capacity slot table keyed by tunnel address. Key bytes are wiped
//! when a slot is cleared and when the table is dropped. The server's
//! Curve25519 keypair is generated once at startup; the private half never
//! leaves this struct.

use crate::crypto::keys::{derive_session_key, KeyPair, SessionKey};
use crate::crypto::KEY_SIZE;
use std::net::Ipv4Addr;

/// Upper bound on concurrently installed session keys
pub const MAX_KEYS: usize = 256;

struct KeyEntry {
    vpn_ip: Ipv4Addr,
    key: SessionKey,
}

pub struct KeyManager {
    /// Fixed slot array; `None` slots are free. Entries wipe their key on
    /// removal via `SessionKey`'s drop.
    slots: Vec<Option<KeyEntry>>,
    count: usize,
    identity: KeyPair,
}

impl KeyManager {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_KEYS).map(|_| None).collect(),
            count: 0,
            identity: KeyPair::generate(),
        }
    }

    pub fn server_public(&self) -> [u8; 32] {
        self.identity.public_bytes()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Installs a session key for a tunnel address
    ///
    /// An existing entry for the same address is replaced in place, so the
    /// most recent writer wins. Otherwise the first free slot is used.
    pub fn add_key(&mut self, vpn_ip: Ipv4Addr, key: SessionKey) -> crate::Result<()> {
        if let Some(entry) = self.entry_mut(vpn_ip) {
            entry.key = key;
            return Ok(());
        }

        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or("key table full")?;
        *slot = Some(KeyEntry { vpn_ip, key });
        self.count += 1;
        tracing::debug!("key added for {}", vpn_ip);
        Ok(())
    }

    pub fn get_key(&self, vpn_ip: Ipv4Addr) -> Option<&SessionKey> {
        self.slots
            .iter()
            .flatten()
            .find(|entry| entry.vpn_ip == vpn_ip)
            .map(|entry| &entry.key)
    }

    /// Removes and wipes the key for a tunnel address; idempotent
    pub fn remove_key(&mut self, vpn_ip: Ipv4Addr) {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|e| e.vpn_ip == vpn_ip) {
                // dropping the entry zeroizes the key bytes
                *slot = None;
                self.count -= 1;
                tracing::debug!("key removed for {}", vpn_ip);
                return;
            }
        }
    }

    /// ECDH handshake for one client
    ///
    /// Computes the shared secret against the client's public key, derives
    /// the session key, and installs it for `vpn_ip`. Returns the server
    /// public key and a copy of the session key for the response; the
    /// shared secret is wiped when it drops.
    pub fn handshake(
        &mut self,
        vpn_ip: Ipv4Addr,
        client_public: &[u8; KEY_SIZE],
    ) -> crate::Result<([u8; 32], SessionKey)> {
        let shared = self.identity.diffie_hellman(client_public);
        let session_key = derive_session_key(&shared);
        self.add_key(vpn_ip, session_key.clone())?;
        Ok((self.server_public(), session_key))
    }

    fn entry_mut(&mut self, vpn_ip: Ipv4Addr) -> Option<&mut KeyEntry> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|entry| entry.vpn_ip == vpn_ip)
    }
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 8, 0, last)
    }

    #[test]
    fn test_add_get_remove() {
        let mut km = KeyManager::new();
        km.add_key(ip(2), SessionKey::from_bytes([1; 32])).unwrap();
        km.add_key(ip(3), SessionKey::from_bytes([2; 32])).unwrap();
        assert_eq!(km.count(), 2);

        assert_eq!(km.get_key(ip(2)).unwrap().as_bytes(), &[1; 32]);
        assert_eq!(km.get_key(ip(3)).unwrap().as_bytes(), &[2; 32]);
        assert!(km.get_key(ip(4)).is_none());

        km.remove_key(ip(2));
        assert!(km.get_key(ip(2)).is_none());
        assert_eq!(km.count(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut km = KeyManager::new();
        km.add_key(ip(2), SessionKey::from_bytes([1; 32])).unwrap();
        km.remove_key(ip(2));
        km.remove_key(ip(2));
        assert_eq!(km.count(), 0);
    }

    #[test]
    fn test_last_writer_wins() {
        let mut km = KeyManager::new();
        km.add_key(ip(2), SessionKey::from_bytes([1; 32])).unwrap();
        km.add_key(ip(2), SessionKey::from_bytes([9; 32])).unwrap();
        assert_eq!(km.count(), 1);
        assert_eq!(km.get_key(ip(2)).unwrap().as_bytes(), &[9; 32]);
    }

    #[test]
    fn test_table_full() {
        let mut km = KeyManager::new();
        for i in 0..MAX_KEYS {
            let addr = Ipv4Addr::new(10, 8, (i / 256) as u8, (i % 256) as u8);
            km.add_key(addr, SessionKey::from_bytes([0; 32])).unwrap();
        }
        assert!(km
            .add_key(Ipv4Addr::new(10, 9, 0, 1), SessionKey::from_bytes([0; 32]))
            .is_err());
    }

    #[test]
    fn test_handshake_installs_agreeing_key() {
        let mut km = KeyManager::new();
        let client = KeyPair::generate();

        let (server_public, returned) = km
            .handshake(ip(2), &client.public_bytes())
            .unwrap();

        // the client derives from its own side of the exchange
        let client_side =
            crate::crypto::keys::derive_session_key(&client.diffie_hellman(&server_public));

        assert_eq!(returned.as_bytes(), client_side.as_bytes());
        assert_eq!(km.get_key(ip(2)).unwrap().as_bytes(), client_side.as_bytes());
    }
}
