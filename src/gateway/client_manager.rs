//! Connected-client table
//!
//! Fixed-capacity slot table owned exclusively by the gateway event loop.
//! Tunnel addresses are handed out sequentially from 10.8.0.2, wrapping at
//! 10.8.0.255; the cursor skips addresses still held by live clients, and
//! stale entries are reclaimed by the periodic timeout sweep.

use std::net::{Ipv4Addr, SocketAddr};

/// Upper bound on concurrently connected clients (one /24 minus the
/// gateway and the network/broadcast addresses)
pub const MAX_CLIENTS: usize = 254;

/// Seconds of silence after which a client is evicted
pub const CLIENT_TIMEOUT_SECS: u64 = 300;

/// First assignable tunnel address, host order (10.8.0.2)
const FIRST_IP: u32 = 0x0a08_0002;
/// Last assignable tunnel address, host order (10.8.0.255)
const LAST_IP: u32 = 0x0a08_00ff;

#[derive(Debug, Clone)]
pub struct ClientEntry {
    pub vpn_ip: Ipv4Addr,
    pub peer_addr: SocketAddr,
    pub last_seen: u64,
    pub session_id: u32,
}

/// Outcome of an insert: a fresh allocation or a refresh of a client the
/// gateway already knows by transport address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    New,
    Existing,
}

pub struct ClientTable {
    /// Fixed slot array; `None` slots are free
    slots: Vec<Option<ClientEntry>>,
    count: usize,
    /// Next allocation cursor, host order
    next_ip: u32,
}

impl ClientTable {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_CLIENTS).map(|_| None).collect(),
            count: 0,
            next_ip: FIRST_IP,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Admits a client, allocating a tunnel address
    ///
    /// A repeated request from a known transport address refreshes its
    /// activity and returns the existing assignment. A full table and an
    /// exhausted slot array are distinct failures; both leave the table
    /// untouched.
    pub fn add_client(
        &mut self,
        peer_addr: SocketAddr,
        now: u64,
    ) -> crate::Result<(Ipv4Addr, u32, Admission)> {
        if let Some(entry) = self.entry_by_addr_mut(peer_addr) {
            entry.last_seen = now;
            return Ok((entry.vpn_ip, entry.session_id, Admission::Existing));
        }

        if self.count >= MAX_CLIENTS {
            return Err("client table full".into());
        }

        let vpn_ip = self.allocate_ip().ok_or("no free tunnel address")?;
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or("no free client slot")?;

        let session_id = rand::random::<u32>();
        *slot = Some(ClientEntry {
            vpn_ip,
            peer_addr,
            last_seen: now,
            session_id,
        });
        self.count += 1;

        tracing::info!("client {} admitted as {}", peer_addr, vpn_ip);
        Ok((vpn_ip, session_id, Admission::New))
    }

    /// Advances the cursor to the next address not held by a live client
    fn allocate_ip(&mut self) -> Option<Ipv4Addr> {
        let span = (LAST_IP - FIRST_IP + 1) as usize;
        for _ in 0..span {
            let mut candidate = self.next_ip;
            if candidate > LAST_IP {
                candidate = FIRST_IP;
            }
            self.next_ip = candidate + 1;

            let ip = Ipv4Addr::from(candidate);
            if self.find_by_vpn_ip(ip).is_none() {
                return Some(ip);
            }
        }
        None
    }

    pub fn find_by_addr(&self, peer_addr: SocketAddr) -> Option<&ClientEntry> {
        self.slots
            .iter()
            .flatten()
            .find(|entry| entry.peer_addr == peer_addr)
    }

    pub fn find_by_vpn_ip(&self, vpn_ip: Ipv4Addr) -> Option<&ClientEntry> {
        self.slots
            .iter()
            .flatten()
            .find(|entry| entry.vpn_ip == vpn_ip)
    }

    /// Refreshes the activity timestamp of the client at `peer_addr`
    pub fn touch(&mut self, peer_addr: SocketAddr, now: u64) {
        if let Some(entry) = self.entry_by_addr_mut(peer_addr) {
            entry.last_seen = now;
        }
    }

    /// Marks the entry for `vpn_ip` free; returns whether it existed
    pub fn remove(&mut self, vpn_ip: Ipv4Addr) -> bool {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|e| e.vpn_ip == vpn_ip) {
                tracing::info!("client {} removed", vpn_ip);
                *slot = None;
                self.count -= 1;
                return true;
            }
        }
        false
    }

    /// Evicts every client idle longer than [`CLIENT_TIMEOUT_SECS`] and
    /// returns their addresses so the caller can purge the matching keys
    pub fn sweep_idle(&mut self, now: u64) -> Vec<Ipv4Addr> {
        let mut evicted = Vec::new();
        for slot in &mut self.slots {
            if let Some(entry) = slot {
                if now.saturating_sub(entry.last_seen) > CLIENT_TIMEOUT_SECS {
                    tracing::info!("client {} timed out", entry.vpn_ip);
                    evicted.push(entry.vpn_ip);
                    *slot = None;
                    self.count -= 1;
                }
            }
        }
        evicted
    }

    fn entry_by_addr_mut(&mut self, peer_addr: SocketAddr) -> Option<&mut ClientEntry> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|entry| entry.peer_addr == peer_addr)
    }
}

impl Default for ClientTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn addr(port: u16) -> SocketAddr {
        format!("192.0.2.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_sequential_allocation() {
        let mut table = ClientTable::new();
        let (first, _, admission) = table.add_client(addr(1000), 0).unwrap();
        assert_eq!(first, Ipv4Addr::new(10, 8, 0, 2));
        assert_eq!(admission, Admission::New);

        let (second, _, _) = table.add_client(addr(1001), 0).unwrap();
        assert_eq!(second, Ipv4Addr::new(10, 8, 0, 3));
    }

    #[test]
    fn test_known_address_refreshes() {
        let mut table = ClientTable::new();
        let (ip, session, _) = table.add_client(addr(1000), 10).unwrap();
        let (ip2, session2, admission) = table.add_client(addr(1000), 20).unwrap();

        assert_eq!(ip, ip2);
        assert_eq!(session, session2);
        assert_eq!(admission, Admission::Existing);
        assert_eq!(table.count(), 1);
        assert_eq!(table.find_by_addr(addr(1000)).unwrap().last_seen, 20);
    }

    #[test]
    fn test_no_duplicate_active_addresses() {
        let mut table = ClientTable::new();
        let mut seen = HashSet::new();
        for port in 0..200u16 {
            let (ip, _, _) = table.add_client(addr(2000 + port), 0).unwrap();
            assert!(seen.insert(ip));
        }
        // churn: disconnect half, admit replacements
        for port in 0..100u16 {
            let ip = table.find_by_addr(addr(2000 + port)).unwrap().vpn_ip;
            assert!(table.remove(ip));
            seen.remove(&ip);
        }
        for port in 0..100u16 {
            let (ip, _, _) = table.add_client(addr(3000 + port), 0).unwrap();
            assert!(seen.insert(ip), "duplicate allocation of {}", ip);
        }
    }

    #[test]
    fn test_cursor_wraps_after_255() {
        let mut table = ClientTable::new();
        // drain the cursor through the whole range with immediate removes
        for port in 0..254u16 {
            let (ip, _, _) = table.add_client(addr(1000 + port), 0).unwrap();
            assert!(table.remove(ip));
        }
        // cursor now past 10.8.0.255: next allocation restarts at .2
        let (ip, _, _) = table.add_client(addr(4000), 0).unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 8, 0, 2));
    }

    #[test]
    fn test_table_full() {
        let mut table = ClientTable::new();
        for port in 0..MAX_CLIENTS as u16 {
            table.add_client(addr(1000 + port), 0).unwrap();
        }
        assert_eq!(table.count(), MAX_CLIENTS);
        assert!(table.add_client(addr(9000), 0).is_err());
        assert_eq!(table.count(), MAX_CLIENTS);
    }

    #[test]
    fn test_timeout_sweep() {
        let mut table = ClientTable::new();
        let (old_ip, _, _) = table.add_client(addr(1000), 0).unwrap();
        let (fresh_ip, _, _) = table.add_client(addr(1001), 250).unwrap();

        let evicted = table.sweep_idle(CLIENT_TIMEOUT_SECS + 1);
        assert_eq!(evicted, vec![old_ip]);
        assert!(table.find_by_vpn_ip(old_ip).is_none());
        assert!(table.find_by_vpn_ip(fresh_ip).is_some());

        // exactly at the threshold is not yet idle
        let evicted = table.sweep_idle(250 + CLIENT_TIMEOUT_SECS);
        assert!(evicted.is_empty());
    }

    #[test]
    fn test_lookup_matches_ip_and_port() {
        let mut table = ClientTable::new();
        table.add_client(addr(1000), 0).unwrap();
        assert!(table.find_by_addr(addr(1000)).is_some());
        assert!(table.find_by_addr(addr(1001)).is_none());
    }
}
