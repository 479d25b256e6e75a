//! Gateway event loop
//!
//! Single task multiplexing exactly two I/O sources: the UDP socket and
//! the TUN device, plus a 1-second tick for periodic maintenance. All
//! mutable state (the client table, the frame encoder, the enclave
//! connection) is owned here, so nothing needs locking.
//!
//! Error discipline: anything triggered by a packet drops that packet and
//! keeps the loop alive. A broken enclave connection is fatal; the
//! process exits so its supervisor can restart the gateway/enclave pair.

use crate::codec::frame::{ConnectRespFrame, DataFrame, Frame, IpPacket};
use crate::codec::parser::{Encoder, Parser};
use crate::gateway::client_manager::{Admission, ClientTable};
use crate::gateway::config::GatewayConfig;
use crate::ipc::client::EnclaveClient;
use crate::ipc::protocol::IpcError;
use crate::utils::device::{self, DeviceConfig};
use crate::utils::now_secs;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tun::AsyncDevice;

/// Packet buffer size for both the UDP socket and the TUN device
const BUF_SIZE: usize = 2048;

/// Seconds between maintenance passes (timeout sweep + enclave liveness)
const MAINTENANCE_INTERVAL_SECS: u64 = 30;

const DEFAULT_MTU: u16 = 1430;

/// The device side is generic over any packet stream so the datapath can
/// be exercised against an in-memory pipe; production wires in the real
/// TUN device.
pub struct Gateway<D> {
    udp: UdpSocket,
    dev: D,
    enclave: EnclaveClient,
    clients: ClientTable,
    encoder: Encoder,
}

impl Gateway<AsyncDevice> {
    /// Brings up the TUN interface, binds the UDP listener, and connects
    /// to the enclave. Any failure here is a startup failure.
    pub async fn new(cfg: &GatewayConfig) -> crate::Result<Self> {
        let dev = device::create(&DeviceConfig {
            name: cfg.tun_name.clone(),
            ip: cfg.tun_address.clone(),
            mask: cfg.netmask.clone(),
            mtu: DEFAULT_MTU,
        })?;

        let udp = UdpSocket::bind(("0.0.0.0", cfg.listen_port)).await?;
        tracing::info!("listening on udp 0.0.0.0:{}", cfg.listen_port);

        let mut enclave = EnclaveClient::connect(&cfg.enclave_socket).await?;
        enclave.ping().await?;

        Ok(Self::from_parts(udp, dev, enclave))
    }
}

impl<D> Gateway<D>
where
    D: AsyncRead + AsyncWrite + Unpin,
{
    pub fn from_parts(udp: UdpSocket, dev: D, enclave: EnclaveClient) -> Self {
        Self {
            udp,
            dev,
            enclave,
            clients: ClientTable::new(),
            encoder: Encoder::new(),
        }
    }

    pub async fn run(&mut self) -> crate::Result<()> {
        let mut udp_buf = vec![0u8; BUF_SIZE];
        let mut tun_buf = vec![0u8; BUF_SIZE];
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        let mut last_maintenance = now_secs();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("signal received, shutting down");
                    self.shutdown().await;
                    return Ok(());
                }

                received = self.udp.recv_from(&mut udp_buf) => {
                    match received {
                        Ok((n, peer)) => self.handle_udp(&udp_buf[..n], peer).await?,
                        Err(e) => tracing::warn!("udp recv failed: {}", e),
                    }
                }

                read = self.dev.read(&mut tun_buf) => {
                    match read {
                        Ok(n) => self.handle_tun(&tun_buf[..n]).await?,
                        Err(e) => tracing::warn!("tun read failed: {}", e),
                    }
                }

                _ = tick.tick() => {
                    let now = now_secs();
                    if now.saturating_sub(last_maintenance) >= MAINTENANCE_INTERVAL_SECS {
                        last_maintenance = now;
                        self.maintenance(now).await?;
                    }
                }
            }
        }
    }

    /// Ingress: one datagram from a client
    ///
    /// Returns `Err` only for a broken enclave transport; every
    /// packet-level problem is logged and dropped.
    async fn handle_udp(&mut self, buf: &[u8], peer: SocketAddr) -> crate::Result<()> {
        let (header, frame) = match Parser::unmarshal(buf) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!("dropping malformed packet from {}: {}", peer, e);
                return Ok(());
            }
        };

        match frame {
            Frame::ConnectReq(req) => {
                tracing::info!("connect request from {} ({})", peer, req.username);
                self.handle_connect(&req.public_key, peer).await
            }

            Frame::Data(data) => self.handle_data(data.payload, peer).await,

            Frame::Ping => {
                self.clients.touch(peer, now_secs());
                let pong = self.encoder.marshal(&Frame::Pong);
                if let Err(e) = self.udp.send_to(&pong, peer).await {
                    tracing::warn!("pong send to {} failed: {}", peer, e);
                }
                Ok(())
            }

            Frame::Disconnect => {
                let Some(vpn_ip) = self.clients.find_by_addr(peer).map(|c| c.vpn_ip) else {
                    return Ok(());
                };
                tracing::info!("client {} disconnected", vpn_ip);
                self.purge_key(vpn_ip).await?;
                self.clients.remove(vpn_ip);
                Ok(())
            }

            other => {
                tracing::debug!(
                    "dropping unexpected {:?} frame from {}: {}",
                    header.packet_type,
                    peer,
                    other
                );
                Ok(())
            }
        }
    }

    /// Handshake: admit the client, have the enclave derive and install
    /// the session key, and answer with the assignment
    async fn handle_connect(
        &mut self,
        client_public: &[u8; 32],
        peer: SocketAddr,
    ) -> crate::Result<()> {
        let (vpn_ip, session_id, admission) = match self.clients.add_client(peer, now_secs()) {
            Ok(admitted) => admitted,
            Err(e) => {
                tracing::warn!("rejecting {}: {}", peer, e);
                return self.send_connect_failure(peer).await;
            }
        };
        if admission == Admission::Existing {
            tracing::debug!("repeat connect from {}, reusing {}", peer, vpn_ip);
        }

        // a rehandshake replaces any previous key for this address
        let server_public = match self.enclave.handshake(vpn_ip, client_public).await {
            Ok(server_public) => server_public,
            Err(IpcError::Refused(_)) => {
                self.clients.remove(vpn_ip);
                return self.send_connect_failure(peer).await;
            }
            Err(e) => {
                self.clients.remove(vpn_ip);
                return Err(e.into());
            }
        };

        let resp = Frame::ConnectResp(ConnectRespFrame {
            status: 0,
            vpn_ip,
            session_id,
            server_public_key: server_public,
        });
        let buf = self.encoder.marshal(&resp);
        if let Err(e) = self.udp.send_to(&buf, peer).await {
            tracing::warn!("connect response to {} failed: {}", peer, e);
        }
        Ok(())
    }

    async fn send_connect_failure(&mut self, peer: SocketAddr) -> crate::Result<()> {
        let resp = Frame::ConnectResp(ConnectRespFrame {
            status: 1,
            vpn_ip: Ipv4Addr::UNSPECIFIED,
            session_id: 0,
            server_public_key: [0u8; 32],
        });
        let buf = self.encoder.marshal(&resp);
        if let Err(e) = self.udp.send_to(&buf, peer).await {
            tracing::warn!("connect response to {} failed: {}", peer, e);
        }
        Ok(())
    }

    /// Data ingress: authenticate and decrypt via the enclave, then hand
    /// the inner packet to the TUN device
    async fn handle_data(&mut self, payload: Vec<u8>, peer: SocketAddr) -> crate::Result<()> {
        let Some(vpn_ip) = self.clients.find_by_addr(peer).map(|c| c.vpn_ip) else {
            tracing::debug!("data from unknown peer {}", peer);
            return Ok(());
        };

        let plaintext = match self.enclave.decrypt(vpn_ip, &payload).await {
            Ok(plaintext) => plaintext,
            Err(IpcError::Refused(_)) => {
                // forged or corrupted; activity is only credited to
                // packets that authenticate
                tracing::debug!("dropping unauthenticated data from {}", vpn_ip);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.clients.touch(peer, now_secs());

        if let Err(e) = self.dev.write(&plaintext).await {
            tracing::warn!("tun write failed: {}", e);
        }
        Ok(())
    }

    /// Egress: route one inner IP packet to its client by destination
    /// tunnel address
    async fn handle_tun(&mut self, packet: &[u8]) -> crate::Result<()> {
        let ip = IpPacket(packet);
        if packet.is_empty() || ip.invalid() {
            return Ok(());
        }
        if ip.version() == 6 {
            // no IPv6 carriage
            return Ok(());
        }

        let dst = ip.dst();
        tracing::debug!("tun packet {} => {}", ip.src(), dst);
        let Some(peer) = self.clients.find_by_vpn_ip(dst).map(|c| c.peer_addr) else {
            tracing::debug!("no client for destination {}", dst);
            return Ok(());
        };

        let sealed = match self.enclave.encrypt(dst, packet).await {
            Ok(sealed) => sealed,
            Err(IpcError::Refused(_)) => {
                tracing::debug!("encrypt refused for {}", dst);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let buf = self
            .encoder
            .marshal(&Frame::Data(DataFrame { payload: sealed }));
        match self.udp.send_to(&buf, peer).await {
            Ok(_) => self.clients.touch(peer, now_secs()),
            Err(e) => tracing::warn!("udp send to {} failed: {}", peer, e),
        }
        Ok(())
    }

    /// Periodic pass: evict idle clients, purge their keys, and verify
    /// the enclave is still alive
    async fn maintenance(&mut self, now: u64) -> crate::Result<()> {
        for vpn_ip in self.clients.sweep_idle(now) {
            self.purge_key(vpn_ip).await?;
        }

        if let Err(e) = self.enclave.ping().await {
            tracing::error!("enclave liveness check failed: {}", e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Removes a session key, tolerating refusal but not a dead enclave
    async fn purge_key(&mut self, vpn_ip: Ipv4Addr) -> crate::Result<()> {
        match self.enclave.remove_key(vpn_ip).await {
            Ok(()) | Err(IpcError::Refused(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.enclave.shutdown().await {
            tracing::warn!("enclave shutdown request failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv6_packet_detected() {
        // version nibble 6 in the first byte
        let packet = [0x60u8; 40];
        assert_eq!(IpPacket(&packet).version(), 6);

        let packet = [0x45u8; 20];
        assert_eq!(IpPacket(&packet).version(), 4);
    }

    #[test]
    fn test_destination_extraction() {
        let mut packet = [0u8; 20];
        packet[0] = 0x45;
        packet[16..20].copy_from_slice(&[10, 8, 0, 7]);
        assert_eq!(IpPacket(&packet).dst(), Ipv4Addr::new(10, 8, 0, 7));
    }

    #[test]
    fn test_runt_packet_invalid() {
        assert!(IpPacket(&[0x45u8; 19]).invalid());
        assert!(!IpPacket(&[0x45u8; 20]).invalid());
    }
}
