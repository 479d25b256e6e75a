//! Client connection state machine
//!
//! Disconnected → Handshaking → Connected → Reconnecting → (Handshaking |
//! Disconnected). The handshake runs over a fresh ephemeral UDP socket
//! with a 5-second response timeout; the connected phase is a full-duplex
//! loop structurally identical to the gateway's, except that encryption
//! happens locally with the client's own session key.

use crate::client::config::ClientConfig;
use crate::codec::frame::{ConnectReqFrame, DataFrame, Frame, IpPacket};
use crate::codec::parser::{Encoder, Parser};
use crate::crypto::aead::SessionCipher;
use crate::crypto::keys::{derive_session_key, KeyPair};
use crate::utils::device::{self, DeviceConfig};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tun::AsyncDevice;
use zeroize::Zeroize;

const BUF_SIZE: usize = 2048;
const DEFAULT_MTU: u16 = 1430;

/// How long to wait for the connect response
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Reconnect pacing: delays double from 1 s and clamp at 60 s
///
/// The attempt counter and delay reset once a handshake succeeds.
pub struct Backoff {
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            current: INITIAL_BACKOFF,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the delay to sleep before the next attempt and advances
    /// the schedule
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        self.attempts += 1;
        delay
    }

    pub fn reset(&mut self) {
        self.current = INITIAL_BACKOFF;
        self.attempts = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the connected loop ended
enum Exit {
    /// Pong timeout; go back through Reconnecting
    Lost,
    /// Signal; clean shutdown
    Signal,
}

/// State established by a successful handshake
struct Session {
    socket: UdpSocket,
    server: SocketAddr,
    vpn_ip: Ipv4Addr,
    session_id: u32,
    cipher: SessionCipher,
}

pub struct VpnClient {
    cfg: ClientConfig,
    /// Identity keypair, fresh for each process run; nothing is persisted
    identity: KeyPair,
    encoder: Encoder,
    /// TUN device, created on first connect and reused across reconnects
    dev: Option<AsyncDevice>,
    dev_ip: Option<Ipv4Addr>,
}

impl VpnClient {
    pub fn new(cfg: ClientConfig) -> Self {
        Self {
            cfg,
            identity: KeyPair::generate(),
            encoder: Encoder::new(),
            dev: None,
            dev_ip: None,
        }
    }

    /// Drives the state machine until a signal or a terminal failure
    pub async fn run(&mut self) -> crate::Result<()> {
        let mut backoff = Backoff::new();

        loop {
            let session = match self.handshake().await {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!("handshake failed: {}", e);
                    if !self.cfg.auto_reconnect {
                        return Err(e);
                    }
                    if backoff.attempts() >= self.cfg.max_reconnect_attempts {
                        return Err("reconnect attempts exhausted".into());
                    }
                    let delay = backoff.next_delay();
                    tracing::info!(
                        "retrying in {:?} (attempt {}/{})",
                        delay,
                        backoff.attempts(),
                        self.cfg.max_reconnect_attempts
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = tokio::signal::ctrl_c() => {
                            tracing::info!("signal received, shutting down");
                            return Ok(());
                        }
                    }
                }
            };
            backoff.reset();

            match self.connected(session).await {
                Exit::Signal => return Ok(()),
                Exit::Lost => {
                    if !self.cfg.auto_reconnect {
                        return Err("connection lost".into());
                    }
                    tracing::warn!("connection lost, reconnecting");
                }
            }
        }
    }

    /// Handshaking state: one request, one response, key derivation
    async fn handshake(&mut self) -> crate::Result<Session> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server = tokio::net::lookup_host((
            self.cfg.server_address.as_str(),
            self.cfg.server_port,
        ))
        .await?
        .next()
        .ok_or("server address did not resolve")?;

        let request = Frame::ConnectReq(ConnectReqFrame {
            username: self.cfg.username.clone(),
            public_key: self.identity.public_bytes(),
        });
        socket.send_to(&self.encoder.marshal(&request), server).await?;
        tracing::info!("connect request sent to {}", server);

        // the reply may come from an alternate source port, so the socket
        // stays unconnected and any sender is accepted
        let mut buf = vec![0u8; BUF_SIZE];
        let resp = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            loop {
                let (n, _) = socket.recv_from(&mut buf).await?;
                if let Ok((_, Frame::ConnectResp(resp))) = Parser::unmarshal(&buf[..n]) {
                    return Ok::<_, crate::Error>(resp);
                }
            }
        })
        .await
        .map_err(|_| "handshake timed out")??;

        if resp.status != 0 {
            return Err(format!("handshake rejected with status {}", resp.status).into());
        }

        let shared = self.identity.diffie_hellman(&resp.server_public_key);
        let session_key = derive_session_key(&shared);
        let cipher = SessionCipher::new(&session_key);
        // shared secret and key copy are wiped when they drop here

        tracing::info!(
            "connected: tunnel address {} session {}",
            resp.vpn_ip,
            resp.session_id
        );

        Ok(Session {
            socket,
            server,
            vpn_ip: resp.vpn_ip,
            session_id: resp.session_id,
            cipher,
        })
    }

    /// Creates the TUN device, or reuses the existing one when the
    /// assigned address is unchanged across a reconnect
    fn ensure_device(&mut self, vpn_ip: Ipv4Addr) -> crate::Result<()> {
        if self.dev.is_some() && self.dev_ip == Some(vpn_ip) {
            return Ok(());
        }
        let dev = device::create(&DeviceConfig {
            name: self.cfg.tun_name.clone(),
            ip: vpn_ip.to_string(),
            mask: "255.255.255.0".to_string(),
            mtu: DEFAULT_MTU,
        })?;
        self.dev = Some(dev);
        self.dev_ip = Some(vpn_ip);
        Ok(())
    }

    /// Connected state: full-duplex tunnel loop with keepalive
    async fn connected(&mut self, session: Session) -> Exit {
        if let Err(e) = self.ensure_device(session.vpn_ip) {
            tracing::error!("tun setup failed: {}", e);
            return Exit::Lost;
        }
        let mut dev = self.dev.take().expect("device just ensured");

        let mut udp_buf = vec![0u8; BUF_SIZE];
        let mut tun_buf = vec![0u8; BUF_SIZE];
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        let keepalive_interval = Duration::from_secs(self.cfg.keepalive_interval);
        let pong_timeout = Duration::from_secs(self.cfg.pong_timeout);
        let mut last_ping = Instant::now();
        let mut last_pong = Instant::now();

        let exit = loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("signal received, disconnecting");
                    let goodbye = self.encoder.marshal(&Frame::Disconnect);
                    let _ = session.socket.send_to(&goodbye, session.server).await;
                    break Exit::Signal;
                }

                received = session.socket.recv_from(&mut udp_buf) => {
                    let (n, _) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            tracing::warn!("udp recv failed: {}", e);
                            continue;
                        }
                    };
                    let frame = match Parser::unmarshal(&udp_buf[..n]) {
                        Ok((_, frame)) => frame,
                        Err(e) => {
                            tracing::debug!("dropping malformed packet: {}", e);
                            continue;
                        }
                    };
                    match frame {
                        Frame::Data(data) => {
                            let mut payload = data.payload;
                            if session.cipher.open(&mut payload).is_err() {
                                tracing::debug!("dropping unauthenticated data");
                                continue;
                            }
                            if let Err(e) = dev.write(&payload).await {
                                tracing::warn!("tun write failed: {}", e);
                            }
                        }
                        Frame::Pong => {
                            last_pong = Instant::now();
                        }
                        other => {
                            tracing::debug!("ignoring {}", other);
                        }
                    }
                }

                read = dev.read(&mut tun_buf) => {
                    let n = match read {
                        Ok(n) => n,
                        Err(e) => {
                            tracing::warn!("tun read failed: {}", e);
                            continue;
                        }
                    };
                    let packet = &tun_buf[..n];
                    if packet.is_empty() || IpPacket(packet).version() == 6 {
                        // no IPv6 carriage
                        continue;
                    }
                    let mut payload = packet.to_vec();
                    if let Err(e) = session.cipher.seal(&mut payload) {
                        tracing::warn!("encrypt failed: {}", e);
                        continue;
                    }
                    let buf = self.encoder.marshal(&Frame::Data(DataFrame { payload }));
                    if let Err(e) = session.socket.send_to(&buf, session.server).await {
                        tracing::warn!("udp send failed: {}", e);
                    }
                }

                _ = tick.tick() => {
                    if last_pong.elapsed() > pong_timeout {
                        tracing::warn!(
                            "no pong for {:?}, session {} lost",
                            last_pong.elapsed(),
                            session.session_id
                        );
                        break Exit::Lost;
                    }
                    if last_ping.elapsed() >= keepalive_interval {
                        let ping = self.encoder.marshal(&Frame::Ping);
                        if let Err(e) = session.socket.send_to(&ping, session.server).await {
                            tracing::warn!("ping send failed: {}", e);
                        }
                        last_ping = Instant::now();
                    }
                }
            }
        };

        // plaintext passed through these buffers
        udp_buf.zeroize();
        tun_buf.zeroize();

        // keep the device for the next session
        self.dev = Some(dev);
        exit
    }
}
