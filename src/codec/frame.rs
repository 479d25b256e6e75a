//! Frame definitions for the tunnel wire protocol
//!
//! Every packet on the UDP tunnel starts with a common 16-byte header,
//! followed by a type-specific payload.
//!
//! # Header Format (16 bytes)
//! ```text
//! +--------+--------+-----------------+-----------------------------------+
//! |  Type  |Version |  Length (2B)    |           Sequence (4B)           |
//! +--------+--------+-----------------+-----------------------------------+
//! |                        Timestamp, ms (8B)                             |
//! +-----------------------------------------------------------------------+
//! ```
//!
//! - Type: packet type identifier (1 byte)
//! - Version: 0x01 (1 byte)
//! - Length: payload length in bytes (2 bytes, big-endian)
//! - Sequence: per-sender monotonic counter (4 bytes, big-endian)
//! - Timestamp: sender wall clock in milliseconds (8 bytes, big-endian)

pub use crate::codec::errors::FrameError;
use std::fmt::Display;
use std::net::Ipv4Addr;

/// Packet type identifiers
///
/// Each type serves a specific role in the tunnel lifecycle:
/// - ConnectReq/ConnectResp: handshake and address assignment
/// - Data: one encrypted inner IP packet
/// - Ping/Pong: connection health check
/// - Disconnect: explicit teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Client connection request (0x01)
    ConnectReq = 0x01,
    /// Gateway connection response (0x02)
    ConnectResp = 0x02,
    /// Encrypted tunnel data (0x03)
    Data = 0x03,
    /// Keep-alive probe (0x04)
    Ping = 0x04,
    /// Keep-alive reply (0x05)
    Pong = 0x05,
    /// Connection teardown (0x06)
    Disconnect = 0x06,
}

impl TryFrom<u8> for PacketType {
    type Error = FrameError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(PacketType::ConnectReq),
            0x02 => Ok(PacketType::ConnectResp),
            0x03 => Ok(PacketType::Data),
            0x04 => Ok(PacketType::Ping),
            0x05 => Ok(PacketType::Pong),
            0x06 => Ok(PacketType::Disconnect),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

/// Header length in bytes
///
/// Header format: Type(1) + Version(1) + Length(2) + Sequence(4) + Timestamp(8) = 16 bytes
pub const HDR_LEN: usize = 16;

/// Username field width in a connect request
pub const USERNAME_LEN: usize = 32;

/// Width of the auth token field, which carries the client's Curve25519
/// public key (the layout is kept for wire compatibility)
pub const AUTH_TOKEN_LEN: usize = 32;

/// Header fields shared by every packet, in host order
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub packet_type: PacketType,
    pub sequence: u32,
    pub timestamp_ms: u64,
}

/// Protocol frame enum
///
/// Represents every packet that can cross the UDP tunnel. Control frames
/// (connect, ping, disconnect) carry their fields in the clear; data frames
/// carry `nonce || ciphertext || tag` produced by the session cipher.
#[derive(Debug, Clone)]
pub enum Frame {
    ConnectReq(ConnectReqFrame),
    ConnectResp(ConnectRespFrame),
    Data(DataFrame),
    Ping,
    Pong,
    Disconnect,
}

impl Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::ConnectReq(frame) => write!(f, "connect request from {}", frame.username),
            Frame::ConnectResp(frame) => {
                write!(f, "connect response status={} ip={}", frame.status, frame.vpn_ip)
            }
            Frame::Data(frame) => write!(f, "data with payload size {}", frame.payload.len()),
            Frame::Ping => write!(f, "ping"),
            Frame::Pong => write!(f, "pong"),
            Frame::Disconnect => write!(f, "disconnect"),
        }
    }
}

/// Connection request sent by a client as its first packet
///
/// # Flow
/// 1. Client sends ConnectReq with its username and public key
/// 2. Gateway allocates a tunnel address and runs the ECDH handshake
/// 3. Gateway replies with ConnectResp
/// 4. Both sides hold the session key, data transfer begins
#[derive(Debug, Clone)]
pub struct ConnectReqFrame {
    /// Client username, at most 32 bytes (NUL-padded on the wire)
    pub username: String,

    /// The 32-byte auth token slot; carries the client's Curve25519
    /// public key
    pub public_key: [u8; AUTH_TOKEN_LEN],
}

/// Connection response sent by the gateway
#[derive(Debug, Clone)]
pub struct ConnectRespFrame {
    /// 0 on success, non-zero on failure
    pub status: u8,

    /// Tunnel address assigned to the client
    pub vpn_ip: Ipv4Addr,

    /// Opaque session identifier
    pub session_id: u32,

    /// Gateway's Curve25519 public key
    pub server_public_key: [u8; 32],
}

/// Payload size of a serialized [`ConnectReqFrame`]
pub const CONNECT_REQ_LEN: usize = USERNAME_LEN + AUTH_TOKEN_LEN;

/// Payload size of a serialized [`ConnectRespFrame`] (packed, no padding)
pub const CONNECT_RESP_LEN: usize = 1 + 4 + 4 + 32;

/// Data frame carrying one encrypted inner IP packet
///
/// The payload is `nonce(12) || ciphertext || tag(16)` as produced by the
/// session cipher. After decryption the plaintext is a complete IPv4 packet
/// exactly as read from the TUN device.
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub payload: Vec<u8>,
}

/// Helpers for inspecting a plaintext inner IP packet
///
/// These operate on the decrypted payload (or on bytes freshly read from
/// TUN), not on the encrypted frame body.
pub struct IpPacket<'a>(pub &'a [u8]);

impl IpPacket<'_> {
    /// A valid IPv4 packet carries at least its 20-byte header
    pub fn invalid(&self) -> bool {
        self.0.len() < 20
    }

    /// IP version from the first header nibble (4 or 6)
    pub fn version(&self) -> u8 {
        self.0[0] >> 4
    }

    /// Destination address from bytes 16..20 of the IPv4 header
    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.0[16], self.0[17], self.0[18], self.0[19])
    }

    /// Source address from bytes 12..16 of the IPv4 header
    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.0[12], self.0[13], self.0[14], self.0[15])
    }
}
