//! Frame serializer and parser
//!
//! Handles marshaling of frames into wire bytes and back. All multi-byte
//! fields are converted here; everything above the codec works in host
//! order. The sequence counter is per-sender state owned by the encoder,
//! incremented before every build.

use crate::codec::frame::*;
use crate::utils::now_millis;

/// Protocol version
const VERSION: u8 = 0x01;

/// Frame encoder holding the per-sender sequence counter
///
/// Each sending loop (gateway, client) owns one encoder; the counter is
/// monotonic for the lifetime of the process.
pub struct Encoder {
    sequence: u32,
}

impl Encoder {
    pub fn new() -> Self {
        Encoder { sequence: 0 }
    }

    /// Marshals a frame into wire bytes (header + payload)
    pub fn marshal(&mut self, frame: &Frame) -> Vec<u8> {
        match frame {
            Frame::ConnectReq(req) => {
                let mut buf = self.build_header(PacketType::ConnectReq, CONNECT_REQ_LEN as u16);
                let mut username = [0u8; USERNAME_LEN];
                let name = req.username.as_bytes();
                let n = name.len().min(USERNAME_LEN - 1);
                username[..n].copy_from_slice(&name[..n]);
                buf.extend_from_slice(&username);
                buf.extend_from_slice(&req.public_key);
                buf
            }

            Frame::ConnectResp(resp) => {
                let mut buf = self.build_header(PacketType::ConnectResp, CONNECT_RESP_LEN as u16);
                buf.push(resp.status);
                buf.extend_from_slice(&resp.vpn_ip.octets());
                buf.extend_from_slice(&resp.session_id.to_be_bytes());
                buf.extend_from_slice(&resp.server_public_key);
                buf
            }

            Frame::Data(data) => {
                let mut buf = self.build_header(PacketType::Data, data.payload.len() as u16);
                buf.extend_from_slice(&data.payload);
                buf
            }

            Frame::Ping => self.build_header(PacketType::Ping, 0),
            Frame::Pong => self.build_header(PacketType::Pong, 0),
            Frame::Disconnect => self.build_header(PacketType::Disconnect, 0),
        }
    }

    /// Builds the 16-byte header, advancing the sequence counter
    fn build_header(&mut self, packet_type: PacketType, payload_len: u16) -> Vec<u8> {
        self.sequence = self.sequence.wrapping_add(1);
        let mut buf = Vec::with_capacity(HDR_LEN + payload_len as usize);
        buf.push(packet_type as u8);
        buf.push(VERSION);
        buf.extend_from_slice(&payload_len.to_be_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&now_millis().to_be_bytes());
        buf
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Parser;

impl Parser {
    /// Unmarshals a frame from raw bytes received on the socket
    ///
    /// Validates the header, then extracts the typed payload. Trailing
    /// bytes beyond the declared payload length are ignored.
    ///
    /// # Returns
    /// * `Ok((Header, Frame))` on success
    /// * `Err` if the packet is truncated, the version is unsupported,
    ///   the type is unknown, or a typed payload has the wrong size
    pub fn unmarshal(buf: &[u8]) -> crate::Result<(Header, Frame)> {
        if buf.len() < HDR_LEN {
            return Err(FrameError::TooShort.into());
        }

        let version = buf[1];
        if version != VERSION {
            return Err(FrameError::BadVersion(version).into());
        }

        let payload_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if HDR_LEN + payload_len > buf.len() {
            return Err(FrameError::TooShort.into());
        }

        let packet_type = PacketType::try_from(buf[0])?;
        let header = Header {
            packet_type,
            sequence: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            timestamp_ms: u64::from_be_bytes([
                buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
            ]),
        };
        let payload = &buf[HDR_LEN..HDR_LEN + payload_len];

        let frame = match packet_type {
            PacketType::ConnectReq => {
                if payload.len() != CONNECT_REQ_LEN {
                    return Err(FrameError::BadPayload.into());
                }
                let name_field = &payload[..USERNAME_LEN];
                let name_end = name_field.iter().position(|&b| b == 0).unwrap_or(USERNAME_LEN);
                let mut public_key = [0u8; AUTH_TOKEN_LEN];
                public_key.copy_from_slice(&payload[USERNAME_LEN..]);
                Frame::ConnectReq(ConnectReqFrame {
                    username: String::from_utf8_lossy(&name_field[..name_end]).into_owned(),
                    public_key,
                })
            }

            PacketType::ConnectResp => {
                if payload.len() != CONNECT_RESP_LEN {
                    return Err(FrameError::BadPayload.into());
                }
                let mut server_public_key = [0u8; 32];
                server_public_key.copy_from_slice(&payload[9..41]);
                Frame::ConnectResp(ConnectRespFrame {
                    status: payload[0],
                    vpn_ip: std::net::Ipv4Addr::new(
                        payload[1], payload[2], payload[3], payload[4],
                    ),
                    session_id: u32::from_be_bytes([
                        payload[5], payload[6], payload[7], payload[8],
                    ]),
                    server_public_key,
                })
            }

            PacketType::Data => Frame::Data(DataFrame {
                payload: payload.to_vec(),
            }),

            PacketType::Ping => Frame::Ping,
            PacketType::Pong => Frame::Pong,
            PacketType::Disconnect => Frame::Disconnect,
        };

        Ok((header, frame))
    }
}
