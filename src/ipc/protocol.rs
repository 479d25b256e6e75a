//! IPC wire format
//!
//! # Request
//! ```text
//! +--------+-----------------+-----------------+--------+---------+
//! |Command | Request ID (4B) |  VPN IP (4B)    |Len (2B)| Data... |
//! +--------+-----------------+-----------------+--------+---------+
//! ```
//!
//! # Response
//! ```text
//! +-----------------+--------+--------+---------+
//! | Request ID (4B) | Status |Len (2B)| Data... |
//! +-----------------+--------+--------+---------+
//! ```
//!
//! All integers big-endian. Status is a signed byte: 0 success, -1
//! failure. The reader takes the fixed header first, determines the total
//! length from the data length field, then reads the remainder; a short
//! read, a closed peer, or a length above the cap terminates the
//! connection.

use bytes::{BufMut, BytesMut};
use std::fmt;
use std::fmt::Display;
use std::net::Ipv4Addr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default filesystem path of the enclave's listening socket
pub const SOCKET_PATH: &str = "/tmp/vpn-enclave.sock";

/// Upper bound on the variable-length data section
pub const MAX_DATA_LEN: usize = 4096;

/// Fixed request header: command(1) + request_id(4) + vpn_ip(4) + data_len(2)
pub const REQUEST_HDR_LEN: usize = 11;

/// Fixed response header: request_id(4) + status(1) + data_len(2)
pub const RESPONSE_HDR_LEN: usize = 7;

/// IPC command identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Connection test
    Ping = 0x01,
    /// Plaintext in, `nonce || ciphertext || tag` out
    Encrypt = 0x02,
    /// `nonce || ciphertext || tag` in, plaintext out
    Decrypt = 0x03,
    /// Install a 32-byte session key for a tunnel address
    AddKey = 0x04,
    /// Scrub and deactivate the key for a tunnel address
    RemoveKey = 0x05,
    /// ECDH handshake: client public key in, server public key and
    /// session key out
    Handshake = 0x06,
    /// Clean enclave teardown
    Shutdown = 0xFF,
}

impl TryFrom<u8> for Command {
    type Error = IpcError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Command::Ping),
            0x02 => Ok(Command::Encrypt),
            0x03 => Ok(Command::Decrypt),
            0x04 => Ok(Command::AddKey),
            0x05 => Ok(Command::RemoveKey),
            0x06 => Ok(Command::Handshake),
            0xFF => Ok(Command::Shutdown),
            other => Err(IpcError::UnknownCommand(other)),
        }
    }
}

impl Display for Command {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Command::Ping => "PING",
            Command::Encrypt => "ENCRYPT",
            Command::Decrypt => "DECRYPT",
            Command::AddKey => "ADD_KEY",
            Command::RemoveKey => "REMOVE_KEY",
            Command::Handshake => "HANDSHAKE",
            Command::Shutdown => "SHUTDOWN",
        };
        name.fmt(fmt)
    }
}

/// IPC transport errors
///
/// Every variant except `Refused` means the connection is unusable and
/// must be torn down. `Refused` is the peer reporting status -1 for one
/// command; the connection stays healthy.
#[derive(Debug)]
pub enum IpcError {
    /// Peer closed the socket
    PeerGone,

    /// Framing violation: short read/write or a mismatched response id
    Protocol(String),

    /// Declared data length exceeds [`MAX_DATA_LEN`]
    DataTooLarge(usize),

    /// Command byte is not a known [`Command`]
    UnknownCommand(u8),

    /// The enclave answered with a failure status
    Refused(Command),
}

impl std::error::Error for IpcError {}

impl Display for IpcError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IpcError::PeerGone => "ipc peer closed the connection".fmt(fmt),
            IpcError::Protocol(msg) => write!(fmt, "ipc protocol error: {}", msg),
            IpcError::DataTooLarge(n) => {
                write!(fmt, "ipc data length {} exceeds cap {}", n, MAX_DATA_LEN)
            }
            IpcError::UnknownCommand(c) => write!(fmt, "unknown ipc command {:#04x}", c),
            IpcError::Refused(cmd) => write!(fmt, "enclave refused {}", cmd),
        }
    }
}

/// One IPC request, fields in host order
#[derive(Debug, Clone)]
pub struct Request {
    pub command: Command,
    pub request_id: u32,
    pub vpn_ip: Ipv4Addr,
    pub data: Vec<u8>,
}

impl Request {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(REQUEST_HDR_LEN + self.data.len());
        buf.put_u8(self.command as u8);
        buf.put_u32(self.request_id);
        buf.put_slice(&self.vpn_ip.octets());
        buf.put_u16(self.data.len() as u16);
        buf.put_slice(&self.data);
        buf.to_vec()
    }

    /// Reads one complete request from the stream
    ///
    /// Header first, then exactly `data_len` bytes. EOF at the header
    /// boundary is a clean peer close; EOF mid-message is a framing error.
    pub async fn read_from<R>(reader: &mut R) -> Result<Request, IpcError>
    where
        R: AsyncRead + Unpin,
    {
        let mut hdr = [0u8; REQUEST_HDR_LEN];
        read_exact_or_eof(reader, &mut hdr).await?;

        let command = Command::try_from(hdr[0])?;
        let request_id = u32::from_be_bytes([hdr[1], hdr[2], hdr[3], hdr[4]]);
        let vpn_ip = Ipv4Addr::new(hdr[5], hdr[6], hdr[7], hdr[8]);
        let data_len = u16::from_be_bytes([hdr[9], hdr[10]]) as usize;
        if data_len > MAX_DATA_LEN {
            return Err(IpcError::DataTooLarge(data_len));
        }

        let mut data = vec![0u8; data_len];
        reader
            .read_exact(&mut data)
            .await
            .map_err(|e| IpcError::Protocol(format!("short request body: {}", e)))?;

        Ok(Request {
            command,
            request_id,
            vpn_ip,
            data,
        })
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), IpcError>
    where
        W: AsyncWrite + Unpin,
    {
        writer
            .write_all(&self.encode())
            .await
            .map_err(|e| IpcError::Protocol(format!("request write: {}", e)))
    }
}

/// One IPC response, fields in host order
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: u32,
    pub status: i8,
    pub data: Vec<u8>,
}

impl Response {
    pub fn success(request_id: u32, data: Vec<u8>) -> Self {
        Response {
            request_id,
            status: 0,
            data,
        }
    }

    pub fn failure(request_id: u32) -> Self {
        Response {
            request_id,
            status: -1,
            data: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(RESPONSE_HDR_LEN + self.data.len());
        buf.put_u32(self.request_id);
        buf.put_i8(self.status);
        buf.put_u16(self.data.len() as u16);
        buf.put_slice(&self.data);
        buf.to_vec()
    }

    pub async fn read_from<R>(reader: &mut R) -> Result<Response, IpcError>
    where
        R: AsyncRead + Unpin,
    {
        let mut hdr = [0u8; RESPONSE_HDR_LEN];
        read_exact_or_eof(reader, &mut hdr).await?;

        let request_id = u32::from_be_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]);
        let status = hdr[4] as i8;
        let data_len = u16::from_be_bytes([hdr[5], hdr[6]]) as usize;
        if data_len > MAX_DATA_LEN {
            return Err(IpcError::DataTooLarge(data_len));
        }

        let mut data = vec![0u8; data_len];
        reader
            .read_exact(&mut data)
            .await
            .map_err(|e| IpcError::Protocol(format!("short response body: {}", e)))?;

        Ok(Response {
            request_id,
            status,
            data,
        })
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), IpcError>
    where
        W: AsyncWrite + Unpin,
    {
        writer
            .write_all(&self.encode())
            .await
            .map_err(|e| IpcError::Protocol(format!("response write: {}", e)))
    }
}

/// Fills `buf` from the stream, mapping EOF on the first byte to
/// [`IpcError::PeerGone`] and any later EOF to a framing error
async fn read_exact_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), IpcError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(|e| IpcError::Protocol(format!("header read: {}", e)))?;
        if n == 0 {
            return if filled == 0 {
                Err(IpcError::PeerGone)
            } else {
                Err(IpcError::Protocol("eof inside header".to_string()))
            };
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(8192);
        let req = Request {
            command: Command::Encrypt,
            request_id: 7,
            vpn_ip: Ipv4Addr::new(10, 8, 0, 2),
            data: vec![1, 2, 3],
        };
        req.write_to(&mut a).await.unwrap();

        let parsed = Request::read_from(&mut b).await.unwrap();
        assert_eq!(parsed.command, Command::Encrypt);
        assert_eq!(parsed.request_id, 7);
        assert_eq!(parsed.vpn_ip, Ipv4Addr::new(10, 8, 0, 2));
        assert_eq!(parsed.data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_response_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(8192);
        let resp = Response::success(42, vec![9; 64]);
        resp.write_to(&mut a).await.unwrap();

        let parsed = Response::read_from(&mut b).await.unwrap();
        assert_eq!(parsed.request_id, 42);
        assert_eq!(parsed.status, 0);
        assert_eq!(parsed.data.len(), 64);

        let failure = Response::failure(43);
        failure.write_to(&mut a).await.unwrap();
        let parsed = Response::read_from(&mut b).await.unwrap();
        assert_eq!(parsed.status, -1);
        assert!(parsed.data.is_empty());
    }

    #[tokio::test]
    async fn test_oversize_data_len_rejected() {
        let (mut a, mut b) = tokio::io::duplex(8192);
        let mut raw = Vec::new();
        raw.push(Command::Ping as u8);
        raw.extend_from_slice(&1u32.to_be_bytes());
        raw.extend_from_slice(&[0, 0, 0, 0]);
        raw.extend_from_slice(&(MAX_DATA_LEN as u16 + 1).to_be_bytes());
        tokio::io::AsyncWriteExt::write_all(&mut a, &raw).await.unwrap();

        match Request::read_from(&mut b).await {
            Err(IpcError::DataTooLarge(n)) => assert_eq!(n, MAX_DATA_LEN + 1),
            other => panic!("expected DataTooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_peer_close_detected() {
        let (a, mut b) = tokio::io::duplex(8192);
        drop(a);
        match Request::read_from(&mut b).await {
            Err(IpcError::PeerGone) => {}
            other => panic!("expected PeerGone, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_partial_message_is_error() {
        let (mut a, mut b) = tokio::io::duplex(8192);
        let req = Request {
            command: Command::AddKey,
            request_id: 1,
            vpn_ip: Ipv4Addr::new(10, 8, 0, 9),
            data: vec![0u8; 32],
        };
        let mut raw = req.encode();
        raw.truncate(REQUEST_HDR_LEN + 16);
        tokio::io::AsyncWriteExt::write_all(&mut a, &raw).await.unwrap();
        drop(a);

        assert!(Request::read_from(&mut b).await.is_err());
    }
}
