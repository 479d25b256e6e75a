//! Frame parsing and validation errors

use std::fmt;
use std::fmt::Display;

/// Frame parsing errors
///
/// Failure modes when unmarshaling packets received on the UDP socket.
/// A failed parse never terminates the datapath; the offending packet is
/// dropped and the loop continues.
#[derive(Debug)]
pub enum FrameError {
    /// Buffer is shorter than the 16-byte header, or shorter than the
    /// payload length the header declares
    TooShort,

    /// Protocol version is not 0x01
    BadVersion(u8),

    /// Packet type byte is not one of the known identifiers
    UnknownType(u8),

    /// A typed payload did not have its expected fixed size
    BadPayload,
}

impl std::error::Error for FrameError {}

impl Display for FrameError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameError::TooShort => "packet truncated".fmt(fmt),
            FrameError::BadVersion(v) => write!(fmt, "unsupported protocol version {:#04x}", v),
            FrameError::UnknownType(t) => write!(fmt, "unknown packet type {:#04x}", t),
            FrameError::BadPayload => "malformed payload".fmt(fmt),
        }
    }
}
