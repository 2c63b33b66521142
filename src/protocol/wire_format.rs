//! Wire format encoding and decoding.
//!
//! Implements the 13-byte header format:
//! ```text
//! ┌────────┬──────────┬──────────────┐
//! │ Kind   │ Id       │ Payload len  │
//! │ 1 byte │ 8 bytes  │ 4 bytes      │
//! │ u8     │ u64 BE   │ u32 BE       │
//! └────────┴──────────┴──────────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. The payload length makes each
//! frame self-delimiting, so the receiver never depends on read boundaries.

use crate::error::{ChannelError, Result};

/// Header size in bytes (fixed, exactly 13).
pub const HEADER_SIZE: usize = 13;

/// Default maximum payload size for one command or response (64 KB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024;

/// Identity a client claims when attaching to a provider.
///
/// Also the type of correlation ids: the header's `id` field carries one or
/// the other depending on the message kind.
pub type Identity = u64;

/// Kind of a channel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MessageKind {
    /// No message in flight; initial condition while waiting.
    #[default]
    Idle = 0,
    /// A command sent to the peer, expecting a response.
    Request = 1,
    /// The reply to a request, repeating its correlation id.
    Response = 2,
    /// A connecting client declaring its identity.
    Attach = 3,
    /// The provider granting an attach.
    Attached = 4,
}

impl MessageKind {
    /// Decode a kind byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(MessageKind::Idle),
            1 => Ok(MessageKind::Request),
            2 => Ok(MessageKind::Response),
            3 => Ok(MessageKind::Attach),
            4 => Ok(MessageKind::Attached),
            other => Err(ChannelError::Protocol(format!(
                "unknown message kind byte {}",
                other
            ))),
        }
    }
}

/// Decoded header from wire format.
///
/// `id` is overloaded: for `Request`/`Response` it is the correlation id
/// pairing a response with its request; for `Attach`/`Attached` it carries
/// the connecting client's claimed identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Kind of this message.
    pub kind: MessageKind,
    /// Correlation id or claimed identity, depending on `kind`.
    pub id: u64,
    /// Payload length in bytes (0 for attach-phase messages).
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(kind: MessageKind, id: u64, payload_length: u32) -> Self {
        Self {
            kind,
            id,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (13 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.kind as u8;
        buf[1..9].copy_from_slice(&self.id.to_be_bytes());
        buf[9..13].copy_from_slice(&self.payload_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if the buffer is too short; a bad kind byte is a
    /// protocol error.
    pub fn decode(buf: &[u8]) -> Option<Result<Self>> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let kind = match MessageKind::from_byte(buf[0]) {
            Ok(kind) => kind,
            Err(e) => return Some(Err(e)),
        };
        let mut id = [0u8; 8];
        id.copy_from_slice(&buf[1..9]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&buf[9..13]);
        Some(Ok(Self {
            kind,
            id: u64::from_be_bytes(id),
            payload_length: u32::from_be_bytes(len),
        }))
    }

    /// Check if this is a request.
    #[inline]
    pub fn is_request(&self) -> bool {
        self.kind == MessageKind::Request
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.kind == MessageKind::Response
    }

    /// Check if this belongs to the attach handshake.
    #[inline]
    pub fn is_attach_phase(&self) -> bool {
        matches!(self.kind, MessageKind::Attach | MessageKind::Attached)
    }
}
