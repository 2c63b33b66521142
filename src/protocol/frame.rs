//! Frame struct with typed accessors.
//!
//! Represents a complete channel frame with header and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.

use bytes::Bytes;

use super::wire_format::{Header, MessageKind, HEADER_SIZE};

/// A complete channel frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Create a payload-free frame of the given kind (attach handshake).
    pub fn control(kind: MessageKind, id: u64) -> Self {
        Self {
            header: Header::new(kind, id, 0),
            payload: Bytes::new(),
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the message kind.
    #[inline]
    pub fn kind(&self) -> MessageKind {
        self.header.kind
    }

    /// Get the correlation id / identity carried by the header.
    #[inline]
    pub fn id(&self) -> u64 {
        self.header.id
    }
}

/// Build a complete frame as a single byte vector.
///
/// Encodes the header (with the payload length filled in) and appends the
/// payload into one contiguous buffer.
pub fn build_frame(kind: MessageKind, id: u64, payload: &[u8]) -> Vec<u8> {
    let header = Header::new(kind, id, payload.len() as u32);
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let header = Header::new(MessageKind::Response, 42, 5);
        let payload = Bytes::from_static(b"hello");
        let frame = Frame::new(header, payload);

        assert_eq!(frame.kind(), MessageKind::Response);
        assert_eq!(frame.id(), 42);
        assert_eq!(frame.payload(), b"hello");
    }

    #[test]
    fn test_control_frame_has_empty_payload() {
        let frame = Frame::control(MessageKind::Attach, 105280);

        assert_eq!(frame.kind(), MessageKind::Attach);
        assert_eq!(frame.id(), 105280);
        assert!(frame.payload().is_empty());
        assert_eq!(frame.header.payload_length, 0);
    }

    #[test]
    fn test_build_frame() {
        let bytes = build_frame(MessageKind::Request, 1001, b"hello");

        assert_eq!(bytes.len(), HEADER_SIZE + 5);

        let parsed = Header::decode(&bytes[..HEADER_SIZE]).unwrap().unwrap();
        assert_eq!(parsed.kind, MessageKind::Request);
        assert_eq!(parsed.id, 1001);
        assert_eq!(parsed.payload_length, 5);
        assert_eq!(&bytes[HEADER_SIZE..], b"hello");
    }

    #[test]
    fn test_build_frame_empty_payload() {
        let bytes = build_frame(MessageKind::Attached, 8, b"");
        assert_eq!(bytes.len(), HEADER_SIZE);
    }
}
