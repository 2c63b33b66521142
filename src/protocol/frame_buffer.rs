//! Frame buffer for accumulating partial reads.
//!
//! The underlying transport coalesces and fragments frames arbitrarily: one
//! read may carry several frames, a frame may span several reads. All data
//! accumulates in a single `BytesMut` and a small state machine extracts
//! complete frames:
//! - `WaitingForHeader`: need at least 13 bytes
//! - `WaitingForPayload`: header parsed, need N more payload bytes

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::wire_format::{Header, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::{ChannelError, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for a complete header (need 13 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { header: Header },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_frame_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with the default payload ceiling.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom payload ceiling.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::WaitingForHeader,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Returns every frame completed by this push; partial data stays
    /// buffered for the next push.
    ///
    /// # Errors
    ///
    /// Returns an error on a bad kind byte or a declared payload length over
    /// the ceiling. Both desynchronize framing and are fatal to the
    /// connection.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match &self.state {
            State::WaitingForHeader => {
                let header = match Header::decode(&self.buffer[..]) {
                    None => return Ok(None),
                    Some(decoded) => decoded?,
                };

                if header.payload_length > self.max_frame_size {
                    return Err(ChannelError::Protocol(format!(
                        "declared payload of {} bytes exceeds maximum {}",
                        header.payload_length, self.max_frame_size
                    )));
                }

                let _ = self.buffer.split_to(HEADER_SIZE);

                if header.payload_length == 0 {
                    return Ok(Some(Frame::new(header, Bytes::new())));
                }

                self.state = State::WaitingForPayload { header };
                self.try_extract_one()
            }

            State::WaitingForPayload { header } => {
                let needed = header.payload_length as usize;
                if self.buffer.len() < needed {
                    return Ok(None);
                }

                let payload = self.buffer.split_to(needed).freeze();
                let header = *header;
                self.state = State::WaitingForHeader;

                Ok(Some(Frame::new(header, payload)))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Pulls complete frames out of an async byte stream.
///
/// Owns the stream, the accumulation buffer, and any frames already decoded
/// but not yet consumed. The attach handshake and the receive loop share one
/// `FrameReader`, so frames the peer coalesced behind the handshake reply
/// are delivered to the receive loop instead of being lost.
pub struct FrameReader<S> {
    stream: S,
    buffer: FrameBuffer,
    ready: VecDeque<Frame>,
    chunk: Vec<u8>,
}

impl<S: AsyncRead + Unpin> FrameReader<S> {
    /// Create a reader over `stream` with the given payload ceiling.
    pub fn new(stream: S, max_frame_size: u32) -> Self {
        Self {
            stream,
            buffer: FrameBuffer::with_max_frame_size(max_frame_size),
            ready: VecDeque::new(),
            chunk: vec![0u8; 8 * 1024],
        }
    }

    /// Read the next complete frame.
    ///
    /// Returns `Ok(None)` on clean end of stream. There is no timeout; the
    /// caller decides whether to bound the wait.
    pub async fn next(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }

            let n = self.stream.read(&mut self.chunk).await?;
            if n == 0 {
                return Ok(None);
            }

            self.ready.extend(self.buffer.push(&self.chunk[..n])?);
        }
    }
}
