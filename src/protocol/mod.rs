//! Wire protocol: header layout, frames, and incremental frame extraction.
//!
//! Every message on a channel is one frame: a fixed 13-byte header followed
//! by an optional MessagePack payload. `Request` frames carry a command,
//! `Response` frames carry a response; the attach handshake frames carry no
//! payload beyond the header.

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::{FrameBuffer, FrameReader};
pub use wire_format::{Header, Identity, MessageKind, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE};
