//! Dedicated writer task serializing all outbound frames.
//!
//! Application `send`s and handler replies can race on one connection; both
//! hand their frames to an mpsc channel drained by a single writer task, so
//! frames are never interleaved on the wire. Ready frames are batched into a
//! single vectored write.
//!
//! ```text
//! send() ────┐
//! reply  ────┼─► mpsc::Sender<OutboundFrame> ─► writer task ─► socket
//! send() ────┘
//! ```

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ChannelError, Result};
use crate::protocol::{Header, MessageKind, HEADER_SIZE};

/// Default capacity of the outbound frame queue.
pub const DEFAULT_WRITE_QUEUE_CAPACITY: usize = 64;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 16;

/// A frame ready to be written to the socket.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header (13 bytes).
    header: [u8; HEADER_SIZE],
    /// Payload bytes (empty for attach handshake frames).
    payload: Bytes,
}

impl OutboundFrame {
    /// Create an outbound frame; the header's payload length is derived from
    /// the payload itself.
    pub fn new(kind: MessageKind, id: u64, payload: Bytes) -> Self {
        let header = Header::new(kind, id, payload.len() as u32);
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Create an outbound frame with no payload.
    pub fn control(kind: MessageKind, id: u64) -> Self {
        Self::new(kind, id, Bytes::new())
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Cheaply cloneable handle for queueing frames onto the writer task.
#[derive(Clone)]
pub struct FrameWriter {
    tx: mpsc::Sender<OutboundFrame>,
}

impl FrameWriter {
    /// Queue a frame for writing.
    ///
    /// Waits while the queue is at capacity. Fails with `ConnectionClosed`
    /// once the writer task has stopped.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| ChannelError::ConnectionClosed)
    }
}

/// Spawn the writer task for one connection.
///
/// Returns the queue handle and the task's join handle. Dropping every
/// `FrameWriter` clone shuts the task down cleanly, which in turn closes the
/// socket's write half.
pub fn spawn_writer<W>(writer: W, capacity: usize) -> (FrameWriter, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    let task = tokio::spawn(writer_loop(rx, writer));
    (FrameWriter { tx }, task)
}

/// Main writer loop: receive frames, batch, write.
async fn writer_loop<W>(mut rx: mpsc::Receiver<OutboundFrame>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            // All handles dropped: clean shutdown.
            None => return,
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        if let Err(e) = write_batch(&mut writer, &batch).await {
            // Dropping the write half propagates the failure to the peer;
            // the read side observes the teardown and finishes it.
            tracing::error!("write failed, closing connection: {}", e);
            return;
        }
    }
}

/// Write a batch of frames with a vectored write, continuing after partial
/// writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(ChannelError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build the IoSlice array for the data not yet written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut skipped = 0;

    for frame in batch {
        let header_start = skipped;
        let header_end = skipped + HEADER_SIZE;
        if skip_bytes < header_end {
            let start_in_header = skip_bytes.saturating_sub(header_start);
            slices.push(IoSlice::new(&frame.header[start_in_header..]));
        }
        skipped = header_end;

        if !frame.payload.is_empty() {
            let payload_start = skipped;
            let payload_end = skipped + frame.payload.len();
            if skip_bytes < payload_end {
                let start_in_payload = skip_bytes.saturating_sub(payload_start);
                slices.push(IoSlice::new(&frame.payload[start_in_payload..]));
            }
            skipped = payload_end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::duplex;

    #[test]
    fn test_outbound_frame_sizes() {
        let frame = OutboundFrame::new(MessageKind::Response, 42, Bytes::from_static(b"hello"));
        assert_eq!(frame.size(), HEADER_SIZE + 5);

        let control = OutboundFrame::control(MessageKind::Attach, 42);
        assert!(control.payload.is_empty());
        assert_eq!(control.size(), HEADER_SIZE);
    }

    #[tokio::test]
    async fn test_writer_sends_frame() {
        let (client, mut server) = duplex(4096);
        let (writer, _task) = spawn_writer(client, DEFAULT_WRITE_QUEUE_CAPACITY);

        let frame = OutboundFrame::new(MessageKind::Request, 42, Bytes::from_static(b"hello"));
        writer.send(frame).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut buf = vec![0u8; 64];
        let n = tokio::io::AsyncReadExt::read(&mut server, &mut buf)
            .await
            .unwrap();

        assert_eq!(n, HEADER_SIZE + 5);
        let header = Header::decode(&buf[..HEADER_SIZE]).unwrap().unwrap();
        assert_eq!(header.kind, MessageKind::Request);
        assert_eq!(header.id, 42);
        assert_eq!(&buf[HEADER_SIZE..n], b"hello");
    }

    #[tokio::test]
    async fn test_writer_batches_frames_in_order() {
        let (client, mut server) = duplex(4096);
        let (writer, _task) = spawn_writer(client, DEFAULT_WRITE_QUEUE_CAPACITY);

        for i in 0..10u64 {
            let payload = Bytes::copy_from_slice(&i.to_be_bytes());
            writer
                .send(OutboundFrame::new(MessageKind::Request, i, payload))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;

        let expected = 10 * (HEADER_SIZE + 8);
        let mut buf = vec![0u8; expected];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf)
            .await
            .unwrap();

        for i in 0..10u64 {
            let offset = i as usize * (HEADER_SIZE + 8);
            let header = Header::decode(&buf[offset..offset + HEADER_SIZE])
                .unwrap()
                .unwrap();
            assert_eq!(header.id, i);
        }
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_handle_drop() {
        let (client, _server) = duplex(4096);
        let (writer, task) = spawn_writer(client, DEFAULT_WRITE_QUEUE_CAPACITY);

        drop(writer);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_writer_gone() {
        let (client, _server) = duplex(4096);
        let (writer, task) = spawn_writer(client, DEFAULT_WRITE_QUEUE_CAPACITY);

        // Clone keeps the channel open while the task is torn down.
        let survivor = writer.clone();
        drop(writer);
        task.abort();
        let _ = task.await;

        let result = survivor
            .send(OutboundFrame::control(MessageKind::Attach, 1))
            .await;
        assert!(matches!(result, Err(ChannelError::ConnectionClosed)));
    }

    #[test]
    fn test_build_remaining_slices_partial_header() {
        let batch = vec![OutboundFrame::new(
            MessageKind::Response,
            42,
            Bytes::from_static(b"hello"),
        )];

        let slices = build_remaining_slices(&batch, 5);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), HEADER_SIZE - 5);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_build_remaining_slices_skip_header() {
        let batch = vec![OutboundFrame::new(
            MessageKind::Response,
            42,
            Bytes::from_static(b"hello"),
        )];

        let slices = build_remaining_slices(&batch, HEADER_SIZE);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), 5);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());

        let batch: Vec<_> = (0..5)
            .map(|i| OutboundFrame::new(MessageKind::Request, i, Bytes::from_static(b"abc")))
            .collect();

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner().len(), 5 * (HEADER_SIZE + 3));
    }
}
