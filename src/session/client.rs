//! Outbound session: connect, attach, then hand off to the engine.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;

use crate::error::{ChannelError, Result};
use crate::handler::Handler;
use crate::processor::{ChannelConfig, Processor};
use crate::protocol::{FrameReader, Identity, MessageKind};
use crate::writer::{spawn_writer, OutboundFrame};

/// Client side of one attached connection.
pub struct ClientSession<C, R, H> {
    processor: Arc<Processor<C, R, H>>,
}

impl<C, R, H> ClientSession<C, R, H>
where
    C: Serialize + DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
    H: Handler<C, R>,
{
    /// Connect to a provider and attach under `identity`.
    ///
    /// Resolves and connects, writes the `Attach` frame, then blocks on one
    /// read — with no timeout — for the provider's reply. Anything other
    /// than `Attached` repeating the claimed identity refuses construction.
    /// On success the receive loop is armed before returning, so the peer
    /// may initiate calls immediately.
    pub async fn connect(
        identity: Identity,
        address: &str,
        port: u16,
        handler: Arc<H>,
        config: &ChannelConfig,
    ) -> Result<Self> {
        let stream = TcpStream::connect((address, port))
            .await
            .map_err(ChannelError::Connect)?;
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        let (writer, writer_task) = spawn_writer(write_half, config.write_queue_capacity);
        let mut frames = FrameReader::new(read_half, config.max_frame_size);

        if writer
            .send(OutboundFrame::control(MessageKind::Attach, identity))
            .await
            .is_err()
        {
            return Err(ChannelError::AttachRefused);
        }

        let granted = matches!(
            frames.next().await,
            Ok(Some(frame)) if frame.kind() == MessageKind::Attached && frame.id() == identity
        );
        if !granted {
            writer_task.abort();
            return Err(ChannelError::AttachRefused);
        }

        let processor = Processor::new(writer, writer_task, handler, identity, config);
        processor.start_receiving(frames, move || {
            tracing::debug!("connection for client {} ended", identity);
        });

        Ok(Self { processor })
    }

    /// Send a command to the provider and wait for the response.
    pub async fn send(&self, command: C) -> Result<R> {
        self.processor.send(command).await
    }
}

impl<C, R, H> ClientSession<C, R, H> {
    /// The per-connection engine (for callers that need the async surface).
    pub fn processor(&self) -> &Arc<Processor<C, R, H>> {
        &self.processor
    }

    /// Release the socket. Idempotent.
    pub fn close(&self) {
        self.processor.close();
    }
}
