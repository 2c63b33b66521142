//! Inbound session: authorize an accepted connection's attach, then serve it.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;

use crate::error::{ChannelError, Result};
use crate::handler::Handler;
use crate::processor::Processor;
use crate::protocol::{FrameReader, Identity, MessageKind};
use crate::provider::ProviderShared;
use crate::writer::{spawn_writer, OutboundFrame};

/// Provider side of one attached connection.
pub struct ProviderSession<C, R, H> {
    identity: Identity,
    processor: Arc<Processor<C, R, H>>,
}

impl<C, R, H> ProviderSession<C, R, H>
where
    C: Serialize + DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
    H: Handler<C, R>,
{
    /// Run the accept-side attach handshake on a fresh connection.
    ///
    /// Blocks — with no timeout, the peer already passed TCP accept — on one
    /// read for the `Attach` frame, authorizes and registers the claimed
    /// identity in a single registry operation (so an approved session is
    /// visible to senders with no gap, and a duplicate identity is rejected
    /// atomically), replies `Attached`, and arms the receive loop with a
    /// hook that deregisters the session on communication failure.
    ///
    /// On any failure the connection is discarded without a reply.
    pub(crate) async fn start_session(
        stream: TcpStream,
        shared: &Arc<ProviderShared<C, R, H>>,
    ) -> Result<Arc<Self>> {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let config = shared.config();
        let (writer, writer_task) = spawn_writer(write_half, config.write_queue_capacity);
        let mut frames = FrameReader::new(read_half, config.max_frame_size);

        let identity = match frames.next().await {
            Ok(Some(frame)) if frame.kind() == MessageKind::Attach => frame.id(),
            Ok(_) => {
                writer_task.abort();
                return Err(ChannelError::AttachRefused);
            }
            Err(e) => {
                writer_task.abort();
                return Err(e);
            }
        };

        let processor = Processor::new(
            writer.clone(),
            writer_task,
            shared.handler(),
            identity,
            &config,
        );
        let session = Arc::new(Self {
            identity,
            processor,
        });

        if !shared.try_register(&session) {
            session.processor.close();
            return Err(ChannelError::AttachRefused);
        }

        if writer
            .send(OutboundFrame::control(MessageKind::Attached, identity))
            .await
            .is_err()
        {
            shared.detach(identity);
            session.processor.close();
            return Err(ChannelError::ConnectionClosed);
        }

        let registry = Arc::downgrade(shared);
        session.processor.start_receiving(frames, move || {
            if let Some(shared) = registry.upgrade() {
                shared.detach(identity);
            }
        });

        Ok(session)
    }

    /// Send a command to the attached client and wait for the response.
    pub async fn send(&self, command: C) -> Result<R> {
        self.processor.send(command).await
    }
}

impl<C, R, H> ProviderSession<C, R, H> {
    /// Identity this session attached under.
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Release the socket. Idempotent.
    pub fn close(&self) {
        self.processor.close();
    }
}
