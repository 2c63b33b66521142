//! Per-connection duplex send/receive engine.
//!
//! One `Processor` is the single point of truth for one connection's
//! exchange: it serializes outgoing writes through the writer task,
//! demultiplexes incoming frames, matches responses to outstanding requests
//! by correlation id, and dispatches inbound requests to the installed
//! [`Handler`].
//!
//! # Architecture
//!
//! ```text
//!  send() ──► waiter map ──► writer task ──► socket
//!                 ▲
//!  receive task ──┴── Response: complete the matching waiter
//!              └───── Request:  handler.process() ──► writer task
//! ```
//!
//! Every `send` owns its own single-use waiter, keyed by the correlation id
//! it allocated; the receive task completes exactly one waiter per matching
//! response. Requests are dispatched inline on the receive task, so a slow
//! handler stalls further reads on its connection (and only on it).

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::codec::MsgPackCodec;
use crate::error::{ChannelError, Result};
use crate::handler::Handler;
use crate::protocol::{Frame, FrameReader, Identity, MessageKind, DEFAULT_MAX_FRAME_SIZE};
use crate::writer::{FrameWriter, OutboundFrame, DEFAULT_WRITE_QUEUE_CAPACITY};

/// First correlation id allocated by a client-side connection.
pub const DEFAULT_CLIENT_INITIAL_CORRELATION_ID: u64 = 1000;

/// First correlation id allocated by a provider-side connection.
///
/// Seeded apart from the client default so the two directions stay visually
/// distinguishable in logs.
pub const DEFAULT_PROVIDER_INITIAL_CORRELATION_ID: u64 = 5000;

/// Constructor-time tuning for one connection.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// How long a `send` waits for its response. `None` waits forever.
    pub call_timeout: Option<Duration>,
    /// Seed for the outgoing correlation id counter.
    pub initial_correlation_id: u64,
    /// Serialized size ceiling for one command or response.
    pub max_frame_size: u32,
    /// Capacity of the outbound frame queue.
    pub write_queue_capacity: usize,
}

impl ChannelConfig {
    /// Defaults for a client-side connection.
    pub fn client() -> Self {
        Self {
            call_timeout: None,
            initial_correlation_id: DEFAULT_CLIENT_INITIAL_CORRELATION_ID,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            write_queue_capacity: DEFAULT_WRITE_QUEUE_CAPACITY,
        }
    }

    /// Defaults for a provider-side connection.
    pub fn provider() -> Self {
        Self {
            initial_correlation_id: DEFAULT_PROVIDER_INITIAL_CORRELATION_ID,
            ..Self::client()
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::client()
    }
}

/// Duplex protocol engine for one established connection.
///
/// `C` and `R` are the typed command and response exchanged in both
/// directions; `H` services requests arriving from the peer.
pub struct Processor<C, R, H> {
    writer: FrameWriter,
    /// Outstanding calls awaiting their response, by correlation id.
    pending: Mutex<HashMap<u64, oneshot::Sender<Frame>>>,
    next_correlation_id: AtomicU64,
    /// Identity the connection attached under.
    peer: Identity,
    handler: Arc<H>,
    call_timeout: Option<Duration>,
    max_frame_size: u32,
    closed: AtomicBool,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
    _types: PhantomData<fn(C) -> R>,
}

impl<C, R, H> Processor<C, R, H>
where
    C: Serialize + DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
    H: Handler<C, R>,
{
    /// Create the engine for a connection whose attach handshake completed.
    pub fn new(
        writer: FrameWriter,
        writer_task: JoinHandle<()>,
        handler: Arc<H>,
        peer: Identity,
        config: &ChannelConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            writer,
            pending: Mutex::new(HashMap::new()),
            next_correlation_id: AtomicU64::new(config.initial_correlation_id),
            peer,
            handler,
            call_timeout: config.call_timeout,
            max_frame_size: config.max_frame_size,
            closed: AtomicBool::new(false),
            receive_task: Mutex::new(None),
            writer_task: Mutex::new(Some(writer_task)),
            _types: PhantomData,
        })
    }

    /// Send a command and wait for the matching response.
    ///
    /// Allocates the next correlation id, registers a waiter for it, queues
    /// the request frame, and waits under the configured timeout. Callable
    /// concurrently from any number of tasks; each call waits only on its
    /// own response.
    ///
    /// A handler must not call this back over the connection it is currently
    /// servicing: the response cannot be read until the handler returns.
    /// Sends over *other* connections are fine.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Timeout`] if the window elapses (the request is not
    /// retracted; a late response is discarded), `ConnectionClosed` if the
    /// connection dies while waiting, `FrameTooLarge` if the encoded command
    /// exceeds the configured ceiling.
    pub async fn send(&self, command: C) -> Result<R> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::ConnectionClosed);
        }

        let payload = self.encode_payload(&command)?;
        let correlation_id = self.next_correlation_id.fetch_add(1, Ordering::Relaxed);

        let rx = {
            let (tx, rx) = oneshot::channel();
            self.pending.lock().insert(correlation_id, tx);
            rx
        };

        let frame = OutboundFrame::new(MessageKind::Request, correlation_id, payload);
        if let Err(e) = self.writer.send(frame).await {
            self.pending.lock().remove(&correlation_id);
            return Err(e);
        }

        let delivered = match self.call_timeout {
            Some(window) => match tokio::time::timeout(window, rx).await {
                Ok(delivered) => delivered,
                Err(_) => {
                    // Deregister so an eventual late response is discarded
                    // as unmatched instead of waking a future caller.
                    self.pending.lock().remove(&correlation_id);
                    return Err(ChannelError::Timeout { correlation_id });
                }
            },
            None => rx.await,
        };

        // A dropped waiter means the connection was torn down.
        let frame = delivered.map_err(|_| ChannelError::ConnectionClosed)?;

        if frame.id() != correlation_id {
            return Err(ChannelError::CorrelationMismatch {
                expected: correlation_id,
                received: frame.id(),
            });
        }

        MsgPackCodec::decode(frame.payload())
    }

    /// Arm the continuous receive loop.
    ///
    /// Called once per connection lifetime, after the attach handshake; a
    /// second call is ignored. `on_disconnect` runs when the connection ends
    /// for any reason other than a local `close()` — a provider session uses
    /// it to deregister itself.
    pub fn start_receiving<S>(
        self: &Arc<Self>,
        frames: FrameReader<S>,
        on_disconnect: impl FnOnce() + Send + 'static,
    ) where
        S: AsyncRead + Unpin + Send + 'static,
    {
        let mut guard = self.receive_task.lock();
        if guard.is_some() {
            tracing::warn!("receive loop already running for client {}", self.peer);
            return;
        }

        let processor = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            processor.receive_loop(frames, on_disconnect).await;
        }));
    }

    async fn receive_loop<S>(self: Arc<Self>, mut frames: FrameReader<S>, on_disconnect: impl FnOnce())
    where
        S: AsyncRead + Unpin,
    {
        let error = loop {
            match frames.next().await {
                Ok(Some(frame)) => match self.dispatch(frame).await {
                    Ok(()) => continue,
                    Err(e) => break Some(e),
                },
                Ok(None) => break None,
                Err(e) => break Some(e),
            }
        };

        match error {
            Some(e) => tracing::error!("connection to client {} failed: {}", self.peer, e),
            None => tracing::debug!("client {} closed the connection", self.peer),
        }

        self.closed.store(true, Ordering::Release);
        if let Some(task) = self.writer_task.lock().take() {
            task.abort();
        }
        self.fail_pending();
        on_disconnect();
    }

    /// Handle one inbound frame. An error return is fatal to the connection.
    async fn dispatch(&self, frame: Frame) -> Result<()> {
        match frame.kind() {
            MessageKind::Response => {
                match self.pending.lock().remove(&frame.id()) {
                    Some(waiter) => {
                        // Receiver gone means the caller already timed out.
                        let _ = waiter.send(frame);
                    }
                    None => {
                        tracing::debug!("discarding unmatched response {}", frame.id());
                    }
                }
                Ok(())
            }
            MessageKind::Request => {
                let command: C = match MsgPackCodec::decode(frame.payload()) {
                    Ok(command) => command,
                    Err(e) => {
                        tracing::warn!("dropping request {} with bad payload: {}", frame.id(), e);
                        return Ok(());
                    }
                };

                let response = self.handler.process(self.peer, command).await;
                let payload = match self.encode_payload(&response) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!("dropping unencodable response to request {}: {}", frame.id(), e);
                        return Ok(());
                    }
                };

                // Reply before reading further frames; the peer's send is
                // waiting on this correlation id.
                self.writer
                    .send(OutboundFrame::new(MessageKind::Response, frame.id(), payload))
                    .await
            }
            other => {
                tracing::warn!("dropping unexpected {:?} frame after attach", other);
                Ok(())
            }
        }
    }

    fn encode_payload<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        let encoded = MsgPackCodec::encode(value)?;
        if encoded.len() > self.max_frame_size as usize {
            return Err(ChannelError::FrameTooLarge {
                size: encoded.len(),
                max: self.max_frame_size,
            });
        }
        Ok(Bytes::from(encoded))
    }
}

impl<C, R, H> Processor<C, R, H> {
    /// Identity of the attachment this connection serves.
    pub fn peer(&self) -> Identity {
        self.peer
    }

    /// Tear the connection down.
    ///
    /// Aborts the receive loop and the writer task (releasing both socket
    /// halves) and unblocks every caller waiting in [`send`](Self::send).
    /// Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.receive_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.lock().take() {
            task.abort();
        }
        self.fail_pending();
    }

    /// Wake every outstanding `send` with `ConnectionClosed`.
    fn fail_pending(&self) {
        self.pending.lock().clear();
    }
}
