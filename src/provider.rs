//! Provider facade: listen, authorize attaches, route sends by identity.

use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use crate::error::{ChannelError, Result};
use crate::handler::Handler;
use crate::processor::ChannelConfig;
use crate::protocol::Identity;
use crate::session::ProviderSession;

/// Registry and policy state shared by the accept loop, the sessions'
/// error hooks, and application threads.
pub(crate) struct ProviderShared<C, R, H> {
    /// Attached sessions in attach order. One lock covers registration,
    /// detach, and the lookup `send` performs from application threads.
    sessions: Mutex<Vec<Arc<ProviderSession<C, R, H>>>>,
    /// Identities permitted to attach; empty accepts any identity.
    allow_list: Mutex<Vec<Identity>>,
    handler: Arc<H>,
    config: ChannelConfig,
}

impl<C, R, H> ProviderShared<C, R, H> {
    pub(crate) fn handler(&self) -> Arc<H> {
        Arc::clone(&self.handler)
    }

    pub(crate) fn config(&self) -> ChannelConfig {
        self.config.clone()
    }

    fn authorize_attach(&self, identity: Identity) -> bool {
        let allow = self.allow_list.lock();
        allow.is_empty() || allow.contains(&identity)
    }

    /// Authorize and register in one registry operation.
    ///
    /// Returns false when the identity fails the allow-list or is already
    /// attached; the duplicate check and the insertion happen under the same
    /// lock, so two concurrent attaches under one identity cannot both land.
    pub(crate) fn try_register(&self, session: &Arc<ProviderSession<C, R, H>>) -> bool {
        let mut sessions = self.sessions.lock();

        if !self.authorize_attach(session.identity()) {
            tracing::debug!("refusing attach for unauthorized client {}", session.identity());
            return false;
        }
        if sessions.iter().any(|s| s.identity() == session.identity()) {
            tracing::warn!("refusing attach for already-attached client {}", session.identity());
            return false;
        }

        sessions.push(Arc::clone(session));
        true
    }

    /// Remove the session registered under `identity`, dropping the owning
    /// handle. Invoked from a session's error hook and a no-op if the
    /// provider already drained the registry while closing.
    pub(crate) fn detach(&self, identity: Identity) {
        let mut sessions = self.sessions.lock();
        if let Some(index) = sessions.iter().position(|s| s.identity() == identity) {
            sessions.remove(index);
            tracing::debug!("detached client {}", identity);
        }
    }

    fn lookup(&self, identity: Identity) -> Option<Arc<ProviderSession<C, R, H>>> {
        self.sessions
            .lock()
            .iter()
            .find(|s| s.identity() == identity)
            .cloned()
    }
}

/// Listening endpoint managing many attached client sessions.
///
/// Owns a single-worker runtime driving the accept loop and every attached
/// connection. `send` targets a client by the identity it attached under;
/// either side of each connection may initiate calls at any time.
///
/// # Example
///
/// ```ignore
/// let provider: ChannelProvider<u64, bool, PrimesHandler> =
///     ChannelProvider::builder(1028, PrimesHandler).start()?;
///
/// // ... after a client attaches under identity 105280:
/// let verdict = provider.send(105280, 11)?;
/// ```
pub struct ChannelProvider<C, R, H> {
    runtime: Option<Runtime>,
    shared: Arc<ProviderShared<C, R, H>>,
    accept_task: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl<C, R, H> ChannelProvider<C, R, H>
where
    C: Serialize + DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
    H: Handler<C, R>,
{
    /// Send a command to the client attached under `identity` and wait for
    /// its response, under the session's timeout semantics.
    ///
    /// # Errors
    ///
    /// [`ChannelError::UnknownClient`] immediately if no session is
    /// registered under `identity`.
    pub fn send(&self, identity: Identity, command: C) -> Result<R> {
        let session = self
            .shared
            .lookup(identity)
            .ok_or(ChannelError::UnknownClient(identity))?;
        let runtime = self.runtime.as_ref().ok_or(ChannelError::ConnectionClosed)?;
        runtime.block_on(session.send(command))
    }
}

impl<C, R, H> ChannelProvider<C, R, H> {
    /// Start configuring a provider listening on `port` (0 lets the OS pick;
    /// see [`local_addr`](Self::local_addr)).
    pub fn builder(port: u16, handler: H) -> ProviderBuilder<C, R, H> {
        ProviderBuilder {
            port,
            handler,
            allow: Vec::new(),
            config: ChannelConfig::provider(),
            _types: PhantomData,
        }
    }

    /// Identities of the attached sessions, in attach order.
    pub fn attached_ids(&self) -> Vec<Identity> {
        self.shared
            .sessions
            .lock()
            .iter()
            .map(|s| s.identity())
            .collect()
    }

    /// Append an identity to the allow-list.
    ///
    /// The first entry switches the provider from accept-any to
    /// members-only.
    pub fn allow(&self, identity: Identity) {
        self.shared.allow_list.lock().push(identity);
    }

    /// Mint a fresh random non-zero identity, unique against the current
    /// allow-list, and append it — for out-of-band distribution to an
    /// intended client.
    pub fn generate_allow_list_entry(&self) -> Identity {
        let mut allow = self.shared.allow_list.lock();
        let mut rng = rand::rng();
        loop {
            let candidate: Identity = rng.random();
            if candidate != 0 && !allow.contains(&candidate) {
                allow.push(candidate);
                return candidate;
            }
        }
    }

    /// The address the provider is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, release every attached session, and join the I/O
    /// thread. Idempotent, and safe to call when no client ever attached.
    pub fn close(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        let sessions: Vec<_> = self.shared.sessions.lock().drain(..).collect();
        for session in &sessions {
            session.close();
        }
        // Dropping the runtime joins its worker thread.
        drop(runtime);
    }
}

impl<C, R, H> Drop for ChannelProvider<C, R, H> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Fluent configuration for [`ChannelProvider`].
pub struct ProviderBuilder<C, R, H> {
    port: u16,
    handler: H,
    allow: Vec<Identity>,
    config: ChannelConfig,
    _types: PhantomData<fn(C) -> R>,
}

impl<C, R, H> ProviderBuilder<C, R, H>
where
    C: Serialize + DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
    H: Handler<C, R>,
{
    /// Pre-populate the allow-list (switches attach to members-only).
    pub fn allow(mut self, identity: Identity) -> Self {
        self.allow.push(identity);
        self
    }

    /// Bound every provider-initiated `send` by `timeout`.
    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.call_timeout = Some(timeout);
        self
    }

    /// Seed for outgoing correlation ids.
    pub fn initial_correlation_id(mut self, id: u64) -> Self {
        self.config.initial_correlation_id = id;
        self
    }

    /// Serialized size ceiling for one command or response.
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Bind the listener, start the accept loop, and return the running
    /// provider.
    pub fn start(self) -> Result<ChannelProvider<C, R, H>> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("crosswire-provider")
            .enable_all()
            .build()?;

        let listener = runtime.block_on(TcpListener::bind(("0.0.0.0", self.port)))?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(ProviderShared {
            sessions: Mutex::new(Vec::new()),
            allow_list: Mutex::new(self.allow),
            handler: Arc::new(self.handler),
            config: self.config,
        });

        let accept_task = runtime.spawn(accept_loop(listener, Arc::clone(&shared)));

        tracing::debug!("provider listening on {}", local_addr);

        Ok(ChannelProvider {
            runtime: Some(runtime),
            shared,
            accept_task: Some(accept_task),
            local_addr,
        })
    }
}

/// Keep one accept outstanding at all times.
///
/// Each accepted connection runs its attach handshake on its own task, so a
/// peer that connects and never attaches cannot stop the provider from
/// accepting others.
async fn accept_loop<C, R, H>(listener: TcpListener, shared: Arc<ProviderShared<C, R, H>>)
where
    C: Serialize + DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
    H: Handler<C, R>,
{
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    match ProviderSession::start_session(stream, &shared).await {
                        Ok(session) => {
                            tracing::debug!(
                                "client {} attached from {}",
                                session.identity(),
                                peer_addr
                            );
                        }
                        Err(e) => {
                            tracing::debug!("discarding connection from {}: {}", peer_addr, e);
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!("accept failed: {}", e);
            }
        }
    }
}
