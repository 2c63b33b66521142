//! Client facade and builder.
//!
//! A [`ChannelClient`] owns a single-worker runtime for the lifetime of the
//! connection and exposes a synchronous [`send`](ChannelClient::send);
//! construction performs the connect + attach handshake. The attached
//! connection is duplex: the provider may initiate calls at any time, which
//! are serviced by the configured [`Handler`].
//!
//! # Example
//!
//! ```ignore
//! use crosswire::ChannelClient;
//!
//! let client: ChannelClient<u64, bool> = ChannelClient::builder(105280, 1028)
//!     .timeout(std::time::Duration::from_secs(5))
//!     .connect()?;
//!
//! assert!(client.send(7)?);
//! ```

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Runtime;

use crate::error::Result;
use crate::handler::{Handler, NullHandler};
use crate::processor::ChannelConfig;
use crate::protocol::Identity;
use crate::session::ClientSession;

/// Connected client endpoint of a duplex channel.
pub struct ChannelClient<C, R, H = NullHandler> {
    runtime: Option<Runtime>,
    session: ClientSession<C, R, H>,
}

impl<C, R, H> ChannelClient<C, R, H>
where
    C: Serialize + DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
    H: Handler<C, R>,
{
    /// Send a command to the provider, blocking until the matching response
    /// arrives or the configured timeout elapses.
    pub fn send(&self, command: C) -> Result<R> {
        let Some(runtime) = self.runtime.as_ref() else {
            return Err(crate::error::ChannelError::ConnectionClosed);
        };
        runtime.block_on(self.session.send(command))
    }
}

impl<C, R, H> ChannelClient<C, R, H> {
    /// Start configuring a client that will attach to `127.0.0.1:port`
    /// under `identity`.
    pub fn builder(identity: Identity, port: u16) -> ClientBuilder<C, R> {
        ClientBuilder {
            identity,
            address: "127.0.0.1".to_string(),
            port,
            handler: NullHandler,
            config: ChannelConfig::client(),
            _types: PhantomData,
        }
    }

    /// Release the socket, stop the runtime, and join its thread.
    /// Idempotent; also runs on drop.
    pub fn close(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        self.session.close();
        drop(runtime);
    }
}

impl<C, R, H> Drop for ChannelClient<C, R, H> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Fluent configuration for [`ChannelClient`].
pub struct ClientBuilder<C, R, H = NullHandler> {
    identity: Identity,
    address: String,
    port: u16,
    handler: H,
    config: ChannelConfig,
    _types: PhantomData<fn(C) -> R>,
}

impl<C, R, H> ClientBuilder<C, R, H> {
    /// Target address (default `127.0.0.1`).
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Install the handler servicing provider-initiated calls.
    ///
    /// Without one, the channel answers provider calls with the response
    /// type's default value.
    pub fn handler<H2>(self, handler: H2) -> ClientBuilder<C, R, H2> {
        ClientBuilder {
            identity: self.identity,
            address: self.address,
            port: self.port,
            handler,
            config: self.config,
            _types: PhantomData,
        }
    }

    /// Bound every `send` by `timeout`. Without one, a send waits forever
    /// for its response.
    pub fn timeout(mut self, timeout: Duration) -> Self {
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

    /// Connect, attach, and return the running client.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Connect`](crate::ChannelError::Connect) when the
    /// transport-level connect fails;
    /// [`ChannelError::AttachRefused`](crate::ChannelError::AttachRefused)
    /// when the provider rejects the identity.
    pub fn connect(self) -> Result<ChannelClient<C, R, H>>
    where
        C: Serialize + DeserializeOwned + Send + 'static,
        R: Serialize + DeserializeOwned + Send + 'static,
        H: Handler<C, R>,
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("crosswire-client")
            .enable_all()
            .build()?;

        let session = runtime.block_on(ClientSession::connect(
            self.identity,
            &self.address,
            self.port,
            Arc::new(self.handler),
            &self.config,
        ))?;

        Ok(ChannelClient {
            runtime: Some(runtime),
            session,
        })
    }
}
