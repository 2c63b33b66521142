//! # crosswire
//!
//! Duplex command/response channels over TCP: a long-lived provider accepts
//! attachments from identified clients, and **either side** may initiate a
//! strongly-typed call on the other at any time over the same connection.
//!
//! ## Architecture
//!
//! - Each message is a length-prefixed frame: a fixed 13-byte header (kind +
//!   correlation id) followed by a MessagePack payload.
//! - A per-connection [`Processor`](processor::Processor) serializes writes,
//!   demultiplexes reads, pairs responses with outstanding requests by
//!   correlation id, and dispatches inbound requests to the installed
//!   [`Handler`].
//! - Clients attach under an integer identity; the provider authorizes it
//!   against an allow-list and thereafter routes `send(identity, …)` calls
//!   over the matching session.
//!
//! ## Example
//!
//! ```ignore
//! use crosswire::{ChannelClient, ChannelProvider, Handler};
//!
//! struct PrimesHandler;
//!
//! #[async_trait::async_trait]
//! impl Handler<u64, bool> for PrimesHandler {
//!     async fn process(&self, _peer: u64, candidate: u64) -> bool {
//!         is_prime(candidate)
//!     }
//! }
//!
//! let provider = ChannelProvider::builder(1028, PrimesHandler).start()?;
//! let client: ChannelClient<u64, bool> = ChannelClient::builder(105280, 1028).connect()?;
//!
//! assert!(client.send(7)?);                 // client -> provider
//! assert!(provider.send(105280, 11)?);      // provider -> client
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod processor;
pub mod protocol;
pub mod session;
pub mod worker;
pub mod writer;

mod client;
mod provider;

pub use client::{ChannelClient, ClientBuilder};
pub use error::{ChannelError, Result};
pub use handler::{Handler, NullHandler};
pub use processor::ChannelConfig;
pub use protocol::Identity;
pub use provider::{ChannelProvider, ProviderBuilder};
pub use worker::{WorkItem, Worker};
