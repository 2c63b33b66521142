//! Attach-handshake wrappers around the per-connection engine.
//!
//! A [`ClientSession`] dials out and claims an identity; a
//! [`ProviderSession`] services one accepted connection after authorizing
//! the claimed identity. Both hand the established connection to a
//! [`Processor`](crate::processor::Processor) once the handshake completes.

mod client;
mod provider;

pub use client::ClientSession;
pub use provider::ProviderSession;
