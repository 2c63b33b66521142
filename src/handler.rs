//! Application seam for servicing inbound requests.

use async_trait::async_trait;

use crate::protocol::Identity;

/// Services commands arriving from the peer.
///
/// Invoked on the connection's receive task for every inbound request; the
/// returned response is written straight back with the request's correlation
/// id. `peer` is the identity the connection attached under.
///
/// Dispatch is inline: further frames on the connection are not read until
/// `process` returns, so a handler that stalls, stalls its connection.
#[async_trait]
pub trait Handler<C, R>: Send + Sync + 'static {
    async fn process(&self, peer: Identity, command: C) -> R;
}

/// Handler for channels used purely for outbound calls.
///
/// Answers every command with the response type's default value.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHandler;

#[async_trait]
impl<C, R> Handler<C, R> for NullHandler
where
    C: Send + 'static,
    R: Default + Send + 'static,
{
    async fn process(&self, _peer: Identity, _command: C) -> R {
        R::default()
    }
}
