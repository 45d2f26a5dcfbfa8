use std::time::Duration;

use serde_json::Value;

use super::component::Request;
use super::error::SubstrateError;

/// Sends requests to a dispatcher on the same namespace/key and waits for
/// the reply.
pub trait Caller: Send + Sync {
    /// Blocks until the reply arrives or [`Caller::timeout`] elapses.
    fn send(&self, request: Request) -> Result<Value, SubstrateError>;

    fn timeout(&self) -> Duration;

    /// Idempotent.
    fn close(&self);
}
