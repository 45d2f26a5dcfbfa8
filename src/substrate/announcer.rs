use serde_json::Value;

use super::component::PeerHandler;
use super::error::SubstrateError;

/// Broadcasts messages to every listener on the same namespace/key.
///
/// Also the component that learns about peers coming and going.
pub trait Announcer: Send + Sync {
    fn publish(&self, topic: &str, payload: Value) -> Result<(), SubstrateError>;

    /// Register a discovery handler. Peers already present are replayed as
    /// joined.
    fn on_peer(&self, handler: PeerHandler);

    /// Stop broadcasting. Idempotent.
    fn close(&self);
}
