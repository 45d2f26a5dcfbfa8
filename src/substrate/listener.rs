use super::component::MessageHandler;

/// Receives broadcasts for the topics it subscribed to.
pub trait Listener: Send + Sync {
    fn on(&self, topic: &str, handler: MessageHandler);

    /// Stop receiving. Idempotent.
    fn close(&self);
}
