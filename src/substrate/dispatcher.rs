use super::component::RequestHandler;

/// Answers requests routed to it by method name.
pub trait Dispatcher: Send + Sync {
    /// Register the handler for a request type, replacing any previous one.
    fn on(&self, method: &str, handler: RequestHandler);

    /// Idempotent.
    fn close(&self);
}
