//! Named event emitters for services and the application.
//!
//! Thin wrapper over `event_emitter_rs::EventEmitter`: payloads travel as
//! JSON text so listeners can ask for any `DeserializeOwned` type, and
//! `emit` waits for listener threads so delivery is complete on return.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use event_emitter_rs::EventEmitter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Identifier returned by [`ServiceEvents::on`], used to detach a listener.
pub type ListenerId = String;

/// Payload of a domain event: the record plus the call context it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl ServiceEvent {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            context: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

struct Inner {
    emitter: EventEmitter,
    /// Attached listener ids, by event name.
    attached: HashMap<ListenerId, String>,
}

/// A set of named events with attachable listeners.
pub struct ServiceEvents {
    inner: Mutex<Inner>,
}

impl Default for ServiceEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceEvents {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                emitter: EventEmitter::new(),
                attached: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener. Payloads that do not decode into `T` are
    /// logged and dropped.
    pub fn on<T, F>(&self, event: &str, listener: F) -> ListenerId
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let name = event.to_string();
        let mut inner = self.lock();
        let id = inner.emitter.on(event, move |raw: String| {
            match serde_json::from_str::<T>(&raw) {
                Ok(payload) => listener(payload),
                Err(e) => warn!(event = %name, error = %e, "dropping undecodable event payload"),
            }
        });
        inner.attached.insert(id.clone(), event.to_string());
        id
    }

    /// Detach a listener. Returns `false` if it was not attached.
    pub fn off(&self, id: &str) -> bool {
        let mut inner = self.lock();
        if inner.attached.remove(id).is_none() {
            return false;
        }
        inner.emitter.remove_listener(id);
        true
    }

    /// Emit an event to every listener and wait for them to run.
    pub fn emit<T: Serialize>(&self, event: &str, payload: &T) {
        let raw = match serde_json::to_string(payload) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(event, error = %e, "cannot serialize event payload");
                return;
            }
        };
        // Listener threads may call back into this emitter, so join them
        // after releasing the lock.
        let handles = self.lock().emitter.emit(event, raw);
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Number of listeners attached for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.lock()
            .attached
            .values()
            .filter(|name| name.as_str() == event)
            .count()
    }
}
