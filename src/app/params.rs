//! Call parameters passed alongside every service method.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key flagging a call that arrived through the dispatcher.
pub const FROM_REMOTE: &str = "fromRemote";
/// Key naming the transport a call came in on (`"rest"`, `"socketio"`...).
pub const PROVIDER: &str = "provider";

/// Free-form call parameters (query, provider, authentication...).
///
/// Serialized as a plain JSON object so it can travel inside a request
/// envelope unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params {
    values: Map<String, Value>,
}

impl Params {
    /// Create empty parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create parameters from a JSON object. Non-object values yield empty params.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(values) => Self { values },
            _ => Self::default(),
        }
    }

    /// Builder-style setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Get a parameter by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Set a parameter.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Remove a parameter, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Check if a parameter exists.
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// The `query` object, if any.
    pub fn query(&self) -> Option<&Map<String, Value>> {
        self.values.get("query").and_then(Value::as_object)
    }

    /// The transport the call came in on. `None` for internal calls.
    pub fn provider(&self) -> Option<&str> {
        self.values.get(PROVIDER).and_then(Value::as_str)
    }

    /// Whether the call was forwarded by a remote proxy.
    pub fn from_remote(&self) -> bool {
        self.values
            .get(FROM_REMOTE)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Flag the call as coming from a remote proxy.
    pub fn mark_remote(mut self) -> Self {
        self.values.insert(FROM_REMOTE.to_string(), Value::Bool(true));
        self
    }

    /// Borrow the underlying object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.values)
    }
}

impl From<Map<String, Value>> for Params {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}
