//! The service capability contract every hosted service implements.

use serde_json::{Map, Value};

use super::error::ServiceError;
use super::params::Params;

/// Standard CRUD methods, in declaration order.
pub const DEFAULT_METHODS: [&str; 6] = ["find", "get", "create", "update", "patch", "remove"];

/// Standard domain events, in declaration order.
pub const DEFAULT_EVENTS: [&str; 4] = ["created", "updated", "patched", "removed"];

/// The domain event a standard method emits on success, if any.
pub fn event_for_method(method: &str) -> Option<&'static str> {
    match method {
        "create" => Some("created"),
        "update" => Some("updated"),
        "patch" => Some("patched"),
        "remove" => Some("removed"),
        _ => None,
    }
}

/// Owned list of the default methods.
pub fn default_methods() -> Vec<String> {
    DEFAULT_METHODS.iter().map(|m| m.to_string()).collect()
}

/// Owned list of the default events.
pub fn default_events() -> Vec<String> {
    DEFAULT_EVENTS.iter().map(|e| e.to_string()).collect()
}

/// Declared capabilities of a service.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Methods the service exposes, default CRUD set included.
    pub methods: Vec<String>,
    /// Custom events the service emits, on top of the default ones.
    pub events: Vec<String>,
    /// Overrides the method list announced to other applications.
    pub distributed_methods: Option<Vec<String>>,
    /// Overrides the event list announced to other applications.
    pub distributed_events: Option<Vec<String>>,
    /// Arbitrary construction options, a subset of which may be shared
    /// with remote applications.
    pub extra: Map<String, Value>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            methods: default_methods(),
            events: Vec::new(),
            distributed_methods: None,
            distributed_events: None,
            extra: Map::new(),
        }
    }
}

impl ServiceOptions {
    /// Add a custom method to the declared set.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        let method = method.into();
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    /// Add a custom event to the declared set.
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        let event = event.into();
        if !self.events.contains(&event) {
            self.events.push(event);
        }
        self
    }

    /// Attach a construction option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A CRUD-like service hosted by an [`Application`](super::Application).
///
/// Every method has a default implementation rejecting the call, so a
/// service only implements what it supports.
pub trait Service: Send + Sync {
    fn find(&self, params: Params) -> Result<Value, ServiceError> {
        let _ = params;
        Err(ServiceError::MethodNotAllowed("find".into()))
    }

    fn get(&self, id: Value, params: Params) -> Result<Value, ServiceError> {
        let _ = (id, params);
        Err(ServiceError::MethodNotAllowed("get".into()))
    }

    fn create(&self, data: Value, params: Params) -> Result<Value, ServiceError> {
        let _ = (data, params);
        Err(ServiceError::MethodNotAllowed("create".into()))
    }

    fn update(&self, id: Value, data: Value, params: Params) -> Result<Value, ServiceError> {
        let _ = (id, data, params);
        Err(ServiceError::MethodNotAllowed("update".into()))
    }

    fn patch(&self, id: Value, data: Value, params: Params) -> Result<Value, ServiceError> {
        let _ = (id, data, params);
        Err(ServiceError::MethodNotAllowed("patch".into()))
    }

    fn remove(&self, id: Value, params: Params) -> Result<Value, ServiceError> {
        let _ = (id, params);
        Err(ServiceError::MethodNotAllowed("remove".into()))
    }

    /// Invoke a custom method declared in [`ServiceOptions::methods`].
    fn call(&self, method: &str, data: Value, params: Params) -> Result<Value, ServiceError> {
        let _ = (data, params);
        Err(ServiceError::MethodNotAllowed(method.to_string()))
    }

    /// Declared capabilities.
    fn options(&self) -> ServiceOptions {
        ServiceOptions::default()
    }
}

/// A fully described method invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub id: Option<Value>,
    pub data: Option<Value>,
    pub params: Params,
}

impl MethodCall {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            id: None,
            data: None,
            params: Params::new(),
        }
    }

    pub fn find(params: Params) -> Self {
        Self::new("find").with_params(params)
    }

    pub fn get(id: impl Into<Value>, params: Params) -> Self {
        Self::new("get").with_id(id).with_params(params)
    }

    pub fn create(data: Value, params: Params) -> Self {
        Self::new("create").with_data(data).with_params(params)
    }

    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Route the call to the matching method of `service`.
    pub fn invoke(self, service: &dyn Service) -> Result<Value, ServiceError> {
        let MethodCall {
            method,
            id,
            data,
            params,
        } = self;
        let id = id.unwrap_or(Value::Null);
        let data = data.unwrap_or(Value::Null);
        match method.as_str() {
            "find" => service.find(params),
            "get" => service.get(id, params),
            "create" => service.create(data, params),
            "update" => service.update(id, data, params),
            "patch" => service.patch(id, data, params),
            "remove" => service.remove(id, params),
            custom => {
                if service.options().methods.iter().any(|m| m == custom) {
                    service.call(custom, data, params)
                } else {
                    Err(ServiceError::MethodNotAllowed(custom.to_string()))
                }
            }
        }
    }
}
