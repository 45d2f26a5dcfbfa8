//! Local stand-in for a service hosted by another application.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use super::descriptor::{ServiceDescriptor, HEALTHCHECK_METHOD};
use crate::app::{Params, Service, ServiceError, ServiceOptions, DEFAULT_EVENTS, DEFAULT_METHODS};
use crate::substrate::{Caller, Request};

/// Forwards every call through the caller shared by its partition key.
///
/// Requests carry the path the service has on its origin, which differs
/// from the local path when remote paths are aliased.
pub struct RemoteService {
    descriptor: ServiceDescriptor,
    caller: Arc<dyn Caller>,
}

impl RemoteService {
    pub(crate) fn new(descriptor: ServiceDescriptor, caller: Arc<dyn Caller>) -> Self {
        let custom: Vec<&String> = descriptor
            .methods
            .iter()
            .filter(|m| !DEFAULT_METHODS.contains(&m.as_str()))
            .collect();
        if !custom.is_empty() {
            debug!(
                target: "service_mesh::service",
                path = %descriptor.path,
                key = %descriptor.partition_key,
                methods = ?custom,
                "custom methods available on remote service"
            );
        }
        Self { descriptor, caller }
    }

    /// Path on the origin application.
    pub fn path(&self) -> &str {
        &self.descriptor.path
    }

    pub fn key(&self) -> &str {
        &self.descriptor.partition_key
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Options the origin chose to share.
    pub fn remote_options(&self) -> Option<&Map<String, Value>> {
        self.descriptor.remote_options.as_ref()
    }

    /// Ask the origin whether the service is still dispatchable.
    pub fn healthcheck(&self) -> Result<Value, ServiceError> {
        self.send(Request::new(HEALTHCHECK_METHOD, self.key(), self.path()))
    }

    fn request(&self, method: &str, params: Params) -> Request {
        Request::new(method, self.key(), self.path()).with_params(params)
    }

    fn send(&self, request: Request) -> Result<Value, ServiceError> {
        let method = request.method.clone();
        debug!(
            target: "service_mesh::service",
            method = %method,
            path = %self.descriptor.path,
            key = %self.descriptor.partition_key,
            "requesting remote service"
        );
        match self.caller.send(request) {
            Ok(result) => {
                debug!(
                    target: "service_mesh::service",
                    method = %method,
                    path = %self.descriptor.path,
                    "remote call succeeded"
                );
                Ok(result)
            }
            Err(err) => {
                debug!(
                    target: "service_mesh::service",
                    method = %method,
                    path = %self.descriptor.path,
                    error = %err,
                    "remote call failed"
                );
                Err(err.into())
            }
        }
    }
}

impl Service for RemoteService {
    fn find(&self, params: Params) -> Result<Value, ServiceError> {
        self.send(self.request("find", params))
    }

    fn get(&self, id: Value, params: Params) -> Result<Value, ServiceError> {
        self.send(self.request("get", params).with_id(id))
    }

    fn create(&self, data: Value, params: Params) -> Result<Value, ServiceError> {
        self.send(self.request("create", params).with_data(data))
    }

    fn update(&self, id: Value, data: Value, params: Params) -> Result<Value, ServiceError> {
        self.send(self.request("update", params).with_id(id).with_data(data))
    }

    fn patch(&self, id: Value, data: Value, params: Params) -> Result<Value, ServiceError> {
        self.send(self.request("patch", params).with_id(id).with_data(data))
    }

    fn remove(&self, id: Value, params: Params) -> Result<Value, ServiceError> {
        self.send(self.request("remove", params).with_id(id))
    }

    fn call(&self, method: &str, data: Value, params: Params) -> Result<Value, ServiceError> {
        if !self.descriptor.methods.iter().any(|m| m == method) {
            return Err(ServiceError::MethodNotAllowed(format!(
                "Method '{}' is not available on remote service '{}'",
                method, self.descriptor.path
            )));
        }
        self.send(self.request(method, params).with_data(data))
    }

    fn options(&self) -> ServiceOptions {
        ServiceOptions {
            methods: self.descriptor.methods.clone(),
            events: self
                .descriptor
                .events
                .iter()
                .filter(|e| !DEFAULT_EVENTS.contains(&e.as_str()))
                .cloned()
                .collect(),
            distributed_methods: None,
            distributed_events: None,
            extra: self.descriptor.remote_options.clone().unwrap_or_default(),
        }
    }
}
