//! Answers requests of remote proxies with the local services.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::descriptor::HEALTHCHECK_METHOD;
use super::Distribution;
use crate::app::{ErrorPayload, MethodCall, ServiceError, ServiceRef};
use crate::substrate::{Dispatcher, Request, RequestHandler};

impl Distribution {
    /// Methods answered by the dispatcher. Healthcheck is always one.
    pub(crate) fn dispatched_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = Vec::new();
        let dispatched = self
            .config()
            .distributed_methods
            .iter()
            .map(String::as_str)
            .chain([HEALTHCHECK_METHOD]);
        for method in dispatched {
            if !methods.iter().any(|m| m == method) {
                methods.push(method.to_string());
            }
        }
        methods
    }

    pub(crate) fn install_dispatch_handlers(&self, dispatcher: &dyn Dispatcher) {
        for method in self.dispatched_methods() {
            let weak = self.this.clone();
            let handler: RequestHandler = if method == HEALTHCHECK_METHOD {
                Arc::new(move |request: Request| match weak.upgrade() {
                    Some(distribution) => distribution.answer_healthcheck(&request),
                    None => Err(finalized()),
                })
            } else {
                Arc::new(move |request: Request| match weak.upgrade() {
                    Some(distribution) => distribution.dispatch(request),
                    None => Err(finalized()),
                })
            };
            dispatcher.on(&method, handler);
        }
        debug!(
            target: "service_mesh::dispatch",
            app = %self.identity,
            methods = ?self.dispatched_methods(),
            "dispatch handlers installed"
        );
    }

    /// Local service a request targets. Proxies are never dispatched to.
    fn dispatch_target(&self, request: &Request) -> Result<ServiceRef, ServiceError> {
        match self.app.service(&request.path) {
            Some(service) if !service.is_remote() => Ok(service),
            _ => Err(ServiceError::unavailable(format!(
                "Unavailable distributed service on path {} with key {}",
                request.path, request.partition_key
            ))),
        }
    }

    fn dispatch(&self, request: Request) -> Result<Value, ErrorPayload> {
        debug!(
            target: "service_mesh::dispatch",
            app = %self.identity,
            method = %request.method,
            path = %request.path,
            key = %request.partition_key,
            "responding to remote request"
        );
        let service = self.dispatch_target(&request).map_err(|err| err.to_payload())?;

        let Request {
            method,
            id,
            data,
            params,
            ..
        } = request;
        let call = MethodCall {
            method: method.clone(),
            id,
            data,
            params: params.unwrap_or_default().mark_remote(),
        };
        match service.invoke(call) {
            Ok(result) => {
                debug!(
                    target: "service_mesh::dispatch",
                    app = %self.identity,
                    method = %method,
                    path = %service.path(),
                    "remote request served"
                );
                Ok(result)
            }
            Err(err) => {
                debug!(
                    target: "service_mesh::dispatch",
                    app = %self.identity,
                    method = %method,
                    path = %service.path(),
                    error = %err,
                    "remote request failed"
                );
                Err(err.to_payload())
            }
        }
    }

    fn answer_healthcheck(&self, request: &Request) -> Result<Value, ErrorPayload> {
        debug!(
            target: "service_mesh::dispatch",
            app = %self.identity,
            path = %request.path,
            key = %request.partition_key,
            "responding to healthcheck"
        );
        self.dispatch_target(request)
            .map(|_| Value::Bool(true))
            .map_err(|err| err.to_payload())
    }
}

fn finalized() -> ErrorPayload {
    ServiceError::unavailable("Distribution has been finalized").to_payload()
}
