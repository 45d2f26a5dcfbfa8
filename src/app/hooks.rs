//! Hooks and middlewares wrapped around service method calls.
//!
//! Hooks run on every call (internal or external) and see a mutable
//! [`HookContext`]. Middlewares only wrap calls coming in through a
//! transport via [`Application::handle`](super::Application::handle).

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};

use super::error::ServiceError;
use super::params::Params;
use super::service::{event_for_method, MethodCall};

/// The context passed to every hook.
///
/// Before hooks may rewrite the call or short-circuit it by setting
/// `result`. After hooks see the result and may rewrite it. Setting
/// `event` to `None` suppresses the domain event the call would emit.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub path: String,
    pub method: String,
    pub id: Option<Value>,
    pub data: Option<Value>,
    pub params: Params,
    pub result: Option<Value>,
    pub event: Option<String>,
    pub error: Option<ServiceError>,
}

impl HookContext {
    pub(crate) fn new(path: &str, call: MethodCall) -> Self {
        let event = event_for_method(&call.method).map(str::to_string);
        Self {
            path: path.to_string(),
            method: call.method,
            id: call.id,
            data: call.data,
            params: call.params,
            result: None,
            event,
            error: None,
        }
    }

    /// Rebuild the method call from the (possibly rewritten) context.
    pub(crate) fn to_call(&self) -> MethodCall {
        MethodCall {
            method: self.method.clone(),
            id: self.id.clone(),
            data: self.data.clone(),
            params: self.params.clone(),
        }
    }

    /// Serializable view attached to emitted domain events.
    pub fn event_context(&self) -> Value {
        json!({
            "path": self.path,
            "method": self.method,
            "id": self.id,
            "params": self.params,
        })
    }
}

/// A hook function.
pub type Hook = Arc<dyn Fn(&mut HookContext) -> Result<(), ServiceError> + Send + Sync>;

/// Before/after/error hook chains for a service.
#[derive(Clone, Default)]
pub struct Hooks {
    pub before: Vec<Hook>,
    pub after: Vec<Hook>,
    pub error: Vec<Hook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("error", &self.error.len())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HookContext) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.before.push(Arc::new(hook));
        self
    }

    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HookContext) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.after.push(Arc::new(hook));
        self
    }

    pub fn error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HookContext) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.error.push(Arc::new(hook));
        self
    }

    /// Append another set of hooks after the current ones.
    pub fn extend(&mut self, other: &Hooks) {
        self.before.extend(other.before.iter().cloned());
        self.after.extend(other.after.iter().cloned());
        self.error.extend(other.error.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty() && self.error.is_empty()
    }

    /// Run the full chain around `call`.
    ///
    /// Error hooks may clear `ctx.error` and set `ctx.result` to recover.
    pub(crate) fn run<F>(&self, ctx: &mut HookContext, call: F) -> Result<Value, ServiceError>
    where
        F: FnOnce(MethodCall) -> Result<Value, ServiceError>,
    {
        match self.run_inner(ctx, call) {
            Ok(value) => Ok(value),
            Err(err) => {
                ctx.error = Some(err);
                for hook in &self.error {
                    if let Err(replaced) = hook(ctx) {
                        ctx.error = Some(replaced);
                    }
                }
                match ctx.error.take() {
                    Some(err) => Err(err),
                    None => Ok(ctx.result.clone().unwrap_or(Value::Null)),
                }
            }
        }
    }

    fn run_inner<F>(&self, ctx: &mut HookContext, call: F) -> Result<Value, ServiceError>
    where
        F: FnOnce(MethodCall) -> Result<Value, ServiceError>,
    {
        for hook in &self.before {
            hook(ctx)?;
        }
        if ctx.result.is_none() {
            ctx.result = Some(call(ctx.to_call())?);
        }
        for hook in &self.after {
            hook(ctx)?;
        }
        Ok(ctx.result.clone().unwrap_or(Value::Null))
    }
}

/// Runs before a transport call reaches the service. Returning an error
/// rejects the call.
pub type BeforeMiddleware = Arc<dyn Fn(&str, &MethodCall) -> Result<(), ServiceError> + Send + Sync>;

/// Runs after a transport call, seeing (and possibly rewriting) its outcome.
pub type AfterMiddleware =
    Arc<dyn Fn(&str, Result<Value, ServiceError>) -> Result<Value, ServiceError> + Send + Sync>;

/// Transport middlewares wrapped around a registered service.
#[derive(Clone, Default)]
pub struct Middlewares {
    pub before: Vec<BeforeMiddleware>,
    pub after: Vec<AfterMiddleware>,
}

impl fmt::Debug for Middlewares {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middlewares")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish()
    }
}

impl Middlewares {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before<F>(mut self, middleware: F) -> Self
    where
        F: Fn(&str, &MethodCall) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.before.push(Arc::new(middleware));
        self
    }

    pub fn after<F>(mut self, middleware: F) -> Self
    where
        F: Fn(&str, Result<Value, ServiceError>) -> Result<Value, ServiceError>
            + Send
            + Sync
            + 'static,
    {
        self.after.push(Arc::new(middleware));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}
