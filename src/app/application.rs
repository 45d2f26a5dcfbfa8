//! The hosting application: a typed service table keyed by path.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::error::ServiceError;
use super::events::{ListenerId, ServiceEvent, ServiceEvents};
use super::hooks::{HookContext, Hooks, Middlewares};
use super::params::{Params, PROVIDER};
use super::service::{MethodCall, Service, ServiceOptions};
use crate::distribution::RemoteService;

/// Strip leading and trailing slashes from a service path.
pub fn strip_slashes(path: &str) -> String {
    path.trim_matches('/').to_string()
}

/// What a path resolves to: a service hosted here, or a proxy to one
/// hosted elsewhere.
#[derive(Clone)]
pub enum ServiceHandle {
    Local(Arc<dyn Service>),
    Remote(Arc<RemoteService>),
}

impl ServiceHandle {
    pub fn as_service(&self) -> &dyn Service {
        match self {
            ServiceHandle::Local(service) => service.as_ref(),
            ServiceHandle::Remote(proxy) => proxy.as_ref(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ServiceHandle::Remote(_))
    }
}

/// A registered service with its hooks, middlewares and event emitter.
struct ServiceEntry {
    path: String,
    handle: ServiceHandle,
    hooks: RwLock<Hooks>,
    middlewares: Middlewares,
    events: ServiceEvents,
}

/// Handle to a registered service. Method calls go through its hooks
/// and emit the matching domain event on success.
#[derive(Clone)]
pub struct ServiceRef {
    entry: Arc<ServiceEntry>,
}

impl ServiceRef {
    pub fn path(&self) -> &str {
        &self.entry.path
    }

    pub fn handle(&self) -> &ServiceHandle {
        &self.entry.handle
    }

    pub fn is_remote(&self) -> bool {
        self.entry.handle.is_remote()
    }

    /// Whether both refer to the same registration.
    pub fn ptr_eq(&self, other: &ServiceRef) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }

    /// The proxy behind this path, if it is one.
    pub fn remote(&self) -> Option<&Arc<RemoteService>> {
        match &self.entry.handle {
            ServiceHandle::Remote(proxy) => Some(proxy),
            ServiceHandle::Local(_) => None,
        }
    }

    pub fn options(&self) -> ServiceOptions {
        self.entry.handle.as_service().options()
    }

    /// Append hooks to this service.
    pub fn hooks(&self, hooks: &Hooks) {
        self.entry
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(hooks);
    }

    pub fn find(&self, params: Params) -> Result<Value, ServiceError> {
        self.invoke(MethodCall::find(params))
    }

    pub fn get(&self, id: impl Into<Value>, params: Params) -> Result<Value, ServiceError> {
        self.invoke(MethodCall::get(id, params))
    }

    pub fn create(&self, data: Value, params: Params) -> Result<Value, ServiceError> {
        self.invoke(MethodCall::create(data, params))
    }

    pub fn update(&self, id: impl Into<Value>, data: Value, params: Params) -> Result<Value, ServiceError> {
        self.invoke(
            MethodCall::new("update")
                .with_id(id)
                .with_data(data)
                .with_params(params),
        )
    }

    pub fn patch(&self, id: impl Into<Value>, data: Value, params: Params) -> Result<Value, ServiceError> {
        self.invoke(
            MethodCall::new("patch")
                .with_id(id)
                .with_data(data)
                .with_params(params),
        )
    }

    pub fn remove(&self, id: impl Into<Value>, params: Params) -> Result<Value, ServiceError> {
        self.invoke(MethodCall::new("remove").with_id(id).with_params(params))
    }

    /// Call a custom method.
    pub fn call(&self, method: &str, data: Value, params: Params) -> Result<Value, ServiceError> {
        self.invoke(MethodCall::new(method).with_data(data).with_params(params))
    }

    /// Run a call through the hook chain and emit its domain event.
    pub fn invoke(&self, call: MethodCall) -> Result<Value, ServiceError> {
        let hooks = self
            .entry
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut ctx = HookContext::new(&self.entry.path, call);
        let service = self.entry.handle.as_service();
        let result = hooks.run(&mut ctx, |call| call.invoke(service))?;
        if let Some(event) = ctx.event.take() {
            let payload = ServiceEvent::new(result.clone()).with_context(ctx.event_context());
            self.entry.events.emit(&event, &payload);
        }
        Ok(result)
    }

    /// Event emitter of this service.
    pub fn events(&self) -> &ServiceEvents {
        &self.entry.events
    }

    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(ServiceEvent) + Send + Sync + 'static,
    {
        self.entry.events.on(event, listener)
    }

    pub fn emit(&self, event: &str, payload: &ServiceEvent) {
        self.entry.events.emit(event, payload)
    }
}

/// Notified when services are registered on or removed from an application.
pub trait ServiceObserver: Send + Sync {
    /// A service has just been registered at `path`.
    fn service_added(&self, path: &str);

    /// The service at `path` is about to be removed.
    fn service_removing(&self, path: &str);
}

#[derive(Default)]
struct AppInner {
    services: RwLock<BTreeMap<String, Arc<ServiceEntry>>>,
    observers: RwLock<Vec<Weak<dyn ServiceObserver>>>,
    events: ServiceEvents,
}

/// An application hosting services. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct Application {
    inner: Arc<AppInner>,
}

impl Application {
    pub fn new() -> Self {
        Self::default()
    }

    fn services(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<ServiceEntry>>> {
        self.inner
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn services_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<ServiceEntry>>> {
        self.inner
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a local service at `path`, replacing any previous one.
    pub fn use_service<S: Service + 'static>(&self, path: &str, service: S) -> ServiceRef {
        self.use_handle(path, ServiceHandle::Local(Arc::new(service)), Middlewares::new())
    }

    /// Register a service with transport middlewares.
    pub fn use_service_with<S: Service + 'static>(
        &self,
        path: &str,
        service: S,
        middlewares: Middlewares,
    ) -> ServiceRef {
        self.use_handle(path, ServiceHandle::Local(Arc::new(service)), middlewares)
    }

    /// Register an already built handle.
    pub fn use_handle(&self, path: &str, handle: ServiceHandle, middlewares: Middlewares) -> ServiceRef {
        let path = strip_slashes(path);
        let entry = Arc::new(ServiceEntry {
            path: path.clone(),
            handle,
            hooks: RwLock::new(Hooks::new()),
            middlewares,
            events: ServiceEvents::new(),
        });
        self.services_mut().insert(path.clone(), Arc::clone(&entry));
        for observer in self.observers() {
            observer.service_added(&path);
        }
        ServiceRef { entry }
    }

    /// Remove the service at `path`. Observers are told before removal.
    pub fn unuse_service(&self, path: &str) -> Option<ServiceRef> {
        let path = strip_slashes(path);
        if !self.services().contains_key(&path) {
            return None;
        }
        for observer in self.observers() {
            observer.service_removing(&path);
        }
        self.services_mut()
            .remove(&path)
            .map(|entry| ServiceRef { entry })
    }

    /// Resolve a path.
    pub fn service(&self, path: &str) -> Option<ServiceRef> {
        self.services()
            .get(&strip_slashes(path))
            .map(|entry| ServiceRef {
                entry: Arc::clone(entry),
            })
    }

    /// All registered paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.services().keys().cloned().collect()
    }

    /// Every registered service.
    pub fn all_services(&self) -> Vec<ServiceRef> {
        self.services()
            .values()
            .map(|entry| ServiceRef {
                entry: Arc::clone(entry),
            })
            .collect()
    }

    /// Handle a call arriving through a transport: middlewares first,
    /// then the service with `provider` set in params.
    pub fn handle(&self, path: &str, call: MethodCall, provider: &str) -> Result<Value, ServiceError> {
        let service = self
            .service(path)
            .ok_or_else(|| ServiceError::NotFound(format!("Can not find service '{}'", strip_slashes(path))))?;
        let middlewares = service.entry.middlewares.clone();
        let mut call = call;
        call.params.set(PROVIDER, provider);

        let admitted = middlewares
            .before
            .iter()
            .try_for_each(|middleware| middleware(service.path(), &call));
        let result = match admitted {
            Ok(()) => service.invoke(call),
            Err(err) => Err(err),
        };
        middlewares
            .after
            .iter()
            .fold(result, |result, middleware| middleware(service.path(), result))
    }

    /// Watch service registration. Observers are held weakly.
    pub fn observe(&self, observer: Weak<dyn ServiceObserver>) {
        self.inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn observers(&self) -> Vec<Arc<dyn ServiceObserver>> {
        let mut observers = self
            .inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        observers.retain(|o| o.strong_count() > 0);
        observers.iter().filter_map(Weak::upgrade).collect()
    }

    /// Listen to application-level notifications (`"service"`, `"service-removed"`).
    pub fn on<T, F>(&self, event: &str, listener: F) -> ListenerId
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.inner.events.on(event, listener)
    }

    /// Emit an application-level notification.
    pub fn emit<T: Serialize>(&self, event: &str, payload: &T) {
        self.inner.events.emit(event, payload)
    }
}
