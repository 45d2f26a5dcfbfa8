//! Minimal hosting framework for CRUD-like services.
//!
//! An [`Application`] holds a table of services keyed by path. Each
//! entry is either a local [`Service`] or a proxy to a remote one
//! ([`ServiceHandle`]). Calls made through a [`ServiceRef`] run the
//! service's hooks and emit the matching domain event
//! (`created`/`updated`/`patched`/`removed`) on its emitter.
//!
//! ## Example
//!
//! ```
//! use service_mesh::app::{Application, MemoryService, Params};
//! use serde_json::json;
//!
//! let app = Application::new();
//! let users = app.use_service("users", MemoryService::new());
//! let created = users.create(json!({ "name": "Jane" }), Params::new()).unwrap();
//! assert_eq!(created["id"], 0);
//! ```

mod application;
mod error;
mod events;
mod hooks;
mod memory;
mod params;
mod service;

pub use application::{strip_slashes, Application, ServiceHandle, ServiceObserver, ServiceRef};
pub use error::{ErrorPayload, ServiceError};
pub use events::{ListenerId, ServiceEvent, ServiceEvents};
pub use hooks::{AfterMiddleware, BeforeMiddleware, Hook, HookContext, Hooks, Middlewares};
pub use memory::MemoryService;
pub use params::{Params, FROM_REMOTE, PROVIDER};
pub use service::{
    default_events, default_methods, event_for_method, MethodCall, Service, ServiceOptions,
    DEFAULT_EVENTS, DEFAULT_METHODS,
};
