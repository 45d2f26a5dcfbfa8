//! Several applications distributed over one in-memory network.
//!
//! Every timer runs on a shared fake clock, so tests decide when
//! announcements and deferred work happen with [`Cluster::settle`] and
//! [`ManualScheduler::advance`].

#![allow(dead_code)]

use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use service_mesh::app::{
    Application, MemoryService, Params, Service, ServiceError, ServiceEvent, ServiceOptions,
    ServiceRef,
};
use service_mesh::distribution::{Distribution, DistributionConfig, DistributionOptions};
use service_mesh::scheduler::ManualScheduler;
use service_mesh::substrate::InMemoryNetwork;

/// How long to wait for an event that should arrive.
pub const WAIT: Duration = Duration::from_millis(500);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with no delays, so a single [`Cluster::settle`] converges.
pub fn config(key: &str) -> DistributionConfig {
    DistributionConfig {
        key: key.to_string(),
        publication_delay: 0,
        component_delay: 0,
        timeout: 1_000,
        ..Default::default()
    }
}

pub fn options(key: &str) -> DistributionOptions {
    DistributionOptions::new(config(key))
}

/// Two seeded messages, next id 2.
pub fn messages() -> MemoryService {
    MemoryService::new()
        .with_records([
            json!({ "id": 0, "content": "message 0" }),
            json!({ "id": 1, "content": "message 1" }),
        ])
        .with_start_id(2)
}

pub struct Node {
    pub app: Application,
    pub distribution: Arc<Distribution>,
}

impl Node {
    pub fn id(&self) -> &str {
        self.distribution.identity().id()
    }

    pub fn proxy(&self, path: &str) -> ServiceRef {
        let service = self
            .app
            .service(path)
            .unwrap_or_else(|| panic!("no service at {path}"));
        assert!(service.is_remote(), "{path} should be a remote proxy");
        service
    }
}

pub struct Cluster {
    pub network: Arc<InMemoryNetwork>,
    pub scheduler: Arc<ManualScheduler>,
}

impl Cluster {
    pub fn new() -> Self {
        init_tracing();
        Self {
            network: Arc::new(InMemoryNetwork::new()),
            scheduler: Arc::new(ManualScheduler::new()),
        }
    }

    /// Start a distributed application hosting `services`.
    pub fn node(&self, options: DistributionOptions, services: &[&str]) -> Node {
        let app = Application::new();
        for path in services {
            app.use_service(path, messages());
        }
        self.join(app, options)
    }

    /// Distribute an already populated application.
    pub fn join(&self, app: Application, options: DistributionOptions) -> Node {
        let distribution = Distribution::new(
            app.clone(),
            options,
            self.network.clone(),
            self.scheduler.clone(),
        )
        .expect("distribution starts");
        Node { app, distribution }
    }

    /// Run the announcements that are due.
    pub fn settle(&self) {
        self.scheduler.run_due();
    }
}

/// Channel receiving every payload of `event` emitted by `service`.
pub fn record(service: &ServiceRef, event: &str) -> Receiver<ServiceEvent> {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    service.on(event, move |payload: ServiceEvent| {
        let _ = tx.lock().unwrap().send(payload);
    });
    rx
}

/// Channel receiving every application notification named `event`.
pub fn record_app<T: DeserializeOwned + Send + 'static>(app: &Application, event: &str) -> Receiver<T> {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    app.on(event, move |payload: T| {
        let _ = tx.lock().unwrap().send(payload);
    });
    rx
}

/// Drain whatever has been received so far.
pub fn drain<T>(rx: &Receiver<T>) -> Vec<T> {
    rx.try_iter().collect()
}

/// Service with a custom `archive` method echoing what it received.
pub struct Archive;

impl Service for Archive {
    fn find(&self, _params: Params) -> Result<Value, ServiceError> {
        Ok(json!([]))
    }

    fn call(&self, method: &str, data: Value, params: Params) -> Result<Value, ServiceError> {
        match method {
            "archive" => Ok(json!({ "archived": data, "params": params.into_value() })),
            other => Err(ServiceError::MethodNotAllowed(other.to_string())),
        }
    }

    fn options(&self) -> ServiceOptions {
        ServiceOptions::default().with_method("archive")
    }
}
