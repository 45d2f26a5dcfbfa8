//! Distribution - service registry and RPC proxying across applications
//!
//! ## Architecture
//!
//! ```text
//!   app A (key "users")                              app B (key "gateway")
//! ┌───────────────────────┐   "service" topic      ┌───────────────────────┐
//! │ services announcer    │ ─────────────────────▶ │ services listener     │
//! │                       │                        │  └─ Registrar         │
//! │ local "users" ────────┼── events announcer ──▶ │ events listener (A)   │
//! │                       │                        │  └─ proxy "users"     │
//! │ services dispatcher ◀─┼──── services caller ── │       (RemoteService) │
//! └───────────────────────┘                        └───────────────────────┘
//! ```
//!
//! Every application announces its local services on a shared namespace.
//! Receivers install a [`RemoteService`] proxy per discovered path, bound to
//! a caller/listener pair shared by all replicas of the origin's partition
//! key. The pair lives exactly as long as that key has known replicas.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use service_mesh::app::{Application, MemoryService, Params};
//! use service_mesh::distribution::{Distribution, DistributionConfig, DistributionOptions};
//! use service_mesh::scheduler::ManualScheduler;
//! use service_mesh::substrate::InMemoryNetwork;
//!
//! let network = Arc::new(InMemoryNetwork::new());
//! let scheduler = Arc::new(ManualScheduler::new());
//! let config = DistributionConfig { component_delay: 0, publication_delay: 0, ..Default::default() };
//!
//! let origin = Application::new();
//! origin.use_service("messages", MemoryService::new());
//! let _a = Distribution::new(origin, DistributionOptions::new(config.clone()), network.clone(), scheduler.clone()).unwrap();
//!
//! let gateway = Application::new();
//! let _b = Distribution::new(gateway.clone(), DistributionOptions::new(config), network, scheduler.clone()).unwrap();
//! scheduler.run_due();
//!
//! let messages = gateway.service("messages").unwrap();
//! assert!(messages.is_remote());
//! assert_eq!(messages.find(Params::new()).unwrap(), serde_json::json!([]));
//! ```

mod descriptor;
mod dispatch;
mod healthcheck;
mod options;
mod publish;
mod register;
mod remote;
mod replicas;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tracing::{debug, info, warn};

pub use descriptor::{
    AppIdentity, ApplicationDescriptor, RemoteEvent, ServiceDescriptor, HEALTHCHECK_METHOD,
    SERVICES_ANNOUNCER, SERVICES_CALLER, SERVICES_DISPATCHER, SERVICES_LISTENER,
    SERVICES_NAMESPACE, SERVICE_EVENTS_ANNOUNCER, SERVICE_EVENTS_LISTENER, SERVICE_REMOVED_TOPIC,
    SERVICE_TOPIC,
};
pub use healthcheck::HealthReport;
pub use options::{
    DistributionConfig, DistributionOptions, Initialization, OptionSelector, RemotePath,
    ServiceFilter, ServicePredicate,
};
pub use register::{SERVICE_ADDED_EVENT, SERVICE_REMOVED_EVENT};
pub use remote::RemoteService;

use crate::app::{Application, ServiceObserver};
use crate::error::DistributionError;
use crate::scheduler::{Scheduler, TaskId};
use crate::substrate::{
    Announcer, ComponentSpec, Dispatcher, Listener, MessageHandler, PeerHandler, Substrate,
};
use publish::Forwarding;
use replicas::ReplicaTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Initializing,
    Running,
    Finalized,
}

/// Components owned by this application, as opposed to the per-key ones.
#[derive(Default)]
struct Components {
    service_listener: Option<Arc<dyn Listener>>,
    service_announcer: Option<Arc<dyn Announcer>>,
    events_announcer: Option<Arc<dyn Announcer>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

struct State {
    lifecycle: Lifecycle,
    components: Components,
    /// Event forwarders attached per local path.
    forwarders: HashMap<String, Forwarding>,
    publication: Option<TaskId>,
    heartbeat: Option<TaskId>,
    initialization: Option<TaskId>,
}

/// Distribution context of one application.
///
/// Owns the application's identity, its substrate components, the replica
/// table and the timers. Built with [`Distribution::new`], which hooks it
/// into the application so services registered later are announced too.
///
/// Locks are never held while calling into the substrate or the
/// application, except the registrar lock, which serializes replica and
/// proxy bookkeeping.
pub struct Distribution {
    app: Application,
    identity: AppIdentity,
    options: DistributionOptions,
    substrate: Arc<dyn Substrate>,
    scheduler: Arc<dyn Scheduler>,
    this: Weak<Distribution>,
    state: Mutex<State>,
    registrar: Mutex<ReplicaTable>,
}

impl Distribution {
    /// Create the distribution layer of `app`.
    ///
    /// Depending on `cote_delay`, substrate components are created now,
    /// later, or when the caller invokes [`initialize`](Self::initialize).
    pub fn new(
        app: Application,
        options: DistributionOptions,
        substrate: Arc<dyn Substrate>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Arc<Self>, DistributionError> {
        Self::with_identity(AppIdentity::generate(), app, options, substrate, scheduler)
    }

    /// Same as [`new`](Self::new) with a fixed identity.
    pub fn with_identity(
        identity: AppIdentity,
        app: Application,
        options: DistributionOptions,
        substrate: Arc<dyn Substrate>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Arc<Self>, DistributionError> {
        debug!(app = %identity, options = ?options, "creating distribution");
        let distribution = Arc::new_cyclic(|this| Distribution {
            app,
            identity,
            options,
            substrate,
            scheduler,
            this: this.clone(),
            state: Mutex::new(State {
                lifecycle: Lifecycle::Idle,
                components: Components::default(),
                forwarders: HashMap::new(),
                publication: None,
                heartbeat: None,
                initialization: None,
            }),
            registrar: Mutex::new(ReplicaTable::default()),
        });

        let observer: Weak<dyn ServiceObserver> = Arc::downgrade(&distribution) as Weak<dyn ServiceObserver>;
        distribution.app.observe(observer);

        match distribution.config().initialization() {
            Initialization::Immediate => distribution.initialize()?,
            Initialization::Deferred(delay) => {
                let weak = distribution.this.clone();
                let mut state = distribution.state();
                let id = distribution.scheduler.schedule(
                    delay,
                    Box::new(move || {
                        if let Some(distribution) = weak.upgrade() {
                            distribution.state().initialization = None;
                            if let Err(err) = distribution.initialize() {
                                warn!(app = %distribution.identity, error = %err, "deferred initialization failed");
                            }
                        }
                    }),
                );
                state.initialization = Some(id);
                drop(state);
                debug!(app = %distribution.identity, ?delay, "initialization deferred");
            }
            Initialization::Manual => {
                debug!(app = %distribution.identity, "initialization left to the caller");
            }
        }

        Ok(distribution)
    }

    pub fn app(&self) -> &Application {
        &self.app
    }

    pub fn identity(&self) -> &AppIdentity {
        &self.identity
    }

    /// Partition key of this application.
    pub fn key(&self) -> &str {
        &self.options.config.key
    }

    pub fn options(&self) -> &DistributionOptions {
        &self.options
    }

    pub fn config(&self) -> &DistributionConfig {
        &self.options.config
    }

    pub fn is_initialized(&self) -> bool {
        self.state().lifecycle == Lifecycle::Running
    }

    /// Number of remote applications currently known for `key`.
    pub fn replicas(&self, key: &str) -> usize {
        self.registrar().replicas(key)
    }

    /// Partition keys with at least one known remote application.
    pub fn remote_keys(&self) -> Vec<String> {
        self.registrar().keys()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn registrar(&self) -> MutexGuard<'_, ReplicaTable> {
        self.registrar.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spec(&self, name: &str, namespace: &str, key: &str) -> ComponentSpec {
        ComponentSpec::new(name, namespace, key).advertising(self.identity.id(), self.key())
    }

    /// Create the substrate components and start announcing.
    ///
    /// Components are created one after the other with `component_delay`
    /// pauses in between: services listener, services announcer, events
    /// announcer (when events are published), then the dispatcher.
    pub fn initialize(&self) -> Result<(), DistributionError> {
        {
            let mut state = self.state();
            match state.lifecycle {
                Lifecycle::Idle => state.lifecycle = Lifecycle::Initializing,
                Lifecycle::Finalized => return Err(DistributionError::Finalized),
                _ => return Err(DistributionError::AlreadyInitialized),
            }
            if let Some(id) = state.initialization.take() {
                self.scheduler.cancel(id);
            }
        }

        info!(app = %self.identity, key = %self.key(), "initializing distribution");
        if let Err(err) = self.create_components() {
            warn!(app = %self.identity, error = %err, "distribution initialization failed");
            let components = std::mem::take(&mut self.state().components);
            close_components(components);
            self.state().lifecycle = Lifecycle::Idle;
            return Err(err);
        }

        {
            let mut state = self.state();
            if state.lifecycle != Lifecycle::Initializing {
                // finalized while components were being created
                let components = std::mem::take(&mut state.components);
                drop(state);
                close_components(components);
                return Ok(());
            }
            state.lifecycle = Lifecycle::Running;
        }

        self.announce_all();

        if let Some(interval) = self.config().heartbeat_interval() {
            let weak = self.this.clone();
            let id = self.scheduler.schedule_repeating(
                interval,
                Arc::new(move || {
                    if let Some(distribution) = weak.upgrade() {
                        distribution.announce_local_services();
                    }
                }),
            );
            self.state().heartbeat = Some(id);
            debug!(app = %self.identity, ?interval, "heartbeat scheduled");
        }

        info!(app = %self.identity, key = %self.key(), "distribution initialized");
        Ok(())
    }

    fn create_components(&self) -> Result<(), DistributionError> {
        let config = self.config();
        let tuning = &config.cote;

        let listener = self.substrate.listener(
            self.spec(SERVICES_LISTENER, SERVICES_NAMESPACE, SERVICES_NAMESPACE)
                .with_topics([SERVICE_TOPIC, SERVICE_REMOVED_TOPIC]),
            tuning,
        )?;
        self.state().components.service_listener = Some(listener.clone());
        listener.on(SERVICE_TOPIC, self.descriptor_handler(Self::on_service_announced));
        listener.on(SERVICE_REMOVED_TOPIC, self.descriptor_handler(Self::on_service_withdrawn));
        debug!(app = %self.identity, key = %self.key(), "services listener ready");

        self.scheduler.pause(config.component_delay());
        let announcer = self.substrate.announcer(
            self.spec(SERVICES_ANNOUNCER, SERVICES_NAMESPACE, SERVICES_NAMESPACE)
                .with_topics([SERVICE_TOPIC, SERVICE_REMOVED_TOPIC]),
            tuning,
        )?;
        self.state().components.service_announcer = Some(announcer.clone());
        debug!(app = %self.identity, key = %self.key(), "services announcer ready");

        if config.publish_events {
            self.scheduler.pause(config.component_delay());
            let events = self.substrate.announcer(
                self.spec(SERVICE_EVENTS_ANNOUNCER, self.key(), self.key())
                    .with_topics(config.distributed_events.iter().cloned()),
                tuning,
            )?;
            self.state().components.events_announcer = Some(events);
            debug!(app = %self.identity, key = %self.key(), "service events announcer ready");
        }

        self.scheduler.pause(config.component_delay());
        let dispatcher = self.substrate.dispatcher(
            self.spec(SERVICES_DISPATCHER, self.key(), self.key())
                .with_topics(self.dispatched_methods()),
            tuning,
        )?;
        self.state().components.dispatcher = Some(dispatcher.clone());
        self.install_dispatch_handlers(dispatcher.as_ref());
        debug!(app = %self.identity, key = %self.key(), "services dispatcher ready");

        // Peers already present are replayed as joined, so only watch them
        // once everything else is in place.
        let weak = self.this.clone();
        let on_peer: PeerHandler = Arc::new(move |event| {
            if let Some(distribution) = weak.upgrade() {
                distribution.on_peer(event);
            }
        });
        announcer.on_peer(on_peer);

        Ok(())
    }

    fn descriptor_handler(&self, handle: fn(&Distribution, ServiceDescriptor)) -> MessageHandler {
        let weak = self.this.clone();
        Arc::new(move |payload: Value| {
            let Some(distribution) = weak.upgrade() else {
                return;
            };
            match serde_json::from_value::<ServiceDescriptor>(payload) {
                Ok(descriptor) => handle(&distribution, descriptor),
                Err(err) => warn!(app = %distribution.identity, error = %err, "dropping malformed service descriptor"),
            }
        })
    }

    /// Release every substrate component and timer. Idempotent.
    ///
    /// Proxies stay registered on the application but can no longer reach
    /// their origin.
    pub fn finalize(&self) {
        let (components, timers, forwarders) = {
            let mut state = self.state();
            if state.lifecycle == Lifecycle::Finalized {
                return;
            }
            state.lifecycle = Lifecycle::Finalized;
            let timers: Vec<TaskId> = [
                state.initialization.take(),
                state.publication.take(),
                state.heartbeat.take(),
            ]
            .into_iter()
            .flatten()
            .collect();
            (
                std::mem::take(&mut state.components),
                timers,
                std::mem::take(&mut state.forwarders),
            )
        };
        info!(app = %self.identity, key = %self.key(), "finalizing distribution");

        for id in timers {
            self.scheduler.cancel(id);
        }

        let channels = self.registrar().drain();
        for (key, pair) in channels {
            debug!(app = %self.identity, key = %key, "closing channels to remote key");
            self.close_channels(pair);
        }

        close_components(components);

        for forwarding in forwarders.into_values() {
            forwarding.detach();
        }
    }
}

fn close_components(components: Components) {
    if let Some(listener) = components.service_listener {
        listener.close();
    }
    if let Some(announcer) = components.service_announcer {
        announcer.close();
    }
    if let Some(announcer) = components.events_announcer {
        announcer.close();
    }
    if let Some(dispatcher) = components.dispatcher {
        dispatcher.close();
    }
}

impl ServiceObserver for Distribution {
    fn service_added(&self, path: &str) {
        self.announce(path);
    }

    fn service_removing(&self, path: &str) {
        self.withdraw(path);
    }
}

impl Drop for Distribution {
    fn drop(&mut self) {
        self.finalize();
    }
}
