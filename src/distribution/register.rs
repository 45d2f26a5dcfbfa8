//! Remote application tracking and proxy installation.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::descriptor::{
    ApplicationDescriptor, RemoteEvent, ServiceDescriptor, HEALTHCHECK_METHOD, SERVICES_CALLER,
    SERVICES_LISTENER, SERVICE_EVENTS_LISTENER,
};
use super::replicas::{ChannelPair, Joined, Left};
use super::{Distribution, Lifecycle, RemoteService};
use crate::app::{strip_slashes, Hooks, ServiceHandle, DEFAULT_METHODS};
use crate::substrate::{Listener, PeerEvent, SubstrateError};

/// Application notification emitted once a proxy is installed.
pub const SERVICE_ADDED_EVENT: &str = "service";
/// Application notification emitted once a proxy is removed.
pub const SERVICE_REMOVED_EVENT: &str = "service-removed";

impl Distribution {
    pub(crate) fn on_peer(&self, event: PeerEvent) {
        match event {
            PeerEvent::Joined(advertisement) if advertisement.name == SERVICES_LISTENER => {
                if let Some(application) = ApplicationDescriptor::from_advertisement(&advertisement) {
                    debug!(
                        target: "service_mesh::register",
                        app = %self.identity,
                        remote = %application.short_id(),
                        key = %application.partition_key,
                        "peer application detected"
                    );
                    self.register_application(&application);
                }
            }
            PeerEvent::Left(advertisement) if advertisement.name == SERVICES_LISTENER => {
                if let Some(application) = ApplicationDescriptor::from_advertisement(&advertisement) {
                    debug!(
                        target: "service_mesh::register",
                        app = %self.identity,
                        remote = %application.short_id(),
                        key = %application.partition_key,
                        "peer application lost"
                    );
                    self.unregister_application(&application);
                }
            }
            _ => {}
        }
    }

    /// Add a remote application to the replicas of its partition key.
    ///
    /// The first replica of a key opens the caller and event listener
    /// every proxy of that key shares, and triggers a re-announcement of
    /// the local services so the newcomer learns about them.
    pub fn register_application(&self, application: &ApplicationDescriptor) {
        if application.app_id == self.identity.id() {
            debug!(
                target: "service_mesh::ignore",
                app = %self.identity,
                "ignoring local application"
            );
            return;
        }

        let key = application.partition_key.as_str();
        let mut registrar = self.registrar();
        if self.is_finalized() {
            return;
        }
        match registrar.join(key, &application.app_id) {
            Joined::AlreadyKnown => return,
            Joined::Another => {
                debug!(
                    target: "service_mesh::register",
                    app = %self.identity,
                    remote = %application.short_id(),
                    key,
                    replicas = registrar.replicas(key),
                    "registered another replica"
                );
                return;
            }
            Joined::First => {}
        }

        info!(
            target: "service_mesh::register",
            app = %self.identity,
            remote = %application.short_id(),
            key,
            "registering remote application"
        );
        self.announce_all();

        match self.open_channels(key) {
            Ok(pair) => registrar.open(key, pair),
            Err(err) => {
                warn!(
                    target: "service_mesh::register",
                    app = %self.identity,
                    key,
                    error = %err,
                    "cannot open channels to remote key"
                );
                registrar.leave(key, &application.app_id);
            }
        }
    }

    /// Remove a remote application from its key's replicas.
    ///
    /// When it was the last one, the key's channels are closed and every
    /// proxy bound to that key is removed from the application.
    pub fn unregister_application(&self, application: &ApplicationDescriptor) {
        if application.app_id == self.identity.id() {
            return;
        }

        let key = application.partition_key.as_str();
        let removed = {
            let mut registrar = self.registrar();
            match registrar.leave(key, &application.app_id) {
                Left::Unknown => return,
                Left::Remaining => {
                    debug!(
                        target: "service_mesh::register",
                        app = %self.identity,
                        remote = %application.short_id(),
                        key,
                        replicas = registrar.replicas(key),
                        "replica left, key still served"
                    );
                    return;
                }
                Left::Last => {}
            }

            info!(
                target: "service_mesh::register",
                app = %self.identity,
                remote = %application.short_id(),
                key,
                "last replica left, unregistering remote key"
            );
            if let Some(pair) = registrar.close(key) {
                self.close_channels(pair);
            }

            let mut removed = Vec::new();
            for service in self.app.all_services() {
                let Some(proxy) = service.remote() else {
                    continue;
                };
                if proxy.key() != key {
                    continue;
                }
                let descriptor = proxy.descriptor().at_path(service.path());
                self.app.unuse_service(service.path());
                debug!(
                    target: "service_mesh::register",
                    app = %self.identity,
                    path = %descriptor.path,
                    key,
                    "removed remote service"
                );
                removed.push(descriptor);
            }
            removed
        };

        for descriptor in removed {
            self.app.emit(SERVICE_REMOVED_EVENT, &descriptor);
        }
    }

    /// Install a proxy for a service announced by another application.
    pub(crate) fn on_service_announced(&self, descriptor: ServiceDescriptor) {
        if descriptor.app_id == self.identity.id() {
            debug!(
                target: "service_mesh::ignore",
                app = %self.identity,
                path = %descriptor.path,
                "ignoring local service announcement"
            );
            return;
        }
        if descriptor.path.is_empty() {
            debug!(
                target: "service_mesh::ignore",
                app = %self.identity,
                key = %descriptor.partition_key,
                "ignoring service announcement without a path"
            );
            return;
        }
        if self.is_finalized() {
            return;
        }

        // Discovery may lag behind announcements.
        self.register_application(&descriptor.application());

        let path = self.local_path(&descriptor.path, &descriptor.partition_key);
        let installed = {
            let registrar = self.registrar();
            if let Some(existing) = self.app.service(&path) {
                debug!(
                    target: "service_mesh::ignore",
                    app = %self.identity,
                    path = %path,
                    remote = existing.is_remote(),
                    "service already registered"
                );
                return;
            }
            if !self.options.remote_services.allows(&descriptor) {
                debug!(
                    target: "service_mesh::ignore",
                    app = %self.identity,
                    path = %descriptor.path,
                    "remote service not discovered"
                );
                return;
            }
            let Some(pair) = registrar.channels(&descriptor.partition_key) else {
                warn!(
                    target: "service_mesh::register",
                    app = %self.identity,
                    path = %descriptor.path,
                    key = %descriptor.partition_key,
                    "no channel open to remote key"
                );
                return;
            };

            let proxy = RemoteService::new(descriptor.clone(), pair.caller.clone());
            let service = self.app.use_handle(
                &path,
                ServiceHandle::Remote(Arc::new(proxy)),
                self.options.middlewares.clone(),
            );
            // Domain events of a proxy only come from its origin, even when
            // an error hook recovers a failed call.
            service.hooks(&Hooks::new().before(|ctx| {
                ctx.event = None;
                Ok(())
            }));
            if let Some(hooks) = &self.options.hooks {
                service.hooks(hooks);
            }
            descriptor.at_path(service.path())
        };

        info!(
            target: "service_mesh::register",
            app = %self.identity,
            path = %installed.path,
            key = %installed.partition_key,
            "registered remote service"
        );
        self.app.emit(SERVICE_ADDED_EVENT, &installed);
    }

    /// Remove the proxy of a service its origin withdrew.
    pub(crate) fn on_service_withdrawn(&self, descriptor: ServiceDescriptor) {
        if descriptor.app_id == self.identity.id() || descriptor.path.is_empty() {
            return;
        }

        let path = self.local_path(&descriptor.path, &descriptor.partition_key);
        let removed = {
            let _registrar = self.registrar();
            let Some(service) = self.app.service(&path) else {
                return;
            };
            let Some(proxy) = service.remote() else {
                debug!(
                    target: "service_mesh::ignore",
                    app = %self.identity,
                    path = %path,
                    "not removing local service"
                );
                return;
            };
            if !self.options.remote_services.allows(&descriptor) || proxy.key() != descriptor.partition_key {
                return;
            }
            self.app.unuse_service(&path);
            descriptor.at_path(service.path())
        };

        info!(
            target: "service_mesh::register",
            app = %self.identity,
            path = %removed.path,
            key = %removed.partition_key,
            "unregistered remote service"
        );
        self.app.emit(SERVICE_REMOVED_EVENT, &removed);
    }

    pub(crate) fn close_channels(&self, pair: ChannelPair) {
        if let Some(id) = pair.pending_listener {
            self.scheduler.cancel(id);
        }
        pair.caller.close();
        if let Some(listener) = pair.listener {
            listener.close();
        }
    }

    /// Local path of a remote service, after aliasing.
    fn local_path(&self, path: &str, key: &str) -> String {
        match &self.options.remote_service_path {
            Some(alias) => strip_slashes(&alias(path, key)),
            None => strip_slashes(path),
        }
    }

    fn is_finalized(&self) -> bool {
        self.state().lifecycle == Lifecycle::Finalized
    }

    /// Methods the shared caller of a key may request.
    fn requested_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = Vec::new();
        let requested = DEFAULT_METHODS
            .iter()
            .copied()
            .chain(self.config().distributed_methods.iter().map(String::as_str))
            .chain([HEALTHCHECK_METHOD]);
        for method in requested {
            if !methods.iter().any(|m| m == method) {
                methods.push(method.to_string());
            }
        }
        methods
    }

    fn open_channels(&self, key: &str) -> Result<ChannelPair, SubstrateError> {
        let config = self.config();
        let caller = self.substrate.caller(
            self.spec(SERVICES_CALLER, key, key)
                .with_topics(self.requested_methods()),
            &config.cote,
            config.timeout(),
        )?;
        debug!(
            target: "service_mesh::register",
            app = %self.identity,
            key,
            "services caller ready"
        );

        let mut pair = ChannelPair {
            caller,
            listener: None,
            pending_listener: None,
        };
        if config.component_delay == 0 {
            match self.create_event_listener(key) {
                Ok(listener) => pair.listener = Some(listener),
                Err(err) => {
                    pair.caller.close();
                    return Err(err);
                }
            }
        } else {
            let weak = self.this.clone();
            let key = key.to_string();
            let id = self.scheduler.schedule(
                config.component_delay(),
                Box::new(move || {
                    if let Some(distribution) = weak.upgrade() {
                        distribution.open_event_listener(&key);
                    }
                }),
            );
            pair.pending_listener = Some(id);
        }
        Ok(pair)
    }

    fn open_event_listener(&self, key: &str) {
        let mut registrar = self.registrar();
        let Some(pair) = registrar.channels_mut(key) else {
            return;
        };
        pair.pending_listener = None;
        if pair.listener.is_some() {
            return;
        }
        match self.create_event_listener(key) {
            Ok(listener) => pair.listener = Some(listener),
            Err(err) => warn!(
                target: "service_mesh::register",
                app = %self.identity,
                key,
                error = %err,
                "cannot listen to remote service events"
            ),
        }
    }

    fn create_event_listener(&self, key: &str) -> Result<Arc<dyn Listener>, SubstrateError> {
        let config = self.config();
        let listener = self.substrate.listener(
            self.spec(SERVICE_EVENTS_LISTENER, key, key)
                .with_topics(config.distributed_events.iter().cloned()),
            &config.cote,
        )?;
        for event in &config.distributed_events {
            let weak = self.this.clone();
            let name = event.clone();
            listener.on(
                event,
                Arc::new(move |payload: Value| {
                    if let Some(distribution) = weak.upgrade() {
                        distribution.on_remote_event(&name, payload);
                    }
                }),
            );
        }
        debug!(
            target: "service_mesh::register",
            app = %self.identity,
            key,
            events = ?config.distributed_events,
            "service events listener ready"
        );
        Ok(listener)
    }

    fn on_remote_event(&self, event: &str, payload: Value) {
        let remote: RemoteEvent = match serde_json::from_value(payload) {
            Ok(remote) => remote,
            Err(err) => {
                warn!(
                    target: "service_mesh::register",
                    app = %self.identity,
                    event,
                    error = %err,
                    "dropping malformed remote event"
                );
                return;
            }
        };

        let path = self.local_path(&remote.path, &remote.partition_key);
        match self.app.service(&path) {
            Some(service) if service.is_remote() => {
                debug!(
                    target: "service_mesh::register",
                    app = %self.identity,
                    event,
                    path = %path,
                    "dispatching remote service event"
                );
                service.emit(event, &remote.event);
            }
            _ => debug!(
                target: "service_mesh::ignore",
                app = %self.identity,
                event,
                path = %path,
                "no remote service to dispatch event to"
            ),
        }
    }
}
