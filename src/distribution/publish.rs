//! Outward view of the local services: announcements and event forwarding.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::descriptor::{RemoteEvent, ServiceDescriptor, SERVICE_REMOVED_TOPIC, SERVICE_TOPIC};
use super::{Distribution, Lifecycle};
use crate::app::{ListenerId, ServiceEvent, ServiceRef};
use crate::substrate::Announcer;

/// Event forwarders installed on one local service.
pub(crate) struct Forwarding {
    service: ServiceRef,
    listeners: Vec<ListenerId>,
}

impl Forwarding {
    pub(crate) fn detach(self) {
        for id in self.listeners {
            self.service.events().off(&id);
        }
    }
}

impl Distribution {
    /// Announce the local service at `path` to other applications.
    ///
    /// Nothing happens before initialization, for unknown or empty paths,
    /// for proxies, or for services the exposure filter keeps internal. The
    /// first announcement of a service also starts forwarding its events.
    pub fn announce(&self, path: &str) {
        let Some(announcer) = self.state().components.service_announcer.clone() else {
            return;
        };
        let Some(service) = self.app.service(path) else {
            return;
        };
        if service.is_remote() {
            debug!(
                target: "service_mesh::ignore",
                app = %self.identity,
                path = %service.path(),
                "not announcing remote service"
            );
            return;
        }

        let descriptor = self.describe(&service);
        if descriptor.path.is_empty() {
            debug!(
                target: "service_mesh::ignore",
                app = %self.identity,
                "not announcing service without a path"
            );
            return;
        }
        if !self.options.services.allows(&descriptor) {
            debug!(
                target: "service_mesh::ignore",
                app = %self.identity,
                path = %descriptor.path,
                "not announcing internal service"
            );
            return;
        }

        if self.config().publish_events && !descriptor.events.is_empty() {
            self.attach_forwarders(&service, &descriptor.events);
        }

        self.broadcast(announcer.as_ref(), SERVICE_TOPIC, &descriptor);
        debug!(
            target: "service_mesh::publish",
            app = %self.identity,
            key = %self.key(),
            path = %descriptor.path,
            "announced local service"
        );
    }

    /// Tell other applications the local service at `path` is going away.
    pub fn withdraw(&self, path: &str) {
        let Some(announcer) = self.state().components.service_announcer.clone() else {
            return;
        };
        let Some(service) = self.app.service(path) else {
            return;
        };
        if service.is_remote() {
            return;
        }

        let descriptor = self.describe(&service);
        if descriptor.path.is_empty() || !self.options.services.allows(&descriptor) {
            return;
        }

        if let Some(forwarding) = self.state().forwarders.remove(service.path()) {
            forwarding.detach();
        }
        self.broadcast(announcer.as_ref(), SERVICE_REMOVED_TOPIC, &descriptor);
        debug!(
            target: "service_mesh::publish",
            app = %self.identity,
            key = %self.key(),
            path = %descriptor.path,
            "withdrew local service"
        );
    }

    /// Re-announce every local service after the publication delay.
    ///
    /// Triggers arriving while an announcement is already scheduled are
    /// folded into it.
    pub fn announce_all(&self) {
        let mut state = self.state();
        if state.lifecycle == Lifecycle::Finalized {
            return;
        }
        if state.publication.is_some() {
            debug!(
                target: "service_mesh::publish",
                app = %self.identity,
                "announcement of local services already scheduled"
            );
            return;
        }

        let weak = self.this.clone();
        let id = self.scheduler.schedule(
            self.config().publication_delay(),
            Box::new(move || {
                if let Some(distribution) = weak.upgrade() {
                    distribution.state().publication = None;
                    distribution.announce_local_services();
                }
            }),
        );
        state.publication = Some(id);
        debug!(
            target: "service_mesh::publish",
            app = %self.identity,
            key = %self.key(),
            "scheduled announcement of local services"
        );
    }

    pub(crate) fn announce_local_services(&self) {
        for path in self.app.paths() {
            self.announce(&path);
        }
    }

    /// Descriptor of a local service, with the options shared remotely.
    pub(crate) fn describe(&self, service: &ServiceRef) -> ServiceDescriptor {
        let options = service.options();
        let mut descriptor =
            ServiceDescriptor::describe(self.identity.id(), self.key(), service.path(), &options);

        if let Some(selector) = &self.options.remote_service_options {
            let shared: Map<String, Value> = selector(&descriptor)
                .into_iter()
                .filter_map(|name| options.extra.get(&name).cloned().map(|value| (name, value)))
                .collect();
            if !shared.is_empty() {
                descriptor.remote_options = Some(shared);
            }
        }
        descriptor
    }

    fn attach_forwarders(&self, service: &ServiceRef, events: &[String]) {
        let path = service.path().to_string();
        {
            let mut state = self.state();
            match state.forwarders.get(&path) {
                Some(forwarding) if forwarding.service.ptr_eq(service) => return,
                _ => {}
            }
            // reserve the slot; a replaced service keeps its old listeners
            // until detached here
            let previous = state.forwarders.insert(
                path.clone(),
                Forwarding {
                    service: service.clone(),
                    listeners: Vec::new(),
                },
            );
            drop(state);
            if let Some(previous) = previous {
                previous.detach();
            }
        }

        let listeners: Vec<ListenerId> = events
            .iter()
            .map(|event| {
                let weak = self.this.clone();
                let path = path.clone();
                let name = event.clone();
                service.on(event, move |payload: ServiceEvent| {
                    if let Some(distribution) = weak.upgrade() {
                        distribution.forward_event(&path, &name, payload);
                    }
                })
            })
            .collect();

        let mut state = self.state();
        match state.forwarders.get_mut(&path) {
            Some(forwarding) if forwarding.service.ptr_eq(service) => {
                forwarding.listeners = listeners;
            }
            _ => {
                // withdrawn or finalized meanwhile
                drop(state);
                Forwarding {
                    service: service.clone(),
                    listeners,
                }
                .detach();
                return;
            }
        }
        drop(state);
        debug!(
            target: "service_mesh::publish",
            app = %self.identity,
            path = %path,
            events = ?events,
            "forwarding local service events"
        );
    }

    fn forward_event(&self, path: &str, event: &str, payload: ServiceEvent) {
        let Some(announcer) = self.state().components.events_announcer.clone() else {
            return;
        };
        let remote = RemoteEvent {
            path: path.to_string(),
            partition_key: self.key().to_string(),
            event: payload,
        };
        debug!(
            target: "service_mesh::publish",
            app = %self.identity,
            event,
            path,
            "publishing local service event"
        );
        self.broadcast(announcer.as_ref(), event, &remote);
    }

    fn broadcast<T: Serialize>(&self, announcer: &dyn Announcer, topic: &str, payload: &T) {
        let result = serde_json::to_value(payload)
            .map_err(|err| err.to_string())
            .and_then(|value| announcer.publish(topic, value).map_err(|err| err.to_string()));
        if let Err(err) = result {
            warn!(
                target: "service_mesh::publish",
                app = %self.identity,
                topic,
                error = %err,
                "broadcast failed"
            );
        }
    }
}
