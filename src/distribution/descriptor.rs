//! Identity, wire descriptors and component naming.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::app::{ServiceEvent, ServiceOptions, DEFAULT_EVENTS};
use crate::substrate::Advertisement;

/// Namespace and key shared by every application for service announcements.
pub const SERVICES_NAMESPACE: &str = "services";
/// Topic carrying new or refreshed service descriptors.
pub const SERVICE_TOPIC: &str = "service";
/// Topic carrying withdrawn service descriptors.
pub const SERVICE_REMOVED_TOPIC: &str = "service-removed";
/// Probe method every dispatcher answers.
pub const HEALTHCHECK_METHOD: &str = "healthcheck";

/// Listens to service announcements. Peers detect applications through it.
pub const SERVICES_LISTENER: &str = "services listener";
pub const SERVICES_ANNOUNCER: &str = "services announcer";
pub const SERVICE_EVENTS_ANNOUNCER: &str = "service events announcer";
pub const SERVICES_DISPATCHER: &str = "services dispatcher";
/// Shared per remote partition key.
pub const SERVICES_CALLER: &str = "services caller";
/// Shared per remote partition key.
pub const SERVICE_EVENTS_LISTENER: &str = "service events listener";

/// Identity of this process, generated once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    id: String,
    short: String,
}

impl AppIdentity {
    pub fn generate() -> Self {
        Self::from_id(Uuid::new_v4().to_string())
    }

    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let short = short_id(&id).to_string();
        Self { id, short }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// First segment of the id, for display.
    pub fn short(&self) -> &str {
        &self.short
    }
}

impl fmt::Display for AppIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short)
    }
}

fn short_id(id: &str) -> &str {
    id.split('-').next().unwrap_or(id)
}

/// An application instance serving a partition key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDescriptor {
    #[serde(rename = "uuid")]
    pub app_id: String,
    #[serde(rename = "key")]
    pub partition_key: String,
}

impl ApplicationDescriptor {
    pub fn new(app_id: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            partition_key: partition_key.into(),
        }
    }

    /// Read the application out of a peer advertisement, if it carries one.
    pub fn from_advertisement(advertisement: &Advertisement) -> Option<Self> {
        Some(Self::new(
            advertisement.app_id.clone()?,
            advertisement.partition_key.clone()?,
        ))
    }

    pub fn short_id(&self) -> &str {
        short_id(&self.app_id)
    }
}

/// Announcement of a service hosted by an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    #[serde(rename = "uuid")]
    pub app_id: String,
    #[serde(rename = "key")]
    pub partition_key: String,
    pub path: String,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_options: Option<Map<String, Value>>,
}

impl ServiceDescriptor {
    /// Describe a local service from its declared options.
    ///
    /// Events default to the declared custom events followed by the
    /// default ones; methods default to the declared methods, which
    /// already include the CRUD set. Service-level distributed lists
    /// replace either.
    pub fn describe(app_id: &str, partition_key: &str, path: &str, options: &ServiceOptions) -> Self {
        let events = match &options.distributed_events {
            Some(events) => events.clone(),
            None => {
                let mut events = options.events.clone();
                for event in DEFAULT_EVENTS {
                    if !events.iter().any(|e| e == event) {
                        events.push(event.to_string());
                    }
                }
                events
            }
        };
        let methods = options
            .distributed_methods
            .clone()
            .unwrap_or_else(|| options.methods.clone());

        Self {
            app_id: app_id.to_string(),
            partition_key: partition_key.to_string(),
            path: crate::app::strip_slashes(path),
            methods,
            events,
            remote_options: None,
        }
    }

    pub fn application(&self) -> ApplicationDescriptor {
        ApplicationDescriptor::new(self.app_id.clone(), self.partition_key.clone())
    }

    /// Same descriptor, exposed under another path.
    pub fn at_path(&self, path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..self.clone()
        }
    }

    pub fn short_id(&self) -> &str {
        short_id(&self.app_id)
    }
}

/// A domain event replicated to other applications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub path: String,
    #[serde(rename = "key")]
    pub partition_key: String,
    #[serde(flatten)]
    pub event: ServiceEvent,
}
