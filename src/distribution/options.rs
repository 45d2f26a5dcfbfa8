//! Distribution configuration.
//!
//! [`DistributionConfig`] holds everything that can come from a TOML file
//! or the environment. [`DistributionOptions`] adds the options that are
//! code: filters, path aliasing, hooks and middlewares.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::descriptor::ServiceDescriptor;
use crate::app::{default_events, default_methods, Hooks, Middlewares};
use crate::error::DistributionError;
use crate::substrate::Tuning;

/// When the substrate components get created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initialization {
    /// Right away, when the distribution is created.
    Immediate,
    /// After a delay.
    Deferred(Duration),
    /// The caller invokes `initialize` itself.
    Manual,
}

/// Serializable distribution settings. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// Debounce window of a full re-announcement.
    #[serde(alias = "publicationDelay")]
    pub publication_delay: u64,
    /// Pause between two substrate component creations.
    #[serde(alias = "componentDelay")]
    pub component_delay: u64,
    /// Unset or zero: initialize immediately. Negative: the caller
    /// initializes. Positive: initialize after that many milliseconds.
    #[serde(alias = "coteDelay")]
    pub cote_delay: Option<i64>,
    /// Periodic re-announcement of every local service, when positive.
    #[serde(alias = "heartbeatInterval")]
    pub heartbeat_interval: Option<u64>,
    /// Replicate local domain events to other applications.
    #[serde(alias = "publishEvents")]
    pub publish_events: bool,
    /// Events broadcast and listened to across applications.
    #[serde(alias = "distributedEvents")]
    pub distributed_events: Vec<String>,
    /// Methods this application answers for remote callers.
    #[serde(alias = "distributedMethods")]
    pub distributed_methods: Vec<String>,
    /// Partition key of this application.
    pub key: String,
    /// Remote call timeout.
    pub timeout: u64,
    #[serde(alias = "healthcheckPath")]
    pub healthcheck_path: String,
    /// Substrate tuning.
    pub cote: Tuning,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            publication_delay: 10_000,
            component_delay: 1_000,
            cote_delay: None,
            heartbeat_interval: None,
            publish_events: true,
            distributed_events: default_events(),
            distributed_methods: default_methods(),
            key: "default".to_string(),
            timeout: 20_000,
            healthcheck_path: "/distribution/healthcheck/".to_string(),
            cote: Tuning::default(),
        }
    }
}

impl DistributionConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, DistributionError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DistributionError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Apply `PUBLICATION_DELAY`, `COMPONENT_DELAY`, `COTE_DELAY`,
    /// `HEARTBEAT_INTERVAL`, `BASE_PORT`, `HIGHEST_PORT` and `COTE_LOG`
    /// from the process environment.
    pub fn from_env_overrides(self) -> Self {
        self.with_env(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env_overrides`](Self::from_env_overrides) with a
    /// custom variable lookup.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parse<T: std::str::FromStr>(name: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(variable = name, value = %raw, "ignoring unparsable environment variable");
                    None
                }
            }
        }

        if let Some(v) = parse("PUBLICATION_DELAY", lookup("PUBLICATION_DELAY")) {
            self.publication_delay = v;
        }
        if let Some(v) = parse("COMPONENT_DELAY", lookup("COMPONENT_DELAY")) {
            self.component_delay = v;
        }
        if let Some(v) = parse("COTE_DELAY", lookup("COTE_DELAY")) {
            self.cote_delay = Some(v);
        }
        if let Some(v) = parse("HEARTBEAT_INTERVAL", lookup("HEARTBEAT_INTERVAL")) {
            self.heartbeat_interval = Some(v);
        }
        if let Some(v) = parse("BASE_PORT", lookup("BASE_PORT")) {
            self.cote.base_port = v;
        }
        if let Some(v) = parse("HIGHEST_PORT", lookup("HIGHEST_PORT")) {
            self.cote.highest_port = v;
        }
        if let Some(raw) = lookup("COTE_LOG") {
            self.cote.log = !raw.is_empty();
        }
        self
    }

    pub fn initialization(&self) -> Initialization {
        match self.cote_delay {
            None | Some(0) => Initialization::Immediate,
            Some(ms) if ms < 0 => Initialization::Manual,
            Some(ms) => Initialization::Deferred(Duration::from_millis(ms.unsigned_abs())),
        }
    }

    pub fn publication_delay(&self) -> Duration {
        Duration::from_millis(self.publication_delay)
    }

    pub fn component_delay(&self) -> Duration {
        Duration::from_millis(self.component_delay)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// `None` when no heartbeat is configured.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Decides from its descriptor whether a service is taken into account.
pub type ServicePredicate = Arc<dyn Fn(&ServiceDescriptor) -> bool + Send + Sync>;

/// Maps a remote service (path, partition key) to the local path of its proxy.
pub type RemotePath = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Names the local service options shared with remote applications.
pub type OptionSelector = Arc<dyn Fn(&ServiceDescriptor) -> Vec<String> + Send + Sync>;

/// Which services are exposed (local) or discovered (remote).
#[derive(Clone, Default)]
pub enum ServiceFilter {
    #[default]
    All,
    AllowList(Vec<String>),
    Predicate(ServicePredicate),
}

impl fmt::Debug for ServiceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceFilter::All => f.write_str("All"),
            ServiceFilter::AllowList(paths) => f.debug_tuple("AllowList").field(paths).finish(),
            ServiceFilter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl ServiceFilter {
    pub fn allow<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ServiceFilter::AllowList(paths.into_iter().map(Into::into).collect())
    }

    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&ServiceDescriptor) -> bool + Send + Sync + 'static,
    {
        ServiceFilter::Predicate(Arc::new(predicate))
    }

    pub fn allows(&self, descriptor: &ServiceDescriptor) -> bool {
        match self {
            ServiceFilter::All => true,
            ServiceFilter::AllowList(paths) => paths.iter().any(|p| *p == descriptor.path),
            ServiceFilter::Predicate(predicate) => predicate(descriptor),
        }
    }
}

/// Full set of distribution options.
#[derive(Clone, Default)]
pub struct DistributionOptions {
    pub config: DistributionConfig,
    /// Local services exposed to other applications.
    pub services: ServiceFilter,
    /// Remote services proxied locally.
    pub remote_services: ServiceFilter,
    pub remote_service_path: Option<RemotePath>,
    pub remote_service_options: Option<OptionSelector>,
    /// Hooks attached to every proxy.
    pub hooks: Option<Hooks>,
    /// Middlewares wrapped around every proxy.
    pub middlewares: Middlewares,
}

impl fmt::Debug for DistributionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributionOptions")
            .field("config", &self.config)
            .field("services", &self.services)
            .field("remote_services", &self.remote_services)
            .field("remote_service_path", &self.remote_service_path.is_some())
            .field("remote_service_options", &self.remote_service_options.is_some())
            .field("hooks", &self.hooks)
            .field("middlewares", &self.middlewares)
            .finish()
    }
}

impl DistributionOptions {
    pub fn new(config: DistributionConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.config.key = key.into();
        self
    }

    pub fn services(mut self, filter: ServiceFilter) -> Self {
        self.services = filter;
        self
    }

    pub fn remote_services(mut self, filter: ServiceFilter) -> Self {
        self.remote_services = filter;
        self
    }

    pub fn remote_service_path<F>(mut self, alias: F) -> Self
    where
        F: Fn(&str, &str) -> String + Send + Sync + 'static,
    {
        self.remote_service_path = Some(Arc::new(alias));
        self
    }

    pub fn remote_service_options<F>(mut self, selector: F) -> Self
    where
        F: Fn(&ServiceDescriptor) -> Vec<String> + Send + Sync + 'static,
    {
        self.remote_service_options = Some(Arc::new(selector));
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn middlewares(mut self, middlewares: Middlewares) -> Self {
        self.middlewares = middlewares;
        self
    }
}
