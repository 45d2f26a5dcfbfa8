//! Component descriptions, tuning and message shapes shared by every role.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::{ErrorPayload, Params};

/// Identity and routing scope of a substrate component.
///
/// Components only talk to peers sharing their `namespace` and `key`.
/// `app_id`/`partition_key` are advertised to peers and surface in
/// [`PeerEvent`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSpec {
    pub name: String,
    pub namespace: String,
    pub key: String,
    /// Broadcast topics, subscribed topics or request types, depending on the role.
    pub topics: Vec<String>,
    pub app_id: Option<String>,
    pub partition_key: Option<String>,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            key: key.into(),
            topics: Vec::new(),
            app_id: None,
            partition_key: None,
        }
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Advertise the owning application to peers.
    pub fn advertising(mut self, app_id: impl Into<String>, partition_key: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self.partition_key = Some(partition_key.into());
        self
    }

    pub(crate) fn advertisement(&self) -> Advertisement {
        Advertisement {
            name: self.name.clone(),
            app_id: self.app_id.clone(),
            partition_key: self.partition_key.clone(),
        }
    }
}

/// What a component tells its peers about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub name: String,
    pub app_id: Option<String>,
    pub partition_key: Option<String>,
}

/// Peer discovery notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Joined(Advertisement),
    Left(Advertisement),
}

/// Discovery and port allocation parameters, in milliseconds where timed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    #[serde(alias = "helloInterval")]
    pub hello_interval: u64,
    #[serde(alias = "checkInterval")]
    pub check_interval: u64,
    /// A peer silent for this long is considered gone.
    #[serde(alias = "nodeTimeout")]
    pub node_timeout: u64,
    #[serde(alias = "masterTimeout")]
    pub master_timeout: u64,
    #[serde(alias = "basePort")]
    pub base_port: u16,
    #[serde(alias = "highestPort")]
    pub highest_port: u16,
    /// Substrate-level logging.
    pub log: bool,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            hello_interval: 10_000,
            check_interval: 20_000,
            node_timeout: 30_000,
            master_timeout: 60_000,
            base_port: 10_000,
            highest_port: 20_000,
            log: false,
        }
    }
}

impl Tuning {
    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout)
    }
}

/// Request envelope exchanged between a caller and a dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Method name; the dispatcher routes on it.
    #[serde(rename = "type")]
    pub method: String,
    /// Partition key of the target application.
    #[serde(rename = "key")]
    pub partition_key: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
}

impl Request {
    pub fn new(method: impl Into<String>, partition_key: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            partition_key: partition_key.into(),
            path: path.into(),
            id: None,
            data: None,
            params: None,
        }
    }

    pub fn with_id(mut self, id: Value) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }
}

/// Handles a broadcast message.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Answers a request. Errors travel back serialized.
pub type RequestHandler = Arc<dyn Fn(Request) -> Result<Value, ErrorPayload> + Send + Sync>;

/// Reacts to peers joining or leaving.
pub type PeerHandler = Arc<dyn Fn(PeerEvent) + Send + Sync>;
