//! Per partition key replica sets and the channels they keep open.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::scheduler::TaskId;
use crate::substrate::{Caller, Listener};

/// Caller/listener pair shared by every proxy of one partition key.
pub(crate) struct ChannelPair {
    pub caller: Arc<dyn Caller>,
    pub listener: Option<Arc<dyn Listener>>,
    /// Listener creation still waiting for its stagger delay.
    pub pending_listener: Option<TaskId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Joined {
    /// The key had no replica before.
    First,
    Another,
    AlreadyKnown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Left {
    /// The key has no replica anymore.
    Last,
    Remaining,
    Unknown,
}

/// Remote applications believed alive, per partition key, and the channels
/// open towards them. A key has channels only while it has replicas.
#[derive(Default)]
pub(crate) struct ReplicaTable {
    sets: BTreeMap<String, BTreeSet<String>>,
    channels: BTreeMap<String, ChannelPair>,
}

impl ReplicaTable {
    pub fn join(&mut self, key: &str, app_id: &str) -> Joined {
        let set = self.sets.entry(key.to_string()).or_default();
        let was_empty = set.is_empty();
        if !set.insert(app_id.to_string()) {
            Joined::AlreadyKnown
        } else if was_empty {
            Joined::First
        } else {
            Joined::Another
        }
    }

    pub fn leave(&mut self, key: &str, app_id: &str) -> Left {
        let Some(set) = self.sets.get_mut(key) else {
            return Left::Unknown;
        };
        if !set.remove(app_id) {
            return Left::Unknown;
        }
        if set.is_empty() {
            self.sets.remove(key);
            Left::Last
        } else {
            Left::Remaining
        }
    }

    pub fn replicas(&self, key: &str) -> usize {
        self.sets.get(key).map_or(0, BTreeSet::len)
    }

    pub fn keys(&self) -> Vec<String> {
        self.sets.keys().cloned().collect()
    }

    pub fn open(&mut self, key: &str, pair: ChannelPair) {
        self.channels.insert(key.to_string(), pair);
    }

    pub fn channels(&self, key: &str) -> Option<&ChannelPair> {
        self.channels.get(key)
    }

    pub fn channels_mut(&mut self, key: &str) -> Option<&mut ChannelPair> {
        self.channels.get_mut(key)
    }

    pub fn close(&mut self, key: &str) -> Option<ChannelPair> {
        self.channels.remove(key)
    }

    /// Forget every replica and hand back every open channel.
    pub fn drain(&mut self) -> Vec<(String, ChannelPair)> {
        self.sets.clear();
        std::mem::take(&mut self.channels).into_iter().collect()
    }
}
