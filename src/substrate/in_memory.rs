//! In-process substrate for tests and single-process deployments.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serde_json::Value;

use super::component::{
    Advertisement, ComponentSpec, MessageHandler, PeerEvent, PeerHandler, Request, RequestHandler,
    Tuning,
};
use super::error::SubstrateError;
use super::{Announcer, Caller, Dispatcher, Listener, Substrate};

/// Lifetime counters for one component name on one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComponentStats {
    pub created: usize,
    pub closed: usize,
}

impl ComponentStats {
    pub fn alive(&self) -> usize {
        self.created - self.closed
    }
}

enum Role {
    Announcer { peers: Vec<PeerHandler> },
    Listener { topics: HashMap<String, Vec<MessageHandler>> },
    Caller,
    Dispatcher { methods: HashMap<String, RequestHandler> },
}

struct Entry {
    spec: ComponentSpec,
    port: u16,
    log: bool,
    role: Role,
}

impl Entry {
    fn shares_scope(&self, other: &ComponentSpec) -> bool {
        self.spec.namespace == other.namespace && self.spec.key == other.key
    }
}

#[derive(Default)]
struct Hub {
    next_id: u64,
    entries: BTreeMap<u64, Entry>,
    ports: BTreeSet<u16>,
    cursors: HashMap<(String, String, String), usize>,
    stats: HashMap<(String, String), ComponentStats>,
}

impl Hub {
    /// Discovery handlers of every announcer except `except`.
    fn peer_watchers(&self, except: u64) -> Vec<PeerHandler> {
        self.entries
            .iter()
            .filter(|(id, _)| **id != except)
            .filter_map(|(_, entry)| match &entry.role {
                Role::Announcer { peers } => Some(peers.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// In-process network hub.
///
/// Every component created from the same network (or a clone of it) can
/// reach the others. Delivery is synchronous for broadcasts; requests run
/// the dispatcher's handler on its own thread so the caller's timeout
/// applies. A handler that outlives the timeout still runs to completion;
/// its answer is dropped. Handlers are always invoked with the hub
/// unlocked, so they may create or close components themselves.
///
/// Among dispatchers able to answer a request, one is picked round-robin.
/// Dispatchers advertised by the caller's own application are skipped.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use serde_json::json;
/// use service_mesh::substrate::{
///     Caller, ComponentSpec, Dispatcher, InMemoryNetwork, Request, Substrate, Tuning,
/// };
///
/// let network = InMemoryNetwork::new();
/// let tuning = Tuning::default();
///
/// let dispatcher = network
///     .dispatcher(ComponentSpec::new("responder", "ns", "ns").with_topics(["ping"]), &tuning)
///     .unwrap();
/// dispatcher.on("ping", Arc::new(|_req| Ok(json!("pong"))));
///
/// let caller = network
///     .caller(ComponentSpec::new("requester", "ns", "ns"), &tuning, Duration::from_secs(1))
///     .unwrap();
/// assert_eq!(caller.send(Request::new("ping", "ns", "")).unwrap(), json!("pong"));
/// ```
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counters for components named `name` on `key`.
    pub fn stats(&self, name: &str, key: &str) -> ComponentStats {
        self.lock()
            .stats
            .get(&(name.to_string(), key.to_string()))
            .copied()
            .unwrap_or_default()
    }

    /// Number of open components.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force-close the components named `name` advertised by `app_id`, as if
    /// their peers had timed out. Returns how many were closed.
    pub fn sever(&self, app_id: &str, name: &str) -> usize {
        let ids = self.matching(|spec| spec.app_id.as_deref() == Some(app_id) && spec.name == name);
        ids.iter().for_each(|id| self.close(*id));
        ids.len()
    }

    /// Force-close every component advertised by `app_id`.
    pub fn disconnect(&self, app_id: &str) -> usize {
        let ids = self.matching(|spec| spec.app_id.as_deref() == Some(app_id));
        ids.iter().for_each(|id| self.close(*id));
        ids.len()
    }

    fn matching(&self, predicate: impl Fn(&ComponentSpec) -> bool) -> Vec<u64> {
        self.lock()
            .entries
            .iter()
            .filter(|(_, entry)| predicate(&entry.spec))
            .map(|(id, _)| *id)
            .collect()
    }

    fn register(&self, spec: ComponentSpec, tuning: &Tuning, role: Role) -> Result<Handle, SubstrateError> {
        let (id, watchers) = {
            let mut hub = self.lock();
            let port = (tuning.base_port..=tuning.highest_port)
                .find(|port| !hub.ports.contains(port))
                .ok_or(SubstrateError::PortsExhausted {
                    base: tuning.base_port,
                    highest: tuning.highest_port,
                })?;
            hub.ports.insert(port);
            hub.next_id += 1;
            let id = hub.next_id;
            hub.stats
                .entry((spec.name.clone(), spec.key.clone()))
                .or_default()
                .created += 1;
            let watchers = if spec.app_id.is_some() {
                hub.peer_watchers(id)
            } else {
                Vec::new()
            };
            if tuning.log {
                tracing::info!(
                    target: "service_mesh::substrate",
                    name = %spec.name,
                    namespace = %spec.namespace,
                    key = %spec.key,
                    port,
                    "component up"
                );
            }
            hub.entries.insert(
                id,
                Entry {
                    spec: spec.clone(),
                    port,
                    log: tuning.log,
                    role,
                },
            );
            (id, watchers)
        };

        let advertisement = spec.advertisement();
        for watcher in watchers {
            watcher(PeerEvent::Joined(advertisement.clone()));
        }

        Ok(Handle {
            id,
            name: spec.name,
            network: self.clone(),
        })
    }

    fn close(&self, id: u64) {
        // The entry's handlers may own components; drop them after unlocking.
        let Some(entry) = self.lock().entries.remove(&id) else {
            return;
        };
        let watchers = {
            let mut hub = self.lock();
            hub.ports.remove(&entry.port);
            hub.stats
                .entry((entry.spec.name.clone(), entry.spec.key.clone()))
                .or_default()
                .closed += 1;
            if entry.log {
                tracing::info!(
                    target: "service_mesh::substrate",
                    name = %entry.spec.name,
                    key = %entry.spec.key,
                    port = entry.port,
                    "component down"
                );
            }
            if entry.spec.app_id.is_some() {
                hub.peer_watchers(id)
            } else {
                Vec::new()
            }
        };

        let advertisement = entry.spec.advertisement();
        drop(entry);
        for watcher in watchers {
            watcher(PeerEvent::Left(advertisement.clone()));
        }
    }

    fn watch_peers(&self, id: u64, handler: PeerHandler) {
        let present: Vec<Advertisement> = {
            let mut hub = self.lock();
            match hub.entries.get_mut(&id).map(|entry| &mut entry.role) {
                Some(Role::Announcer { peers }) => peers.push(handler.clone()),
                _ => return,
            }
            hub.entries
                .iter()
                .filter(|(other, entry)| **other != id && entry.spec.app_id.is_some())
                .map(|(_, entry)| entry.spec.advertisement())
                .collect()
        };

        for advertisement in present {
            handler(PeerEvent::Joined(advertisement));
        }
    }

    fn broadcast(&self, handle: &Handle, topic: &str, payload: Value) -> Result<(), SubstrateError> {
        let handlers: Vec<MessageHandler> = {
            let hub = self.lock();
            let sender = hub
                .entries
                .get(&handle.id)
                .ok_or_else(|| SubstrateError::Closed(handle.name.clone()))?;
            hub.entries
                .values()
                .filter(|entry| entry.shares_scope(&sender.spec))
                .filter_map(|entry| match &entry.role {
                    Role::Listener { topics } => topics.get(topic).cloned(),
                    _ => None,
                })
                .flatten()
                .collect()
        };

        for handler in handlers {
            handler(payload.clone());
        }
        Ok(())
    }

    fn subscribe(&self, id: u64, topic: &str, handler: MessageHandler) {
        if let Some(Role::Listener { topics }) = self.lock().entries.get_mut(&id).map(|e| &mut e.role) {
            topics.entry(topic.to_string()).or_default().push(handler);
        }
    }

    fn answer(&self, id: u64, method: &str, handler: RequestHandler) {
        if let Some(Role::Dispatcher { methods }) = self.lock().entries.get_mut(&id).map(|e| &mut e.role) {
            methods.insert(method.to_string(), handler);
        }
    }

    fn route(&self, handle: &Handle, method: &str) -> Result<RequestHandler, SubstrateError> {
        let mut hub = self.lock();
        let caller = hub
            .entries
            .get(&handle.id)
            .ok_or_else(|| SubstrateError::Closed(handle.name.clone()))?;
        let scope = caller.spec.clone();

        let candidates: Vec<RequestHandler> = hub
            .entries
            .values()
            .filter(|entry| entry.shares_scope(&scope))
            .filter(|entry| scope.app_id.is_none() || entry.spec.app_id != scope.app_id)
            .filter_map(|entry| match &entry.role {
                Role::Dispatcher { methods } => methods.get(method).cloned(),
                _ => None,
            })
            .collect();

        if candidates.is_empty() {
            return Err(SubstrateError::Unreachable {
                namespace: scope.namespace,
                key: scope.key,
                method: method.to_string(),
            });
        }

        let cursor = hub
            .cursors
            .entry((scope.namespace, scope.key, method.to_string()))
            .or_insert(0);
        let chosen = candidates[*cursor % candidates.len()].clone();
        *cursor = cursor.wrapping_add(1);
        Ok(chosen)
    }
}

impl Substrate for InMemoryNetwork {
    fn announcer(&self, spec: ComponentSpec, tuning: &Tuning) -> Result<Arc<dyn Announcer>, SubstrateError> {
        let handle = self.register(spec, tuning, Role::Announcer { peers: Vec::new() })?;
        Ok(Arc::new(MemoryAnnouncer(handle)))
    }

    fn listener(&self, spec: ComponentSpec, tuning: &Tuning) -> Result<Arc<dyn Listener>, SubstrateError> {
        let handle = self.register(
            spec,
            tuning,
            Role::Listener {
                topics: HashMap::new(),
            },
        )?;
        Ok(Arc::new(MemoryListener(handle)))
    }

    fn caller(
        &self,
        spec: ComponentSpec,
        tuning: &Tuning,
        timeout: Duration,
    ) -> Result<Arc<dyn Caller>, SubstrateError> {
        let handle = self.register(spec, tuning, Role::Caller)?;
        Ok(Arc::new(MemoryCaller { handle, timeout }))
    }

    fn dispatcher(&self, spec: ComponentSpec, tuning: &Tuning) -> Result<Arc<dyn Dispatcher>, SubstrateError> {
        let handle = self.register(
            spec,
            tuning,
            Role::Dispatcher {
                methods: HashMap::new(),
            },
        )?;
        Ok(Arc::new(MemoryDispatcher(handle)))
    }
}

/// A registered component; closes itself when dropped.
struct Handle {
    id: u64,
    name: String,
    network: InMemoryNetwork,
}

impl Handle {
    fn close(&self) {
        self.network.close(self.id);
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.close();
    }
}

struct MemoryAnnouncer(Handle);

impl Announcer for MemoryAnnouncer {
    fn publish(&self, topic: &str, payload: Value) -> Result<(), SubstrateError> {
        self.0.network.broadcast(&self.0, topic, payload)
    }

    fn on_peer(&self, handler: PeerHandler) {
        self.0.network.watch_peers(self.0.id, handler);
    }

    fn close(&self) {
        self.0.close();
    }
}

struct MemoryListener(Handle);

impl Listener for MemoryListener {
    fn on(&self, topic: &str, handler: MessageHandler) {
        self.0.network.subscribe(self.0.id, topic, handler);
    }

    fn close(&self) {
        self.0.close();
    }
}

struct MemoryCaller {
    handle: Handle,
    timeout: Duration,
}

impl Caller for MemoryCaller {
    fn send(&self, request: Request) -> Result<Value, SubstrateError> {
        let handler = self.handle.network.route(&self.handle, &request.method)?;
        let method = request.method.clone();

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(handler(request));
        });

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(SubstrateError::Remote(payload)),
            Err(RecvTimeoutError::Timeout) => Err(SubstrateError::Timeout(self.timeout.as_millis() as u64)),
            // the handler thread panicked
            Err(RecvTimeoutError::Disconnected) => Err(SubstrateError::Unreachable {
                namespace: String::new(),
                key: String::new(),
                method,
            }),
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn close(&self) {
        self.handle.close();
    }
}

struct MemoryDispatcher(Handle);

impl Dispatcher for MemoryDispatcher {
    fn on(&self, method: &str, handler: RequestHandler) {
        self.0.network.answer(self.0.id, method, handler);
    }

    fn close(&self) {
        self.0.close();
    }
}
