//! Substrate - the discovery and messaging layer under distribution
//!
//! Four component roles, each scoped by a namespace and a key:
//!
//! ```text
//! ┌──────────────┐   publish(topic)   ┌──────────────┐
//! │  Announcer   │ ─────────────────▶ │   Listener   │
//! │  on_peer()   │                    │   on(topic)  │
//! └──────────────┘                    └──────────────┘
//!
//! ┌──────────────┐   send(Request)    ┌──────────────┐
//! │    Caller    │ ─────────────────▶ │  Dispatcher  │
//! │  timeout()   │ ◀───────────────── │  on(method)  │
//! └──────────────┘   Value / error    └──────────────┘
//! ```
//!
//! A [`Substrate`] creates components. [`InMemoryNetwork`] is the included
//! implementation; networked ones (UDP discovery, TCP sockets...) plug in
//! behind the same trait.

mod announcer;
mod caller;
mod component;
mod dispatcher;
mod error;
mod in_memory;
mod listener;

use std::sync::Arc;
use std::time::Duration;

pub use announcer::Announcer;
pub use caller::Caller;
pub use component::{
    Advertisement, ComponentSpec, MessageHandler, PeerEvent, PeerHandler, Request, RequestHandler,
    Tuning,
};
pub use dispatcher::Dispatcher;
pub use error::SubstrateError;
pub use in_memory::{ComponentStats, InMemoryNetwork};
pub use listener::Listener;

/// Factory for substrate components.
///
/// Every component takes a port from `[tuning.base_port, tuning.highest_port]`
/// and gives it back when closed.
pub trait Substrate: Send + Sync {
    fn announcer(&self, spec: ComponentSpec, tuning: &Tuning) -> Result<Arc<dyn Announcer>, SubstrateError>;

    fn listener(&self, spec: ComponentSpec, tuning: &Tuning) -> Result<Arc<dyn Listener>, SubstrateError>;

    fn caller(
        &self,
        spec: ComponentSpec,
        tuning: &Tuning,
        timeout: Duration,
    ) -> Result<Arc<dyn Caller>, SubstrateError>;

    fn dispatcher(&self, spec: ComponentSpec, tuning: &Tuning) -> Result<Arc<dyn Dispatcher>, SubstrateError>;
}
