pub mod app;
pub mod distribution;
mod error;
pub mod scheduler;
pub mod substrate;

#[cfg(feature = "http")]
pub mod http;

pub use app::{Application, MemoryService, Params, Service, ServiceError, ServiceRef};
pub use distribution::{
    Distribution, DistributionConfig, DistributionOptions, HealthReport, RemoteService,
    ServiceFilter,
};
pub use error::DistributionError;
pub use scheduler::{ManualScheduler, Scheduler, ThreadScheduler};
pub use substrate::{InMemoryNetwork, Substrate, SubstrateError, Tuning};
