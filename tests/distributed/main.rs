//! Distribution integration tests.

mod support;
mod events;
mod healthcheck;
mod lifecycle;
mod realtime;
mod registration;
mod scenarios;
