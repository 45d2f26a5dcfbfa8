//! Reachability of the proxies serving a partition key.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{Distribution, RemoteService};
use crate::app::{ErrorPayload, ServiceError};

/// Outcome of probing every proxy of a key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthReport {
    /// Local path of each probed proxy and whether it answered.
    pub services: BTreeMap<String, bool>,
    pub errors: Vec<ErrorPayload>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.errors.is_empty() && self.services.values().all(|ok| *ok)
    }

    pub fn status_code(&self) -> u16 {
        if self.is_healthy() {
            200
        } else {
            503
        }
    }

    /// `{ "<path>": bool, ... }`, plus `errors` when a probe failed.
    pub fn to_json(&self) -> Value {
        let mut body: Map<String, Value> = self
            .services
            .iter()
            .map(|(path, ok)| (path.clone(), Value::Bool(*ok)))
            .collect();
        if !self.errors.is_empty() {
            let errors = self
                .errors
                .iter()
                .filter_map(|err| serde_json::to_value(err).ok())
                .collect();
            body.insert("errors".into(), Value::Array(errors));
        }
        Value::Object(body)
    }
}

impl Distribution {
    /// Probe the proxies of `key`, or of every remote key when `key` is
    /// this application's own key or `None`.
    ///
    /// Probes run in parallel. A key without any proxy is `NotFound`. When
    /// a probe fails the error is `Unavailable` and its data carries the
    /// full report.
    pub fn healthcheck(&self, key: Option<&str>) -> Result<HealthReport, ServiceError> {
        let key = key.filter(|k| !k.is_empty()).unwrap_or_else(|| self.key());
        let everything = key == self.key();

        let proxies: Vec<(String, Arc<RemoteService>)> = self
            .app
            .all_services()
            .into_iter()
            .filter_map(|service| {
                let proxy = service.remote()?.clone();
                (everything || proxy.key() == key).then(|| (service.path().to_string(), proxy))
            })
            .collect();

        if proxies.is_empty() && !everything {
            debug!(
                target: "service_mesh::healthcheck",
                app = %self.identity,
                key,
                "no remote service for key"
            );
            return Err(ServiceError::NotFound(format!(
                "No remote services found for key {}",
                key
            )));
        }

        let outcomes: Vec<(String, Result<Value, ServiceError>)> = thread::scope(|scope| {
            let probes: Vec<_> = proxies
                .iter()
                .map(|(path, proxy)| (path, scope.spawn(move || proxy.healthcheck())))
                .collect();
            probes
                .into_iter()
                .map(|(path, probe)| {
                    let outcome = probe.join().unwrap_or_else(|_| {
                        Err(ServiceError::General(format!("Healthcheck of {} panicked", path)))
                    });
                    (path.clone(), outcome)
                })
                .collect()
        });

        let mut report = HealthReport::default();
        for (path, outcome) in outcomes {
            match outcome {
                Ok(_) => {
                    report.services.insert(path, true);
                }
                Err(err) => {
                    warn!(
                        target: "service_mesh::healthcheck",
                        app = %self.identity,
                        path = %path,
                        error = %err,
                        "remote service failed healthcheck"
                    );
                    report.services.insert(path, false);
                    report.errors.push(err.to_payload());
                }
            }
        }

        debug!(
            target: "service_mesh::healthcheck",
            app = %self.identity,
            key,
            services = report.services.len(),
            failures = report.errors.len(),
            "healthcheck done"
        );
        if report.is_healthy() {
            Ok(report)
        } else {
            Err(ServiceError::Unavailable {
                message: format!("Unavailable remote services for key {}", key),
                data: Some(report.to_json()),
            })
        }
    }
}
