//! The same convergence, on a real clock with a background scheduler thread.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;
use service_mesh::app::{Application, Params};
use service_mesh::distribution::{Distribution, DistributionOptions, SERVICE_EVENTS_LISTENER};
use service_mesh::scheduler::ThreadScheduler;
use service_mesh::substrate::InMemoryNetwork;

use crate::support::{config, init_tracing, messages, record, WAIT};

fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

fn distribute(
    network: &Arc<InMemoryNetwork>,
    scheduler: &Arc<ThreadScheduler>,
    key: &str,
    app: Application,
) -> Arc<Distribution> {
    let mut config = config(key);
    config.publication_delay = 20;
    config.component_delay = 20;
    Distribution::new(app, DistributionOptions::new(config), network.clone(), scheduler.clone())
        .unwrap()
}

#[test]
fn applications_converge_with_real_timers() {
    init_tracing();
    let network = Arc::new(InMemoryNetwork::new());
    let scheduler = Arc::new(ThreadScheduler::new());

    let origin_app = Application::new();
    origin_app.use_service("messages", messages());
    let origin = distribute(&network, &scheduler, "users", origin_app.clone());
    let gateway_app = Application::new();
    let gateway = distribute(&network, &scheduler, "gateway", gateway_app.clone());

    eventually("the proxy", || gateway_app.service("messages").is_some());
    let proxy = gateway_app.service("messages").unwrap();
    assert!(proxy.is_remote());
    assert_eq!(proxy.find(Params::new()).unwrap().as_array().unwrap().len(), 2);

    eventually("the event listener", || {
        network.stats(SERVICE_EVENTS_LISTENER, "users").alive() == 1
    });
    let created = record(&proxy, "created");
    origin_app
        .service("messages")
        .unwrap()
        .create(json!({ "content": "live" }), Params::new())
        .unwrap();
    assert_eq!(created.recv_timeout(WAIT).unwrap().data["content"], "live");

    drop(origin);
    eventually("the proxy removal", || gateway_app.service("messages").is_none());
    assert!(gateway.remote_keys().is_empty());
}
