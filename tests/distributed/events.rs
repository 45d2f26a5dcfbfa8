//! Replication of domain events to proxies.

use serde_json::json;
use service_mesh::app::{Hooks, MemoryService, Params, ServiceEvent, ServiceOptions};
use service_mesh::distribution::{DistributionOptions, SERVICES_DISPATCHER};

use crate::support::{config, drain, options, record, Cluster, WAIT};

#[test]
fn proxy_calls_emit_their_event_once() {
    let cluster = Cluster::new();
    let origin = cluster.node(options("users"), &["messages"]);
    let gateway = cluster.node(options("gateway"), &[]);
    cluster.settle();

    let proxy = gateway.proxy("messages");
    let remote_created = record(&proxy, "created");
    let local_created = record(&origin.app.service("messages").unwrap(), "created");

    let created = proxy
        .create(json!({ "content": "hello" }), Params::new())
        .unwrap();
    assert_eq!(created["id"], 2);

    let event = remote_created.recv_timeout(WAIT).unwrap();
    assert_eq!(event.data, created);
    assert!(remote_created.recv_timeout(WAIT).is_err());
    assert_eq!(drain(&local_created).len(), 1);
}

#[test]
fn local_changes_reach_every_gateway() {
    let cluster = Cluster::new();
    let origin = cluster.node(options("users"), &["messages"]);
    let first = cluster.node(options("gateway-1"), &[]);
    let second = cluster.node(options("gateway-2"), &[]);
    cluster.settle();

    let on_first = record(&first.proxy("messages"), "patched");
    let on_second = record(&second.proxy("messages"), "patched");

    origin
        .app
        .service("messages")
        .unwrap()
        .patch(1, json!({ "content": "edited" }), Params::new())
        .unwrap();

    for rx in [&on_first, &on_second] {
        let event = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(event.data, json!({ "id": 1, "content": "edited" }));
        assert_eq!(event.context.unwrap()["method"], "patch");
    }
}

#[test]
fn announcing_twice_forwards_events_once() {
    let cluster = Cluster::new();
    let origin = cluster.node(options("users"), &["messages"]);
    let gateway = cluster.node(options("gateway"), &[]);
    cluster.settle();
    origin.distribution.announce("messages");
    origin.distribution.announce("messages");

    let removed = record(&gateway.proxy("messages"), "removed");
    origin
        .app
        .service("messages")
        .unwrap()
        .remove(0, Params::new())
        .unwrap();

    assert!(removed.recv_timeout(WAIT).is_ok());
    assert!(removed.recv_timeout(WAIT).is_err());
}

#[test]
fn custom_events_travel_when_distributed() {
    let cluster = Cluster::new();
    let mut shared = config("users");
    shared.distributed_events.push("archived".into());

    let origin = cluster.node(DistributionOptions::new(shared.clone()), &[]);
    let archive = origin.app.use_service(
        "messages",
        MemoryService::new().with_options(ServiceOptions::default().with_event("archived")),
    );
    let gateway = cluster.node(DistributionOptions::new(shared).with_key("gateway"), &[]);
    cluster.settle();

    let proxy = gateway.proxy("messages");
    assert!(proxy.options().events.contains(&"archived".to_string()));
    let archived = record(&proxy, "archived");

    archive.emit("archived", &ServiceEvent::new(json!({ "id": 3 })));
    assert_eq!(archived.recv_timeout(WAIT).unwrap().data, json!({ "id": 3 }));
}

#[test]
fn nothing_is_replicated_when_publication_is_off() {
    let cluster = Cluster::new();
    let mut quiet = config("users");
    quiet.publish_events = false;
    let origin = cluster.node(DistributionOptions::new(quiet), &["messages"]);
    let gateway = cluster.node(options("gateway"), &[]);
    cluster.settle();

    let created = record(&gateway.proxy("messages"), "created");
    origin
        .app
        .service("messages")
        .unwrap()
        .create(json!({ "content": "unseen" }), Params::new())
        .unwrap();
    assert!(created.recv_timeout(WAIT).is_err());
}

#[test]
fn recovered_proxy_calls_emit_nothing() {
    let cluster = Cluster::new();
    let origin = cluster.node(options("users"), &["messages"]);
    let gateway = cluster.node(
        options("gateway").hooks(Hooks::new().error(|ctx| {
            ctx.error = None;
            ctx.result = Some(json!({ "id": -1, "fallback": true }));
            Ok(())
        })),
        &[],
    );
    cluster.settle();

    let proxy = gateway.proxy("messages");
    let created = record(&proxy, "created");
    cluster.network.sever(origin.id(), SERVICES_DISPATCHER);

    let result = proxy
        .create(json!({ "content": "lost" }), Params::new())
        .unwrap();
    assert_eq!(result["fallback"], true);
    assert!(created.recv_timeout(WAIT).is_err());
}
