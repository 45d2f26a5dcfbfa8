//! One gateway in front of two replicas of a messages service, losing them
//! one after the other.

use service_mesh::app::{MethodCall, Params, ServiceError};
use service_mesh::distribution::{
    ServiceDescriptor, ServiceFilter, SERVICES_LISTENER, SERVICE_REMOVED_EVENT,
};

use crate::support::{drain, options, record_app, Cluster, Node};

fn network() -> (Cluster, Node, Node, Node) {
    let cluster = Cluster::new();
    let only_messages = || ServiceFilter::predicate(|d| d.path.ends_with("messages"));

    let gateway = cluster.node(options("app").services(only_messages()), &[]);
    let first = cluster.node(options("messages").services(only_messages()), &["messages", "internal"]);
    let second = cluster.node(options("messages").services(only_messages()), &["messages", "internal"]);
    cluster.settle();
    (cluster, gateway, first, second)
}

#[test]
fn remote_service_is_accessible() {
    let (_cluster, gateway, _first, _second) = network();

    let messages = gateway.proxy("messages").find(Params::new()).unwrap();
    assert!(!messages.as_array().unwrap().is_empty());
    assert!(gateway.app.service("internal").is_none());
    assert_eq!(gateway.distribution.replicas("messages"), 2);
}

#[test]
fn calls_are_spread_over_replicas() {
    let (_cluster, gateway, first, second) = network();
    let proxy = gateway.proxy("messages");

    for _ in 0..4 {
        proxy
            .create(serde_json::json!({ "content": "spread" }), Params::new())
            .unwrap();
    }

    let count = |node: &Node| {
        node.app
            .service("messages")
            .unwrap()
            .find(Params::new())
            .unwrap()
            .as_array()
            .unwrap()
            .len()
    };
    assert_eq!(count(&first), 4);
    assert_eq!(count(&second), 4);
}

#[test]
fn remote_service_survives_partial_failure() {
    let (cluster, gateway, first, _second) = network();

    assert_eq!(cluster.network.sever(first.id(), SERVICES_LISTENER), 1);

    assert_eq!(gateway.distribution.replicas("messages"), 1);
    let messages = gateway.proxy("messages").find(Params::new()).unwrap();
    assert!(!messages.as_array().unwrap().is_empty());
    assert!(gateway.distribution.healthcheck(Some("messages")).is_ok());
}

#[test]
fn remote_service_is_gone_after_complete_failure() {
    let (cluster, gateway, first, second) = network();
    let removed = record_app::<ServiceDescriptor>(&gateway.app, SERVICE_REMOVED_EVENT);

    cluster.network.sever(first.id(), SERVICES_LISTENER);
    cluster.network.sever(second.id(), SERVICES_LISTENER);

    assert!(gateway.app.service("messages").is_none());
    let err = gateway
        .app
        .handle("messages", MethodCall::find(Params::new()), "rest")
        .unwrap_err();
    assert_eq!(err, ServiceError::NotFound("Can not find service 'messages'".into()));

    let err = gateway.distribution.healthcheck(Some("messages")).unwrap_err();
    assert_eq!(err.status_code(), 404);

    let removed = drain(&removed);
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].path, "messages");
    assert!(gateway.distribution.remote_keys().iter().all(|key| key != "messages"));
}

#[test]
fn a_returning_replica_is_proxied_again() {
    let (cluster, gateway, first, second) = network();
    cluster.network.sever(first.id(), SERVICES_LISTENER);
    cluster.network.sever(second.id(), SERVICES_LISTENER);
    assert!(gateway.app.service("messages").is_none());

    let _third = cluster.node(options("messages"), &["messages"]);
    cluster.settle();

    assert_eq!(gateway.proxy("messages").remote().unwrap().key(), "messages");
    assert!(gateway.proxy("messages").find(Params::new()).is_ok());
}
