//! Discovery, proxy installation and replica tracking.

use serde_json::json;
use service_mesh::app::{MemoryService, Params, ServiceOptions};
use service_mesh::distribution::{
    ApplicationDescriptor, ServiceDescriptor, SERVICES_CALLER, SERVICES_NAMESPACE,
    SERVICE_ADDED_EVENT, SERVICE_EVENTS_LISTENER, SERVICE_REMOVED_EVENT, SERVICE_TOPIC,
};
use service_mesh::substrate::{ComponentSpec, Substrate, Tuning};

use crate::support::{drain, options, record_app, Cluster};

#[test]
fn remote_service_answers_like_the_local_one() {
    let cluster = Cluster::new();
    let origin = cluster.node(options("widgets-app"), &[]);
    let widgets = origin.app.use_service(
        "widgets",
        MemoryService::new()
            .with_records([json!({ "id": 7, "name": "sprocket" })])
            .with_options(ServiceOptions {
                methods: vec!["find".into(), "get".into()],
                ..Default::default()
            }),
    );
    let gateway = cluster.node(options("gateway"), &[]);
    cluster.settle();

    let proxy = gateway.proxy("widgets");
    assert_eq!(
        proxy.find(Params::new()).unwrap(),
        widgets.find(Params::new()).unwrap()
    );
    assert_eq!(proxy.get(7, Params::new()).unwrap(), json!({ "id": 7, "name": "sprocket" }));
    assert_eq!(proxy.options().methods, vec!["find", "get"]);
}

#[test]
fn remote_errors_surface_unchanged() {
    let cluster = Cluster::new();
    let _origin = cluster.node(options("users"), &["messages"]);
    let gateway = cluster.node(options("gateway"), &[]);
    cluster.settle();

    let err = gateway.proxy("messages").get(42, Params::new()).unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert_eq!(err.message(), "No record found for id '42'");
}

#[test]
fn own_services_are_never_proxied() {
    let cluster = Cluster::new();
    let a = cluster.node(options("default"), &["messages"]);
    let b = cluster.node(options("default"), &["messages"]);
    cluster.settle();

    assert!(!a.app.service("messages").unwrap().is_remote());
    assert!(!b.app.service("messages").unwrap().is_remote());
    // each only counts the other as a replica of the shared key
    assert_eq!(a.distribution.replicas("default"), 1);
    assert_eq!(b.distribution.replicas("default"), 1);
}

#[test]
fn repeated_announcements_install_one_proxy() {
    let cluster = Cluster::new();
    let origin = cluster.node(options("users"), &["messages"]);
    let gateway = cluster.node(options("gateway"), &[]);
    let added = record_app::<ServiceDescriptor>(&gateway.app, SERVICE_ADDED_EVENT);
    cluster.settle();

    origin.distribution.announce("messages");
    origin.distribution.announce("messages");
    origin.distribution.announce_all();
    cluster.settle();

    let added = drain(&added);
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].path, "messages");
    assert_eq!(added[0].partition_key, "users");
    assert_eq!(gateway.app.paths(), vec!["messages"]);
}

#[test]
fn channels_live_while_the_key_has_replicas() {
    let cluster = Cluster::new();
    let gateway = cluster.node(options("gateway"), &[]);
    let first = ApplicationDescriptor::new("replica-1", "users");
    let second = ApplicationDescriptor::new("replica-2", "users");

    gateway.distribution.register_application(&first);
    gateway.distribution.register_application(&second);
    gateway.distribution.register_application(&first);
    let callers = cluster.network.stats(SERVICES_CALLER, "users");
    assert_eq!((callers.created, callers.closed), (1, 0));
    assert_eq!(cluster.network.stats(SERVICE_EVENTS_LISTENER, "users").alive(), 1);
    assert_eq!(gateway.distribution.replicas("users"), 2);

    gateway.distribution.unregister_application(&first);
    gateway.distribution.unregister_application(&first);
    assert_eq!(cluster.network.stats(SERVICES_CALLER, "users").alive(), 1);

    gateway.distribution.unregister_application(&second);
    let callers = cluster.network.stats(SERVICES_CALLER, "users");
    assert_eq!((callers.created, callers.closed), (1, 1));
    assert_eq!(cluster.network.stats(SERVICE_EVENTS_LISTENER, "users").alive(), 0);
    assert!(gateway.distribution.remote_keys().is_empty());

    gateway
        .distribution
        .register_application(&ApplicationDescriptor::new("replica-3", "users"));
    assert_eq!(cluster.network.stats(SERVICES_CALLER, "users").created, 2);
}

#[test]
fn start_order_does_not_matter() {
    let cluster = Cluster::new();
    let early_gateway = cluster.node(options("gateway-1"), &[]);
    let origin = cluster.node(options("users"), &["users", "messages"]);
    let late_gateway = cluster.node(options("gateway-2"), &[]);
    cluster.settle();

    for gateway in [&early_gateway, &late_gateway] {
        assert_eq!(gateway.app.paths(), vec!["messages", "users"]);
        assert_eq!(gateway.proxy("users").find(Params::new()).unwrap().as_array().unwrap().len(), 2);
    }
    assert!(origin.app.all_services().iter().all(|s| !s.is_remote()));
}

#[test]
fn services_registered_later_follow_the_application() {
    let cluster = Cluster::new();
    let origin = cluster.node(options("users"), &[]);
    let gateway = cluster.node(options("gateway"), &[]);
    let removed = record_app::<ServiceDescriptor>(&gateway.app, SERVICE_REMOVED_EVENT);
    cluster.settle();
    assert!(gateway.app.service("late").is_none());

    origin.app.use_service("late", MemoryService::new());
    assert!(gateway.proxy("late").find(Params::new()).is_ok());

    origin.app.unuse_service("late");
    assert!(gateway.app.service("late").is_none());
    let removed = drain(&removed);
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].path, "late");
}

#[test]
fn withdrawal_by_another_key_keeps_the_proxy() {
    let cluster = Cluster::new();
    let _origin = cluster.node(options("users"), &["messages"]);
    let gateway = cluster.node(options("gateway"), &[]);
    cluster.settle();
    let other = cluster.node(options("other"), &["messages"]);
    cluster.settle();
    assert_eq!(gateway.proxy("messages").remote().unwrap().key(), "users");

    other.app.unuse_service("messages");

    let proxy = gateway.proxy("messages");
    assert_eq!(proxy.remote().unwrap().key(), "users");
    assert!(proxy.find(Params::new()).is_ok());
}

#[test]
fn services_without_a_path_stay_local() {
    let cluster = Cluster::new();
    let origin = cluster.node(options("users"), &["messages"]);
    origin.app.use_service("/", MemoryService::new());
    let gateway = cluster.node(options("gateway"), &[]);
    cluster.settle();

    assert_eq!(gateway.app.paths(), vec!["messages"]);

    origin.app.unuse_service("/");
    assert!(gateway.app.service("messages").is_some());
}

#[test]
fn descriptors_without_a_path_are_ignored() {
    let cluster = Cluster::new();
    let gateway = cluster.node(options("gateway"), &[]);
    cluster.settle();

    let announcer = cluster
        .network
        .announcer(
            ComponentSpec::new("rogue announcer", SERVICES_NAMESPACE, SERVICES_NAMESPACE)
                .with_topics([SERVICE_TOPIC]),
            &Tuning::default(),
        )
        .unwrap();
    let descriptor = ServiceDescriptor::describe("rogue", "users", "", &ServiceOptions::default());
    announcer
        .publish(SERVICE_TOPIC, serde_json::to_value(&descriptor).unwrap())
        .unwrap();

    assert!(gateway.app.paths().is_empty());
    assert_eq!(gateway.distribution.replicas("users"), 0);
}
