//! Initialization modes, staggering, heartbeat and shutdown.

use std::time::Duration;

use service_mesh::app::Params;
use service_mesh::distribution::{
    DistributionOptions, SERVICES_ANNOUNCER, SERVICES_CALLER, SERVICES_DISPATCHER,
    SERVICES_LISTENER, SERVICES_NAMESPACE, SERVICE_EVENTS_ANNOUNCER, SERVICE_EVENTS_LISTENER,
};
use service_mesh::DistributionError;

use crate::support::{config, options, Cluster};

#[test]
fn deferred_initialization_waits_for_its_delay() {
    let cluster = Cluster::new();
    let mut deferred = config("users");
    deferred.cote_delay = Some(5_000);
    let origin = cluster.node(DistributionOptions::new(deferred), &["messages"]);
    let gateway = cluster.node(options("gateway"), &[]);
    cluster.settle();

    assert!(!origin.distribution.is_initialized());
    assert!(gateway.app.service("messages").is_none());

    cluster.scheduler.advance(Duration::from_millis(5_000));
    assert!(origin.distribution.is_initialized());
    cluster.settle();
    assert!(gateway.proxy("messages").find(Params::new()).is_ok());
}

#[test]
fn negative_delay_leaves_initialization_to_the_caller() {
    let cluster = Cluster::new();
    let mut manual = config("users");
    manual.cote_delay = Some(-1);
    let origin = cluster.node(DistributionOptions::new(manual), &["messages"]);

    assert_eq!(cluster.scheduler.pending(), 0);
    assert!(!origin.distribution.is_initialized());

    origin.distribution.initialize().unwrap();
    assert!(origin.distribution.is_initialized());
    assert!(matches!(
        origin.distribution.initialize(),
        Err(DistributionError::AlreadyInitialized)
    ));
}

#[test]
fn components_are_created_with_pauses_between_them() {
    let cluster = Cluster::new();
    let mut staggered = config("users");
    staggered.component_delay = 1_000;
    let _origin = cluster.node(DistributionOptions::new(staggered.clone()), &["messages"]);
    assert_eq!(cluster.scheduler.paused(), Duration::from_millis(3_000));

    staggered.publish_events = false;
    staggered.key = "quiet".into();
    let _quiet = cluster.node(DistributionOptions::new(staggered), &[]);
    assert_eq!(cluster.scheduler.paused(), Duration::from_millis(5_000));
}

#[test]
fn event_listener_opens_after_the_component_delay() {
    let cluster = Cluster::new();
    let _origin = cluster.node(options("users"), &["messages"]);
    let mut staggered = config("gateway");
    staggered.component_delay = 1_000;
    let _gateway = cluster.node(DistributionOptions::new(staggered), &[]);

    assert_eq!(cluster.network.stats(SERVICES_CALLER, "users").alive(), 1);
    assert_eq!(cluster.network.stats(SERVICE_EVENTS_LISTENER, "users").created, 0);

    cluster.scheduler.advance(Duration::from_millis(1_000));
    assert_eq!(cluster.network.stats(SERVICE_EVENTS_LISTENER, "users").alive(), 1);
}

#[test]
fn heartbeat_announces_again() {
    let cluster = Cluster::new();
    let mut beating = config("users");
    beating.heartbeat_interval = Some(1_000);
    let _origin = cluster.node(DistributionOptions::new(beating), &["messages"]);
    let gateway = cluster.node(options("gateway"), &[]);
    cluster.settle();

    gateway.app.unuse_service("messages");
    assert!(gateway.app.service("messages").is_none());

    cluster.scheduler.advance(Duration::from_millis(1_000));
    assert!(gateway.proxy("messages").find(Params::new()).is_ok());
}

#[test]
fn announcements_are_debounced() {
    let cluster = Cluster::new();
    let mut slow = config("users");
    slow.publication_delay = 10_000;
    let origin = cluster.node(DistributionOptions::new(slow), &["messages"]);
    let gateway = cluster.node(options("gateway"), &[]);

    origin.distribution.announce_all();
    origin.distribution.announce_all();
    cluster.scheduler.advance(Duration::from_millis(9_999));
    assert!(gateway.app.service("messages").is_none());

    cluster.scheduler.advance(Duration::from_millis(1));
    assert!(gateway.proxy("messages").find(Params::new()).is_ok());
}

#[test]
fn finalize_releases_everything_once() {
    let cluster = Cluster::new();
    let origin = cluster.node(options("users"), &["messages"]);
    let gateway = cluster.node(options("gateway"), &[]);
    cluster.settle();

    gateway.distribution.finalize();
    gateway.distribution.finalize();
    origin.distribution.finalize();

    for (name, key) in [
        (SERVICES_LISTENER, SERVICES_NAMESPACE),
        (SERVICES_ANNOUNCER, SERVICES_NAMESPACE),
        (SERVICE_EVENTS_ANNOUNCER, "users"),
        (SERVICES_DISPATCHER, "users"),
        (SERVICES_CALLER, "users"),
        (SERVICE_EVENTS_LISTENER, "users"),
    ] {
        let stats = cluster.network.stats(name, key);
        assert!(stats.created > 0, "{name} was never created");
        assert_eq!(stats.alive(), 0, "{name} still alive");
    }
    assert!(cluster.network.is_empty());
    assert_eq!(cluster.scheduler.pending(), 0);
    assert!(matches!(
        gateway.distribution.initialize(),
        Err(DistributionError::Finalized)
    ));
}

#[test]
fn dropping_a_distribution_makes_it_leave() {
    let cluster = Cluster::new();
    let origin = cluster.node(options("users"), &["messages"]);
    let gateway = cluster.node(options("gateway"), &[]);
    cluster.settle();
    assert!(gateway.app.service("messages").is_some());

    drop(origin);

    assert!(gateway.app.service("messages").is_none());
    assert!(gateway.distribution.remote_keys().is_empty());
}

#[test]
fn finalize_cancels_a_deferred_initialization() {
    let cluster = Cluster::new();
    let mut deferred = config("users");
    deferred.cote_delay = Some(1_000);
    let origin = cluster.node(DistributionOptions::new(deferred), &[]);
    assert_eq!(cluster.scheduler.pending(), 1);

    origin.distribution.finalize();
    assert_eq!(cluster.scheduler.pending(), 0);
    cluster.scheduler.advance(Duration::from_millis(1_000));
    assert!(!origin.distribution.is_initialized());
}
