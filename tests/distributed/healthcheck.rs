//! Healthcheck aggregation over proxies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use service_mesh::app::ServiceError;
use service_mesh::distribution::{ServiceFilter, SERVICES_DISPATCHER};

use crate::support::{options, Cluster};

#[test]
fn healthy_key_reports_each_proxy() {
    let cluster = Cluster::new();
    let _origin = cluster.node(options("users"), &["users", "messages"]);
    let gateway = cluster.node(options("gateway"), &[]);
    cluster.settle();

    let report = gateway.distribution.healthcheck(Some("users")).unwrap();
    assert!(report.is_healthy());
    assert_eq!(report.services.len(), 2);
    assert_eq!(report.services["users"], true);
    assert_eq!(report.services["messages"], true);
}

#[test]
fn own_key_covers_every_remote_key() {
    let cluster = Cluster::new();
    let _users = cluster.node(options("users"), &["users"]);
    let _posts = cluster.node(options("posts"), &["posts"]);
    let gateway = cluster.node(options("gateway"), &[]);
    cluster.settle();

    let by_own_key = gateway.distribution.healthcheck(Some("gateway")).unwrap();
    let by_default = gateway.distribution.healthcheck(None).unwrap();
    assert_eq!(by_own_key, by_default);
    assert_eq!(by_own_key.services.keys().collect::<Vec<_>>(), vec!["posts", "users"]);

    let only_posts = gateway.distribution.healthcheck(Some("posts")).unwrap();
    assert_eq!(only_posts.services.keys().collect::<Vec<_>>(), vec!["posts"]);
}

#[test]
fn unknown_key_is_not_found() {
    let cluster = Cluster::new();
    let _origin = cluster.node(options("users"), &["users"]);
    let gateway = cluster.node(options("gateway"), &[]);
    cluster.settle();

    let err = gateway.distribution.healthcheck(Some("nobody")).unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[test]
fn one_failing_probe_makes_the_key_unavailable() {
    let cluster = Cluster::new();
    let exposed = Arc::new(AtomicBool::new(true));
    let filter = exposed.clone();
    let origin = cluster.node(
        options("users").services(ServiceFilter::predicate(move |descriptor| {
            descriptor.path != "archive" || filter.load(Ordering::SeqCst)
        })),
        &["users", "messages", "archive"],
    );
    let gateway = cluster.node(options("gateway"), &[]);
    cluster.settle();
    assert!(gateway.distribution.healthcheck(Some("users")).is_ok());

    // removed without telling anyone, so the gateway keeps its proxy
    exposed.store(false, Ordering::SeqCst);
    origin.app.unuse_service("archive");
    assert!(gateway.app.service("archive").is_some());

    let err = gateway.distribution.healthcheck(Some("users")).unwrap_err();
    let ServiceError::Unavailable { data: Some(report), .. } = err else {
        panic!("expected an unavailable error with the report, got {err:?}");
    };
    assert_eq!(report["users"], true);
    assert_eq!(report["messages"], true);
    assert_eq!(report["archive"], false);
    let errors = report["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["code"], 503);
    assert_eq!(
        errors[0]["message"],
        "Unavailable distributed service on path archive with key users"
    );
}

#[test]
fn unreachable_dispatcher_fails_every_probe() {
    let cluster = Cluster::new();
    let origin = cluster.node(options("users"), &["users"]);
    let gateway = cluster.node(options("gateway"), &[]);
    cluster.settle();

    assert_eq!(cluster.network.sever(origin.id(), SERVICES_DISPATCHER), 1);

    let err = gateway.distribution.healthcheck(Some("users")).unwrap_err();
    assert_eq!(err.status_code(), 503);
    // the proxy itself stays, its calls fail the same way
    let call = gateway.proxy("users").find(Default::default()).unwrap_err();
    assert_eq!(call.status_code(), 503);
}
