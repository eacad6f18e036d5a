#[path = "common/mod.rs"]
mod common;

use std::collections::HashMap;

use common::MockCatalog;
use exporter_sidecar::{
    catalog::{
        CatalogClient, DEREGISTER_ENDPOINT, EndpointPool, REGISTER_ENDPOINT,
        ServiceDescriptor,
    },
    error::SidecarError,
};

fn client_for(catalog: &MockCatalog) -> CatalogClient {
    let pool = EndpointPool::new(&[catalog.uri()]).expect("endpoint pool");
    CatalogClient::new(pool, "test-node", Some("dc1".into())).expect("catalog client")
}

fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new(
        "node_exporter",
        "127.0.0.1",
        9100,
        vec!["prod".into()],
        HashMap::from([("team".to_string(), "metrics".to_string())]),
        None,
    )
}

#[test]
fn register_puts_the_expected_payload() {
    let catalog = MockCatalog::with_status(200);
    let client = client_for(&catalog);

    client.register(&descriptor()).expect("register succeeds");

    let bodies = catalog.bodies_to(REGISTER_ENDPOINT);
    assert_eq!(bodies.len(), 1);
    assert_eq!(
        bodies[0],
        serde_json::json!({
            "Datacenter": "dc1",
            "Node": "test-node",
            "Address": "127.0.0.1",
            "Service": {
                "ID": "127.0.0.1:9100",
                "Service": "node_exporter",
                "Tags": ["prod", "node_exporter"],
                "Address": "127.0.0.1",
                "Meta": {"team": "metrics"},
                "Port": 9100
            },
            "SkipNodeUpdate": true
        })
    );
}

#[test]
fn deregister_carries_the_same_identity() {
    let catalog = MockCatalog::with_status(200);
    let client = client_for(&catalog);
    let descriptor = descriptor();

    client.register(&descriptor).expect("register succeeds");
    client
        .deregister(descriptor.identity())
        .expect("deregister succeeds");

    let bodies = catalog.bodies_to(DEREGISTER_ENDPOINT);
    assert_eq!(bodies.len(), 1);
    assert_eq!(
        bodies[0],
        serde_json::json!({
            "Datacenter": "dc1",
            "Node": "test-node",
            "ServiceID": "127.0.0.1:9100"
        })
    );
}

#[test]
fn non_2xx_answers_surface_as_unexpected_status() {
    let catalog = MockCatalog::with_status(500);
    let client = client_for(&catalog);

    let err = client.register(&descriptor()).unwrap_err();
    match err {
        SidecarError::UnexpectedStatus(reason) => assert!(reason.contains("500")),
        other => panic!("expected unexpected-status error, got {other}"),
    }

    // The request still reached the catalog; no retry was attempted.
    assert_eq!(catalog.requests_to(REGISTER_ENDPOINT), 1);
}

#[test]
fn transport_failures_propagate_unchanged() {
    // Nothing listens on port 9; the connection itself must fail.
    let pool =
        EndpointPool::new(&["http://127.0.0.1:9".to_string()]).expect("endpoint pool");
    let client = CatalogClient::new(pool, "test-node", None).expect("catalog client");

    let err = client.register(&descriptor()).unwrap_err();
    assert!(matches!(err, SidecarError::Http(_)));
}
