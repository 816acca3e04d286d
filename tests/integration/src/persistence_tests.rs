//! Registry and audit log files written by a running platform

use crate::test_utils::*;
use datamesh_mesh::{RegistryStore, PLATFORM_KEY};
use datamesh_trust_mesh::AuditLog;
use serde_json::Value;

#[tokio::test]
async fn test_registry_file_tracks_registrations() {
    let platform = TestPlatform::start_file_backed(false).await;
    let (a, a_server) = spawn_published_domain(&domain_config("alpha", &platform, false), &["X", "Y"]).await;

    let dir = platform.dir.as_ref().unwrap();
    let path = dir.path().join("marketplace.json");
    let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

    let record = &raw[a.advertised_address()];
    assert_eq!(record["domain"], a.advertised_address());
    assert_eq!(record["products"], serde_json::json!(["X", "Y"]));
    assert!(record["last_seen"].as_u64().unwrap() > 0);
    assert_eq!(raw[PLATFORM_KEY]["domain"], platform.addr());

    // a second store opened on the same file sees the same state
    let reopened = RegistryStore::open(&path).await.unwrap();
    assert_eq!(reopened.list_catalog(None).await.len(), 2);

    a_server.stop().await;
    platform.handle.stop().await;
}

#[tokio::test]
async fn test_audit_file_is_append_ordered() {
    let platform = TestPlatform::start_file_backed(true).await;
    let (a, a_server) = spawn_published_domain(&domain_config("alpha", &platform, true), &["X"]).await;
    a.discover().await.unwrap();

    let path = platform.dir.as_ref().unwrap().path().join("audit.log");
    let content = std::fs::read_to_string(&path).unwrap();
    let events: Vec<&str> = content
        .lines()
        .filter(|l| l.contains(a.advertised_address()))
        .filter_map(|l| l.rsplit(';').next())
        .collect();
    assert_eq!(
        events,
        vec![
            "Hello",
            "Discovering registration",
            "Discovering products",
            "Authentication accept to discover request",
        ]
    );

    let reloaded = AuditLog::open(&path).await.unwrap();
    assert_eq!(reloaded.len().await, platform.audit.len().await);
    let entries = reloaded.entries().await;
    assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    a_server.stop().await;
    platform.handle.stop().await;
}
