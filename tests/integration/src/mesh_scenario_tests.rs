//! Open-mode scenarios: announce, publish, discover, consume
//!
//! Two domains share one platform with zero-trust off. Every exchange runs
//! over loopback TCP through the real gateway and domain listeners.

use crate::test_utils::*;
use datamesh_domain::{LifecycleState, ProductCatalogEntry};
use datamesh_mesh::MeshError;
use serde_json::json;

#[tokio::test]
async fn test_publish_discover_consume() {
    let platform = TestPlatform::start(false).await;
    let (a, a_server) = spawn_published_domain(&domain_config("alpha", &platform, false), &["X"]).await;
    let (b, b_server) = spawn_published_domain(&domain_config("beta", &platform, false), &[]).await;

    let catalog = b.discover().await.unwrap();
    assert_eq!(
        catalog,
        vec![ProductCatalogEntry::new("X", a.advertised_address())]
    );

    let product = b.consume(&catalog[0]).await.unwrap();
    assert_eq!(product.name, "X");
    assert_eq!(product.artifacts[0].data["k"], json!("v"));
    assert_eq!(
        b.received_product(a.advertised_address(), "X").await,
        Some(product)
    );

    a_server.stop().await;
    b_server.stop().await;
    platform.handle.stop().await;
}

#[tokio::test]
async fn test_catalog_never_lists_own_products() {
    let platform = TestPlatform::start(false).await;
    let (a, a_server) = spawn_published_domain(&domain_config("alpha", &platform, false), &["X"]).await;
    let (b, b_server) = spawn_published_domain(&domain_config("beta", &platform, false), &["Y"]).await;

    let seen_by_a = a.discover().await.unwrap();
    let seen_by_b = b.discover().await.unwrap();
    assert_eq!(seen_by_a, vec![ProductCatalogEntry::new("Y", b.advertised_address())]);
    assert_eq!(seen_by_b, vec![ProductCatalogEntry::new("X", a.advertised_address())]);

    // the platform entry is never offered
    let platform_addr = platform.registry.platform_address().await.unwrap();
    assert!(seen_by_a.iter().all(|e| e.owner != platform_addr));

    a_server.stop().await;
    b_server.stop().await;
    platform.handle.stop().await;
}

#[tokio::test]
async fn test_registration_is_idempotent_end_to_end() {
    let platform = TestPlatform::start(false).await;
    let (a, a_server) = spawn_published_domain(&domain_config("alpha", &platform, false), &["X"]).await;

    a.announce().await.unwrap();
    a.publish("X").await.unwrap();
    a.publish("X").await.unwrap();

    assert_eq!(platform.registry.domain_count().await, 1);
    let record = platform.registry.domain(a.advertised_address()).await.unwrap();
    assert_eq!(record.products, vec!["X"]);
    assert_eq!(a.lifecycle_state().await, LifecycleState::Publishing);

    a_server.stop().await;
    platform.handle.stop().await;
}

#[tokio::test]
async fn test_publish_unknown_local_product_fails() {
    let platform = TestPlatform::start(false).await;
    let (a, a_server) = spawn_published_domain(&domain_config("alpha", &platform, false), &[]).await;

    assert!(matches!(
        a.publish("ghost").await,
        Err(MeshError::ProductNotFound { .. })
    ));

    a_server.stop().await;
    platform.handle.stop().await;
}

#[tokio::test]
async fn test_run_cycle_round_robins_catalog() {
    let platform = TestPlatform::start(false).await;
    let (_a, a_server) =
        spawn_published_domain(&domain_config("alpha", &platform, false), &["X", "Y"]).await;
    let (b, b_server) = spawn_domain(&domain_config("beta", &platform, false), &[]).await;

    // first cycle announces on its own
    let first = b.run_cycle().await.unwrap().unwrap();
    let second = b.run_cycle().await.unwrap().unwrap();
    let third = b.run_cycle().await.unwrap().unwrap();
    assert_eq!(first.name, "X");
    assert_eq!(second.name, "Y");
    assert_eq!(third.name, "X");
    assert_eq!(b.received_products().await.len(), 2);
    assert_eq!(b.lifecycle_state().await, LifecycleState::Announced);

    a_server.stop().await;
    b_server.stop().await;
    platform.handle.stop().await;
}

#[tokio::test]
async fn test_run_cycle_with_empty_catalog() {
    let platform = TestPlatform::start(false).await;
    let (b, b_server) = spawn_domain(&domain_config("beta", &platform, false), &[]).await;

    assert!(b.run_cycle().await.unwrap().is_none());

    b_server.stop().await;
    platform.handle.stop().await;
}

#[tokio::test]
async fn test_consume_missing_product_is_error() {
    let platform = TestPlatform::start(false).await;
    let (a, a_server) = spawn_published_domain(&domain_config("alpha", &platform, false), &["X"]).await;

    let client = platform.client(&unused_address());
    assert!(matches!(
        client.consume(a.advertised_address(), "nope").await,
        Err(MeshError::ProductNotFound { .. })
    ));

    a_server.stop().await;
    platform.handle.stop().await;
}

#[tokio::test]
async fn test_allow_list_gates_on_connection_ip() {
    let platform = TestPlatform::start(false).await;

    let mut strict = domain_config("alpha", &platform, false);
    strict.allow_list = Some(vec!["10.9.9.9".to_string()]);
    let (a, a_server) = spawn_published_domain(&strict, &["X"]).await;

    // neither the honest origin nor a claimed allow-listed one gets through
    let honest = platform.client(&unused_address());
    assert!(matches!(
        honest.consume(a.advertised_address(), "X").await,
        Err(MeshError::AuthenticationRejected { .. })
    ));
    let forged = platform.client("10.9.9.9:1234");
    assert!(forged.consume(a.advertised_address(), "X").await.is_err());
    assert_eq!(a.product_lookups(), 0);

    let mut loopback = domain_config("gamma", &platform, false);
    loopback.allow_list = Some(vec!["127.0.0.1".to_string()]);
    let (c, c_server) = spawn_published_domain(&loopback, &["Z"]).await;
    assert_eq!(honest.consume(c.advertised_address(), "Z").await.unwrap().name, "Z");
    assert_eq!(c.product_lookups(), 1);

    a_server.stop().await;
    c_server.stop().await;
    platform.handle.stop().await;
}

#[tokio::test]
async fn test_cycling_domains_survive_lease_sweep() {
    let platform = TestPlatform::start(false).await;
    let mut a_config = domain_config("alpha", &platform, false);
    a_config.heartbeat_interval_secs = 0;
    let mut b_config = domain_config("beta", &platform, false);
    b_config.heartbeat_interval_secs = 0;

    let (a, a_server) = spawn_published_domain(&a_config, &["X"]).await;
    let (b, b_server) = spawn_domain(&b_config, &[]).await;
    assert_eq!(b.run_cycle().await.unwrap().unwrap().name, "X");

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let evicted = platform
        .registry
        .sweep_stale(std::time::Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(evicted.len(), 2);
    assert!(platform.registry.domain(a.advertised_address()).await.is_none());

    // the next cycle of each domain refreshes its lease and republishes
    for _ in 0..3 {
        a.run_cycle().await.unwrap();
        let product = b.run_cycle().await.unwrap();
        assert_eq!(product.map(|p| p.name).as_deref(), Some("X"));
    }
    let record = platform.registry.domain(a.advertised_address()).await.unwrap();
    assert_eq!(record.products, vec!["X"]);
    assert!(platform.registry.domain(b.advertised_address()).await.is_some());

    a_server.stop().await;
    b_server.stop().await;
    platform.handle.stop().await;
}
