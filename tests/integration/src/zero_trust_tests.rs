//! Zero-trust scenarios
//!
//! The platform admits `discover` and `consume` only for addresses with a
//! logged hello. Domains in zero-trust mode delegate the consume decision to
//! the platform's `authenticate` command.

use crate::test_utils::*;
use datamesh_domain::LifecycleState;
use datamesh_mesh::MeshError;
use datamesh_trust_mesh::{TrustDecision, EVENT_HELLO};

#[tokio::test]
async fn test_consume_requires_prior_hello() {
    let platform = TestPlatform::start(true).await;
    let (a, a_server) = spawn_published_domain(&domain_config("alpha", &platform, true), &["X"]).await;

    let b_addr = unused_address();
    let b = platform.client(&b_addr);

    assert!(matches!(
        b.consume(a.advertised_address(), "X").await,
        Err(MeshError::AuthenticationRejected { .. })
    ));
    // the product list was never read
    assert_eq!(a.product_lookups(), 0);

    b.hello().await.unwrap();
    let product = b.consume(a.advertised_address(), "X").await.unwrap();
    assert_eq!(product.name, "X");
    assert_eq!(product.artifacts[0].data["k"], "v");

    assert_eq!(
        platform.events_for(&b_addr).await,
        vec![
            "Authentication reject".to_string(),
            EVENT_HELLO.to_string(),
            "Authentication accept to consume request".to_string(),
        ]
    );

    a_server.stop().await;
    platform.handle.stop().await;
}

#[tokio::test]
async fn test_discover_requires_prior_hello() {
    let platform = TestPlatform::start(true).await;
    let (_a, a_server) = spawn_published_domain(&domain_config("alpha", &platform, true), &["X"]).await;

    let b = platform.client(&unused_address());
    assert!(matches!(
        b.discover().await,
        Err(MeshError::AuthenticationRejected { .. })
    ));

    b.hello().await.unwrap();
    assert_eq!(b.discover().await.unwrap().len(), 1);

    a_server.stop().await;
    platform.handle.stop().await;
}

#[tokio::test]
async fn test_authenticate_answers_for_third_parties() {
    let platform = TestPlatform::start(true).await;
    let asker = platform.client(&unused_address());
    let subject = unused_address();

    assert_eq!(
        asker.authenticate("consume", &subject).await.unwrap(),
        TrustDecision::Rejected
    );
    platform.client(&subject).hello().await.unwrap();
    assert_eq!(
        asker.authenticate("consume", &subject).await.unwrap(),
        TrustDecision::Accepted
    );
    assert_eq!(
        asker.authenticate("teleport", &subject).await.unwrap(),
        TrustDecision::Error
    );

    platform.handle.stop().await;
}

#[tokio::test]
async fn test_open_platform_accepts_without_hello() {
    let platform = TestPlatform::start(false).await;
    let asker = platform.client(&unused_address());

    assert_eq!(
        asker.authenticate("consume", "10.1.1.1:9100").await.unwrap(),
        TrustDecision::Accepted
    );
    assert_eq!(
        asker.authenticate("discover", "10.1.1.1:9100").await.unwrap(),
        TrustDecision::Accepted
    );

    platform.handle.stop().await;
}

#[tokio::test]
async fn test_domain_reannounces_after_evidence_is_lost() {
    let platform = TestPlatform::start(true).await;
    let (a, a_server) = spawn_published_domain(&domain_config("alpha", &platform, true), &["X"]).await;
    let (b, b_server) = spawn_published_domain(&domain_config("beta", &platform, true), &[]).await;

    assert_eq!(b.run_cycle().await.unwrap().unwrap().name, "X");

    // platform forgets every hello; A's record is still registered
    platform.audit.reset().await.unwrap();
    let product = b.run_cycle().await.unwrap().unwrap();
    assert_eq!(product.name, "X");

    let events = platform.events_for(b.advertised_address()).await;
    assert!(events.starts_with(&[
        "Discovering products".to_string(),
        "Authentication reject".to_string(),
        EVENT_HELLO.to_string(),
    ]));
    assert_eq!(b.lifecycle_state().await, LifecycleState::Announced);
    assert!(platform.registry.domain(a.advertised_address()).await.is_some());

    a_server.stop().await;
    b_server.stop().await;
    platform.handle.stop().await;
}
