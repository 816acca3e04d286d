//! Test utilities for data mesh integration tests

use datamesh_core::DomainConfig;
use datamesh_domain::{Artifact, DataProduct};
use datamesh_mesh::{DomainPeer, MeshClient, PlatformGateway, RegistryStore, ServerHandle};
use datamesh_trust_mesh::{AuditLog, TrustEvaluator};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Per-frame deadline used by every test endpoint
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Audit scan window used by the test platform
pub const TEST_SCAN_WINDOW: usize = 10_000;

/// Install a test subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A platform gateway bound to an ephemeral loopback port
pub struct TestPlatform {
    pub registry: Arc<RegistryStore>,
    pub audit: Arc<AuditLog>,
    pub handle: ServerHandle,
    /// Holds the backing files alive for file-backed platforms
    pub dir: Option<TempDir>,
}

impl TestPlatform {
    /// In-memory platform
    pub async fn start(zero_trust: bool) -> Self {
        init_tracing();
        let registry = Arc::new(RegistryStore::in_memory());
        let audit = Arc::new(AuditLog::in_memory());
        Self::serve(registry, audit, zero_trust, None).await
    }

    /// Platform persisting into a fresh temporary directory
    pub async fn start_file_backed(zero_trust: bool) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(
            RegistryStore::open(dir.path().join("marketplace.json"))
                .await
                .expect("open registry"),
        );
        let audit = Arc::new(
            AuditLog::open(dir.path().join("audit.log"))
                .await
                .expect("open audit log"),
        );
        Self::serve(registry, audit, zero_trust, Some(dir)).await
    }

    async fn serve(
        registry: Arc<RegistryStore>,
        audit: Arc<AuditLog>,
        zero_trust: bool,
        dir: Option<TempDir>,
    ) -> Self {
        let trust = TrustEvaluator::new(Arc::clone(&audit), zero_trust, Some(TEST_SCAN_WINDOW));
        let gateway = Arc::new(PlatformGateway::new(
            Arc::clone(&registry),
            trust,
            TEST_TIMEOUT,
        ));
        let handle = gateway.start("127.0.0.1:0").await.expect("start gateway");
        registry
            .set_platform_address(&handle.local_addr().to_string())
            .await
            .expect("platform entry");

        Self {
            registry,
            audit,
            handle,
            dir,
        }
    }

    /// Gateway address as dialled by clients
    pub fn addr(&self) -> String {
        self.handle.local_addr().to_string()
    }

    /// Client advertising `origin`
    pub fn client(&self, origin: &str) -> MeshClient {
        MeshClient::new(self.addr(), TEST_TIMEOUT).with_origin(origin)
    }

    /// Events logged for `address`, in order
    pub async fn events_for(&self, address: &str) -> Vec<String> {
        self.audit
            .entries()
            .await
            .into_iter()
            .filter(|e| e.address == address)
            .map(|e| e.event)
            .collect()
    }
}

/// Domain configuration bound to an ephemeral loopback port
pub fn domain_config(name: &str, platform: &TestPlatform, zero_trust: bool) -> DomainConfig {
    DomainConfig {
        name: name.to_string(),
        bind_address: "127.0.0.1:0".to_string(),
        platform_address: platform.addr(),
        zero_trust,
        io_timeout_secs: TEST_TIMEOUT.as_secs(),
        discovery_interval_secs: 1,
        retry_backoff_secs: 1,
        ..DomainConfig::default()
    }
}

/// Product holding one artifact with `{"k": "v"}`
pub fn kv_product(name: &str, domain: &str) -> DataProduct {
    DataProduct::new(1, name, domain)
        .with_artifact(Artifact::new(1, format!("{name}-artifact")).with_entry("k", "v"))
}

/// Start a domain stocked with `products` (not yet announced)
pub async fn spawn_domain(
    config: &DomainConfig,
    products: &[&str],
) -> (Arc<DomainPeer>, ServerHandle) {
    let (peer, handle) = DomainPeer::bind(config).await.expect("bind domain");
    for name in products {
        peer.add_product(kv_product(name, &config.name))
            .await
            .expect("stock product");
    }
    (peer, handle)
}

/// Start a domain, announce it and publish everything it holds
pub async fn spawn_published_domain(
    config: &DomainConfig,
    products: &[&str],
) -> (Arc<DomainPeer>, ServerHandle) {
    let (peer, handle) = spawn_domain(config, products).await;
    peer.announce().await.expect("announce");
    peer.publish_all().await.expect("publish");
    (peer, handle)
}

/// A loopback address nobody listens on, usable as a client identity
pub fn unused_address() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    addr.to_string()
}
