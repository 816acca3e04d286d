//! Domain Peer Node
//!
//! A domain announces itself, publishes its products, and then loops:
//! discover, pick one foreign product round-robin, consume it. It also serves
//! `consume` requests for its own products, gated by its [`ConsumePolicy`].

use datamesh_core::DomainConfig;
use datamesh_domain::{DataProduct, LifecycleState, PeerLifecycle, ProductCatalogEntry};
use datamesh_trust_mesh::{Action, TrustDecision};
use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, SocketAddr};
#[cfg(any(test, feature = "test-util"))]
use std::sync::atomic::AtomicU64;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::MeshClient;
use crate::error::{MeshError, MeshResult};
use crate::protocol::{
    resolve_caller, Command, Framed, REPLY_DOMAIN_REJECTED, REPLY_ERROR, REPLY_OK,
};
use crate::server::{serve, ServerHandle};

/// Who may consume this domain's products
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumePolicy {
    /// Every caller is admitted
    Open,
    /// Only connections from listed IPs; a `host:port` entry matches on its host
    AllowList(HashSet<IpAddr>),
    /// The platform decides via `authenticate`
    ZeroTrust,
}

impl ConsumePolicy {
    /// Policy described by a domain configuration
    pub fn from_config(config: &DomainConfig) -> Self {
        match (config.zero_trust, &config.allow_list) {
            (true, _) => ConsumePolicy::ZeroTrust,
            (false, Some(list)) => ConsumePolicy::AllowList(
                list.iter().filter_map(|entry| parse_allow_entry(entry)).collect(),
            ),
            (false, None) => ConsumePolicy::Open,
        }
    }

    /// Decided on the connection's IP, never on a declared origin
    fn admits(&self, remote: IpAddr) -> bool {
        match self {
            ConsumePolicy::Open => true,
            ConsumePolicy::AllowList(list) => list.contains(&remote.to_canonical()),
            ConsumePolicy::ZeroTrust => false,
        }
    }
}

fn parse_allow_entry(entry: &str) -> Option<IpAddr> {
    let entry = entry.trim();
    let ip = entry
        .parse::<IpAddr>()
        .ok()
        .or_else(|| entry.parse::<SocketAddr>().ok().map(|addr| addr.ip()));
    if ip.is_none() {
        warn!(entry = %entry, "Ignoring allow-list entry that is not an IP");
    }
    ip.map(|ip| ip.to_canonical())
}

/// Locally owned products behind a read-write lock
#[derive(Debug, Default)]
struct ProductShelf {
    products: RwLock<BTreeMap<String, DataProduct>>,
    #[cfg(any(test, feature = "test-util"))]
    lookups: AtomicU64,
}

impl ProductShelf {
    async fn insert(&self, product: DataProduct) {
        self.products.write().await.insert(product.name.clone(), product);
    }

    async fn get(&self, name: &str) -> Option<DataProduct> {
        #[cfg(any(test, feature = "test-util"))]
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.products.read().await.get(name).cloned()
    }

    async fn names(&self) -> Vec<String> {
        self.products.read().await.keys().cloned().collect()
    }
}

/// Timing knobs for the discovery loop
#[derive(Debug, Clone, Copy)]
struct Timing {
    io_timeout: Duration,
    discovery_interval: Duration,
    retry_backoff: Duration,
    heartbeat_interval: Duration,
}

/// A running domain
#[derive(Debug)]
pub struct DomainPeer {
    name: String,
    advertised: String,
    client: MeshClient,
    policy: ConsumePolicy,
    timing: Timing,
    shelf: ProductShelf,
    lifecycle: Mutex<PeerLifecycle>,
    last_hello: Mutex<Option<Instant>>,
    received: RwLock<BTreeMap<(String, String), DataProduct>>,
    cycle: AtomicUsize,
}

impl DomainPeer {
    /// Bind the consume listener and start serving.
    ///
    /// The advertised address defaults to the bound one, with an unspecified
    /// IP replaced by loopback.
    pub async fn bind(config: &DomainConfig) -> MeshResult<(Arc<Self>, ServerHandle)> {
        let listener = TcpListener::bind(&config.bind_address).await?;
        let local = listener.local_addr()?;
        let advertised = match &config.advertised_address {
            Some(addr) => addr.clone(),
            None if local.ip().is_unspecified() => format!("127.0.0.1:{}", local.port()),
            None => local.to_string(),
        };

        let peer = Arc::new(Self {
            name: config.name.clone(),
            client: MeshClient::new(config.platform_address.clone(), config.io_timeout())
                .with_origin(advertised.clone()),
            advertised,
            policy: ConsumePolicy::from_config(config),
            timing: Timing {
                io_timeout: config.io_timeout(),
                discovery_interval: config.discovery_interval(),
                retry_backoff: config.retry_backoff(),
                heartbeat_interval: config.heartbeat_interval(),
            },
            shelf: ProductShelf::default(),
            lifecycle: Mutex::new(PeerLifecycle::new()),
            last_hello: Mutex::new(None),
            received: RwLock::new(BTreeMap::new()),
            cycle: AtomicUsize::new(0),
        });

        let server_peer = Arc::clone(&peer);
        let handle = serve(listener, "domain", move |stream, remote| {
            let peer = Arc::clone(&server_peer);
            async move { peer.handle_connection(stream, remote).await }
        })?;

        info!(domain = %peer.name, addr = %peer.advertised, policy = ?peer.policy, "Domain listening");
        Ok((peer, handle))
    }

    /// Domain name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address other peers dial and the platform keys us by
    pub fn advertised_address(&self) -> &str {
        &self.advertised
    }

    /// Client used for outbound exchanges
    pub fn client(&self) -> &MeshClient {
        &self.client
    }

    /// Current lifecycle state
    pub async fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.lock().await.state()
    }

    /// Number of product-list reads served so far
    #[cfg(any(test, feature = "test-util"))]
    pub fn product_lookups(&self) -> u64 {
        self.shelf.lookups.load(Ordering::Relaxed)
    }

    /// Add a product to the local shelf without publishing it
    pub async fn add_product(&self, product: DataProduct) -> MeshResult<()> {
        product.validate()?;
        debug!(domain = %self.name, product = %product.name, "Product stocked");
        self.shelf.insert(product).await;
        Ok(())
    }

    /// Say `hello` to the platform
    pub async fn announce(&self) -> MeshResult<()> {
        self.client.hello().await?;
        self.lifecycle.lock().await.on_announced();
        *self.last_hello.lock().await = Some(Instant::now());
        info!(domain = %self.name, addr = %self.advertised, "Announced to platform");
        Ok(())
    }

    /// Register one local product with the platform
    pub async fn publish(&self, product: &str) -> MeshResult<()> {
        self.lifecycle.lock().await.ensure_can_publish()?;
        if !self.shelf.products.read().await.contains_key(product) {
            return Err(MeshError::ProductNotFound {
                product: product.to_string(),
                owner: self.advertised.clone(),
            });
        }

        match self.client.register_product(product).await {
            Ok(()) => {
                self.lifecycle.lock().await.on_published()?;
                info!(domain = %self.name, product = %product, "Product published");
                Ok(())
            }
            Err(e @ MeshError::UnknownDomain { .. }) => {
                self.lifecycle.lock().await.reset("platform has no record");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Publish every product on the shelf
    pub async fn publish_all(&self) -> MeshResult<()> {
        for name in self.shelf.names().await {
            self.publish(&name).await?;
        }
        Ok(())
    }

    /// Catalog entries owned by other domains
    pub async fn discover(&self) -> MeshResult<Vec<ProductCatalogEntry>> {
        let catalog = self.client.discover().await?;
        Ok(catalog
            .into_iter()
            .filter(|entry| entry.owner != self.advertised)
            .collect())
    }

    /// Fetch a product from its owner and keep it
    pub async fn consume(&self, entry: &ProductCatalogEntry) -> MeshResult<DataProduct> {
        let product = self.client.consume(&entry.owner, &entry.product).await?;
        info!(domain = %self.name, product = %product.name, owner = %entry.owner, "Product consumed");
        self.received
            .write()
            .await
            .insert((entry.owner.clone(), entry.product.clone()), product.clone());
        Ok(product)
    }

    /// Latest product consumed from `owner` under `name`
    pub async fn received_product(&self, owner: &str, name: &str) -> Option<DataProduct> {
        self.received
            .read()
            .await
            .get(&(owner.to_string(), name.to_string()))
            .cloned()
    }

    /// Every product consumed so far, latest per `(owner, name)`
    pub async fn received_products(&self) -> Vec<DataProduct> {
        self.received.read().await.values().cloned().collect()
    }

    /// One discovery cycle: announce if needed, discover, consume one entry.
    ///
    /// The domain re-announces and republishes when unregistered or when the
    /// heartbeat interval has passed, which keeps its platform lease alive. A
    /// rejection resets the lifecycle, re-announces and retries once.
    pub async fn run_cycle(&self) -> MeshResult<Option<DataProduct>> {
        if self.needs_rejoin().await {
            self.rejoin().await?;
        }

        let catalog = match self.discover().await {
            Err(e) if e.is_rejection() => {
                self.recover(&e).await?;
                self.discover().await?
            }
            other => other?,
        };
        if catalog.is_empty() {
            debug!(domain = %self.name, "Nothing to consume");
            return Ok(None);
        }

        let cycle = self.cycle.fetch_add(1, Ordering::Relaxed);
        let entry = &catalog[cycle % catalog.len()];
        let product = match self.consume(entry).await {
            Err(e) if e.is_rejection() => {
                self.recover(&e).await?;
                self.consume(entry).await?
            }
            other => other?,
        };
        Ok(Some(product))
    }

    /// Cycle until `shutdown` flips to `true`
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let pause = match self.run_cycle().await {
                Ok(_) => self.timing.discovery_interval,
                Err(e) => {
                    warn!(domain = %self.name, error = %e, "Discovery cycle failed");
                    if e.is_transport() {
                        // the platform may have restarted and forgotten us
                        self.lifecycle.lock().await.reset("transport failure");
                    }
                    self.timing.retry_backoff
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
        info!(domain = %self.name, "Discovery loop stopped");
    }

    async fn needs_rejoin(&self) -> bool {
        if !self.lifecycle.lock().await.is_announced() {
            return true;
        }
        match *self.last_hello.lock().await {
            Some(at) => at.elapsed() >= self.timing.heartbeat_interval,
            None => true,
        }
    }

    async fn rejoin(&self) -> MeshResult<()> {
        self.announce().await?;
        self.publish_all().await
    }

    async fn recover(&self, cause: &MeshError) -> MeshResult<()> {
        warn!(domain = %self.name, error = %cause, "Rejected, re-announcing");
        self.lifecycle.lock().await.reset("authentication rejected");
        self.rejoin().await
    }

    /// Serve one inbound `consume` exchange
    pub async fn handle_connection<S>(&self, stream: S, remote: SocketAddr) -> MeshResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, self.timing.io_timeout);

        let line = match framed.read_command().await {
            Ok(line) if line.command == Command::Consume => line,
            Ok(line) => {
                framed.write_frame(REPLY_ERROR).await?;
                return Err(MeshError::UnsupportedCommand(line.command.token().to_string()));
            }
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => {
                framed.write_frame(REPLY_ERROR).await?;
                return Err(e);
            }
        };
        let caller = match resolve_caller(line.origin.as_deref(), remote) {
            Ok(caller) => caller,
            Err(e) => {
                framed.write_frame(REPLY_ERROR).await?;
                return Err(e);
            }
        };
        framed.write_frame(REPLY_OK).await?;

        match self.authorize(&caller, remote.ip()).await {
            TrustDecision::Accepted => framed.write_frame(REPLY_OK).await?,
            TrustDecision::Rejected => {
                warn!(domain = %self.name, peer = %caller, "Consume rejected");
                return framed.write_frame(REPLY_DOMAIN_REJECTED).await;
            }
            TrustDecision::Error => return framed.write_frame(REPLY_ERROR).await,
        }

        let name = framed.read_frame().await?;
        let name = name.trim();
        match self.shelf.get(name).await {
            Some(product) => {
                framed.write_frame(&product.to_json()?).await?;
                debug!(domain = %self.name, peer = %caller, product = %name, "Product served");
                Ok(())
            }
            None => {
                framed.write_frame(REPLY_ERROR).await?;
                Err(MeshError::ProductNotFound {
                    product: name.to_string(),
                    owner: self.advertised.clone(),
                })
            }
        }
    }

    async fn authorize(&self, caller: &str, remote: IpAddr) -> TrustDecision {
        match &self.policy {
            ConsumePolicy::ZeroTrust => {
                match self.client.authenticate(Action::Consume.as_str(), caller).await {
                    Ok(decision) => decision,
                    Err(e) => {
                        warn!(domain = %self.name, peer = %caller, error = %e, "Platform authenticate failed");
                        TrustDecision::Error
                    }
                }
            }
            policy if policy.admits(remote) => TrustDecision::Accepted,
            _ => TrustDecision::Rejected,
        }
    }
}
