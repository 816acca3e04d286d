//! Platform gateway
//!
//! Serves the platform side of the protocol: `hello`, `discover/registration`,
//! `discover` and `authenticate`. Each connection carries one command:
//!
//! ```text
//! AwaitCommand -> Dispatch -> RegistryOp | CatalogQuery | AuthQuery -> RespondAndClose
//! ```
//!
//! The registry and the trust evaluator are injected; the gateway keeps no
//! state of its own between connections.

use datamesh_trust_mesh::{
    Action, TrustDecision, TrustEvaluator, EVENT_AUTH_ERROR, EVENT_DISCOVER, EVENT_HELLO,
    EVENT_REGISTRATION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{MeshError, MeshResult};
use crate::protocol::{
    resolve_caller, AuthRequest, Command, Framed, REPLY_ERROR, REPLY_OK, REPLY_PLATFORM_REJECTED,
};
use crate::registry::RegistryStore;
use crate::server::{spawn_server, ServerHandle};

/// Platform-side protocol handler
#[derive(Debug)]
pub struct PlatformGateway {
    registry: Arc<RegistryStore>,
    trust: TrustEvaluator,
    io_timeout: Duration,
}

impl PlatformGateway {
    /// Create a gateway over shared stores
    pub fn new(registry: Arc<RegistryStore>, trust: TrustEvaluator, io_timeout: Duration) -> Self {
        Self {
            registry,
            trust,
            io_timeout,
        }
    }

    /// Registry served by this gateway
    pub fn registry(&self) -> &Arc<RegistryStore> {
        &self.registry
    }

    /// Trust evaluator consulted by this gateway
    pub fn trust(&self) -> &TrustEvaluator {
        &self.trust
    }

    /// Bind `addr` and serve until the returned handle is stopped
    pub async fn start(self: Arc<Self>, addr: &str) -> MeshResult<ServerHandle> {
        spawn_server(addr, "gateway", move |stream, peer| {
            let gateway = Arc::clone(&self);
            async move { gateway.handle_connection(stream, peer).await }
        })
        .await
    }

    /// Run one command exchange on an accepted connection.
    ///
    /// Protocol failures are answered with `error` before returning; transport
    /// failures just end the exchange.
    pub async fn handle_connection<S>(&self, stream: S, peer: SocketAddr) -> MeshResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, self.io_timeout);

        let line = match framed.read_command().await {
            Ok(line) => line,
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => {
                warn!(peer = %peer, error = %e, "Rejecting command");
                framed.write_frame(REPLY_ERROR).await?;
                return Err(e);
            }
        };
        let caller = match resolve_caller(line.origin.as_deref(), peer) {
            Ok(caller) => caller,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Rejecting origin");
                framed.write_frame(REPLY_ERROR).await?;
                return Err(e);
            }
        };
        debug!(peer = %caller, command = ?line.command, "Dispatching");

        match self.dispatch(&mut framed, line.command, &caller).await {
            Ok(reply) => framed.write_frame(&reply).await,
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                warn!(peer = %caller, error = %e, "Command failed");
                framed.write_frame(REPLY_ERROR).await?;
                Err(e)
            }
        }
    }

    /// Acknowledge `command`, run it, and return the final reply
    async fn dispatch<S>(
        &self,
        framed: &mut Framed<S>,
        command: Command,
        caller: &str,
    ) -> MeshResult<String>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if command == Command::Consume {
            return Err(MeshError::UnsupportedCommand(command.token().to_string()));
        }
        framed.write_frame(REPLY_OK).await?;

        match command {
            Command::Hello => self.on_hello(caller).await,
            Command::RegisterProduct => {
                let product = framed.read_frame().await?;
                self.on_register_product(caller, product.trim()).await
            }
            Command::Discover => self.on_discover(caller).await,
            Command::Authenticate => {
                let payload = framed.read_frame().await?;
                self.on_authenticate(caller, &payload).await
            }
            Command::Consume => Err(MeshError::UnsupportedCommand(command.token().to_string())),
        }
    }

    async fn on_hello(&self, caller: &str) -> MeshResult<String> {
        self.registry.register_domain(caller).await?;
        self.trust.audit().append(EVENT_HELLO, caller).await?;
        info!(peer = %caller, "Hello");
        Ok(REPLY_OK.to_string())
    }

    async fn on_register_product(&self, caller: &str, product: &str) -> MeshResult<String> {
        if product.is_empty() || product.contains('\n') {
            return Err(MeshError::MalformedMessage(format!(
                "invalid product name {product:?}"
            )));
        }
        self.trust.audit().append(EVENT_REGISTRATION, caller).await?;
        match self.registry.register_product(caller, product).await {
            Ok(_) => Ok(REPLY_OK.to_string()),
            Err(MeshError::UnknownDomain { address }) => {
                warn!(peer = %address, product = %product, "Registration from unknown domain");
                Ok(REPLY_ERROR.to_string())
            }
            Err(e) => Err(e),
        }
    }

    async fn on_discover(&self, caller: &str) -> MeshResult<String> {
        self.trust.audit().append(EVENT_DISCOVER, caller).await?;
        if self.trust.zero_trust() {
            match self.trust.evaluate(Action::Discover.as_str(), caller).await {
                TrustDecision::Accepted => {}
                TrustDecision::Rejected => return Ok(REPLY_PLATFORM_REJECTED.to_string()),
                TrustDecision::Error => return Ok(REPLY_ERROR.to_string()),
            }
        }
        let catalog = self.registry.list_catalog(Some(caller)).await;
        debug!(peer = %caller, entries = catalog.len(), "Serving catalog");
        Ok(serde_json::to_string(&catalog)?)
    }

    async fn on_authenticate(&self, caller: &str, payload: &str) -> MeshResult<String> {
        let request = match AuthRequest::parse(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(peer = %caller, error = %e, "Malformed authenticate payload");
                self.trust.audit().append(EVENT_AUTH_ERROR, caller).await?;
                return Ok(REPLY_ERROR.to_string());
            }
        };
        let reply = match self.trust.evaluate(&request.action, &request.address).await {
            TrustDecision::Accepted => REPLY_OK,
            TrustDecision::Rejected => REPLY_PLATFORM_REJECTED,
            TrustDecision::Error => REPLY_ERROR,
        };
        Ok(reply.to_string())
    }
}

/// Periodically evict domains whose lease expired, until `shutdown` flips
pub fn spawn_lease_sweep(
    registry: Arc<RegistryStore>,
    interval: Duration,
    ttl: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // first tick fires immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match registry.sweep_stale(ttl).await {
                        Ok(evicted) if !evicted.is_empty() => {
                            info!(domains = ?evicted, "Lease sweep evicted domains")
                        }
                        Ok(_) => debug!("Lease sweep found nothing stale"),
                        Err(e) => error!(error = %e, "Lease sweep failed"),
                    }
                }
            }
        }
        debug!("Lease sweep stopped");
    })
}
