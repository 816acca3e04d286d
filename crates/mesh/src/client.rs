//! Outbound side of the protocol.
//!
//! Every call opens a fresh connection, runs one command exchange and closes
//! it. Nothing is pooled.

use datamesh_domain::{DataProduct, ProductCatalogEntry};
use datamesh_trust_mesh::TrustDecision;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{MeshError, MeshResult};
use crate::protocol::{
    AuthRequest, Command, CommandLine, Framed, REPLY_DOMAIN_REJECTED, REPLY_ERROR, REPLY_OK,
    REPLY_PLATFORM_REJECTED,
};

/// Client for the platform gateway and for other domains
#[derive(Debug, Clone)]
pub struct MeshClient {
    platform: String,
    origin: Option<String>,
    io_timeout: Duration,
}

impl MeshClient {
    /// Client talking to the platform at `platform`
    pub fn new(platform: impl Into<String>, io_timeout: Duration) -> Self {
        Self {
            platform: platform.into(),
            origin: None,
            io_timeout,
        }
    }

    /// Advertise `origin` on every command line
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Platform address this client dials
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Advertised address, if any
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Announce this domain to the platform
    pub async fn hello(&self) -> MeshResult<()> {
        let mut framed = self.open(&self.platform, Command::Hello).await?;
        framed.expect(REPLY_OK).await
    }

    /// Register `product` under this domain's record.
    ///
    /// Fails with `UnknownDomain` when the platform has no record for us.
    pub async fn register_product(&self, product: &str) -> MeshResult<()> {
        let mut framed = self.open(&self.platform, Command::RegisterProduct).await?;
        framed.write_frame(product).await?;
        match framed.read_frame().await?.as_str() {
            REPLY_OK => Ok(()),
            REPLY_ERROR => Err(MeshError::UnknownDomain {
                address: self.identity(),
            }),
            other => Err(unexpected(REPLY_OK, other)),
        }
    }

    /// Fetch the catalog of products owned by other domains
    pub async fn discover(&self) -> MeshResult<Vec<ProductCatalogEntry>> {
        let mut framed = self.open(&self.platform, Command::Discover).await?;
        let reply = framed.read_frame().await?;
        match reply.as_str() {
            REPLY_PLATFORM_REJECTED => Err(MeshError::AuthenticationRejected {
                address: self.identity(),
            }),
            REPLY_ERROR => Err(unexpected("catalog", REPLY_ERROR)),
            json => {
                let catalog: Vec<ProductCatalogEntry> = serde_json::from_str(json)?;
                debug!(entries = catalog.len(), "Catalog received");
                Ok(catalog)
            }
        }
    }

    /// Ask the platform whether `address` may perform `action`
    pub async fn authenticate(&self, action: &str, address: &str) -> MeshResult<TrustDecision> {
        let mut framed = self.open(&self.platform, Command::Authenticate).await?;
        framed
            .write_frame(&AuthRequest::new(action, address).to_payload())
            .await?;
        match framed.read_frame().await?.as_str() {
            REPLY_OK => Ok(TrustDecision::Accepted),
            REPLY_PLATFORM_REJECTED => Ok(TrustDecision::Rejected),
            REPLY_ERROR => Ok(TrustDecision::Error),
            other => Err(unexpected(REPLY_OK, other)),
        }
    }

    /// Pull `product` from the domain at `owner`
    pub async fn consume(&self, owner: &str, product: &str) -> MeshResult<DataProduct> {
        let mut framed = self.open(owner, Command::Consume).await?;
        match framed.read_frame().await?.as_str() {
            REPLY_OK => {}
            REPLY_DOMAIN_REJECTED => {
                return Err(MeshError::AuthenticationRejected {
                    address: self.identity(),
                })
            }
            other => return Err(unexpected(REPLY_OK, other)),
        }

        framed.write_frame(product).await?;
        let reply = framed.read_frame().await?;
        if reply == REPLY_ERROR {
            return Err(MeshError::ProductNotFound {
                product: product.to_string(),
                owner: owner.to_string(),
            });
        }
        Ok(DataProduct::from_json(&reply)?)
    }

    /// Connect, send the command line and wait for the acknowledgement
    async fn open(&self, addr: &str, command: Command) -> MeshResult<Framed<TcpStream>> {
        let stream = tokio::time::timeout(self.io_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| MeshError::Timeout(format!("connect to {addr}")))??;

        let line = match (&self.origin, command) {
            (_, Command::Authenticate) | (None, _) => CommandLine::new(command),
            (Some(origin), _) => CommandLine::with_origin(command, origin.clone()),
        };

        let mut framed = Framed::new(stream, self.io_timeout);
        framed.send_command(&line).await?;
        framed.expect(REPLY_OK).await?;
        debug!(peer = %addr, command = ?command, "Command acknowledged");
        Ok(framed)
    }

    fn identity(&self) -> String {
        self.origin.clone().unwrap_or_default()
    }
}

fn unexpected(expected: &str, got: &str) -> MeshError {
    MeshError::UnexpectedReply {
        expected: expected.to_string(),
        got: got.to_string(),
    }
}
