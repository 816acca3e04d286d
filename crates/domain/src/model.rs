//! Data product and registry model types
//!
//! Products are owned by exactly one domain process and travel as JSON in a
//! single `consume` reply. Registry records only carry product names.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{DomainError, Result};

/// A named blob of values inside a product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact identifier, unique within its product
    pub data_id: u64,
    /// Artifact name
    pub name: String,
    /// Arbitrary scalar/string values keyed by field name
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

impl Artifact {
    /// Create an empty artifact
    pub fn new(data_id: u64, name: impl Into<String>) -> Self {
        Self {
            data_id,
            name: name.into(),
            data: BTreeMap::new(),
        }
    }

    /// Builder-style insert of one value
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// A unit of data published by a domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataProduct {
    /// Product identifier
    pub data_id: u64,
    /// Catalog key; unique within the owning domain
    pub name: String,
    /// Owning domain name
    pub domain: String,
    /// Ordered artifacts
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl DataProduct {
    /// Create a product with no artifacts
    pub fn new(data_id: u64, name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            data_id,
            name: name.into(),
            domain: domain.into(),
            artifacts: Vec::new(),
        }
    }

    /// Builder-style append of an artifact
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Build a product holding a single artifact filled from `entries`.
    ///
    /// Used by the domain binary to publish sample data.
    pub fn from_entries<I, K, V>(data_id: u64, name: &str, domain: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let artifact = entries
            .into_iter()
            .fold(Artifact::new(1, format!("{name}-data")), |artifact, (k, v)| {
                artifact.with_entry(k, v)
            });
        Self::new(data_id, name, domain).with_artifact(artifact)
    }

    /// Reject products that cannot be published
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "product name must not be empty".to_string(),
            ));
        }
        if self.name.contains('\n') {
            return Err(DomainError::ValidationError(format!(
                "product name {:?} contains a newline",
                self.name
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Registry entry for one domain, keyed by its address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    /// Domain address (unique key)
    pub domain: String,
    /// Published product names in registration order, without duplicates
    #[serde(default)]
    pub products: Vec<String>,
    /// Last `hello` or registration (Unix epoch milliseconds)
    #[serde(default)]
    pub last_seen: u64,
}

impl DomainRecord {
    pub fn new(address: impl Into<String>, now_ms: u64) -> Self {
        Self {
            domain: address.into(),
            products: Vec::new(),
            last_seen: now_ms,
        }
    }

    /// Append a product name unless already present; returns whether it was added
    pub fn add_product(&mut self, name: &str) -> bool {
        if self.has_product(name) {
            return false;
        }
        self.products.push(name.to_string());
        true
    }

    pub fn has_product(&self, name: &str) -> bool {
        self.products.iter().any(|p| p == name)
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_seen = self.last_seen.max(now_ms);
    }

    pub fn is_stale(&self, now_ms: u64, ttl_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen) > ttl_ms
    }
}

/// `(product, owner)` pair served by `discover`.
///
/// Serialized as a two-element JSON array: `["orders", "10.0.0.4:9100"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct ProductCatalogEntry {
    pub product: String,
    pub owner: String,
}

impl ProductCatalogEntry {
    pub fn new(product: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            owner: owner.into(),
        }
    }
}

impl From<(String, String)> for ProductCatalogEntry {
    fn from((product, owner): (String, String)) -> Self {
        Self { product, owner }
    }
}

impl From<ProductCatalogEntry> for (String, String) {
    fn from(entry: ProductCatalogEntry) -> Self {
        (entry.product, entry.owner)
    }
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
