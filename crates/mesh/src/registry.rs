//! Registry Store
//!
//! Authoritative map from domain address to the product names that domain
//! published. The platform owns one store and hands it to the gateway.
//!
//! Writers take the store lock, mutate a copy, persist the copy, and only then
//! swap it in. A failed write leaves the in-memory state untouched, so an
//! acknowledgement always follows a durable write.

use datamesh_domain::{current_timestamp_ms, DomainRecord, ProductCatalogEntry};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{MeshError, MeshResult};

/// Reserved key holding the platform's own address
pub const PLATFORM_KEY: &str = "platform";

type Records = BTreeMap<String, DomainRecord>;

/// Domain registry, shared behind an `Arc`
#[derive(Debug)]
pub struct RegistryStore {
    records: Mutex<Records>,
    path: Option<PathBuf>,
}

impl RegistryStore {
    /// Registry that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(Records::new()),
            path: None,
        }
    }

    /// Open a file-backed registry, loading the file when it exists
    pub async fn open<P: AsRef<Path>>(path: P) -> MeshResult<Self> {
        let path = path.as_ref().to_path_buf();
        let records: Records = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Records::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Records::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), records = records.len(), "Registry loaded");

        Ok(Self {
            records: Mutex::new(records),
            path: Some(path),
        })
    }

    /// Drop every record, including the platform entry
    pub async fn reset(&self) -> MeshResult<()> {
        self.update(|records| {
            records.clear();
            Ok(())
        })
        .await
    }

    /// Write the reserved platform entry
    pub async fn set_platform_address(&self, address: &str) -> MeshResult<()> {
        let record = DomainRecord::new(address, current_timestamp_ms());
        self.update(|records| {
            records.insert(PLATFORM_KEY.to_string(), record);
            Ok(())
        })
        .await
    }

    /// Address stored under the platform entry
    pub async fn platform_address(&self) -> Option<String> {
        self.records
            .lock()
            .await
            .get(PLATFORM_KEY)
            .map(|r| r.domain.clone())
    }

    /// Create an empty record for `address` if absent, otherwise refresh its
    /// lease. Returns whether a record was created.
    pub async fn register_domain(&self, address: &str) -> MeshResult<bool> {
        if address == PLATFORM_KEY {
            return Err(MeshError::InvalidAddress(address.to_string()));
        }
        let now = current_timestamp_ms();
        let created = self
            .update(|records| match records.get_mut(address) {
                Some(record) => {
                    record.touch(now);
                    Ok(false)
                }
                None => {
                    records.insert(address.to_string(), DomainRecord::new(address, now));
                    Ok(true)
                }
            })
            .await?;

        if created {
            info!(domain = %address, "Domain registered");
        }
        Ok(created)
    }

    /// Append `product` to the record of `address` unless already present.
    /// Returns whether it was appended.
    pub async fn register_product(&self, address: &str, product: &str) -> MeshResult<bool> {
        let now = current_timestamp_ms();
        let added = self
            .update(|records| {
                let record = records
                    .get_mut(address)
                    .filter(|_| address != PLATFORM_KEY)
                    .ok_or_else(|| MeshError::UnknownDomain {
                        address: address.to_string(),
                    })?;
                record.touch(now);
                Ok(record.add_product(product))
            })
            .await?;

        if added {
            info!(domain = %address, product = %product, "Product registered");
        }
        Ok(added)
    }

    /// Every `(product, owner)` pair except those owned by `exclude`.
    ///
    /// Taken under the lock, so the view never mixes two writes.
    pub async fn list_catalog(&self, exclude: Option<&str>) -> Vec<ProductCatalogEntry> {
        let records = self.records.lock().await;
        records
            .iter()
            .filter(|(key, _)| key.as_str() != PLATFORM_KEY)
            .filter(|(key, _)| Some(key.as_str()) != exclude)
            .flat_map(|(_, record)| {
                record
                    .products
                    .iter()
                    .map(|product| ProductCatalogEntry::new(product.clone(), record.domain.clone()))
            })
            .collect()
    }

    /// Snapshot of one domain record
    pub async fn domain(&self, address: &str) -> Option<DomainRecord> {
        if address == PLATFORM_KEY {
            return None;
        }
        self.records.lock().await.get(address).cloned()
    }

    /// Number of domain records, not counting the platform entry
    pub async fn domain_count(&self) -> usize {
        self.records
            .lock()
            .await
            .keys()
            .filter(|k| k.as_str() != PLATFORM_KEY)
            .count()
    }

    /// Evict domains whose lease is older than `ttl`; returns their addresses
    pub async fn sweep_stale(&self, ttl: Duration) -> MeshResult<Vec<String>> {
        self.sweep_at(current_timestamp_ms(), ttl.as_millis() as u64)
            .await
    }

    async fn sweep_at(&self, now_ms: u64, ttl_ms: u64) -> MeshResult<Vec<String>> {
        let mut guard = self.records.lock().await;
        let stale: Vec<String> = guard
            .iter()
            .filter(|(key, record)| key.as_str() != PLATFORM_KEY && record.is_stale(now_ms, ttl_ms))
            .map(|(key, _)| key.clone())
            .collect();
        if stale.is_empty() {
            return Ok(stale);
        }

        let mut next = guard.clone();
        for key in &stale {
            next.remove(key);
        }
        self.persist(&next).await?;
        *guard = next;

        info!(evicted = stale.len(), "Stale domains evicted");
        Ok(stale)
    }

    async fn update<T, F>(&self, mutate: F) -> MeshResult<T>
    where
        F: FnOnce(&mut Records) -> MeshResult<T>,
    {
        let mut guard = self.records.lock().await;
        let mut next = guard.clone();
        let out = mutate(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }

    async fn persist(&self, records: &Records) -> MeshResult<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };

        let json = serde_json::to_vec_pretty(records)?;
        let tmp = temp_path(path);
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
