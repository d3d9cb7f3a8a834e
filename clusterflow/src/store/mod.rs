//! Document store adapter.
//!
//! Cluster documents are keyed by their lower-cased resource id and
//! partitioned by subscription. Writes go through read-modify-write patches
//! guarded by etags; lifecycle runs additionally hold a lease so that only
//! one backend mutates a record at a time.

mod memory;

pub use memory::InMemoryClusterStore;

use crate::api::{ClusterDocument, ProvisioningState};
use crate::errors::StoreError;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

/// A mutation applied to a fresh copy of a document during a patch. It may
/// run more than once if the write races with another writer.
pub type Mutation<'a> = &'a mut (dyn FnMut(&mut ClusterDocument) -> Result<(), StoreError> + Send);

/// Persistence operations on cluster documents.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Stores a new document and returns it with its etag and partition key.
    async fn create(&self, doc: ClusterDocument) -> Result<ClusterDocument, StoreError>;

    /// Reads a document.
    async fn get(&self, key: &str) -> Result<ClusterDocument, StoreError>;

    /// Applies `mutate` to the latest document and writes it back.
    async fn patch(&self, key: &str, mutate: Mutation<'_>) -> Result<ClusterDocument, StoreError>;

    /// Like [`ClusterStore::patch`], but only while this client may hold the
    /// lease on the record.
    async fn patch_with_lease(
        &self,
        key: &str,
        mutate: Mutation<'_>,
    ) -> Result<ClusterDocument, StoreError>;

    /// Acquires or renews this client's lease on a record.
    async fn lease(&self, key: &str) -> Result<ClusterDocument, StoreError>;

    /// Records the outcome of a run and releases the lease.
    async fn end_lease(
        &self,
        key: &str,
        state: ProvisioningState,
        failed_state: Option<ProvisioningState>,
        admin_update_error: Option<String>,
    ) -> Result<ClusterDocument, StoreError>;

    /// Leases the next record with pending work, if any.
    async fn dequeue(&self) -> Result<Option<ClusterDocument>, StoreError>;

    /// Removes a document.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

static SUBSCRIPTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^/subscriptions/([^/]+)/").ok());

/// Rejects keys that are empty or not lower case.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let invalid = |reason: &str| StoreError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    if key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if key != key.to_lowercase() {
        return Err(invalid("key must be lower case"));
    }
    Ok(())
}

/// Extracts the subscription id that partitions a resource key.
pub fn partition_key(key: &str) -> Result<String, StoreError> {
    SUBSCRIPTION
        .as_ref()
        .and_then(|re| re.captures(key))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| StoreError::InvalidKey {
            key: key.to_string(),
            reason: "resource id has no subscription".to_string(),
        })
}
