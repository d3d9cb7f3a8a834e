//! In-memory cluster store.

use super::{partition_key, validate_key, ClusterStore, Mutation};
use crate::api::{ClusterDocument, MaintenanceTask, ProvisioningState};
use crate::errors::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Shared {
    docs: DashMap<String, ClusterDocument>,
    etags: AtomicU64,
}

impl Shared {
    fn next_etag(&self) -> String {
        format!("\"{}\"", self.etags.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// A [`ClusterStore`] backed by a concurrent map.
///
/// Each instance is one client with its own lease owner id. Clients created
/// with [`InMemoryClusterStore::connect`] share the same documents, which is
/// how concurrent backends are modelled in tests.
#[derive(Debug, Clone)]
pub struct InMemoryClusterStore {
    shared: Arc<Shared>,
    owner: String,
    held: Arc<DashMap<String, ()>>,
    lease_duration: Duration,
    conflict_retries: usize,
}

impl Default for InMemoryClusterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryClusterStore {
    /// Creates an empty store with a fresh owner id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            owner: uuid::Uuid::new_v4().to_string(),
            held: Arc::new(DashMap::new()),
            lease_duration: Duration::from_secs(60),
            conflict_retries: 5,
        }
    }

    /// Returns another client over the same documents with its own owner id.
    #[must_use]
    pub fn connect(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            owner: uuid::Uuid::new_v4().to_string(),
            held: Arc::new(DashMap::new()),
            lease_duration: self.lease_duration,
            conflict_retries: self.conflict_retries,
        }
    }

    /// Sets the lease duration.
    #[must_use]
    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    /// Sets how many times a conflicting write is retried.
    #[must_use]
    pub fn with_conflict_retries(mut self, retries: usize) -> Self {
        self.conflict_retries = retries;
        self
    }

    /// Returns this client's lease owner id.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.docs.len()
    }

    /// Returns true if the store holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.docs.is_empty()
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn lease_expiry(&self) -> i64 {
        Self::now() + i64::try_from(self.lease_duration.as_secs()).unwrap_or(i64::MAX / 2)
    }

    fn lease_is_live(doc: &ClusterDocument) -> bool {
        doc.lease_owner.is_some() && doc.lease_expires > Self::now()
    }

    fn read(&self, key: &str) -> Result<ClusterDocument, StoreError> {
        validate_key(key)?;
        self.shared
            .docs
            .get(key)
            .map(|doc| doc.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    /// Read-modify-write with etag checking. The mutation runs on a copy
    /// with no map lock held.
    fn patch_inner(&self, key: &str, mutate: Mutation<'_>) -> Result<ClusterDocument, StoreError> {
        let attempts = self.conflict_retries + 1;
        for attempt in 1..=attempts {
            let mut doc = self.read(key)?;
            let expected = doc.etag.clone();

            mutate(&mut doc)?;

            let Some(mut current) = self.shared.docs.get_mut(key) else {
                return Err(StoreError::NotFound(key.to_string()));
            };
            if current.etag != expected {
                drop(current);
                debug!(key = %key, attempt, "etag precondition failed, retrying patch");
                continue;
            }
            doc.key = key.to_string();
            doc.etag = Some(self.shared.next_etag());
            *current = doc.clone();
            return Ok(doc);
        }

        warn!(key = %key, attempts, "giving up on conflicting patch");
        Err(StoreError::Conflict {
            key: key.to_string(),
            attempts,
        })
    }
}

#[async_trait]
impl ClusterStore for InMemoryClusterStore {
    async fn create(&self, mut doc: ClusterDocument) -> Result<ClusterDocument, StoreError> {
        validate_key(&doc.key)?;
        doc.partition_key = partition_key(&doc.key)?;
        doc.etag = Some(self.shared.next_etag());

        match self.shared.docs.entry(doc.key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::AlreadyExists(doc.key)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(doc.clone());
                Ok(doc)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<ClusterDocument, StoreError> {
        self.read(key)
    }

    async fn patch(&self, key: &str, mutate: Mutation<'_>) -> Result<ClusterDocument, StoreError> {
        self.patch_inner(key, mutate)
    }

    async fn patch_with_lease(
        &self,
        key: &str,
        mutate: Mutation<'_>,
    ) -> Result<ClusterDocument, StoreError> {
        let owner = self.owner.clone();
        let expiry = self.lease_expiry();
        let held = self.held.contains_key(key);

        let doc = self.patch_inner(key, &mut |doc: &mut ClusterDocument| {
            let mut acquired = false;
            match doc.lease_owner.as_deref() {
                Some(current) if current == owner => {}
                _ if held => return Err(StoreError::LostLease),
                Some(current) if Self::lease_is_live(doc) => {
                    return Err(StoreError::LeaseHeld {
                        key: doc.key.clone(),
                        owner: current.to_string(),
                    })
                }
                _ => {
                    doc.lease_owner = Some(owner.clone());
                    doc.lease_expires = expiry;
                    acquired = true;
                }
            }
            mutate(doc)?;
            // a lease taken only for this write is released with it
            if acquired {
                doc.lease_owner = None;
                doc.lease_expires = 0;
            }
            Ok(())
        })?;

        Ok(doc)
    }

    async fn lease(&self, key: &str) -> Result<ClusterDocument, StoreError> {
        let owner = self.owner.clone();
        let expiry = self.lease_expiry();
        let held = self.held.contains_key(key);

        let doc = self.patch_inner(key, &mut |doc: &mut ClusterDocument| {
            match doc.lease_owner.as_deref() {
                Some(current) if current == owner => {}
                _ if held => return Err(StoreError::LostLease),
                Some(current) if Self::lease_is_live(doc) => {
                    return Err(StoreError::LeaseHeld {
                        key: doc.key.clone(),
                        owner: current.to_string(),
                    })
                }
                _ => doc.lease_owner = Some(owner.clone()),
            }
            doc.lease_expires = expiry;
            Ok(())
        })?;

        self.held.insert(key.to_string(), ());
        Ok(doc)
    }

    async fn end_lease(
        &self,
        key: &str,
        state: ProvisioningState,
        failed_state: Option<ProvisioningState>,
        admin_update_error: Option<String>,
    ) -> Result<ClusterDocument, StoreError> {
        let owner = self.owner.clone();

        let result = self.patch_inner(key, &mut |doc: &mut ClusterDocument| {
            if doc.lease_owner.as_deref() != Some(owner.as_str()) {
                return Err(StoreError::LostLease);
            }
            doc.cluster.provisioning_state = state;
            doc.cluster.last_provisioning_state = None;
            doc.cluster.failed_provisioning_state = failed_state;
            if let Some(message) = &admin_update_error {
                doc.cluster.last_admin_update_error.clone_from(message);
            }
            doc.cluster.maintenance_task = MaintenanceTask::None;
            doc.lease_owner = None;
            doc.lease_expires = 0;
            doc.dequeues = 0;
            doc.async_operation_id = None;
            Ok(())
        });

        self.held.remove(key);
        result
    }

    async fn dequeue(&self) -> Result<Option<ClusterDocument>, StoreError> {
        let candidates: Vec<String> = self
            .shared
            .docs
            .iter()
            .filter(|doc| !doc.cluster.provisioning_state.is_terminal() && !Self::lease_is_live(doc))
            .map(|doc| doc.key.clone())
            .collect();

        for key in candidates {
            match self.lease(&key).await {
                Ok(_) => {
                    let doc = self.patch_inner(&key, &mut |doc: &mut ClusterDocument| {
                        doc.dequeues += 1;
                        Ok(())
                    })?;
                    return Ok(Some(doc));
                }
                Err(err) if err.is_retryable() => {
                    debug!(key = %key, error = %err, "record taken by another client");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.held.remove(key);
        self.shared
            .docs
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}
