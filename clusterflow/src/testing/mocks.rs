//! A recording platform for driving pipelines without a cloud.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::api::ClusterDocument;
use crate::cluster::{Lookup, Operation, Platform, Readiness};
use crate::errors::{CloudError, StepError};

/// A [`Platform`] that records operations and answers from configurable
/// canned values.
///
/// By default every operation succeeds, every readiness check is ready on
/// the first poll and lookups return fixed values.
#[derive(Debug)]
pub struct RecordingPlatform {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<Operation, CloudError>>,
    authorization_failures: Mutex<HashMap<Operation, usize>>,
    lookup_authorization_failures: Mutex<HashMap<Lookup, usize>>,
    never_ready: Mutex<HashSet<Readiness>>,
    ready_after: Mutex<HashMap<Readiness, usize>>,
    polls: Mutex<HashMap<Readiness, usize>>,
    lookups: Mutex<HashMap<Lookup, String>>,
    identities: Mutex<BTreeMap<String, String>>,
    failure_logs: Mutex<Vec<String>>,
    failure_log_requests: Mutex<usize>,
}

impl Default for RecordingPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingPlatform {
    /// Creates a platform where everything succeeds.
    #[must_use]
    pub fn new() -> Self {
        let lookups = HashMap::from([
            (Lookup::ServicePrincipalObjectId, "sp-object-id".to_string()),
            (Lookup::ApiServerPrivateIp, "10.0.0.4".to_string()),
            (Lookup::RouterIp, "20.1.2.3".to_string()),
            (Lookup::RegistryStorageAccountName, "imageregistryabc".to_string()),
        ]);
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            authorization_failures: Mutex::new(HashMap::new()),
            lookup_authorization_failures: Mutex::new(HashMap::new()),
            never_ready: Mutex::new(HashSet::new()),
            ready_after: Mutex::new(HashMap::new()),
            polls: Mutex::new(HashMap::new()),
            lookups: Mutex::new(lookups),
            identities: Mutex::new(BTreeMap::new()),
            failure_logs: Mutex::new(Vec::new()),
            failure_log_requests: Mutex::new(0),
        }
    }

    /// Returns the operations executed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Makes `operation` fail on every call.
    pub fn fail_always(&self, operation: Operation, status_code: u16, code: &str, message: &str) {
        self.failures
            .lock()
            .insert(operation, CloudError::new(status_code, code, message));
    }

    /// Makes the next `times` calls of `operation` fail with an
    /// authorization error.
    pub fn fail_authorization(&self, operation: Operation, times: usize) {
        self.authorization_failures.lock().insert(operation, times);
    }

    /// Makes the next `times` reads of `lookup` fail with an authorization
    /// error.
    pub fn fail_lookup_authorization(&self, lookup: Lookup, times: usize) {
        self.lookup_authorization_failures.lock().insert(lookup, times);
    }

    /// Makes `check` never report ready.
    pub fn never_ready(&self, check: Readiness) {
        self.never_ready.lock().insert(check);
    }

    /// Makes `check` report ready from poll number `polls` onwards.
    pub fn ready_after(&self, check: Readiness, polls: usize) {
        self.ready_after.lock().insert(check, polls);
    }

    /// Returns how many times `check` was polled.
    #[must_use]
    pub fn poll_count(&self, check: Readiness) -> usize {
        self.polls.lock().get(&check).copied().unwrap_or_default()
    }

    /// Overrides the value returned for `lookup`.
    pub fn set_lookup(&self, lookup: Lookup, value: impl Into<String>) {
        self.lookups.lock().insert(lookup, value.into());
    }

    /// Sets the workload identities and their object ids.
    pub fn set_identities<I, K, V>(&self, identities: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        *self.identities.lock() = identities
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
    }

    /// Sets the lines returned when failure logs are gathered.
    pub fn set_failure_logs(&self, lines: Vec<String>) {
        *self.failure_logs.lock() = lines;
    }

    /// Returns how many times failure logs were gathered.
    #[must_use]
    pub fn failure_log_requests(&self) -> usize {
        *self.failure_log_requests.lock()
    }

    fn authorization_error() -> StepError {
        StepError::cloud(
            403,
            "AuthorizationFailed",
            "The client does not have authorization to perform action",
        )
    }

    fn take_one<K: std::hash::Hash + Eq>(map: &Mutex<HashMap<K, usize>>, key: &K) -> bool {
        let mut map = map.lock();
        match map.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    async fn execute(&self, operation: Operation, _doc: &ClusterDocument) -> Result<(), StepError> {
        self.calls.lock().push(operation.as_str().to_string());
        if Self::take_one(&self.authorization_failures, &operation) {
            return Err(Self::authorization_error());
        }
        if let Some(err) = self.failures.lock().get(&operation) {
            return Err(StepError::Cloud(err.clone()));
        }
        Ok(())
    }

    async fn is_ready(&self, check: Readiness, _doc: &ClusterDocument) -> Result<bool, StepError> {
        let polls = {
            let mut polls = self.polls.lock();
            let count = polls.entry(check).or_default();
            *count += 1;
            *count
        };
        if self.never_ready.lock().contains(&check) {
            return Ok(false);
        }
        Ok(self
            .ready_after
            .lock()
            .get(&check)
            .map_or(true, |after| polls >= *after))
    }

    async fn lookup(&self, lookup: Lookup, _doc: &ClusterDocument) -> Result<String, StepError> {
        if Self::take_one(&self.lookup_authorization_failures, &lookup) {
            return Err(Self::authorization_error());
        }
        self.lookups
            .lock()
            .get(&lookup)
            .cloned()
            .ok_or_else(|| StepError::Other(anyhow::anyhow!("no value for {lookup:?}")))
    }

    async fn platform_workload_identity_ids(
        &self,
        _doc: &ClusterDocument,
    ) -> Result<BTreeMap<String, String>, StepError> {
        Ok(self.identities.lock().clone())
    }

    async fn gather_failure_logs(&self, _doc: &ClusterDocument) -> Vec<String> {
        *self.failure_log_requests.lock() += 1;
        self.failure_logs.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_after_polls() {
        let platform = RecordingPlatform::new();
        let doc = ClusterDocument::default();
        platform.ready_after(Readiness::ApiServers, 3);

        assert!(!platform.is_ready(Readiness::ApiServers, &doc).await.unwrap());
        assert!(!platform.is_ready(Readiness::ApiServers, &doc).await.unwrap());
        assert!(platform.is_ready(Readiness::ApiServers, &doc).await.unwrap());
        assert_eq!(platform.poll_count(Readiness::ApiServers), 3);
        assert!(platform.is_ready(Readiness::ClusterVersion, &doc).await.unwrap());
    }

    #[tokio::test]
    async fn test_authorization_failures_run_out() {
        let platform = RecordingPlatform::new();
        let doc = ClusterDocument::default();
        platform.fail_authorization(Operation::StartVms, 1);

        let err = platform.execute(Operation::StartVms, &doc).await.unwrap_err();
        assert!(err.is_authorization_failure());
        platform.execute(Operation::StartVms, &doc).await.unwrap();
        assert_eq!(platform.calls(), vec!["start_vms", "start_vms"]);
    }
}
