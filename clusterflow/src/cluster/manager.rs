//! The context every cluster step runs against.

use super::platform::{Authorizer, Operation, Platform, Prerequisite, Readiness, StaticAuthorizer};
use crate::api::ClusterDocument;
use crate::cancellation::CancellationToken;
use crate::config::ManagerConfig;
use crate::errors::{ClusterflowError, StepError, StoreError};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::steps::{RunReport, Runner, Step, StepContext};
use crate::store::ClusterStore;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Client state prepared during the current run.
///
/// Clients are never persisted; a step that needs one fails with a
/// precondition error unless an earlier step of the same run prepared it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunScratch {
    prepared: BTreeSet<Prerequisite>,
}

impl RunScratch {
    /// Returns true if the prerequisite has been prepared.
    #[must_use]
    pub fn is_prepared(&self, prerequisite: Prerequisite) -> bool {
        self.prepared.contains(&prerequisite)
    }

    pub(crate) fn require(&self, prerequisite: Prerequisite) -> Result<(), StepError> {
        if self.is_prepared(prerequisite) {
            Ok(())
        } else {
            Err(StepError::precondition(format!("{prerequisite} not initialized")))
        }
    }

    pub(crate) fn mark(&mut self, prerequisite: Prerequisite) {
        self.prepared.insert(prerequisite);
    }
}

/// Drives lifecycle pipelines for one cluster document.
///
/// The manager holds the latest copy of the document it has seen and
/// refreshes it after every write it makes.
pub struct Manager {
    pub(crate) doc: ClusterDocument,
    pub(crate) store: Arc<dyn ClusterStore>,
    pub(crate) platform: Arc<dyn Platform>,
    authorizer: Arc<dyn Authorizer>,
    pub(crate) adopt_via_hive: bool,
    pub(crate) install_via_hive: bool,
    pub(crate) hive_available: bool,
    pub(crate) config: ManagerConfig,
    pub(crate) scratch: RunScratch,
    events: Arc<dyn EventSink>,
    cancellation: Arc<CancellationToken>,
}

impl Manager {
    /// Creates a manager for `doc`.
    #[must_use]
    pub fn new(doc: ClusterDocument, store: Arc<dyn ClusterStore>, platform: Arc<dyn Platform>) -> Self {
        Self {
            doc,
            store,
            platform,
            authorizer: Arc::new(StaticAuthorizer),
            adopt_via_hive: false,
            install_via_hive: false,
            hive_available: false,
            config: ManagerConfig::default(),
            scratch: RunScratch::default(),
            events: Arc::new(NoOpEventSink),
            cancellation: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the authorizer refreshed before authorization retries.
    #[must_use]
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Adopts existing clusters into the orchestrator during full admin
    /// updates. Implies the orchestrator is available.
    #[must_use]
    pub fn with_adopt_via_hive(mut self, adopt: bool) -> Self {
        self.adopt_via_hive = adopt;
        self.hive_available |= adopt;
        self
    }

    /// Installs new clusters through the orchestrator.
    #[must_use]
    pub fn with_install_via_hive(mut self, install: bool) -> Self {
        self.install_via_hive = install;
        self
    }

    /// Declares whether an orchestrator client is configured.
    #[must_use]
    pub fn with_hive_available(mut self, available: bool) -> Self {
        self.hive_available = available;
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Sets the cancellation token shared with the caller.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    /// Returns the latest known document.
    #[must_use]
    pub fn doc(&self) -> &ClusterDocument {
        &self.doc
    }

    /// Returns the client state prepared by the last run.
    #[must_use]
    pub fn scratch(&self) -> &RunScratch {
        &self.scratch
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn ClusterStore> {
        Arc::clone(&self.store)
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.cancellation)
    }

    /// Returns true if orchestrator steps apply to this cluster.
    #[must_use]
    pub fn uses_hive(&self) -> bool {
        self.adopt_via_hive || self.install_via_hive
    }

    /// Runs `steps` with fresh client state, reporting step durations on
    /// success and gathering diagnostics on failure.
    pub(crate) async fn run_steps(&mut self, steps: &[Step<Self>]) -> Result<RunReport, ClusterflowError> {
        self.scratch = RunScratch::default();
        let runner = Runner::new(self.config.poll_interval())
            .with_authorization_retry(self.config.authorization_retry.clone())
            .with_event_sink(Arc::clone(&self.events))
            .with_cancellation_token(Arc::clone(&self.cancellation));

        match runner.run(self, steps).await {
            Ok(report) => {
                self.emit_step_durations(&report);
                Ok(report)
            }
            Err(err) => {
                self.gather_failure_logs().await;
                Err(err)
            }
        }
    }

    fn emit_step_durations(&self, report: &RunReport) {
        let mut by_topic: BTreeMap<&str, u64> = BTreeMap::new();
        for timing in &report.timings {
            let ms = u64::try_from(timing.duration.as_millis()).unwrap_or(u64::MAX);
            *by_topic.entry(timing.topic.as_str()).or_default() += ms;
        }

        let mut total = 0u64;
        for (topic, ms) in by_topic {
            total = total.saturating_add(ms);
            self.events.try_emit(
                events::CLUSTER_STEP_DURATION,
                Some(serde_json::json!({"topic": topic, "duration_ms": ms})),
            );
        }
        self.events.try_emit(
            events::CLUSTER_TOTAL_DURATION,
            Some(serde_json::json!({"duration_ms": total})),
        );
    }

    async fn gather_failure_logs(&self) {
        for line in self.platform.gather_failure_logs(&self.doc).await {
            info!(key = %self.doc.key, "{line}");
        }
    }

    /// Applies `mutate` under the lease and adopts the written document.
    pub(crate) async fn patch<F>(&mut self, mut mutate: F) -> Result<(), StoreError>
    where
        F: FnMut(&mut ClusterDocument) -> Result<(), StoreError> + Send,
    {
        let key = self.doc.key.clone();
        self.doc = self.store.patch_with_lease(&key, &mut mutate).await?;
        Ok(())
    }

    /// Runs a platform operation after checking its prerequisite.
    pub(crate) async fn execute(&mut self, operation: Operation) -> Result<(), StepError> {
        if let Some(prerequisite) = operation.prerequisite() {
            self.scratch.require(prerequisite)?;
        }
        self.platform.execute(operation, &self.doc).await?;
        if let Some(provided) = operation.provides() {
            debug!(operation = %operation, "prepared {provided}");
            self.scratch.mark(provided);
        }
        Ok(())
    }

    /// Polls a readiness signal once.
    pub(crate) async fn is_ready(&mut self, check: Readiness) -> Result<bool, StepError> {
        if let Some(prerequisite) = check.prerequisite() {
            self.scratch.require(prerequisite)?;
        }
        self.platform.is_ready(check, &self.doc).await
    }
}

#[async_trait]
impl StepContext for Manager {
    async fn refresh_authorization(&mut self) -> Result<(), StepError> {
        self.authorizer.refresh().await
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("key", &self.doc.key)
            .field("provisioning_state", &self.doc.cluster.provisioning_state)
            .field("adopt_via_hive", &self.adopt_via_hive)
            .field("install_via_hive", &self.install_via_hive)
            .field("scratch", &self.scratch)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MaintenanceTask;
    use crate::cluster::{op, wait_for};
    use crate::events::CollectingEventSink;
    use crate::testing::{cluster_record, seeded_manager};
    use std::time::Duration;

    #[tokio::test]
    async fn test_execute_requires_prerequisite() {
        let (mut manager, platform, _store) =
            seeded_manager(cluster_record("4.10.20", MaintenanceTask::None)).await;

        let err = manager.execute(Operation::InitializeOperatorDeployer).await.unwrap_err();
        assert!(matches!(err, StepError::Precondition(_)));
        assert!(platform.calls().is_empty());

        manager.execute(Operation::InitializeKubernetesClients).await.unwrap();
        manager.execute(Operation::InitializeOperatorDeployer).await.unwrap();
        assert!(manager.scratch().is_prepared(Prerequisite::OperatorDeployer));
    }

    #[tokio::test]
    async fn test_run_steps_resets_scratch() {
        let (mut manager, _platform, _store) =
            seeded_manager(cluster_record("4.10.20", MaintenanceTask::None)).await;

        manager
            .run_steps(&[op(Operation::InitializeKubernetesClients)])
            .await
            .unwrap();
        assert!(manager.scratch().is_prepared(Prerequisite::KubernetesClients));

        let err = manager
            .run_steps(&[wait_for(Readiness::ApiServers, Duration::from_secs(1), true)])
            .await
            .unwrap_err();
        assert_eq!(
            err.failed_step(),
            Some("[Condition api_servers_ready-fm, timeout 1s]")
        );
    }

    #[tokio::test]
    async fn test_run_steps_reports_durations() {
        let (manager, _platform, _store) =
            seeded_manager(cluster_record("4.10.20", MaintenanceTask::None)).await;
        let sink = Arc::new(CollectingEventSink::new());
        let mut manager = manager.with_event_sink(sink.clone());

        manager
            .run_steps(&[
                op(Operation::StartVms),
                op(Operation::EnsureBillingRecord).with_metric_topic("billing"),
            ])
            .await
            .unwrap();

        let topics: Vec<String> = sink
            .payloads_of(events::CLUSTER_STEP_DURATION)
            .iter()
            .filter_map(|p| p["topic"].as_str().map(String::from))
            .collect();
        assert_eq!(topics, vec!["billing", "start_vms"]);
        assert_eq!(sink.payloads_of(events::CLUSTER_TOTAL_DURATION).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_run_gathers_logs() {
        let (mut manager, platform, _store) =
            seeded_manager(cluster_record("4.10.20", MaintenanceTask::None)).await;
        platform.fail_always(Operation::StartVms, 500, "InternalServerError", "boom");
        platform.set_failure_logs(vec!["bootstrap journal: etcd not ready".to_string()]);

        let err = manager.run_steps(&[op(Operation::StartVms)]).await.unwrap_err();
        assert_eq!(err.failed_step(), Some("[Action start_vms-fm]"));
        assert!(err.to_string().ends_with("boom"));
        assert_eq!(platform.failure_log_requests(), 1);
    }

    #[tokio::test]
    async fn test_successful_run_skips_failure_logs() {
        let (mut manager, platform, _store) =
            seeded_manager(cluster_record("4.10.20", MaintenanceTask::None)).await;

        manager.run_steps(&[op(Operation::StartVms)]).await.unwrap();
        assert_eq!(platform.failure_log_requests(), 0);
    }
}
