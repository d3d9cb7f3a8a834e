//! Dispatches a leased record to its lifecycle entry point and records the
//! outcome when the lease ends.

use super::Manager;
use crate::api::{ClusterDocument, ProvisioningState};
use crate::cancellation::CancellationToken;
use crate::errors::ClusterflowError;
use crate::steps::RunReport;
use crate::store::ClusterStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How a lifecycle run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// The pipeline succeeded and the lease was released.
    Completed {
        /// The document as written when the lease ended.
        doc: ClusterDocument,
        /// Step timings of the run.
        report: RunReport,
    },
    /// The delete pipeline succeeded and the record was removed.
    Deleted {
        /// Step timings of the run.
        report: RunReport,
    },
}

/// Renews the run lease in the background. If renewal fails the run is
/// cancelled.
struct Heartbeat {
    stop: Arc<CancellationToken>,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    fn start(
        store: Arc<dyn ClusterStore>,
        key: String,
        lease_duration: Duration,
        run: Arc<CancellationToken>,
    ) -> Self {
        let stop = Arc::new(CancellationToken::new());
        let period = (lease_duration / 6).max(Duration::from_millis(100));
        let stopped = Arc::clone(&stop);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = stopped.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                match store.lease(&key).await {
                    Ok(_) => debug!(key = %key, "renewed lease"),
                    Err(err) => {
                        error!(key = %key, error = %err, "failed to renew lease, cancelling run");
                        run.cancel(format!("lease renewal failed: {err}"));
                        return;
                    }
                }
            }
        });

        Self { stop, handle }
    }

    async fn stop(self) {
        self.stop.cancel("run finished");
        if let Err(err) = self.handle.await {
            warn!(error = %err, "lease heartbeat task failed");
        }
    }
}

/// Runs the entry point matching the record's provisioning state and ends
/// the lease with the resulting state.
///
/// | state | entry point | on success | on failure |
/// |---|---|---|---|
/// | `Creating` | install | `Succeeded` after the last phase, else `Creating` | `Failed` |
/// | `Updating` | update | `Succeeded` | `Failed` |
/// | `AdminUpdating` | admin update | previous state | previous state, error recorded |
/// | `Deleting` | delete | record removed | `Failed` |
///
/// The manager's record must be leased by its store client.
///
/// # Errors
///
/// Returns the pipeline error after the lease has ended,
/// [`ClusterflowError::NotActionable`] for other states, or a store error if
/// the lease could not be ended after a successful run.
pub async fn run_lifecycle(manager: &mut Manager) -> Result<LifecycleOutcome, ClusterflowError> {
    let key = manager.doc.key.clone();
    let initial = manager.doc.cluster.provisioning_state;
    let store = manager.store();

    if !matches!(
        initial,
        ProvisioningState::Creating
            | ProvisioningState::Updating
            | ProvisioningState::AdminUpdating
            | ProvisioningState::Deleting
    ) {
        warn!(key = %key, state = %initial, "record is not actionable, releasing lease");
        store
            .end_lease(&key, initial, manager.doc.cluster.failed_provisioning_state, None)
            .await?;
        return Err(ClusterflowError::NotActionable(initial));
    }

    info!(key = %key, state = %initial, "starting lifecycle run");
    let heartbeat = Heartbeat::start(
        Arc::clone(&store),
        key.clone(),
        manager.config.lease_duration(),
        manager.cancellation_token(),
    );

    let result = match initial {
        ProvisioningState::Creating => manager.install().await,
        ProvisioningState::Updating => manager.update().await,
        ProvisioningState::AdminUpdating => manager.admin_update().await,
        _ => manager.delete().await,
    };
    heartbeat.stop().await;

    if initial == ProvisioningState::AdminUpdating {
        return end_admin_update(manager, store.as_ref(), result).await;
    }

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            info!(key = %key, state = %initial, "lifecycle run failed");
            if let Err(end_err) = store
                .end_lease(&key, ProvisioningState::Failed, Some(initial), None)
                .await
            {
                warn!(key = %key, error = %end_err, "could not record failure");
            }
            return Err(err);
        }
    };

    match initial {
        ProvisioningState::Deleting => {
            store.delete(&key).await?;
            info!(key = %key, "deleted record");
            Ok(LifecycleOutcome::Deleted { report })
        }
        ProvisioningState::Creating => {
            let current = store.get(&key).await?;
            let state = if current.cluster.install.is_none() {
                ProvisioningState::Succeeded
            } else {
                ProvisioningState::Creating
            };
            complete(manager, store.as_ref(), state, None, report).await
        }
        _ => complete(manager, store.as_ref(), ProvisioningState::Succeeded, None, report).await,
    }
}

async fn end_admin_update(
    manager: &mut Manager,
    store: &dyn ClusterStore,
    result: Result<RunReport, ClusterflowError>,
) -> Result<LifecycleOutcome, ClusterflowError> {
    let key = manager.doc.key.clone();
    let current = match store.get(&key).await {
        Ok(doc) => doc,
        Err(_) => manager.doc.clone(),
    };
    let restore = current
        .cluster
        .last_provisioning_state
        .unwrap_or(ProvisioningState::Succeeded);
    let failed = current.cluster.failed_provisioning_state;

    match result {
        Ok(report) => complete(manager, store, restore, Some(String::new()), report).await,
        Err(err) => {
            info!(key = %key, "admin update failed, restoring {restore}");
            if let Err(end_err) = store
                .end_lease(&key, restore, failed, Some(err.to_string()))
                .await
            {
                warn!(key = %key, error = %end_err, "could not record admin update failure");
            }
            Err(err)
        }
    }
}

async fn complete(
    manager: &mut Manager,
    store: &dyn ClusterStore,
    state: ProvisioningState,
    admin_update_error: Option<String>,
    report: RunReport,
) -> Result<LifecycleOutcome, ClusterflowError> {
    let failed = if state == ProvisioningState::Succeeded {
        None
    } else {
        manager.doc.cluster.failed_provisioning_state
    };
    let doc = store
        .end_lease(&manager.doc.key, state, failed, admin_update_error)
        .await?;
    info!(key = %doc.key, state = %state, "lifecycle run completed");
    manager.doc = doc.clone();
    Ok(LifecycleOutcome::Completed { doc, report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{InstallPhase, MaintenanceTask};
    use crate::cluster::platform::{Operation, Readiness};
    use crate::errors::{StepError, StoreError};
    use crate::testing::{cluster_record, seeded_manager};

    fn completed_doc(outcome: LifecycleOutcome) -> ClusterDocument {
        match outcome {
            LifecycleOutcome::Completed { doc, .. } => doc,
            LifecycleOutcome::Deleted { .. } => panic!("expected a completed run"),
        }
    }

    #[tokio::test]
    async fn test_admin_update_restores_previous_state() {
        let (mut manager, _platform, store) =
            seeded_manager(cluster_record("4.10.20", MaintenanceTask::Everything)).await;

        let doc = completed_doc(run_lifecycle(&mut manager).await.unwrap());
        assert_eq!(doc.cluster.provisioning_state, ProvisioningState::Succeeded);
        assert_eq!(doc.cluster.maintenance_task, MaintenanceTask::None);
        assert_eq!(doc.cluster.last_admin_update_error, "");
        assert!(doc.lease_owner.is_none());
        assert_eq!(store.get(&doc.key).await.unwrap(), doc);
    }

    #[tokio::test]
    async fn test_admin_update_failure_records_error() {
        let (mut manager, platform, store) =
            seeded_manager(cluster_record("4.10.20", MaintenanceTask::Everything)).await;
        platform.fail_always(Operation::StartVms, 500, "InternalServerError", "boom");

        let err = run_lifecycle(&mut manager).await.unwrap_err();
        assert_eq!(err.failed_step(), Some("[Action start_vms-fm]"));

        let doc = store.get(&manager.doc().key).await.unwrap();
        assert_eq!(doc.cluster.provisioning_state, ProvisioningState::Succeeded);
        assert!(doc
            .cluster
            .last_admin_update_error
            .starts_with("step [Action start_vms-fm] encountered error"));
        assert!(doc.lease_owner.is_none());
    }

    #[tokio::test]
    async fn test_update_failure_marks_failed() {
        let mut record = cluster_record("4.10.20", MaintenanceTask::None);
        record.provisioning_state = ProvisioningState::Updating;
        let (mut manager, platform, store) = seeded_manager(record).await;
        platform.fail_always(Operation::UpdateAroSecret, 500, "InternalServerError", "boom");

        assert!(run_lifecycle(&mut manager).await.is_err());

        let doc = store.get(&manager.doc().key).await.unwrap();
        assert_eq!(doc.cluster.provisioning_state, ProvisioningState::Failed);
        assert_eq!(
            doc.cluster.failed_provisioning_state,
            Some(ProvisioningState::Updating)
        );
    }

    #[tokio::test]
    async fn test_install_advances_through_phases() {
        let mut record = cluster_record("4.14.16", MaintenanceTask::None);
        record.provisioning_state = ProvisioningState::Creating;
        record.last_provisioning_state = None;
        let (mut manager, _platform, store) = seeded_manager(record).await;
        let key = manager.doc().key.clone();

        let doc = completed_doc(run_lifecycle(&mut manager).await.unwrap());
        assert_eq!(doc.cluster.provisioning_state, ProvisioningState::Creating);
        assert_eq!(
            doc.cluster.install.as_ref().map(|i| i.phase),
            Some(InstallPhase::RemoveBootstrap)
        );

        store.lease(&key).await.unwrap();
        let doc = completed_doc(run_lifecycle(&mut manager).await.unwrap());
        assert_eq!(doc.cluster.provisioning_state, ProvisioningState::Succeeded);
        assert!(doc.cluster.install.is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let mut record = cluster_record("4.14.16", MaintenanceTask::None);
        record.provisioning_state = ProvisioningState::Deleting;
        let (mut manager, _platform, store) = seeded_manager(record).await;

        let outcome = run_lifecycle(&mut manager).await.unwrap();
        assert!(matches!(outcome, LifecycleOutcome::Deleted { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_terminal_state_is_not_actionable() {
        let mut record = cluster_record("4.14.16", MaintenanceTask::None);
        record.provisioning_state = ProvisioningState::Succeeded;
        let (mut manager, platform, store) = seeded_manager(record).await;

        assert!(matches!(
            run_lifecycle(&mut manager).await,
            Err(ClusterflowError::NotActionable(ProvisioningState::Succeeded))
        ));
        assert!(platform.calls().is_empty());
        assert!(store.get(&manager.doc().key).await.unwrap().lease_owner.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_lease_cancels_run() {
        let (mut manager, platform, store) =
            seeded_manager(cluster_record("4.10.20", MaintenanceTask::None)).await;
        platform.never_ready(Readiness::ApiServers);
        store.delete(&manager.doc().key).await.unwrap();

        let err = run_lifecycle(&mut manager).await.unwrap_err();
        assert!(matches!(
            err,
            ClusterflowError::StepFailed { source: StepError::Cancelled(_), .. }
        ));
        assert!(manager.cancellation_token().is_cancelled());
        assert!(matches!(
            store.get(&manager.doc().key).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
