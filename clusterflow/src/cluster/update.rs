//! Update pipeline.

use super::platform::{Operation, Readiness};
use super::{minutes, op, retrying_op, wait_for, Manager};
use crate::api::ClusterRecord;
use crate::errors::ClusterflowError;
use crate::steps::{RunReport, Step};
use tracing::info;

/// Builds the update pipeline, which rotates credentials and certificates
/// and reconciles orchestrator resources when `hive_enabled`.
#[must_use]
pub fn update_steps(record: &ClusterRecord, hive_enabled: bool) -> Vec<Step<Manager>> {
    let mut steps = vec![
        retrying_op(Operation::ValidateResources),
        op(Operation::InitializeKubernetesClients),
        op(Operation::InitializeOperatorDeployer),
    ];

    if record.workload_identity_mode {
        steps.extend([
            op(Operation::EnsureClusterMsiCertificate),
            op(Operation::InitializeClusterMsiClients),
            action!(platform_workload_identity_ids),
            op(Operation::FederateIdentityCredentials),
        ]);
    } else {
        steps.extend([
            op(Operation::InitializeClusterSpClients),
            action!(cluster_sp_object_id),
            op(Operation::CreateOrUpdateClusterServicePrincipalRbac),
        ]);
    }

    steps.extend([
        op(Operation::CreateOrUpdateDenyAssignment),
        op(Operation::StartVms),
        wait_for(Readiness::ApiServers, minutes(30), true),
        op(Operation::ConfigureApiServerCertificate),
        op(Operation::ConfigureIngressCertificate),
    ]);

    if !record.workload_identity_mode {
        steps.push(op(Operation::UpdateOpenShiftSecret));
    }
    steps.push(op(Operation::UpdateAroSecret));

    if hive_enabled {
        steps.extend([
            op(Operation::HiveCreateNamespace),
            op(Operation::HiveEnsureResources),
            wait_for(Readiness::HiveClusterDeployment, minutes(5), true),
            action!(hive_reset_correlation_data),
        ]);
    }

    steps
}

impl Manager {
    /// Runs the update pipeline for the current record.
    ///
    /// # Errors
    ///
    /// Returns the first fatal step error.
    pub async fn update(&mut self) -> Result<RunReport, ClusterflowError> {
        let steps = update_steps(&self.doc.cluster, self.uses_hive());
        info!(key = %self.doc.key, steps = steps.len(), "running update");
        self.run_steps(&steps).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MaintenanceTask;
    use crate::steps::describe;
    use crate::testing::{assert_pipeline_shape, cluster_record, seeded_manager};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_service_principal_shape() {
        let record = cluster_record("4.14.16", MaintenanceTask::None);

        assert_pipeline_shape(
            &update_steps(&record, false),
            &[
                "[AuthorizationRetryingAction validate_resources-fm]",
                "[Action initialize_kubernetes_clients-fm]",
                "[Action initialize_operator_deployer-fm]",
                "[Action initialize_cluster_sp_clients-fm]",
                "[Action cluster_sp_object_id-fm]",
                "[Action create_or_update_cluster_service_principal_rbac-fm]",
                "[Action create_or_update_deny_assignment-fm]",
                "[Action start_vms-fm]",
                "[Condition api_servers_ready-fm, timeout 1800s]",
                "[Action configure_api_server_certificate-fm]",
                "[Action configure_ingress_certificate-fm]",
                "[Action update_openshift_secret-fm]",
                "[Action update_aro_secret-fm]",
            ],
        );
    }

    #[test]
    fn test_workload_identity_with_hive_shape() {
        let mut record = cluster_record("4.14.16", MaintenanceTask::None);
        record.workload_identity_mode = true;
        record.service_principal = None;

        assert_eq!(
            describe(&update_steps(&record, true)),
            vec![
                "[AuthorizationRetryingAction validate_resources-fm]",
                "[Action initialize_kubernetes_clients-fm]",
                "[Action initialize_operator_deployer-fm]",
                "[Action ensure_cluster_msi_certificate-fm]",
                "[Action initialize_cluster_msi_clients-fm]",
                "[Action platform_workload_identity_ids-fm]",
                "[Action federate_identity_credentials-fm]",
                "[Action create_or_update_deny_assignment-fm]",
                "[Action start_vms-fm]",
                "[Condition api_servers_ready-fm, timeout 1800s]",
                "[Action configure_api_server_certificate-fm]",
                "[Action configure_ingress_certificate-fm]",
                "[Action update_aro_secret-fm]",
                "[Action hive_create_namespace-fm]",
                "[Action hive_ensure_resources-fm]",
                "[Condition hive_cluster_deployment_ready-fm, timeout 300s]",
                "[Action hive_reset_correlation_data-fm]",
            ]
        );
    }

    #[tokio::test]
    async fn test_update_records_identities() {
        let mut record = cluster_record("4.14.16", MaintenanceTask::None);
        record.workload_identity_mode = true;
        record.service_principal = None;
        let (mut manager, platform, _store) = seeded_manager(record).await;
        platform.set_identities([("cloud-controller-manager", "ccm-object-id")]);

        manager.update().await.unwrap();
        assert_eq!(
            manager
                .doc()
                .cluster
                .platform_workload_identities
                .get("cloud-controller-manager")
                .map(String::as_str),
            Some("ccm-object-id")
        );
        assert!(platform
            .calls()
            .contains(&"federate_identity_credentials".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hive_wait_is_fatal_on_update() {
        let (manager, platform, _store) =
            seeded_manager(cluster_record("4.14.16", MaintenanceTask::None)).await;
        platform.never_ready(Readiness::HiveClusterDeployment);
        let mut manager = manager.with_adopt_via_hive(true);

        let err = manager.update().await.unwrap_err();
        assert_eq!(
            err.failed_step(),
            Some("[Condition hive_cluster_deployment_ready-fm, timeout 300s]")
        );
    }
}
