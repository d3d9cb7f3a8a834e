//! Install pipeline, run one phase per lease.

use super::platform::{Operation, Readiness};
use super::{minutes, op, retrying_op, wait_for, Manager};
use crate::api::{ClusterRecord, InstallPhase};
use crate::errors::ClusterflowError;
use crate::steps::{RunReport, Step};
use tracing::info;

/// Builds the install pipeline for one phase.
///
/// # Errors
///
/// Returns [`ClusterflowError::UnrecognisedInstallPhase`] for a phase with
/// no step list.
pub fn install_steps(
    phase: InstallPhase,
    record: &ClusterRecord,
    install_via_hive: bool,
) -> Result<Vec<Step<Manager>>, ClusterflowError> {
    match phase {
        InstallPhase::Bootstrap => Ok(bootstrap(record, install_via_hive)),
        InstallPhase::RemoveBootstrap => Ok(remove_bootstrap()),
        InstallPhase::Done => Err(ClusterflowError::UnrecognisedInstallPhase(phase.to_string())),
    }
}

fn bootstrap(record: &ClusterRecord, install_via_hive: bool) -> Vec<Step<Manager>> {
    let mut steps = vec![
        retrying_op(Operation::ValidateResources),
        op(Operation::EnsureAcrToken),
        action!(ensure_infra_id),
        op(Operation::EnsureSshKey),
        action!(ensure_storage_suffix),
        action!(populate_mtu_size),
        op(Operation::CreateDns),
    ];

    if record.workload_identity_mode {
        steps.extend([
            op(Operation::CreateOidc),
            op(Operation::EnsureClusterMsiCertificate),
            op(Operation::InitializeClusterMsiClients),
            action!(platform_workload_identity_ids),
            op(Operation::FederateIdentityCredentials),
        ]);
    } else {
        steps.extend([
            op(Operation::InitializeClusterSpClients),
            action!(cluster_sp_object_id),
        ]);
    }

    steps.extend([
        retrying_op(Operation::EnsureResourceGroup),
        retrying_op(Operation::EnsureServiceEndpoints),
        retrying_op(Operation::SetMasterSubnetPolicies),
        retrying_op(Operation::DeployStorageTemplate),
        retrying_op(Operation::AttachNsgs),
        authorization_retrying_action!(update_api_ip_early),
        authorization_retrying_action!(create_or_update_router_ip_early),
        retrying_op(Operation::EnsureGatewayCreate),
        op(Operation::CreateApiServerPrivateEndpoint),
        op(Operation::CreateCertificates),
        op(Operation::HiveCreateNamespace),
    ]);

    if install_via_hive {
        steps.extend([
            op(Operation::RunHiveInstaller),
            wait_for(Readiness::HiveClusterInstallation, minutes(60), true),
            wait_for(Readiness::HiveClusterDeployment, minutes(5), true),
        ]);
    } else {
        steps.extend([
            op(Operation::RunIntegratedInstaller),
            op(Operation::HiveEnsureResources),
            wait_for(Readiness::HiveClusterDeployment, minutes(5), true),
        ]);
    }

    steps.extend([
        action!(hive_reset_correlation_data),
        retrying_op(Operation::GenerateKubeconfigs),
        op(Operation::EnsureBillingRecord),
        op(Operation::InitializeKubernetesClients),
        op(Operation::InitializeOperatorDeployer),
        wait_for(Readiness::ApiServers, minutes(30), true),
        op(Operation::EnsureAroOperator),
        action!(incr_install_phase),
    ]);
    steps
}

fn remove_bootstrap() -> Vec<Step<Manager>> {
    vec![
        op(Operation::InitializeKubernetesClients),
        op(Operation::InitializeOperatorDeployer)
            .with_metric_topic("finishing_phase_initialize_operator_deployer"),
        op(Operation::RemoveBootstrap),
        op(Operation::RemoveBootstrapIgnition),
        op(Operation::ConfigureApiServerCertificate),
        wait_for(Readiness::ApiServers, minutes(30), true)
            .with_metric_topic("finishing_phase_check_api_server"),
        wait_for(Readiness::MinimumWorkerNodes, minutes(30), true)
            .with_metric_topic("check_minimum_worker_nodes"),
        wait_for(Readiness::OperatorConsoleExists, minutes(30), true)
            .with_metric_topic("check_operator_console"),
        op(Operation::UpdateConsoleBranding),
        wait_for(Readiness::OperatorConsole, minutes(20), true)
            .with_metric_topic("check_operator_console"),
        wait_for(Readiness::ClusterVersion, minutes(30), true)
            .with_metric_topic("check_cluster_version"),
        wait_for(Readiness::AroDeployment, minutes(20), true)
            .with_metric_topic("check_aro_deployment"),
        op(Operation::DisableUpdates),
        op(Operation::DisableSamples),
        op(Operation::DisableOperatorHubSources),
        op(Operation::UpdateClusterData),
        op(Operation::ConfigureIngressCertificate),
        wait_for(Readiness::IngressController, minutes(30), true)
            .with_metric_topic("check_ingress_controller"),
        op(Operation::ConfigureDefaultStorageClass),
        action!(finish_installation),
    ]
}

impl Manager {
    /// Runs the install pipeline for the current install phase.
    ///
    /// The first call records the start of the install. Each successful
    /// phase except the last advances the phase; the last clears the
    /// install block.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterflowError::HiveUnavailable`] if installing through
    /// the orchestrator without one, or the first fatal step error.
    pub async fn install(&mut self) -> Result<RunReport, ClusterflowError> {
        if self.install_via_hive && !self.hive_available {
            return Err(ClusterflowError::HiveUnavailable);
        }

        self.start_installation().await?;
        let phase = self
            .doc
            .cluster
            .install
            .as_ref()
            .map(|install| install.phase)
            .unwrap_or_default();

        let steps = install_steps(phase, &self.doc.cluster, self.install_via_hive)?;
        info!(key = %self.doc.key, %phase, "starting phase {phase}");
        self.run_steps(&steps).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MaintenanceTask;
    use crate::steps::describe;
    use crate::testing::{assert_pipeline_contains, cluster_record, seeded_manager};
    use pretty_assertions::assert_eq;

    fn creating_record() -> ClusterRecord {
        let mut record = cluster_record("4.14.16", MaintenanceTask::None);
        record.provisioning_state = crate::api::ProvisioningState::Creating;
        record.last_provisioning_state = None;
        record.infra_id.clear();
        record.storage_suffix.clear();
        record.mtu_size = 0;
        record
    }

    #[test]
    fn test_bootstrap_shape() {
        let record = creating_record();

        assert_eq!(
            describe(&install_steps(InstallPhase::Bootstrap, &record, false).unwrap()),
            vec![
                "[AuthorizationRetryingAction validate_resources-fm]",
                "[Action ensure_acr_token-fm]",
                "[Action ensure_infra_id-fm]",
                "[Action ensure_ssh_key-fm]",
                "[Action ensure_storage_suffix-fm]",
                "[Action populate_mtu_size-fm]",
                "[Action create_dns-fm]",
                "[Action initialize_cluster_sp_clients-fm]",
                "[Action cluster_sp_object_id-fm]",
                "[AuthorizationRetryingAction ensure_resource_group-fm]",
                "[AuthorizationRetryingAction ensure_service_endpoints-fm]",
                "[AuthorizationRetryingAction set_master_subnet_policies-fm]",
                "[AuthorizationRetryingAction deploy_storage_template-fm]",
                "[AuthorizationRetryingAction attach_nsgs-fm]",
                "[AuthorizationRetryingAction update_api_ip_early-fm]",
                "[AuthorizationRetryingAction create_or_update_router_ip_early-fm]",
                "[AuthorizationRetryingAction ensure_gateway_create-fm]",
                "[Action create_api_server_private_endpoint-fm]",
                "[Action create_certificates-fm]",
                "[Action hive_create_namespace-fm]",
                "[Action run_integrated_installer-fm]",
                "[Action hive_ensure_resources-fm]",
                "[Condition hive_cluster_deployment_ready-fm, timeout 300s]",
                "[Action hive_reset_correlation_data-fm]",
                "[AuthorizationRetryingAction generate_kubeconfigs-fm]",
                "[Action ensure_billing_record-fm]",
                "[Action initialize_kubernetes_clients-fm]",
                "[Action initialize_operator_deployer-fm]",
                "[Condition api_servers_ready-fm, timeout 1800s]",
                "[Action ensure_aro_operator-fm]",
                "[Action incr_install_phase-fm]",
            ]
        );
    }

    #[test]
    fn test_bootstrap_via_hive_runs_hive_installer() {
        let pipeline = install_steps(InstallPhase::Bootstrap, &creating_record(), true).unwrap();
        assert_pipeline_contains(&pipeline, "[Action run_hive_installer-fm]");
        assert_pipeline_contains(
            &pipeline,
            "[Condition hive_cluster_installation_complete-fm, timeout 3600s]",
        );

        let steps = describe(&pipeline);
        assert!(!steps.contains(&"[Action run_integrated_installer-fm]".to_string()));
        assert!(!steps.contains(&"[Action hive_ensure_resources-fm]".to_string()));
    }

    #[test]
    fn test_bootstrap_workload_identity() {
        let mut record = creating_record();
        record.workload_identity_mode = true;
        record.service_principal = None;
        let steps = describe(&install_steps(InstallPhase::Bootstrap, &record, false).unwrap());

        assert_eq!(
            steps[7..12].to_vec(),
            vec![
                "[Action create_oidc-fm]",
                "[Action ensure_cluster_msi_certificate-fm]",
                "[Action initialize_cluster_msi_clients-fm]",
                "[Action platform_workload_identity_ids-fm]",
                "[Action federate_identity_credentials-fm]",
            ]
        );
        assert!(!steps.contains(&"[Action cluster_sp_object_id-fm]".to_string()));
    }

    #[test]
    fn test_remove_bootstrap_metric_topics() {
        let steps = install_steps(InstallPhase::RemoveBootstrap, &creating_record(), false).unwrap();

        assert_eq!(steps.first().map(|s| s.metric_topic()), Some("initialize_kubernetes_clients"));
        assert_eq!(steps[1].metric_topic(), "finishing_phase_initialize_operator_deployer");
        assert_eq!(
            steps.last().map(ToString::to_string),
            Some("[Action finish_installation-fm]".to_string())
        );
    }

    #[test]
    fn test_done_phase_is_unrecognised() {
        assert!(matches!(
            install_steps(InstallPhase::Done, &creating_record(), false),
            Err(ClusterflowError::UnrecognisedInstallPhase(phase)) if phase == "Done"
        ));
    }

    #[tokio::test]
    async fn test_install_runs_both_phases() {
        let (mut manager, platform, _store) = seeded_manager(creating_record()).await;

        manager.install().await.unwrap();
        let install = manager.doc().cluster.install.clone().unwrap();
        assert_eq!(install.phase, InstallPhase::RemoveBootstrap);
        assert!(!manager.doc().cluster.infra_id.is_empty());
        assert_eq!(manager.doc().cluster.storage_suffix.len(), 5);
        assert_eq!(manager.doc().cluster.mtu_size, crate::api::DEFAULT_MTU_SIZE);
        assert_eq!(manager.doc().cluster.api_server_int_ip, "10.0.0.4");
        assert!(platform.calls().contains(&"run_integrated_installer".to_string()));

        manager.install().await.unwrap();
        assert!(manager.doc().cluster.install.is_none());
        assert!(platform.calls().contains(&"remove_bootstrap".to_string()));
    }

    #[tokio::test]
    async fn test_install_via_hive_with_orchestrator() {
        let (manager, platform, _store) = seeded_manager(creating_record()).await;
        let mut manager = manager
            .with_install_via_hive(true)
            .with_hive_available(true);

        manager.install().await.unwrap();
        let calls = platform.calls();
        assert!(calls.contains(&"run_hive_installer".to_string()));
        assert!(!calls.contains(&"run_integrated_installer".to_string()));
        assert_eq!(
            manager.doc().cluster.install.as_ref().map(|i| i.phase),
            Some(InstallPhase::RemoveBootstrap)
        );
    }

    #[tokio::test]
    async fn test_install_via_hive_requires_orchestrator() {
        let (manager, platform, _store) = seeded_manager(creating_record()).await;
        let mut manager = manager.with_install_via_hive(true);

        assert!(matches!(
            manager.install().await,
            Err(ClusterflowError::HiveUnavailable)
        ));
        assert!(platform.calls().is_empty());
        assert!(manager.doc().cluster.install.is_none());
    }
}
