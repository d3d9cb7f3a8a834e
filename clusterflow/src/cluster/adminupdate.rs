//! Admin update pipeline: maintenance tasks gated on cluster version.

use super::platform::{Operation, Readiness};
use super::{
    minutes, op, retrying_op, wait_for, Manager, CERTIFICATE_RENEWAL_MIN_VERSION,
    GENERAL_FIXES_MIN_VERSION, OPERATOR_UPDATE_MIN_VERSION,
};
use crate::api::{ClusterRecord, MaintenanceTask};
use crate::errors::ClusterflowError;
use crate::steps::{RunReport, Step};
use tracing::info;

/// Builds the admin update pipeline for `record`.
///
/// The prologue always runs. Task groups follow, each gated on the
/// maintenance task and the cluster's minor version:
///
/// 1. general fixes (`> 4.3`)
/// 2. certificate renewal (`> 4.3`)
/// 3. operator update (`>= 4.7`)
/// 4. cluster object sync (`>= 4.7`)
/// 5. orchestrator adoption (full maintenance only)
/// 6. provenance marking (full maintenance only, always last)
///
/// # Errors
///
/// Returns [`ClusterflowError::InvalidVersion`] if a task is set and the
/// cluster version cannot be parsed.
pub fn admin_update_steps(
    record: &ClusterRecord,
    adopt_via_hive: bool,
) -> Result<Vec<Step<Manager>>, ClusterflowError> {
    let mut steps = prologue(record);

    let task = record.maintenance_task;
    if task == MaintenanceTask::None {
        return Ok(steps);
    }
    let version = record.version()?;

    if task.requests_general_fixes() && version.above_minor(&GENERAL_FIXES_MIN_VERSION) {
        steps.extend(general_fixes());
    }

    if task.requests_certificate_renewal() && version.above_minor(&CERTIFICATE_RENEWAL_MIN_VERSION) {
        steps.extend(certificate_renewal());
    }

    if task.requests_operator_update() && version.at_least_minor(&OPERATOR_UPDATE_MIN_VERSION) {
        steps.extend(operator_update());
    }

    if task.requests_cluster_object_sync() && version.at_least_minor(&OPERATOR_UPDATE_MIN_VERSION) {
        steps.extend([
            op(Operation::InitializeOperatorDeployer),
            op(Operation::SyncClusterObject),
        ]);
    }

    if adopt_via_hive && !record.created_by_orchestrator && task.is_everything() {
        steps.extend(adoption());
    }

    if task.is_everything() {
        steps.push(action!(update_provisioned_by));
    }

    Ok(steps)
}

fn prologue(record: &ClusterRecord) -> Vec<Step<Manager>> {
    let mut steps = vec![
        op(Operation::InitializeKubernetesClients),
        op(Operation::EnsureBillingRecord),
        action!(ensure_defaults),
    ];

    if record.workload_identity_mode {
        steps.extend([
            op(Operation::EnsureClusterMsiCertificate),
            op(Operation::InitializeClusterMsiClients),
            action!(platform_workload_identity_ids),
        ]);
    } else {
        steps.push(authorization_retrying_action!(fixup_cluster_sp_object_id));
    }

    steps.extend([
        op(Operation::StartVms),
        wait_for(Readiness::ApiServers, minutes(30), true),
        action!(fix_infra_id),
    ]);
    steps
}

fn general_fixes() -> Vec<Step<Manager>> {
    vec![
        retrying_op(Operation::EnsureResourceGroup),
        op(Operation::CreateOrUpdateDenyAssignment),
        retrying_op(Operation::EnsureServiceEndpoints),
        // must precede the migration
        action!(populate_registry_storage_account_name),
        op(Operation::MigrateStorageAccounts),
        op(Operation::FixSsh),
        op(Operation::FixSreKubeconfig),
        op(Operation::FixUserAdminKubeconfig),
        action!(create_or_update_router_ip_from_cluster),
        op(Operation::EnsureGatewayUpgrade),
        op(Operation::RotateAcrTokenPassword),
        op(Operation::EnsureMtuSize),
    ]
}

fn certificate_renewal() -> Vec<Step<Manager>> {
    vec![
        action!(populate_database_int_ip),
        op(Operation::CorrectCertificateIssuer),
        op(Operation::FixMcsCert),
        op(Operation::FixMcsUserData),
        op(Operation::ConfigureApiServerCertificate),
        op(Operation::ConfigureIngressCertificate),
        op(Operation::InitializeOperatorDeployer),
        op(Operation::RenewMdsdCertificate),
    ]
}

fn operator_update() -> Vec<Step<Manager>> {
    vec![
        op(Operation::InitializeOperatorDeployer),
        op(Operation::EnsureAroOperator),
        wait_for(Readiness::AroDeployment, minutes(20), true),
        wait_for(Readiness::AroOperatorRunningDesiredVersion, minutes(5), true),
    ]
}

fn adoption() -> Vec<Step<Manager>> {
    vec![
        op(Operation::HiveCreateNamespace),
        op(Operation::HiveEnsureResources),
        wait_for(Readiness::HiveClusterDeployment, minutes(5), false),
        action!(hive_reset_correlation_data),
    ]
}

impl Manager {
    /// Runs the admin update pipeline for the current record.
    ///
    /// # Errors
    ///
    /// Returns the first fatal step error, or an error if the pipeline
    /// cannot be built.
    pub async fn admin_update(&mut self) -> Result<RunReport, ClusterflowError> {
        let steps = admin_update_steps(&self.doc.cluster, self.adopt_via_hive)?;
        info!(
            key = %self.doc.key,
            task = ?self.doc.cluster.maintenance_task,
            steps = steps.len(),
            "running admin update"
        );
        self.run_steps(&steps).await
    }
}
