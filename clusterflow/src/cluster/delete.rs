//! Delete pipeline.

use super::platform::Operation;
use super::{op, Manager};
use crate::api::ClusterRecord;
use crate::errors::ClusterflowError;
use crate::steps::{RunReport, Step};
use tracing::info;

/// Builds the delete pipeline.
///
/// Resource group reconciliation runs first and never fails the pipeline;
/// the remaining steps tear down what install created, billing last.
#[must_use]
pub fn delete_steps(record: &ClusterRecord, hive_enabled: bool) -> Vec<Step<Manager>> {
    let mut steps = vec![
        action!(ensure_resource_group_best_effort),
        op(Operation::DeleteDns),
        op(Operation::DeletePrivateEndpoint),
    ];

    if record.workload_identity_mode {
        steps.push(op(Operation::DeleteOidc));
    }

    steps.extend([
        op(Operation::DeleteRoleAssignments),
        op(Operation::DeleteRoleDefinition),
        op(Operation::DeleteGateway),
        op(Operation::DeleteResourcesAndResourceGroup),
    ]);

    if record.workload_identity_mode {
        steps.extend([
            op(Operation::DeleteFederatedCredentials),
            op(Operation::DeleteClusterMsiCertificate),
        ]);
    }

    steps.extend([
        op(Operation::DeleteSignedCertificates),
        op(Operation::DeleteAcrToken),
    ]);

    if hive_enabled {
        steps.push(op(Operation::HiveDeleteResources));
    }

    steps.push(op(Operation::DeleteBillingRecord));
    steps
}

impl Manager {
    /// Runs the delete pipeline for the current record.
    ///
    /// # Errors
    ///
    /// Returns the first fatal step error.
    pub async fn delete(&mut self) -> Result<RunReport, ClusterflowError> {
        let steps = delete_steps(&self.doc.cluster, self.uses_hive());
        info!(key = %self.doc.key, steps = steps.len(), "running delete");
        self.run_steps(&steps).await
    }
}
