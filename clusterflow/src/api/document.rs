//! The persisted cluster document and its enums.

use super::ClusterVersion;
use crate::errors::ClusterflowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default outbound type for clusters created before the field existed.
pub const DEFAULT_OUTBOUND_TYPE: &str = "Loadbalancer";

/// Default MTU for clusters created before the field existed.
pub const DEFAULT_MTU_SIZE: u32 = 1500;

/// Provisioning state of a cluster record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProvisioningState {
    /// The cluster is being installed.
    Creating,
    /// Customer-initiated update (credential rotation).
    Updating,
    /// Operator-initiated maintenance.
    AdminUpdating,
    /// The cluster is being deleted.
    Deleting,
    /// Last operation succeeded.
    #[default]
    Succeeded,
    /// Last operation failed.
    Failed,
    /// Last operation was cancelled.
    Canceled,
}

impl ProvisioningState {
    /// Returns true if no backend work is pending for this state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "Creating",
            Self::Updating => "Updating",
            Self::AdminUpdating => "AdminUpdating",
            Self::Deleting => "Deleting",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
        };
        f.write_str(s)
    }
}

/// Maintenance work requested for an admin update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MaintenanceTask {
    /// No maintenance requested.
    #[default]
    #[serde(rename = "")]
    None,
    /// General fixes, certificate renewal, operator update and adoption.
    Everything,
    /// Operator update only.
    Operator,
    /// Certificate renewal only.
    RenewCerts,
    /// Re-sync the operator's cluster object only.
    SyncClusterObject,
}

impl MaintenanceTask {
    /// Returns true if the general fix-up group should be considered.
    #[must_use]
    pub fn requests_general_fixes(&self) -> bool {
        matches!(self, Self::Everything)
    }

    /// Returns true if the certificate renewal group should be considered.
    #[must_use]
    pub fn requests_certificate_renewal(&self) -> bool {
        matches!(self, Self::Everything | Self::RenewCerts)
    }

    /// Returns true if the operator update group should be considered.
    #[must_use]
    pub fn requests_operator_update(&self) -> bool {
        matches!(self, Self::Everything | Self::Operator)
    }

    /// Returns true if only the cluster object sync was requested.
    #[must_use]
    pub fn requests_cluster_object_sync(&self) -> bool {
        matches!(self, Self::SyncClusterObject)
    }

    /// Returns true for the full maintenance cycle.
    #[must_use]
    pub fn is_everything(&self) -> bool {
        matches!(self, Self::Everything)
    }
}

/// Install phases. Each phase has its own step list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InstallPhase {
    /// Infrastructure and bootstrap node.
    #[default]
    Bootstrap,
    /// Bootstrap teardown and cluster configuration.
    RemoveBootstrap,
    /// Past the final phase.
    Done,
}

impl InstallPhase {
    /// Returns the phase that follows this one.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Bootstrap => Self::RemoveBootstrap,
            Self::RemoveBootstrap | Self::Done => Self::Done,
        }
    }
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bootstrap => "Bootstrap",
            Self::RemoveBootstrap => "RemoveBootstrap",
            Self::Done => "Done",
        };
        f.write_str(s)
    }
}

/// Install progress persisted while a cluster is being created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Install {
    /// When the install started.
    pub now: DateTime<Utc>,
    /// Current phase.
    #[serde(default)]
    pub phase: InstallPhase,
}

/// Service principal identity used by clusters without workload identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePrincipalProfile {
    /// Application (client) id.
    pub client_id: String,
    /// Directory object id, resolved from the client id.
    #[serde(default)]
    pub sp_object_id: String,
}

/// Correlation data for the request that triggered the current operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationData {
    /// Client request id.
    #[serde(default)]
    pub client_request_id: String,
    /// Correlation id.
    #[serde(default)]
    pub correlation_id: String,
    /// Request id.
    #[serde(default)]
    pub request_id: String,
}

/// The cluster properties relevant to lifecycle pipelines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterRecord {
    /// Resource id as supplied by the caller (mixed case).
    pub id: String,
    /// Resource name.
    pub name: String,
    /// Region.
    pub location: String,
    /// Current provisioning state.
    pub provisioning_state: ProvisioningState,
    /// State before the current operation started.
    pub last_provisioning_state: Option<ProvisioningState>,
    /// Operation that failed, if the state is `Failed`.
    pub failed_provisioning_state: Option<ProvisioningState>,
    /// Requested admin maintenance.
    pub maintenance_task: MaintenanceTask,
    /// Installed cluster version.
    pub cluster_version: String,
    /// Managed resource group id.
    pub resource_group_id: String,
    /// The record was provisioned through the orchestrator.
    pub created_by_orchestrator: bool,
    /// The cluster authenticates with platform workload identities.
    pub workload_identity_mode: bool,
    /// Service principal profile (absent in workload identity mode).
    pub service_principal: Option<ServicePrincipalProfile>,
    /// Platform workload identities by operator name, mapped to object ids.
    pub platform_workload_identities: BTreeMap<String, String>,
    /// Infrastructure identifier used to name cloud resources.
    pub infra_id: String,
    /// Random suffix for storage account names.
    pub storage_suffix: String,
    /// Storage account backing the image registry.
    pub image_registry_storage_account_name: String,
    /// Internal load balancer address of the API server.
    pub api_server_int_ip: String,
    /// Public address of the default router.
    pub ingress_ip: String,
    /// Outbound routing type.
    pub outbound_type: String,
    /// Machine network MTU.
    pub mtu_size: u32,
    /// Version of the component that last completed a full admin update.
    pub provisioned_by: String,
    /// Error text of the last failed admin update.
    pub last_admin_update_error: String,
    /// Install progress, present only while installing.
    pub install: Option<Install>,
}

impl ClusterRecord {
    /// Parses the installed cluster version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version string is malformed.
    pub fn version(&self) -> Result<ClusterVersion, ClusterflowError> {
        ClusterVersion::parse(&self.cluster_version)
    }

    /// Fills in fields that older records may lack. Returns true if anything
    /// changed.
    pub fn set_defaults(&mut self) -> bool {
        let mut changed = false;
        if self.outbound_type.is_empty() {
            self.outbound_type = DEFAULT_OUTBOUND_TYPE.to_string();
            changed = true;
        }
        if self.mtu_size == 0 {
            self.mtu_size = DEFAULT_MTU_SIZE;
            changed = true;
        }
        changed
    }

    /// Name of the managed resource group.
    #[must_use]
    pub fn resource_group_name(&self) -> &str {
        self.resource_group_id
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

/// A versioned cluster document as held by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDocument {
    /// Document id.
    pub id: String,
    /// Lower-cased resource id.
    pub key: String,
    /// Partition key (subscription id).
    #[serde(default)]
    pub partition_key: String,
    /// Optimistic concurrency tag, assigned by the store.
    #[serde(rename = "_etag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Current lease holder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<String>,
    /// Lease expiry as a unix timestamp in seconds.
    #[serde(default)]
    pub lease_expires: i64,
    /// Number of times the document has been dequeued without success.
    #[serde(default)]
    pub dequeues: u32,
    /// Async operation tracked for the current request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub async_operation_id: Option<String>,
    /// Correlation data of the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_data: Option<CorrelationData>,
    /// The cluster.
    pub cluster: ClusterRecord,
}

impl ClusterDocument {
    /// Creates a document for a resource id. The key is the lower-cased id.
    #[must_use]
    pub fn new(resource_id: impl Into<String>) -> Self {
        let resource_id = resource_id.into();
        let name = resource_id.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key: resource_id.to_lowercase(),
            cluster: ClusterRecord {
                id: resource_id,
                name,
                ..ClusterRecord::default()
            },
            ..Self::default()
        }
    }

    /// Sets the cluster record.
    #[must_use]
    pub fn with_cluster(mut self, cluster: ClusterRecord) -> Self {
        self.cluster = cluster;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESOURCE_ID: &str = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/resourceGroup/providers/Microsoft.RedHatOpenShift/openShiftClusters/resourceName1";

    #[test]
    fn test_new_document_lowercases_key() {
        let doc = ClusterDocument::new(RESOURCE_ID);
        assert_eq!(doc.key, RESOURCE_ID.to_lowercase());
        assert_eq!(doc.cluster.id, RESOURCE_ID);
        assert_eq!(doc.cluster.name, "resourceName1");
    }

    #[test]
    fn test_maintenance_task_serializes_empty_for_none() {
        let json = serde_json::to_string(&MaintenanceTask::None).unwrap();
        assert_eq!(json, r#""""#);

        let task: MaintenanceTask = serde_json::from_str(r#""RenewCerts""#).unwrap();
        assert_eq!(task, MaintenanceTask::RenewCerts);
    }

    #[test]
    fn test_maintenance_task_groups() {
        assert!(MaintenanceTask::Everything.requests_general_fixes());
        assert!(MaintenanceTask::Everything.requests_certificate_renewal());
        assert!(MaintenanceTask::Everything.requests_operator_update());
        assert!(!MaintenanceTask::Operator.requests_certificate_renewal());
        assert!(MaintenanceTask::RenewCerts.requests_certificate_renewal());
        assert!(!MaintenanceTask::None.requests_operator_update());
    }

    #[test]
    fn test_set_defaults_is_idempotent() {
        let mut record = ClusterRecord::default();
        assert!(record.set_defaults());
        assert_eq!(record.outbound_type, DEFAULT_OUTBOUND_TYPE);
        assert_eq!(record.mtu_size, DEFAULT_MTU_SIZE);
        assert!(!record.set_defaults());
    }

    #[test]
    fn test_install_phase_progression() {
        assert_eq!(InstallPhase::Bootstrap.next(), InstallPhase::RemoveBootstrap);
        assert_eq!(InstallPhase::RemoveBootstrap.next(), InstallPhase::Done);
    }

    #[test]
    fn test_document_roundtrip_keeps_etag_name() {
        let mut doc = ClusterDocument::new(RESOURCE_ID);
        doc.etag = Some("1".to_string());
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["_etag"], "1");
        assert_eq!(value["cluster"]["provisioningState"], "Succeeded");
    }

    #[test]
    fn test_resource_group_name() {
        let record = ClusterRecord {
            resource_group_id: "/subscriptions/sub/resourceGroups/aro-abc".to_string(),
            ..ClusterRecord::default()
        };
        assert_eq!(record.resource_group_name(), "aro-abc");
    }
}
