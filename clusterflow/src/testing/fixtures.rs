//! Cluster records and managers for tests.

use std::sync::Arc;
use std::time::Duration;

use crate::api::{
    ClusterDocument, ClusterRecord, MaintenanceTask, ProvisioningState, ServicePrincipalProfile,
    DEFAULT_MTU_SIZE, DEFAULT_OUTBOUND_TYPE,
};
use crate::cluster::Manager;
use crate::config::ManagerConfig;
use crate::steps::{JitterStrategy, RetryConfig};
use crate::store::{ClusterStore, InMemoryClusterStore};

use super::RecordingPlatform;

/// Resource id of the fixture cluster.
pub const RESOURCE_ID: &str = "/subscriptions/00000000-0000-0000-0000-000000000001/resourceGroups/resourceGroup/providers/Microsoft.RedHatOpenShift/openShiftClusters/resourceName";

/// A fully populated, admin-updating cluster record.
#[must_use]
pub fn cluster_record(version: &str, task: MaintenanceTask) -> ClusterRecord {
    ClusterRecord {
        id: RESOURCE_ID.to_string(),
        name: "resourceName".to_string(),
        location: "eastus".to_string(),
        provisioning_state: ProvisioningState::AdminUpdating,
        last_provisioning_state: Some(ProvisioningState::Succeeded),
        maintenance_task: task,
        cluster_version: version.to_string(),
        resource_group_id: "/subscriptions/00000000-0000-0000-0000-000000000001/resourceGroups/aro-infra".to_string(),
        service_principal: Some(ServicePrincipalProfile {
            client_id: "client-id".to_string(),
            sp_object_id: "sp-object-id".to_string(),
        }),
        infra_id: "infra-abcde".to_string(),
        storage_suffix: "abcde".to_string(),
        image_registry_storage_account_name: "imageregistryabc".to_string(),
        api_server_int_ip: "10.0.0.4".to_string(),
        ingress_ip: "20.1.2.3".to_string(),
        outbound_type: DEFAULT_OUTBOUND_TYPE.to_string(),
        mtu_size: DEFAULT_MTU_SIZE,
        ..ClusterRecord::default()
    }
}

/// Wraps `record` in a document keyed by [`RESOURCE_ID`].
#[must_use]
pub fn cluster_document(record: ClusterRecord) -> ClusterDocument {
    ClusterDocument::new(RESOURCE_ID).with_cluster(record)
}

/// Configuration with short poll and retry delays.
#[must_use]
pub fn fast_config() -> ManagerConfig {
    ManagerConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_authorization_retry(
            RetryConfig::default()
                .with_base_delay_ms(1)
                .with_max_delay_ms(10)
                .with_jitter(JitterStrategy::None),
        )
}

/// Stores `record`, leases it and returns a manager over it together with
/// the platform and store it uses.
///
/// # Panics
///
/// Panics if the fixture document cannot be stored or leased.
pub async fn seeded_manager(
    record: ClusterRecord,
) -> (Manager, Arc<RecordingPlatform>, InMemoryClusterStore) {
    let config = fast_config();
    let store = InMemoryClusterStore::new().with_lease_duration(config.lease_duration());
    let created = store
        .create(cluster_document(record))
        .await
        .expect("fixture document is valid");
    let doc = store.lease(&created.key).await.expect("fixture document is unleased");

    let platform = Arc::new(RecordingPlatform::new());
    let manager = Manager::new(doc, Arc::new(store.clone()), platform.clone()).with_config(config);
    (manager, platform, store)
}
