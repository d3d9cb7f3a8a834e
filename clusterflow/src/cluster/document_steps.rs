//! Steps that record values on the cluster document.
//!
//! Each step reads the document first and writes only when the value would
//! change, so re-running a pipeline leaves the document (and its etag)
//! untouched.

use super::platform::{Lookup, Operation, Prerequisite};
use super::Manager;
use crate::api::{InstallPhase, DEFAULT_MTU_SIZE};
use crate::errors::{StepError, StoreError};
use rand::Rng;
use tracing::{error, info};

/// Infra id given to clusters created before the field existed.
const LEGACY_INFRA_ID: &str = "aro";

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())]))
        .collect()
}

/// Builds an infra id from the cluster name: lower-case alphanumerics and
/// dashes, at most 21 characters, plus a random suffix.
fn generate_infra_id(name: &str) -> String {
    let mut prefix: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(21)
        .collect();
    while prefix.ends_with('-') {
        prefix.pop();
    }
    if prefix.is_empty() {
        prefix.push_str(LEGACY_INFRA_ID);
    }
    format!("{prefix}-{}", random_suffix(5))
}

impl Manager {
    pub(crate) async fn ensure_defaults(&mut self) -> Result<(), StepError> {
        if !self.doc.cluster.clone().set_defaults() {
            return Ok(());
        }
        self.patch(|doc| {
            doc.cluster.set_defaults();
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub(crate) async fn fix_infra_id(&mut self) -> Result<(), StepError> {
        if !self.doc.cluster.infra_id.is_empty() {
            return Ok(());
        }
        self.patch(|doc| {
            if doc.cluster.infra_id.is_empty() {
                doc.cluster.infra_id = LEGACY_INFRA_ID.to_string();
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub(crate) async fn fixup_cluster_sp_object_id(&mut self) -> Result<(), StepError> {
        match &self.doc.cluster.service_principal {
            Some(sp) if sp.sp_object_id.is_empty() => {}
            _ => return Ok(()),
        }
        self.record_sp_object_id().await
    }

    pub(crate) async fn cluster_sp_object_id(&mut self) -> Result<(), StepError> {
        self.scratch.require(Prerequisite::ClusterSpClients)?;
        self.record_sp_object_id().await
    }

    async fn record_sp_object_id(&mut self) -> Result<(), StepError> {
        if self.doc.cluster.service_principal.is_none() {
            return Err(StepError::precondition("cluster has no service principal profile"));
        }
        let object_id = self
            .platform
            .lookup(Lookup::ServicePrincipalObjectId, &self.doc)
            .await?;
        if self
            .doc
            .cluster
            .service_principal
            .as_ref()
            .is_some_and(|sp| sp.sp_object_id == object_id)
        {
            return Ok(());
        }
        self.patch(|doc| {
            let sp = doc
                .cluster
                .service_principal
                .as_mut()
                .ok_or_else(|| StoreError::mutation("cluster has no service principal profile"))?;
            sp.sp_object_id.clone_from(&object_id);
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub(crate) async fn platform_workload_identity_ids(&mut self) -> Result<(), StepError> {
        self.scratch.require(Prerequisite::ClusterMsiClients)?;
        let ids = self.platform.platform_workload_identity_ids(&self.doc).await?;
        if self.doc.cluster.platform_workload_identities == ids {
            return Ok(());
        }
        self.patch(|doc| {
            doc.cluster.platform_workload_identities.clone_from(&ids);
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub(crate) async fn populate_registry_storage_account_name(&mut self) -> Result<(), StepError> {
        if !self.doc.cluster.image_registry_storage_account_name.is_empty() {
            return Ok(());
        }
        self.scratch.require(Prerequisite::KubernetesClients)?;
        let name = self
            .platform
            .lookup(Lookup::RegistryStorageAccountName, &self.doc)
            .await?;
        self.patch(|doc| {
            doc.cluster.image_registry_storage_account_name.clone_from(&name);
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub(crate) async fn populate_database_int_ip(&mut self) -> Result<(), StepError> {
        if !self.doc.cluster.api_server_int_ip.is_empty() {
            return Ok(());
        }
        self.record_api_server_ip().await
    }

    pub(crate) async fn update_api_ip_early(&mut self) -> Result<(), StepError> {
        self.record_api_server_ip().await
    }

    async fn record_api_server_ip(&mut self) -> Result<(), StepError> {
        let ip = self.platform.lookup(Lookup::ApiServerPrivateIp, &self.doc).await?;
        if self.doc.cluster.api_server_int_ip == ip {
            return Ok(());
        }
        self.patch(|doc| {
            doc.cluster.api_server_int_ip.clone_from(&ip);
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub(crate) async fn create_or_update_router_ip_from_cluster(&mut self) -> Result<(), StepError> {
        self.scratch.require(Prerequisite::KubernetesClients)?;
        self.record_router_ip().await
    }

    pub(crate) async fn create_or_update_router_ip_early(&mut self) -> Result<(), StepError> {
        self.record_router_ip().await
    }

    async fn record_router_ip(&mut self) -> Result<(), StepError> {
        let ip = self.platform.lookup(Lookup::RouterIp, &self.doc).await?;
        if self.doc.cluster.ingress_ip == ip {
            return Ok(());
        }
        self.patch(|doc| {
            doc.cluster.ingress_ip.clone_from(&ip);
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub(crate) async fn update_provisioned_by(&mut self) -> Result<(), StepError> {
        let provisioned_by = self.config.provisioned_by.clone();
        if self.doc.cluster.provisioned_by == provisioned_by {
            return Ok(());
        }
        self.patch(|doc| {
            doc.cluster.provisioned_by.clone_from(&provisioned_by);
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub(crate) async fn hive_reset_correlation_data(&mut self) -> Result<(), StepError> {
        if self.doc.correlation_data.is_none() {
            return Ok(());
        }
        self.patch(|doc| {
            doc.correlation_data = None;
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub(crate) async fn ensure_infra_id(&mut self) -> Result<(), StepError> {
        if !self.doc.cluster.infra_id.is_empty() {
            return Ok(());
        }
        let infra_id = generate_infra_id(&self.doc.cluster.name);
        self.patch(|doc| {
            if doc.cluster.infra_id.is_empty() {
                doc.cluster.infra_id.clone_from(&infra_id);
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub(crate) async fn ensure_storage_suffix(&mut self) -> Result<(), StepError> {
        if !self.doc.cluster.storage_suffix.is_empty() {
            return Ok(());
        }
        let suffix = random_suffix(5);
        self.patch(|doc| {
            if doc.cluster.storage_suffix.is_empty() {
                doc.cluster.storage_suffix.clone_from(&suffix);
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub(crate) async fn populate_mtu_size(&mut self) -> Result<(), StepError> {
        if self.doc.cluster.mtu_size != 0 {
            return Ok(());
        }
        self.patch(|doc| {
            if doc.cluster.mtu_size == 0 {
                doc.cluster.mtu_size = DEFAULT_MTU_SIZE;
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Records the install start time once, on the first install run.
    pub(crate) async fn start_installation(&mut self) -> Result<(), StoreError> {
        if self.doc.cluster.install.is_some() {
            return Ok(());
        }
        let now = chrono::Utc::now();
        self.patch(|doc| {
            if doc.cluster.install.is_none() {
                doc.cluster.install = Some(crate::api::Install {
                    now,
                    phase: InstallPhase::Bootstrap,
                });
            }
            Ok(())
        })
        .await
    }

    pub(crate) async fn incr_install_phase(&mut self) -> Result<(), StepError> {
        self.patch(|doc| {
            let install = doc
                .cluster
                .install
                .as_mut()
                .ok_or_else(|| StoreError::mutation("install has not started"))?;
            install.phase = install.phase.next();
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub(crate) async fn finish_installation(&mut self) -> Result<(), StepError> {
        self.patch(|doc| {
            doc.cluster.install = None;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Re-creates provider access to the resource group before deletion.
    /// Failures are logged; deletion proceeds regardless.
    pub(crate) async fn ensure_resource_group_best_effort(&mut self) -> Result<(), StepError> {
        info!(key = %self.doc.key, "running ensure_resource_group");
        if let Err(err) = self.execute(Operation::EnsureResourceGroup).await {
            error!(key = %self.doc.key, error = %err, "ensure_resource_group failed, continuing delete");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MaintenanceTask;
    use crate::store::ClusterStore;
    use crate::testing::{cluster_record, seeded_manager};

    #[test]
    fn test_generate_infra_id() {
        let id = generate_infra_id("My_Cluster.Name-that-is-quite-long");
        let (prefix, suffix) = id.rsplit_once('-').unwrap();
        assert_eq!(prefix, "my-cluster-name-that");
        assert_eq!(suffix.len(), 5);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

        assert!(generate_infra_id("___").starts_with("aro-"));
    }

    #[tokio::test]
    async fn test_document_steps_write_once() {
        let mut record = cluster_record("4.10.20", MaintenanceTask::Everything);
        record.infra_id.clear();
        record.ingress_ip.clear();
        let (mut manager, _platform, store) = seeded_manager(record).await;

        manager.fix_infra_id().await.unwrap();
        manager.update_provisioned_by().await.unwrap();
        manager.create_or_update_router_ip_early().await.unwrap();
        let etag = manager.doc().etag.clone();

        assert_eq!(manager.doc().cluster.infra_id, "aro");
        assert_eq!(manager.doc().cluster.provisioned_by, manager.config().provisioned_by);
        assert_eq!(manager.doc().cluster.ingress_ip, "20.1.2.3");

        manager.fix_infra_id().await.unwrap();
        manager.update_provisioned_by().await.unwrap();
        manager.create_or_update_router_ip_early().await.unwrap();
        assert_eq!(manager.doc().etag, etag);
        assert_eq!(store.get(&manager.doc().key).await.unwrap().etag, etag);
    }

    #[tokio::test]
    async fn test_api_server_ip_follows_platform() {
        let (mut manager, platform, store) =
            seeded_manager(cluster_record("4.10.20", MaintenanceTask::None)).await;

        manager.update_api_ip_early().await.unwrap();
        let etag = manager.doc().etag.clone();

        platform.set_lookup(Lookup::ApiServerPrivateIp, "10.0.0.9");
        manager.update_api_ip_early().await.unwrap();
        assert_eq!(manager.doc().cluster.api_server_int_ip, "10.0.0.9");
        assert_ne!(manager.doc().etag, etag);
        assert_eq!(
            store.get(&manager.doc().key).await.unwrap().cluster.api_server_int_ip,
            "10.0.0.9"
        );
    }

    #[tokio::test]
    async fn test_install_phase_bookkeeping() {
        let (mut manager, _platform, _store) =
            seeded_manager(cluster_record("4.10.20", MaintenanceTask::None)).await;

        assert!(manager.incr_install_phase().await.is_err());

        manager.start_installation().await.unwrap();
        let started = manager.doc().cluster.install.clone().unwrap();
        assert_eq!(started.phase, InstallPhase::Bootstrap);

        manager.start_installation().await.unwrap();
        assert_eq!(manager.doc().cluster.install.as_ref().unwrap().now, started.now);

        manager.incr_install_phase().await.unwrap();
        assert_eq!(
            manager.doc().cluster.install.as_ref().unwrap().phase,
            InstallPhase::RemoveBootstrap
        );

        manager.finish_installation().await.unwrap();
        assert!(manager.doc().cluster.install.is_none());
    }

    #[tokio::test]
    async fn test_cluster_sp_object_id_needs_clients() {
        let (mut manager, _platform, _store) =
            seeded_manager(cluster_record("4.10.20", MaintenanceTask::None)).await;

        assert!(matches!(
            manager.cluster_sp_object_id().await,
            Err(StepError::Precondition(_))
        ));

        manager.execute(Operation::InitializeClusterSpClients).await.unwrap();
        manager.cluster_sp_object_id().await.unwrap();
        assert_eq!(
            manager.doc().cluster.service_principal.as_ref().unwrap().sp_object_id,
            "sp-object-id"
        );
    }
}
