//! The boundary between pipelines and the systems they drive.
//!
//! Step bodies that only talk to the cloud, the cluster or the orchestrator
//! are a single [`Platform`] call named by an [`Operation`] or a
//! [`Readiness`] check. What those calls do is up to the implementation.

use crate::api::ClusterDocument;
use crate::errors::StepError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

/// Client state a step may depend on, prepared by an earlier step of the
/// same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Prerequisite {
    /// Clients for the cluster's API server.
    KubernetesClients,
    /// Operator deployer, built on the Kubernetes clients.
    OperatorDeployer,
    /// Cloud clients authenticated as the cluster service principal.
    ClusterSpClients,
    /// Cloud clients authenticated as the cluster managed identity.
    ClusterMsiClients,
}

impl fmt::Display for Prerequisite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::KubernetesClients => "kubernetes clients",
            Self::OperatorDeployer => "operator deployer",
            Self::ClusterSpClients => "cluster service principal clients",
            Self::ClusterMsiClients => "cluster MSI clients",
        };
        f.write_str(s)
    }
}

macro_rules! operations {
    (@opt) => { None };
    (@opt $p:ident) => { Some(Prerequisite::$p) };
    ($($(#[$doc:meta])* $variant:ident => $name:literal $(, needs $needs:ident)? $(, provides $provides:ident)?;)+) => {
        /// A side-effecting platform call.
        #[allow(missing_docs)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Operation {
            $($(#[$doc])* $variant,)+
        }

        impl Operation {
            /// Step name of the operation.
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            /// Client state that must exist before the call.
            #[must_use]
            pub const fn prerequisite(&self) -> Option<Prerequisite> {
                match self {
                    $(Self::$variant => operations!(@opt $($needs)?),)+
                }
            }

            /// Client state the call prepares for later steps.
            #[must_use]
            pub const fn provides(&self) -> Option<Prerequisite> {
                match self {
                    $(Self::$variant => operations!(@opt $($provides)?),)+
                }
            }
        }
    };
}

operations! {
    /// Build clients for the cluster's API server.
    InitializeKubernetesClients => "initialize_kubernetes_clients", provides KubernetesClients;
    /// Build the operator deployer.
    InitializeOperatorDeployer => "initialize_operator_deployer", needs KubernetesClients, provides OperatorDeployer;
    /// Build clients that act as the cluster service principal.
    InitializeClusterSpClients => "initialize_cluster_sp_clients", provides ClusterSpClients;
    /// Build clients that act as the cluster managed identity.
    InitializeClusterMsiClients => "initialize_cluster_msi_clients", provides ClusterMsiClients;
    EnsureClusterMsiCertificate => "ensure_cluster_msi_certificate";
    EnsureBillingRecord => "ensure_billing_record";
    ValidateResources => "validate_resources";
    StartVms => "start_vms";
    EnsureResourceGroup => "ensure_resource_group";
    CreateOrUpdateDenyAssignment => "create_or_update_deny_assignment";
    EnsureServiceEndpoints => "ensure_service_endpoints";
    MigrateStorageAccounts => "migrate_storage_accounts";
    FixSsh => "fix_ssh";
    FixSreKubeconfig => "fix_sre_kubeconfig";
    FixUserAdminKubeconfig => "fix_user_admin_kubeconfig";
    EnsureGatewayUpgrade => "ensure_gateway_upgrade";
    RotateAcrTokenPassword => "rotate_acr_token_password";
    EnsureMtuSize => "ensure_mtu_size", needs KubernetesClients;
    CorrectCertificateIssuer => "correct_certificate_issuer";
    FixMcsCert => "fix_mcs_cert", needs KubernetesClients;
    FixMcsUserData => "fix_mcs_user_data", needs KubernetesClients;
    ConfigureApiServerCertificate => "configure_api_server_certificate", needs KubernetesClients;
    ConfigureIngressCertificate => "configure_ingress_certificate", needs KubernetesClients;
    RenewMdsdCertificate => "renew_mdsd_certificate", needs KubernetesClients;
    EnsureAroOperator => "ensure_aro_operator", needs OperatorDeployer;
    SyncClusterObject => "sync_cluster_object", needs OperatorDeployer;
    CreateOrUpdateClusterServicePrincipalRbac => "create_or_update_cluster_service_principal_rbac", needs ClusterSpClients;
    FederateIdentityCredentials => "federate_identity_credentials", needs ClusterMsiClients;
    UpdateOpenShiftSecret => "update_openshift_secret", needs KubernetesClients;
    UpdateAroSecret => "update_aro_secret", needs KubernetesClients;
    EnsureAcrToken => "ensure_acr_token";
    EnsureSshKey => "ensure_ssh_key";
    CreateDns => "create_dns";
    CreateOidc => "create_oidc";
    SetMasterSubnetPolicies => "set_master_subnet_policies";
    DeployStorageTemplate => "deploy_storage_template";
    AttachNsgs => "attach_nsgs";
    EnsureGatewayCreate => "ensure_gateway_create";
    CreateApiServerPrivateEndpoint => "create_api_server_private_endpoint";
    CreateCertificates => "create_certificates";
    RunIntegratedInstaller => "run_integrated_installer";
    RunHiveInstaller => "run_hive_installer";
    GenerateKubeconfigs => "generate_kubeconfigs";
    RemoveBootstrap => "remove_bootstrap", needs KubernetesClients;
    RemoveBootstrapIgnition => "remove_bootstrap_ignition";
    UpdateConsoleBranding => "update_console_branding", needs KubernetesClients;
    DisableUpdates => "disable_updates", needs KubernetesClients;
    DisableSamples => "disable_samples", needs KubernetesClients;
    DisableOperatorHubSources => "disable_operator_hub_sources", needs KubernetesClients;
    UpdateClusterData => "update_cluster_data", needs KubernetesClients;
    ConfigureDefaultStorageClass => "configure_default_storage_class", needs KubernetesClients;
    HiveCreateNamespace => "hive_create_namespace";
    HiveEnsureResources => "hive_ensure_resources";
    HiveDeleteResources => "hive_delete_resources";
    DeleteDns => "delete_dns";
    DeletePrivateEndpoint => "delete_private_endpoint";
    DeleteOidc => "delete_oidc";
    DeleteRoleAssignments => "delete_role_assignments";
    DeleteRoleDefinition => "delete_role_definition";
    DeleteGateway => "delete_gateway";
    DeleteResourcesAndResourceGroup => "delete_resources_and_resource_group";
    DeleteFederatedCredentials => "delete_federated_credentials";
    DeleteClusterMsiCertificate => "delete_cluster_msi_certificate";
    DeleteSignedCertificates => "delete_signed_certificates";
    DeleteAcrToken => "delete_acr_token";
    DeleteBillingRecord => "delete_billing_record";
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A polled readiness signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Readiness {
    /// The API servers answer.
    ApiServers,
    /// The ARO operator deployment is available.
    AroDeployment,
    /// The ARO operator runs the desired version.
    AroOperatorRunningDesiredVersion,
    /// The orchestrator reports the cluster deployment as ready.
    HiveClusterDeployment,
    /// The orchestrator finished installing the cluster.
    HiveClusterInstallation,
    /// Enough worker nodes joined the cluster.
    MinimumWorkerNodes,
    /// The console operator exists.
    OperatorConsoleExists,
    /// The console operator is available.
    OperatorConsole,
    /// The cluster version reports available.
    ClusterVersion,
    /// The default ingress controller is available.
    IngressController,
}

impl Readiness {
    /// Step name of the check.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ApiServers => "api_servers_ready",
            Self::AroDeployment => "aro_deployment_ready",
            Self::AroOperatorRunningDesiredVersion => "ensure_aro_operator_running_desired_version",
            Self::HiveClusterDeployment => "hive_cluster_deployment_ready",
            Self::HiveClusterInstallation => "hive_cluster_installation_complete",
            Self::MinimumWorkerNodes => "minimum_worker_nodes_ready",
            Self::OperatorConsoleExists => "operator_console_exists",
            Self::OperatorConsole => "operator_console_ready",
            Self::ClusterVersion => "cluster_version_ready",
            Self::IngressController => "ingress_controller_ready",
        }
    }

    /// Client state that must exist before polling.
    #[must_use]
    pub const fn prerequisite(&self) -> Option<Prerequisite> {
        match self {
            Self::HiveClusterDeployment | Self::HiveClusterInstallation => None,
            Self::AroDeployment | Self::AroOperatorRunningDesiredVersion => {
                Some(Prerequisite::OperatorDeployer)
            }
            _ => Some(Prerequisite::KubernetesClients),
        }
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value read from the platform and recorded on the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lookup {
    /// Object id of the cluster service principal.
    ServicePrincipalObjectId,
    /// Private address of the API server load balancer.
    ApiServerPrivateIp,
    /// Public address of the default router.
    RouterIp,
    /// Storage account used by the image registry.
    RegistryStorageAccountName,
}

/// Cloud, cluster and orchestrator operations used by pipeline steps.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Performs an operation. Operations must be idempotent.
    async fn execute(&self, operation: Operation, doc: &ClusterDocument) -> Result<(), StepError>;

    /// Polls a readiness signal once.
    async fn is_ready(&self, check: Readiness, doc: &ClusterDocument) -> Result<bool, StepError>;

    /// Reads a value to record on the document.
    async fn lookup(&self, lookup: Lookup, doc: &ClusterDocument) -> Result<String, StepError>;

    /// Resolves platform workload identities to their object ids.
    async fn platform_workload_identity_ids(
        &self,
        doc: &ClusterDocument,
    ) -> Result<BTreeMap<String, String>, StepError>;

    /// Collects diagnostics after a failed run. Best effort.
    async fn gather_failure_logs(&self, _doc: &ClusterDocument) -> Vec<String> {
        Vec::new()
    }
}

/// Refreshes the credentials used for cloud calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Fetches a fresh token so that newly propagated role assignments apply.
    async fn refresh(&self) -> Result<(), StepError>;
}

/// An authorizer with nothing to refresh.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticAuthorizer;

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn refresh(&self) -> Result<(), StepError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_prerequisites() {
        assert_eq!(
            Operation::InitializeOperatorDeployer.prerequisite(),
            Some(Prerequisite::KubernetesClients)
        );
        assert_eq!(
            Operation::InitializeOperatorDeployer.provides(),
            Some(Prerequisite::OperatorDeployer)
        );
        assert_eq!(Operation::StartVms.prerequisite(), None);
        assert_eq!(Operation::StartVms.to_string(), "start_vms");
    }

    #[test]
    fn test_readiness_prerequisites() {
        assert_eq!(Readiness::HiveClusterDeployment.prerequisite(), None);
        assert_eq!(
            Readiness::ApiServers.prerequisite(),
            Some(Prerequisite::KubernetesClients)
        );
        assert_eq!(Readiness::ApiServers.as_str(), "api_servers_ready");
    }

    struct QuietPlatform;

    #[async_trait]
    impl Platform for QuietPlatform {
        async fn execute(&self, _operation: Operation, _doc: &ClusterDocument) -> Result<(), StepError> {
            Ok(())
        }

        async fn is_ready(&self, _check: Readiness, _doc: &ClusterDocument) -> Result<bool, StepError> {
            Ok(true)
        }

        async fn lookup(&self, _lookup: Lookup, _doc: &ClusterDocument) -> Result<String, StepError> {
            Ok(String::new())
        }

        async fn platform_workload_identity_ids(
            &self,
            _doc: &ClusterDocument,
        ) -> Result<BTreeMap<String, String>, StepError> {
            Ok(BTreeMap::new())
        }
    }

    #[tokio::test]
    async fn test_failure_logs_default_to_empty() {
        let logs = QuietPlatform
            .gather_failure_logs(&ClusterDocument::default())
            .await;
        assert!(logs.is_empty());
    }
}
