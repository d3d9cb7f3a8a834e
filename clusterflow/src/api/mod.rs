//! Cluster document model.
//!
//! [`ClusterDocument`] is the unit the store persists: lease and bookkeeping
//! fields around a [`ClusterRecord`], which carries the properties pipeline
//! builders branch on.

mod document;
mod version;

pub use document::{
    ClusterDocument, ClusterRecord, CorrelationData, Install, InstallPhase, MaintenanceTask,
    ProvisioningState, ServicePrincipalProfile, DEFAULT_MTU_SIZE, DEFAULT_OUTBOUND_TYPE,
};
pub use version::ClusterVersion;
