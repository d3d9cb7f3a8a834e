//! # Clusterflow
//!
//! Step pipelines for the lifecycle of managed clusters.
//!
//! Every lifecycle operation (install, update, admin update, delete) is an
//! ordered list of steps built from the current cluster record and run
//! strictly in sequence:
//!
//! - **Step descriptors**: actions, authorization-retrying actions and
//!   polled conditions, each with a stable diagnostic string
//! - **Pipeline builders**: pure functions of the record and caller flags
//! - **Runner**: retry, timeout and abort semantics with per-step timings
//! - **Document store**: leased, etag-guarded read-modify-write patches
//! - **Cancellation**: a shared token checked between and during steps
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use clusterflow::prelude::*;
//!
//! let doc = store.dequeue().await?.expect("pending work");
//! let mut manager = Manager::new(doc, store, platform)
//!     .with_adopt_via_hive(true)
//!     .with_config(ManagerConfig::from_json(&raw)?);
//!
//! match run_lifecycle(&mut manager).await? {
//!     LifecycleOutcome::Completed { doc, .. } => println!("{}", doc.cluster.provisioning_state),
//!     LifecycleOutcome::Deleted { .. } => println!("deleted"),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod api;
pub mod cancellation;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod events;
pub mod observability;
pub mod steps;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::api::{
        ClusterDocument, ClusterRecord, ClusterVersion, InstallPhase, MaintenanceTask,
        ProvisioningState,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::cluster::{
        admin_update_steps, delete_steps, install_steps, run_lifecycle, update_steps,
        Authorizer, LifecycleOutcome, Manager, Operation, Platform, Readiness,
    };
    pub use crate::config::{LogFormat, LoggingConfig, ManagerConfig};
    pub use crate::errors::{ClusterflowError, CloudError, StepError, StoreError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::init_tracing;
    pub use crate::steps::{describe, RunReport, Runner, Step, StepContext, StepKind};
    pub use crate::store::{ClusterStore, InMemoryClusterStore};
}
