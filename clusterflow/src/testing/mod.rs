//! Testing utilities for cluster pipelines.
//!
//! This module provides:
//! - A recording [`crate::cluster::Platform`] fake
//! - Cluster record fixtures and a seeded manager
//! - Assertions on pipeline shape and failures

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_pipeline_contains, assert_pipeline_shape, assert_step_failed};
pub use fixtures::{cluster_document, cluster_record, fast_config, seeded_manager, RESOURCE_ID};
pub use mocks::RecordingPlatform;
