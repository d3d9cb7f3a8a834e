//! Pipeline events.
//!
//! The runner reports step and pipeline progress to an [`EventSink`]. Sinks
//! never fail the run; a sink that cannot deliver an event drops it.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A step is about to run.
pub const STEP_STARTED: &str = "step.started";
/// A step finished successfully.
pub const STEP_COMPLETED: &str = "step.completed";
/// A step failed and aborted the pipeline.
pub const STEP_FAILED: &str = "step.failed";
/// A condition timed out but is configured not to fail the pipeline.
pub const STEP_SOFT_TIMEOUT: &str = "step.soft_timeout";
/// An authorization-retrying action is about to retry.
pub const STEP_RETRYING: &str = "step.retrying";
/// Every step of a pipeline completed.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// A pipeline was cancelled.
pub const PIPELINE_CANCELLED: &str = "pipeline.cancelled";
/// Duration of every step reported under one metric topic after a
/// successful cluster run.
pub const CLUSTER_STEP_DURATION: &str = "cluster.step_duration";
/// Total duration of a successful cluster run.
pub const CLUSTER_TOTAL_DURATION: &str = "cluster.total_duration";
