//! Step descriptors and the engine that runs them.
//!
//! A pipeline is a `Vec<Step<C>>` built fresh for each run. Three kinds of
//! step exist:
//!
//! - [`StepKind::Action`] runs once; any error aborts the pipeline.
//! - [`StepKind::AuthorizationRetryingAction`] retries errors classified as
//!   authorization-not-yet-propagated, refreshing credentials between
//!   attempts.
//! - [`StepKind::Condition`] polls until it reports `true`. On timeout it
//!   either fails the pipeline or, with `fail_on_timeout = false`, lets it
//!   continue.

mod retry;
mod runner;
mod step;

pub use retry::{should_retry, BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision, RetryState};
pub use runner::{RunReport, Runner, StepContext, StepOutcome, StepTiming};
pub use step::{describe, ActionFn, ConditionFn, Step, StepKind};
