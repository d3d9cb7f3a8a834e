//! Assertions on pipelines and their results.

use crate::errors::ClusterflowError;
use crate::steps::{describe, Step};

/// Asserts that `steps` render to exactly `expected`, in order.
pub fn assert_pipeline_shape<C>(steps: &[Step<C>], expected: &[&str]) {
    let actual = describe(steps);
    assert_eq!(
        actual, expected,
        "Pipeline shape mismatch.\nExpected: {expected:#?}\nActual: {actual:#?}"
    );
}

/// Asserts that `steps` contain a step rendering to `step`.
pub fn assert_pipeline_contains<C>(steps: &[Step<C>], step: &str) {
    let actual = describe(steps);
    assert!(
        actual.iter().any(|s| s == step),
        "Expected pipeline to contain {step}, got: {actual:#?}"
    );
}

/// Asserts that `result` failed at `step`.
pub fn assert_step_failed<T: std::fmt::Debug>(result: &Result<T, ClusterflowError>, step: &str) {
    match result {
        Err(err) => assert_eq!(
            err.failed_step(),
            Some(step),
            "Expected failure at {step}, got: {err}"
        ),
        Ok(value) => panic!("Expected failure at {step}, got success: {value:?}"),
    }
}
