//! Cluster lifecycle pipelines.
//!
//! Each entry point (install, update, admin update, delete) builds a fresh
//! list of [`Step`]s from the current record and runs it against a
//! [`Manager`]. Builders are pure functions of their inputs so the shape of
//! a pipeline can be asserted without running any step body.
//!
//! ```text
//! ClusterRecord ─▶ *_steps(record, flags) ─▶ Vec<Step<Manager>> ─▶ Manager::run_steps
//! ```

use crate::api::ClusterVersion;
use crate::steps::Step;
use futures::FutureExt;
use std::time::Duration;

/// Builds an action step from a [`Manager`] method, named after the method.
macro_rules! action {
    ($method:ident) => {
        $crate::steps::Step::action(stringify!($method), |m: &mut $crate::cluster::Manager| {
            ::futures::FutureExt::boxed(m.$method())
        })
    };
}

/// Like [`action!`], retrying authorization failures.
macro_rules! authorization_retrying_action {
    ($method:ident) => {
        $crate::steps::Step::authorization_retrying_action(
            stringify!($method),
            |m: &mut $crate::cluster::Manager| ::futures::FutureExt::boxed(m.$method()),
        )
    };
}

mod adminupdate;
mod delete;
mod document_steps;
mod install;
mod lifecycle;
mod manager;
mod platform;
mod update;

pub use adminupdate::admin_update_steps;
pub use delete::delete_steps;
pub use install::install_steps;
pub use lifecycle::{run_lifecycle, LifecycleOutcome};
pub use manager::{Manager, RunScratch};
pub use platform::{
    Authorizer, Lookup, Operation, Platform, Prerequisite, Readiness, StaticAuthorizer,
};
pub use update::update_steps;

#[cfg(test)]
pub(crate) use platform::MockAuthorizer;

/// General fixes apply to clusters on a minor line above this one.
pub const GENERAL_FIXES_MIN_VERSION: ClusterVersion = ClusterVersion::new(4, 3, 0);

/// Certificate renewal applies to clusters on a minor line above this one.
pub const CERTIFICATE_RENEWAL_MIN_VERSION: ClusterVersion = ClusterVersion::new(4, 3, 0);

/// Operator updates apply to clusters on this minor line or later.
pub const OPERATOR_UPDATE_MIN_VERSION: ClusterVersion = ClusterVersion::new(4, 7, 0);

const MINUTE: Duration = Duration::from_secs(60);

/// Step running a platform operation once.
pub(crate) fn op(operation: Operation) -> Step<Manager> {
    Step::action(operation.as_str(), move |m: &mut Manager| {
        m.execute(operation).boxed()
    })
}

/// Step running a platform operation, retrying authorization failures.
pub(crate) fn retrying_op(operation: Operation) -> Step<Manager> {
    Step::authorization_retrying_action(operation.as_str(), move |m: &mut Manager| {
        m.execute(operation).boxed()
    })
}

/// Step polling a readiness signal until it holds or `timeout` elapses.
pub(crate) fn wait_for(check: Readiness, timeout: Duration, fail_on_timeout: bool) -> Step<Manager> {
    Step::condition(
        check.as_str(),
        move |m: &mut Manager| m.is_ready(check).boxed(),
        timeout,
        fail_on_timeout,
    )
}

pub(crate) const fn minutes(n: u64) -> Duration {
    Duration::from_secs(MINUTE.as_secs() * n)
}
