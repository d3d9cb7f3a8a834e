//! Cooperative cancellation for pipeline runs.
//!
//! A [`CancellationToken`] is shared between the caller and the runner. The
//! runner checks it between steps and races it against in-flight steps and
//! condition polls.

mod token;

pub use token::CancellationToken;
