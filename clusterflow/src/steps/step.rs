//! Step descriptors.

use crate::errors::StepError;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Callable behind an action step.
pub type ActionFn<C> =
    Arc<dyn for<'a> Fn(&'a mut C) -> BoxFuture<'a, Result<(), StepError>> + Send + Sync>;

/// Callable behind a condition step. Returns `Ok(true)` once satisfied.
pub type ConditionFn<C> =
    Arc<dyn for<'a> Fn(&'a mut C) -> BoxFuture<'a, Result<bool, StepError>> + Send + Sync>;

/// The execution policy of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// Run once; any error is fatal.
    Action,
    /// Run once, retrying authorization failures with backoff.
    AuthorizationRetryingAction,
    /// Poll until true or until the timeout elapses.
    Condition,
}

impl StepKind {
    /// Label used in the canonical step string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Action => "Action",
            Self::AuthorizationRetryingAction => "AuthorizationRetryingAction",
            Self::Condition => "Condition",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) enum StepBody<C> {
    Action(ActionFn<C>),
    Condition(ConditionFn<C>),
}

impl<C> Clone for StepBody<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Action(f) => Self::Action(Arc::clone(f)),
            Self::Condition(f) => Self::Condition(Arc::clone(f)),
        }
    }
}

/// An immutable, named unit of work over a context `C`.
///
/// Steps render to a stable string (`[Action ensure_defaults-fm]`,
/// `[Condition api_servers_ready-fm, timeout 1800s]`) which logs and tests
/// use to identify them.
pub struct Step<C> {
    kind: StepKind,
    name: String,
    body: StepBody<C>,
    timeout: Option<Duration>,
    fail_on_timeout: bool,
    metric_topic: Option<String>,
}

impl<C> Step<C> {
    /// Creates an action step.
    pub fn action<F>(name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut C) -> BoxFuture<'a, Result<(), StepError>> + Send + Sync + 'static,
    {
        Self {
            kind: StepKind::Action,
            name: name.into(),
            body: StepBody::Action(Arc::new(f)),
            timeout: None,
            fail_on_timeout: true,
            metric_topic: None,
        }
    }

    /// Creates an action step that retries authorization failures.
    pub fn authorization_retrying_action<F>(name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut C) -> BoxFuture<'a, Result<(), StepError>> + Send + Sync + 'static,
    {
        Self {
            kind: StepKind::AuthorizationRetryingAction,
            ..Self::action(name, f)
        }
    }

    /// Creates a condition step.
    pub fn condition<F>(name: impl Into<String>, f: F, timeout: Duration, fail_on_timeout: bool) -> Self
    where
        F: for<'a> Fn(&'a mut C) -> BoxFuture<'a, Result<bool, StepError>> + Send + Sync + 'static,
    {
        Self {
            kind: StepKind::Condition,
            name: name.into(),
            body: StepBody::Condition(Arc::new(f)),
            timeout: Some(timeout),
            fail_on_timeout,
            metric_topic: None,
        }
    }

    /// Sets the topic under which this step's duration is reported.
    #[must_use]
    pub fn with_metric_topic(mut self, topic: impl Into<String>) -> Self {
        self.metric_topic = Some(topic.into());
        self
    }

    /// Returns the step kind.
    #[must_use]
    pub fn kind(&self) -> StepKind {
        self.kind
    }

    /// Returns the step name as supplied by the builder.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the condition timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns whether a condition timeout fails the pipeline.
    #[must_use]
    pub fn fail_on_timeout(&self) -> bool {
        self.fail_on_timeout
    }

    /// Returns the metric topic, defaulting to the step name.
    #[must_use]
    pub fn metric_topic(&self) -> &str {
        self.metric_topic.as_deref().unwrap_or(&self.name)
    }

    pub(crate) fn body(&self) -> &StepBody<C> {
        &self.body
    }
}

impl<C> Clone for Step<C> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            name: self.name.clone(),
            body: self.body.clone(),
            timeout: self.timeout,
            fail_on_timeout: self.fail_on_timeout,
            metric_topic: self.metric_topic.clone(),
        }
    }
}

impl<C> fmt::Display for Step<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timeout {
            Some(timeout) if self.kind == StepKind::Condition => write!(
                f,
                "[{} {}-fm, timeout {}]",
                self.kind,
                self.name,
                format_timeout(timeout)
            ),
            _ => write!(f, "[{} {}-fm]", self.kind, self.name),
        }
    }
}

impl<C> fmt::Debug for Step<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("fail_on_timeout", &self.fail_on_timeout)
            .finish_non_exhaustive()
    }
}

/// Renders whole seconds as `{n}s`, anything finer as `{n}ms`.
fn format_timeout(timeout: Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{}ms", timeout.as_millis())
    }
}

/// Renders each step to its canonical string.
#[must_use]
pub fn describe<C>(steps: &[Step<C>]) -> Vec<String> {
    steps.iter().map(ToString::to_string).collect()
}
