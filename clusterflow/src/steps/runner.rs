//! Sequential step execution engine.
//!
//! Steps run strictly in order against one mutable context. The first fatal
//! failure aborts the run; later steps are never attempted.

use super::retry::{should_retry, RetryConfig, RetryDecision, RetryState};
use super::step::{Step, StepBody};
use crate::cancellation::CancellationToken;
use crate::errors::{ClusterflowError, StepError, CONDITION_TIMEOUT_MESSAGE};
use crate::events::{self, EventSink, NoOpEventSink};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Context hooks the runner needs from whatever the steps operate on.
#[async_trait]
pub trait StepContext: Send {
    /// Refreshes credentials before an authorization retry.
    async fn refresh_authorization(&mut self) -> Result<(), StepError> {
        Ok(())
    }
}

/// How a step finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step succeeded.
    Completed,
    /// A condition timed out and is configured not to fail.
    SoftTimeout,
}

/// Duration of one completed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTiming {
    /// Canonical step string.
    pub step: String,
    /// Metric topic of the step.
    pub topic: String,
    /// Wall-clock duration.
    pub duration: Duration,
    /// How the step finished.
    pub outcome: StepOutcome,
}

/// Result of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// One entry per step, in execution order.
    pub timings: Vec<StepTiming>,
    /// Total run duration.
    pub total: Duration,
}

impl RunReport {
    /// Returns the canonical strings of steps that ended in a soft timeout.
    #[must_use]
    pub fn soft_timeouts(&self) -> Vec<&str> {
        self.timings
            .iter()
            .filter(|t| t.outcome == StepOutcome::SoftTimeout)
            .map(|t| t.step.as_str())
            .collect()
    }
}

/// Runs step lists.
#[derive(Clone)]
pub struct Runner {
    poll_interval: Duration,
    authorization_retry: RetryConfig,
    events: Arc<dyn EventSink>,
    cancellation: Arc<CancellationToken>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("poll_interval", &self.poll_interval)
            .field("authorization_retry", &self.authorization_retry)
            .field("cancellation", &self.cancellation)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Creates a runner that polls conditions at `poll_interval`.
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            authorization_retry: RetryConfig::default(),
            events: Arc::new(NoOpEventSink),
            cancellation: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the authorization retry schedule.
    #[must_use]
    pub fn with_authorization_retry(mut self, config: RetryConfig) -> Self {
        self.authorization_retry = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> &Arc<CancellationToken> {
        &self.cancellation
    }

    /// Runs `steps` in order against `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterflowError::StepFailed`] naming the first step that
    /// failed fatally, or [`ClusterflowError::Cancelled`] if cancellation
    /// was requested between steps.
    pub async fn run<C: StepContext>(
        &self,
        ctx: &mut C,
        steps: &[Step<C>],
    ) -> Result<RunReport, ClusterflowError> {
        let run_started = Instant::now();
        let mut report = RunReport::default();

        for step in steps {
            let step_name = step.to_string();

            if self.cancellation.is_cancelled() {
                let reason = self.cancel_reason();
                warn!(step = %step_name, reason = %reason, "pipeline cancelled before step {step_name}");
                self.events.try_emit(
                    events::PIPELINE_CANCELLED,
                    Some(serde_json::json!({"step": step_name, "reason": reason})),
                );
                return Err(ClusterflowError::Cancelled(reason));
            }

            info!(step = %step_name, "running step {step_name}");
            self.events.try_emit(
                events::STEP_STARTED,
                Some(serde_json::json!({"step": step_name, "kind": step.kind().as_str()})),
            );

            let started = Instant::now();
            let result = tokio::select! {
                biased;
                () = self.cancellation.cancelled() => Err(StepError::Cancelled(self.cancel_reason())),
                result = self.run_step(ctx, step, &step_name) => result,
            };
            let duration = started.elapsed();

            match result {
                Ok(outcome) => {
                    self.events.try_emit(
                        events::STEP_COMPLETED,
                        Some(serde_json::json!({
                            "step": step_name,
                            "duration_ms": duration_ms(duration),
                        })),
                    );
                    report.timings.push(StepTiming {
                        step: step_name,
                        topic: step.metric_topic().to_string(),
                        duration,
                        outcome,
                    });
                }
                Err(err) => {
                    error!(step = %step_name, error = %err, "step {step_name} encountered error: {err}");
                    self.events.try_emit(
                        events::STEP_FAILED,
                        Some(serde_json::json!({
                            "step": step_name,
                            "error": err.to_string(),
                            "duration_ms": duration_ms(duration),
                        })),
                    );
                    return Err(ClusterflowError::StepFailed {
                        step: step_name,
                        source: err,
                    });
                }
            }
        }

        report.total = run_started.elapsed();
        self.events.try_emit(
            events::PIPELINE_COMPLETED,
            Some(serde_json::json!({
                "steps": report.timings.len(),
                "duration_ms": duration_ms(report.total),
            })),
        );
        Ok(report)
    }

    async fn run_step<C: StepContext>(
        &self,
        ctx: &mut C,
        step: &Step<C>,
        step_name: &str,
    ) -> Result<StepOutcome, StepError> {
        match step.body() {
            StepBody::Action(f) if step.kind() == super::StepKind::AuthorizationRetryingAction => {
                let mut state = RetryState::new();
                loop {
                    match f(ctx).await {
                        Ok(()) => return Ok(StepOutcome::Completed),
                        Err(err) if err.is_authorization_failure() => {
                            match should_retry(&mut state, &self.authorization_retry) {
                                RetryDecision::Retry(delay) => {
                                    info!(
                                        step = %step_name,
                                        attempt = state.attempt,
                                        delay_ms = duration_ms(delay),
                                        "step {step_name} hit an authorization failure, retrying: {err}"
                                    );
                                    self.events.try_emit(
                                        events::STEP_RETRYING,
                                        Some(serde_json::json!({
                                            "step": step_name,
                                            "attempt": state.attempt,
                                            "error": err.to_string(),
                                        })),
                                    );
                                    ctx.refresh_authorization().await?;
                                    tokio::time::sleep(delay).await;
                                }
                                RetryDecision::GiveUp => return Err(err),
                            }
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
            StepBody::Action(f) => f(ctx).await.map(|()| StepOutcome::Completed),
            StepBody::Condition(f) => {
                let timeout = step.timeout().unwrap_or_default();
                let poll_interval = self.poll_interval;
                let polled = tokio::time::timeout(timeout, async {
                    loop {
                        if f(&mut *ctx).await? {
                            return Ok::<(), StepError>(());
                        }
                        tokio::time::sleep(poll_interval).await;
                    }
                })
                .await;

                match polled {
                    Ok(result) => result.map(|()| StepOutcome::Completed),
                    Err(_) if step.fail_on_timeout() => Err(StepError::ConditionTimeout),
                    Err(_) => {
                        warn!(
                            step = %step_name,
                            "step {step_name} failed but has configured 'fail=false'. Continuing. Error: {CONDITION_TIMEOUT_MESSAGE}"
                        );
                        self.events.try_emit(
                            events::STEP_SOFT_TIMEOUT,
                            Some(serde_json::json!({"step": step_name})),
                        );
                        Ok(StepOutcome::SoftTimeout)
                    }
                }
            }
        }
    }

    fn cancel_reason(&self) -> String {
        self.cancellation
            .reason()
            .unwrap_or_else(|| "cancelled".to_string())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
