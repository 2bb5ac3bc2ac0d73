//! Gate check - bounded polling of an external decision under a deadline
//!
//! The wait never performs a single uninterruptible sleep: each suspension
//! races the cancel signal and the deadline. A deadline that passes without
//! a decision fails closed.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::core::{CancelSignal, ContextError, EnvironmentContext, GateOutcome};

/// A single answer from the decision source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// No verdict yet; keep polling
    Pending,
    Approved,
    Rejected,
}

/// A failed query; treated as "no decision yet"
#[derive(Debug, Error)]
#[error("Gate query failed: {0}")]
pub struct GateQueryError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateConfigError {
    #[error("Gate deadline must be greater than zero")]
    ZeroDeadline,

    #[error("Gate poll interval must be greater than zero")]
    ZeroPollInterval,
}

/// Where a gate's verdict comes from (e.g. a static-analysis server)
#[async_trait]
pub trait DecisionSource: Send + Sync {
    /// Check the source's inputs against the context before the first poll
    ///
    /// A context error here is a misconfiguration and fails the stage
    /// instead of being polled until the deadline.
    fn prepare(&self, _env: &EnvironmentContext) -> Result<(), ContextError> {
        Ok(())
    }

    async fn query(&self, env: &EnvironmentContext) -> Result<GateDecision, GateQueryError>;
}

/// Deadline and polling policy for a gate
#[derive(Debug, Clone)]
pub struct GateCheck {
    deadline: Duration,
    poll_interval: Duration,

    /// A timeout aborts the run; otherwise it is logged and the stage continues
    pub abort_on_timeout: bool,

    /// A rejection aborts the run; otherwise it is logged and the stage continues
    pub abort_on_reject: bool,
}

impl GateCheck {
    pub fn new(deadline: Duration, poll_interval: Duration) -> Result<Self, GateConfigError> {
        if deadline.is_zero() {
            return Err(GateConfigError::ZeroDeadline);
        }
        if poll_interval.is_zero() {
            return Err(GateConfigError::ZeroPollInterval);
        }
        Ok(Self {
            deadline,
            poll_interval,
            abort_on_timeout: true,
            abort_on_reject: true,
        })
    }

    pub fn with_abort_on_timeout(mut self, abort: bool) -> Self {
        self.abort_on_timeout = abort;
        self
    }

    pub fn with_abort_on_reject(mut self, abort: bool) -> Self {
        self.abort_on_reject = abort;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Whether an outcome should abort the run under this gate's policy
    pub fn aborts_on(&self, outcome: GateOutcome) -> bool {
        match outcome {
            GateOutcome::Approved => false,
            GateOutcome::Rejected => self.abort_on_reject,
            GateOutcome::TimedOut => self.abort_on_timeout,
            GateOutcome::Cancelled => true,
        }
    }

    /// Poll `source` until it decides, the deadline passes, or `cancel` fires
    pub async fn wait(
        &self,
        source: &dyn DecisionSource,
        env: &EnvironmentContext,
        cancel: &CancelSignal,
    ) -> GateOutcome {
        let started = Instant::now();
        let deadline = started + self.deadline;
        let mut polls = 0usize;

        info!(
            "Waiting for gate decision (deadline {:?}, poll every {:?})",
            self.deadline, self.poll_interval
        );

        loop {
            if cancel.is_cancelled() {
                info!("Gate wait cancelled after {} poll(s)", polls);
                return GateOutcome::Cancelled;
            }
            if Instant::now() >= deadline {
                warn!("Gate timed out after {} poll(s)", polls);
                return GateOutcome::TimedOut;
            }

            polls += 1;
            let decision = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Gate wait cancelled during poll {}", polls);
                    return GateOutcome::Cancelled;
                }
                _ = sleep_until(deadline) => {
                    warn!("Gate timed out during poll {}", polls);
                    return GateOutcome::TimedOut;
                }
                result = source.query(env) => result,
            };

            // A verdict that raced a cancellation is discarded
            if cancel.is_cancelled() {
                info!("Gate wait cancelled; discarding poll {} result", polls);
                return GateOutcome::Cancelled;
            }

            match decision {
                Ok(GateDecision::Approved) => {
                    info!("Gate approved after {} poll(s)", polls);
                    return GateOutcome::Approved;
                }
                Ok(GateDecision::Rejected) => {
                    warn!("Gate rejected after {} poll(s)", polls);
                    return GateOutcome::Rejected;
                }
                Ok(GateDecision::Pending) => {
                    debug!("Gate poll {}: no decision yet", polls);
                }
                Err(e) => {
                    warn!("Gate poll {}: {}", polls, e);
                }
            }

            let next_poll = (Instant::now() + self.poll_interval).min(deadline);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Gate wait cancelled between polls");
                    return GateOutcome::Cancelled;
                }
                _ = sleep_until(next_poll) => {}
            }
        }
    }
}
