//! Post-run dispatcher - success/failure hooks, then always-hooks
//!
//! Hooks observe the finished run; none of them can change its status.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::{EnvironmentContext, HookPhase, HookRecord, RunReport, RunStatus};

/// Error types for post-run hooks
#[derive(Debug, Error)]
pub enum HookError {
    #[error("Hook command exited with code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    #[error("Failed to launch hook: {0}")]
    Launch(String),

    #[error("{0}")]
    Failed(String),
}

/// A side effect fired after the run reaches a terminal status
#[async_trait]
pub trait PostRunHook: Send + Sync {
    fn name(&self) -> &str;

    async fn fire(&self, report: &RunReport, env: &EnvironmentContext) -> Result<(), HookError>;
}

/// Hook sets keyed by run outcome
#[derive(Clone, Default)]
pub struct PostRunHooks {
    pub on_success: Vec<Arc<dyn PostRunHook>>,
    /// Fired for FAILURE and ABORTED runs
    pub on_failure: Vec<Arc<dyn PostRunHook>>,
    pub always: Vec<Arc<dyn PostRunHook>>,
}

impl PostRunHooks {
    pub fn on_success(mut self, hook: impl PostRunHook + 'static) -> Self {
        self.on_success.push(Arc::new(hook));
        self
    }

    pub fn on_failure(mut self, hook: impl PostRunHook + 'static) -> Self {
        self.on_failure.push(Arc::new(hook));
        self
    }

    pub fn always(mut self, hook: impl PostRunHook + 'static) -> Self {
        self.always.push(Arc::new(hook));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.on_success.is_empty() && self.on_failure.is_empty() && self.always.is_empty()
    }
}

impl fmt::Debug for PostRunHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |hooks: &[Arc<dyn PostRunHook>]| -> Vec<String> {
            hooks.iter().map(|h| h.name().to_string()).collect()
        };
        f.debug_struct("PostRunHooks")
            .field("on_success", &names(&self.on_success))
            .field("on_failure", &names(&self.on_failure))
            .field("always", &names(&self.always))
            .finish()
    }
}

/// Fires the hooks of one run, at most once
#[derive(Debug, Default)]
pub struct PostRunDispatcher {
    dispatched: AtomicBool,
}

impl PostRunDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_dispatched(&self) -> bool {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Fire the outcome hooks followed by the always-hooks
    ///
    /// Each hook runs in its own task, so a panicking hook is recorded as a
    /// failure and the remaining hooks still fire. Returns an empty list if
    /// the run is still running or the hooks already fired.
    pub async fn dispatch(
        &self,
        hooks: &PostRunHooks,
        report: &RunReport,
        env: &Arc<EnvironmentContext>,
    ) -> Vec<HookRecord> {
        if !report.status.is_terminal() {
            warn!("Refusing to dispatch post-run hooks for a running pipeline");
            return Vec::new();
        }
        if self.dispatched.swap(true, Ordering::SeqCst) {
            debug!("Post-run hooks already dispatched for {}", report.execution_id);
            return Vec::new();
        }

        let (phase, outcome_hooks) = match report.status {
            RunStatus::Success => (HookPhase::Success, &hooks.on_success),
            _ => (HookPhase::Failure, &hooks.on_failure),
        };

        info!(
            "Dispatching post-run hooks for {} run ({} outcome, {} always)",
            report.status,
            outcome_hooks.len(),
            hooks.always.len()
        );

        let report = Arc::new(report.clone());
        let mut records = Vec::with_capacity(outcome_hooks.len() + hooks.always.len());
        for hook in outcome_hooks {
            records.push(fire_one(phase, hook, &report, env).await);
        }
        for hook in &hooks.always {
            records.push(fire_one(HookPhase::Always, hook, &report, env).await);
        }
        records
    }
}

async fn fire_one(
    phase: HookPhase,
    hook: &Arc<dyn PostRunHook>,
    report: &Arc<RunReport>,
    env: &Arc<EnvironmentContext>,
) -> HookRecord {
    let name = hook.name().to_string();
    let task = {
        let hook = hook.clone();
        let report = report.clone();
        let env = env.clone();
        tokio::spawn(async move { hook.fire(&report, &env).await })
    };

    let outcome = match task.await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) if e.is_panic() => Err(format!("Hook panicked: {}", panic_message(e.into_panic()))),
        Err(e) => Err(e.to_string()),
    };

    match outcome {
        Ok(()) => {
            debug!("Hook {} ({:?}) completed", name, phase);
            HookRecord {
                phase,
                hook: name,
                succeeded: true,
                error: None,
            }
        }
        Err(error) => {
            warn!("Hook {} ({:?}) failed: {}", name, phase, error);
            HookRecord {
                phase,
                hook: name,
                succeeded: false,
                error: Some(error),
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
