//! Command-backed decision source for gates (e.g. a quality-gate status query)

use async_trait::async_trait;
use tracing::debug;

use crate::collaborators::shell::ShellCommand;
use crate::core::condition::ConditionPattern;
use crate::core::{CancelSignal, ContextError, EnvironmentContext};
use crate::execution::{DecisionSource, GateDecision, GateQueryError};

/// Runs a query command and classifies its stdout
///
/// The reject pattern is checked first, so output matching both is a
/// rejection.
#[derive(Debug, Clone)]
pub struct CommandDecisionSource {
    shell: String,
    command: String,
    approve: ConditionPattern,
    reject: Option<ConditionPattern>,
    timeout_secs: Option<u64>,
}

impl CommandDecisionSource {
    pub fn new(shell: impl Into<String>, command: impl Into<String>, approve: ConditionPattern) -> Self {
        Self {
            shell: shell.into(),
            command: command.into(),
            approve,
            reject: None,
            timeout_secs: None,
        }
    }

    pub fn reject_on(mut self, pattern: Option<ConditionPattern>) -> Self {
        self.reject = pattern;
        self
    }

    pub fn timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Map query output to a decision
    pub fn classify(&self, output: &str) -> GateDecision {
        if self.reject.as_ref().is_some_and(|p| p.matches(output)) {
            GateDecision::Rejected
        } else if self.approve.matches(output) {
            GateDecision::Approved
        } else {
            GateDecision::Pending
        }
    }
}

#[async_trait]
impl DecisionSource for CommandDecisionSource {
    fn prepare(&self, env: &EnvironmentContext) -> Result<(), ContextError> {
        env.render(&self.command)?;
        env.resolve_all()?;
        Ok(())
    }

    async fn query(&self, env: &EnvironmentContext) -> Result<GateDecision, GateQueryError> {
        let command = env
            .render(&self.command)
            .map_err(|e| GateQueryError(e.to_string()))?;
        let vars = env
            .resolve_all()
            .map_err(|e| GateQueryError(e.to_string()))?;

        // The gate loop drops this future on cancellation, which kills the child
        let output = ShellCommand::new(&self.shell, command)
            .with_timeout(self.timeout_secs)
            .run(&vars, &CancelSignal::never())
            .await
            .map_err(|e| GateQueryError(e.to_string()))?;

        if !output.success() {
            return Err(GateQueryError(format!(
                "query exited with code {}: {}",
                output.code,
                output.stderr.trim()
            )));
        }

        let decision = self.classify(&output.stdout);
        debug!("Gate query returned {:?}", decision);
        Ok(decision)
    }
}
