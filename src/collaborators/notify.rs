//! Notification channel and the post-run hooks built on it

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::collaborators::shell::ShellCommand;
use crate::core::context::{interpolate, ContextError};
use crate::core::{CancelSignal, EnvironmentContext, RunReport};
use crate::execution::{HookError, PostRunHook};

/// A rendered message ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
}

/// Trait for notification delivery - mail, chat, logs
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), HookError>;
}

/// Writes notifications to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), HookError> {
        info!(
            to = %notification.recipients.join(","),
            "{}: {}",
            notification.subject,
            notification.body
        );
        Ok(())
    }
}

/// Pipes the body into a command, e.g. a mail client
///
/// `NOTIFY_SUBJECT` and `NOTIFY_TO` are exported to the command.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    shell: String,
    command: String,
    timeout_secs: Option<u64>,
}

impl CommandNotifier {
    pub fn new(shell: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            command: command.into(),
            timeout_secs: None,
        }
    }

    pub fn timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), HookError> {
        let mut vars = BTreeMap::new();
        vars.insert("NOTIFY_SUBJECT".to_string(), notification.subject.clone());
        vars.insert("NOTIFY_TO".to_string(), notification.recipients.join(","));

        let output = ShellCommand::new(&self.shell, &self.command)
            .with_stdin(notification.body.clone())
            .with_timeout(self.timeout_secs)
            .run(&vars, &CancelSignal::never())
            .await?;

        if !output.success() {
            return Err(HookError::CommandFailed {
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Variables describing the finished run, available to hook templates
pub fn run_variables(report: &RunReport) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert("PIPELINE".to_string(), report.pipeline.clone());
    vars.insert("RUN_STATUS".to_string(), report.status.to_string());
    vars.insert("EXECUTION_ID".to_string(), report.execution_id.to_string());
    vars.insert("RUN_SUMMARY".to_string(), report.summary());
    if let Some(failure) = &report.first_failure {
        vars.insert(
            "FAILED_STAGE".to_string(),
            failure.stage.clone().unwrap_or_default(),
        );
        vars.insert("FAILURE_KIND".to_string(), format!("{:?}", failure.kind));
    }
    vars
}

/// Render a hook template against the run variables, then the context
fn render_for_hook(
    text: &str,
    run_vars: &BTreeMap<String, String>,
    env: &EnvironmentContext,
) -> Result<String, ContextError> {
    interpolate(text, |name| match run_vars.get(name) {
        Some(value) => Ok(value.clone()),
        None => env.resolve(name),
    })
}

/// Sends a templated notification
pub struct NotifyHook {
    name: String,
    notifier: Arc<dyn Notifier>,
    recipients: Vec<String>,
    subject: String,
    body: String,
}

impl NotifyHook {
    pub fn new(
        name: impl Into<String>,
        notifier: Arc<dyn Notifier>,
        recipients: Vec<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            notifier,
            recipients,
            subject: subject.into(),
            body: body.into(),
        }
    }
}

#[async_trait]
impl PostRunHook for NotifyHook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fire(&self, report: &RunReport, env: &EnvironmentContext) -> Result<(), HookError> {
        let run_vars = run_variables(report);
        let render = |text: &str| {
            render_for_hook(text, &run_vars, env).map_err(|e| HookError::Failed(e.to_string()))
        };

        let mut recipients = Vec::with_capacity(self.recipients.len());
        for recipient in &self.recipients {
            recipients.push(render(recipient.as_str())?);
        }

        let notification = Notification {
            subject: render(self.subject.as_str())?,
            body: render(self.body.as_str())?,
            recipients,
        };
        self.notifier.send(&notification).await
    }
}

/// Runs a shell command after the run, with run variables exported
#[derive(Debug, Clone)]
pub struct ShellHook {
    name: String,
    shell: String,
    command: String,
    timeout_secs: Option<u64>,
}

impl ShellHook {
    pub fn new(name: impl Into<String>, shell: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shell: shell.into(),
            command: command.into(),
            timeout_secs: None,
        }
    }

    pub fn timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

#[async_trait]
impl PostRunHook for ShellHook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fire(&self, report: &RunReport, env: &EnvironmentContext) -> Result<(), HookError> {
        let run_vars = run_variables(report);
        let command = render_for_hook(&self.command, &run_vars, env)
            .map_err(|e| HookError::Failed(e.to_string()))?;

        // A broken context still lets the hook run with the run variables alone
        let mut vars = env.resolve_all().unwrap_or_default();
        vars.extend(run_vars);

        let output = ShellCommand::new(&self.shell, command)
            .with_timeout(self.timeout_secs)
            .run(&vars, &CancelSignal::never())
            .await?;

        if !output.success() {
            return Err(HookError::CommandFailed {
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}
