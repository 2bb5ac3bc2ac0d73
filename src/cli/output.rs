//! CLI output formatting

use crate::{
    core::{GateOutcome, HookPhase, RunReport, RunStatus, StageOutcome},
    execution::ExecutionEvent,
    persistence::ExecutionSummary,
};
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "x ");

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Success => style("SUCCESS").green().to_string(),
        RunStatus::Failure => style("FAILURE").red().to_string(),
        RunStatus::Aborted => style("ABORTED").magenta().to_string(),
    }
}

/// Format a stage outcome for display
pub fn format_stage_outcome(outcome: StageOutcome) -> String {
    match outcome {
        StageOutcome::NotRun => style("NOT_RUN").dim().to_string(),
        StageOutcome::Running => style("RUNNING").yellow().to_string(),
        StageOutcome::Success => style("SUCCESS").green().to_string(),
        StageOutcome::Failure => style("FAILURE").red().to_string(),
    }
}

fn status_icon(status: RunStatus) -> &'static Emoji<'static, 'static> {
    match status {
        RunStatus::Success => &CHECK,
        RunStatus::Failure => &CROSS,
        RunStatus::Aborted => &STOP,
        RunStatus::Running => &SPINNER,
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format a history entry for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let mut line = format!(
        "{} {} - {} - {} ({}/{} stages, {} artifact(s))",
        status_icon(summary.status),
        style(short_id(&summary.execution_id)).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        summary.stages_succeeded,
        summary.stages_total,
        summary.artifacts
    );
    if let Some(failure) = &summary.first_failure {
        line.push_str(&format!(
            " - {}",
            style(format!(
                "{:?} in {}",
                failure.kind,
                failure.stage.as_deref().unwrap_or("<setup>")
            ))
            .red()
        ));
    }
    line
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            execution_id,
            pipeline,
        } => format!(
            "{} Starting pipeline {} ({})",
            ROCKET,
            style(pipeline).bold(),
            style(short_id(execution_id)).dim()
        ),
        ExecutionEvent::StageStarted { index, stage } => format!(
            "{} Stage {} {}",
            INFO,
            style(index + 1).dim(),
            style(stage).bold()
        ),
        ExecutionEvent::StepStarted { stage, step } => {
            format!("{} {} / {}", SPINNER, style(stage).dim(), style(step).cyan())
        }
        ExecutionEvent::StepOutput { step, output, .. } => {
            format!("{} Output from {}:\n{}", INFO, style(step).dim(), output)
        }
        ExecutionEvent::StepFailed { stage, step, error } => format!(
            "{} {} / {}: {}",
            CROSS,
            style(stage).dim(),
            style(step).red(),
            style(error).dim()
        ),
        ExecutionEvent::GateWaiting { stage } => {
            format!("{} Waiting on gate for {}", SPINNER, style(stage).yellow())
        }
        ExecutionEvent::GateFinished { stage, outcome } => {
            let (icon, label) = match outcome {
                GateOutcome::Approved => (&CHECK, style("approved").green()),
                GateOutcome::Rejected => (&CROSS, style("rejected").red()),
                GateOutcome::TimedOut => (&WARN, style("timed out").yellow()),
                GateOutcome::Cancelled => (&STOP, style("cancelled").magenta()),
            };
            format!("{} Gate for {} {}", icon, style(stage).bold(), label)
        }
        ExecutionEvent::StageFinished { stage, outcome } => {
            let icon = if *outcome == StageOutcome::Success {
                &CHECK
            } else {
                &CROSS
            };
            format!(
                "{} {} {}",
                icon,
                style(stage).bold(),
                format_stage_outcome(*outcome)
            )
        }
        ExecutionEvent::StageSkipped { stage } => {
            format!("  {} {}", style(stage).dim(), format_stage_outcome(StageOutcome::NotRun))
        }
        ExecutionEvent::RunFinished {
            execution_id,
            status,
        } => format!(
            "{} Pipeline ({}) finished: {}",
            status_icon(*status),
            style(short_id(execution_id)).dim(),
            format_status(*status)
        ),
        ExecutionEvent::HookFired {
            hook,
            phase,
            succeeded,
        } => {
            let phase = match phase {
                HookPhase::Success => "on success",
                HookPhase::Failure => "on failure",
                HookPhase::Always => "always",
            };
            if *succeeded {
                format!("{} Hook {} ({})", CHECK, style(hook).cyan(), phase)
            } else {
                format!("{} Hook {} ({}) failed", WARN, style(hook).yellow(), phase)
            }
        }
    }
}

/// Per-stage table printed after a run
pub fn format_report(report: &RunReport) -> String {
    let mut lines = vec![format!(
        "{} {} {}",
        status_icon(report.status),
        style(&report.pipeline).bold(),
        format_status(report.status)
    )];
    for stage in &report.stages {
        let mut line = format!("  {:<24} {}", stage.name, format_stage_outcome(stage.outcome));
        if let Some(failure) = &stage.failure {
            line.push_str(&format!(" {}", style(&failure.message).dim()));
        }
        lines.push(line);
    }
    for artifact in &report.artifacts {
        lines.push(format!(
            "  {} {} ({} bytes) -> {}",
            INFO,
            style(&artifact.name).cyan(),
            artifact.size,
            style(&artifact.location).dim()
        ));
    }
    lines.join("\n")
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

/// Human-readable duration
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
