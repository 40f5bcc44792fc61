//! Terminal rendering of deployment progress and results.

use chrono::{DateTime, Local, Utc};
use colored::{ColoredString, Colorize};
use stackdeploy_core::{
    ChangeKind, ChangeSetSummary, ChangesetReview, ClassifiedChange, DeployOutcome, Reporter,
    Risk, ScriptOutcome, Severity, StackEvent, StackStatus,
};

/// Prints every callback to stdout as one colored line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalReporter;

impl Reporter for TerminalReporter {
    fn stack_event(&self, event: &StackEvent, severity: Severity) {
        println!("{}", event_line(event, severity));
    }

    fn stack_status(
        &self,
        stack_name: &str,
        status: &StackStatus,
        severity: Severity,
        at: DateTime<Utc>,
    ) {
        println!(
            "{} {} {}",
            clock(at),
            stack_name.bold(),
            paint(status.as_str(), severity)
        );
    }

    fn change(&self, change: &ClassifiedChange) {
        println!("{}", change_line(change));
        if let Some(violation) = &change.violation {
            println!(
                "    {} {} is denied by stack policy statement {}",
                "⚠".yellow().bold(),
                violation.action.as_policy_action(),
                violation.pattern.bold()
            );
        }
    }

    fn changeset_summary(&self, review: &ChangesetReview) {
        println!("{}", summary_line(review));
    }
}

fn clock(at: DateTime<Utc>) -> ColoredString {
    at.with_timezone(&Local)
        .format("%H:%M:%S")
        .to_string()
        .dimmed()
}

pub fn paint(text: &str, severity: Severity) -> ColoredString {
    match severity {
        Severity::Good => text.green(),
        Severity::Bad => text.red().bold(),
        Severity::InProgress => text.yellow(),
    }
}

fn paint_risk(text: &str, risk: Risk) -> ColoredString {
    match risk {
        Risk::Safe => text.green(),
        Risk::Caution => text.yellow(),
        Risk::Destructive => text.red().bold(),
    }
}

pub fn event_line(event: &StackEvent, severity: Severity) -> String {
    let mut line = format!(
        "{} {:<32} {:<40} {}",
        clock(event.timestamp),
        event.logical_id,
        event.resource_type.dimmed(),
        paint(&event.status, severity)
    );
    if let Some(reason) = event.reason.as_deref().filter(|r| !r.is_empty()) {
        line.push_str(&format!(" {}", reason.dimmed()));
    }
    line
}

pub fn change_line(change: &ClassifiedChange) -> String {
    let entry = &change.entry;
    let mut line = format!(
        "  {:<20} {:<32} {}",
        paint_risk(change.kind.label(), change.risk()),
        entry.logical_id.bold(),
        entry.resource_type.dimmed()
    );
    if let Some(physical) = &entry.physical_id {
        line.push_str(&format!(" ({physical})"));
    }
    line
}

pub fn summary_line(review: &ChangesetReview) -> String {
    let counts = [
        ChangeKind::Add,
        ChangeKind::Modify,
        ChangeKind::ConditionalReplace,
        ChangeKind::Replace,
        ChangeKind::Remove,
        ChangeKind::Unknown,
    ]
    .iter()
    .filter_map(|kind| match review.count(*kind) {
        0 => None,
        n => Some(format!("{n} {}", kind.label().to_lowercase())),
    })
    .collect::<Vec<_>>();

    let changes = if counts.is_empty() {
        "no changes".to_string()
    } else {
        counts.join(", ")
    };

    let mut line = format!(
        "Change set {} [{} / {}]: {}",
        review.change_set_name.bold(),
        review.status,
        review.execution_status,
        changes
    );
    match review.violations() {
        0 => {}
        n => line.push_str(&format!(
            "; {}",
            format!("{n} blocked by stack policy").red().bold()
        )),
    }
    line
}

pub fn change_set_table(summaries: &[ChangeSetSummary]) {
    if summaries.is_empty() {
        println!("{}", "No change sets".dimmed());
        return;
    }
    println!(
        "{:<32} {:<20} {:<22} {:<20} {}",
        "NAME".bold(),
        "STATUS".bold(),
        "EXECUTION".bold(),
        "CREATED".bold(),
        "DESCRIPTION".bold()
    );
    for summary in summaries {
        println!(
            "{:<32} {:<20} {:<22} {:<20} {}",
            summary.change_set_name,
            summary.status,
            summary.execution_status,
            summary
                .created
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            summary.description.as_deref().unwrap_or_default()
        );
    }
}

pub fn deploy_outcome(stack_name: &str, outcome: &DeployOutcome) {
    match outcome {
        DeployOutcome::Completed {
            action,
            status,
            post_script,
        } => {
            println!(
                "{} Stack {} {action} finished: {}",
                "✓".green().bold(),
                stack_name.bold(),
                status.as_str().green()
            );
            script_outcome(post_script);
        }
        DeployOutcome::NoChanges { action } => println!(
            "{} Stack {} is up to date; nothing to {action}",
            "✓".green().bold(),
            stack_name.bold()
        ),
        DeployOutcome::DryRun { action } => println!(
            "{} Dry run: stack {} would {action}",
            "ℹ".blue().bold(),
            stack_name.bold()
        ),
    }
}

pub fn script_outcome(outcome: &ScriptOutcome) {
    match outcome {
        ScriptOutcome::Succeeded => println!("{} Script finished", "✓".green().bold()),
        ScriptOutcome::Failed { path, exit } => println!(
            "{} Script failed ({exit}); kept at {}",
            "⚠".yellow().bold(),
            path.display()
        ),
        ScriptOutcome::Shown => println!("{} Script shown, not run", "ℹ".blue().bold()),
        ScriptOutcome::Skipped => {}
    }
}
