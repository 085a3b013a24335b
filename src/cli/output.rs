//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::approval::{ApprovalState, PlanLedger};
use crate::config::ValidationResult;
use crate::controller::{ReconcileOutcome, ReconcilePhase, Requeue};
use crate::planner::PlanMetadata;
use crate::resource::{ConditionStatus, Resource, ResourceId, TerraformStatus};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Resource status row for table display.
#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Revision")]
    revision: String,
    #[tabled(rename = "Pending")]
    pending: String,
    #[tabled(rename = "Last Applied")]
    last_applied: String,
    #[tabled(rename = "Outputs")]
    outputs: usize,
}

/// Condition row for table display.
#[derive(Tabled)]
struct ConditionRow {
    #[tabled(rename = "Type")]
    condition_type: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Reason")]
    reason: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Stored plan row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Fingerprint")]
    fingerprint: String,
    #[tabled(rename = "Revision")]
    revision: String,
    #[tabled(rename = "Changes")]
    changes: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Created")]
    created: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the status of several resources.
    #[must_use]
    pub fn format_status(&self, resources: &[Resource]) -> String {
        match self.format {
            OutputFormat::Json => {
                let entries: Vec<StatusJson<'_>> = resources.iter().map(StatusJson::from).collect();
                serde_json::to_string_pretty(&entries).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_status_text(resources),
        }
    }

    fn format_status_text(resources: &[Resource]) -> String {
        if resources.is_empty() {
            return String::from("   No resources found.\n");
        }

        let rows: Vec<StatusRow> = resources
            .iter()
            .map(|r| StatusRow {
                resource: r.id().to_string(),
                phase: Self::format_phase(r.status.phase),
                revision: r
                    .status
                    .observed_revision
                    .as_deref()
                    .map_or_else(|| String::from("-"), |rev| Self::truncate(rev, 24)),
                pending: Self::or_dash(&r.status.plan.pending),
                last_applied: Self::or_dash(&r.status.plan.last_applied),
                outputs: r.status.available_outputs.len(),
            })
            .collect();

        let mut output = Table::new(rows).to_string();
        output.push('\n');
        output
    }

    /// Formats the full status of one resource, conditions included.
    #[must_use]
    pub fn format_resource(&self, resource: &Resource) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&StatusJson::from(resource)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_resource_text(resource),
        }
    }

    fn format_resource_text(resource: &Resource) -> String {
        let status = &resource.status;
        let mut output = String::new();

        let _ = writeln!(output, "\nResource: {}", resource.id());
        let _ = writeln!(output, "   Source: {}", resource.spec.source_ref);
        let _ = writeln!(output, "   Phase: {}", Self::format_phase(status.phase));
        let _ = writeln!(
            output,
            "   Observed revision: {}",
            status.observed_revision.as_deref().unwrap_or("-")
        );
        let _ = writeln!(
            output,
            "   Last attempted revision: {}",
            status.last_attempted_revision.as_deref().unwrap_or("-")
        );
        let _ = writeln!(output, "   Pending plan: {}", Self::or_dash(&status.plan.pending));
        let _ = writeln!(output, "   Last applied: {}", Self::or_dash(&status.plan.last_applied));
        let _ = writeln!(output, "   Approval: {}", resource.spec.approval_policy());

        if !status.available_outputs.is_empty() {
            let _ = writeln!(output, "   Outputs: {}", status.available_outputs.join(", "));
        }

        if status.conditions.is_empty() {
            output.push_str("\n   No conditions reported yet.\n");
            return output;
        }

        let rows: Vec<ConditionRow> = status
            .conditions
            .iter()
            .map(|c| ConditionRow {
                condition_type: c.condition_type.to_string(),
                status: match c.status {
                    ConditionStatus::True => "True".green().to_string(),
                    ConditionStatus::False => "False".red().to_string(),
                    ConditionStatus::Unknown => "Unknown".dimmed().to_string(),
                },
                reason: c.reason.clone(),
                message: Self::truncate(&c.message, 60),
            })
            .collect();

        output.push('\n');
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');
        output
    }

    /// Formats the stored plans of a resource against its ledger.
    #[must_use]
    pub fn format_plans(&self, id: &ResourceId, plans: &[PlanMetadata], ledger: &PlanLedger) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "resource": id.to_string(),
                    "lastApplied": ledger.last_applied,
                    "plans": plans,
                    "ledger": ledger.entries,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = format!("\nPlans for {id}\n\n");
                if plans.is_empty() {
                    output.push_str("   No stored plans.\n");
                    return output;
                }

                let rows: Vec<PlanRow> = plans
                    .iter()
                    .map(|p| PlanRow {
                        fingerprint: p.fingerprint.clone(),
                        revision: Self::truncate(&p.revision, 24),
                        changes: if p.has_changes { "yes" } else { "no" }.to_string(),
                        state: ledger
                            .state_of(&p.fingerprint)
                            .map_or_else(|| "unrecorded".dimmed().to_string(), Self::format_approval),
                        created: p.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    })
                    .collect();

                output.push_str(&Table::new(rows).to_string());
                output.push('\n');
                output
            }
        }
    }

    /// Formats the result of a single reconciliation pass.
    #[must_use]
    pub fn format_outcome(&self, id: &ResourceId, outcome: &ReconcileOutcome, status: &TerraformStatus) -> String {
        let next = match outcome.requeue {
            Requeue::Resync(d) => format!("resync in {}s", d.as_secs()),
            Requeue::After(d) => format!("retry in {}s", d.as_secs()),
            Requeue::Backoff => String::from("retry with backoff"),
            Requeue::Forget => String::from("resource gone"),
        };

        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "resource": id.to_string(),
                    "phase": outcome.phase,
                    "next": next,
                    "status": status,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = format!(
                    "{} {id}: {} ({next})\n",
                    if matches!(outcome.phase, ReconcilePhase::Failed(_)) {
                        "✗".red()
                    } else {
                        "✓".green()
                    },
                    Self::format_phase(outcome.phase)
                );
                if let Some(condition) = status.conditions.last() {
                    let _ = writeln!(
                        output,
                        "   {} {}: {}",
                        condition.condition_type, condition.reason, condition.message
                    );
                }
                output
            }
        }
    }

    /// Formats validation results for a set of named documents.
    #[must_use]
    pub fn format_validation(
        &self,
        results: &[(String, Result<ValidationResult, String>)],
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let entries: Vec<serde_json::Value> = results
                    .iter()
                    .map(|(name, result)| match result {
                        Ok(r) => serde_json::json!({
                            "name": name,
                            "valid": true,
                            "warnings": r.warnings,
                        }),
                        Err(e) => serde_json::json!({
                            "name": name,
                            "valid": false,
                            "error": e,
                        }),
                    })
                    .collect();
                serde_json::to_string_pretty(&entries).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                for (name, result) in results {
                    match result {
                        Ok(r) => {
                            let _ = writeln!(output, "{} {name}", "✓".green());
                            if show_warnings {
                                for warning in &r.warnings {
                                    let _ = writeln!(output, "   {} {warning}", "⚠".yellow());
                                }
                            }
                        }
                        Err(e) => {
                            let _ = writeln!(output, "{} {name}: {e}", "✗".red());
                        }
                    }
                }
                output
            }
        }
    }

    /// Formats a one-line success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "success", "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}", "✓".green()),
        }
    }

    fn format_phase(phase: ReconcilePhase) -> String {
        let text = phase.to_string();
        match phase {
            ReconcilePhase::Applied | ReconcilePhase::NoChanges => text.green().to_string(),
            ReconcilePhase::AwaitingApproval
            | ReconcilePhase::Planning
            | ReconcilePhase::Applying
            | ReconcilePhase::Retrying(_) => text.yellow().to_string(),
            ReconcilePhase::Failed(_) => text.red().to_string(),
            ReconcilePhase::Pending | ReconcilePhase::SourceNotReady | ReconcilePhase::Superseded => {
                text.dimmed().to_string()
            }
        }
    }

    fn format_approval(state: ApprovalState) -> String {
        let text = state.to_string();
        match state {
            ApprovalState::Applied | ApprovalState::NoChanges => text.green().to_string(),
            ApprovalState::Pending | ApprovalState::Approved => text.yellow().to_string(),
            ApprovalState::Rejected => text.red().to_string(),
            ApprovalState::Superseded => text.dimmed().to_string(),
        }
    }

    fn or_dash(value: &str) -> String {
        if value.is_empty() {
            String::from("-")
        } else {
            value.to_string()
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct StatusJson<'a> {
    resource: String,
    status: &'a TerraformStatus,
}

impl<'a> From<&'a Resource> for StatusJson<'a> {
    fn from(resource: &'a Resource) -> Self {
        Self {
            resource: resource.id().to_string(),
            status: &resource.status,
        }
    }
}
