//! Output formatters
//!
//! Renders reports, plans, stack status, and execution records as tables or
//! JSON.

use serde::Serialize;

use crate::assembler::{AssemblyReport, PlannedResource};
use crate::pipeline::{ExecutionRecord, StageStatus};
use crate::provision::Evaluation;
use crate::state::StackState;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            _ => None,
        }
    }
}

/// Report formatter
pub struct ReportFormatter {
    format: OutputFormat,
}

impl ReportFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn json<T: Serialize>(&self, value: &T) -> String {
        match self.format {
            OutputFormat::JsonPretty => serde_json::to_string_pretty(value).unwrap_or_default(),
            _ => serde_json::to_string(value).unwrap_or_default(),
        }
    }

    /// Format an assembly report
    pub fn format_report(&self, report: &AssemblyReport) -> String {
        if self.format != OutputFormat::Table {
            return self.json(report);
        }

        let mut output = String::new();
        output.push_str("\n┌──────────────────────────────────────────────────────────────────────┐\n");
        output.push_str(&format!("│ Stack: {:61} │\n", truncate(&report.stack, 61)));
        output.push_str("├────────────────────────────────────┬──────────────────┬──────────────┤\n");
        output.push_str("│ Resource                           │ Physical Id      │ Action       │\n");
        output.push_str("├────────────────────────────────────┼──────────────────┼──────────────┤\n");

        for entry in &report.entries {
            output.push_str(&format!(
                "│ {:34} │ {:16} │ {:12} │\n",
                truncate(&entry.logical_id, 34),
                truncate(&entry.physical_id, 16),
                entry.action.to_string()
            ));
        }

        output.push_str("├────────────────────────────────────┴──────────────────┴──────────────┤\n");
        output.push_str(&format!(
            "│ {:69} │\n",
            format!("{} resource(s) in {}ms", report.entries.len(), report.duration_ms)
        ));
        output.push_str("└──────────────────────────────────────────────────────────────────────┘\n");
        output
    }

    /// Format a plan
    pub fn format_plan(&self, plan: &[PlannedResource]) -> String {
        if self.format != OutputFormat::Table {
            return self.json(&plan);
        }

        let mut output = String::new();
        output.push_str("\nPlanned creation order:\n");
        output.push_str("──────────────────────────────────────────────────────────────────────\n");

        for (index, resource) in plan.iter().enumerate() {
            let depends = if resource.depends_on.is_empty() {
                String::new()
            } else {
                format!("  (after {})", resource.depends_on.join(", "))
            };
            output.push_str(&format!(
                "  {:2}. {:10} {:34}{}\n",
                index + 1,
                resource.action.to_string(),
                resource.logical_id,
                depends
            ));
        }

        output.push_str("──────────────────────────────────────────────────────────────────────\n");
        output
    }

    /// Format stack status
    pub fn format_status(&self, state: &StackState) -> String {
        if self.format != OutputFormat::Table {
            return self.json(state);
        }

        let mut output = String::new();
        output.push_str("\n┌──────────────────────────────────────────────────────────────────────┐\n");
        output.push_str(&format!(
            "│ Stack: {:38} {:11}/{:10} │\n",
            truncate(&state.name, 38),
            truncate(&state.account, 11),
            truncate(&state.region, 10)
        ));
        output.push_str("├────────────────────────────────────┬──────────────────┬──────────────┤\n");
        output.push_str("│ Resource                           │ Physical Id      │ Kind         │\n");
        output.push_str("├────────────────────────────────────┼──────────────────┼──────────────┤\n");

        for record in state.resources.values() {
            output.push_str(&format!(
                "│ {:34} │ {:16} │ {:12} │\n",
                truncate(&record.logical_id, 34),
                truncate(&record.physical_id, 16),
                truncate(record.kind.name(), 12)
            ));
        }

        output.push_str("└────────────────────────────────────┴──────────────────┴──────────────┘\n");
        output
    }

    /// Format a list of executions
    pub fn format_executions(&self, records: &[ExecutionRecord]) -> String {
        if self.format != OutputFormat::Table {
            return self.json(&records);
        }

        let mut output = String::new();
        output.push_str("\n┌──────────────────────┬───────────┬───────────┬──────────┬──────────┐\n");
        output.push_str("│ Execution            │ Status    │ Revision  │ Targets  │ Rollback │\n");
        output.push_str("├──────────────────────┼───────────┼───────────┼──────────┼──────────┤\n");

        for record in records {
            let revision = record
                .artifact
                .as_ref()
                .map(|a| a.revision.chars().take(9).collect::<String>())
                .unwrap_or_else(|| "-".to_string());
            output.push_str(&format!(
                "│ {:20} │ {:9} │ {:9} │ {:8} │ {:8} │\n",
                truncate(&record.id, 20),
                record.status.to_string(),
                revision,
                record.targets.len(),
                if record.rolled_back { "yes" } else { "no" }
            ));
        }

        output.push_str("└──────────────────────┴───────────┴───────────┴──────────┴──────────┘\n");
        output
    }

    /// Format one execution in detail
    pub fn format_execution(&self, record: &ExecutionRecord) -> String {
        if self.format != OutputFormat::Table {
            return self.json(record);
        }

        let mut output = String::new();
        output.push_str(&format!(
            "\nExecution {} of {}: {}\n",
            record.id, record.pipeline, record.status
        ));
        output.push_str("──────────────────────────────────────────────────────────────────────\n");

        for stage in &record.stages {
            let status = match stage.status {
                StageStatus::Succeeded => "✓",
                StageStatus::Failed => "✗",
                StageStatus::Skipped => "○",
            };
            let detail = stage.error.as_deref().unwrap_or("");
            output.push_str(&format!(
                "  {} {:12} {:9} {}\n",
                status,
                stage.stage.to_string(),
                format!("{:?}", stage.status).to_lowercase(),
                detail
            ));
        }

        if let Some(artifact) = &record.artifact {
            output.push_str(&format!(
                "\n  artifact {} (revision {})\n",
                artifact.id, artifact.revision
            ));
        }
        if !record.targets.is_empty() {
            output.push_str(&format!("  targets: {}\n", record.targets.join(", ")));
        }
        if record.rolled_back {
            output.push_str("  rollback: all targets reverted to their prior revision\n");
        }

        output
    }

    /// Format an alarm evaluation
    pub fn format_evaluation(&self, evaluation: &Evaluation) -> String {
        if self.format != OutputFormat::Table {
            return self.json(evaluation);
        }

        format!(
            "\n{}: {} | {} (threshold {}, evaluated {})\n",
            evaluation.alarm,
            evaluation.state,
            evaluation.describe(),
            evaluation.threshold,
            evaluation.evaluated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResourceKind, ResourceRecord};

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("table"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_str("JSON"), Some(OutputFormat::Json));
        assert!(OutputFormat::from_str("xml").is_none());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is long", 10), "this is...");
    }

    #[test]
    fn test_format_status_lists_resources() {
        let mut state = StackState::new("EllipsoidStack", "105320045388", "us-east-1");
        state.upsert(
            ResourceRecord::new(ResourceKind::Instance, "EllipsoidInstance")
                .tag("Name", "EllipsoidInstance"),
        );

        let formatter = ReportFormatter::new(OutputFormat::Table);
        let table = formatter.format_status(&state);
        assert!(table.contains("i/EllipsoidInstance"));

        let formatter = ReportFormatter::new(OutputFormat::Json);
        let json = formatter.format_status(&state);
        assert!(json.contains("\"EllipsoidStack\""));
    }
}
