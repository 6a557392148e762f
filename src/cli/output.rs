//! Output formatting for CLI commands.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::hotswap::{HotswapReport, HotswapStatus};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    format: OutputFormat,
}

/// Hotswappable change row for table display.
#[derive(Tabled)]
struct HotswappableRow {
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Properties")]
    properties: String,
    #[tabled(rename = "Resources")]
    resources: String,
}

/// Non-hotswappable change row for table display.
#[derive(Tabled)]
struct BlockedRow {
    #[tabled(rename = "Resource")]
    logical_id: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a hotswap report for display.
    #[must_use]
    pub fn format_report(&self, report: &HotswapReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &HotswapReport) -> String {
        let mut output = String::new();
        let _ = writeln!(
            output,
            "\nHotswap classification ({})\n",
            report.mode.to_string().bold()
        );

        if !report.hotswappable.is_empty() {
            let rows: Vec<HotswappableRow> = report
                .hotswappable
                .iter()
                .map(|c| HotswappableRow {
                    resource_type: c.resource_type.clone(),
                    properties: c.props_changed.join(", "),
                    resources: c.resource_names.join("\n"),
                })
                .collect();
            let _ = writeln!(output, "{}", "Hotswappable changes:".green());
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let advisories: Vec<BlockedRow> = report
            .advisories()
            .map(|c| BlockedRow {
                logical_id: c.logical_id.clone(),
                resource_type: c.resource_type.clone(),
                reason: Self::truncate(&c.reason, 60),
            })
            .collect();
        if !advisories.is_empty() {
            let _ = writeln!(output, "\n{}", "Non-hotswappable changes:".yellow());
            output.push_str(&Table::new(advisories).to_string());
            output.push('\n');
        }

        let _ = write!(
            output,
            "\nStatus: {} ({} resources hotswappable, {} changes not hotswappable)\n",
            Self::format_status(report.status),
            report.resource_count(),
            report.non_hotswappable.len()
        );
        if report.requires_full_deployment() {
            let _ = writeln!(output, "{} A full deployment is required.", "!".yellow());
        }

        output
    }

    /// Formats a configuration validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings.iter().map(ToString::to_string).collect::<Vec<_>>(),
            })
            .to_string(),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Configuration is valid.\n", "✓".green())
                } else {
                    format!("{} Configuration is invalid.\n", "✗".red())
                };
                for error in &result.errors {
                    let _ = writeln!(output, "   - {error}");
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\nWarnings:");
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    fn format_status(status: HotswapStatus) -> String {
        let label = status.to_string();
        match status {
            HotswapStatus::Applied | HotswapStatus::Planned => label.green().to_string(),
            HotswapStatus::FallBackRequired | HotswapStatus::Bypassed => label.yellow().to_string(),
            HotswapStatus::NoOp => label.dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotswap::{HotswapMode, HotswappableSummary, NonHotswappableChange};

    fn report() -> HotswapReport {
        HotswapReport::new(
            HotswapMode::FallBack,
            HotswapStatus::FallBackRequired,
            vec![HotswappableSummary {
                resource_type: String::from("AWS::Lambda::Function"),
                props_changed: vec![String::from("Code")],
                service: String::from("lambda"),
                resource_names: vec![String::from("Lambda Function 'my-func'")],
            }],
            vec![NonHotswappableChange {
                resource_type: String::from("AWS::SQS::Queue"),
                logical_id: String::from("Queue"),
                rejected_properties: vec![String::from("Delay")],
                reason: String::from("resource type 'AWS::SQS::Queue' is not supported for hotswap"),
                hotswap_only_visible: true,
            }],
        )
    }

    #[test]
    fn test_text_report_lists_both_sides() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_report(&report());
        assert!(text.contains("Lambda Function 'my-func'"));
        assert!(text.contains("Queue"));
        assert!(text.contains("fall-back-required"));
        assert!(text.contains("A full deployment is required."));
    }

    #[test]
    fn test_json_report() {
        let json = OutputFormatter::new(OutputFormat::Json).format_report(&report());
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "fall-back-required");
        assert_eq!(value["nonHotswappable"][0]["logicalId"], "Queue");
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("abcdefghijkl", 8), "abcde...");
    }
}
