//! Output formatters for test results
//!
//! Provides table, JSON, YAML, and summary output formats.

use std::collections::BTreeMap;

use crate::models::{ResultOutcome, TestResult};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Yaml,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "yaml" | "yml" => Some(OutputFormat::Yaml),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn outcome(&self, outcome: ResultOutcome) -> String {
        let label = format!("{} {}", outcome.symbol(), outcome);
        if !self.colorize {
            return label;
        }

        let color = match outcome {
            ResultOutcome::Pass => "32",
            ResultOutcome::Fail | ResultOutcome::Error => "31",
            ResultOutcome::Warn | ResultOutcome::Skip => "33",
            ResultOutcome::Info | ResultOutcome::Pending => "36",
        };
        format!("\x1b[{color}m{label}\x1b[0m")
    }

    /// Format a single test result
    pub fn format_result(&self, result: &TestResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(result).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Yaml => serde_yaml::to_string(result).unwrap_or_default(),
            OutputFormat::Table | OutputFormat::Summary => self.format_result_table(result),
        }
    }

    fn format_result_table(&self, result: &TestResult) -> String {
        let mut line = format!(
            "{:3}. {:<40} {:<12} {:<10} {:>8}",
            result.serial_number,
            result.name,
            result.guest.name,
            self.outcome(result.result),
            result.duration.as_deref().unwrap_or("-"),
        );
        if !result.note.is_empty() {
            line.push_str(&format!("  ({})", result.note.join(", ")));
        }
        line
    }

    /// Format the whole result set
    pub fn format_results(&self, results: &[TestResult]) -> String {
        match self.format {
            OutputFormat::Table => self.format_results_table(results),
            OutputFormat::Json => serde_json::to_string(results).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(results).unwrap_or_default(),
            OutputFormat::Yaml => serde_yaml::to_string(results).unwrap_or_default(),
            OutputFormat::Summary => self.format_summary(results),
        }
    }

    fn format_results_table(&self, results: &[TestResult]) -> String {
        let mut output = String::new();

        output.push_str("\n═══════════════════════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(
            " {:>3}  {:<40} {:<12} {:<10} {:>8}\n",
            "#", "Test", "Guest", "Result", "Duration"
        ));
        output.push_str("───────────────────────────────────────────────────────────────────────────────\n");

        for result in results {
            output.push_str(&self.format_result_table(result));
            output.push('\n');

            for check in &result.check {
                output.push_str(&format!(
                    "       check {} ({}): {}\n",
                    check.name,
                    check.event,
                    self.outcome(check.result)
                ));
            }
        }

        output.push_str("───────────────────────────────────────────────────────────────────────────────\n");
        output.push_str(&format!(" {}\n", self.format_summary(results)));

        output
    }

    /// Count of results per outcome, e.g. `3 results: 2 pass, 1 fail`
    pub fn format_summary(&self, results: &[TestResult]) -> String {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for result in results {
            *counts
                .entry(result.result.to_string().to_lowercase())
                .or_default() += 1;
        }

        let counts: Vec<String> = counts
            .iter()
            .map(|(outcome, count)| format!("{count} {outcome}"))
            .collect();

        if counts.is_empty() {
            "0 results".to_string()
        } else {
            format!("{} results: {}", results.len(), counts.join(", "))
        }
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}
