//! Simple Output and Reporting
//!
//! This module renders validation results, pipeline outcomes and the format list for the
//! terminal (optionally colorized) or as JSON.

use std::time::Duration;

use serde::Serialize;

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::diagnostics::{Severity, ValidationError};
use crate::format::FormatRegistry;
use crate::pipeline::PipelineOutcome;
use crate::validator::{FileValidationResult, ValidationResults, ValidationStatus};

/// Output formatter for human-readable and JSON results
pub struct Output {
    format: OutputFormat,
    verbosity: VerbosityLevel,
    show_colors: bool,
}

impl Output {
    pub fn new(format: OutputFormat, verbosity: VerbosityLevel) -> Self {
        Self {
            format,
            verbosity,
            show_colors: format == OutputFormat::Human && atty::is(atty::Stream::Stdout),
        }
    }

    /// Formatter that never emits color codes
    pub fn plain(format: OutputFormat, verbosity: VerbosityLevel) -> Self {
        Self {
            format,
            verbosity,
            show_colors: false,
        }
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_results(&self, results: &ValidationResults) -> String {
        if self.format == OutputFormat::Json {
            return to_json(results);
        }

        let mut output = String::new();
        match self.verbosity {
            VerbosityLevel::Quiet => {
                for file_result in &results.file_results {
                    if !file_result.status.is_valid() {
                        output.push_str(&self.format_file_result(file_result));
                        output.push('\n');
                    }
                }
            }
            VerbosityLevel::Normal | VerbosityLevel::Verbose => {
                for file_result in &results.file_results {
                    if self.verbosity == VerbosityLevel::Verbose || !file_result.status.is_valid()
                    {
                        output.push_str(&self.format_file_result(file_result));
                        output.push('\n');
                    }
                }
                output.push_str(&self.format_summary(results));
            }
        }
        output
    }

    pub fn format_file_result(&self, result: &FileValidationResult) -> String {
        let path_display = result.path.display();
        let duration_str = format_duration(result.duration);

        let mut output = match &result.status {
            ValidationStatus::Valid => format!(
                "{}  {} ({})",
                self.colorize("✓ VALID", "32"),
                path_display,
                duration_str
            ),
            ValidationStatus::ValidWithNotices { warning_count } => format!(
                "{}  {} ({}) - {} warning{}",
                self.colorize("✓ VALID", "32"),
                path_display,
                duration_str,
                warning_count,
                plural(*warning_count)
            ),
            ValidationStatus::Invalid { error_count } => format!(
                "{}  {} ({}) - {} error{}",
                self.colorize("✗ INVALID", "31"),
                path_display,
                duration_str,
                error_count,
                plural(*error_count)
            ),
            ValidationStatus::Error { message } => format!(
                "{}  {} ({}) - {}",
                self.colorize("⚠ ERROR", "33"),
                path_display,
                duration_str,
                message
            ),
        };

        for diagnostic in self.visible(&result.diagnostics) {
            output.push_str("\n    ");
            output.push_str(&self.format_diagnostic(diagnostic));
        }
        output
    }

    /// Every diagnostic when verbose, otherwise errors only
    fn visible<'a>(
        &self,
        diagnostics: &'a [ValidationError],
    ) -> impl Iterator<Item = &'a ValidationError> {
        let verbose = self.verbosity == VerbosityLevel::Verbose;
        diagnostics.iter().filter(move |d| verbose || d.is_error())
    }

    pub fn format_diagnostic(&self, diagnostic: &ValidationError) -> String {
        let color = match diagnostic.severity() {
            Severity::Warning => "33",
            Severity::Error | Severity::Fatal => "31",
        };
        format!(
            "{} {}:{} {}",
            self.colorize(diagnostic.severity().as_str(), color),
            diagnostic.line(),
            diagnostic.column(),
            diagnostic.message()
        )
    }

    fn format_summary(&self, results: &ValidationResults) -> String {
        let mut output = String::new();
        output.push_str("Validation Summary:\n");
        output.push_str(&format!("  Total files: {}\n", results.total_files));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Valid:", "32"),
            results.valid_files
        ));

        if results.invalid_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Invalid:", "31"),
                results.invalid_files
            ));
        }
        if results.error_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Errors:", "33"),
                results.error_files
            ));
        }

        output.push_str(&format!("  Success rate: {:.1}%\n", results.success_rate()));
        output.push_str(&format!(
            "  Duration: {}\n",
            format_duration(results.total_duration)
        ));
        output
    }

    pub fn format_outcome(&self, input: &str, outcome: &PipelineOutcome) -> String {
        if self.format == OutputFormat::Json {
            return to_json(outcome);
        }

        let mut output = match outcome {
            PipelineOutcome::Rejected { diagnostics } => format!(
                "{}  {} - {} error{}, not converted",
                self.colorize("✗ REJECTED", "31"),
                input,
                diagnostics.iter().filter(|d| d.is_error()).count(),
                plural(diagnostics.iter().filter(|d| d.is_error()).count())
            ),
            PipelineOutcome::Converted { output, .. } => format!(
                "{}  {} -> {}",
                self.colorize("✓ CONVERTED", "32"),
                input,
                output.display()
            ),
        };

        if self.verbosity != VerbosityLevel::Quiet {
            for diagnostic in self.visible(outcome.diagnostics()) {
                output.push_str("\n    ");
                output.push_str(&self.format_diagnostic(diagnostic));
            }
        }
        output.push('\n');
        output
    }

    pub fn format_registry(&self, registry: &FormatRegistry) -> String {
        #[derive(Serialize)]
        struct Entry<'a> {
            key: &'a str,
            version: &'a str,
            description: &'a str,
            schemas: usize,
            stylesheet: Option<String>,
        }

        let entries: Vec<Entry<'_>> = registry
            .iter()
            .map(|format| Entry {
                key: format.key(),
                version: format.version(),
                description: format.description(),
                schemas: format.schema_locations().len(),
                stylesheet: format.stylesheet().map(|p| p.display().to_string()),
            })
            .collect();

        if self.format == OutputFormat::Json {
            return to_json(&entries);
        }
        if entries.is_empty() {
            return "No report formats configured\n".to_string();
        }

        let mut output = String::new();
        for entry in &entries {
            output.push_str(&format!(
                "{} {} - {} ({} schema{}{})\n",
                self.colorize(entry.key, "1"),
                entry.version,
                entry.description,
                entry.schemas,
                plural(entry.schemas),
                if entry.stylesheet.is_some() {
                    ", style-sheet"
                } else {
                    ""
                }
            ));
        }
        output
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    match serde_json::to_string_pretty(value) {
        Ok(mut json) => {
            json.push('\n');
            json
        }
        Err(err) => format!("{{\"error\": \"{}\"}}\n", err),
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{:.0}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}
