use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::converter::{ParamValue, Parameters};

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show failures
    Quiet,
    /// Show a summary
    #[default]
    Normal,
    /// Show every diagnostic
    Verbose,
}

/// How results are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

/// Validate and convert test-report XML
#[derive(Parser, Debug, Clone)]
#[command(name = "xml-report-pipeline")]
#[command(
    about = "Validate test-report XML against XSD schemas and convert it with XSLT, hardened against XXE"
)]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Print every diagnostic and debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Only print failures
    #[arg(
        short = 'q',
        long = "quiet",
        global = true,
        conflicts_with = "verbose"
    )]
    pub quiet: bool,

    /// Result format
    #[arg(long = "output", value_enum, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Number of parallel validation threads
    #[arg(short = 't', long = "threads", global = true)]
    pub threads: Option<usize>,

    /// Reuse compiled schemas and style-sheets across files
    #[arg(long = "cache", global = true)]
    pub cache: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Validate reports against a format's schemas or explicit XSD files
    Validate(ValidateArgs),
    /// Convert a report with a format's style-sheet or an explicit XSLT file
    Convert(ConvertArgs),
    /// List the configured report formats
    Formats,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Registered report format whose schemas are used
    #[arg(short = 'f', long = "format", conflicts_with = "schemas")]
    pub format: Option<String>,

    /// XSD file; repeat to compile several schemas together
    #[arg(short = 's', long = "schema", action = clap::ArgAction::Append)]
    pub schemas: Vec<PathBuf>,

    /// Report files to validate
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ConvertArgs {
    /// Registered report format: validate first, then apply its style-sheet
    #[arg(
        short = 'f',
        long = "format",
        conflicts_with = "stylesheet",
        required_unless_present = "stylesheet"
    )]
    pub format: Option<String>,

    /// XSLT file applied without validation
    #[arg(short = 'x', long = "stylesheet")]
    pub stylesheet: Option<PathBuf>,

    /// Style-sheet parameter passed as a string
    #[arg(
        short = 'p',
        long = "param",
        value_name = "NAME=VALUE",
        value_parser = parse_param,
        action = clap::ArgAction::Append
    )]
    pub params: Vec<(String, ParamValue)>,

    /// Report to convert
    pub input: PathBuf,

    /// Output file; standard output when omitted
    #[arg(short = 'o', long = "output-file")]
    pub output: Option<PathBuf>,
}

impl ConvertArgs {
    pub fn parameters(&self) -> Parameters {
        self.params.iter().cloned().collect()
    }
}

fn parse_param(assignment: &str) -> Result<(String, ParamValue), String> {
    Parameters::parse_assignment(assignment).map_err(|err| err.to_string())
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(threads) = self.threads
            && threads == 0
        {
            return Err("Number of threads must be greater than 0".to_string());
        }
        if let Command::Validate(args) = &self.command
            && args.format.is_none()
            && args.schemas.is_empty()
        {
            return Err("Either --format or at least one --schema is required".to_string());
        }
        Ok(())
    }

    pub fn get_thread_count(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_with_schemas() {
        let cli = Cli::try_parse_from([
            "xml-report-pipeline",
            "validate",
            "-s",
            "a.xsd",
            "--schema",
            "b.xsd",
            "r1.xml",
            "r2.xml",
        ])
        .unwrap();

        match &cli.command {
            Command::Validate(args) => {
                assert_eq!(
                    args.schemas,
                    vec![PathBuf::from("a.xsd"), PathBuf::from("b.xsd")]
                );
                assert_eq!(args.files.len(), 2);
                assert!(args.format.is_none());
            }
            other => panic!("Expected validate, got {:?}", other),
        }
        assert!(cli.validate().is_ok());
        assert_eq!(cli.verbosity(), VerbosityLevel::Normal);
    }

    #[test]
    fn test_validate_needs_schemas_or_format() {
        let cli = Cli::try_parse_from(["xml-report-pipeline", "validate", "r.xml"]).unwrap();
        assert!(cli.validate().is_err());

        let conflicting = Cli::try_parse_from([
            "xml-report-pipeline",
            "validate",
            "--format",
            "junit",
            "--schema",
            "a.xsd",
            "r.xml",
        ]);
        assert!(conflicting.is_err());
    }

    #[test]
    fn test_convert_with_params_and_globals() {
        let cli = Cli::try_parse_from([
            "xml-report-pipeline",
            "convert",
            "--stylesheet",
            "junit.xsl",
            "-p",
            "title=Nightly",
            "--param",
            "build=42",
            "report.xml",
            "-o",
            "out.xml",
            "--output",
            "json",
            "-q",
        ])
        .unwrap();

        assert_eq!(cli.output_format, OutputFormat::Json);
        assert_eq!(cli.verbosity(), VerbosityLevel::Quiet);
        match &cli.command {
            Command::Convert(args) => {
                let params = args.parameters();
                assert_eq!(params.len(), 2);
                assert_eq!(
                    params.get("build"),
                    Some(&ParamValue::String("42".to_string()))
                );
                assert_eq!(args.output, Some(PathBuf::from("out.xml")));
            }
            other => panic!("Expected convert, got {:?}", other),
        }
    }

    #[test]
    fn test_convert_requires_format_or_stylesheet() {
        assert!(Cli::try_parse_from(["xml-report-pipeline", "convert", "report.xml"]).is_err());
        assert!(
            Cli::try_parse_from(["xml-report-pipeline", "convert", "-p", "novalue", "-x", "a.xsl", "r.xml"])
                .is_err()
        );
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["xml-report-pipeline", "-v", "-q", "formats"]).is_err());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let cli = Cli::try_parse_from(["xml-report-pipeline", "--threads", "0", "formats"]).unwrap();
        assert!(cli.validate().is_err());
    }
}
