//! Diagnostic records produced by validation.
//!
//! A validation run never fails because of what a document contains. Schema violations and
//! well-formedness problems are collected here, in the order libxml2 reports them, and the
//! caller decides what to do with them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Line or column value used when the engine cannot locate a problem
pub const UNKNOWN_POSITION: i32 = -1;

/// Severity of a diagnostic, mirroring libxml2's `xmlErrorLevel`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Map an `xmlErrorLevel` value; `XML_ERR_NONE` never reaches the collector
    pub(crate) fn from_level(level: i32) -> Self {
        match level {
            1 => Severity::Warning,
            3 => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One diagnostic found while validating a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationError {
    severity: Severity,
    line: i32,
    column: i32,
    message: String,
}

impl ValidationError {
    /// Positions of zero or less mean "unknown" and are normalized to [`UNKNOWN_POSITION`]
    pub fn new(severity: Severity, line: i32, column: i32, message: impl Into<String>) -> Self {
        Self {
            severity,
            line: normalize_position(line),
            column: normalize_position(column),
            message: message.into(),
        }
    }

    /// An `ERROR` entry with no position, used when the engine gives up on a document
    pub fn unlocated(message: impl Into<String>) -> Self {
        Self::new(
            Severity::Error,
            UNKNOWN_POSITION,
            UNKNOWN_POSITION,
            message,
        )
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn line(&self) -> i32 {
        self.line
    }

    pub fn column(&self) -> i32 {
        self.column
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_error(&self) -> bool {
        self.severity >= Severity::Error
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}:{}] {}",
            self.severity, self.line, self.column, self.message
        )
    }
}

fn normalize_position(value: i32) -> i32 {
    if value > 0 { value } else { UNKNOWN_POSITION }
}

/// What a diagnostic list means for the document it describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// No diagnostics at all
    Valid,
    /// Warnings only
    ValidWithNotices,
    /// At least one ERROR or FATAL entry
    Invalid,
}

/// Queries over a diagnostic list
pub trait DiagnosticsExt {
    fn has_errors(&self) -> bool;
    fn is_valid(&self) -> bool;
    fn verdict(&self) -> Verdict;
    fn errors(&self) -> Vec<&ValidationError>;
    fn warnings(&self) -> Vec<&ValidationError>;
}

impl DiagnosticsExt for [ValidationError] {
    fn has_errors(&self) -> bool {
        self.iter().any(ValidationError::is_error)
    }

    fn is_valid(&self) -> bool {
        !self.has_errors()
    }

    fn verdict(&self) -> Verdict {
        if self.is_empty() {
            Verdict::Valid
        } else if self.has_errors() {
            Verdict::Invalid
        } else {
            Verdict::ValidWithNotices
        }
    }

    fn errors(&self) -> Vec<&ValidationError> {
        self.iter().filter(|d| d.is_error()).collect()
    }

    fn warnings(&self) -> Vec<&ValidationError> {
        self.iter()
            .filter(|d| d.severity == Severity::Warning)
            .collect()
    }
}
