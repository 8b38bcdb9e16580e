//! # xml-report-pipeline
//!
//! Validation and conversion of test-report XML. Reports are checked against one or more XSD
//! schemas compiled together and rewritten into a canonical form with XSLT, both through
//! libxml2/libxslt with external entities, DTD loading and network access disabled.

pub mod cache;
pub mod cli;
pub mod config;
pub mod converter;
pub mod diagnostics;
pub mod error;
pub mod format;
pub mod hardening;
pub mod libxml2;
pub mod libxslt;
pub mod output;
pub mod pipeline;
pub mod schema;
pub mod source;
pub mod validator;

pub use cache::{ArtifactCache, CacheStats};
pub use cli::{Cli, OutputFormat, VerbosityLevel};
pub use config::{Config, ConfigManager};
pub use converter::{ConversionService, ParamValue, Parameters};
pub use diagnostics::{DiagnosticsExt, Severity, UNKNOWN_POSITION, ValidationError, Verdict};
pub use error::{ConversionError, FailureKind, LibXml2Error, ValidationFailure};
pub use format::{FormatDescriptor, FormatRegistry, RegistryError, ReportFormat};
pub use hardening::{HardenedParserConfig, Trust};
pub use output::Output;
pub use pipeline::{PipelineError, PipelineOutcome, ReportPipeline};
pub use schema::SchemaAggregate;
pub use source::{DocumentSource, SchemaSource, StylesheetSource, XmlSource};
pub use validator::{
    FileValidationResult, ValidationResults, ValidationService, ValidationStatus,
};
