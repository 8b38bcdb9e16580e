//! Schema validation service
//!
//! [`ValidationService`] checks one document against a set of XSD sources compiled as a
//! single grammar and returns every diagnostic libxml2 reports, in detection order. Content
//! problems (schema violations, malformed XML, a grammar that does not compile) are part of
//! the returned list. Only missing or unreadable resources, engine faults and context
//! construction failures are returned as [`ValidationFailure`].
//!
//! Validation of many documents against the same schemas is parallelized with rayon in
//! [`ValidationService::validate_files`]; each document still gets its own parser and
//! validation context.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{ArtifactCache, content_key};
use crate::diagnostics::{DiagnosticsExt, ValidationError, Verdict};
use crate::error::{LibXml2Error, ValidationFailure};
use crate::hardening::HardenedParserConfig;
use crate::libxml2::{ErrorCollector, LibXml2Wrapper, ValidationResult};
use crate::schema::{self, CompileOutcome, SchemaAggregate};
use crate::source::{DocumentSource, LoadedSource, SchemaSource, XmlSource};

/// Why a cached compile produced no grammar
#[derive(Debug, Clone)]
enum CompileMiss {
    Rejected(Vec<ValidationError>),
    Unavailable(LibXml2Error),
}

/// Validates documents against aggregated XSD schemas
///
/// The service holds no per-call state. Without a cache every call compiles its schemas
/// afresh; with [`ValidationService::with_cache`] compiled aggregates are reused while the
/// schema bytes stay the same.
#[derive(Debug)]
pub struct ValidationService {
    libxml2: LibXml2Wrapper,
    cache: Option<Arc<ArtifactCache>>,
}

impl ValidationService {
    pub fn new() -> Self {
        Self {
            libxml2: LibXml2Wrapper::new(),
            cache: None,
        }
    }

    pub fn with_cache(cache: Arc<ArtifactCache>) -> Self {
        Self {
            libxml2: LibXml2Wrapper::new(),
            cache: Some(cache),
        }
    }

    pub fn cache(&self) -> Option<&Arc<ArtifactCache>> {
        self.cache.as_ref()
    }

    /// Validate a document file against all `schemas` compiled together
    ///
    /// An empty schema list returns an empty diagnostic list without touching `document`.
    pub fn validate<I>(
        &self,
        schemas: I,
        document: &Path,
    ) -> Result<Vec<ValidationError>, ValidationFailure>
    where
        I: IntoIterator<Item = SchemaSource>,
    {
        self.validate_source(schemas, XmlSource::file(document))
    }

    pub fn validate_with_schema(
        &self,
        schema: &Path,
        document: &Path,
    ) -> Result<Vec<ValidationError>, ValidationFailure> {
        self.validate([XmlSource::file(schema)], document)
    }

    pub fn validate_with_schema_files(
        &self,
        schemas: &[PathBuf],
        document: &Path,
    ) -> Result<Vec<ValidationError>, ValidationFailure> {
        self.validate(schemas.iter().cloned().map(XmlSource::File), document)
    }

    /// Validate a document held in any [`XmlSource`]
    pub fn validate_source<I>(
        &self,
        schemas: I,
        document: DocumentSource,
    ) -> Result<Vec<ValidationError>, ValidationFailure>
    where
        I: IntoIterator<Item = SchemaSource>,
    {
        let schemas: Vec<SchemaSource> = schemas.into_iter().collect();
        if schemas.is_empty() {
            debug!(document = %document, "No schemas requested, skipping validation");
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let schemas = schema::load_sources(schemas)?;
        let document = document
            .load(0)
            .map_err(|(path, err)| ValidationFailure::from_io(&path, err))?;

        let aggregate = match self.aggregate(&schemas)? {
            Ok(aggregate) => aggregate,
            Err(diagnostics) => {
                info!(
                    document = %document.display.display(),
                    diagnostics = diagnostics.len(),
                    "Schema aggregate did not compile"
                );
                return Ok(diagnostics);
            }
        };

        let diagnostics = self.validate_loaded(&aggregate, &document)?;
        info!(
            document = %document.display.display(),
            schemas = aggregate.source_count(),
            diagnostics = diagnostics.len(),
            verdict = ?diagnostics.verdict(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Validation finished"
        );
        Ok(diagnostics)
    }

    /// Compile (or fetch from the cache) the grammar for `schemas`
    ///
    /// The inner `Err` carries the compile diagnostics of a grammar that could not be built.
    fn aggregate(
        &self,
        schemas: &[LoadedSource],
    ) -> Result<Result<SchemaAggregate, Vec<ValidationError>>, ValidationFailure> {
        let compile = || match schema::compile(&self.libxml2, schemas) {
            Ok(CompileOutcome::Compiled(aggregate)) => Ok(aggregate),
            Ok(CompileOutcome::Failed { diagnostics }) => Err(CompileMiss::Rejected(diagnostics)),
            Err(err) => Err(CompileMiss::Unavailable(err)),
        };

        let compiled = match &self.cache {
            Some(cache) => {
                let key = content_key(
                    "schema",
                    schemas
                        .iter()
                        .map(|s| (s.location.as_str(), s.content.as_slice())),
                );
                cache.schema_or_compile(key, compile)
            }
            None => compile(),
        };

        match compiled {
            Ok(aggregate) => Ok(Ok(aggregate)),
            Err(CompileMiss::Rejected(diagnostics)) => Ok(Err(diagnostics)),
            Err(CompileMiss::Unavailable(err)) => Err(err.into()),
        }
    }

    fn validate_loaded(
        &self,
        aggregate: &SchemaAggregate,
        document: &LoadedSource,
    ) -> Result<Vec<ValidationError>, ValidationFailure> {
        let mut diagnostics = aggregate.compile_diagnostics().to_vec();

        let mut collector = ErrorCollector::new();
        let parsed = self.libxml2.parse_document(
            &document.content,
            &document.location,
            HardenedParserConfig::untrusted(),
            &mut collector,
        )?;

        let Some(parsed) = parsed else {
            debug!(document = %document.display.display(), "Document is not well-formed");
            let message = collector
                .last_error_message()
                .unwrap_or("Document is not well-formed")
                .to_string();
            diagnostics.extend(collector.into_diagnostics());
            diagnostics.push(ValidationError::unlocated(message));
            return Ok(diagnostics);
        };

        // The schema validator rejects trees that still hold entity reference nodes
        if !self.libxml2.substitute_entities(&parsed, &mut collector) {
            diagnostics.extend(collector.into_diagnostics());
            return Ok(diagnostics);
        }

        match self
            .libxml2
            .validate_document(aggregate.schema(), &parsed, &mut collector)?
        {
            ValidationResult::InternalError { code } => Err(ValidationFailure::Engine {
                details: match collector.summary() {
                    Some(summary) => format!("libxml2 internal error {code}: {summary}"),
                    None => format!("libxml2 internal error {code}"),
                },
            }),
            ValidationResult::Valid | ValidationResult::Invalid { .. } => {
                diagnostics.extend(collector.into_diagnostics());
                Ok(diagnostics)
            }
        }
    }

    /// Validate many documents against the same schema files, in parallel
    ///
    /// Runs on the current rayon pool. Failures are recorded per file instead of aborting
    /// the batch.
    pub fn validate_files(&self, schemas: &[PathBuf], documents: &[PathBuf]) -> ValidationResults {
        let start = Instant::now();
        let file_results: Vec<FileValidationResult> = documents
            .par_iter()
            .map(|document| {
                let started = Instant::now();
                let outcome = self.validate_with_schema_files(schemas, document);
                FileValidationResult::from_outcome(document.clone(), outcome, started.elapsed())
            })
            .collect();

        ValidationResults::aggregate(file_results, start.elapsed())
    }
}

impl Default for ValidationService {
    fn default() -> Self {
        Self::new()
    }
}

/// Status of a single file validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ValidationStatus {
    /// No diagnostics at all
    Valid,
    /// Warnings only
    ValidWithNotices { warning_count: usize },
    /// At least one ERROR/FATAL diagnostic
    Invalid { error_count: usize },
    /// The validation could not be attempted or completed
    Error { message: String },
}

impl ValidationStatus {
    /// Valid, with or without notices
    pub fn is_valid(&self) -> bool {
        matches!(
            self,
            ValidationStatus::Valid | ValidationStatus::ValidWithNotices { .. }
        )
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ValidationStatus::Invalid { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ValidationStatus::Error { .. })
    }
}

/// Result of validating a single file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileValidationResult {
    pub path: PathBuf,
    #[serde(flatten)]
    pub status: ValidationStatus,
    pub diagnostics: Vec<ValidationError>,
    pub duration: Duration,
}

impl FileValidationResult {
    pub fn from_outcome(
        path: PathBuf,
        outcome: Result<Vec<ValidationError>, ValidationFailure>,
        duration: Duration,
    ) -> Self {
        match outcome {
            Ok(diagnostics) => {
                let status = match diagnostics.verdict() {
                    Verdict::Valid => ValidationStatus::Valid,
                    Verdict::ValidWithNotices => ValidationStatus::ValidWithNotices {
                        warning_count: diagnostics.warnings().len(),
                    },
                    Verdict::Invalid => ValidationStatus::Invalid {
                        error_count: diagnostics.errors().len(),
                    },
                };
                Self {
                    path,
                    status,
                    diagnostics,
                    duration,
                }
            }
            Err(failure) => Self {
                path,
                status: ValidationStatus::Error {
                    message: failure.to_string(),
                },
                diagnostics: Vec::new(),
                duration,
            },
        }
    }
}

/// Aggregated results of validating multiple files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResults {
    pub total_files: usize,
    pub valid_files: usize,
    pub invalid_files: usize,
    pub error_files: usize,
    /// Wall-clock time of the whole batch
    pub total_duration: Duration,
    pub file_results: Vec<FileValidationResult>,
}

impl ValidationResults {
    /// Aggregate individual file results into summary
    pub fn aggregate(file_results: Vec<FileValidationResult>, total_duration: Duration) -> Self {
        let mut valid_files = 0;
        let mut invalid_files = 0;
        let mut error_files = 0;

        for result in &file_results {
            match result.status {
                ValidationStatus::Valid | ValidationStatus::ValidWithNotices { .. } => {
                    valid_files += 1
                }
                ValidationStatus::Invalid { .. } => invalid_files += 1,
                ValidationStatus::Error { .. } => error_files += 1,
            }
        }

        Self {
            total_files: file_results.len(),
            valid_files,
            invalid_files,
            error_files,
            total_duration,
            file_results,
        }
    }

    /// Check if all files validated successfully
    pub fn all_valid(&self) -> bool {
        self.valid_files == self.total_files
    }

    pub fn has_failures(&self) -> bool {
        self.error_files > 0
    }

    /// Get success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            (self.valid_files as f64 / self.total_files as f64) * 100.0
        }
    }
}
