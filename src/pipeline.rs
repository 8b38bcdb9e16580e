//! Validate-then-convert flow for registered report formats.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::ArtifactCache;
use crate::converter::{ConversionService, Parameters};
use crate::diagnostics::{DiagnosticsExt, ValidationError, Verdict};
use crate::error::{ConversionError, FailureKind, ValidationFailure};
use crate::format::{FormatRegistry, RegistryError};
use crate::source::XmlSource;
use crate::validator::ValidationService;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Report format '{key}' has no style-sheet")]
    NoStylesheet { key: String },

    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Registry(_) => FailureKind::Configuration,
            PipelineError::NoStylesheet { .. } => FailureKind::NotFound,
            PipelineError::Validation(err) => err.kind(),
            PipelineError::Conversion(err) => err.kind(),
        }
    }
}

/// What happened to one report
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PipelineOutcome {
    /// Validation found errors; nothing was written
    Rejected { diagnostics: Vec<ValidationError> },
    /// Validation passed (possibly with warnings) and the output was written
    Converted {
        diagnostics: Vec<ValidationError>,
        output: PathBuf,
    },
}

impl PipelineOutcome {
    pub fn diagnostics(&self) -> &[ValidationError] {
        match self {
            PipelineOutcome::Rejected { diagnostics }
            | PipelineOutcome::Converted { diagnostics, .. } => diagnostics,
        }
    }

    pub fn is_converted(&self) -> bool {
        matches!(self, PipelineOutcome::Converted { .. })
    }
}

/// Validates a report with its format's schemas and converts it if it is valid
#[derive(Debug)]
pub struct ReportPipeline {
    registry: FormatRegistry,
    validation: ValidationService,
    conversion: ConversionService,
}

impl ReportPipeline {
    pub fn new(registry: FormatRegistry) -> Self {
        Self {
            registry,
            validation: ValidationService::new(),
            conversion: ConversionService::new(),
        }
    }

    /// Both services share one artifact cache
    pub fn with_cache(registry: FormatRegistry, cache: Arc<ArtifactCache>) -> Self {
        Self {
            registry,
            validation: ValidationService::with_cache(Arc::clone(&cache)),
            conversion: ConversionService::with_cache(cache),
        }
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    pub fn validation(&self) -> &ValidationService {
        &self.validation
    }

    pub fn conversion(&self) -> &ConversionService {
        &self.conversion
    }

    pub fn process(
        &self,
        format_key: &str,
        input: &Path,
        output: &Path,
        params: Option<&Parameters>,
    ) -> Result<PipelineOutcome, PipelineError> {
        let format = self.registry.require(format_key)?;
        let stylesheet = format
            .stylesheet()
            .ok_or_else(|| PipelineError::NoStylesheet {
                key: format_key.to_string(),
            })?
            .to_path_buf();

        let diagnostics = format.validate(&self.validation, input)?;
        if diagnostics.verdict() == Verdict::Invalid {
            warn!(
                format = format_key,
                input = %input.display(),
                errors = diagnostics.errors().len(),
                "Report rejected"
            );
            return Ok(PipelineOutcome::Rejected { diagnostics });
        }

        self.conversion.convert(
            XmlSource::File(stylesheet),
            XmlSource::file(input),
            output,
            params,
        )?;
        info!(
            format = format_key,
            input = %input.display(),
            output = %output.display(),
            "Report converted"
        );

        Ok(PipelineOutcome::Converted {
            diagnostics,
            output: output.to_path_buf(),
        })
    }
}
