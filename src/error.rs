use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Coarse classification shared by every failure the pipeline can raise.
///
/// Content problems found in a document are never failures; they are returned as
/// diagnostics. A failure always means the operation could not be attempted or completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A named resource (schema, style-sheet, input document) does not exist
    NotFound,
    /// A resource exists but could not be read, or the output could not be written
    Io,
    /// libxml2/libxslt reported a fatal error of its own
    Engine,
    /// The parser or validator could not be constructed with the hardened settings
    Configuration,
}

impl FailureKind {
    /// Infrastructure failures are about resources, not about the engine or the data
    pub fn is_infrastructure(self) -> bool {
        matches!(self, FailureKind::NotFound | FailureKind::Io)
    }
}

/// Failure raised by [`crate::ValidationService`]
#[derive(Error, Debug)]
pub enum ValidationFailure {
    #[error("Resource not found: {path}")]
    NotFound { path: PathBuf },

    #[error("IO error: {path} - {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Validation engine error: {details}")]
    Engine { details: String },

    #[error("Validator configuration error: {details}")]
    Configuration { details: String },
}

impl ValidationFailure {
    pub(crate) fn from_io(path: &Path, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            ValidationFailure::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ValidationFailure::Io {
                path: path.to_path_buf(),
                source: err,
            }
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ValidationFailure::NotFound { .. } => FailureKind::NotFound,
            ValidationFailure::Io { .. } => FailureKind::Io,
            ValidationFailure::Engine { .. } => FailureKind::Engine,
            ValidationFailure::Configuration { .. } => FailureKind::Configuration,
        }
    }
}

/// Failure raised by [`crate::ConversionService`]
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Resource not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Conversion IO error: {path} - {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Style-sheet compilation failed: {details}")]
    Stylesheet { details: String },

    #[error("Error to convert the input XML document: {details}")]
    InputParse { details: String },

    #[error("Transformation failed: {details}")]
    Transform { details: String },

    #[error("Invalid transformation parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Transformer configuration error: {details}")]
    Configuration { details: String },
}

impl ConversionError {
    pub(crate) fn from_io(path: &Path, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            ConversionError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConversionError::Io {
                path: path.to_path_buf(),
                source: err,
            }
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ConversionError::NotFound { .. } => FailureKind::NotFound,
            ConversionError::Io { .. } => FailureKind::Io,
            ConversionError::Stylesheet { .. }
            | ConversionError::InputParse { .. }
            | ConversionError::Transform { .. }
            | ConversionError::InvalidParameter { .. } => FailureKind::Engine,
            ConversionError::Configuration { .. } => FailureKind::Configuration,
        }
    }
}

/// LibXML2/libxslt-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LibXml2Error {
    #[error("Parser context creation failed")]
    ParserContextCreationFailed,

    #[error("Validation context creation failed")]
    ValidationContextCreationFailed,

    #[error("Transformation context creation failed")]
    TransformContextCreationFailed,

    #[error("Input contains an interior NUL byte: {what}")]
    InteriorNul { what: String },

    #[error("Input too large for libxml2: {size} bytes")]
    InputTooLarge { size: usize },
}

impl From<LibXml2Error> for ValidationFailure {
    fn from(err: LibXml2Error) -> Self {
        ValidationFailure::Configuration {
            details: err.to_string(),
        }
    }
}

impl From<LibXml2Error> for ConversionError {
    fn from(err: LibXml2Error) -> Self {
        ConversionError::Configuration {
            details: err.to_string(),
        }
    }
}

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;
