//! Report formats known to the pipeline.
//!
//! A format names the schemas a report must satisfy and the style-sheet that turns it into
//! the canonical form. Formats are registered by key at start-up, usually from the
//! `[[formats]]` tables of the configuration file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostics::ValidationError;
use crate::error::ValidationFailure;
use crate::source::XmlSource;
use crate::validator::ValidationService;

/// Capability every report format provides
pub trait ReportFormat: Send + Sync + fmt::Debug {
    /// Unique registry key, e.g. `junit`
    fn key(&self) -> &str;

    fn description(&self) -> &str;

    fn version(&self) -> &str;

    /// Schemas compiled together to validate reports of this format; may be empty
    fn schema_locations(&self) -> &[PathBuf];

    /// Style-sheet converting this format to the canonical form
    fn stylesheet(&self) -> Option<&Path>;

    /// Validate `document` against this format's schemas
    fn validate(
        &self,
        service: &ValidationService,
        document: &Path,
    ) -> Result<Vec<ValidationError>, ValidationFailure> {
        service.validate(
            self.schema_locations().iter().cloned().map(XmlSource::File),
            document,
        )
    }
}

/// Plain data implementation of [`ReportFormat`], as read from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub key: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub schemas: Vec<PathBuf>,
    #[serde(default)]
    pub stylesheet: Option<PathBuf>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl FormatDescriptor {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: String::new(),
            version: default_version(),
            schemas: Vec::new(),
            stylesheet: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_schema(mut self, schema: impl Into<PathBuf>) -> Self {
        self.schemas.push(schema.into());
        self
    }

    pub fn with_stylesheet(mut self, stylesheet: impl Into<PathBuf>) -> Self {
        self.stylesheet = Some(stylesheet.into());
        self
    }

    /// Resolve relative schema and style-sheet paths against `base`
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        for schema in &mut self.schemas {
            if schema.is_relative() {
                *schema = base.join(&*schema);
            }
        }
        if let Some(stylesheet) = &mut self.stylesheet
            && stylesheet.is_relative()
        {
            *stylesheet = base.join(&*stylesheet);
        }
        self
    }
}

impl ReportFormat for FormatDescriptor {
    fn key(&self) -> &str {
        &self.key
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn schema_locations(&self) -> &[PathBuf] {
        &self.schemas
    }

    fn stylesheet(&self) -> Option<&Path> {
        self.stylesheet.as_deref()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Report format '{key}' is already registered")]
    DuplicateKey { key: String },

    #[error("Report format key must not be empty")]
    EmptyKey,

    #[error("Unknown report format '{key}' (known: {known})")]
    UnknownFormat { key: String, known: String },
}

/// Report formats by key
#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    formats: BTreeMap<String, Arc<dyn ReportFormat>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = FormatDescriptor>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(Arc::new(descriptor))?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, format: Arc<dyn ReportFormat>) -> Result<(), RegistryError> {
        let key = format.key().trim();
        if key.is_empty() {
            return Err(RegistryError::EmptyKey);
        }
        if self.formats.contains_key(key) {
            return Err(RegistryError::DuplicateKey {
                key: key.to_string(),
            });
        }
        self.formats.insert(key.to_string(), format);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Arc<dyn ReportFormat>> {
        self.formats.get(key)
    }

    /// Like [`FormatRegistry::get`], with an error listing the known keys
    pub fn require(&self, key: &str) -> Result<&Arc<dyn ReportFormat>, RegistryError> {
        self.get(key).ok_or_else(|| RegistryError::UnknownFormat {
            key: key.to_string(),
            known: self.keys().collect::<Vec<_>>().join(", "),
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.formats.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ReportFormat>> {
        self.formats.values()
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}
