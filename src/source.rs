//! Where schemas, style-sheets and documents come from.

use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use url::Url;

/// A schema, style-sheet or document, either on disk or already in memory
///
/// Sources are consumed by the call that uses them; build a fresh one per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlSource {
    File(PathBuf),
    Memory {
        /// Location used as the base URI for relative references and in messages
        system_id: Option<String>,
        content: Vec<u8>,
    },
}

/// Schema input for [`crate::ValidationService`]
pub type SchemaSource = XmlSource;
/// Style-sheet input for [`crate::ConversionService`]
pub type StylesheetSource = XmlSource;
/// Document input for [`crate::ConversionService`]
pub type DocumentSource = XmlSource;

impl XmlSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        XmlSource::File(path.into())
    }

    pub fn memory(content: impl Into<Vec<u8>>) -> Self {
        XmlSource::Memory {
            system_id: None,
            content: content.into(),
        }
    }

    /// In-memory content that relative references should resolve against `system_id`
    pub fn with_system_id(content: impl Into<Vec<u8>>, system_id: impl Into<String>) -> Self {
        XmlSource::Memory {
            system_id: Some(system_id.into()),
            content: content.into(),
        }
    }

    /// Drain an already open reader into an in-memory source
    pub fn from_reader(mut reader: impl Read) -> io::Result<Self> {
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;
        Ok(Self::memory(content))
    }

    /// Human readable name for logs and error messages
    pub fn describe(&self) -> String {
        match self {
            XmlSource::File(path) => path.display().to_string(),
            XmlSource::Memory {
                system_id: Some(id),
                ..
            } => id.clone(),
            XmlSource::Memory {
                system_id: None,
                content,
            } => format!("<memory: {} bytes>", content.len()),
        }
    }

    /// Read the content and work out the absolute URL libxml2 should know it by
    ///
    /// `index` disambiguates anonymous in-memory sources within one call.
    pub(crate) fn load(self, index: usize) -> Result<LoadedSource, (PathBuf, io::Error)> {
        match self {
            XmlSource::File(path) => {
                let content = fs::read(&path).map_err(|e| (path.clone(), e))?;
                let location = file_url(&path).map_err(|e| (path.clone(), e))?;
                Ok(LoadedSource {
                    location,
                    display: path,
                    content,
                })
            }
            XmlSource::Memory { system_id, content } => {
                let location = match &system_id {
                    Some(id) => memory_url(id),
                    None => None,
                }
                .unwrap_or_else(|| format!("memory:///source-{index}.xml"));
                let display = PathBuf::from(system_id.unwrap_or_else(|| location.clone()));
                Ok(LoadedSource {
                    location,
                    display,
                    content,
                })
            }
        }
    }
}

impl fmt::Display for XmlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl From<PathBuf> for XmlSource {
    fn from(path: PathBuf) -> Self {
        XmlSource::File(path)
    }
}

impl From<&Path> for XmlSource {
    fn from(path: &Path) -> Self {
        XmlSource::File(path.to_path_buf())
    }
}

/// Source content read into memory, ready to hand to libxml2
#[derive(Debug, Clone)]
pub(crate) struct LoadedSource {
    /// Absolute URL, the base for relative references inside the content
    pub location: String,
    /// What to call the source in errors
    pub display: PathBuf,
    pub content: Vec<u8>,
}

fn file_url(path: &Path) -> io::Result<String> {
    let absolute = std::path::absolute(path)?;
    Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot express {} as a file URL", absolute.display()),
            )
        })
}

fn memory_url(system_id: &str) -> Option<String> {
    if let Ok(url) = Url::parse(system_id) {
        return Some(url.into());
    }
    file_url(Path::new(system_id)).ok()
}
