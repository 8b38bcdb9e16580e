//! XSLT conversion service
//!
//! Every binding (file, writer, string) funnels into [`ConversionService::transform`], which
//! produces the serialized output as bytes. Output is only written once the whole
//! transformation has succeeded, so a failed conversion never leaves a partial file behind.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::cache::{ArtifactCache, content_key};
use crate::error::{ConversionError, LibXml2Error};
use crate::hardening::{HardenedParserConfig, ResolutionScope, ResourceRegistry};
use crate::libxml2::ErrorCollector;
use crate::libxslt::{StylesheetPtr, XsltParams, XsltWrapper};
use crate::source::{DocumentSource, LoadedSource, StylesheetSource, XmlSource};

/// A value handed to a top-level `xsl:param`
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Passed as a quoted XPath string literal
    String(String),
    Number(f64),
    Boolean(bool),
    /// Raw XPath expression, evaluated by libxslt
    Expression(String),
}

impl ParamValue {
    /// The XPath expression libxslt evaluates for this value
    pub fn to_xpath(&self) -> String {
        match self {
            ParamValue::String(value) => xpath_literal(value),
            ParamValue::Number(n) if n.is_nan() => "number('NaN')".to_string(),
            ParamValue::Number(n) if n.is_infinite() => {
                if n.is_sign_positive() {
                    "1 div 0".to_string()
                } else {
                    "-1 div 0".to_string()
                }
            }
            ParamValue::Number(n) => n.to_string(),
            ParamValue::Boolean(true) => "true()".to_string(),
            ParamValue::Boolean(false) => "false()".to_string(),
            ParamValue::Expression(expression) => expression.clone(),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::String(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Number(value as f64)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Boolean(value)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xpath())
    }
}

/// Quote `value` as an XPath 1.0 string literal
///
/// XPath 1.0 has no escape sequences, so a value containing both quote characters is
/// assembled with `concat()`.
fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    if !value.contains('"') {
        return format!("\"{value}\"");
    }

    let parts: Vec<String> = value.split('\'').map(|part| format!("'{part}'")).collect();
    format!("concat({})", parts.join(", \"'\", "))
}

/// Named transformation parameters, ordered by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    values: BTreeMap<String, ParamValue>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Parse a `name=value` command line assignment; the value is passed as a string
    pub fn parse_assignment(assignment: &str) -> Result<(String, ParamValue), ConversionError> {
        let Some((name, value)) = assignment.split_once('=') else {
            return Err(ConversionError::InvalidParameter {
                name: assignment.to_string(),
                reason: "expected name=value".to_string(),
            });
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(ConversionError::InvalidParameter {
                name: assignment.to_string(),
                reason: "parameter name is empty".to_string(),
            });
        }
        Ok((name.to_string(), ParamValue::from(value)))
    }

    fn to_xslt_params(&self) -> Result<XsltParams, ConversionError> {
        let mut expressions = Vec::with_capacity(self.values.len());
        for (name, value) in &self.values {
            if name.is_empty() {
                return Err(ConversionError::InvalidParameter {
                    name: name.clone(),
                    reason: "parameter name is empty".to_string(),
                });
            }
            if name.contains('\0') {
                return Err(ConversionError::InvalidParameter {
                    name: name.clone(),
                    reason: "name contains a NUL byte".to_string(),
                });
            }
            let expression = value.to_xpath();
            if expression.trim().is_empty() {
                return Err(ConversionError::InvalidParameter {
                    name: name.clone(),
                    reason: "expression is empty".to_string(),
                });
            }
            expressions.push((name.as_str(), expression));
        }

        XsltParams::new(expressions.iter().map(|(n, e)| (*n, e.as_str()))).map_err(|err| {
            match err {
                LibXml2Error::InteriorNul { what } => ConversionError::InvalidParameter {
                    name: what,
                    reason: "value contains a NUL byte".to_string(),
                },
                other => other.into(),
            }
        })
    }
}

impl<K, V> FromIterator<(K, V)> for Parameters
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Why a cached style-sheet compile produced nothing
#[derive(Debug, Clone)]
enum StylesheetMiss {
    Rejected(String),
    Unavailable(LibXml2Error),
}

impl From<StylesheetMiss> for ConversionError {
    fn from(miss: StylesheetMiss) -> Self {
        match miss {
            StylesheetMiss::Rejected(details) => ConversionError::Stylesheet { details },
            StylesheetMiss::Unavailable(err) => err.into(),
        }
    }
}

/// Applies XSLT style-sheets to report documents
#[derive(Debug)]
pub struct ConversionService {
    xslt: XsltWrapper,
    cache: Option<Arc<ArtifactCache>>,
}

impl ConversionService {
    pub fn new() -> Self {
        Self {
            xslt: XsltWrapper::new(),
            cache: None,
        }
    }

    pub fn with_cache(cache: Arc<ArtifactCache>) -> Self {
        Self {
            xslt: XsltWrapper::new(),
            cache: Some(cache),
        }
    }

    pub fn cache(&self) -> Option<&Arc<ArtifactCache>> {
        self.cache.as_ref()
    }

    /// Transform `input` and write the result to the file at `output`
    ///
    /// The file is created (or truncated) only after the transformation succeeded.
    pub fn convert(
        &self,
        stylesheet: StylesheetSource,
        input: DocumentSource,
        output: &Path,
        params: Option<&Parameters>,
    ) -> Result<(), ConversionError> {
        let bytes = self.transform(stylesheet, input, params)?;
        fs::write(output, &bytes).map_err(|source| ConversionError::Io {
            path: output.to_path_buf(),
            source,
        })?;
        debug!(output = %output.display(), bytes = bytes.len(), "Wrote conversion output");
        Ok(())
    }

    pub fn convert_to_writer<W>(
        &self,
        stylesheet: StylesheetSource,
        input: DocumentSource,
        writer: &mut W,
        params: Option<&Parameters>,
    ) -> Result<(), ConversionError>
    where
        W: Write + ?Sized,
    {
        let bytes = self.transform(stylesheet, input, params)?;
        writer
            .write_all(&bytes)
            .and_then(|()| writer.flush())
            .map_err(|source| ConversionError::Io {
                path: PathBuf::from("<writer>"),
                source,
            })
    }

    /// Transform into memory and decode the output as UTF-8
    ///
    /// Invalid UTF-8 (from a style-sheet declaring another output encoding) is replaced,
    /// never rejected.
    pub fn convert_to_string(
        &self,
        stylesheet: StylesheetSource,
        input: DocumentSource,
        params: Option<&Parameters>,
    ) -> Result<String, ConversionError> {
        let bytes = self.transform(stylesheet, input, params)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn convert_files(
        &self,
        xsl: &Path,
        input: &Path,
        output: &Path,
        params: Option<&Parameters>,
    ) -> Result<(), ConversionError> {
        self.convert(XmlSource::file(xsl), XmlSource::file(input), output, params)
    }

    /// Run the whole conversion and return the serialized output
    pub fn transform(
        &self,
        stylesheet: StylesheetSource,
        input: DocumentSource,
        params: Option<&Parameters>,
    ) -> Result<Vec<u8>, ConversionError> {
        let start = Instant::now();
        let stylesheet = stylesheet
            .load(0)
            .map_err(|(path, err)| ConversionError::from_io(&path, err))?;
        let input = input
            .load(1)
            .map_err(|(path, err)| ConversionError::from_io(&path, err))?;

        let compiled = self.stylesheet(&stylesheet)?;

        let mut collector = ErrorCollector::new();
        let document = self
            .xslt
            .libxml2()
            .parse_document(
                &input.content,
                &input.location,
                HardenedParserConfig::untrusted(),
                &mut collector,
            )?
            .ok_or_else(|| ConversionError::InputParse {
                details: collector
                    .summary()
                    .unwrap_or_else(|| format!("{} is not well-formed", input.display.display())),
            })?;

        if !self
            .xslt
            .libxml2()
            .substitute_entities(&document, &mut collector)
        {
            return Err(ConversionError::InputParse {
                details: collector.summary().unwrap_or_else(|| {
                    format!("entities in {} could not be expanded", input.display.display())
                }),
            });
        }

        let params = match params {
            Some(params) if !params.is_empty() => params.to_xslt_params()?,
            _ => XsltParams::empty(),
        };

        let mut collector = ErrorCollector::new();
        let result = self
            .xslt
            .transform(&compiled, &document, &params, &mut collector)?
            .ok_or_else(|| ConversionError::Transform {
                details: collector.summary().unwrap_or_else(|| {
                    format!(
                        "applying {} to {} failed",
                        stylesheet.display.display(),
                        input.display.display()
                    )
                }),
            })?;

        let bytes = self
            .xslt
            .serialize(&compiled, &result)
            .ok_or_else(|| ConversionError::Transform {
                details: "the result tree could not be serialized".to_string(),
            })?;

        info!(
            stylesheet = %stylesheet.display.display(),
            input = %input.display.display(),
            params = params.len(),
            bytes = bytes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Conversion finished"
        );
        Ok(bytes)
    }

    fn stylesheet(&self, source: &LoadedSource) -> Result<StylesheetPtr, ConversionError> {
        let compile = || self.compile_stylesheet(source);
        let compiled = match &self.cache {
            Some(cache) => {
                let key = content_key(
                    "stylesheet",
                    [(source.location.as_str(), source.content.as_slice())],
                );
                cache.stylesheet_or_compile(key, compile)
            }
            None => compile(),
        };
        Ok(compiled?)
    }

    fn compile_stylesheet(&self, source: &LoadedSource) -> Result<StylesheetPtr, StylesheetMiss> {
        debug!(stylesheet = %source.display.display(), "Compiling style-sheet");

        // xsl:include and xsl:import resolve relative to the style-sheet's own location
        let _resolution = ResolutionScope::trusted(Arc::new(ResourceRegistry::new()));
        let mut collector = ErrorCollector::new();

        let document = self
            .xslt
            .libxml2()
            .parse_document(
                &source.content,
                &source.location,
                HardenedParserConfig::host_material(),
                &mut collector,
            )
            .map_err(StylesheetMiss::Unavailable)?
            .ok_or_else(|| {
                StylesheetMiss::Rejected(collector.summary().unwrap_or_else(|| {
                    format!("{} is not well-formed", source.display.display())
                }))
            })?;

        self.xslt.force_indent(&document);

        self.xslt.compile(document, &mut collector).ok_or_else(|| {
            StylesheetMiss::Rejected(collector.summary().unwrap_or_else(|| {
                format!("libxslt rejected {}", source.display.display())
            }))
        })
    }
}

impl Default for ConversionService {
    fn default() -> Self {
        Self::new()
    }
}
