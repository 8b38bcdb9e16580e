//! Compiling several XSD sources into one grammar.
//!
//! libxml2 compiles one schema document at a time, so N sources are tied together by a
//! small driver schema: no-namespace sources are pulled in with `xs:include`, namespaced
//! ones with `xs:import` (through a generated wrapper when a namespace is split across
//! several sources). Type references across sources then resolve exactly as they would
//! inside a single hand-written schema. The sources themselves are served to libxml2 from
//! memory through a trusted [`ResolutionScope`], so each one is read from disk only once.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::diagnostics::ValidationError;
use crate::error::{LibXml2Result, ValidationFailure};
use crate::hardening::{HardenedParserConfig, ResolutionScope, ResourceRegistry};
use crate::libxml2::{ErrorCollector, LibXml2Wrapper, XmlSchemaPtr};
use crate::source::{LoadedSource, SchemaSource};

/// libxml2's schema parser is not thread-safe
static SCHEMA_PARSE_LOCK: Mutex<()> = Mutex::new(());

const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

/// Locations of generated namespace wrappers
const WRAPPER_PREFIX: &str = "memory:///xml-report-pipeline/";

/// A compiled schema grammar built from one or more sources
#[derive(Debug, Clone)]
pub struct SchemaAggregate {
    schema: XmlSchemaPtr,
    source_count: usize,
    compile_diagnostics: Vec<ValidationError>,
}

impl SchemaAggregate {
    pub(crate) fn schema(&self) -> &XmlSchemaPtr {
        &self.schema
    }

    /// Number of sources compiled into this grammar
    pub fn source_count(&self) -> usize {
        self.source_count
    }

    /// Warnings libxml2 raised while compiling the grammar
    pub fn compile_diagnostics(&self) -> &[ValidationError] {
        &self.compile_diagnostics
    }
}

/// Result of compiling an aggregate
#[derive(Debug)]
pub(crate) enum CompileOutcome {
    Compiled(SchemaAggregate),
    /// Compilation diagnostics, ending with one unlocated error naming the failure
    Failed { diagnostics: Vec<ValidationError> },
}

/// Read every source into memory, in order
///
/// Missing or unreadable schemas surface here, before anything is compiled.
pub(crate) fn load_sources(
    sources: impl IntoIterator<Item = SchemaSource>,
) -> Result<Vec<LoadedSource>, ValidationFailure> {
    sources
        .into_iter()
        .enumerate()
        .map(|(index, source)| {
            source
                .load(index)
                .map_err(|(path, err)| ValidationFailure::from_io(&path, err))
        })
        .collect()
}

/// Compile the loaded sources as one grammar
pub(crate) fn compile(
    wrapper: &LibXml2Wrapper,
    sources: &[LoadedSource],
) -> LibXml2Result<CompileOutcome> {
    let mut registry = ResourceRegistry::new();
    for source in sources {
        if let Err(err) = registry.register(&source.location, &source.content) {
            return Ok(CompileOutcome::Failed {
                diagnostics: vec![ValidationError::unlocated(format!(
                    "Schema {} cannot be compiled: {err}",
                    source.display.display()
                ))],
            });
        }
    }

    let driver = driver_schema(wrapper, sources);
    for (location, content) in &driver.wrappers {
        registry.register(location, content.as_bytes())?;
    }
    debug!(sources = sources.len(), "Compiling schema aggregate");

    let mut collector = ErrorCollector::new();
    let schema = {
        let _guard = SCHEMA_PARSE_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _resolution = ResolutionScope::trusted(Arc::new(registry));
        wrapper.parse_schema_from_memory(driver.document.as_bytes(), &mut collector)?
    };

    Ok(match schema {
        Some(schema) => CompileOutcome::Compiled(SchemaAggregate {
            schema,
            source_count: sources.len(),
            compile_diagnostics: collector.into_diagnostics(),
        }),
        None => {
            let mut diagnostics = collector.into_diagnostics();
            diagnostics.push(ValidationError::unlocated(format!(
                "Failed to compile schema aggregate from {} source(s)",
                sources.len()
            )));
            CompileOutcome::Failed { diagnostics }
        }
    })
}

/// Driver schema plus the per-namespace wrappers it imports
struct Driver {
    document: String,
    /// `(location, content)` of each wrapper, served from memory at compile time
    wrappers: Vec<(String, String)>,
}

/// Build the schema document that includes or imports every source
///
/// libxml2 honours only one `xs:import` per namespace. When several sources share a target
/// namespace they are `xs:include`d by a wrapper schema with that namespace, and the driver
/// imports the wrapper instead.
fn driver_schema(wrapper: &LibXml2Wrapper, sources: &[LoadedSource]) -> Driver {
    let mut seen_locations = HashSet::new();
    let mut includes = Vec::new();
    let mut namespaces: Vec<(String, Vec<&str>)> = Vec::new();

    for source in sources {
        if !seen_locations.insert(source.location.as_str()) {
            debug!(location = %source.location, "Skipping repeated schema source");
            continue;
        }

        match target_namespace(wrapper, source) {
            None => includes.push(source.location.as_str()),
            Some(namespace) => match namespaces.iter_mut().find(|(ns, _)| *ns == namespace) {
                Some((_, locations)) => locations.push(source.location.as_str()),
                None => namespaces.push((namespace, vec![source.location.as_str()])),
            },
        }
    }

    let mut document = String::new();
    document.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(document, "<xs:schema xmlns:xs=\"{XSD_NAMESPACE}\">");
    for location in includes {
        let _ = writeln!(
            document,
            "  <xs:include schemaLocation=\"{}\"/>",
            escape_attribute(location)
        );
    }

    let mut wrappers = Vec::new();
    for (index, (namespace, locations)) in namespaces.iter().enumerate() {
        let namespace = escape_attribute(namespace);
        let location = match locations.as_slice() {
            [single] => single.to_string(),
            _ => {
                let location = format!("{WRAPPER_PREFIX}namespace-{index}.xsd");
                debug!(
                    namespace = %namespace,
                    sources = locations.len(),
                    "Grouping schemas that share a target namespace"
                );
                wrappers.push((location.clone(), namespace_wrapper(&namespace, locations)));
                location
            }
        };
        let _ = writeln!(
            document,
            "  <xs:import namespace=\"{namespace}\" schemaLocation=\"{}\"/>",
            escape_attribute(&location)
        );
    }

    document.push_str("</xs:schema>\n");
    Driver { document, wrappers }
}

/// Schema with `namespace` as its target that includes every one of `locations`
///
/// `namespace` is already escaped.
fn namespace_wrapper(namespace: &str, locations: &[&str]) -> String {
    let mut wrapper = String::new();
    wrapper.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        wrapper,
        "<xs:schema xmlns:xs=\"{XSD_NAMESPACE}\" targetNamespace=\"{namespace}\">"
    );
    for location in locations {
        let _ = writeln!(
            wrapper,
            "  <xs:include schemaLocation=\"{}\"/>",
            escape_attribute(location)
        );
    }
    wrapper.push_str("</xs:schema>\n");
    wrapper
}

/// `targetNamespace` of a schema document, `None` for no-namespace or unparseable schemas
///
/// Unparseable sources are still included so that the compile reports their problems.
fn target_namespace(wrapper: &LibXml2Wrapper, source: &LoadedSource) -> Option<String> {
    let mut collector = ErrorCollector::new();
    let document = wrapper
        .parse_document(
            &source.content,
            &source.location,
            HardenedParserConfig::host_material(),
            &mut collector,
        )
        .ok()
        .flatten()?;

    document
        .root_attribute("targetNamespace")
        .filter(|ns| !ns.is_empty())
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
