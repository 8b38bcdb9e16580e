//! Hardened document loading.
//!
//! Every document the pipeline parses goes through one of two parser configurations:
//!
//! - [`HardenedParserConfig::untrusted`] for report documents handed in by callers. Entity
//!   substitution and DTD loading stay off, network access is disabled and every external
//!   reference is answered with an empty input by the process-wide entity loader. Internal
//!   entities are expanded afterwards on the parsed tree, within [`MAX_ENTITY_DEPTH`],
//!   [`MAX_ENTITY_EXPANSIONS`] and [`MAX_ENTITY_EXPANSION_BYTES`].
//! - [`HardenedParserConfig::host_material`] for schemas and style-sheets that ship with the
//!   host. These may pull in further host material through `xs:include`, `xs:import`,
//!   `xsl:include` and `xsl:import`, but only inside a [`ResolutionScope::trusted`] guard.
//!
//! libxml2 has a single global entity loader, so the loader installed here consults a
//! thread-local policy. The policy is `Deny` unless a scope on the current thread says
//! otherwise, and scopes always restore what they replaced.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::path::Path;
use std::ptr;
use std::sync::{Arc, OnceLock};

use libc::{c_char, c_int, c_uchar};
use tracing::{debug, trace};
use url::Url;

use crate::error::{LibXml2Error, LibXml2Result};
use crate::libxml2::{
    XmlExternalEntityLoader, XmlParserCtxt, XmlParserInput, xmlGetExternalEntityLoader,
    xmlNewStringInputStream, xmlSetExternalEntityLoader, xmlStrdup,
};

// xmlParserOption bits
pub const XML_PARSE_NOENT: c_int = 1 << 1;
pub const XML_PARSE_DTDLOAD: c_int = 1 << 2;
pub const XML_PARSE_DTDATTR: c_int = 1 << 3;
pub const XML_PARSE_DTDVALID: c_int = 1 << 4;
pub const XML_PARSE_NONET: c_int = 1 << 11;
pub const XML_PARSE_NOCDATA: c_int = 1 << 14;
pub const XML_PARSE_BIG_LINES: c_int = 1 << 22;
pub const XML_PARSE_NO_XXE: c_int = 1 << 23;

/// Options that would let a document expand entities or fetch a DTD
pub const FORBIDDEN_OPTIONS: c_int =
    XML_PARSE_NOENT | XML_PARSE_DTDLOAD | XML_PARSE_DTDATTR | XML_PARSE_DTDVALID;

// Bounds for substituting internal entities into a parsed untrusted tree
pub const MAX_ENTITY_DEPTH: usize = 40;
pub const MAX_ENTITY_EXPANSIONS: usize = 100_000;
pub const MAX_ENTITY_EXPANSION_BYTES: usize = 10 * 1024 * 1024;

static DEFAULT_LOADER: OnceLock<XmlExternalEntityLoader> = OnceLock::new();

thread_local! {
    static RESOLUTION: RefCell<Resolution> = const { RefCell::new(Resolution::Deny) };
}

/// Where a document comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trust {
    /// Caller supplied report data
    Untrusted,
    /// Schemas and style-sheets shipped with the host
    HostMaterial,
}

/// Parser settings applied to every document load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardenedParserConfig {
    trust: Trust,
}

impl HardenedParserConfig {
    pub const fn untrusted() -> Self {
        Self {
            trust: Trust::Untrusted,
        }
    }

    pub const fn host_material() -> Self {
        Self {
            trust: Trust::HostMaterial,
        }
    }

    pub fn trust(&self) -> Trust {
        self.trust
    }

    /// `xmlParserOption` flags for `xmlReadMemory`
    ///
    /// Never contains any bit of [`FORBIDDEN_OPTIONS`].
    pub fn parser_options(&self) -> c_int {
        let base = XML_PARSE_NONET | XML_PARSE_BIG_LINES;
        match self.trust {
            Trust::Untrusted => base | XML_PARSE_NO_XXE,
            // libxslt expects CDATA sections merged into text nodes
            Trust::HostMaterial => base | XML_PARSE_NOCDATA,
        }
    }
}

impl Default for HardenedParserConfig {
    fn default() -> Self {
        Self::untrusted()
    }
}

/// In-memory host material served to libxml2 by location
///
/// Locations are compared as normalized URLs, so `file:///a/b.xsd` and `/a/b.xsd` name the
/// same entry.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: HashMap<String, CString>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, location: &str, content: &[u8]) -> LibXml2Result<()> {
        let content = CString::new(content).map_err(|_| LibXml2Error::InteriorNul {
            what: location.to_string(),
        })?;
        self.entries.insert(normalize_location(location), content);
        Ok(())
    }

    pub fn contains(&self, location: &str) -> bool {
        self.entries.contains_key(&normalize_location(location))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, location: &str) -> Option<&CStr> {
        self.entries
            .get(&normalize_location(location))
            .map(CString::as_c_str)
    }
}

/// Canonical form of a location as libxml2 reports it to the entity loader
pub(crate) fn normalize_location(location: &str) -> String {
    if let Ok(url) = Url::parse(location) {
        return url.to_string();
    }

    let path = Path::new(location);
    if path.is_absolute()
        && let Ok(url) = Url::from_file_path(path)
    {
        return url.to_string();
    }

    location.to_string()
}

#[derive(Debug, Clone, Default)]
enum Resolution {
    #[default]
    Deny,
    Trusted(Arc<ResourceRegistry>),
}

/// Switches external resolution on the current thread until dropped
///
/// Scopes nest: dropping one restores whatever policy was active when it was created.
#[must_use = "the policy is reverted as soon as the scope is dropped"]
pub struct ResolutionScope {
    previous: Option<Resolution>,
    // Bound to the thread whose policy it changed
    _not_send: PhantomData<*const ()>,
}

impl ResolutionScope {
    /// Answer every external reference with an empty input
    pub fn deny() -> Self {
        Self::enter(Resolution::Deny)
    }

    /// Serve `registry` first, then fall back to libxml2's default loader
    pub fn trusted(registry: Arc<ResourceRegistry>) -> Self {
        Self::enter(Resolution::Trusted(registry))
    }

    fn enter(policy: Resolution) -> Self {
        let previous = RESOLUTION
            .try_with(|current| current.replace(policy))
            .ok();
        Self {
            previous,
            _not_send: PhantomData,
        }
    }

    /// Whether external references on this thread are currently denied
    pub fn is_denying() -> bool {
        RESOLUTION
            .try_with(|current| matches!(*current.borrow(), Resolution::Deny))
            .unwrap_or(true)
    }
}

impl Drop for ResolutionScope {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            let _ = RESOLUTION.try_with(|current| current.replace(previous));
        }
    }
}

/// Install the hardened loader as libxml2's global external entity loader
///
/// Idempotent. Called from `LibXml2Wrapper::new` before any parsing happens.
pub(crate) fn install_entity_loader() {
    DEFAULT_LOADER.get_or_init(|| unsafe {
        let default = xmlGetExternalEntityLoader();
        xmlSetExternalEntityLoader(Some(hardened_entity_loader));
        debug!("Installed hardened external entity loader");
        default
    });
}

unsafe extern "C" fn hardened_entity_loader(
    url: *const c_char,
    id: *const c_char,
    context: *mut XmlParserCtxt,
) -> *mut XmlParserInput {
    let policy = RESOLUTION
        .try_with(|current| current.borrow().clone())
        .unwrap_or_default();

    let location = if url.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(url) }.to_string_lossy().into_owned())
    };

    match policy {
        Resolution::Deny => {
            debug!(
                location = location.as_deref().unwrap_or("<none>"),
                "Denied external resource"
            );
            unsafe { empty_input(context) }
        }
        Resolution::Trusted(registry) => {
            if let Some(location) = location.as_deref()
                && let Some(content) = registry.lookup(location)
            {
                trace!(location, "Serving registered resource");
                return unsafe { registered_input(context, content, location) };
            }

            match DEFAULT_LOADER.get().copied().flatten() {
                Some(default) => unsafe { default(url, id, context) },
                None => ptr::null_mut(),
            }
        }
    }
}

unsafe fn empty_input(context: *mut XmlParserCtxt) -> *mut XmlParserInput {
    unsafe { xmlNewStringInputStream(context, c"".as_ptr() as *const c_uchar) }
}

unsafe fn registered_input(
    context: *mut XmlParserCtxt,
    content: &CStr,
    location: &str,
) -> *mut XmlParserInput {
    let input = unsafe { xmlNewStringInputStream(context, content.as_ptr() as *const c_uchar) };
    if input.is_null() {
        return input;
    }

    // Relative references inside the served document resolve against its own location
    if let Ok(c_location) = CString::new(location) {
        unsafe {
            (*input).filename = xmlStrdup(c_location.as_ptr() as *const c_uchar) as *const c_char;
        }
    }
    input
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_options_never_expand_entities() {
        for config in [
            HardenedParserConfig::untrusted(),
            HardenedParserConfig::host_material(),
        ] {
            let options = config.parser_options();
            assert_eq!(options & FORBIDDEN_OPTIONS, 0, "{config:?}");
            assert_ne!(options & XML_PARSE_NONET, 0, "{config:?}");
        }

        assert_ne!(
            HardenedParserConfig::untrusted().parser_options() & XML_PARSE_NO_XXE,
            0
        );
    }

    #[test]
    fn test_default_config_is_untrusted() {
        assert_eq!(HardenedParserConfig::default().trust(), Trust::Untrusted);
    }

    #[test]
    fn test_scopes_nest_and_restore() {
        assert!(ResolutionScope::is_denying());
        {
            let _outer = ResolutionScope::trusted(Arc::new(ResourceRegistry::new()));
            assert!(!ResolutionScope::is_denying());
            {
                let _inner = ResolutionScope::deny();
                assert!(ResolutionScope::is_denying());
            }
            assert!(!ResolutionScope::is_denying());
        }
        assert!(ResolutionScope::is_denying());
    }

    #[test]
    fn test_scopes_are_per_thread() {
        let _trusted = ResolutionScope::trusted(Arc::new(ResourceRegistry::new()));
        let other = std::thread::spawn(ResolutionScope::is_denying).join().unwrap();
        assert!(other);
        assert!(!ResolutionScope::is_denying());
    }

    #[test]
    fn test_registry_normalizes_locations() {
        let mut registry = ResourceRegistry::new();
        registry
            .register("file:///schemas/junit.xsd", b"<xs:schema/>")
            .unwrap();

        assert!(registry.contains("/schemas/junit.xsd"));
        assert!(registry.contains("file:///schemas/junit.xsd"));
        assert!(!registry.contains("/schemas/other.xsd"));
        assert_eq!(
            registry.lookup("/schemas/junit.xsd").unwrap().to_bytes(),
            b"<xs:schema/>"
        );
    }

    #[test]
    fn test_registry_rejects_interior_nul() {
        let mut registry = ResourceRegistry::new();
        let err = registry
            .register("memory:///broken.xsd", b"<a>\0</a>")
            .unwrap_err();
        assert!(matches!(err, LibXml2Error::InteriorNul { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_normalize_location_keeps_unparseable_input() {
        assert_eq!(normalize_location("relative.xsd"), "relative.xsd");
        assert_eq!(
            normalize_location("memory:///schema-0.xsd"),
            "memory:///schema-0.xsd"
        );
    }
}
