//! LibXML2 FFI Wrapper Module
//!
//! This module provides safe wrappers around the libxml2 calls the pipeline needs: parsing
//! documents from memory under a hardened option set, compiling XML Schemas, and validating
//! parsed documents while collecting every structured error libxml2 reports.
//!
//! ## Why direct FFI
//!
//! There is still no mature pure Rust XSD validator. `roxmltree`, `quick-xml` and `xml-rs`
//! parse XML but do not validate against schemas, and the `libxml` crate needs the same
//! system library while hiding the error and entity-loader hooks we rely on. We therefore
//! bind the handful of libxml2 entry points directly and wrap every owned pointer in a RAII
//! type.
//!
//! ## Error collection
//!
//! libxml2 reports problems through callbacks. Every callback installed here appends to an
//! [`ErrorCollector`]; none of them ever aborts parsing or validation, so one pass yields the
//! complete diagnostic list.

use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::ptr;
use std::sync::{Arc, Once};

use libc::{c_char, c_int, c_uchar, c_void};

use tracing::debug;

use crate::diagnostics::{Severity, ValidationError};
use crate::error::{LibXml2Error, LibXml2Result};
use crate::hardening::{
    self, HardenedParserConfig, MAX_ENTITY_DEPTH, MAX_ENTITY_EXPANSION_BYTES,
    MAX_ENTITY_EXPANSIONS, ResolutionScope, Trust,
};

/// Global initialization flag for libxml2
///
/// libxml2's initialization functions are NOT thread-safe, so they run exactly once. The
/// hardened external entity loader is installed in the same critical section, before any
/// document can be parsed.
static LIBXML2_INIT: Once = Once::new();

// Opaque libxml2 structures
#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserInputBuffer {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchema {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaValidCtxt {
    _private: [u8; 0],
}

/// Leading fields of `xmlParserInput`
///
/// Only ever accessed through pointers handed out by libxml2; the trailing fields are never
/// touched from Rust.
#[repr(C)]
pub struct XmlParserInput {
    pub buf: *mut XmlParserInputBuffer,
    pub filename: *const c_char,
}

/// Leading fields of `xmlNode`, stable across libxml2 releases
#[repr(C)]
pub struct XmlNode {
    pub _private: *mut c_void,
    pub node_type: c_int,
    pub name: *const c_uchar,
    pub children: *mut XmlNode,
    pub last: *mut XmlNode,
    pub parent: *mut XmlNode,
    pub next: *mut XmlNode,
    pub prev: *mut XmlNode,
    pub doc: *mut XmlDoc,
    pub ns: *mut XmlNs,
}

/// Leading fields of `xmlNs`
#[repr(C)]
pub struct XmlNs {
    pub next: *mut XmlNs,
    pub ns_type: c_int,
    pub href: *const c_uchar,
    pub prefix: *const c_uchar,
}

/// Leading fields of `xmlEntity`
#[repr(C)]
pub struct XmlEntity {
    pub _private: *mut c_void,
    pub node_type: c_int,
    pub name: *const c_uchar,
    pub children: *mut XmlNode,
    pub last: *mut XmlNode,
    pub parent: *mut c_void,
    pub next: *mut XmlNode,
    pub prev: *mut XmlNode,
    pub doc: *mut XmlDoc,
    pub orig: *mut c_uchar,
    pub content: *mut c_uchar,
    pub length: c_int,
    pub etype: c_int,
}

pub const XML_ELEMENT_NODE: c_int = 1;
pub const XML_ENTITY_REF_NODE: c_int = 5;
pub const XML_INTERNAL_GENERAL_ENTITY: c_int = 1;

#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut c_void,
    pub node: *mut c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut c_void, error: *mut xmlError)>;

pub type XmlExternalEntityLoader = Option<
    unsafe extern "C" fn(
        url: *const c_char,
        id: *const c_char,
        context: *mut XmlParserCtxt,
    ) -> *mut XmlParserInput,
>;

pub type XmlFreeFunc = Option<unsafe extern "C" fn(mem: *mut c_void)>;

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub static xmlFree: XmlFreeFunc;

    pub fn xmlInitParser();
    pub fn xmlInitGlobals();

    // Document parsing
    pub fn xmlReadMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);

    // Tree access
    pub fn xmlDocGetRootElement(doc: *const XmlDoc) -> *mut XmlNode;
    pub fn xmlGetProp(node: *const XmlNode, name: *const c_uchar) -> *mut c_uchar;
    pub fn xmlSetProp(node: *mut XmlNode, name: *const c_uchar, value: *const c_uchar)
    -> *mut c_void;
    pub fn xmlNewChild(
        parent: *mut XmlNode,
        ns: *mut XmlNs,
        name: *const c_uchar,
        content: *const c_uchar,
    ) -> *mut XmlNode;
    pub fn xmlStrdup(cur: *const c_uchar) -> *mut c_uchar;
    pub fn xmlAddPrevSibling(cur: *mut XmlNode, elem: *mut XmlNode) -> *mut XmlNode;
    pub fn xmlUnlinkNode(cur: *mut XmlNode);
    pub fn xmlFreeNode(cur: *mut XmlNode);
    pub fn xmlFreeNodeList(cur: *mut XmlNode);
    pub fn xmlNodeGetContent(cur: *const XmlNode) -> *mut c_uchar;

    // Entities
    pub fn xmlGetDocEntity(doc: *const XmlDoc, name: *const c_uchar) -> *mut XmlEntity;
    pub fn xmlParseInNodeContext(
        node: *mut XmlNode,
        data: *const c_char,
        datalen: c_int,
        options: c_int,
        lst: *mut *mut XmlNode,
    ) -> c_int;

    // Error reporting and entity resolution
    pub fn xmlSetStructuredErrorFunc(ctx: *mut c_void, handler: XmlStructuredErrorFunc);
    pub fn xmlSetExternalEntityLoader(loader: XmlExternalEntityLoader);
    pub fn xmlGetExternalEntityLoader() -> XmlExternalEntityLoader;
    pub fn xmlNewStringInputStream(
        ctxt: *mut XmlParserCtxt,
        buffer: *const c_uchar,
    ) -> *mut XmlParserInput;

    // Schema parsing functions
    pub fn xmlSchemaNewMemParserCtxt(
        buffer: *const c_char,
        size: c_int,
    ) -> *mut XmlSchemaParserCtxt;
    pub fn xmlSchemaSetParserStructuredErrors(
        ctxt: *mut XmlSchemaParserCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaParse(ctxt: *const XmlSchemaParserCtxt) -> *mut XmlSchema;
    pub fn xmlSchemaFreeParserCtxt(ctxt: *mut XmlSchemaParserCtxt);
    pub fn xmlSchemaFree(schema: *mut XmlSchema);

    // Schema validation functions
    pub fn xmlSchemaNewValidCtxt(schema: *const XmlSchema) -> *mut XmlSchemaValidCtxt;
    pub fn xmlSchemaFreeValidCtxt(ctxt: *mut XmlSchemaValidCtxt);
    pub fn xmlSchemaSetValidStructuredErrors(
        ctxt: *mut XmlSchemaValidCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaValidateDoc(ctxt: *mut XmlSchemaValidCtxt, doc: *mut XmlDoc) -> c_int;
}

/// Release memory that libxml2 allocated and handed over to us
///
/// # Safety
///
/// `mem` must have been allocated by libxml2's allocator and not freed yet.
pub(crate) unsafe fn xml_free(mem: *mut c_void) {
    if mem.is_null() {
        return;
    }
    unsafe {
        if let Some(free) = xmlFree {
            free(mem);
        }
    }
}

/// Callback for libxml2 to report errors (structured)
///
/// `user_data` is the `Vec` owned by an [`ErrorCollector`].
unsafe extern "C" fn structured_error_callback(user_data: *mut c_void, error: *mut xmlError) {
    if user_data.is_null() || error.is_null() {
        return;
    }

    let diagnostics = unsafe { &mut *(user_data as *mut Vec<ValidationError>) };
    let error = unsafe { &*error };

    // XML_ERR_NONE
    if error.level == 0 {
        return;
    }

    let message = if error.message.is_null() {
        format!("libxml2 error code {}", error.code)
    } else {
        unsafe { CStr::from_ptr(error.message) }
            .to_string_lossy()
            .trim()
            .to_string()
    };

    diagnostics.push(ValidationError::new(
        Severity::from_level(error.level),
        error.line,
        error.int2,
        message,
    ));
}

/// Ordered accumulator for libxml2's structured errors
///
/// The diagnostics live in a `Box` so the address handed to libxml2 stays valid when the
/// collector itself moves.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    diagnostics: Box<Vec<ValidationError>>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn as_user_data(&mut self) -> *mut c_void {
        &mut *self.diagnostics as *mut Vec<ValidationError> as *mut c_void
    }

    pub fn push(&mut self, diagnostic: ValidationError) {
        self.diagnostics.push(diagnostic);
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Message of the most recent ERROR/FATAL entry
    pub fn last_error_message(&self) -> Option<&str> {
        self.diagnostics
            .iter()
            .rev()
            .find(|d| d.is_error())
            .map(ValidationError::message)
    }

    /// All ERROR/FATAL messages joined, for failures that are reported as a single string
    pub fn summary(&self) -> Option<String> {
        let messages: Vec<&str> = self
            .diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(ValidationError::message)
            .collect();

        if messages.is_empty() {
            None
        } else {
            Some(messages.join("; "))
        }
    }

    pub fn into_diagnostics(self) -> Vec<ValidationError> {
        *self.diagnostics
    }
}

/// Routes libxml2's thread-global structured error handler into a collector
///
/// libxml2 keeps this handler per thread; the previous (default) handler is restored on drop.
pub struct StructuredErrorScope<'a> {
    _collector: PhantomData<&'a mut ErrorCollector>,
}

impl<'a> StructuredErrorScope<'a> {
    pub fn install(collector: &'a mut ErrorCollector) -> Self {
        unsafe {
            xmlSetStructuredErrorFunc(collector.as_user_data(), Some(structured_error_callback));
        }
        Self {
            _collector: PhantomData,
        }
    }
}

impl Drop for StructuredErrorScope<'_> {
    fn drop(&mut self) {
        unsafe {
            xmlSetStructuredErrorFunc(ptr::null_mut(), None);
        }
    }
}

/// Owned libxml2 document, freed on drop
#[derive(Debug)]
pub struct XmlDocument {
    ptr: *mut XmlDoc,
}

impl XmlDocument {
    /// # Safety
    ///
    /// `ptr` must be null or a document allocated by libxml2 that nothing else frees.
    pub(crate) unsafe fn from_raw(ptr: *mut XmlDoc) -> Option<Self> {
        if ptr.is_null() {
            None
        } else {
            Some(Self { ptr })
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut XmlDoc {
        self.ptr
    }

    /// Hand ownership back to libxml2 (e.g. to a compiled style-sheet)
    pub(crate) fn into_raw(self) -> *mut XmlDoc {
        let ptr = self.ptr;
        std::mem::forget(self);
        ptr
    }

    pub(crate) fn root_element(&self) -> *mut XmlNode {
        unsafe { xmlDocGetRootElement(self.ptr) }
    }

    /// Attribute value on the root element, if both exist
    pub fn root_attribute(&self, name: &str) -> Option<String> {
        let root = self.root_element();
        if root.is_null() {
            return None;
        }
        let c_name = CString::new(name).ok()?;

        unsafe {
            let value = xmlGetProp(root, c_name.as_ptr() as *const c_uchar);
            if value.is_null() {
                return None;
            }
            let owned = CStr::from_ptr(value as *const c_char)
                .to_string_lossy()
                .into_owned();
            xml_free(value as *mut c_void);
            Some(owned)
        }
    }

    /// Local name of the root element
    pub fn root_name(&self) -> Option<String> {
        let root = self.root_element();
        if root.is_null() {
            return None;
        }
        unsafe { node_name(root) }
    }
}

impl Drop for XmlDocument {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                xmlFreeDoc(self.ptr);
            }
            self.ptr = ptr::null_mut();
        }
    }
}

/// # Safety
///
/// `node` must point to a live libxml2 node.
pub(crate) unsafe fn node_name(node: *const XmlNode) -> Option<String> {
    let name = unsafe { (*node).name };
    if name.is_null() {
        return None;
    }
    Some(
        unsafe { CStr::from_ptr(name as *const c_char) }
            .to_string_lossy()
            .into_owned(),
    )
}

/// # Safety
///
/// `node` must point to a live libxml2 node.
pub(crate) unsafe fn node_namespace(node: *const XmlNode) -> Option<String> {
    let ns = unsafe { (*node).ns };
    if ns.is_null() {
        return None;
    }
    let href = unsafe { (*ns).href };
    if href.is_null() {
        return None;
    }
    Some(
        unsafe { CStr::from_ptr(href as *const c_char) }
            .to_string_lossy()
            .into_owned(),
    )
}

/// Replaces entity reference nodes with parsed copies of their replacement text
///
/// Documents are parsed without `XML_PARSE_NOENT`, which leaves `XML_ENTITY_REF_NODE`s in
/// the tree. Schema validation refuses such trees and XSLT sees them as empty, so they are
/// expanded here instead, one reference at a time and within fixed bounds.
struct EntityExpansion {
    options: c_int,
    expansions: usize,
    bytes: usize,
}

impl EntityExpansion {
    /// Expand every reference among the siblings from `first` up to (excluding) `stop`
    ///
    /// # Safety
    ///
    /// `parent` must be a live element and `first`..`stop` a run of its children.
    unsafe fn substitute_range(
        &mut self,
        parent: *mut XmlNode,
        first: *mut XmlNode,
        stop: *mut XmlNode,
        depth: usize,
    ) -> Result<(), &'static str> {
        let mut cur = first;
        while !cur.is_null() && cur != stop {
            match unsafe { (*cur).node_type } {
                XML_ENTITY_REF_NODE => {
                    if depth >= MAX_ENTITY_DEPTH {
                        return Err("entity references are nested too deeply");
                    }
                    let before = unsafe { (*cur).prev };
                    unsafe { self.expand_before(parent, cur)? };
                    let next = unsafe { (*cur).next };
                    unsafe {
                        xmlUnlinkNode(cur);
                        xmlFreeNode(cur);
                    }

                    let inserted = if before.is_null() {
                        unsafe { (*parent).children }
                    } else {
                        unsafe { (*before).next }
                    };
                    unsafe { self.substitute_range(parent, inserted, next, depth + 1)? };
                    cur = next;
                }
                XML_ELEMENT_NODE => {
                    unsafe { self.substitute_range(cur, (*cur).children, ptr::null_mut(), depth)? };
                    cur = unsafe { (*cur).next };
                }
                _ => cur = unsafe { (*cur).next },
            }
        }
        Ok(())
    }

    /// Insert the content of `reference`'s entity in front of it
    ///
    /// External and undeclared entities contribute nothing.
    unsafe fn expand_before(
        &mut self,
        parent: *mut XmlNode,
        reference: *mut XmlNode,
    ) -> Result<(), &'static str> {
        let entity = unsafe { xmlGetDocEntity((*reference).doc, (*reference).name) };
        if entity.is_null() {
            return Ok(());
        }
        let (etype, content, length) =
            unsafe { ((*entity).etype, (*entity).content, (*entity).length) };
        if etype != XML_INTERNAL_GENERAL_ENTITY || content.is_null() || length <= 0 {
            return Ok(());
        }

        self.expansions += 1;
        self.bytes += length as usize;
        if self.expansions > MAX_ENTITY_EXPANSIONS {
            return Err("too many entity references were expanded");
        }
        if self.bytes > MAX_ENTITY_EXPANSION_BYTES {
            return Err("expanded entity content is too large");
        }

        let mut list: *mut XmlNode = ptr::null_mut();
        let code = unsafe {
            xmlParseInNodeContext(
                parent,
                content as *const c_char,
                length,
                self.options,
                &mut list,
            )
        };
        if code != 0 {
            if !list.is_null() {
                unsafe { xmlFreeNodeList(list) };
            }
            return Ok(());
        }

        let mut node = list;
        while !node.is_null() {
            unsafe {
                let next = (*node).next;
                xmlUnlinkNode(node);
                xmlAddPrevSibling(reference, node);
                node = next;
            }
        }
        Ok(())
    }
}

/// Thread-safe wrapper for libxml2 schema pointer with proper resource management
///
/// Compiled schemas are read-only during validation, so one aggregate can be shared across
/// threads (this is what the opt-in artifact cache does).
#[derive(Debug)]
pub struct XmlSchemaPtr {
    inner: Arc<XmlSchemaInner>,
}

#[derive(Debug)]
struct XmlSchemaInner {
    ptr: *mut XmlSchema,
    _phantom: PhantomData<XmlSchema>,
}

// Safety: libxml2 documentation states that xmlSchema structures are thread-safe for reading
// See: http://xmlsoft.org/threads.html
unsafe impl Send for XmlSchemaInner {}
unsafe impl Sync for XmlSchemaInner {}

impl XmlSchemaPtr {
    /// Create a new XmlSchemaPtr from a raw pointer
    ///
    /// # Safety
    ///
    /// The pointer must come from `xmlSchemaParse` and must not be freed by anyone else.
    pub(crate) unsafe fn from_raw(ptr: *mut XmlSchema) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }

        Some(XmlSchemaPtr {
            inner: Arc::new(XmlSchemaInner {
                ptr,
                _phantom: PhantomData,
            }),
        })
    }

    pub(crate) fn as_ptr(&self) -> *const XmlSchema {
        self.inner.ptr
    }
}

impl Clone for XmlSchemaPtr {
    fn clone(&self) -> Self {
        XmlSchemaPtr {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for XmlSchemaInner {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                xmlSchemaFree(self.ptr);
            }
            self.ptr = ptr::null_mut();
        }
    }
}

/// Outcome of `xmlSchemaValidateDoc`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    /// Validation succeeded (return code 0)
    Valid,
    /// Validation failed with errors (return code > 0)
    Invalid { error_count: i32 },
    /// Internal error occurred (return code < 0)
    InternalError { code: i32 },
}

impl ValidationResult {
    pub fn from_code(code: c_int) -> Self {
        match code {
            0 => ValidationResult::Valid,
            n if n > 0 => ValidationResult::Invalid { error_count: n },
            n => ValidationResult::InternalError { code: n },
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ValidationResult::InternalError { .. })
    }
}

/// Safe access to the libxml2 functionality used by both services
#[derive(Debug)]
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    /// Initialize libxml2 (once per process) and install the hardened entity loader
    pub fn new() -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
            xmlInitGlobals();
            hardening::install_entity_loader();
        });

        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    /// Parse a document held in memory
    ///
    /// `url` becomes the document's base URI. Untrusted input is parsed with every external
    /// reference denied, whatever resolution scope the caller is in. Parser diagnostics are
    /// appended to `collector`; `Ok(None)` means the document is not well-formed.
    pub fn parse_document(
        &self,
        content: &[u8],
        url: &str,
        config: HardenedParserConfig,
        collector: &mut ErrorCollector,
    ) -> LibXml2Result<Option<XmlDocument>> {
        let size = c_int::try_from(content.len()).map_err(|_| LibXml2Error::InputTooLarge {
            size: content.len(),
        })?;
        let c_url = CString::new(url).map_err(|_| LibXml2Error::InteriorNul {
            what: url.to_string(),
        })?;

        let _resolution = match config.trust() {
            Trust::Untrusted => Some(ResolutionScope::deny()),
            Trust::HostMaterial => None,
        };
        let _errors = StructuredErrorScope::install(collector);

        let doc = unsafe {
            xmlReadMemory(
                content.as_ptr() as *const c_char,
                size,
                c_url.as_ptr(),
                ptr::null(),
                config.parser_options(),
            )
        };

        Ok(unsafe { XmlDocument::from_raw(doc) })
    }

    /// Compile an XML schema held in memory
    ///
    /// **IMPORTANT**: Schema parsing is NOT thread-safe in libxml2; callers serialize it.
    /// Compilation problems are appended to `collector`; `Ok(None)` means no usable schema
    /// came out of them.
    pub fn parse_schema_from_memory(
        &self,
        schema_data: &[u8],
        collector: &mut ErrorCollector,
    ) -> LibXml2Result<Option<XmlSchemaPtr>> {
        let size = c_int::try_from(schema_data.len()).map_err(|_| LibXml2Error::InputTooLarge {
            size: schema_data.len(),
        })?;

        unsafe {
            let parser_ctxt = xmlSchemaNewMemParserCtxt(schema_data.as_ptr() as *const c_char, size);
            if parser_ctxt.is_null() {
                return Err(LibXml2Error::ParserContextCreationFailed);
            }

            xmlSchemaSetParserStructuredErrors(
                parser_ctxt,
                Some(structured_error_callback),
                collector.as_user_data(),
            );

            // Documents pulled in by xs:include/xs:import use their own parser contexts,
            // which report through the thread-global handler.
            let schema_ptr = {
                let _errors = StructuredErrorScope::install(collector);
                xmlSchemaParse(parser_ctxt)
            };

            // Always free the parser context
            xmlSchemaFreeParserCtxt(parser_ctxt);

            Ok(XmlSchemaPtr::from_raw(schema_ptr))
        }
    }

    /// Substitute entity references in a parsed untrusted document
    ///
    /// Internal general entities are replaced by their content; external ones stay empty, as
    /// the entity loader denies them anyway. Returns `false`, with an error appended to
    /// `collector`, when the expansion hits one of the hardening bounds.
    pub fn substitute_entities(
        &self,
        document: &XmlDocument,
        collector: &mut ErrorCollector,
    ) -> bool {
        let root = document.root_element();
        if root.is_null() {
            return true;
        }

        let mut expansion = EntityExpansion {
            options: HardenedParserConfig::untrusted().parser_options(),
            expansions: 0,
            bytes: 0,
        };
        let outcome = {
            let _resolution = ResolutionScope::deny();
            let _errors = StructuredErrorScope::install(collector);
            unsafe { expansion.substitute_range(root, (*root).children, ptr::null_mut(), 0) }
        };

        match outcome {
            Ok(()) => {
                if expansion.expansions > 0 {
                    debug!(
                        expansions = expansion.expansions,
                        bytes = expansion.bytes,
                        "Substituted entity references"
                    );
                }
                true
            }
            Err(reason) => {
                collector.push(ValidationError::unlocated(format!(
                    "Entity expansion aborted: {reason}"
                )));
                false
            }
        }
    }

    /// Validate a parsed document against a compiled schema
    ///
    /// This method is thread-safe: each call creates its own validation context.
    pub fn validate_document(
        &self,
        schema: &XmlSchemaPtr,
        document: &XmlDocument,
        collector: &mut ErrorCollector,
    ) -> LibXml2Result<ValidationResult> {
        unsafe {
            let valid_ctxt = xmlSchemaNewValidCtxt(schema.as_ptr());
            if valid_ctxt.is_null() {
                return Err(LibXml2Error::ValidationContextCreationFailed);
            }

            xmlSchemaSetValidStructuredErrors(
                valid_ctxt,
                Some(structured_error_callback),
                collector.as_user_data(),
            );

            let result_code = {
                let _resolution = ResolutionScope::deny();
                xmlSchemaValidateDoc(valid_ctxt, document.as_ptr())
            };

            // Always free the validation context
            xmlSchemaFreeValidCtxt(valid_ctxt);

            Ok(ValidationResult::from_code(result_code))
        }
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}
