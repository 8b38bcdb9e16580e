//! libxslt FFI wrapper
//!
//! Same approach as [`crate::libxml2`]: a few direct bindings, RAII types around every owned
//! pointer, and one-time process initialization. Style-sheets are compiled from documents
//! already parsed by libxml2, applied through an explicit transformation context so the
//! hardened parser options and security preferences are set per run, and serialized with
//! the style-sheet's own `xsl:output` settings.
//!
//! libxslt reports its own errors through variadic callbacks that cannot be defined in
//! stable Rust, so only the libxml2 parser diagnostics raised during compilation and
//! transformation are captured. Failures are still detected reliably from return values.

use std::ffi::CString;
use std::marker::PhantomData;
use std::ptr;
use std::sync::{Arc, Once, OnceLock};

use libc::{c_char, c_int, c_uchar, c_void};
use tracing::{debug, warn};

use crate::error::{LibXml2Error, LibXml2Result};
use crate::hardening::{HardenedParserConfig, ResolutionScope};
use crate::libxml2::{
    ErrorCollector, LibXml2Wrapper, StructuredErrorScope, XML_ELEMENT_NODE, XmlDoc, XmlDocument,
    XmlNode, node_name, node_namespace, xml_free, xmlNewChild, xmlSetProp,
};

/// Namespace of XSLT instructions
pub const XSLT_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";

static LIBXSLT_INIT: Once = Once::new();
static SECURITY_PREFS: OnceLock<SecurityPrefs> = OnceLock::new();

#[repr(C)]
pub struct XsltStylesheet {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XsltTransformContext {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XsltSecurityPrefs {
    _private: [u8; 0],
}

// xsltSecurityOption
const XSLT_SECPREF_WRITE_FILE: c_int = 2;
const XSLT_SECPREF_CREATE_DIRECTORY: c_int = 3;
const XSLT_SECPREF_READ_NETWORK: c_int = 4;
const XSLT_SECPREF_WRITE_NETWORK: c_int = 5;

pub type XsltSecurityCheck = Option<
    unsafe extern "C" fn(
        sec: *mut XsltSecurityPrefs,
        ctxt: *mut XsltTransformContext,
        value: *const c_char,
    ) -> c_int,
>;

#[link(name = "xslt")]
unsafe extern "C" {
    pub fn xsltInit();

    pub fn xsltParseStylesheetDoc(doc: *mut XmlDoc) -> *mut XsltStylesheet;
    pub fn xsltFreeStylesheet(style: *mut XsltStylesheet);

    pub fn xsltNewTransformContext(
        style: *mut XsltStylesheet,
        doc: *mut XmlDoc,
    ) -> *mut XsltTransformContext;
    pub fn xsltFreeTransformContext(ctxt: *mut XsltTransformContext);
    pub fn xsltSetCtxtParseOptions(ctxt: *mut XsltTransformContext, options: c_int) -> c_int;

    pub fn xsltApplyStylesheetUser(
        style: *mut XsltStylesheet,
        doc: *mut XmlDoc,
        params: *const *const c_char,
        output: *const c_char,
        profile: *mut c_void,
        user_ctxt: *mut XsltTransformContext,
    ) -> *mut XmlDoc;

    pub fn xsltSaveResultToString(
        doc_txt_ptr: *mut *mut c_uchar,
        doc_txt_len: *mut c_int,
        result: *mut XmlDoc,
        style: *mut XsltStylesheet,
    ) -> c_int;

    pub fn xsltNewSecurityPrefs() -> *mut XsltSecurityPrefs;
    pub fn xsltSetSecurityPrefs(
        sec: *mut XsltSecurityPrefs,
        option: c_int,
        func: XsltSecurityCheck,
    ) -> c_int;
    pub fn xsltSetDefaultSecurityPrefs(sec: *mut XsltSecurityPrefs);
    pub fn xsltSetCtxtSecurityPrefs(
        sec: *mut XsltSecurityPrefs,
        ctxt: *mut XsltTransformContext,
    ) -> c_int;
    pub fn xsltSecurityForbid(
        sec: *mut XsltSecurityPrefs,
        ctxt: *mut XsltTransformContext,
        value: *const c_char,
    ) -> c_int;
}

/// Process-wide security preferences; never freed
struct SecurityPrefs(*mut XsltSecurityPrefs);

// Safety: the preferences are written once during initialization and only read afterwards
unsafe impl Send for SecurityPrefs {}
unsafe impl Sync for SecurityPrefs {}

/// Forbid everything a style-sheet could do to the outside world except reading local files
unsafe fn restrictive_security_prefs() -> SecurityPrefs {
    unsafe {
        let sec = xsltNewSecurityPrefs();
        if sec.is_null() {
            warn!("Could not allocate libxslt security preferences");
            return SecurityPrefs(sec);
        }

        for option in [
            XSLT_SECPREF_WRITE_FILE,
            XSLT_SECPREF_CREATE_DIRECTORY,
            XSLT_SECPREF_READ_NETWORK,
            XSLT_SECPREF_WRITE_NETWORK,
        ] {
            xsltSetSecurityPrefs(sec, option, Some(xsltSecurityForbid));
        }
        xsltSetDefaultSecurityPrefs(sec);
        SecurityPrefs(sec)
    }
}

/// Compiled style-sheet, shareable across threads once built
#[derive(Debug)]
pub struct StylesheetPtr {
    inner: Arc<StylesheetInner>,
}

#[derive(Debug)]
struct StylesheetInner {
    ptr: *mut XsltStylesheet,
    _phantom: PhantomData<XsltStylesheet>,
}

// Safety: a compiled xsltStylesheet is not modified by transformations; per-run state lives
// in the transformation context
unsafe impl Send for StylesheetInner {}
unsafe impl Sync for StylesheetInner {}

impl StylesheetPtr {
    /// # Safety
    ///
    /// The pointer must come from `xsltParseStylesheetDoc` and must not be freed elsewhere.
    unsafe fn from_raw(ptr: *mut XsltStylesheet) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }
        Some(Self {
            inner: Arc::new(StylesheetInner {
                ptr,
                _phantom: PhantomData,
            }),
        })
    }

    fn as_ptr(&self) -> *mut XsltStylesheet {
        self.inner.ptr
    }
}

impl Clone for StylesheetPtr {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for StylesheetInner {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // Also frees the style-sheet document it took over
            unsafe {
                xsltFreeStylesheet(self.ptr);
            }
            self.ptr = ptr::null_mut();
        }
    }
}

struct TransformContext {
    ptr: *mut XsltTransformContext,
}

impl Drop for TransformContext {
    fn drop(&mut self) {
        unsafe {
            xsltFreeTransformContext(self.ptr);
        }
    }
}

/// NULL-terminated `name, expression, name, expression, ...` array for libxslt
///
/// Values are XPath expressions, evaluated by libxslt; quoting happens before this point.
#[derive(Debug)]
pub struct XsltParams {
    _strings: Vec<CString>,
    pointers: Vec<*const c_char>,
}

impl XsltParams {
    pub fn new<'a, I>(pairs: I) -> LibXml2Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut strings = Vec::new();
        for (name, expression) in pairs {
            for text in [name, expression] {
                strings.push(CString::new(text).map_err(|_| LibXml2Error::InteriorNul {
                    what: name.to_string(),
                })?);
            }
        }

        // CString contents are heap allocated, so the pointers survive moving `strings`
        let mut pointers: Vec<*const c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        pointers.push(ptr::null());

        Ok(Self {
            _strings: strings,
            pointers,
        })
    }

    pub fn empty() -> Self {
        Self {
            _strings: Vec::new(),
            pointers: vec![ptr::null()],
        }
    }

    pub fn len(&self) -> usize {
        (self.pointers.len() - 1) / 2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn as_ptr(&self) -> *const *const c_char {
        self.pointers.as_ptr()
    }
}

/// Safe access to the libxslt functionality used by the conversion service
#[derive(Debug)]
pub struct XsltWrapper {
    libxml2: LibXml2Wrapper,
}

impl XsltWrapper {
    pub fn new() -> Self {
        let libxml2 = LibXml2Wrapper::new();
        LIBXSLT_INIT.call_once(|| {
            unsafe { xsltInit() };
            SECURITY_PREFS.get_or_init(|| unsafe { restrictive_security_prefs() });
        });

        Self { libxml2 }
    }

    pub fn libxml2(&self) -> &LibXml2Wrapper {
        &self.libxml2
    }

    /// Set `indent="yes"` on every top-level `xsl:output`, adding one if there is none
    ///
    /// Returns the number of `xsl:output` elements touched. Simplified style-sheets (a
    /// literal result element as root) have nowhere to put one and are left alone.
    pub fn force_indent(&self, stylesheet: &XmlDocument) -> usize {
        let root = stylesheet.root_element();
        if root.is_null() || !unsafe { is_xslt_element(root) } {
            return 0;
        }

        let mut touched = 0;
        unsafe {
            let mut child = (*root).children;
            while !child.is_null() {
                if is_xslt_element(child) && node_name(child).as_deref() == Some("output") {
                    set_indent(child);
                    touched += 1;
                }
                child = (*child).next;
            }

            if touched == 0 {
                let output = xmlNewChild(
                    root,
                    (*root).ns,
                    c"output".as_ptr() as *const c_uchar,
                    ptr::null(),
                );
                if !output.is_null() {
                    set_indent(output);
                    touched = 1;
                }
            }
        }

        debug!(outputs = touched, "Forced indentation on style-sheet output");
        touched
    }

    /// Compile a parsed style-sheet, taking ownership of its document
    ///
    /// Callers compiling style-sheets with `xsl:include`/`xsl:import` must be inside a
    /// trusted [`ResolutionScope`].
    pub fn compile(
        &self,
        stylesheet: XmlDocument,
        collector: &mut ErrorCollector,
    ) -> Option<StylesheetPtr> {
        let raw = stylesheet.into_raw();
        let style = {
            let _errors = StructuredErrorScope::install(collector);
            unsafe { xsltParseStylesheetDoc(raw) }
        };

        match unsafe { StylesheetPtr::from_raw(style) } {
            Some(compiled) => Some(compiled),
            None => {
                // Ownership of the document only passes on success
                drop(unsafe { XmlDocument::from_raw(raw) });
                None
            }
        }
    }

    /// Apply a compiled style-sheet to a parsed document
    ///
    /// External resolution is denied for the whole run and documents loaded through
    /// `document()` are parsed with the untrusted parser options. `Ok(None)` means the
    /// transformation failed.
    pub fn transform(
        &self,
        stylesheet: &StylesheetPtr,
        input: &XmlDocument,
        params: &XsltParams,
        collector: &mut ErrorCollector,
    ) -> LibXml2Result<Option<XmlDocument>> {
        let ctxt = unsafe { xsltNewTransformContext(stylesheet.as_ptr(), input.as_ptr()) };
        if ctxt.is_null() {
            return Err(LibXml2Error::TransformContextCreationFailed);
        }
        let ctxt = TransformContext { ptr: ctxt };

        unsafe {
            xsltSetCtxtParseOptions(
                ctxt.ptr,
                HardenedParserConfig::untrusted().parser_options(),
            );
            if let Some(prefs) = SECURITY_PREFS.get()
                && !prefs.0.is_null()
            {
                xsltSetCtxtSecurityPrefs(prefs.0, ctxt.ptr);
            }
        }

        let result = {
            let _resolution = ResolutionScope::deny();
            let _errors = StructuredErrorScope::install(collector);
            unsafe {
                xsltApplyStylesheetUser(
                    stylesheet.as_ptr(),
                    input.as_ptr(),
                    params.as_ptr(),
                    ptr::null(),
                    ptr::null_mut(),
                    ctxt.ptr,
                )
            }
        };

        Ok(unsafe { XmlDocument::from_raw(result) })
    }

    /// Serialize a result tree using the style-sheet's output settings
    ///
    /// `None` means libxslt could not serialize the tree; an empty result is `Some(vec![])`.
    pub fn serialize(&self, stylesheet: &StylesheetPtr, result: &XmlDocument) -> Option<Vec<u8>> {
        let mut buffer: *mut c_uchar = ptr::null_mut();
        let mut length: c_int = 0;

        let status = unsafe {
            xsltSaveResultToString(
                &mut buffer,
                &mut length,
                result.as_ptr(),
                stylesheet.as_ptr(),
            )
        };
        if status != 0 {
            return None;
        }
        if buffer.is_null() {
            return Some(Vec::new());
        }

        let bytes = match usize::try_from(length) {
            Ok(len) => unsafe { std::slice::from_raw_parts(buffer, len) }.to_vec(),
            Err(_) => Vec::new(),
        };
        unsafe {
            xml_free(buffer as *mut c_void);
        }
        Some(bytes)
    }
}

impl Default for XsltWrapper {
    fn default() -> Self {
        Self::new()
    }
}

unsafe fn is_xslt_element(node: *const XmlNode) -> bool {
    unsafe {
        (*node).node_type == XML_ELEMENT_NODE
            && node_namespace(node).as_deref() == Some(XSLT_NAMESPACE)
    }
}

unsafe fn set_indent(node: *mut XmlNode) {
    unsafe {
        xmlSetProp(
            node,
            c"indent".as_ptr() as *const c_uchar,
            c"yes".as_ptr() as *const c_uchar,
        );
    }
}
