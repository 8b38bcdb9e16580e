mod common;

use std::fs;
use std::sync::Arc;

use common::*;
use xml_report_pipeline::{
    ArtifactCache, ConversionError, ConversionService, FailureKind, ParamValue, Parameters,
    XmlSource,
};

#[test]
fn test_convert_to_string() {
    let output = ConversionService::new()
        .convert_to_string(
            XmlSource::memory(SIMPLE_XSL),
            XmlSource::memory("<root>x</root>"),
            None,
        )
        .unwrap();

    assert!(output.contains("<out>x</out>"), "{}", output);
}

#[test]
fn test_internal_entities_are_copied_as_content() {
    let output = ConversionService::new()
        .convert_to_string(
            XmlSource::memory(COPY_XSL),
            XmlSource::memory(
                r#"<!DOCTYPE root [<!ENTITY n "x"><!ENTITY item "<i>&n;</i>">]><root>&n;&item;</root>"#,
            ),
            None,
        )
        .unwrap();

    assert!(output.contains("<out>x<i>x</i></out>"), "{}", output);
}

#[test]
fn test_file_output_matches_string_output() {
    let ws = Workspace::new();
    let xsl = ws.write("canonical.xsl", TO_CANONICAL_XSL);
    let report = ws.write("report.xml", VALID_REPORT);
    let target = ws.path("out/canonical.xml");
    fs::create_dir_all(target.parent().unwrap()).unwrap();
    let service = ConversionService::new();

    service.convert_files(&xsl, &report, &target, None).unwrap();
    let from_file = fs::read_to_string(&target).unwrap();
    let from_string = service
        .convert_to_string(XmlSource::file(&xsl), XmlSource::file(&report), None)
        .unwrap();

    assert_eq!(from_file, from_string);
    assert!(from_file.contains(r#"<testsuite name="default" tests="2">"#));
    assert!(from_file.contains(r#"<testcase name="logout" result="failed"/>"#));
}

#[test]
fn test_output_is_indented() {
    let output = ConversionService::new()
        .convert_to_string(
            XmlSource::memory(TO_CANONICAL_XSL),
            XmlSource::memory(VALID_REPORT),
            None,
        )
        .unwrap();

    assert!(
        output.contains("\n  <testcase"),
        "expected indented output: {}",
        output
    );
}

#[test]
fn test_conversion_is_repeatable() {
    let service = ConversionService::new();
    let run = || {
        service
            .convert_to_string(
                XmlSource::memory(TO_CANONICAL_XSL),
                XmlSource::memory(VALID_REPORT),
                None,
            )
            .unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_parameters_reach_the_stylesheet() {
    let params = Parameters::new()
        .with("suite", "it's \"nightly\"")
        .with("unused", 42i64);

    let output = ConversionService::new()
        .convert_to_string(
            XmlSource::memory(TO_CANONICAL_XSL),
            XmlSource::memory(VALID_REPORT),
            Some(&params),
        )
        .unwrap();
    assert!(output.contains("name=\"it's &quot;nightly&quot;\""), "{}", output);

    let params = Parameters::new().with("suite", ParamValue::Expression("concat('a', 'b')".into()));
    let output = ConversionService::new()
        .convert_to_string(
            XmlSource::memory(TO_CANONICAL_XSL),
            XmlSource::memory(VALID_REPORT),
            Some(&params),
        )
        .unwrap();
    assert!(output.contains(r#"<testsuite name="ab""#), "{}", output);
}

#[test]
fn test_writer_output() {
    let mut buffer = Vec::new();
    ConversionService::new()
        .convert_to_writer(
            XmlSource::memory(SIMPLE_XSL),
            XmlSource::memory("<root>y</root>"),
            &mut buffer,
            None,
        )
        .unwrap();
    assert!(String::from_utf8(buffer).unwrap().contains("<out>y</out>"));
}

#[test]
fn test_missing_stylesheet() {
    let ws = Workspace::new();
    let report = ws.write("report.xml", VALID_REPORT);

    let err = ConversionService::new()
        .convert_to_string(
            XmlSource::file(ws.path("missing.xsl")),
            XmlSource::file(&report),
            None,
        )
        .unwrap_err();
    assert!(matches!(err, ConversionError::NotFound { .. }));
    assert_eq!(err.kind(), FailureKind::NotFound);
}

#[test]
fn test_invalid_stylesheet() {
    let broken = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:template match="/"><xsl:value-of select="((("/></xsl:template>
</xsl:stylesheet>"#;

    let err = ConversionService::new()
        .convert_to_string(XmlSource::memory(broken), XmlSource::memory("<root/>"), None)
        .unwrap_err();
    assert!(matches!(err, ConversionError::Stylesheet { .. }), "{:?}", err);
    assert_eq!(err.kind(), FailureKind::Engine);

    let err = ConversionService::new()
        .convert_to_string(
            XmlSource::memory("<xsl:stylesheet"),
            XmlSource::memory("<root/>"),
            None,
        )
        .unwrap_err();
    assert!(matches!(err, ConversionError::Stylesheet { .. }), "{:?}", err);
}

#[test]
fn test_malformed_input_leaves_no_output_file() {
    let ws = Workspace::new();
    let xsl = ws.write("canonical.xsl", TO_CANONICAL_XSL);
    let report = ws.write("report.xml", MALFORMED_REPORT);
    let target = ws.path("canonical.xml");

    let err = ConversionService::new()
        .convert_files(&xsl, &report, &target, None)
        .unwrap_err();

    assert!(matches!(err, ConversionError::InputParse { .. }), "{:?}", err);
    assert!(!target.exists());
}

#[test]
fn test_unwritable_output_is_io_error() {
    let ws = Workspace::new();
    let xsl = ws.write("canonical.xsl", TO_CANONICAL_XSL);
    let report = ws.write("report.xml", VALID_REPORT);

    let err = ConversionService::new()
        .convert_files(&xsl, &report, &ws.path("no/such/dir/out.xml"), None)
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Io);
}

#[test]
fn test_cached_stylesheet_is_reused() {
    let cache = Arc::new(ArtifactCache::new(8));
    let service = ConversionService::with_cache(Arc::clone(&cache));

    for suite in ["first", "second"] {
        let params = Parameters::new().with("suite", suite);
        let output = service
            .convert_to_string(
                XmlSource::memory(TO_CANONICAL_XSL),
                XmlSource::memory(VALID_REPORT),
                Some(&params),
            )
            .unwrap();
        assert!(output.contains(&format!("name=\"{}\"", suite)));
    }

    let stats = cache.stats();
    assert_eq!(stats.stylesheets, 1);
    assert_eq!(stats.hits, 1);
}
