mod common;

use std::fs;
use std::sync::Arc;

use common::*;
use xml_report_pipeline::{
    ArtifactCache, ConfigManager, FormatDescriptor, FormatRegistry, Parameters, PipelineError,
    PipelineOutcome, ReportPipeline,
};

fn junit_registry(ws: &Workspace) -> FormatRegistry {
    let descriptor = FormatDescriptor::new("junit")
        .with_description("JUnit style report")
        .with_schema(ws.write("typed.xsd", TYPED_REPORT_XSD))
        .with_schema(ws.write("status.xsd", STATUS_XSD))
        .with_stylesheet(ws.write("canonical.xsl", TO_CANONICAL_XSL));
    FormatRegistry::from_descriptors([descriptor]).unwrap()
}

#[test]
fn test_valid_report_is_converted() {
    let ws = Workspace::new();
    let pipeline = ReportPipeline::new(junit_registry(&ws));
    let report = ws.write("report.xml", VALID_REPORT);
    let target = ws.path("canonical.xml");

    let params = Parameters::new().with("suite", "smoke");
    let outcome = pipeline
        .process("junit", &report, &target, Some(&params))
        .unwrap();

    assert!(outcome.is_converted());
    assert!(outcome.diagnostics().is_empty());
    let written = fs::read_to_string(&target).unwrap();
    assert!(written.contains(r#"<testsuite name="smoke" tests="2">"#));
}

#[test]
fn test_invalid_report_is_rejected_without_output() {
    let ws = Workspace::new();
    let pipeline = ReportPipeline::new(junit_registry(&ws));
    let report = ws.write("report.xml", BAD_STATUS_REPORT);
    let target = ws.path("canonical.xml");

    let outcome = pipeline.process("junit", &report, &target, None).unwrap();

    match &outcome {
        PipelineOutcome::Rejected { diagnostics } => assert!(!diagnostics.is_empty()),
        other => panic!("Expected rejection, got {:?}", other),
    }
    assert!(!target.exists());
}

#[test]
fn test_missing_report_is_an_error() {
    let ws = Workspace::new();
    let pipeline = ReportPipeline::new(junit_registry(&ws));

    let err = pipeline
        .process("junit", &ws.path("missing.xml"), &ws.path("out.xml"), None)
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)), "{:?}", err);
}

#[test]
fn test_formats_from_configuration_file() {
    let ws = Workspace::new();
    ws.write("schemas/typed.xsd", TYPED_REPORT_XSD);
    ws.write("schemas/status.xsd", STATUS_XSD);
    ws.write("xsl/canonical.xsl", TO_CANONICAL_XSL);
    let config_path = ws.write(
        "pipeline.toml",
        r#"
[cache]
enabled = true
max_entries = 4

[[formats]]
key = "junit"
description = "JUnit style report"
schemas = ["schemas/typed.xsd", "schemas/status.xsd"]
stylesheet = "xsl/canonical.xsl"
"#,
    );

    let config = ConfigManager::load_from_file(&config_path).unwrap();
    assert!(config.cache.enabled);
    let registry = config.registry().unwrap();
    let cache = Arc::new(ArtifactCache::new(config.cache.max_entries));
    let pipeline = ReportPipeline::with_cache(registry, Arc::clone(&cache));

    let report = ws.write("report.xml", VALID_REPORT);
    for name in ["one.xml", "two.xml"] {
        let outcome = pipeline
            .process("junit", &report, &ws.path(name), None)
            .unwrap();
        assert!(outcome.is_converted());
    }

    let stats = cache.stats();
    assert_eq!(stats.schemas, 1);
    assert_eq!(stats.stylesheets, 1);
    assert_eq!(stats.hits, 2);
    assert_eq!(
        fs::read(ws.path("one.xml")).unwrap(),
        fs::read(ws.path("two.xml")).unwrap()
    );
}
