use divan::Bencher;
use std::sync::Arc;
use xml_report_pipeline::{ArtifactCache, ConversionService, ValidationService, XmlSource};

fn main() {
    divan::main();
}

const REPORT_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
    <xs:element name="report">
        <xs:complexType>
            <xs:sequence>
                <xs:element name="case" type="xs:string" maxOccurs="unbounded"/>
            </xs:sequence>
        </xs:complexType>
    </xs:element>
</xs:schema>"#;

const VALID_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<report>
    <case>login</case>
    <case>logout</case>
</report>"#;

const INVALID_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<report>
    <suite>Content</suite>
</report>"#;

const CANONICAL_XSL: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
    <xsl:template match="/report">
        <testsuite tests="{count(case)}">
            <xsl:for-each select="case"><testcase name="{.}"/></xsl:for-each>
        </testsuite>
    </xsl:template>
</xsl:stylesheet>"#;

fn validate(service: &ValidationService, document: &str) -> usize {
    service
        .validate_source([XmlSource::memory(REPORT_XSD)], XmlSource::memory(document))
        .expect("Validation failed")
        .len()
}

#[divan::bench]
fn validate_valid_report(bencher: Bencher) {
    let service = ValidationService::new();
    bencher.bench_local(move || validate(&service, VALID_XML));
}

#[divan::bench]
fn validate_invalid_report(bencher: Bencher) {
    let service = ValidationService::new();
    bencher.bench_local(move || validate(&service, INVALID_XML));
}

#[divan::bench]
fn validate_with_cache(bencher: Bencher) {
    let service = ValidationService::with_cache(Arc::new(ArtifactCache::default()));
    bencher.bench_local(move || validate(&service, VALID_XML));
}

#[divan::bench(args = [false, true])]
fn convert_report(bencher: Bencher, cached: bool) {
    let service = if cached {
        ConversionService::with_cache(Arc::new(ArtifactCache::default()))
    } else {
        ConversionService::new()
    };

    bencher.bench_local(move || {
        service
            .convert_to_string(
                XmlSource::memory(CANONICAL_XSL),
                XmlSource::memory(VALID_XML),
                None,
            )
            .expect("Conversion failed")
    });
}
