#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub const REPORT_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="report">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="case" maxOccurs="unbounded">
          <xs:complexType>
            <xs:attribute name="name" type="xs:string" use="required"/>
            <xs:attribute name="status" type="xs:string" use="required"/>
          </xs:complexType>
        </xs:element>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

/// Same element as [`REPORT_XSD`] but `status` refers to a type only [`STATUS_XSD`] defines
pub const TYPED_REPORT_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="report">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="case" maxOccurs="unbounded">
          <xs:complexType>
            <xs:attribute name="name" type="xs:string" use="required"/>
            <xs:attribute name="status" type="statusType" use="required"/>
          </xs:complexType>
        </xs:element>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

pub const STATUS_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:simpleType name="statusType">
    <xs:restriction base="xs:string">
      <xs:enumeration value="passed"/>
      <xs:enumeration value="failed"/>
      <xs:enumeration value="skipped"/>
    </xs:restriction>
  </xs:simpleType>
</xs:schema>"#;

pub const VALID_REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<report>
  <case name="login" status="passed"/>
  <case name="logout" status="failed"/>
</report>"#;

/// The offending element sits on line 4
pub const INVALID_REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<report>
  <case name="login" status="passed"/>
  <suite name="extra"/>
</report>"#;

pub const BAD_STATUS_REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<report>
  <case name="login" status="exploded"/>
</report>"#;

pub const MALFORMED_REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<report>
  <case name="login" status="passed">
</report>"#;

pub const TO_CANONICAL_XSL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:param name="suite" select="'default'"/>
  <xsl:template match="/report">
    <testsuite name="{$suite}" tests="{count(case)}">
      <xsl:for-each select="case">
        <testcase name="{@name}" result="{@status}"/>
      </xsl:for-each>
    </testsuite>
  </xsl:template>
</xsl:stylesheet>"#;

pub const SIMPLE_XSL: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:template match="/root"><out><xsl:value-of select="."/></out></xsl:template>
</xsl:stylesheet>"#;

/// A single text-only `root` element
pub const TEXT_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="root" type="xs:string"/>
</xs:schema>"#;

/// Copies the children of `root` into `out` unchanged
pub const COPY_XSL: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:template match="/root"><out><xsl:copy-of select="node()"/></out></xsl:template>
</xsl:stylesheet>"#;

/// `report` in `urn:r` whose type is declared by [`NS_REPORT_TYPES_XSD`]
pub const NS_REPORT_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:r="urn:r"
    targetNamespace="urn:r" elementFormDefault="qualified">
  <xs:element name="report" type="r:reportType"/>
</xs:schema>"#;

pub const NS_REPORT_TYPES_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:r="urn:r"
    targetNamespace="urn:r" elementFormDefault="qualified">
  <xs:complexType name="reportType">
    <xs:sequence>
      <xs:element name="case" type="xs:string" maxOccurs="unbounded"/>
    </xs:sequence>
  </xs:complexType>
</xs:schema>"#;

/// `report` in `urn:r` built from a type that lives in `urn:types`, see [`TYPES_NS_XSD`]
pub const IMPORTING_REPORT_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:t="urn:types"
    targetNamespace="urn:r" elementFormDefault="qualified">
  <xs:import namespace="urn:types"/>
  <xs:element name="report" type="t:reportType"/>
</xs:schema>"#;

pub const TYPES_NS_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
    targetNamespace="urn:types">
  <xs:complexType name="reportType">
    <xs:attribute name="name" type="xs:string" use="required"/>
  </xs:complexType>
</xs:schema>"#;

pub const NS_REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<r:report xmlns:r="urn:r">
  <r:case>login</r:case>
  <r:case>logout</r:case>
</r:report>"#;

pub const NS_BAD_REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<r:report xmlns:r="urn:r">
  <r:suite>login</r:suite>
</r:report>"#;

/// A scratch directory with report fixtures written on demand
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    /// A file whose content must never show up in any output
    pub fn secret(&self) -> (PathBuf, &'static str) {
        const MARKER: &str = "TOP-SECRET-7f3a91";
        (self.write("secret.txt", MARKER), MARKER)
    }
}
