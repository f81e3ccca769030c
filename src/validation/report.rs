//! Findings of [`validate_document`](super::validate_document).

use std::fmt;

use serde::Serialize;

/// Issues found in one segmentation document, in discovery order.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    /// The document loads into a segmentation.
    pub fn is_ok(&self) -> bool {
        self.error_count() == 0
    }

    /// Loadable and free of warnings (`validate --strict`).
    pub fn is_ok_strict(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return writeln!(f, "Validation passed: no issues found");
        }
        writeln!(
            f,
            "Validation completed with {} error(s) and {} warning(s):",
            self.error_count(),
            self.warning_count()
        )?;
        writeln!(f)?;
        for issue in &self.issues {
            writeln!(f, "  {}", issue)?;
        }
        Ok(())
    }
}

/// One finding, tied to the document part it concerns.
#[derive(Clone, Debug, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: IssueCode,
    pub message: String,
    pub context: IssueContext,
}

impl ValidationIssue {
    pub fn error(code: IssueCode, message: impl Into<String>, context: IssueContext) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            context,
        }
    }

    pub fn warning(code: IssueCode, message: impl Into<String>, context: IssueContext) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, message, context)
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN ",
        };
        write!(f, "[{}] {:?} in {}: {}", severity, self.code, self.context, self.message)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Suspicious but loadable.
    Warning,
    /// The document breaks a segmentation invariant or cannot be loaded.
    Error,
}

/// Stable, snake_case issue identifiers used in JSON output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    // Document issues
    /// The master representation name is not a known representation.
    UnknownMasterRepresentation,
    /// A conversion parameter value cannot be interpreted.
    InvalidConversionParameter,

    // Labelmap issues
    /// A labelmap geometry string does not parse.
    InvalidLabelmapGeometry,
    /// Voxel runs do not cover the labelmap extent exactly.
    LabelmapRunMismatch,
    /// No segment references the labelmap.
    UnreferencedLabelmap,
    /// Voxels carry a value no segment of the layer claims.
    UnclaimedLabelValue,

    // Segment issues
    /// A segment has an empty ID.
    EmptySegmentId,
    /// Multiple segments have the same ID.
    DuplicateSegmentId,
    /// A segment has an empty name.
    EmptySegmentName,
    /// Multiple segments have the same name, ignoring case.
    DuplicateSegmentName,
    /// A colour component is outside `[0, 1]`.
    ColorOutOfRange,
    /// A segment lacks the master representation.
    MissingMasterRepresentation,
    /// A segment holds a different set of representations than the first one.
    RepresentationSetMismatch,
    /// A segment references a labelmap index that does not exist.
    DanglingLabelmapRef,
    /// A segment's label value is zero.
    InvalidLabelValue,
    /// Two segments of one labelmap layer use the same label value.
    DuplicateLabelInLayer,
    /// The master representation holds no data for the segment.
    EmptySegment,
    /// A closed surface has boundary edges.
    OpenSurface,
}

/// Where a validation issue occurred.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueContext {
    /// The document as a whole.
    Document,
    /// A conversion parameter.
    Parameter { name: String },
    /// An entry of the labelmap table.
    Labelmap { index: usize },
    /// A segment.
    Segment { id: String },
}

impl fmt::Display for IssueContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueContext::Document => write!(f, "document"),
            IssueContext::Parameter { name } => write!(f, "parameter '{}'", name),
            IssueContext::Labelmap { index } => write!(f, "labelmap {}", index),
            IssueContext::Segment { id } => write!(f, "segment '{}'", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_severity() {
        let mut report = ValidationReport::new();
        assert!(report.is_ok_strict());
        report.add(ValidationIssue::warning(
            IssueCode::EmptySegment,
            "empty",
            IssueContext::Segment { id: "a".into() },
        ));
        assert!(report.is_ok());
        assert!(!report.is_ok_strict());
        report.add(ValidationIssue::error(
            IssueCode::DuplicateSegmentId,
            "dup",
            IssueContext::Document,
        ));
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.warning_count(), 1);
        assert!(report.has(IssueCode::EmptySegment));
        assert!(report.to_string().contains("segment 'a'"));
    }

    #[test]
    fn json_uses_snake_case_codes() {
        let mut report = ValidationReport::new();
        report.add(ValidationIssue::error(
            IssueCode::DanglingLabelmapRef,
            "missing",
            IssueContext::Labelmap { index: 2 },
        ));
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"dangling_labelmap_ref\""));
        assert!(json.contains("\"severity\":\"error\""));
        assert!(json.contains("\"kind\":\"labelmap\""));
    }
}
