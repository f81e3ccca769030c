//! Conversion report types for tracking lossiness and policy decisions.
//!
//! A report is built before (or while) a segmentation is converted to a new
//! representation, in the same spirit as `validation::ValidationReport`.

use serde::Serialize;
use std::fmt;

/// A report generated while converting a segmentation.
///
/// Records the rule path that was chosen, segment and layer counts before
/// and after, and any lossiness or policy notes raised by the rules.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConversionReport {
    /// Source representation name.
    pub from: String,
    /// Target representation name.
    pub to: String,
    /// Representation names visited by the chosen path, source first.
    pub path: Vec<String>,
    /// Summed cost of the chosen path.
    pub cost: u32,
    /// Counts before conversion.
    pub input: ConversionCounts,
    /// Counts after conversion.
    pub output: ConversionCounts,
    /// Issues discovered during conversion.
    pub issues: Vec<ConversionIssue>,
}

impl ConversionReport {
    /// Create a new empty report for a conversion between representations.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            ..Default::default()
        }
    }

    /// Add an issue to the report.
    pub fn add(&mut self, issue: ConversionIssue) {
        self.issues.push(issue);
    }

    /// Count of warning-level issues (true lossiness).
    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == ConversionSeverity::Warning)
            .count()
    }

    /// Count of info-level issues (policy decisions, notes).
    pub fn info_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == ConversionSeverity::Info)
            .count()
    }

    /// Returns true if this conversion loses information.
    pub fn is_lossy(&self) -> bool {
        self.warning_count() > 0
    }

    /// Returns true if any issue carries `code`.
    pub fn has_issue(&self, code: ConversionIssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }

    /// Iterate over warning messages.
    pub fn lossy_messages(&self) -> impl Iterator<Item = &str> {
        self.issues
            .iter()
            .filter(|i| i.severity == ConversionSeverity::Warning)
            .map(|i| i.message.as_str())
    }
}

impl fmt::Display for ConversionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.path.is_empty() {
            writeln!(f, "  path: {} (cost {})", self.path.join(" -> "), self.cost)?;
        }
        writeln!(
            f,
            "  {} segments, {} labelmap layers, {} representations",
            self.input.segments, self.input.labelmap_layers, self.input.representations
        )?;

        if self.output != self.input {
            writeln!(
                f,
                "  output: {} segments, {} labelmap layers, {} representations",
                self.output.segments, self.output.labelmap_layers, self.output.representations
            )?;
        }

        let warnings = self.warning_count();
        if warnings > 0 {
            writeln!(f)?;
            writeln!(f, "Warnings ({}):", warnings)?;
            for issue in self
                .issues
                .iter()
                .filter(|i| i.severity == ConversionSeverity::Warning)
            {
                writeln!(f, "  - {}", issue.message)?;
            }
        }

        let infos = self.info_count();
        if infos > 0 {
            writeln!(f)?;
            writeln!(f, "Notes ({}):", infos)?;
            for issue in self
                .issues
                .iter()
                .filter(|i| i.severity == ConversionSeverity::Info)
            {
                writeln!(f, "  - {}", issue.message)?;
            }
        }

        Ok(())
    }
}

/// Counts of segmentation elements.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConversionCounts {
    pub segments: usize,
    /// Distinct labelmap objects.
    pub labelmap_layers: usize,
    /// Representation names held by every segment.
    pub representations: usize,
}

/// A single issue discovered during conversion.
#[derive(Clone, Debug, Serialize)]
pub struct ConversionIssue {
    pub severity: ConversionSeverity,
    pub code: ConversionIssueCode,
    pub message: String,
}

impl ConversionIssue {
    /// Create a warning-level issue (indicates lossiness).
    pub fn warning(code: ConversionIssueCode, message: impl Into<String>) -> Self {
        Self {
            severity: ConversionSeverity::Warning,
            code,
            message: message.into(),
        }
    }

    /// Create an info-level issue (policy note).
    pub fn info(code: ConversionIssueCode, message: impl Into<String>) -> Self {
        Self {
            severity: ConversionSeverity::Info,
            code,
            message: message.into(),
        }
    }
}

/// Severity level for conversion issues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionSeverity {
    /// Information is lost or approximated.
    Warning,
    /// Describes a policy decision.
    Info,
}

/// Stable issue codes for programmatic consumption.
///
/// These codes are part of the JSON schema and should remain stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionIssueCode {
    // Closed surface -> binary labelmap
    /// Surfaces are sampled on a voxel grid; sub-voxel detail is lost.
    VoxelizedSurface,
    /// No reference geometry; the grid is derived from the surface bounds.
    DefaultGeometryFromSurfaceBounds,
    /// The reference geometry parameter could not be parsed.
    MalformedReferenceGeometry,
    /// Oversampling factor chosen by the fuzzy estimator.
    AutomaticOversampling,
    /// Oversampling factor could not be parsed or is out of range.
    InvalidOversamplingFactor,
    /// Output is cropped to the reference extent.
    CroppedToReferenceGeometry,
    /// Labelmaps are packed into shared layers after conversion.
    LabelmapsCollapsed,

    // Binary labelmap -> closed surface
    /// Surfaces follow voxel faces (stair-stepped).
    VoxelBoundarySurface,
    /// Laplacian smoothing moves vertices off the voxel faces.
    SurfaceSmoothed,

    // Runtime
    /// A segment could not be converted and the conversion was rolled back.
    SegmentConversionFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_is_not_lossy() {
        let report = ConversionReport::new("Closed surface", "Binary labelmap");
        assert!(!report.is_lossy());
        assert_eq!(report.warning_count(), 0);
        assert_eq!(report.info_count(), 0);
    }

    #[test]
    fn warning_makes_report_lossy() {
        let mut report = ConversionReport::new("Closed surface", "Binary labelmap");
        report.add(ConversionIssue::warning(
            ConversionIssueCode::VoxelizedSurface,
            "surfaces are sampled on a voxel grid",
        ));
        assert!(report.is_lossy());
        assert!(report.has_issue(ConversionIssueCode::VoxelizedSurface));
        assert_eq!(report.lossy_messages().count(), 1);
    }

    #[test]
    fn info_does_not_make_report_lossy() {
        let mut report = ConversionReport::new("Closed surface", "Binary labelmap");
        report.add(ConversionIssue::info(
            ConversionIssueCode::LabelmapsCollapsed,
            "labelmaps will be collapsed",
        ));
        assert!(!report.is_lossy());
        assert_eq!(report.info_count(), 1);
        let text = report.to_string();
        assert!(text.contains("Notes (1):"));
    }

    #[test]
    fn report_serializes_to_json() {
        let mut report = ConversionReport::new("Binary labelmap", "Closed surface");
        report.input = ConversionCounts {
            segments: 3,
            labelmap_layers: 1,
            representations: 1,
        };
        report.add(ConversionIssue::warning(
            ConversionIssueCode::VoxelBoundarySurface,
            "surfaces follow voxel faces",
        ));

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"from\":\"Binary labelmap\""));
        assert!(json.contains("\"severity\":\"warning\""));
        assert!(json.contains("\"code\":\"voxel_boundary_surface\""));
    }
}
