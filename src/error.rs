use std::path::PathBuf;
use thiserror::Error;

use crate::validation::ValidationReport;

/// The main error type for segmentation operations.
#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON from {path}: {source}")]
    JsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write JSON to {path}: {source}")]
    JsonWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse parameter file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to parse mesh {path} at line {line}: {message}")]
    MeshParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No conversion path from '{from}' to '{to}'")]
    NoConversionPath { from: String, to: String },

    #[error("Incompatible representation: {0}")]
    IncompatibleRepresentation(String),

    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("Segment not found: {0}")]
    SegmentNotFound(String),

    #[error("Validation failed with {error_count} error(s) and {warning_count} warning(s)")]
    ValidationFailed {
        error_count: usize,
        warning_count: usize,
        report: ValidationReport,
    },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Coarse classification of a [`SegmentationError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    InvalidInput,
    NoConversionPath,
    IncompatibleRepresentation,
    DegenerateGeometry,
    NotFound,
    ValidationFailed,
    Unsupported,
}

impl SegmentationError {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SegmentationError::Io(_) => ErrorKind::Io,
            SegmentationError::JsonParse { .. }
            | SegmentationError::JsonWrite { .. }
            | SegmentationError::ConfigParse { .. }
            | SegmentationError::MeshParse { .. } => ErrorKind::Parse,
            SegmentationError::InvalidInput(_) => ErrorKind::InvalidInput,
            SegmentationError::NoConversionPath { .. } => ErrorKind::NoConversionPath,
            SegmentationError::IncompatibleRepresentation(_) => {
                ErrorKind::IncompatibleRepresentation
            }
            SegmentationError::DegenerateGeometry(_) => ErrorKind::DegenerateGeometry,
            SegmentationError::SegmentNotFound(_) => ErrorKind::NotFound,
            SegmentationError::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            SegmentationError::UnsupportedFormat(_) => ErrorKind::Unsupported,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_domain_variants() {
        let err = SegmentationError::NoConversionPath {
            from: "Closed surface".into(),
            to: "Fractional labelmap".into(),
        };
        assert_eq!(err.kind(), ErrorKind::NoConversionPath);
        assert!(err.to_string().contains("'Fractional labelmap'"));

        let err = SegmentationError::DegenerateGeometry("mesh has 1 point".into());
        assert_eq!(err.kind(), ErrorKind::DegenerateGeometry);
    }
}
