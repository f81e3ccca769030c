//! Conversion parameter files.
//!
//! A parameter file is a flat YAML or JSON map from parameter name to
//! value. Values may be strings, numbers or booleans, or an object carrying
//! both `value` and `description`:
//!
//! ```yaml
//! Oversampling factor: A
//! Crop to reference image geometry: true
//! Smoothing factor:
//!   value: 0.5
//!   description: Moderate smoothing
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::conversion::{ConversionParameter, ConversionParameters};
use crate::error::SegmentationError;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ParameterEntry {
    Flag(bool),
    Number(f64),
    Text(String),
    Detailed {
        value: Box<ParameterEntry>,
        #[serde(default)]
        description: String,
    },
}

impl ParameterEntry {
    fn into_parameter(self) -> ConversionParameter {
        match self {
            ParameterEntry::Flag(flag) => ConversionParameter {
                value: if flag { "1" } else { "0" }.to_string(),
                description: String::new(),
            },
            ParameterEntry::Number(number) => ConversionParameter {
                value: number.to_string(),
                description: String::new(),
            },
            ParameterEntry::Text(value) => ConversionParameter {
                value,
                description: String::new(),
            },
            ParameterEntry::Detailed { value, description } => ConversionParameter {
                description,
                ..value.into_parameter()
            },
        }
    }
}

fn collect(entries: BTreeMap<String, ParameterEntry>) -> ConversionParameters {
    let mut parameters = ConversionParameters::new();
    for (name, entry) in entries {
        let parameter = entry.into_parameter();
        parameters.set(name, parameter.value, parameter.description);
    }
    parameters
}

/// Loads conversion parameters from a `.yaml`/`.yml` or `.json` file.
///
/// # Errors
/// Returns an error if the file cannot be read, has another extension, or
/// does not contain a flat map.
pub fn load_parameter_file(path: &Path) -> Result<ConversionParameters, SegmentationError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let text = fs::read_to_string(path)?;

    let entries: BTreeMap<String, ParameterEntry> = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&text).map_err(|source| SegmentationError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?,
        "json" => serde_json::from_str(&text).map_err(|source| SegmentationError::JsonParse {
            path: path.to_path_buf(),
            source,
        })?,
        other => {
            return Err(SegmentationError::UnsupportedFormat(format!(
                "parameter file extension '{}' (supported: yaml, yml, json)",
                other
            )))
        }
    };
    Ok(collect(entries))
}

/// Parses a `name=value` override as given on the command line.
pub fn parse_parameter_override(text: &str) -> Result<(String, String), SegmentationError> {
    let (name, value) = text.split_once('=').ok_or_else(|| {
        SegmentationError::InvalidInput(format!("parameter override '{}' is not name=value", text))
    })?;
    let name = name.trim();
    if name.is_empty() {
        return Err(SegmentationError::InvalidInput(format!(
            "parameter override '{}' has an empty name",
            text
        )));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::params::{CROP_TO_REFERENCE_IMAGE_GEOMETRY, OVERSAMPLING_FACTOR, SMOOTHING_FACTOR};

    fn write(dir: &tempfile::TempDir, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn yaml_values_are_normalised_to_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "params.yaml",
            "Oversampling factor: A\nCrop to reference image geometry: true\nSmoothing factor:\n  value: 0.5\n  description: Moderate\n",
        );
        let params = load_parameter_file(&path).unwrap();
        assert_eq!(params.value(OVERSAMPLING_FACTOR), Some("A"));
        assert_eq!(params.value(CROP_TO_REFERENCE_IMAGE_GEOMETRY), Some("1"));
        assert_eq!(params.value(SMOOTHING_FACTOR), Some("0.5"));
        assert_eq!(params.description(SMOOTHING_FACTOR), Some("Moderate"));
    }

    #[test]
    fn json_files_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "params.json", r#"{ "Oversampling factor": 2 }"#);
        let params = load_parameter_file(&path).unwrap();
        assert_eq!(params.value(OVERSAMPLING_FACTOR), Some("2"));
    }

    #[test]
    fn bad_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = write(&dir, "bad.yaml", "- just\n- a list\n");
        assert!(matches!(
            load_parameter_file(&yaml),
            Err(SegmentationError::ConfigParse { .. })
        ));
        let toml = write(&dir, "params.toml", "a = 1");
        assert!(matches!(
            load_parameter_file(&toml),
            Err(SegmentationError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn overrides_split_on_first_equals() {
        assert_eq!(
            parse_parameter_override("Reference image geometry=1;0;0").unwrap(),
            ("Reference image geometry".to_string(), "1;0;0".to_string())
        );
        assert!(parse_parameter_override("novalue").is_err());
        assert!(parse_parameter_override("=3").is_err());
    }
}
