//! Named conversion parameters shared by all rules of a converter.
//!
//! Parameters are plain strings so that they can travel through files and
//! command lines unchanged; each rule parses the ones it understands.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Serialised reference geometry (see [`crate::geometry::serialize_image_geometry`]).
pub const REFERENCE_IMAGE_GEOMETRY: &str = "Reference image geometry";
/// A positive number, or `A` to let the fuzzy estimator choose.
pub const OVERSAMPLING_FACTOR: &str = "Oversampling factor";
/// `1` to crop rasterised labelmaps to the reference extent.
pub const CROP_TO_REFERENCE_IMAGE_GEOMETRY: &str = "Crop to reference image geometry";
/// `1` to pack labelmaps into shared layers after conversion.
pub const COLLAPSE_LABELMAPS: &str = "Collapse labelmaps";
/// Laplacian smoothing strength for surfaces built from labelmaps, `0` to `1`.
pub const SMOOTHING_FACTOR: &str = "Smoothing factor";

/// Value of [`OVERSAMPLING_FACTOR`] requesting automatic estimation.
pub const AUTOMATIC_OVERSAMPLING: &str = "A";

const PAIR_SEPARATOR: char = '&';
const VALUE_SEPARATOR: char = '|';

/// A parameter value together with its human-readable description.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionParameter {
    pub value: String,
    #[serde(default)]
    pub description: String,
}

/// Ordered map from parameter name to value and description.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversionParameters(BTreeMap<String, ConversionParameter>);

impl ConversionParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter including its description.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        description: impl Into<String>,
    ) {
        self.0.insert(
            name.into(),
            ConversionParameter {
                value: value.into(),
                description: description.into(),
            },
        );
    }

    /// Sets only the value, keeping any existing description.
    pub fn set_value(&mut self, name: &str, value: impl Into<String>) {
        self.0.entry(name.to_string()).or_default().value = value.into();
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|p| p.value.as_str())
    }

    pub fn description(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|p| p.description.as_str())
    }

    /// Interprets a parameter as a boolean flag (`1`, `true`, `yes`).
    pub fn flag(&self, name: &str) -> bool {
        self.value(name)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConversionParameter)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Adds parameters from `other` that are not yet present.
    pub fn insert_missing(&mut self, other: &ConversionParameters) {
        for (name, param) in &other.0 {
            self.0.entry(name.clone()).or_insert_with(|| param.clone());
        }
    }

    /// Overrides values (not descriptions) with those of `other`.
    pub fn update_values(&mut self, other: &ConversionParameters) {
        for (name, param) in &other.0 {
            self.set_value(name, param.value.clone());
        }
    }

    /// Encodes every value as `name|value&name|value&`.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (name, param) in &self.0 {
            out.push_str(name);
            out.push(VALUE_SEPARATOR);
            out.push_str(&param.value);
            out.push(PAIR_SEPARATOR);
        }
        out
    }

    /// Parses the output of [`serialize`](Self::serialize).
    ///
    /// Returns the number of values applied; malformed pairs are skipped.
    pub fn deserialize(&mut self, text: &str) -> usize {
        let mut applied = 0;
        for pair in text.split(PAIR_SEPARATOR) {
            let Some((name, value)) = pair.split_once(VALUE_SEPARATOR) else {
                if !pair.trim().is_empty() {
                    log::warn!("Ignoring malformed conversion parameter '{}'", pair);
                }
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            self.set_value(name, value);
            applied += 1;
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_value_keeps_description() {
        let mut params = ConversionParameters::new();
        params.set(OVERSAMPLING_FACTOR, "1", "Determines the oversampling");
        params.set_value(OVERSAMPLING_FACTOR, "A");
        assert_eq!(params.value(OVERSAMPLING_FACTOR), Some("A"));
        assert_eq!(
            params.description(OVERSAMPLING_FACTOR),
            Some("Determines the oversampling")
        );
    }

    #[test]
    fn serialized_values_apply_to_another_set() {
        let mut a = ConversionParameters::new();
        a.set(COLLAPSE_LABELMAPS, "0", "");
        a.set(REFERENCE_IMAGE_GEOMETRY, "1;0;0;0;0;1;0;0;0;0;1;0;0;0;0;1;0;9;0;9;0;9;", "");
        let text = a.serialize();

        let mut b = ConversionParameters::new();
        b.set(COLLAPSE_LABELMAPS, "1", "Merge labelmaps");
        assert_eq!(b.deserialize(&text), 2);
        assert_eq!(b.value(COLLAPSE_LABELMAPS), Some("0"));
        assert_eq!(b.description(COLLAPSE_LABELMAPS), Some("Merge labelmaps"));
        assert_eq!(b.value(REFERENCE_IMAGE_GEOMETRY), a.value(REFERENCE_IMAGE_GEOMETRY));
    }

    #[test]
    fn flags_and_malformed_pairs() {
        let mut params = ConversionParameters::new();
        assert_eq!(params.deserialize("garbage&&Crop to reference image geometry|1&"), 1);
        assert!(params.flag(CROP_TO_REFERENCE_IMAGE_GEOMETRY));
        assert!(!params.flag(COLLAPSE_LABELMAPS));
    }
}
