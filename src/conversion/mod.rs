//! Representation conversion: rules, the rule graph and reporting.
//!
//! A [`ConversionRule`] turns one representation of a segment into another
//! (for example a closed surface into a binary labelmap). Rules are
//! registered in a [`RuleRegistry`] that the caller constructs and passes to
//! each [`Converter`]. The converter owns the current parameter values and
//! answers path queries: every acyclic chain of rules between two
//! representation names, and the cheapest of them.

mod closed_surface_to_labelmap;
mod labelmap_to_closed_surface;
pub mod params;
mod path;
mod rasterize;
pub mod report;

pub use closed_surface_to_labelmap::{default_image_geometry_for_surface, ClosedSurfaceToBinaryLabelmap};
pub use labelmap_to_closed_surface::BinaryLabelmapToClosedSurface;
pub use params::{ConversionParameter, ConversionParameters};
pub use path::{cheapest_path, find_paths, ConversionPath};
pub use rasterize::rasterize_surface;
pub use report::{
    ConversionCounts, ConversionIssue, ConversionIssueCode, ConversionReport, ConversionSeverity,
};

use std::rc::Rc;

use crate::error::SegmentationError;
use crate::segmentation::{Representation, Segment, Segmentation};

/// A typed edge of the conversion graph.
pub trait ConversionRule {
    /// Human-readable rule name.
    fn name(&self) -> String {
        format!(
            "{} to {}",
            self.source_representation_name(),
            self.target_representation_name()
        )
    }

    fn source_representation_name(&self) -> &'static str;

    fn target_representation_name(&self) -> &'static str;

    /// Relative cost used only to compare paths.
    fn conversion_cost(&self) -> u32;

    /// Parameters understood by this rule, with default values.
    fn default_parameters(&self) -> ConversionParameters;

    /// An empty object of the target representation.
    fn construct_representation(&self) -> Result<Representation, SegmentationError> {
        Representation::empty(self.target_representation_name())
    }

    /// Creates the target representation of `segment` from its source.
    ///
    /// On failure the segment is left unchanged.
    fn convert(
        &self,
        segment: &mut Segment,
        parameters: &ConversionParameters,
    ) -> Result<(), SegmentationError>;

    /// Runs once after every segment has been converted.
    fn post_convert(
        &self,
        _segmentation: &mut Segmentation,
        _parameters: &ConversionParameters,
    ) -> Result<(), SegmentationError> {
        Ok(())
    }

    /// Notes on what this rule will do with the given parameters.
    fn describe(&self, _parameters: &ConversionParameters) -> Vec<ConversionIssue> {
        Vec::new()
    }
}

/// The set of rules available to converters.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<Rc<dyn ConversionRule>>,
}

impl RuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the surface/labelmap rules in both directions.
    pub fn with_default_rules() -> Self {
        let mut registry = Self::new();
        registry.register(ClosedSurfaceToBinaryLabelmap::new());
        registry.register(BinaryLabelmapToClosedSurface::new());
        registry
    }

    pub fn register(&mut self, rule: impl ConversionRule + 'static) {
        self.rules.push(Rc::new(rule));
    }

    pub fn rules(&self) -> &[Rc<dyn ConversionRule>] {
        &self.rules
    }
}

/// Rule graph plus the parameter values used when converting.
#[derive(Clone)]
pub struct Converter {
    rules: Vec<Rc<dyn ConversionRule>>,
    parameters: ConversionParameters,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.rules.iter().map(|r| r.name()).collect();
        f.debug_struct("Converter")
            .field("rules", &names)
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl Converter {
    /// Creates a converter over the registry's rules with default parameters.
    pub fn new(registry: &RuleRegistry) -> Self {
        let rules = registry.rules().to_vec();
        let mut parameters = ConversionParameters::new();
        for rule in &rules {
            parameters.insert_missing(&rule.default_parameters());
        }
        Self { rules, parameters }
    }

    pub fn rules(&self) -> &[Rc<dyn ConversionRule>] {
        &self.rules
    }

    pub fn parameters(&self) -> &ConversionParameters {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut ConversionParameters {
        &mut self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.value(name)
    }

    pub fn set_parameter(&mut self, name: &str, value: impl Into<String>) {
        self.parameters.set_value(name, value);
    }

    /// All acyclic paths from `source` to `target`.
    pub fn possible_conversions(&self, source: &str, target: &str) -> Vec<ConversionPath> {
        find_paths(&self.rules, source, target)
    }

    /// Cheapest path from any of `sources` to `target`.
    pub fn cheapest_path_from<'a>(
        &self,
        sources: impl IntoIterator<Item = &'a str>,
        target: &str,
    ) -> Option<ConversionPath> {
        let paths: Vec<ConversionPath> = sources
            .into_iter()
            .filter(|s| *s != target)
            .flat_map(|s| self.possible_conversions(s, target))
            .collect();
        cheapest_path(&paths).cloned()
    }

    /// Report describing a planned conversion along `path`.
    pub fn build_conversion_report(&self, path: &ConversionPath) -> ConversionReport {
        let mut report = ConversionReport::new(
            path.source().unwrap_or_default(),
            path.target().unwrap_or_default(),
        );
        report.path = path.representation_names().iter().map(|s| s.to_string()).collect();
        report.cost = path.cost();
        for rule in path.rules() {
            for issue in rule.describe(&self.parameters) {
                report.add(issue);
            }
        }
        report
    }
}
