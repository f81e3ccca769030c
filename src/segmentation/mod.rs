//! Segmentations: ordered sets of segments sharing one representation set.
//!
//! A [`Segmentation`] owns its segments and keeps three guarantees after
//! every public mutating call:
//!
//! 1. Every segment holds the same set of representation names.
//! 2. Every segment holds the master representation.
//! 3. Within a labelmap object shared by several segments, label values
//!    are distinct.
//!
//! Derived (non-master) representations are a cache. Mutating a master
//! object through [`DataHandle::modify`] posts to the segmentation's change
//! bus, which raises [`SegmentationEvent::MasterRepresentationModified`] at
//! once. From that moment derived representations read as absent, and the
//! next mutating call (or [`Segmentation::process_pending_changes`]) drops
//! them.

mod common_geometry;
mod events;
mod handle;
pub mod io_json;
mod layers;
mod representation;
mod segment;

pub use common_geometry::ExtentComputationMode;
pub use events::{SegmentationEvent, SubscriptionId};
pub use handle::DataHandle;
pub use layers::LabelmapLayer;
pub use representation::{DataKind, Representation, BINARY_LABELMAP, CLOSED_SURFACE};
pub use segment::{Segment, DEFAULT_COLOR};

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use log::{debug, error, warn};
use nalgebra::Matrix4;

use crate::conversion::params::REFERENCE_IMAGE_GEOMETRY;
use crate::conversion::{ConversionParameters, ConversionPath, Converter, RuleRegistry};
use crate::error::SegmentationError;
use crate::geometry::{deserialize_image_geometry, serialize_image_geometry, Bounds};
use events::Listeners;
use handle::ChangeBus;

/// Prefix of generated segment IDs when no name is available.
const DEFAULT_SEGMENT_ID_PREFIX: &str = "Segment";

/// Saved representation maps used to undo a failed bulk conversion.
type Snapshot = Vec<(String, BTreeMap<String, Representation>, u16)>;

/// An ordered collection of segments with a common master representation.
#[derive(Debug)]
pub struct Segmentation {
    segments: HashMap<String, Segment>,
    segment_ids: Vec<String>,
    master_representation_name: String,
    converter: Converter,
    bus: Rc<ChangeBus>,
    observed: Vec<Representation>,
    listeners: Rc<RefCell<Listeners>>,
    segment_id_counter: u32,
}

impl Default for Segmentation {
    fn default() -> Self {
        Self::with_default_rules(BINARY_LABELMAP)
    }
}

impl Segmentation {
    /// Creates an empty segmentation converting with the rules of `registry`.
    pub fn new(registry: &RuleRegistry, master_representation_name: &str) -> Self {
        Self::with_converter(Converter::new(registry), master_representation_name)
    }

    /// Creates an empty segmentation with the built-in surface/labelmap rules.
    pub fn with_default_rules(master_representation_name: &str) -> Self {
        Self::new(&RuleRegistry::with_default_rules(), master_representation_name)
    }

    fn with_converter(converter: Converter, master_representation_name: &str) -> Self {
        let listeners: Rc<RefCell<Listeners>> = Rc::default();
        Self {
            segments: HashMap::new(),
            segment_ids: Vec::new(),
            master_representation_name: master_representation_name.to_string(),
            converter,
            bus: ChangeBus::new(master_representation_name, Rc::clone(&listeners)),
            observed: Vec::new(),
            listeners,
            segment_id_counter: 0,
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Registers a callback invoked for every event raised afterwards.
    pub fn subscribe(&mut self, listener: impl FnMut(&SegmentationEvent) + 'static) -> SubscriptionId {
        self.listeners.borrow_mut().add(Box::new(listener))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.listeners.borrow_mut().remove(id)
    }

    fn emit(&mut self, event: SegmentationEvent) {
        debug!("Segmentation event: {}", event);
        self.listeners.borrow_mut().emit(&event);
    }

    /// Applies queued master-object changes.
    ///
    /// Drops every derived representation; the matching
    /// [`SegmentationEvent::MasterRepresentationModified`] was raised when
    /// the master object changed. Returns true when there was anything to
    /// apply.
    pub fn process_pending_changes(&mut self) -> bool {
        let pending = self.bus.take_pending();
        if pending.is_empty() {
            return false;
        }
        debug!(
            "{} master object(s) modified; dropping derived representations",
            pending.len()
        );
        self.invalidate_non_master_representations();
        true
    }

    /// Re-attaches the change bus to exactly the current master objects.
    fn rewire_master_observers(&mut self) {
        for rep in self.observed.drain(..) {
            rep.detach(&self.bus);
        }
        for id in &self.segment_ids {
            let Some(rep) = self
                .segments
                .get(id)
                .and_then(|s| s.raw_representations().get(&self.master_representation_name))
            else {
                continue;
            };
            rep.attach(&self.bus);
            if !self.observed.iter().any(|o| o.same_object(rep)) {
                self.observed.push(rep.clone());
            }
        }
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn master_representation_name(&self) -> &str {
        &self.master_representation_name
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    pub fn number_of_segments(&self) -> usize {
        self.segment_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segment_ids.is_empty()
    }

    /// Segment IDs in display order.
    pub fn segment_ids(&self) -> &[String] {
        &self.segment_ids
    }

    pub fn segment(&self, id: &str) -> Option<&Segment> {
        self.segments.get(id)
    }

    /// Segments with their IDs, in display order.
    pub fn segments(&self) -> impl Iterator<Item = (&str, &Segment)> + '_ {
        self.segment_ids
            .iter()
            .filter_map(|id| self.segments.get(id).map(|s| (id.as_str(), s)))
    }

    pub fn nth_segment(&self, index: usize) -> Option<&Segment> {
        self.segment_ids.get(index).and_then(|id| self.segments.get(id))
    }

    pub fn nth_segment_id(&self, index: usize) -> Option<&str> {
        self.segment_ids.get(index).map(String::as_str)
    }

    pub fn segment_index(&self, id: &str) -> Option<usize> {
        self.segment_ids.iter().position(|s| s == id)
    }

    /// ID of the first segment whose name matches, ignoring case.
    pub fn segment_id_by_name(&self, name: &str) -> Option<&str> {
        let wanted = name.to_lowercase();
        self.segments()
            .find(|(_, s)| s.name().to_lowercase() == wanted)
            .map(|(id, _)| id)
    }

    /// Segments carrying `tag`, optionally with a specific value.
    pub fn segments_by_tag(&self, tag: &str, value: Option<&str>) -> Vec<(&str, &Segment)> {
        self.segments()
            .filter(|(_, s)| match (s.tag(tag), value) {
                (Some(_), None) => true,
                (Some(actual), Some(wanted)) => actual == wanted,
                (None, _) => false,
            })
            .collect()
    }

    pub fn segment_representation(&self, id: &str, name: &str) -> Option<&Representation> {
        self.segments.get(id).and_then(|s| s.representation(name))
    }

    fn first_segment(&self) -> Option<&Segment> {
        self.segment_ids.first().and_then(|id| self.segments.get(id))
    }

    fn segment_or_err(&self, id: &str) -> Result<&Segment, SegmentationError> {
        self.segments
            .get(id)
            .ok_or_else(|| SegmentationError::SegmentNotFound(id.to_string()))
    }

    fn segment_mut_or_err(&mut self, id: &str) -> Result<&mut Segment, SegmentationError> {
        self.segments
            .get_mut(id)
            .ok_or_else(|| SegmentationError::SegmentNotFound(id.to_string()))
    }

    /// Union of the world bounds of every segment.
    pub fn bounds(&self) -> Bounds {
        self.segments()
            .fold(Bounds::EMPTY, |acc, (_, s)| acc.union(&s.bounds()))
    }

    // ------------------------------------------------------------------
    // Segment membership
    // ------------------------------------------------------------------

    /// Returns `base` if unused, otherwise `base_N` with the next free `N`.
    ///
    /// An empty base uses the prefix `Segment`.
    pub fn generate_unique_segment_id(&mut self, base: &str) -> String {
        if !base.is_empty() && !self.segments.contains_key(base) {
            return base.to_string();
        }
        let prefix = if base.is_empty() {
            DEFAULT_SEGMENT_ID_PREFIX
        } else {
            base
        };
        loop {
            self.segment_id_counter += 1;
            let candidate = format!("{}_{}", prefix, self.segment_id_counter);
            if !self.segments.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Adds a segment, converting it to match the segmentation.
    ///
    /// A segment without representations receives empty placeholders for
    /// every representation the segmentation holds (just the master when the
    /// segmentation is empty). Otherwise the master is created from the
    /// cheapest source the segment has, missing representations are
    /// converted from the master and extra ones dropped.
    ///
    /// The segment is stored under `segment_id`, or under a unique ID derived
    /// from its name, and placed before `insert_before` when that ID exists.
    ///
    /// # Errors
    /// A duplicate `segment_id` is [`SegmentationError::InvalidInput`]; a
    /// segment that cannot be converted is rejected unchanged.
    pub fn add_segment(
        &mut self,
        mut segment: Segment,
        segment_id: Option<&str>,
        insert_before: Option<&str>,
    ) -> Result<String, SegmentationError> {
        self.process_pending_changes();
        let segment_id = segment_id.filter(|id| !id.is_empty());
        if let Some(id) = segment_id {
            if self.segments.contains_key(id) {
                return Err(SegmentationError::InvalidInput(format!(
                    "segment ID '{}' already exists",
                    id
                )));
            }
        }
        segment.set_bus(None);

        let master = self.master_representation_name.clone();
        if segment.is_bare() {
            let required = if self.segments.is_empty() {
                vec![master]
            } else {
                self.contained_representation_names()
            };
            for name in &required {
                segment.add_representation(name, Representation::empty(name)?);
            }
        } else {
            let parameters = self.converter.parameters().clone();
            if !segment.contains_representation(&master) {
                let sources = segment.representation_names();
                let path = self
                    .converter
                    .cheapest_path_from(sources.iter().map(String::as_str), &master)
                    .ok_or_else(|| {
                        error!("Unable to create master representation for '{}'", segment.name());
                        SegmentationError::NoConversionPath {
                            from: sources.join(", "),
                            to: master.clone(),
                        }
                    })?;
                convert_segment_using_path(&mut segment, &path, &parameters, false).map_err(|err| {
                    error!("Unable to create master representation for '{}': {}", segment.name(), err);
                    err
                })?;
            }

            if !self.segments.is_empty() {
                let required = self.contained_representation_names();
                for name in &required {
                    if segment.contains_representation(name) {
                        continue;
                    }
                    let path = self
                        .converter
                        .cheapest_path_from([master.as_str()], name)
                        .ok_or_else(|| SegmentationError::NoConversionPath {
                            from: master.clone(),
                            to: name.clone(),
                        })?;
                    convert_segment_using_path(&mut segment, &path, &parameters, false)?;
                }
                for name in segment.representation_names() {
                    if !required.contains(&name) {
                        segment.remove_representation(&name);
                    }
                }
            }
        }

        let key = match segment_id {
            Some(id) => id.to_string(),
            None => {
                let name = segment.name().to_string();
                self.generate_unique_segment_id(&name)
            }
        };
        segment.set_bus(Some(Rc::clone(&self.bus)));
        let position = insert_before
            .and_then(|before| self.segment_index(before))
            .unwrap_or(self.segment_ids.len());
        self.segment_ids.insert(position, key.clone());
        self.segments.insert(key.clone(), segment);
        self.rewire_master_observers();
        self.emit(SegmentationEvent::SegmentAdded(key.clone()));
        Ok(key)
    }

    /// Adds a segment with empty representations.
    ///
    /// When the segments already hold a binary labelmap, the new segment
    /// joins the first segment's labelmap layer under an unused label
    /// value instead of getting a labelmap of its own. The name defaults to
    /// the ID.
    pub fn add_empty_segment(
        &mut self,
        segment_id: Option<&str>,
        name: Option<&str>,
        color: Option<[f64; 3]>,
    ) -> Result<String, SegmentationError> {
        self.process_pending_changes();
        let id = self.generate_unique_segment_id(segment_id.unwrap_or(""));
        let mut segment = Segment::new(name.filter(|n| !n.is_empty()).unwrap_or(&id));
        if let Some(color) = color {
            segment.set_color(color);
        }

        let shared = self
            .first_segment()
            .and_then(Segment::binary_labelmap)
            .filter(|h| h.borrow().is_allocated());
        if let Some(handle) = shared {
            let first_id = self.segment_ids[0].clone();
            let label = self.unique_label_value_for_shared_labelmap(&first_id)?;
            for name in self.contained_representation_names() {
                let rep = if name == BINARY_LABELMAP {
                    Representation::BinaryLabelmap(handle.clone())
                } else {
                    Representation::empty(&name)?
                };
                segment.add_representation(&name, rep);
            }
            segment.set_label_value(label);
        }
        self.add_segment(segment, Some(&id), None)
    }

    /// Removes a segment and returns it.
    ///
    /// A segment sharing its labelmap is separated first, so the remaining
    /// sharers keep their voxels and label values.
    pub fn remove_segment(&mut self, id: &str) -> Result<Segment, SegmentationError> {
        self.process_pending_changes();
        if !self.segments.contains_key(id) {
            warn!("Segment to remove cannot be found: {}", id);
            return Err(SegmentationError::SegmentNotFound(id.to_string()));
        }
        if self.is_labelmap_shared(id) {
            self.separate_segment_labelmap(id)?;
        }
        let mut segment = self
            .segments
            .remove(id)
            .ok_or_else(|| SegmentationError::SegmentNotFound(id.to_string()))?;
        segment.set_bus(None);
        self.segment_ids.retain(|s| s != id);
        if self.segments.is_empty() {
            self.segment_id_counter = 0;
        }
        self.rewire_master_observers();
        self.emit(SegmentationEvent::SegmentRemoved(id.to_string()));
        Ok(segment)
    }

    pub fn remove_all_segments(&mut self) {
        self.process_pending_changes();
        let ids = std::mem::take(&mut self.segment_ids);
        for id in &ids {
            if let Some(mut segment) = self.segments.remove(id) {
                segment.set_bus(None);
            }
        }
        self.segments.clear();
        self.segment_id_counter = 0;
        self.rewire_master_observers();
        for id in ids {
            self.emit(SegmentationEvent::SegmentRemoved(id));
        }
    }

    /// Swaps the segment with the one at `new_index`.
    pub fn set_segment_index(&mut self, id: &str, new_index: usize) -> Result<(), SegmentationError> {
        if new_index >= self.segment_ids.len() {
            return Err(SegmentationError::InvalidInput(format!(
                "segment index {} is out of range (0..{})",
                new_index,
                self.segment_ids.len()
            )));
        }
        let current = self
            .segment_index(id)
            .ok_or_else(|| SegmentationError::SegmentNotFound(id.to_string()))?;
        self.segment_ids.swap(current, new_index);
        self.emit(SegmentationEvent::SegmentsOrderModified);
        Ok(())
    }

    /// Moves `ids` (in the given order) before `insert_before`, or to the
    /// end when it is `None` or unknown. Unknown IDs are ignored.
    pub fn reorder_segments(&mut self, ids: &[&str], insert_before: Option<&str>) {
        if ids.is_empty() {
            return;
        }
        self.segment_ids.retain(|s| !ids.contains(&s.as_str()));
        let mut position = insert_before
            .and_then(|before| self.segment_index(before))
            .unwrap_or(self.segment_ids.len());
        for id in ids {
            if self.segments.contains_key(*id) && self.segment_index(id).is_none() {
                self.segment_ids.insert(position, id.to_string());
                position += 1;
            }
        }
        self.emit(SegmentationEvent::SegmentsOrderModified);
    }

    /// Copies (or moves) a segment from another segmentation.
    ///
    /// The reference geometry parameter is copied when this segmentation
    /// has none. A clashing ID is replaced by a generated one. A copied
    /// segment never shares labelmap voxels with its source.
    pub fn copy_segment_from_segmentation(
        &mut self,
        from: &mut Segmentation,
        id: &str,
        remove_from_source: bool,
    ) -> Result<String, SegmentationError> {
        from.process_pending_changes();
        from.segment_or_err(id)?;

        let target_id = if self.segments.contains_key(id) {
            let generated = self.generate_unique_segment_id(id);
            warn!(
                "Segment '{}' already exists in the target segmentation; copying as '{}'",
                id, generated
            );
            generated
        } else {
            id.to_string()
        };

        let ours = self.conversion_parameter(REFERENCE_IMAGE_GEOMETRY).unwrap_or("");
        let theirs = from.conversion_parameter(REFERENCE_IMAGE_GEOMETRY).unwrap_or("");
        if ours.is_empty() && !theirs.is_empty() {
            let theirs = theirs.to_string();
            self.set_conversion_parameter(REFERENCE_IMAGE_GEOMETRY, theirs);
        }

        if remove_from_source {
            if from.is_labelmap_shared(id) {
                from.separate_segment_labelmap(id)?;
            }
            let moved = from.segment_or_err(id)?.shallow_copy();
            let key = self.add_segment(moved, Some(&target_id), None)?;
            from.remove_segment(id)?;
            Ok(key)
        } else {
            let copy = from.standalone_segment_copy(id)?;
            self.add_segment(copy, Some(&target_id), None)
        }
    }

    /// Independent copy with the same master, rules, parameters and
    /// segments. Labelmap sharing between segments is reproduced.
    pub fn deep_copy(&self) -> Segmentation {
        let mut copy = Segmentation::with_converter(self.converter.clone(), &self.master_representation_name);
        let mut copied: HashMap<u64, Representation> = HashMap::new();
        for (id, segment) in self.segments() {
            let mut duplicate = segment.shallow_copy();
            duplicate.remove_all_representations_except("");
            for name in segment.representation_names() {
                let Some(rep) = segment.representation(&name) else {
                    continue;
                };
                let fresh = copied
                    .entry(rep.object_id())
                    .or_insert_with(|| rep.deep_copy())
                    .clone();
                duplicate.add_representation(&name, fresh);
            }
            duplicate.set_bus(Some(Rc::clone(&copy.bus)));
            copy.segment_ids.push(id.to_string());
            copy.segments.insert(id.to_string(), duplicate);
        }
        copy.segment_id_counter = self.segment_id_counter;
        copy.rewire_master_observers();
        copy
    }

    // ------------------------------------------------------------------
    // Segment properties
    // ------------------------------------------------------------------

    pub fn set_segment_name(&mut self, id: &str, name: &str) -> Result<(), SegmentationError> {
        self.segment_mut_or_err(id)?.set_name(name);
        self.emit(SegmentationEvent::SegmentModified(id.to_string()));
        Ok(())
    }

    pub fn set_segment_color(&mut self, id: &str, color: [f64; 3]) -> Result<(), SegmentationError> {
        self.segment_mut_or_err(id)?.set_color(color);
        self.emit(SegmentationEvent::SegmentModified(id.to_string()));
        Ok(())
    }

    pub fn set_segment_tag(&mut self, id: &str, key: &str, value: &str) -> Result<(), SegmentationError> {
        self.segment_mut_or_err(id)?.set_tag(key, value);
        self.emit(SegmentationEvent::SegmentModified(id.to_string()));
        Ok(())
    }

    pub fn remove_segment_tag(&mut self, id: &str, key: &str) -> Result<Option<String>, SegmentationError> {
        let removed = self.segment_mut_or_err(id)?.remove_tag(key);
        if removed.is_some() {
            self.emit(SegmentationEvent::SegmentModified(id.to_string()));
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Master representation
    // ------------------------------------------------------------------

    /// Changes the master representation.
    ///
    /// The new master is first converted in when the segments lack it, then
    /// every other representation is dropped.
    pub fn set_master_representation_name(&mut self, name: &str) -> Result<(), SegmentationError> {
        self.process_pending_changes();
        if name == self.master_representation_name {
            return Ok(());
        }
        if Representation::kind_for_name(name).is_none() {
            return Err(SegmentationError::IncompatibleRepresentation(format!(
                "unknown representation '{}'",
                name
            )));
        }
        if !self.segments.is_empty() && !self.contains_representation(name) {
            self.create_representation(name, false)?;
        }
        debug!(
            "Master representation changed from '{}' to '{}'",
            self.master_representation_name, name
        );
        self.master_representation_name = name.to_string();
        self.bus.set_master_name(name);
        self.invalidate_non_master_representations();
        self.rewire_master_observers();
        self.emit(SegmentationEvent::MasterRepresentationModified);
        Ok(())
    }

    /// Turns master change tracking on or off and returns the previous state.
    pub fn set_master_representation_modified_enabled(&mut self, enabled: bool) -> bool {
        self.bus.set_enabled(enabled)
    }

    pub fn is_master_representation_modified_enabled(&self) -> bool {
        self.bus.is_enabled()
    }

    pub fn is_master_representation_poly_data(&self) -> bool {
        Representation::kind_for_name(&self.master_representation_name) == Some(DataKind::PolyData)
    }

    pub fn is_master_representation_image_data(&self) -> bool {
        Representation::kind_for_name(&self.master_representation_name) == Some(DataKind::ImageData)
    }

    /// Drops every representation except the master from every segment.
    pub fn invalidate_non_master_representations(&mut self) {
        let master = self.master_representation_name.clone();
        let mut removed_any = false;
        for segment in self.segments.values_mut() {
            removed_any |= !segment.remove_all_representations_except(&master).is_empty();
        }
        if removed_any {
            self.emit(SegmentationEvent::ContainedRepresentationNamesModified);
        }
    }

    /// Transforms every master object and the reference geometry parameter.
    ///
    /// Objects shared by several segments are transformed once.
    pub fn apply_linear_transform(&mut self, matrix: &Matrix4<f64>) -> Result<(), SegmentationError> {
        self.process_pending_changes();
        if matrix.try_inverse().is_none() {
            return Err(SegmentationError::InvalidInput(
                "transform is not invertible".into(),
            ));
        }

        if let Some(text) = self
            .conversion_parameter(REFERENCE_IMAGE_GEOMETRY)
            .filter(|t| !t.trim().is_empty())
            .map(str::to_string)
        {
            match deserialize_image_geometry(&text) {
                Ok(mut geometry) => {
                    let moved = matrix * geometry.image_to_world_matrix();
                    geometry.set_image_to_world_matrix(&moved);
                    self.set_conversion_parameter(REFERENCE_IMAGE_GEOMETRY, serialize_image_geometry(&geometry));
                }
                Err(err) => warn!("Reference image geometry not transformed: {}", err),
            }
        }

        let mut masters = Vec::with_capacity(self.segment_ids.len());
        for (id, segment) in self.segments() {
            let rep = segment.representation(&self.master_representation_name).ok_or_else(|| {
                SegmentationError::IncompatibleRepresentation(format!(
                    "segment '{}' has no master representation",
                    id
                ))
            })?;
            masters.push(rep.clone());
        }
        let mut seen = HashSet::new();
        for rep in masters {
            if seen.insert(rep.object_id()) {
                rep.apply_transform(matrix);
            }
        }
        self.process_pending_changes();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Representations
    // ------------------------------------------------------------------

    /// Representation names held by the segments (all hold the same set).
    pub fn contained_representation_names(&self) -> Vec<String> {
        self.first_segment()
            .map(Segment::representation_names)
            .unwrap_or_default()
    }

    /// True when there are segments and all of them hold `name`.
    pub fn contains_representation(&self, name: &str) -> bool {
        !self.segments.is_empty() && self.segments.values().all(|s| s.contains_representation(name))
    }

    /// True for the master or anything convertible into it.
    pub fn can_accept_representation(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        name == self.master_representation_name
            || !self
                .converter
                .possible_conversions(name, &self.master_representation_name)
                .is_empty()
    }

    /// True when the segmentation is empty or accepts one of the segment's
    /// representations.
    pub fn can_accept_segment(&self, segment: &Segment) -> bool {
        self.segments.is_empty()
            || segment
                .representation_names()
                .iter()
                .any(|name| self.can_accept_representation(name))
    }

    /// Every path from the master to `target`.
    pub fn possible_conversions(&self, target: &str) -> Vec<ConversionPath> {
        self.converter
            .possible_conversions(&self.master_representation_name, target)
    }

    /// Makes `target` available in every segment.
    ///
    /// Does nothing when all segments already hold it, unless
    /// `always_convert` is set. The cheapest path is chosen from any
    /// representation the segments hold, or only from the master when
    /// `always_convert` is set. Either every segment is converted or none.
    pub fn create_representation(&mut self, target: &str, always_convert: bool) -> Result<(), SegmentationError> {
        self.process_pending_changes();
        if !always_convert && self.segments.values().all(|s| s.contains_representation(target)) {
            return Ok(());
        }
        let sources = if always_convert {
            vec![self.master_representation_name.clone()]
        } else {
            self.contained_representation_names()
        };
        let path = self
            .converter
            .cheapest_path_from(sources.iter().map(String::as_str), target)
            .ok_or_else(|| SegmentationError::NoConversionPath {
                from: sources.join(", "),
                to: target.to_string(),
            })?;
        debug!("Creating '{}' via {}", target, path);
        let parameters = self.converter.parameters().clone();
        self.run_conversion(&path, &parameters, always_convert)
    }

    /// Converts every segment along `path`, overwriting existing targets.
    ///
    /// `parameters` update the converter's values first.
    pub fn create_representation_with_path(
        &mut self,
        path: &ConversionPath,
        parameters: &ConversionParameters,
    ) -> Result<(), SegmentationError> {
        self.process_pending_changes();
        if path.is_empty() {
            return Err(SegmentationError::InvalidInput("empty conversion path".into()));
        }
        self.converter.parameters_mut().update_values(parameters);
        let parameters = self.converter.parameters().clone();
        self.run_conversion(path, &parameters, true)
    }

    fn run_conversion(
        &mut self,
        path: &ConversionPath,
        parameters: &ConversionParameters,
        overwrite: bool,
    ) -> Result<(), SegmentationError> {
        let target = path.target().unwrap_or_default().to_string();
        let snapshot = self.snapshot();
        let ids = self.segment_ids.clone();
        for id in &ids {
            let Some(segment) = self.segments.get_mut(id) else {
                continue;
            };
            if let Err(err) = convert_segment_using_path(segment, path, parameters, overwrite) {
                error!("Conversion to '{}' failed for segment '{}': {}", target, id, err);
                self.restore(snapshot);
                return Err(err);
            }
        }

        for rule in path.rules() {
            if let Err(err) = rule.post_convert(self, parameters) {
                error!("Finishing conversion to '{}' failed: {}", target, err);
                self.restore(snapshot);
                self.rewire_master_observers();
                return Err(err);
            }
        }
        self.rewire_master_observers();

        // Every segment is converted before anyone hears about it.
        let mut modified = Vec::new();
        for (id, before, _) in &snapshot {
            let Some(segment) = self.segments.get(id) else {
                continue;
            };
            let after = segment.raw_representations().get(&target);
            let changed = match (before.get(&target), after) {
                (Some(b), Some(a)) => !b.same_object(a) || b.mtime() != a.mtime(),
                (None, None) => false,
                _ => true,
            };
            if changed {
                modified.push(id.clone());
            }
        }
        for id in modified {
            self.emit(SegmentationEvent::RepresentationModified(id));
        }
        self.emit(SegmentationEvent::ContainedRepresentationNamesModified);
        Ok(())
    }

    /// Rebuilds one derived representation of one segment from the master.
    ///
    /// Only representations the other segments hold can be refreshed this
    /// way, so that all segments keep the same representation set.
    pub fn convert_single_segment(&mut self, id: &str, target: &str) -> Result<(), SegmentationError> {
        self.process_pending_changes();
        self.segment_or_err(id)?;
        if target == self.master_representation_name {
            return Ok(());
        }
        if self
            .segments
            .iter()
            .any(|(other, s)| other != id && !s.contains_representation(target))
        {
            return Err(SegmentationError::InvalidInput(format!(
                "'{}' is not held by the other segments; use create_representation",
                target
            )));
        }
        let path = self
            .converter
            .cheapest_path_from([self.master_representation_name.as_str()], target)
            .ok_or_else(|| SegmentationError::NoConversionPath {
                from: self.master_representation_name.clone(),
                to: target.to_string(),
            })?;
        if target == BINARY_LABELMAP && self.is_labelmap_shared(id) {
            self.separate_segment_labelmap(id)?;
        }

        let parameters = self.converter.parameters().clone();
        let names_before = self.contained_representation_names();
        let segment = self.segment_mut_or_err(id)?;
        let saved = segment.raw_representations().clone();
        let saved_label = segment.label_value();
        if let Err(err) = convert_segment_using_path(segment, &path, &parameters, true) {
            error!("Conversion to '{}' failed for segment '{}': {}", target, id, err);
            *segment.representations_mut() = saved;
            segment.set_label_value(saved_label);
            return Err(err);
        }
        self.emit(SegmentationEvent::RepresentationModified(id.to_string()));
        if self.contained_representation_names() != names_before {
            self.emit(SegmentationEvent::ContainedRepresentationNamesModified);
        }
        Ok(())
    }

    /// Removes a derived representation from every segment.
    pub fn remove_representation(&mut self, name: &str) -> Result<(), SegmentationError> {
        self.process_pending_changes();
        if name == self.master_representation_name {
            return Err(SegmentationError::InvalidInput(format!(
                "cannot remove the master representation '{}'",
                name
            )));
        }
        let mut removed_any = false;
        for segment in self.segments.values_mut() {
            removed_any |= segment.remove_representation(name).is_some();
        }
        if removed_any {
            self.emit(SegmentationEvent::ContainedRepresentationNamesModified);
        }
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        self.segments()
            .map(|(id, s)| (id.to_string(), s.raw_representations().clone(), s.label_value()))
            .collect()
    }

    fn restore(&mut self, snapshot: Snapshot) {
        for (id, representations, label) in snapshot {
            if let Some(segment) = self.segments.get_mut(&id) {
                *segment.representations_mut() = representations;
                segment.set_label_value(label);
            }
        }
    }

    // ------------------------------------------------------------------
    // Conversion parameters
    // ------------------------------------------------------------------

    pub fn conversion_parameters(&self) -> &ConversionParameters {
        self.converter.parameters()
    }

    pub fn conversion_parameter(&self, name: &str) -> Option<&str> {
        self.converter.parameter(name)
    }

    pub fn set_conversion_parameter(&mut self, name: &str, value: impl Into<String>) {
        self.converter.set_parameter(name, value);
    }

    /// Encodes all parameter values as `name|value&...`.
    pub fn serialize_all_conversion_parameters(&self) -> String {
        self.converter.parameters().serialize()
    }

    /// Applies values produced by
    /// [`serialize_all_conversion_parameters`](Self::serialize_all_conversion_parameters).
    pub fn deserialize_conversion_parameters(&mut self, text: &str) -> usize {
        self.converter.parameters_mut().deserialize(text)
    }
}

/// Runs each rule of `path` on one segment.
///
/// Steps whose target already exists are skipped unless `overwrite` is set.
/// A step whose source is an empty placeholder yields an empty target.
fn convert_segment_using_path(
    segment: &mut Segment,
    path: &ConversionPath,
    parameters: &ConversionParameters,
    overwrite: bool,
) -> Result<(), SegmentationError> {
    for rule in path.rules() {
        let source = rule.source_representation_name();
        let target = rule.target_representation_name();
        let source_is_empty = match segment.representation(source) {
            Some(rep) => rep.is_empty(),
            None => {
                return Err(SegmentationError::IncompatibleRepresentation(format!(
                    "segment '{}' has no {} representation",
                    segment.name(),
                    source
                )))
            }
        };
        if !overwrite && segment.contains_representation(target) {
            continue;
        }
        if source_is_empty {
            segment.add_representation(target, rule.construct_representation()?);
            continue;
        }
        rule.convert(segment, parameters)?;
    }
    Ok(())
}
