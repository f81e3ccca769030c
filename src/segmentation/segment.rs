//! A single anatomical structure and its cached representations.

use std::collections::BTreeMap;
use std::rc::Rc;

use super::handle::{ChangeBus, DataHandle};
use super::representation::{Representation, BINARY_LABELMAP, CLOSED_SURFACE};
use crate::geometry::{Bounds, OrientedVolume, SurfaceMesh};

/// Default display colour (neutral grey).
pub const DEFAULT_COLOR: [f64; 3] = [0.5, 0.5, 0.5];

/// A named structure holding one or more representations of its shape.
///
/// `label_value` is the voxel value that marks this segment inside its
/// binary labelmap; it only differs from 1 when the labelmap object is
/// shared with other segments.
#[derive(Debug)]
pub struct Segment {
    name: String,
    color: [f64; 3],
    tags: BTreeMap<String, String>,
    label_value: u16,
    representations: BTreeMap<String, Representation>,
    bus: Option<Rc<ChangeBus>>,
}

impl Default for Segment {
    fn default() -> Self {
        Self {
            name: String::new(),
            color: DEFAULT_COLOR,
            tags: BTreeMap::new(),
            label_value: 1,
            representations: BTreeMap::new(),
            bus: None,
        }
    }
}

impl Segment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder-style helper adding a representation.
    pub fn with_representation(mut self, name: &str, representation: Representation) -> Self {
        self.add_representation(name, representation);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn color(&self) -> [f64; 3] {
        self.color
    }

    pub fn set_color(&mut self, color: [f64; 3]) {
        self.color = color;
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    pub fn remove_tag(&mut self, key: &str) -> Option<String> {
        self.tags.remove(key)
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn label_value(&self) -> u16 {
        self.label_value
    }

    /// Sets the label value; zero is the background and becomes 1.
    pub fn set_label_value(&mut self, value: u16) {
        self.label_value = value.max(1);
    }

    /// The named representation, unless it has been invalidated.
    pub fn representation(&self, name: &str) -> Option<&Representation> {
        if self.bus.as_ref().is_some_and(|bus| bus.hides(name)) {
            return None;
        }
        self.representations.get(name)
    }

    pub fn contains_representation(&self, name: &str) -> bool {
        self.representation(name).is_some()
    }

    /// Names of the currently valid representations in sorted order.
    pub fn representation_names(&self) -> Vec<String> {
        self.representations
            .keys()
            .filter(|name| self.representation(name).is_some())
            .cloned()
            .collect()
    }

    pub fn closed_surface(&self) -> Option<DataHandle<SurfaceMesh>> {
        self.representation(CLOSED_SURFACE)
            .and_then(Representation::as_closed_surface)
            .cloned()
    }

    pub fn binary_labelmap(&self) -> Option<DataHandle<OrientedVolume>> {
        self.representation(BINARY_LABELMAP)
            .and_then(Representation::as_binary_labelmap)
            .cloned()
    }

    /// Adds or replaces a representation. Replacing releases this segment's
    /// reference to the previous object only.
    pub fn add_representation(&mut self, name: &str, representation: Representation) {
        self.representations.insert(name.to_string(), representation);
    }

    pub fn remove_representation(&mut self, name: &str) -> Option<Representation> {
        self.representations.remove(name)
    }

    /// Drops every representation except `keep`.
    pub fn remove_all_representations_except(&mut self, keep: &str) -> Vec<String> {
        let removed: Vec<String> = self
            .representations
            .keys()
            .filter(|name| name.as_str() != keep)
            .cloned()
            .collect();
        for name in &removed {
            self.representations.remove(name);
        }
        removed
    }

    /// True when no representation is attached at all.
    pub fn is_bare(&self) -> bool {
        self.representations.is_empty()
    }

    /// World bounds of all valid representations.
    pub fn bounds(&self) -> Bounds {
        self.representation_names()
            .iter()
            .filter_map(|name| self.representation(name))
            .fold(Bounds::EMPTY, |acc, rep| acc.union(&rep.bounds()))
    }

    /// Copy sharing the representation objects of this segment.
    pub fn shallow_copy(&self) -> Segment {
        Segment {
            name: self.name.clone(),
            color: self.color,
            tags: self.tags.clone(),
            label_value: self.label_value,
            representations: self.representations.clone(),
            bus: None,
        }
    }

    /// Copy with independent representation objects.
    pub fn deep_copy(&self) -> Segment {
        let mut copy = self.shallow_copy();
        for rep in copy.representations.values_mut() {
            *rep = rep.deep_copy();
        }
        copy
    }

    pub(crate) fn set_bus(&mut self, bus: Option<Rc<ChangeBus>>) {
        self.bus = bus;
    }

    pub(crate) fn representations_mut(&mut self) -> &mut BTreeMap<String, Representation> {
        &mut self.representations
    }

    pub(crate) fn raw_representations(&self) -> &BTreeMap<String, Representation> {
        &self.representations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let mut s = Segment::new("Liver");
        assert_eq!(s.name(), "Liver");
        assert_eq!(s.label_value(), 1);
        assert_eq!(s.color(), DEFAULT_COLOR);
        s.set_label_value(0);
        assert_eq!(s.label_value(), 1);
        assert!(s.is_bare());
    }

    #[test]
    fn tags_round_trip() {
        let mut s = Segment::new("Tumor");
        s.set_tag("TerminologyEntry", "SCT^49755003");
        assert_eq!(s.tag("TerminologyEntry"), Some("SCT^49755003"));
        assert_eq!(s.remove_tag("TerminologyEntry").as_deref(), Some("SCT^49755003"));
        assert!(s.tags().is_empty());
    }

    #[test]
    fn shallow_copy_shares_objects_deep_copy_does_not() {
        let s = Segment::new("a").with_representation(
            BINARY_LABELMAP,
            Representation::binary_labelmap(OrientedVolume::new()),
        );
        let shallow = s.shallow_copy();
        let deep = s.deep_copy();
        let original = s.representation(BINARY_LABELMAP).unwrap();
        assert!(original.same_object(shallow.representation(BINARY_LABELMAP).unwrap()));
        assert!(!original.same_object(deep.representation(BINARY_LABELMAP).unwrap()));
    }

    #[test]
    fn pending_master_change_hides_derived_representations() {
        let bus = ChangeBus::new(CLOSED_SURFACE, Rc::default());
        let mut s = Segment::new("a")
            .with_representation(CLOSED_SURFACE, Representation::closed_surface(SurfaceMesh::default()))
            .with_representation(BINARY_LABELMAP, Representation::binary_labelmap(OrientedVolume::new()));
        s.set_bus(Some(Rc::clone(&bus)));
        let master = s.closed_surface().unwrap();
        master.attach(&bus);

        assert!(s.contains_representation(BINARY_LABELMAP));
        master.modify(|_| ());
        assert!(!s.contains_representation(BINARY_LABELMAP));
        assert!(s.contains_representation(CLOSED_SURFACE));
        assert_eq!(s.representation_names(), vec![CLOSED_SURFACE.to_string()]);
    }
}
