//! Shared labelmap layers.
//!
//! Several segments may reference one labelmap object, each identified by
//! its label value inside it. A *layer* is one such object together with
//! the segments that use it, in segment order.

use std::collections::BTreeSet;

use log::debug;

use super::{
    DataHandle, ExtentComputationMode, Representation, Segment, Segmentation, SegmentationEvent,
    BINARY_LABELMAP,
};
use crate::error::SegmentationError;
use crate::geometry::resample::{erase_label, extract_label, geometries_match, masks_overlap, merge_label};
use crate::geometry::{Extent, OrientedVolume, ScalarType};

/// One labelmap object and the segments stored in it.
#[derive(Clone, Debug)]
pub struct LabelmapLayer {
    pub labelmap: DataHandle<OrientedVolume>,
    pub segment_ids: Vec<String>,
}

/// A layer being assembled by [`Segmentation::collapse_binary_labelmaps`].
struct Working {
    volume: OrientedVolume,
    members: Vec<(String, u16)>,
}

impl Working {
    fn unused_label(&self) -> Result<u16, SegmentationError> {
        let mut used: BTreeSet<u16> = self.members.iter().map(|(_, label)| *label).collect();
        used.extend(self.volume.labels());
        smallest_unused(&used)
    }
}

/// Smallest label value ≥ 1 not in `used`.
fn smallest_unused(used: &BTreeSet<u16>) -> Result<u16, SegmentationError> {
    (1..=u16::MAX)
        .find(|v| !used.contains(v))
        .ok_or_else(|| SegmentationError::InvalidInput("no free label value left in labelmap".into()))
}

impl Segmentation {
    /// Labelmap layers in order of their first segment.
    pub fn labelmap_layers(&self) -> Vec<LabelmapLayer> {
        let mut layers: Vec<LabelmapLayer> = Vec::new();
        for (id, segment) in self.segments() {
            let Some(handle) = segment.binary_labelmap() else {
                continue;
            };
            match layers.iter_mut().find(|l| l.labelmap.ptr_eq(&handle)) {
                Some(layer) => layer.segment_ids.push(id.to_string()),
                None => layers.push(LabelmapLayer {
                    labelmap: handle,
                    segment_ids: vec![id.to_string()],
                }),
            }
        }
        layers
    }

    pub fn number_of_layers(&self) -> usize {
        self.labelmap_layers().len()
    }

    /// IDs of all segments using the same labelmap object as `id`,
    /// including `id` itself.
    pub fn segment_ids_sharing_labelmap(&self, id: &str) -> Vec<String> {
        let Some(handle) = self.segment(id).and_then(Segment::binary_labelmap) else {
            return Vec::new();
        };
        self.segments()
            .filter(|(_, s)| s.binary_labelmap().is_some_and(|h| h.ptr_eq(&handle)))
            .map(|(other, _)| other.to_string())
            .collect()
    }

    pub fn is_labelmap_shared(&self, id: &str) -> bool {
        self.segment_ids_sharing_labelmap(id).len() > 1
    }

    /// Smallest label value not used by any segment sharing `id`'s labelmap
    /// nor present in its voxels.
    pub fn unique_label_value_for_shared_labelmap(&self, id: &str) -> Result<u16, SegmentationError> {
        let segment = self.segment_or_err(id)?;
        let mut used: BTreeSet<u16> = self
            .segment_ids_sharing_labelmap(id)
            .iter()
            .filter_map(|other| self.segment(other))
            .map(Segment::label_value)
            .collect();
        if let Some(handle) = segment.binary_labelmap() {
            used.extend(handle.borrow().labels());
        }
        smallest_unused(&used)
    }

    /// Smallest label value not present in `volume`.
    pub fn unique_label_value_in_volume(volume: &OrientedVolume) -> Result<u16, SegmentationError> {
        smallest_unused(&volume.labels().into_iter().collect())
    }

    /// Gives segment `id` a labelmap of its own.
    ///
    /// The segment's voxels move to a new labelmap with label value 1 and
    /// are erased from the shared one. Does nothing when the labelmap is not
    /// shared.
    pub fn separate_segment_labelmap(&mut self, id: &str) -> Result<(), SegmentationError> {
        self.process_pending_changes();
        let segment = self.segment_or_err(id)?;
        if !self.is_labelmap_shared(id) {
            return Ok(());
        }
        let label = segment.label_value();
        let handle = segment.binary_labelmap().ok_or_else(|| {
            SegmentationError::IncompatibleRepresentation(format!("segment '{}' has no labelmap", id))
        })?;
        let separated = {
            let shared = handle.borrow();
            extract_label(&shared, label).unwrap_or_else(|| {
                let mut empty = shared.geometry_only();
                empty.set_extent(Extent::EMPTY);
                empty
            })
        };
        handle.modify_silently(|shared| erase_label(shared, label));
        debug!("Separated segment '{}' (label {}) from shared labelmap", id, label);

        let segment = self.segment_mut_or_err(id)?;
        segment.add_representation(BINARY_LABELMAP, Representation::binary_labelmap(separated));
        segment.set_label_value(1);
        self.rewire_master_observers();
        self.emit(SegmentationEvent::RepresentationModified(id.to_string()));
        Ok(())
    }

    /// Puts the given segments into one shared labelmap with label values
    /// `1..=n` in the given order.
    ///
    /// The merged labelmap covers the union of the segments' extents in the
    /// geometry of the finest labelmap (or the reference geometry).
    pub fn merge_segment_labelmaps(&mut self, ids: &[&str]) -> Result<(), SegmentationError> {
        self.process_pending_changes();
        if ids.len() > u16::MAX as usize {
            return Err(SegmentationError::InvalidInput(format!(
                "cannot merge {} segments into one labelmap",
                ids.len()
            )));
        }
        for id in ids {
            let segment = self.segment_or_err(id)?;
            if segment.binary_labelmap().is_none() {
                return Err(SegmentationError::IncompatibleRepresentation(format!(
                    "segment '{}' has no labelmap",
                    id
                )));
            }
        }
        if ids.len() < 2 {
            return Ok(());
        }
        for id in ids {
            self.separate_segment_labelmap(id)?;
        }

        let owned: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        let mut merged = match self.determine_common_labelmap_geometry(ExtentComputationMode::UnionOfSegments, &owned) {
            Some(common) => common,
            None => self
                .segment(ids[0])
                .and_then(Segment::binary_labelmap)
                .map(|h| h.borrow().geometry_only())
                .unwrap_or_default(),
        };
        merged.allocate_scalars(ScalarType::U8);

        for (index, id) in ids.iter().enumerate() {
            let Some(segment) = self.segment(id) else {
                continue;
            };
            let Some(handle) = segment.binary_labelmap() else {
                continue;
            };
            let mask = extract_label(&handle.borrow(), segment.label_value());
            if let Some(mask) = mask {
                merge_label(&mut merged, &mask, index as u16 + 1)?;
            }
        }

        let shared = DataHandle::new(merged);
        for (index, id) in ids.iter().enumerate() {
            let segment = self.segment_mut_or_err(id)?;
            segment.add_representation(BINARY_LABELMAP, Representation::BinaryLabelmap(shared.clone()));
            segment.set_label_value(index as u16 + 1);
        }
        debug!("Merged {} segments into one labelmap", ids.len());
        self.rewire_master_observers();
        for id in ids {
            self.emit(SegmentationEvent::RepresentationModified(id.to_string()));
        }
        Ok(())
    }

    /// Reduces the number of labelmap layers.
    ///
    /// With `force` every segment ends up in a single layer. Otherwise a
    /// segment moves into an earlier layer only when the geometries match
    /// and its voxels do not overlap anything already there; segments that
    /// fit nowhere start a new layer.
    pub fn collapse_binary_labelmaps(&mut self, force: bool) -> Result<(), SegmentationError> {
        self.process_pending_changes();
        if force {
            let ids: Vec<String> = self
                .segments()
                .filter(|(_, s)| s.binary_labelmap().is_some())
                .map(|(id, _)| id.to_string())
                .collect();
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            return self.merge_segment_labelmaps(&refs);
        }

        let layers = self.labelmap_layers();
        if layers.len() < 2 {
            return Ok(());
        }

        let label_of = |id: &str| self.segment(id).map(Segment::label_value).unwrap_or(1);
        let first = &layers[0];
        let mut working = vec![Working {
            volume: first.labelmap.borrow().clone(),
            members: first.segment_ids.iter().map(|id| (id.clone(), label_of(id))).collect(),
        }];
        let mut first_changed = false;

        for layer in &layers[1..] {
            for id in &layer.segment_ids {
                let mask = extract_label(&layer.labelmap.borrow(), label_of(id));
                let Some(mask) = mask else {
                    let target = &mut working[0];
                    let label = target.unused_label()?;
                    target.members.push((id.clone(), label));
                    first_changed = true;
                    continue;
                };
                let mut destination = None;
                for (index, candidate) in working.iter().enumerate() {
                    if geometries_match(&candidate.volume, &mask) && !masks_overlap(&candidate.volume, &mask)? {
                        destination = Some(index);
                        break;
                    }
                }
                match destination {
                    Some(index) => {
                        let target = &mut working[index];
                        let label = target.unused_label()?;
                        merge_label(&mut target.volume, &mask, label)?;
                        target.members.push((id.clone(), label));
                        first_changed |= index == 0;
                    }
                    None => working.push(Working {
                        volume: mask,
                        members: vec![(id.clone(), 1)],
                    }),
                }
            }
        }

        let before = layers.len();
        let after = working.len();
        let mut touched = Vec::new();
        for (index, layer) in working.into_iter().enumerate() {
            let handle = if index == 0 {
                if first_changed {
                    first.labelmap.modify_silently(|v| *v = layer.volume);
                }
                first.labelmap.clone()
            } else {
                DataHandle::new(layer.volume)
            };
            for (id, label) in layer.members {
                let segment = self.segment_mut_or_err(&id)?;
                let moved = segment
                    .binary_labelmap()
                    .map_or(true, |h| !h.ptr_eq(&handle));
                segment.add_representation(BINARY_LABELMAP, Representation::BinaryLabelmap(handle.clone()));
                segment.set_label_value(label);
                if moved || (index == 0 && first_changed) {
                    touched.push(id);
                }
            }
        }
        debug!("Collapsed {} labelmap layers into {}", before, after);
        self.rewire_master_observers();
        for id in touched {
            self.emit(SegmentationEvent::RepresentationModified(id));
        }
        Ok(())
    }

    /// Copy of a segment that owns all its objects; a shared labelmap is
    /// reduced to the segment's own voxels with label value 1.
    pub(super) fn standalone_segment_copy(&self, id: &str) -> Result<Segment, SegmentationError> {
        let segment = self.segment_or_err(id)?;
        let mut copy = segment.deep_copy();
        if self.is_labelmap_shared(id) {
            if let Some(handle) = segment.binary_labelmap() {
                let volume = handle.borrow();
                let own = extract_label(&volume, segment.label_value()).unwrap_or_else(|| {
                    let mut empty = volume.geometry_only();
                    empty.set_extent(Extent::EMPTY);
                    empty
                });
                copy.add_representation(BINARY_LABELMAP, Representation::binary_labelmap(own));
                copy.set_label_value(1);
            }
        }
        Ok(copy)
    }
}
