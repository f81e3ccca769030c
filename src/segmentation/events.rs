//! Notifications raised by a [`Segmentation`](super::Segmentation).

use std::fmt;

/// Something observable happened to a segmentation.
///
/// Segment-scoped events carry the segment ID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SegmentationEvent {
    SegmentAdded(String),
    SegmentRemoved(String),
    /// Name, colour, tags or label value changed.
    SegmentModified(String),
    /// A master object changed (or the master name did); derived
    /// representations have been dropped.
    MasterRepresentationModified,
    /// A representation of this segment was created or replaced.
    RepresentationModified(String),
    /// The set of representation names held by the segments changed.
    ContainedRepresentationNamesModified,
    SegmentsOrderModified,
}

impl fmt::Display for SegmentationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentationEvent::SegmentAdded(id) => write!(f, "segment added: {}", id),
            SegmentationEvent::SegmentRemoved(id) => write!(f, "segment removed: {}", id),
            SegmentationEvent::SegmentModified(id) => write!(f, "segment modified: {}", id),
            SegmentationEvent::MasterRepresentationModified => {
                write!(f, "master representation modified")
            }
            SegmentationEvent::RepresentationModified(id) => {
                write!(f, "representation modified: {}", id)
            }
            SegmentationEvent::ContainedRepresentationNamesModified => {
                write!(f, "contained representation names modified")
            }
            SegmentationEvent::SegmentsOrderModified => write!(f, "segments order modified"),
        }
    }
}

/// Token returned by [`Segmentation::subscribe`](super::Segmentation::subscribe).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&SegmentationEvent)>;

/// Ordered list of event callbacks.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: Vec<(SubscriptionId, Listener)>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.len())
            .finish()
    }
}

impl Listeners {
    pub(crate) fn add(&mut self, listener: Listener) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.entries.push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub(crate) fn emit(&mut self, event: &SegmentationEvent) {
        for (_, listener) in &mut self.entries {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn listeners_receive_events_until_removed() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut listeners = Listeners::default();
        let sink = Rc::clone(&seen);
        let id = listeners.add(Box::new(move |e| sink.borrow_mut().push(e.clone())));

        listeners.emit(&SegmentationEvent::SegmentAdded("Segment_1".into()));
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.emit(&SegmentationEvent::SegmentsOrderModified);

        assert_eq!(
            *seen.borrow(),
            vec![SegmentationEvent::SegmentAdded("Segment_1".into())]
        );
    }

    #[test]
    fn display_names_segment() {
        let e = SegmentationEvent::RepresentationModified("liver".into());
        assert_eq!(e.to_string(), "representation modified: liver");
    }
}
