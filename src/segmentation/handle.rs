//! Shared, observable data objects.
//!
//! A [`DataHandle`] is a reference-counted cell around a representation
//! object (a mesh or a labelmap). Cloning a handle aliases the same object,
//! which is how several segments share one labelmap layer. Every mutation
//! through [`DataHandle::modify`] advances the object's modification time
//! and posts the object id to each attached [`ChangeBus`], which tells the
//! owning segmentation's listeners right away.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use super::events::{Listeners, SegmentationEvent};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);
static MODIFICATION_CLOCK: AtomicU64 = AtomicU64::new(1);

fn tick() -> u64 {
    MODIFICATION_CLOCK.fetch_add(1, Ordering::Relaxed)
}

/// Queue of "object changed" notices that a segmentation drains.
///
/// Posting also raises [`SegmentationEvent::MasterRepresentationModified`]
/// on the listeners shared with the segmentation.
#[derive(Debug)]
pub struct ChangeBus {
    pending: RefCell<Vec<u64>>,
    master_name: RefCell<String>,
    enabled: Cell<bool>,
    listeners: Rc<RefCell<Listeners>>,
}

impl ChangeBus {
    pub(crate) fn new(master_name: &str, listeners: Rc<RefCell<Listeners>>) -> Rc<Self> {
        Rc::new(Self {
            pending: RefCell::new(Vec::new()),
            master_name: RefCell::new(master_name.to_string()),
            enabled: Cell::new(true),
            listeners,
        })
    }

    fn post(&self, object_id: u64) {
        if !self.enabled.get() {
            return;
        }
        {
            let mut pending = self.pending.borrow_mut();
            if !pending.contains(&object_id) {
                pending.push(object_id);
            }
        }
        // A listener that edits a master object itself cannot be re-entered.
        match self.listeners.try_borrow_mut() {
            Ok(mut listeners) => listeners.emit(&SegmentationEvent::MasterRepresentationModified),
            Err(_) => debug!("Master object {} modified from inside a listener", object_id),
        }
    }

    pub(crate) fn take_pending(&self) -> Vec<u64> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.borrow().is_empty()
    }

    pub(crate) fn set_master_name(&self, name: &str) {
        *self.master_name.borrow_mut() = name.to_string();
    }

    pub(crate) fn set_enabled(&self, enabled: bool) -> bool {
        let previous = self.enabled.replace(enabled);
        if !enabled {
            self.pending.borrow_mut().clear();
        }
        previous
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    /// True when `name` is a derived representation that a pending master
    /// change has already made stale.
    pub(crate) fn hides(&self, name: &str) -> bool {
        self.has_pending() && *self.master_name.borrow() != name
    }
}

struct DataCell<T> {
    id: u64,
    data: RefCell<T>,
    mtime: Cell<u64>,
    observers: RefCell<Vec<Weak<ChangeBus>>>,
}

/// Shared handle to an observable representation object.
pub struct DataHandle<T> {
    inner: Rc<DataCell<T>>,
}

impl<T> Clone for DataHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for DataHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataHandle")
            .field("id", &self.inner.id)
            .field("mtime", &self.inner.mtime.get())
            .field("data", &self.inner.data.borrow())
            .finish()
    }
}

impl<T> DataHandle<T> {
    pub fn new(data: T) -> Self {
        Self {
            inner: Rc::new(DataCell {
                id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
                data: RefCell::new(data),
                mtime: Cell::new(tick()),
                observers: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Identity of the underlying object; equal for aliases.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn ptr_eq(&self, other: &DataHandle<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of handles aliasing this object.
    pub fn alias_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.inner.data.borrow()
    }

    pub fn mtime(&self) -> u64 {
        self.inner.mtime.get()
    }

    /// Mutates the object and notifies observers.
    pub fn modify<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = self.modify_silently(f);
        let observers: Vec<Rc<ChangeBus>> = self
            .inner
            .observers
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for bus in observers {
            bus.post(self.inner.id);
        }
        result
    }

    /// Mutates the object without notifying observers.
    ///
    /// Used for edits that keep every segment's shape intact, such as
    /// moving a segment between labelmap layers.
    pub fn modify_silently<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = {
            let mut data = self.inner.data.borrow_mut();
            f(&mut *data)
        };
        self.inner.mtime.set(tick());
        result
    }

    pub(crate) fn attach(&self, bus: &Rc<ChangeBus>) {
        let mut observers = self.inner.observers.borrow_mut();
        observers.retain(|w| w.strong_count() > 0);
        if !observers
            .iter()
            .any(|w| w.upgrade().is_some_and(|b| Rc::ptr_eq(&b, bus)))
        {
            observers.push(Rc::downgrade(bus));
        }
    }

    pub(crate) fn detach(&self, bus: &Rc<ChangeBus>) {
        self.inner
            .observers
            .borrow_mut()
            .retain(|w| w.upgrade().is_some_and(|b| !Rc::ptr_eq(&b, bus)));
    }

    pub(crate) fn is_observed_by(&self, bus: &Rc<ChangeBus>) -> bool {
        self.inner
            .observers
            .borrow()
            .iter()
            .any(|w| w.upgrade().is_some_and(|b| Rc::ptr_eq(&b, bus)))
    }
}

impl<T: Clone> DataHandle<T> {
    /// Copies the object into a new, unobserved handle.
    pub fn deep_copy(&self) -> Self {
        Self::new(self.inner.data.borrow().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_alias_and_deep_copies_do_not() {
        let a = DataHandle::new(vec![1, 2, 3]);
        let b = a.clone();
        let c = a.deep_copy();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.id(), b.id());
        assert!(!a.ptr_eq(&c));
        b.modify(|v| v.push(4));
        assert_eq!(a.borrow().len(), 4);
        assert_eq!(c.borrow().len(), 3);
    }

    #[test]
    fn modify_posts_to_attached_buses_only() {
        let bus = ChangeBus::new("Binary labelmap", Rc::default());
        let handle = DataHandle::new(0u32);
        let before = handle.mtime();

        handle.modify(|v| *v += 1);
        assert!(!bus.has_pending());
        assert!(handle.mtime() > before);

        handle.attach(&bus);
        handle.attach(&bus);
        assert!(handle.is_observed_by(&bus));
        handle.modify(|v| *v += 1);
        handle.modify(|v| *v += 1);
        assert_eq!(bus.take_pending(), vec![handle.id()]);

        handle.modify_silently(|v| *v += 1);
        assert!(!bus.has_pending());

        handle.detach(&bus);
        handle.modify(|v| *v += 1);
        assert!(!bus.has_pending());
    }

    #[test]
    fn posting_notifies_shared_listeners() {
        let listeners: Rc<RefCell<Listeners>> = Rc::default();
        let seen = Rc::new(Cell::new(0));
        let sink = Rc::clone(&seen);
        listeners.borrow_mut().add(Box::new(move |e| {
            if *e == SegmentationEvent::MasterRepresentationModified {
                sink.set(sink.get() + 1);
            }
        }));
        let bus = ChangeBus::new("Closed surface", Rc::clone(&listeners));
        let handle = DataHandle::new(0u8);
        handle.attach(&bus);

        handle.modify(|v| *v = 1);
        assert_eq!(seen.get(), 1);
        handle.modify(|v| *v = 2);
        assert_eq!(seen.get(), 2);
        assert_eq!(bus.take_pending(), vec![handle.id()]);

        bus.set_enabled(false);
        handle.modify(|v| *v = 3);
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn disabled_bus_ignores_notices() {
        let bus = ChangeBus::new("Closed surface", Rc::default());
        let handle = DataHandle::new(());
        handle.attach(&bus);
        assert!(bus.set_enabled(false));
        handle.modify(|_| ());
        assert!(!bus.has_pending());
        assert!(!bus.hides("Binary labelmap"));
        bus.set_enabled(true);
        handle.modify(|_| ());
        assert!(bus.hides("Binary labelmap"));
        assert!(!bus.hides("Closed surface"));
    }
}
