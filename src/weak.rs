//! Weak handles to managed objects.
//!
//! A [`WeakHandle`] never roots its target. Every object has at most one
//! weak slot, shared by all handles to it, holding the object's
//! [`OpaqueAddress`] until the finalizer thread clears it.
//!
//! Readers and the finalizer agree through a pin counter on the slot:
//!
//! - `upgrade` raises `pins`, then loads the slot, roots the object if the
//!   slot was non-zero, then lowers `pins`.
//! - the finalizer stores zero into the slot, then waits for `pins` to drain
//!   before the object may be freed.
//!
//! All four accesses are `SeqCst`, so a reader that saw a non-zero slot is
//! always visible to the finalizer's drain and the header it decodes stays
//! allocated until it is done. Rooting itself fails on a condemned object,
//! so a reader racing the collector gets `None` rather than a dying object.

use std::{
    fmt,
    ptr::NonNull,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crossbeam::utils::Backoff;

use crate::{
    core::{Gc, GcHeader},
    opaque_handles::OpaqueAddress,
};

/// Per-object slot behind every weak handle to that object.
pub(crate) struct WeakSlot {
    /// `OpaqueAddress` bits of the target header, or zero once reclaimed.
    encoded: AtomicUsize,
    /// Readers currently between loading `encoded` and rooting the target.
    pins: AtomicUsize,
}

impl WeakSlot {
    pub(crate) fn new(target: OpaqueAddress) -> Self {
        Self {
            encoded: AtomicUsize::new(target.bits()),
            pins: AtomicUsize::new(0),
        }
    }

    fn load(&self) -> Option<OpaqueAddress> {
        OpaqueAddress::from_bits(self.encoded.load(Ordering::SeqCst))
    }

    fn pin(&self) -> PinGuard<'_> {
        self.pins.fetch_add(1, Ordering::SeqCst);
        PinGuard { slot: self }
    }

    /// Clear the slot and wait until no reader still holds the old address.
    /// Runs on the finalizer thread, exactly once per slot.
    pub(crate) fn invalidate(&self) {
        let previous = self.encoded.swap(0, Ordering::SeqCst);
        debug_assert_ne!(previous, 0, "weak slot invalidated twice");

        let backoff = Backoff::new();
        while self.pins.load(Ordering::SeqCst) != 0 {
            backoff.snooze();
        }
    }

    #[cfg(test)]
    pub(crate) fn pin_count(&self) -> usize {
        self.pins.load(Ordering::SeqCst)
    }
}

struct PinGuard<'a> {
    slot: &'a WeakSlot,
}

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        self.slot.pins.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Turn a slot's address back into a root.
///
/// # Safety
/// The caller must hold a pin on the slot the address was loaded from.
unsafe fn root_target<T: Send + Sync + 'static>(target: OpaqueAddress) -> Option<Gc<T>> {
    let header: NonNull<GcHeader> = target.decode_ptr()?;
    // SAFETY: the pin keeps the finalizer from releasing the header.
    if unsafe { header.as_ref() }.try_root() {
        // SAFETY: the slot was created by a `Gc<T>` and we now own a root.
        Some(unsafe { Gc::from_rooted_header(header) })
    } else {
        None
    }
}

/// A weak reference to a managed object.
///
/// The handle does not keep its target alive. Once the collector reclaims
/// the target, [`is_alive`](Self::is_alive) returns `false` and
/// [`upgrade`](Self::upgrade) returns `None` for the rest of the handle's
/// life.
///
/// # Examples
///
/// ```
/// use weakgc::{Heap, WeakHandle};
///
/// let heap = Heap::new().unwrap();
/// let point = heap.alloc((1, 2, 3));
/// let weak = WeakHandle::new(&point);
///
/// assert!(weak.is_alive());
/// assert_eq!(*weak.upgrade().unwrap(), (1, 2, 3));
///
/// drop(point);
/// heap.collect().unwrap();
///
/// assert!(!weak.is_alive());
/// assert!(weak.upgrade().is_none());
/// ```
pub struct WeakHandle<T> {
    slot: Arc<WeakSlot>,
    decode: unsafe fn(OpaqueAddress) -> Option<Gc<T>>,
}

impl<T: Send + Sync + 'static> WeakHandle<T> {
    /// Create a weak handle to the object `target` roots.
    ///
    /// The first handle to an object registers the finalizer that clears the
    /// object's weak slot; later handles share that slot.
    pub fn new(target: &Gc<T>) -> Self {
        Self {
            slot: target.header().weak_slot(),
            decode: root_target::<T>,
        }
    }
}

impl<T> WeakHandle<T> {
    /// Whether the target has not been reclaimed yet. The answer may be
    /// stale by the time the caller acts on it; use [`upgrade`](Self::upgrade)
    /// to get a root that stays valid.
    pub fn is_alive(&self) -> bool {
        self.slot.load().is_some()
    }

    /// Get a root to the target, or `None` if it has been reclaimed.
    pub fn upgrade(&self) -> Option<Gc<T>> {
        let _pin = self.slot.pin();
        let target = self.slot.load()?;
        // SAFETY: `_pin` is held until the root has been taken.
        unsafe { (self.decode)(target) }
    }

    /// Whether both handles refer to the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<T> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            decode: self.decode,
        }
    }
}

impl<T> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}
