//! Object model for managed objects: the header every allocation starts
//! with, and the typed root handle `Gc<T>`.

use std::{
    fmt,
    marker::PhantomData,
    ops::Deref,
    ptr::NonNull,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bitflags::bitflags;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::{opaque_handles::OpaqueAddress, weak::WeakSlot};

bitflags! {
    /// Flag bits stored above the root count in [`GcHeader`]'s state word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct ObjectFlags: usize {
        /// Selected for reclamation; can no longer be rooted.
        const CONDEMNED = 1 << (usize::BITS - 1);
    }
}

const ROOT_MASK: usize = !ObjectFlags::all().bits();

/// Work attached to an object and run on the finalizer thread once the
/// object has been condemned.
pub(crate) enum Finalizer {
    /// Invalidate the object's weak slot.
    ClearWeak(Arc<WeakSlot>),
    /// Caller supplied callback. It never sees the object itself.
    User(Box<dyn FnOnce() + Send + 'static>),
}

/// Header shared by every managed object. It is the first field of the
/// allocation so a header pointer and an object pointer coincide.
#[repr(C)]
pub(crate) struct GcHeader {
    /// Root count in the low bits, [`ObjectFlags`] in the high bits.
    state: AtomicUsize,
    weak_slot: OnceCell<Arc<WeakSlot>>,
    finalizers: Mutex<Vec<Finalizer>>,
    drop_fn: unsafe fn(NonNull<GcHeader>),
}

impl GcHeader {
    fn new(drop_fn: unsafe fn(NonNull<GcHeader>)) -> Self {
        Self {
            // Born with the root handed back by the allocator.
            state: AtomicUsize::new(1),
            weak_slot: OnceCell::new(),
            finalizers: Mutex::new(Vec::new()),
            drop_fn,
        }
    }

    pub(crate) fn root_count(&self) -> usize {
        self.state.load(Ordering::Acquire) & ROOT_MASK
    }

    pub(crate) fn flags(&self) -> ObjectFlags {
        ObjectFlags::from_bits_truncate(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_condemned(&self) -> bool {
        self.flags().contains(ObjectFlags::CONDEMNED)
    }

    /// Add a root on behalf of an existing one.
    fn root(&self) {
        let previous = self.state.fetch_add(1, Ordering::Relaxed);
        if previous & ROOT_MASK == ROOT_MASK {
            // Overflowing into the flag bits would forge a condemnation.
            std::process::abort();
        }
    }

    fn unroot(&self) {
        let previous = self.state.fetch_sub(1, Ordering::Release);
        debug_assert!(previous & ROOT_MASK > 0, "unrooting an unrooted object");
    }

    /// Add a root without holding one. Fails once the collector has
    /// condemned the object.
    pub(crate) fn try_root(&self) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if current & ObjectFlags::CONDEMNED.bits() != 0 {
                return false;
            }
            if current & ROOT_MASK == ROOT_MASK {
                std::process::abort();
            }
            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Mark an unrooted object for reclamation. Fails if a root exists or a
    /// weak upgrade got there first.
    pub(crate) fn try_condemn(&self) -> bool {
        self.state
            .compare_exchange(
                0,
                ObjectFlags::CONDEMNED.bits(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// The object's weak slot, created on first use together with the
    /// finalizer that clears it.
    pub(crate) fn weak_slot(&self) -> Arc<WeakSlot> {
        Arc::clone(self.weak_slot.get_or_init(|| {
            let slot = Arc::new(WeakSlot::new(OpaqueAddress::hide(NonNull::from(self))));
            self.finalizers
                .lock()
                .push(Finalizer::ClearWeak(Arc::clone(&slot)));
            slot
        }))
    }

    pub(crate) fn push_finalizer(&self, finalizer: Box<dyn FnOnce() + Send + 'static>) {
        self.finalizers.lock().push(Finalizer::User(finalizer));
    }

    pub(crate) fn take_finalizers(&self) -> Vec<Finalizer> {
        std::mem::take(&mut *self.finalizers.lock())
    }

    #[cfg(test)]
    pub(crate) fn finalizer_count(&self) -> usize {
        self.finalizers.lock().len()
    }
}

/// Managed allocation: header followed by the value.
#[repr(C)]
struct GcBox<T> {
    header: GcHeader,
    value: T,
}

unsafe fn drop_box<T>(header: NonNull<GcHeader>) {
    // SAFETY: `header` came from the `Box<GcBox<T>>` leaked in `Gc::allocate`
    // and `GcBox` is `repr(C)` with the header first.
    drop(unsafe { Box::from_raw(header.cast::<GcBox<T>>().as_ptr()) });
}

/// Pointer to a managed object that can cross to the finalizer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SendPtr(NonNull<GcHeader>);

// SAFETY: headers are only touched through atomics and locks, and every
// managed value is `Send + Sync`.
unsafe impl Send for SendPtr {}
unsafe impl Sync for SendPtr {}

impl SendPtr {
    /// # Safety
    /// The object must not have been freed.
    pub(crate) unsafe fn header<'a>(self) -> &'a GcHeader {
        unsafe { self.0.as_ref() }
    }

    /// Free the object.
    ///
    /// # Safety
    /// The object must be condemned, finalized, and not yet freed.
    pub(crate) unsafe fn free(self) {
        unsafe {
            let drop_fn = self.header().drop_fn;
            drop_fn(self.0);
        }
    }
}

/// A root to a managed object.
///
/// While any `Gc<T>` to an object exists the collector will not condemn it.
/// Cloning adds a root, dropping removes one.
pub struct Gc<T> {
    ptr: NonNull<GcBox<T>>,
    _marker: PhantomData<GcBox<T>>,
}

// SAFETY: the value is shared across threads through `&T` only and may be
// dropped on the collecting thread.
unsafe impl<T: Send + Sync> Send for Gc<T> {}
unsafe impl<T: Send + Sync> Sync for Gc<T> {}

impl<T: Send + Sync + 'static> Gc<T> {
    /// Allocate outside of any heap registry. Only [`crate::Heap::alloc`]
    /// calls this.
    pub(crate) fn allocate(value: T) -> Self {
        let boxed = Box::new(GcBox {
            header: GcHeader::new(drop_box::<T>),
            value,
        });
        Self {
            ptr: NonNull::from(Box::leak(boxed)),
            _marker: PhantomData,
        }
    }

    /// Rebuild a root from a header whose root count was already raised.
    ///
    /// # Safety
    /// `header` must belong to a live `GcBox<T>` and the caller must own one
    /// root on it.
    pub(crate) unsafe fn from_rooted_header(header: NonNull<GcHeader>) -> Self {
        Self {
            ptr: header.cast(),
            _marker: PhantomData,
        }
    }

    /// Create a weak handle to this object.
    pub fn downgrade(this: &Self) -> crate::WeakHandle<T> {
        crate::WeakHandle::new(this)
    }
}

impl<T> Gc<T> {
    pub(crate) fn header(&self) -> &GcHeader {
        // SAFETY: a rooted object is never freed.
        unsafe { &self.ptr.as_ref().header }
    }

    pub(crate) fn send_ptr(&self) -> SendPtr {
        SendPtr(self.ptr.cast())
    }

    pub fn as_ptr(this: &Self) -> *const T {
        // SAFETY: the allocation is live while rooted.
        unsafe { std::ptr::addr_of!((*this.ptr.as_ptr()).value) }
    }

    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    pub fn root_count(this: &Self) -> usize {
        this.header().root_count()
    }

    /// Register a callback to run on the finalizer thread after the object
    /// becomes unreachable and before its memory is released. The callback
    /// does not receive the object, so it cannot resurrect it.
    pub fn on_finalize<F>(this: &Self, finalizer: F)
    where
        F: FnOnce() + Send + 'static,
    {
        this.header().push_finalizer(Box::new(finalizer));
    }
}

impl<T> Clone for Gc<T> {
    fn clone(&self) -> Self {
        self.header().root();
        Self {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Gc<T> {
    fn drop(&mut self) {
        self.header().unroot();
    }
}

impl<T> Deref for Gc<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the allocation is live while rooted.
        unsafe { &self.ptr.as_ref().value }
    }
}

impl<T: PartialEq> PartialEq for Gc<T> {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl<T: Eq> Eq for Gc<T> {}

impl<T: fmt::Debug> fmt::Debug for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Gc").field(&**self).finish()
    }
}

impl<T: fmt::Display> fmt::Display for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}
