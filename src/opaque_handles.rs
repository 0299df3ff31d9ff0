//! Opaque object addresses that no collector scan recognizes as references.
//!
//! A weak slot must not look like a pointer to anything that walks memory in
//! search of roots, so it stores the bitwise complement of the object address.
//! Zero stays reserved for "no target".

use std::ptr::NonNull;

/// Complemented address of a managed object.
///
/// # Examples
///
/// ```
/// use weakgc::OpaqueAddress;
///
/// let value = 7u64;
/// let addr = &value as *const u64 as usize;
///
/// let opaque = OpaqueAddress::encode(addr).unwrap();
/// assert_ne!(opaque.bits(), addr);
/// assert_eq!(opaque.decode(), addr);
///
/// // The null address has no encoding.
/// assert!(OpaqueAddress::encode(0).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpaqueAddress(usize);

impl OpaqueAddress {
    /// Encode a non-null address. Returns `None` for null, which has no
    /// encoding distinct from the empty slot.
    pub fn encode(addr: usize) -> Option<Self> {
        if addr == 0 {
            return None;
        }
        let bits = !addr;
        // An all-ones address would complement to the empty marker.
        (bits != 0).then_some(Self(bits))
    }

    /// Encode the address `ptr` points to; `None` only for the all-ones
    /// address.
    pub fn from_ptr<T>(ptr: NonNull<T>) -> Option<Self> {
        Self::encode(ptr.as_ptr() as usize)
    }

    /// Encode the address of an aligned object, which can be neither null
    /// nor all ones.
    pub(crate) fn hide<T>(ptr: NonNull<T>) -> Self {
        debug_assert!(std::mem::align_of::<T>() > 1);
        Self(!(ptr.as_ptr() as usize))
    }

    /// Rebuild from a raw slot value; zero means "empty".
    pub fn from_bits(bits: usize) -> Option<Self> {
        (bits != 0).then_some(Self(bits))
    }

    /// The stored bits, as written to a slot. Never zero.
    pub fn bits(self) -> usize {
        self.0
    }

    /// The original address.
    pub fn decode(self) -> usize {
        !self.0
    }

    /// The original address as a typed pointer. The caller decides whether
    /// it may be dereferenced.
    pub fn decode_ptr<T>(self) -> Option<NonNull<T>> {
        NonNull::new(self.decode() as *mut T)
    }
}
