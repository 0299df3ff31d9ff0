//! Weak handles over a rooted, finalizing managed heap.
//!
//! ```
//! use weakgc::{Gc, Heap};
//!
//! let heap = Heap::new().unwrap();
//! let point = heap.alloc([1, 2, 3]);
//! let weak = Gc::downgrade(&point);
//!
//! assert_eq!(*weak.upgrade().unwrap(), [1, 2, 3]);
//!
//! drop(point);
//! heap.collect().unwrap();
//! assert!(weak.upgrade().is_none());
//! ```

pub mod collector_phase;
pub mod config;
pub mod core;
pub mod error;
mod finalizer;
pub mod heap;
pub mod opaque_handles;
pub mod stats;
pub mod weak;

pub use collector_phase::CollectorPhase;
pub use config::HeapConfig;
pub use crate::core::Gc;
pub use error::{GcError, GcResult};
pub use heap::Heap;
pub use opaque_handles::OpaqueAddress;
pub use stats::{CycleStats, HeapStats};
pub use weak::WeakHandle;
