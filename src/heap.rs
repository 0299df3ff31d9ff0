//! The managed heap and its collector.
//!
//! An object is reachable while at least one [`Gc`] root to it exists. A
//! cycle scans the registry for unrooted objects, condemns them, hands them
//! to the finalizer thread and frees them once finalized.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::atomic::{AtomicUsize, Ordering},
    thread::{self, ThreadId},
    time::Instant,
};

use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::{
    collector_phase::{CollectorPhase, PhaseCell},
    config::HeapConfig,
    core::{Gc, SendPtr},
    error::{GcError, GcResult},
    finalizer::FinalizerThread,
    stats::{CycleStats, HeapStats},
};

/// A heap of managed objects with a dedicated finalizer thread.
///
/// `Heap` is `Send + Sync`; share it behind an `Arc` to allocate and collect
/// from several threads.
///
/// # Examples
///
/// ```
/// use weakgc::{CollectorPhase, Heap};
///
/// let heap = Heap::new().unwrap();
/// let kept = heap.alloc(String::from("kept"));
/// drop(heap.alloc(String::from("garbage")));
///
/// let cycle = heap.collect().unwrap();
/// assert_eq!(cycle.scanned, 2);
/// assert_eq!(cycle.reclaimed, 1);
/// assert_eq!(heap.live_objects(), 1);
/// assert_eq!(heap.phase(), CollectorPhase::Idle);
/// assert_eq!(*kept, "kept");
/// ```
pub struct Heap {
    config: HeapConfig,
    objects: Mutex<Vec<SendPtr>>,
    /// Serializes cycles.
    cycle_lock: Mutex<()>,
    /// Thread running the current cycle, set while `cycle_lock` is held.
    cycle_owner: Mutex<Option<ThreadId>>,
    phase: PhaseCell,
    allocations_since_cycle: AtomicUsize,
    stats: Mutex<HeapStats>,
    finalizer: FinalizerThread,
}

impl Heap {
    pub fn new() -> GcResult<Self> {
        Self::with_config(HeapConfig::default())
    }

    pub fn with_config(config: HeapConfig) -> GcResult<Self> {
        let finalizer = FinalizerThread::spawn(&config.finalizer_thread_name)?;
        Ok(Self {
            config,
            objects: Mutex::new(Vec::new()),
            cycle_lock: Mutex::new(()),
            cycle_owner: Mutex::new(None),
            phase: PhaseCell::new(),
            allocations_since_cycle: AtomicUsize::new(0),
            stats: Mutex::new(HeapStats::default()),
            finalizer,
        })
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Move `value` into the heap and return the first root to it.
    ///
    /// When the configured threshold of allocations has been reached a cycle
    /// runs first, unless this thread is already inside one (a finalizer, or
    /// a `Drop` run by the sweep). A failing cycle is logged; allocation
    /// still succeeds.
    pub fn alloc<T: Send + Sync + 'static>(&self, value: T) -> Gc<T> {
        if let Some(threshold) = self.config.collection_threshold {
            let count = self.allocations_since_cycle.fetch_add(1, Ordering::Relaxed) + 1;
            if count >= threshold && !self.in_cycle() {
                if let Err(err) = self.collect() {
                    warn!("threshold collection failed: {err}");
                }
            }
        }

        let gc = Gc::allocate(value);
        self.objects.lock().push(gc.send_ptr());
        self.stats.lock().objects_allocated += 1;
        gc
    }

    /// Run a full cycle and wait for it, finalizers included.
    ///
    /// # Errors
    ///
    /// [`GcError::ReentrantCollection`] when called from a finalizer or from
    /// a `Drop` run while sweeping, and
    /// [`GcError::FinalizerThreadLost`] if the finalizer thread is gone. In
    /// the latter case the condemned objects are leaked rather than freed
    /// unfinalized.
    pub fn collect(&self) -> GcResult<CycleStats> {
        if self.in_cycle() {
            return Err(GcError::ReentrantCollection);
        }

        let _cycle = self.cycle_lock.lock();
        *self.cycle_owner.lock() = Some(thread::current().id());
        self.allocations_since_cycle.store(0, Ordering::Relaxed);
        let result = self.run_cycle();
        self.phase.set(CollectorPhase::Idle);
        *self.cycle_owner.lock() = None;

        if let Ok(cycle) = &result {
            debug!(
                "cycle {} scanned {} reclaimed {} rescued {} in {:?}",
                cycle.cycle, cycle.scanned, cycle.reclaimed, cycle.rescued, cycle.duration
            );
        }
        result
    }

    /// Whether the calling thread is the finalizer thread or is running a
    /// cycle further up its stack. `cycle_lock` is not reentrant.
    fn in_cycle(&self) -> bool {
        self.finalizer.is_current() || *self.cycle_owner.lock() == Some(thread::current().id())
    }

    fn run_cycle(&self) -> GcResult<CycleStats> {
        let start = Instant::now();
        let mut cycle = CycleStats {
            cycle: self.stats.lock().cycles_completed + 1,
            ..CycleStats::default()
        };

        let condemned = {
            let mut objects = self.objects.lock();
            cycle.scanned = objects.len();

            self.phase.set(CollectorPhase::Marking);
            let unrooted = mark(&objects);

            self.phase.set(CollectorPhase::Condemning);
            condemn(&mut objects, &unrooted, &mut cycle)
        };

        if !condemned.is_empty() {
            self.phase.set(CollectorPhase::Finalizing);
            let finished = self.finalizer.submit(condemned.clone())?;
            cycle.finalizers_run = finished
                .recv()
                .map_err(|_| GcError::FinalizerThreadLost)?;

            self.phase.set(CollectorPhase::Sweeping);
            for object in &condemned {
                // SAFETY: condemned, finalized and unregistered; nothing can
                // reach it any more.
                if catch_unwind(AssertUnwindSafe(|| unsafe { object.free() })).is_err() {
                    error!("drop of a reclaimed object panicked");
                }
            }
            cycle.reclaimed = condemned.len();
        }

        cycle.duration = start.elapsed();
        self.stats.lock().record_cycle(&cycle);
        Ok(cycle)
    }

    pub fn phase(&self) -> CollectorPhase {
        self.phase.get()
    }

    /// Objects currently registered, rooted or not.
    pub fn live_objects(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn stats(&self) -> HeapStats {
        self.stats.lock().clone()
    }
}

/// Indices of registered objects without roots, in ascending order.
fn mark(objects: &[SendPtr]) -> Vec<usize> {
    objects
        .iter()
        .enumerate()
        // SAFETY: registered objects are allocated until swept.
        .filter(|(_, object)| unsafe { object.header() }.root_count() == 0)
        .map(|(index, _)| index)
        .collect()
}

/// Condemn the marked objects and unregister them. An object rooted through
/// a weak handle since marking survives and counts as rescued.
fn condemn(
    objects: &mut Vec<SendPtr>,
    unrooted: &[usize],
    cycle: &mut CycleStats,
) -> Vec<SendPtr> {
    let mut condemned = Vec::with_capacity(unrooted.len());
    // Highest index first, so `swap_remove` only moves visited entries.
    for &index in unrooted.iter().rev() {
        // SAFETY: registered objects are allocated until swept.
        if unsafe { objects[index].header() }.try_condemn() {
            condemned.push(objects.swap_remove(index));
        } else {
            cycle.rescued += 1;
        }
    }
    condemned
}

impl Drop for Heap {
    fn drop(&mut self) {
        if let Err(err) = self.collect() {
            warn!("final collection failed: {err}");
        }
        let leaked = self.objects.get_mut().len();
        if leaked > 0 {
            warn!("{leaked} rooted objects outlive their heap and are leaked");
        }
        self.finalizer.shutdown();
    }
}
