//! Collection statistics.

use std::time::Duration;

/// Outcome of a single collection cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// 1-based index of this cycle on its heap
    pub cycle: usize,
    /// Objects in the registry when marking began
    pub scanned: usize,
    /// Objects finalized and freed
    pub reclaimed: usize,
    /// Unrooted objects rescued by a concurrent weak upgrade
    pub rescued: usize,
    /// User finalizers that ran (weak slot clearing is not counted)
    pub finalizers_run: usize,
    pub duration: Duration,
}

/// Running totals for a heap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub cycles_completed: usize,
    pub objects_allocated: usize,
    pub objects_reclaimed: usize,
    pub finalizers_run: usize,
    pub total_collection_time: Duration,
}

impl HeapStats {
    pub(crate) fn record_cycle(&mut self, cycle: &CycleStats) {
        self.cycles_completed += 1;
        self.objects_reclaimed += cycle.reclaimed;
        self.finalizers_run += cycle.finalizers_run;
        self.total_collection_time += cycle.duration;
    }

    /// Objects allocated and not yet reclaimed.
    pub fn live_objects(&self) -> usize {
        self.objects_allocated - self.objects_reclaimed
    }
}
