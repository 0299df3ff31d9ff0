//! Phase tracking for collection cycles.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Where the collector currently is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorPhase {
    /// No cycle running
    Idle,
    /// Scanning the registry for unrooted objects
    Marking,
    /// Claiming unrooted objects against concurrent weak upgrades
    Condemning,
    /// Waiting on the finalizer thread
    Finalizing,
    /// Releasing finalized objects
    Sweeping,
}

impl CollectorPhase {
    fn from_usize(value: usize) -> Self {
        match value {
            1 => CollectorPhase::Marking,
            2 => CollectorPhase::Condemning,
            3 => CollectorPhase::Finalizing,
            4 => CollectorPhase::Sweeping,
            _ => CollectorPhase::Idle,
        }
    }
}

/// Atomic cell holding a [`CollectorPhase`].
pub(crate) struct PhaseCell(AtomicUsize);

impl PhaseCell {
    pub(crate) fn new() -> Self {
        Self(AtomicUsize::new(CollectorPhase::Idle as usize))
    }

    pub(crate) fn get(&self) -> CollectorPhase {
        CollectorPhase::from_usize(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, phase: CollectorPhase) {
        self.0.store(phase as usize, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_round_trip_through_the_cell() {
        let cell = PhaseCell::new();
        assert_eq!(cell.get(), CollectorPhase::Idle);

        for phase in [
            CollectorPhase::Marking,
            CollectorPhase::Condemning,
            CollectorPhase::Finalizing,
            CollectorPhase::Sweeping,
            CollectorPhase::Idle,
        ] {
            cell.set(phase);
            assert_eq!(cell.get(), phase);
        }
    }
}
