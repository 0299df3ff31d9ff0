//! Heap configuration.

/// Tunables for a [`Heap`](crate::Heap).
///
/// # Examples
///
/// ```
/// use weakgc::HeapConfig;
///
/// let config = HeapConfig::default()
///     .with_collection_threshold(None)
///     .with_finalizer_thread_name("app-finalizer");
///
/// assert_eq!(config.collection_threshold, None);
/// assert_eq!(config.finalizer_thread_name, "app-finalizer");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// Allocations after which `alloc` runs a cycle before allocating.
    /// `None` leaves collection entirely to explicit `collect` calls.
    pub collection_threshold: Option<usize>,
    pub finalizer_thread_name: String,
}

impl HeapConfig {
    pub const DEFAULT_COLLECTION_THRESHOLD: usize = 4096;

    pub fn with_collection_threshold(mut self, threshold: Option<usize>) -> Self {
        self.collection_threshold = threshold.filter(|&n| n > 0);
        self
    }

    pub fn with_finalizer_thread_name(mut self, name: impl Into<String>) -> Self {
        self.finalizer_thread_name = name.into();
        self
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            collection_threshold: Some(Self::DEFAULT_COLLECTION_THRESHOLD),
            finalizer_thread_name: String::from("weakgc-finalizer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_threshold_disables_automatic_collection() {
        let config = HeapConfig::default().with_collection_threshold(Some(0));
        assert_eq!(config.collection_threshold, None);
    }

    #[test]
    fn defaults_collect_automatically() {
        let config = HeapConfig::default();
        assert_eq!(
            config.collection_threshold,
            Some(HeapConfig::DEFAULT_COLLECTION_THRESHOLD)
        );
    }
}
