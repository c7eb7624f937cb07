//! Per-device command sequence numbers.

use dashmap::DashMap;

/// Allocates strictly increasing sequence numbers per hostname
///
/// Each counter starts at the seed; the first value handed out is `seed + 1`.
/// Counters wrap at `u32::MAX`. Allocation for one hostname is serialized by
/// the map's shard lock, so concurrent callers never see the same value.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    seed: u32,
    counters: DashMap<String, u32>,
}

impl SequenceAllocator {
    /// Create an allocator whose counters start at `seed`
    pub fn new(seed: u32) -> Self {
        Self {
            seed,
            counters: DashMap::new(),
        }
    }

    /// Read-and-increment the counter for `hostname`
    pub fn next(&self, hostname: &str) -> u32 {
        let mut counter = self.counters.entry(hostname.to_string()).or_insert(self.seed);
        *counter = counter.wrapping_add(1);
        *counter
    }

    /// Last value handed out for `hostname`
    pub fn current(&self, hostname: &str) -> Option<u32> {
        self.counters.get(hostname).map(|c| *c)
    }

    /// Starting value of new counters
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Number of devices with a counter
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether no counter exists yet
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_first_value_is_seed_plus_one() {
        let sequences = SequenceAllocator::new(1000);
        assert_eq!(sequences.current("esg-01"), None);
        assert_eq!(sequences.next("esg-01"), 1001);
        assert_eq!(sequences.next("esg-01"), 1002);
        assert_eq!(sequences.current("esg-01"), Some(1002));
    }

    #[test]
    fn test_counters_are_independent() {
        let sequences = SequenceAllocator::new(0);
        assert_eq!(sequences.next("a"), 1);
        assert_eq!(sequences.next("a"), 2);
        assert_eq!(sequences.next("b"), 1);
        assert_eq!(sequences.len(), 2);
    }

    #[test]
    fn test_wraps_at_max() {
        let sequences = SequenceAllocator::new(u32::MAX - 1);
        assert_eq!(sequences.next("esg-01"), u32::MAX);
        assert_eq!(sequences.next("esg-01"), 0);
        assert_eq!(sequences.next("esg-01"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocation_never_duplicates() {
        let sequences = Arc::new(SequenceAllocator::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let sequences = sequences.clone();
            handles.push(tokio::spawn(async move {
                (0..250).map(|_| sequences.next("esg-busy")).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.await.unwrap() {
                assert!(seen.insert(value), "sequence {} allocated twice", value);
            }
        }
        assert_eq!(seen.len(), 2000);
        assert_eq!(sequences.current("esg-busy"), Some(2000));
    }
}
