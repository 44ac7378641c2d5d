//! Cluster-unique request id generation
//!
//! Ids are 64 bits: a 16-bit node prefix, 40 bits of wall-clock milliseconds
//! captured at construction, and an 8-bit counter. The suffix is a single
//! atomic, so `next()` is strictly increasing within a process; the node
//! prefix keeps ids from distinct members disjoint for the life of the
//! cluster.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const TS_BITS: u32 = 40;
const CNT_BITS: u32 = 8;
const SUFFIX_BITS: u32 = TS_BITS + CNT_BITS;

fn low_bits(value: u64, bits: u32) -> u64 {
    value & (u64::MAX >> (64 - bits))
}

/// Monotonic generator of cluster-unique 64-bit request ids.
pub struct RequestIdGenerator {
    prefix: u64,
    suffix: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new(member_id: u16, now: SystemTime) -> Self {
        let millis = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            prefix: (member_id as u64) << SUFFIX_BITS,
            suffix: AtomicU64::new(low_bits(millis, TS_BITS) << CNT_BITS),
        }
    }

    /// Next id, greater than every id previously returned by this instance.
    pub fn next(&self) -> u64 {
        let suffix = self.suffix.fetch_add(1, Ordering::Relaxed) + 1;
        self.prefix | low_bits(suffix, SUFFIX_BITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_strictly_increase() {
        let gen = RequestIdGenerator::new(7, SystemTime::now());
        let mut last = 0;
        for _ in 0..1000 {
            let id = gen.next();
            assert!(id > last, "ids must be strictly increasing");
            last = id;
        }
    }

    #[test]
    fn test_node_prefix_embedded() {
        let gen = RequestIdGenerator::new(0xBEEF, SystemTime::now());
        let id = gen.next();
        assert_eq!(id >> SUFFIX_BITS, 0xBEEF);
    }

    #[test]
    fn test_distinct_members_never_collide() {
        let now = SystemTime::now();
        let a = RequestIdGenerator::new(1, now);
        let b = RequestIdGenerator::new(2, now);
        for _ in 0..100 {
            assert_ne!(a.next(), b.next());
        }
    }

    #[test]
    fn test_concurrent_next_is_unique() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let gen = Arc::new(RequestIdGenerator::new(3, SystemTime::now()));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let gen = gen.clone();
            handles.push(std::thread::spawn(move || {
                (0..250).map(|_| gen.next()).collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id:#x}");
            }
        }
    }
}
