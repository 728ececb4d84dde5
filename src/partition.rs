//! Routing of intermediate keys to reduce partitions.

use crate::error::ConfigError;
use crate::ihash;

/// Maps a key to one of `num_partitions` partitions.
///
/// Implementations must be pure functions of `key` and `num_partitions`:
/// every map task, and every retry of a map task, has to send a given key to
/// the same partition, otherwise that key's values end up split across
/// reduce tasks.
pub trait Partitioner: Send + Sync {
    fn partition(&self, key: &[u8], num_partitions: u32) -> u32;
}

/// The default partitioner: `ihash(key) % num_partitions`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashPartitioner;

impl Partitioner for HashPartitioner {
    #[inline]
    fn partition(&self, key: &[u8], num_partitions: u32) -> u32 {
        if num_partitions <= 1 {
            return 0;
        }
        ihash(key) % num_partitions
    }
}

const PROBE_KEYS: &[&str] = &["", "a", "the", "The", "0", "zzzz", "a much longer probe key", "\u{e9}t\u{e9}"];

/// Best-effort check that `partitioner` stays in range and answers the same
/// way twice for a handful of keys.
pub fn validate(partitioner: &dyn Partitioner, num_partitions: u32) -> Result<(), ConfigError> {
    if num_partitions < 1 {
        return Err(ConfigError::InvalidPartitionCount(num_partitions));
    }
    for key in PROBE_KEYS {
        let first = partitioner.partition(key.as_bytes(), num_partitions);
        if first >= num_partitions {
            return Err(ConfigError::PartitionOutOfRange {
                key: key.to_string(),
                partition: first,
                num_partitions,
            });
        }
        if partitioner.partition(key.as_bytes(), num_partitions) != first {
            return Err(ConfigError::NonDeterministicPartitioner {
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn hash_partitioner_is_deterministic_and_in_range() {
        let p = HashPartitioner;
        for n in 1..=16 {
            for key in ["the", "cat", "sat", "", "dog"] {
                let first = p.partition(key.as_bytes(), n);
                assert!(first < n);
                assert_eq!(first, p.partition(key.as_bytes(), n));
            }
        }
    }

    #[test]
    fn single_partition_collapses_to_zero() {
        let p = HashPartitioner;
        for key in ["a", "b", "c", "some line of text"] {
            assert_eq!(p.partition(key.as_bytes(), 1), 0);
        }
    }

    #[test]
    fn validate_rejects_zero_partitions() {
        assert_eq!(
            validate(&HashPartitioner, 0),
            Err(ConfigError::InvalidPartitionCount(0))
        );
        assert_eq!(validate(&HashPartitioner, 4), Ok(()));
    }

    struct Counter(AtomicU32);

    impl Partitioner for Counter {
        fn partition(&self, _key: &[u8], num_partitions: u32) -> u32 {
            self.0.fetch_add(1, Ordering::SeqCst) % num_partitions
        }
    }

    struct Overflow;

    impl Partitioner for Overflow {
        fn partition(&self, _key: &[u8], num_partitions: u32) -> u32 {
            num_partitions
        }
    }

    #[test]
    fn validate_catches_bad_partitioners() {
        assert!(matches!(
            validate(&Counter(AtomicU32::new(0)), 3),
            Err(ConfigError::NonDeterministicPartitioner { .. })
        ));
        assert!(matches!(
            validate(&Overflow, 3),
            Err(ConfigError::PartitionOutOfRange { partition: 3, .. })
        ));
    }
}
