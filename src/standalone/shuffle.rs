//! Shuffle: gather each partition's pairs from every map task and group them
//! by key.

use bytes::Bytes;
use itertools::Itertools;

use crate::KeyValue;

/// All values for one key within one partition, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub key: Bytes,
    pub values: Vec<Bytes>,
}

/// Concatenate bucket `p` of every map task into partition `p`.
///
/// Map outputs are taken in map-task order, so rebuilding a partition from
/// the same map outputs always yields the same sequence.
pub fn collect_partitions(map_outputs: Vec<Vec<Vec<KeyValue>>>, num_partitions: u32) -> Vec<Vec<KeyValue>> {
    let mut partitions: Vec<Vec<KeyValue>> = vec![Vec::new(); num_partitions as usize];
    for buckets in map_outputs {
        for (partition, mut bucket) in buckets.into_iter().enumerate() {
            partitions[partition].append(&mut bucket);
        }
    }
    partitions
}

/// Sort `pairs` by key and coalesce runs of equal keys into [`Group`]s.
///
/// The sort is stable, so values of a key keep the order they arrived in.
/// Only strictly consecutive equal keys are merged.
pub fn group(mut pairs: Vec<KeyValue>) -> Vec<Group> {
    pairs.sort_by(|a, b| a.key.cmp(&b.key));

    let mut groups = Vec::new();
    for (key, value_group) in &pairs.into_iter().chunk_by(KeyValue::key) {
        groups.push(Group {
            key,
            values: value_group.map(KeyValue::into_value).collect(),
        });
    }
    groups
}
