use anyhow::{bail, Result};

use crate::partition::Partitioner;
use crate::source::RecordSource;
use crate::standalone::shuffle::{self, Group};
use crate::*;

/// A map task's output: one bucket of pairs per partition.
pub type Buckets = Vec<Vec<KeyValue>>;

/// Run the map function over every record of `shard` and route each emitted
/// pair to the bucket of its partition.
///
/// If the workload has a combiner, every bucket is grouped and combined
/// before it is returned, so each key appears at most once per bucket.
pub fn perform_map(
    source: &dyn RecordSource,
    shard: usize,
    engine: &Workload,
    partitioner: &dyn Partitioner,
    num_partitions: u32,
) -> Result<Buckets> {
    let mut buckets: Buckets = vec![Vec::new(); num_partitions as usize];
    let map_func = &engine.map_fn;

    for record in source.open(shard)? {
        let record = record?;
        // For each <key, value> pair emitted by the map function, push it into
        // the bucket its key hashes to.
        for item in map_func(record)? {
            let KeyValue { key, value } = item?;
            let bucket_no = partitioner.partition(&key, num_partitions);
            match buckets.get_mut(bucket_no as usize) {
                Some(bucket) => bucket.push(KeyValue { key, value }),
                None => bail!("partitioner sent a key to partition {bucket_no} of {num_partitions}"),
            }
        }
    }

    match &engine.combine_fn {
        Some(combine_func) => buckets
            .into_iter()
            .map(|bucket| combine(bucket, combine_func))
            .collect(),
        None => Ok(buckets),
    }
}

fn combine(bucket: Vec<KeyValue>, combine_func: &CombineFn) -> Result<Vec<KeyValue>> {
    let mut combined = Vec::new();
    for Group { key, values } in shuffle::group(bucket) {
        let value = combine_func(&key, Box::new(values.into_iter()))?;
        combined.push(KeyValue { key, value });
    }
    Ok(combined)
}

/// Group one partition's pairs by key and apply the reduce function to every
/// group, in key order.
pub fn perform_reduce(pairs: Vec<KeyValue>, engine: &Workload) -> Result<Vec<KeyValue>> {
    let reduce_func = &engine.reduce_fn;
    let mut output = Vec::new();
    for Group { key, values } in shuffle::group(pairs) {
        let mut out = reduce_func(key, Box::new(values.into_iter()))?;
        output.append(&mut out);
    }
    Ok(output)
}
