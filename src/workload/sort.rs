//! Sort with tally: every distinct line once, in key order within a
//! partition, with the number of times it occurred.
//!
//! Run it with a single partition to get one globally sorted output.

use crate::*;
use anyhow::Result;
use bytes::Bytes;

/// The whole line is the key. Empty lines are kept.
pub fn map(record: Record) -> MapOutput {
    Ok(Box::new(std::iter::once(Ok(KeyValue {
        key: record,
        value: utils::count_to_bytes(1),
    }))))
}

pub fn combine(key: &Bytes, values: Values<'_>) -> Result<Bytes> {
    workload::count_combine(key, values)
}

pub fn reduce(key: Bytes, values: Values<'_>) -> ReduceOutput {
    workload::count_reduce(key, values)
}
