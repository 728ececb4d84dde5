//! A MapReduce-compatible implementation of word count.
//!

use crate::*;
use anyhow::Result;
use bytes::{BufMut, Bytes, BytesMut};

/// Emit `(word, 1)` for every whitespace separated token of the line.
pub fn map(record: Record) -> MapOutput {
    let s = utils::string_from_bytes(record)?;
    let words = s.split_whitespace().map(str::to_string).collect::<Vec<_>>();

    let mut key_buf = BytesMut::new();
    let mut value_buf = BytesMut::with_capacity(words.len() * 8);

    let iter = words.into_iter().map(move |word| {
        key_buf.put_slice(word.as_bytes());
        value_buf.put_u64(1);

        let key = key_buf.split().freeze();
        let value = value_buf.split().freeze();

        Ok(KeyValue { key, value })
    });
    Ok(Box::new(iter))
}

pub fn combine(key: &Bytes, values: Values<'_>) -> Result<Bytes> {
    workload::count_combine(key, values)
}

pub fn reduce(key: Bytes, values: Values<'_>) -> ReduceOutput {
    workload::count_reduce(key, values)
}
