//! Converts MapReduce application names to actual application code.
//!
//! # Example
//!
//! To get the word count application:
//! ```
//! # use anyhow::Result;
//! // This is the correct import to use if you are outside the crate:
//! use mrlite::workload;
//! // Since you will be working within the `mrlite` crate,
//! // you should write `use crate::workload;` instead.
//! # fn main() -> Result<()> {
//! let wc = workload::named("wc")?;
//! # Ok(())
//! # }
//! ```

use crate::utils::{count_from_bytes, count_to_bytes};
use crate::{KeyValue, ReduceOutput, Values, Workload};
use anyhow::{bail, Result};
use bytes::Bytes;

pub mod sort;
pub mod wc;

/// Gets the [`Workload`] named `name`.
///
/// Returns [`None`] if no application with the given name was found.
pub fn try_named(name: &str) -> Option<Workload> {
    match name {
        "wc" | "word-count" => Some(Workload::new(wc::map, wc::reduce).with_combiner(wc::combine)),
        "sort" => Some(Workload::new(sort::map, sort::reduce).with_combiner(sort::combine)),
        _ => None,
    }
}

/// Gets the [`Workload`] named `name`.
///
/// Returns an [`anyhow::Error`] if no application with the given name was found.
pub fn named(name: &str) -> Result<Workload> {
    match try_named(name) {
        Some(app) => Ok(app),
        None => bail!("No app named `{}` found.", name),
    }
}

/// Add up intermediate counts.
pub fn sum_counts(values: Values<'_>) -> Result<u64> {
    let mut total = 0u64;
    for value in values {
        total += count_from_bytes(value)?;
    }
    Ok(total)
}

/// Combiner shared by the counting applications: fold partial counts into one.
pub fn count_combine(_key: &Bytes, values: Values<'_>) -> Result<Bytes> {
    Ok(count_to_bytes(sum_counts(values)?))
}

/// Reducer shared by the counting applications: emit `(key, total)` with the
/// total rendered as a decimal string.
pub fn count_reduce(key: Bytes, values: Values<'_>) -> ReduceOutput {
    let count = sum_counts(values)?;
    Ok(vec![KeyValue {
        key,
        value: Bytes::from(count.to_string()),
    }])
}
