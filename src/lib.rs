//! A multi-worker MapReduce (lite) engine.
//!
//! Users specify map and reduce functions as a [`Workload`], point it at a
//! [`source::RecordSource`] and submit it to a [`standalone::Engine`]. The
//! engine runs map tasks over the input shards on a bounded worker pool,
//! routes every emitted pair to a partition, groups each partition by key and
//! runs one reduce task per partition. Input can come from local files or
//! from a tagged blob store (see [`storage`]).

use std::hash::Hasher;
use std::sync::Arc;

use bytes::Bytes;

pub mod cmd;
pub mod error;
pub mod partition;
pub mod sink;
pub mod source;
pub mod standalone;
pub mod storage;
pub mod utils;
pub mod workload;

/////////////////////////////////////////////////////////////////////////////
// MapReduce application types
/////////////////////////////////////////////////////////////////////////////

/// A single unit of input. Here, one line of text.
pub type Record = Bytes;

/// The output of an application map function.
///
/// There are 2 layers of [`anyhow::Result`]s here. The outer layer
/// accounts for errors that arise while creating the iterator.
/// The inner layer accounts for errors that occur during iteration.
///
/// This accomodates both batch (all keys emitted at once) and lazy
/// (keys only emitted when the iterator is consumed) map operations.
pub type MapOutput = anyhow::Result<Box<dyn Iterator<Item = anyhow::Result<KeyValue>>>>;

/// The values grouped under one key, in arrival order.
pub type Values<'a> = Box<dyn Iterator<Item = Bytes> + 'a>;

/// The output of an application reduce function: zero or more output records.
pub type ReduceOutput = anyhow::Result<Vec<KeyValue>>;

/// A map function takes one record and returns an iterator over
/// the key-value pairs it emits.
///
/// Map functions are called concurrently on different shards and may be
/// called again on the same record when a task is retried, so they must not
/// depend on shared mutable state.
pub type MapFn = Arc<dyn Fn(Record) -> MapOutput + Send + Sync>;

/// A reduce function takes in a key and an iterator over the values for that
/// key. It returns the output records for that key.
pub type ReduceFn = Arc<dyn for<'a> Fn(Bytes, Values<'a>) -> ReduceOutput + Send + Sync>;

/// A combine function folds the values of one key into a single value.
///
/// It runs at the end of each map task, on that task's output only, so it
/// must be associative and its output must be a valid input value again.
pub type CombineFn = Arc<dyn for<'a> Fn(&Bytes, Values<'a>) -> anyhow::Result<Bytes> + Send + Sync>;

/// A map reduce application.
#[derive(Clone)]
pub struct Workload {
    pub map_fn: MapFn,
    pub reduce_fn: ReduceFn,
    pub combine_fn: Option<CombineFn>,
}

impl Workload {
    /// Build a workload from a map and a reduce function.
    pub fn new<M, R>(map_fn: M, reduce_fn: R) -> Self
    where
        M: Fn(Record) -> MapOutput + Send + Sync + 'static,
        R: for<'a> Fn(Bytes, Values<'a>) -> ReduceOutput + Send + Sync + 'static,
    {
        Self {
            map_fn: Arc::new(map_fn),
            reduce_fn: Arc::new(reduce_fn),
            combine_fn: None,
        }
    }

    /// Attach a map-side combiner.
    pub fn with_combiner<C>(mut self, combine_fn: C) -> Self
    where
        C: for<'a> Fn(&Bytes, Values<'a>) -> anyhow::Result<Bytes> + Send + Sync + 'static,
    {
        self.combine_fn = Some(Arc::new(combine_fn));
        self
    }
}

/////////////////////////////////////////////////////////////////////////////
// Key-value pairs
/////////////////////////////////////////////////////////////////////////////

/// A single key-value pair.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct KeyValue {
    /// The key.
    pub key: Bytes,
    /// The value.
    pub value: Bytes,
}

impl KeyValue {
    /// Construct a new key-value pair from the given key and value.
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Get the key of this key-value pair.
    ///
    /// This method is cheap, since [`Bytes`] are cheaply cloneable.
    #[inline]
    pub fn key(&self) -> Bytes {
        self.key.clone()
    }

    /// Get the value of this key-value pair.
    ///
    /// This method is cheap, since [`Bytes`] are cheaply cloneable.
    #[inline]
    pub fn value(&self) -> Bytes {
        self.value.clone()
    }

    /// Consumes the key-value pair and returns the key.
    #[inline]
    pub fn into_key(self) -> Bytes {
        self.key
    }

    /// Consumes the key-value pair and returns the value.
    #[inline]
    pub fn into_value(self) -> Bytes {
        self.value
    }
}

/// Hashes an intermediate key. Compute a reduce bucket for a given key
/// by calculating `ihash(key) % n_reduce`.
pub fn ihash(key: &[u8]) -> u32 {
    let mut hasher = fnv::FnvHasher::with_key(0);
    hasher.write(key);
    (hasher.finish() & 0x7fffffff) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ihash_is_stable_and_31_bit() {
        for key in [&b""[..], b"the", b"a longer key with spaces"] {
            let h = ihash(key);
            assert_eq!(h, ihash(key));
            assert!(h <= 0x7fffffff);
        }
        assert_ne!(ihash(b"cat"), ihash(b"dog"));
    }

    #[test]
    fn key_value_accessors() {
        let kv = KeyValue::new("word", Bytes::from_static(b"1"));
        assert_eq!(kv.key(), Bytes::from("word"));
        assert_eq!(kv.value(), Bytes::from("1"));
        assert_eq!(kv.clone().into_key(), Bytes::from("word"));
        assert_eq!(kv.into_value(), Bytes::from("1"));
    }
}
