//! Error taxonomy of the engine.
//!
//! Errors raised by user code (map, reduce and combine functions, record
//! sources) are [`anyhow::Error`]s. The engine wraps them in a [`TaskError`]
//! naming the shard or partition, and reports a job that could not finish as
//! a [`JobError`]. Invalid job specs are rejected with a [`ConfigError`]
//! before any task runs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::standalone::job::{JobId, TaskId};

/// A job spec that cannot be run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The number of partitions must be at least 1.
    InvalidPartitionCount(u32),
    /// More partitions than the engine will allocate buckets for.
    TooManyPartitions { requested: u32, max: u32 },
    /// The worker pool needs at least one slot.
    InvalidConcurrency(usize),
    /// The record source has no shards.
    EmptyInput,
    /// The partitioner returned a partition outside `[0, num_partitions)`.
    PartitionOutOfRange {
        key: String,
        partition: u32,
        num_partitions: u32,
    },
    /// The partitioner returned two different partitions for the same key.
    NonDeterministicPartitioner { key: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPartitionCount(n) => {
                write!(f, "invalid partition count {n}, need at least 1")
            }
            ConfigError::TooManyPartitions { requested, max } => {
                write!(f, "too many partitions {requested}, at most {max} are supported")
            }
            ConfigError::InvalidConcurrency(n) => {
                write!(f, "invalid worker pool size {n}, need at least 1")
            }
            ConfigError::EmptyInput => write!(f, "job has no input shards"),
            ConfigError::PartitionOutOfRange {
                key,
                partition,
                num_partitions,
            } => write!(
                f,
                "partitioner sent key {key:?} to partition {partition} of {num_partitions}"
            ),
            ConfigError::NonDeterministicPartitioner { key } => {
                write!(f, "partitioner is not deterministic for key {key:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// The failure of a single task attempt.
#[derive(Debug)]
pub enum TaskError {
    /// The map function (or the record source) failed on a shard.
    Map { shard: usize, source: anyhow::Error },
    /// The reduce function (or the grouping feeding it) failed on a partition.
    Reduce { partition: u32, source: anyhow::Error },
}

impl TaskError {
    /// The underlying error raised by user code.
    pub fn cause(&self) -> &anyhow::Error {
        match self {
            TaskError::Map { source, .. } | TaskError::Reduce { source, .. } => source,
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Map { shard, source } => write!(f, "map failed on shard {shard}: {source:#}"),
            TaskError::Reduce { partition, source } => {
                write!(f, "reduce failed on partition {partition}: {source:#}")
            }
        }
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let cause: &(dyn std::error::Error + 'static) = self.cause().as_ref();
        Some(cause)
    }
}

/// A task that used up all of its attempts.
#[derive(Debug)]
pub struct TaskFailure {
    pub task: TaskId,
    pub attempts: u32,
    /// The error of the last attempt.
    pub error: TaskError,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] failed after {} attempt(s): {}",
            self.task, self.attempts, self.error
        )
    }
}

/// Why a job stopped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// [`JobHandle::cancel`](crate::standalone::JobHandle::cancel) was called.
    Requested,
    /// The job ran past its configured timeout.
    TimedOut,
}

/// A job that did not produce output.
#[derive(Debug)]
pub enum JobError {
    /// At least one task failed `max_retries + 1` times.
    RetriesExhausted {
        job: JobId,
        failures: Vec<TaskFailure>,
    },
    /// The job was cancelled. In-flight tasks were allowed to finish.
    Cancelled { job: JobId, reason: CancelReason },
    /// The driver itself died. This is an engine bug, not a data problem.
    Internal { job: JobId, message: String },
}

impl JobError {
    pub fn job(&self) -> JobId {
        match self {
            JobError::RetriesExhausted { job, .. }
            | JobError::Cancelled { job, .. }
            | JobError::Internal { job, .. } => *job,
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::RetriesExhausted { job, failures } => {
                write!(f, "job {job} failed")?;
                for failure in failures {
                    write!(f, "; {failure}")?;
                }
                Ok(())
            }
            JobError::Cancelled { job, reason } => match reason {
                CancelReason::Requested => write!(f, "job {job} was cancelled"),
                CancelReason::TimedOut => write!(f, "job {job} timed out"),
            },
            JobError::Internal { job, message } => write!(f, "job {job} crashed: {message}"),
        }
    }
}

impl std::error::Error for JobError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standalone::job::TaskKind;
    use anyhow::anyhow;

    #[test]
    fn failure_names_task_and_attempts() {
        let failure = TaskFailure {
            task: TaskId::new(TaskKind::Map, 2),
            attempts: 4,
            error: TaskError::Map {
                shard: 2,
                source: anyhow!("bad record"),
            },
        };
        assert_eq!(
            failure.to_string(),
            "[map:2] failed after 4 attempt(s): map failed on shard 2: bad record"
        );
        assert_eq!(failure.error.cause().to_string(), "bad record");
    }

    #[test]
    fn config_error_messages() {
        assert_eq!(
            ConfigError::InvalidPartitionCount(0).to_string(),
            "invalid partition count 0, need at least 1"
        );
        assert_eq!(ConfigError::EmptyInput.to_string(), "job has no input shards");
    }
}
