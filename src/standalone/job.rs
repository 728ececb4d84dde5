//! Jobs, tasks and their bookkeeping.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;
use crate::sink::ResultSink;
use crate::KeyValue;

/// Unique id of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

// Only one phase of a job is active at a time; the map -> reduce transition
// is a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Submitted,
    Mapping,
    Shuffling,
    Reducing,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Map,
    Reduce,
}

impl TaskKind {
    pub(crate) fn error(self, index: usize, source: anyhow::Error) -> TaskError {
        match self {
            TaskKind::Map => TaskError::Map {
                shard: index,
                source,
            },
            TaskKind::Reduce => TaskError::Reduce {
                partition: index as u32,
                source,
            },
        }
    }
}

/// A task is identified by its phase and its shard (map) or partition
/// (reduce) number. Displays as `map:3` or `reduce:0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    pub kind: TaskKind,
    pub index: usize,
}

impl TaskId {
    pub fn new(kind: TaskKind, index: usize) -> Self {
        Self { kind, index }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TaskKind::Map => write!(f, "map:{}", self.index),
            TaskKind::Reduce => write!(f, "reduce:{}", self.index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

/////////////////////////////////////////////////////////////////////////////
// Configuration
/////////////////////////////////////////////////////////////////////////////

/// Settings of the worker pool shared by every job an engine runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of tasks running at once.
    pub concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Every map task allocates one bucket per partition.
pub const MAX_PARTITIONS: u32 = 1 << 16;

/// Per-job settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Number of reduce partitions. `1` yields a single, globally sorted
    /// reduce task.
    pub num_partitions: u32,
    /// How many times a failed task is re-run before the job fails.
    pub max_retries: u32,
    /// Cancel the job if it has not finished after this long.
    pub timeout: Option<Duration>,
    /// Probe the partitioner for determinism on submission.
    pub validate_partitioner: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            num_partitions: 1,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: None,
            validate_partitioner: true,
        }
    }
}

impl JobConfig {
    /// Attempts a task gets before it counts as exhausted.
    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/////////////////////////////////////////////////////////////////////////////
// Results
/////////////////////////////////////////////////////////////////////////////

/// Timing of one task that succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub task: TaskId,
    /// Attempts it took, including the successful one.
    pub attempts: u32,
    /// Wall time of the successful attempt.
    pub elapsed: Duration,
}

/// Timings of a finished job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    pub map_tasks: usize,
    pub reduce_tasks: usize,
    pub map_elapsed: Duration,
    pub shuffle_elapsed: Duration,
    pub reduce_elapsed: Duration,
    pub total_elapsed: Duration,
    pub tasks: Vec<TaskReport>,
}

impl JobStats {
    /// Task attempts beyond the first, over the whole job.
    pub fn retries(&self) -> u32 {
        self.tasks.iter().map(|t| t.attempts.saturating_sub(1)).sum()
    }
}

/// The output of a job that succeeded.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub job: JobId,
    pub name: String,
    /// Reduce outputs of every partition. Partitions finish in any order, so
    /// the order across partitions is unspecified.
    pub records: Vec<KeyValue>,
    pub stats: JobStats,
}

impl JobOutput {
    /// Hand every output record to `sink`.
    pub fn emit_to<S: ResultSink + ?Sized>(&self, sink: &mut S) -> anyhow::Result<()> {
        for kv in &self.records {
            sink.emit(&kv.key, &kv.value)?;
        }
        Ok(())
    }

    pub fn into_records(self) -> Vec<KeyValue> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_display_like_scheduler_events() {
        assert_eq!(TaskId::new(TaskKind::Map, 0).to_string(), "map:0");
        assert_eq!(TaskId::new(TaskKind::Reduce, 7).to_string(), "reduce:7");
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Submitted.is_terminal());
        assert!(!JobStatus::Reducing.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert_eq!(
            serde_json::to_string(&JobStatus::Shuffling).unwrap(),
            "\"SHUFFLING\""
        );
    }

    #[test]
    fn default_config() {
        let config = JobConfig::default();
        assert_eq!(config.num_partitions, 1);
        assert_eq!(config.max_attempts(), DEFAULT_MAX_RETRIES + 1);
        assert!(EngineConfig::default().concurrency >= 1);
    }

    #[test]
    fn retries_are_counted_over_tasks() {
        let stats = JobStats {
            tasks: vec![
                TaskReport {
                    task: TaskId::new(TaskKind::Map, 0),
                    attempts: 3,
                    elapsed: Duration::ZERO,
                },
                TaskReport {
                    task: TaskId::new(TaskKind::Reduce, 0),
                    attempts: 1,
                    elapsed: Duration::ZERO,
                },
            ],
            ..Default::default()
        };
        assert_eq!(stats.retries(), 2);
    }
}
