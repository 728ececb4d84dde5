//! A multi-worker MapReduce engine running inside one process.
//!
//! An [`Engine`] owns a bounded worker pool. Jobs submitted to it run their
//! map tasks (one per input shard) on the pool, shuffle the intermediate pairs
//! into partitions once every map task has succeeded, and then run one reduce
//! task per partition on the same pool.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # async fn demo() -> anyhow::Result<()> {
//! use mrlite::source::MemorySource;
//! use mrlite::standalone::{Engine, JobSpec};
//! use mrlite::workload;
//!
//! let engine = Engine::default();
//! let source = MemorySource::chunked(["the cat sat", "the dog sat"], 1);
//! let spec = JobSpec::new("wc", Arc::new(source), workload::named("wc")?).num_partitions(4);
//! let output = engine.run(spec).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::error::{ConfigError, JobError};
use crate::partition::{self, HashPartitioner, Partitioner};
use crate::source::RecordSource;
use crate::Workload;

pub mod driver;
pub mod engine;
pub mod job;
pub mod shuffle;

use driver::JobContext;
use job::{EngineConfig, JobConfig, JobId, JobOutput, JobStatus, MAX_PARTITIONS};

/// Everything needed to run one job.
#[derive(Clone)]
pub struct JobSpec {
    pub name: String,
    pub source: Arc<dyn RecordSource>,
    pub workload: Workload,
    pub partitioner: Arc<dyn Partitioner>,
    pub config: JobConfig,
}

impl JobSpec {
    /// A job with the default [`JobConfig`] and the [`HashPartitioner`].
    pub fn new(name: impl ToString, source: Arc<dyn RecordSource>, workload: Workload) -> Self {
        Self {
            name: name.to_string(),
            source,
            workload,
            partitioner: Arc::new(HashPartitioner),
            config: JobConfig::default(),
        }
    }

    pub fn num_partitions(mut self, num_partitions: u32) -> Self {
        self.config.num_partitions = num_partitions;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn partitioner(mut self, partitioner: Arc<dyn Partitioner>) -> Self {
        self.partitioner = partitioner;
        self
    }

    pub fn config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }
}

/// A bounded worker pool that runs jobs.
///
/// Cloning an engine is cheap; clones share the pool, so jobs submitted
/// through any of them compete for the same slots.
#[derive(Clone)]
pub struct Engine {
    pool: Arc<Semaphore>,
    config: EngineConfig,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            pool: Arc::new(Semaphore::new(EngineConfig::default().concurrency.max(1))),
            config: EngineConfig::default(),
        }
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        if config.concurrency < 1 {
            return Err(ConfigError::InvalidConcurrency(config.concurrency));
        }
        Ok(Self {
            pool: Arc::new(Semaphore::new(config.concurrency)),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate `spec` and start running it in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, spec: JobSpec) -> Result<JobHandle, ConfigError> {
        let JobSpec {
            name,
            source,
            workload,
            partitioner,
            config,
        } = spec;

        if config.num_partitions < 1 {
            return Err(ConfigError::InvalidPartitionCount(config.num_partitions));
        }
        if config.num_partitions > MAX_PARTITIONS {
            return Err(ConfigError::TooManyPartitions {
                requested: config.num_partitions,
                max: MAX_PARTITIONS,
            });
        }
        if source.num_shards() == 0 {
            return Err(ConfigError::EmptyInput);
        }
        if config.validate_partitioner {
            partition::validate(partitioner.as_ref(), config.num_partitions)?;
        }

        let id = JobId::new();
        let (status_tx, status_rx) = watch::channel(JobStatus::Submitted);
        let cancel = CancellationToken::new();
        let span = info_span!("job", %id, name = %name);
        span.in_scope(|| {
            info!(
                shards = source.num_shards(),
                partitions = config.num_partitions,
                max_retries = config.max_retries,
                "job submitted"
            )
        });

        let ctx = JobContext {
            id,
            name: name.clone(),
            source,
            workload,
            partitioner,
            config,
            pool: self.pool.clone(),
            cancel: cancel.clone(),
            status: status_tx,
        };
        let task = tokio::spawn(driver::run_job(ctx).instrument(span));

        Ok(JobHandle {
            id,
            name,
            status: status_rx,
            cancel,
            task,
        })
    }

    /// Submit `spec` and wait for it to finish.
    pub async fn run(&self, spec: JobSpec) -> anyhow::Result<JobOutput> {
        let handle = self.submit(spec)?;
        Ok(handle.wait().await?)
    }
}

/// A running (or finished) job.
pub struct JobHandle {
    id: JobId,
    name: String,
    status: watch::Receiver<JobStatus>,
    cancel: CancellationToken,
    task: JoinHandle<Result<JobOutput, JobError>>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The job's current status.
    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    /// A receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status.clone()
    }

    /// Stop dispatching tasks. Running tasks finish; [`wait`](Self::wait)
    /// then returns [`JobError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the job to reach a terminal state.
    pub async fn wait(self) -> Result<JobOutput, JobError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(JobError::Internal {
                job: self.id,
                message: err.to_string(),
            }),
        }
    }
}
