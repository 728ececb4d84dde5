//! The job driver: dispatches tasks onto the worker pool, retries the ones
//! that fail and moves the job through its phases.
//!
//! The driver owns the task-status table of a phase. Workers never touch it;
//! they report back over a channel, so no lock is needed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CancelReason, JobError, TaskFailure};
use crate::partition::Partitioner;
use crate::source::RecordSource;
use crate::standalone::engine::{perform_map, perform_reduce};
use crate::standalone::job::*;
use crate::standalone::shuffle::collect_partitions;
use crate::{KeyValue, Workload};

/// Everything a running job needs, detached from the [`Engine`](super::Engine)
/// that submitted it.
pub(crate) struct JobContext {
    pub id: JobId,
    pub name: String,
    pub source: Arc<dyn RecordSource>,
    pub workload: Workload,
    pub partitioner: Arc<dyn Partitioner>,
    pub config: JobConfig,
    pub pool: Arc<Semaphore>,
    /// Cancelled by [`JobHandle::cancel`](super::JobHandle::cancel).
    pub cancel: CancellationToken,
    pub status: watch::Sender<JobStatus>,
}

enum Report<O> {
    Started {
        index: usize,
        attempt: u32,
    },
    Finished {
        index: usize,
        attempt: u32,
        elapsed: Duration,
        result: Result<O>,
    },
    /// The attempt never got to run because the phase was halted first.
    Skipped { index: usize },
}

enum PhaseOutcome<O> {
    Completed(Vec<O>),
    Failed(Vec<TaskFailure>),
    Halted,
}

/// Run one attempt of task `index` on the pool. Exactly one of `Finished` or
/// `Skipped` is reported for every dispatched attempt.
fn dispatch<O, F>(
    pool: Arc<Semaphore>,
    halt: CancellationToken,
    tx: mpsc::UnboundedSender<Report<O>>,
    work: Arc<F>,
    index: usize,
    attempt: u32,
) where
    O: Send + 'static,
    F: Fn(usize) -> Result<O> + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let permit = tokio::select! {
            biased;
            _ = halt.cancelled() => None,
            permit = pool.acquire_owned() => permit.ok(),
        };
        let permit = match permit {
            Some(permit) if !halt.is_cancelled() => permit,
            _ => {
                let _ = tx.send(Report::Skipped { index });
                return;
            }
        };

        let _ = tx.send(Report::Started { index, attempt });
        let started = Instant::now();
        let result = match tokio::task::spawn_blocking(move || work(index)).await {
            Ok(result) => result,
            Err(err) => Err(anyhow!("task panicked: {err}")),
        };
        drop(permit);

        let _ = tx.send(Report::Finished {
            index,
            attempt,
            elapsed: started.elapsed(),
            result,
        });
    });
}

/// Run `count` tasks of `kind` to completion, retrying each failed task until
/// it has used `max_attempts` attempts.
///
/// The first task to exhaust its attempts halts the phase: nothing new is
/// dispatched, running attempts finish, and the phase fails.
async fn run_phase<O, F>(
    ctx: &JobContext,
    halt: &CancellationToken,
    kind: TaskKind,
    count: usize,
    work: F,
    reports: &mut Vec<TaskReport>,
) -> PhaseOutcome<O>
where
    O: Send + 'static,
    F: Fn(usize) -> Result<O> + Send + Sync + 'static,
{
    let max_attempts = ctx.config.max_attempts();
    let phase = halt.child_token();
    let work = Arc::new(work);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut states = vec![TaskState::Pending; count];
    let mut outputs: Vec<Option<O>> = (0..count).map(|_| None).collect();
    let mut failures = Vec::new();
    let mut in_flight = 0usize;

    for index in 0..count {
        dispatch(ctx.pool.clone(), phase.clone(), tx.clone(), work.clone(), index, 1);
        in_flight += 1;
    }

    while in_flight > 0 {
        let Some(report) = rx.recv().await else {
            break;
        };
        match report {
            Report::Started { index, attempt } => {
                states[index] = TaskState::Running;
                debug!(task = %TaskId::new(kind, index), attempt, "task started");
            }
            Report::Skipped { index } => {
                in_flight -= 1;
                states[index] = TaskState::Pending;
                debug!(task = %TaskId::new(kind, index), "task not dispatched, job halted");
            }
            Report::Finished {
                index,
                attempt,
                elapsed,
                result,
            } => {
                in_flight -= 1;
                let task = TaskId::new(kind, index);
                match result {
                    Ok(output) => {
                        states[index] = TaskState::Succeeded;
                        outputs[index] = Some(output);
                        reports.push(TaskReport {
                            task,
                            attempts: attempt,
                            elapsed,
                        });
                        debug!(%task, attempt, ?elapsed, "task succeeded");
                    }
                    Err(err) if attempt < max_attempts && !phase.is_cancelled() => {
                        states[index] = TaskState::Pending;
                        warn!(
                            %task,
                            input = %task_input(ctx, task),
                            attempt,
                            "task failed, retrying: {err:#}"
                        );
                        dispatch(
                            ctx.pool.clone(),
                            phase.clone(),
                            tx.clone(),
                            work.clone(),
                            index,
                            attempt + 1,
                        );
                        in_flight += 1;
                    }
                    Err(err) => {
                        states[index] = TaskState::Failed;
                        if attempt < max_attempts {
                            // Halted before it could be retried.
                            debug!(%task, attempt, "task failed after halt: {err:#}");
                            continue;
                        }
                        let failure = TaskFailure {
                            task,
                            attempts: attempt,
                            error: kind.error(index, err),
                        };
                        warn!(input = %task_input(ctx, task), "{failure}");
                        failures.push(failure);
                        phase.cancel();
                    }
                }
            }
        }
    }

    if !failures.is_empty() {
        return PhaseOutcome::Failed(failures);
    }
    if phase.is_cancelled() {
        return PhaseOutcome::Halted;
    }
    let succeeded = states.iter().filter(|s| **s == TaskState::Succeeded).count();
    match outputs.into_iter().collect::<Option<Vec<_>>>() {
        Some(outputs) => PhaseOutcome::Completed(outputs),
        None => {
            warn!(succeeded, count, "phase ended with missing task outputs");
            PhaseOutcome::Halted
        }
    }
}

/// What a task reads: the shard name for map tasks, the partition for
/// reduce tasks.
fn task_input(ctx: &JobContext, task: TaskId) -> String {
    match task.kind {
        TaskKind::Map => ctx.source.shard_name(task.index),
        TaskKind::Reduce => format!("partition {}", task.index),
    }
}

fn set_status(ctx: &JobContext, status: JobStatus) {
    ctx.status.send_replace(status);
    info!(?status, "job status");
}

fn stopped(ctx: &JobContext, halt: &CancellationToken) -> JobError {
    set_status(ctx, JobStatus::Cancelled);
    let reason = if ctx.cancel.is_cancelled() || !halt.is_cancelled() {
        CancelReason::Requested
    } else {
        CancelReason::TimedOut
    };
    warn!(?reason, "job cancelled");
    JobError::Cancelled { job: ctx.id, reason }
}

fn failed(ctx: &JobContext, failures: Vec<TaskFailure>) -> JobError {
    set_status(ctx, JobStatus::Failed);
    JobError::RetriesExhausted {
        job: ctx.id,
        failures,
    }
}

/// Drive a submitted job to a terminal state.
pub(crate) async fn run_job(ctx: JobContext) -> Result<JobOutput, JobError> {
    let started = Instant::now();
    let num_partitions = ctx.config.num_partitions;
    let num_shards = ctx.source.num_shards();

    // User cancellation reaches `halt` through the parent token; the timer
    // only ever cancels `halt`, which is how the two are told apart.
    let halt = ctx.cancel.child_token();
    let timer = ctx.config.timeout.map(|timeout| {
        let halt = halt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!(?timeout, "job timed out");
            halt.cancel();
        })
    });

    let result = run_phases(&ctx, &halt, started, num_shards, num_partitions).await;
    if let Some(timer) = timer {
        timer.abort();
    }
    result
}

async fn run_phases(
    ctx: &JobContext,
    halt: &CancellationToken,
    started: Instant,
    num_shards: usize,
    num_partitions: u32,
) -> Result<JobOutput, JobError> {
    let mut stats = JobStats {
        map_tasks: num_shards,
        reduce_tasks: num_partitions as usize,
        ..Default::default()
    };

    // Map
    set_status(ctx, JobStatus::Mapping);
    let phase_started = Instant::now();
    let map_work = {
        let source = ctx.source.clone();
        let workload = ctx.workload.clone();
        let partitioner = ctx.partitioner.clone();
        move |shard: usize| {
            perform_map(
                source.as_ref(),
                shard,
                &workload,
                partitioner.as_ref(),
                num_partitions,
            )
        }
    };
    let map_outputs = match run_phase(ctx, halt, TaskKind::Map, num_shards, map_work, &mut stats.tasks).await {
        PhaseOutcome::Completed(outputs) => outputs,
        PhaseOutcome::Failed(failures) => return Err(failed(ctx, failures)),
        PhaseOutcome::Halted => return Err(stopped(ctx, halt)),
    };
    stats.map_elapsed = phase_started.elapsed();

    // Shuffle. Every map task has succeeded at this point.
    if halt.is_cancelled() {
        return Err(stopped(ctx, halt));
    }
    set_status(ctx, JobStatus::Shuffling);
    let phase_started = Instant::now();
    let partitions = Arc::new(collect_partitions(map_outputs, num_partitions));
    stats.shuffle_elapsed = phase_started.elapsed();
    debug!(
        pairs = partitions.iter().map(Vec::len).sum::<usize>(),
        "shuffle complete"
    );

    // Reduce
    if halt.is_cancelled() {
        return Err(stopped(ctx, halt));
    }
    set_status(ctx, JobStatus::Reducing);
    let phase_started = Instant::now();
    let reduce_work = {
        let workload = ctx.workload.clone();
        move |partition: usize| -> Result<Vec<KeyValue>> {
            match partitions.get(partition) {
                Some(pairs) => perform_reduce(pairs.clone(), &workload),
                None => bail!("no partition {partition}"),
            }
        }
    };
    let reduce_outputs = match run_phase(
        ctx,
        halt,
        TaskKind::Reduce,
        num_partitions as usize,
        reduce_work,
        &mut stats.tasks,
    )
    .await
    {
        PhaseOutcome::Completed(outputs) => outputs,
        PhaseOutcome::Failed(failures) => return Err(failed(ctx, failures)),
        PhaseOutcome::Halted => return Err(stopped(ctx, halt)),
    };
    stats.reduce_elapsed = phase_started.elapsed();
    stats.total_elapsed = started.elapsed();

    let records: Vec<KeyValue> = reduce_outputs.into_iter().flatten().collect();
    set_status(ctx, JobStatus::Succeeded);
    info!(
        records = records.len(),
        retries = stats.retries(),
        elapsed = ?stats.total_elapsed,
        "job succeeded"
    );
    Ok(JobOutput {
        job: ctx.id,
        name: ctx.name.clone(),
        records,
        stats,
    })
}
