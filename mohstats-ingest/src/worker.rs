use log::{debug, error, warn};
use mohstats_db::{ConnectionPool, db};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::task::TaskTracker;

use crate::achievements::EngineHandle;
use crate::metrics;
use crate::normalize::normalize;
use crate::queue::{EventQueue, Job};
use crate::side_effects::SideEffects;

#[derive(Debug, Error)]
enum FlushError {
    #[error("couldn't get a database connection")]
    Pool(#[from] mohstats_db::PoolError),

    #[error(transparent)]
    Db(#[from] mohstats_db::QueryError),
}

#[derive(Clone)]
pub struct WorkerDeps {
    pub queue: EventQueue,
    pub analytic_pool: ConnectionPool,
    pub side_effects: SideEffects,
    pub engine: EngineHandle,
    /// In-flight side-effect tasks register here so shutdown can wait for
    /// them instead of cutting cache writes off mid-pipeline.
    pub side_effect_tasks: TaskTracker,
}

/// One batch worker. The pool runs several of these against the same
/// queue; each keeps a private buffer and flushes it on size, on the
/// interval tick, and once more on shutdown after draining what's left.
pub async fn run(
    worker_id: usize,
    deps: WorkerDeps,
    batch_size: usize,
    flush_interval: Duration,
) {
    debug!("Batch worker {worker_id} launched");

    let mut buffer: Vec<Job> = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let shutdown = deps.queue.shutdown_token().clone();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                flush(worker_id, &deps, &mut buffer).await;
            }
            job = deps.queue.recv() => match job {
                Some(job) => {
                    buffer.push(job);
                    if buffer.len() >= batch_size {
                        flush(worker_id, &deps, &mut buffer).await;
                    }
                }
                None => break,
            }
        }
    }

    // Producers have been refused since the cancel; drain whatever they
    // deposited before it and flush the remainder
    while let Some(job) = deps.queue.try_recv() {
        buffer.push(job);
        if buffer.len() >= batch_size {
            flush(worker_id, &deps, &mut buffer).await;
        }
    }
    flush(worker_id, &deps, &mut buffer).await;

    debug!("Batch worker {worker_id} exiting");
}

/// Flushes one batch: a single multi-row analytic insert, then (only on
/// success, so the log is always written first) the side-effect pipeline
/// and per-event achievement dispatch.
async fn flush(worker_id: usize, deps: &WorkerDeps, buffer: &mut Vec<Job>) {
    if buffer.is_empty() {
        return;
    }

    // The batch takes ownership; the worker's buffer is immediately
    // reusable
    let batch: Vec<Job> = std::mem::take(buffer);

    let mut rows = Vec::with_capacity(batch.len());
    let mut unprojectable = 0u64;
    for job in &batch {
        match normalize(job) {
            Ok(row) => rows.push(row),
            Err(err) => {
                unprojectable += 1;
                warn!(
                    "Couldn't normalize a {} event on worker {worker_id}: {err}",
                    job.event.event_type
                );
            }
        }
    }
    if unprojectable > 0 {
        metrics::EVENTS_FAILED.inc_by(unprojectable);
    }
    let row_count = rows.len();
    if row_count == 0 {
        return;
    }

    let insert_start = Instant::now();
    let pool = deps.analytic_pool.clone();
    let insert_result = tokio::task::spawn_blocking(move || -> Result<usize, FlushError> {
        let mut conn = pool.get()?;
        Ok(db::insert_raw_events(&mut conn, &rows)?)
    })
    .await;
    metrics::BATCH_INSERT_DURATION.observe(insert_start.elapsed().as_secs_f64());

    match insert_result {
        Ok(Ok(inserted)) => {
            metrics::EVENTS_PROCESSED.inc_by(inserted as u64);
            debug!("Worker {worker_id} wrote a batch of {inserted} rows");

            for job in &batch {
                deps.engine.submit(job);
            }

            let side_effects = deps.side_effects.clone();
            deps.side_effect_tasks.spawn(async move {
                side_effects.process_batch(batch).await;
            });
        }
        Ok(Err(err)) => {
            metrics::EVENTS_FAILED.inc_by(row_count as u64);
            error!(
                "Analytic insert failed on worker {worker_id}; \
                dropping a batch of {row_count}: {err}"
            );
        }
        Err(err) => {
            metrics::EVENTS_FAILED.inc_by(row_count as u64);
            error!("Analytic insert task died on worker {worker_id}: {err}");
        }
    }
}
