use lazy_static::lazy_static;
use log::debug;
use prometheus::{
    Histogram, IntCounter, IntGauge, register_histogram, register_int_counter,
    register_int_gauge,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::EventQueue;

const QUEUE_DEPTH_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

lazy_static! {
    pub static ref EVENTS_INGESTED: IntCounter = register_int_counter!(
        "events_ingested_total",
        "Events accepted into the work queue"
    )
    .expect("metric can be registered");
    pub static ref EVENTS_PROCESSED: IntCounter = register_int_counter!(
        "events_processed_total",
        "Events written to the analytic store"
    )
    .expect("metric can be registered");
    pub static ref EVENTS_FAILED: IntCounter = register_int_counter!(
        "events_failed_total",
        "Events in batches whose analytic insert failed"
    )
    .expect("metric can be registered");
    pub static ref EVENTS_LOAD_SHED: IntCounter = register_int_counter!(
        "events_load_shed_total",
        "Events refused because the pipeline is shutting down"
    )
    .expect("metric can be registered");
    pub static ref WORKER_QUEUE_DEPTH: IntGauge = register_int_gauge!(
        "worker_queue_depth",
        "Events waiting in the work queue"
    )
    .expect("metric can be registered");
    pub static ref BATCH_INSERT_DURATION: Histogram = register_histogram!(
        "batch_insert_duration_seconds",
        "Wall-clock duration of one analytic batch insert"
    )
    .expect("metric can be registered");
}

/// Samples queue occupancy into `worker_queue_depth` every five seconds
/// until shutdown.
pub fn spawn_queue_depth_sampler(
    queue: EventQueue,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(QUEUE_DEPTH_SAMPLE_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    WORKER_QUEUE_DEPTH.set(queue.depth() as i64);
                }
            }
        }
        debug!("Queue depth sampler exiting");
    })
}
