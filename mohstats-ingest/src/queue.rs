use chrono::{DateTime, Utc};
use telemetry::GameEvent;
use tokio_util::sync::CancellationToken;

use crate::metrics;

/// One queued unit of work: the decoded event plus the wall clock captured
/// at enqueue, which the normalizer falls back to for game-relative
/// timestamps and which stamps every synthesized event.
#[derive(Debug, Clone)]
pub struct Job {
    pub event: GameEvent,
    pub ingested_at: DateTime<Utc>,
}

/// Bounded FIFO between producers and the batcher pool. The channel is
/// multi-consumer, so every batch worker drains the same queue directly.
#[derive(Clone)]
pub struct EventQueue {
    tx: flume::Sender<Job>,
    rx: flume::Receiver<Job>,
    shutdown: CancellationToken,
}

impl EventQueue {
    pub fn new(capacity: usize, shutdown: CancellationToken) -> EventQueue {
        let (tx, rx) = flume::bounded(capacity);
        EventQueue { tx, rx, shutdown }
    }

    /// Deposits an event. Returns `true` once the event is owned by the
    /// queue. A full queue blocks the producer; only shutdown makes this
    /// return `false`, and refused events are counted as load shed.
    pub async fn enqueue(&self, event: GameEvent) -> bool {
        if self.shutdown.is_cancelled() {
            metrics::EVENTS_LOAD_SHED.inc();
            return false;
        }

        let job = Job {
            event,
            ingested_at: Utc::now(),
        };

        tokio::select! {
            result = self.tx.send_async(job) => match result {
                Ok(()) => {
                    metrics::EVENTS_INGESTED.inc();
                    true
                }
                Err(_) => {
                    metrics::EVENTS_LOAD_SHED.inc();
                    false
                }
            },
            _ = self.shutdown.cancelled() => {
                metrics::EVENTS_LOAD_SHED.inc();
                false
            }
        }
    }

    pub async fn recv(&self) -> Option<Job> {
        self.rx.recv_async().await.ok()
    }

    /// Non-blocking receive, used by workers to drain the queue during
    /// shutdown.
    pub fn try_recv(&self) -> Option<Job> {
        self.rx.try_recv().ok()
    }

    pub fn depth(&self) -> usize {
        self.rx.len()
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_recv_round_trips() {
        let queue = EventQueue::new(4, CancellationToken::new());
        let event = GameEvent {
            event_type: "kill".to_string(),
            ..GameEvent::default()
        };
        assert!(queue.enqueue(event.clone()).await);
        let job = queue.recv().await.unwrap();
        assert_eq!(job.event, event);
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_is_load_shed() {
        let shutdown = CancellationToken::new();
        let queue = EventQueue::new(4, shutdown.clone());
        shutdown.cancel();
        assert!(!queue.enqueue(GameEvent::default()).await);
    }

    #[tokio::test]
    async fn full_queue_blocks_until_a_consumer_drains() {
        let queue = EventQueue::new(1, CancellationToken::new());
        assert!(queue.enqueue(GameEvent::default()).await);

        let drain = {
            let queue = queue.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                queue.recv().await
            })
        };

        // Blocks until the spawned consumer makes room.
        assert!(queue.enqueue(GameEvent::default()).await);
        assert!(drain.await.unwrap().is_some());
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn shutdown_unblocks_a_waiting_producer() {
        let shutdown = CancellationToken::new();
        let queue = EventQueue::new(1, shutdown.clone());
        assert!(queue.enqueue(GameEvent::default()).await);

        let canceller = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                shutdown.cancel();
            })
        };

        assert!(!queue.enqueue(GameEvent::default()).await);
        canceller.await.unwrap();
    }
}
