//! Event Intake (§4.6): bounded per-source queue with a size cap, sliding-window dedup on
//! correlation id, and overflow that drops the oldest queued item rather than blocking the caller.

use crate::config::IntakeConfig;
use crate::types::{AppError, AppResult, EventEnvelope};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, RwLock};

/// Consumes events drained from a per-source queue, in FIFO order within that source.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process(&self, event: EventEnvelope);
}

/// Tracks correlation ids seen within the dedup window, evicting stale entries lazily.
struct DedupWindow {
    window_seconds: i64,
    seen: VecDeque<(String, i64)>,
    index: HashSet<String>,
}

impl DedupWindow {
    fn new(window_seconds: u64) -> Self {
        Self { window_seconds: window_seconds as i64, seen: VecDeque::new(), index: HashSet::new() }
    }

    fn evict_expired(&mut self, now: i64) {
        while let Some((_, ts)) = self.seen.front() {
            if now - ts > self.window_seconds {
                let (id, _) = self.seen.pop_front().unwrap();
                self.index.remove(&id);
            } else {
                break;
            }
        }
    }

    /// Returns true if this correlation id was already seen within the window (i.e. a duplicate).
    fn check_and_insert(&mut self, correlation_id: &str, now: i64) -> bool {
        self.evict_expired(now);
        if self.index.contains(correlation_id) {
            return true;
        }
        self.index.insert(correlation_id.to_string());
        self.seen.push_back((correlation_id.to_string(), now));
        false
    }
}

/// One source's bounded FIFO. Overflow drops the oldest queued event rather than rejecting or
/// blocking the producer, per §4.6's backpressure policy.
struct PerSourceQueue {
    capacity: usize,
    inner: Mutex<VecDeque<EventEnvelope>>,
    notify: Notify,
}

impl PerSourceQueue {
    fn new(capacity: usize) -> Self {
        Self { capacity, inner: Mutex::new(VecDeque::new()), notify: Notify::new() }
    }

    /// Returns true if an existing queued event was dropped to make room.
    fn push(&self, event: EventEnvelope) -> bool {
        let mut dropped = false;
        {
            let mut queue = self.inner.lock().unwrap();
            if queue.len() >= self.capacity {
                queue.pop_front();
                dropped = true;
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
        dropped
    }

    async fn pop(&self) -> EventEnvelope {
        loop {
            if let Some(event) = self.inner.lock().unwrap().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }
}

pub struct EventIntake {
    config: IntakeConfig,
    processor: Arc<dyn EventProcessor>,
    queues: RwLock<HashMap<String, Arc<PerSourceQueue>>>,
    dedup: Arc<Mutex<DedupWindow>>,
    dropped_total: Arc<AtomicU64>,
}

impl EventIntake {
    pub fn new(config: IntakeConfig, processor: Arc<dyn EventProcessor>) -> Self {
        let dedup = DedupWindow::new(config.dedup_window_seconds);
        Self {
            config,
            processor,
            queues: RwLock::new(HashMap::new()),
            dedup: Arc::new(Mutex::new(dedup)),
            dropped_total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Accept one event. Returns `Ok(true)` if newly enqueued, `Ok(false)` if it was a duplicate
    /// within the dedup window (not itself an error per §4.6). Rejects oversized payloads.
    pub async fn accept(&self, event: EventEnvelope) -> AppResult<bool> {
        let size = serde_json::to_vec(&event.payload).map(|v| v.len()).unwrap_or(0);
        if size > self.config.max_payload_bytes {
            return Err(AppError::PayloadTooLarge(size, self.config.max_payload_bytes));
        }

        if !event.correlation_id.is_empty() {
            let mut dedup = self.dedup.lock().unwrap();
            if dedup.check_and_insert(&event.correlation_id, event.received_ts) {
                return Ok(false);
            }
        }

        let queue = self.queue_for(&event.source_id).await;
        if queue.push(event) {
            self.dropped_total.fetch_add(1, Ordering::Relaxed);
        }
        Ok(true)
    }

    /// Total events dropped for overflow across all sources.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Returns the source's queue, spawning its drain task on first use.
    async fn queue_for(&self, source_id: &str) -> Arc<PerSourceQueue> {
        if let Some(queue) = self.queues.read().await.get(source_id) {
            return Arc::clone(queue);
        }

        let mut queues = self.queues.write().await;
        if let Some(queue) = queues.get(source_id) {
            return Arc::clone(queue);
        }

        let queue = Arc::new(PerSourceQueue::new(self.config.queue_capacity));
        queues.insert(source_id.to_string(), Arc::clone(&queue));

        let drain_queue = Arc::clone(&queue);
        let processor = Arc::clone(&self.processor);
        tokio::spawn(async move {
            loop {
                let event = drain_queue.pop().await;
                processor.process(event).await;
            }
        });

        queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vector;
    use tokio::sync::Mutex as AsyncMutex;

    fn event(source: &str, correlation_id: &str, ts: i64) -> EventEnvelope {
        EventEnvelope {
            vector: Vector::Sms,
            source_id: source.to_string(),
            received_ts: ts,
            payload: crate::types::Value::Null,
            correlation_id: correlation_id.to_string(),
        }
    }

    struct RecordingProcessor {
        seen: Arc<AsyncMutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventProcessor for RecordingProcessor {
        async fn process(&self, event: EventEnvelope) {
            self.seen.lock().await.push(event.correlation_id);
        }
    }

    struct SlowProcessor;

    #[async_trait]
    impl EventProcessor for SlowProcessor {
        async fn process(&self, _event: EventEnvelope) {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let mut config = IntakeConfig::default();
        config.max_payload_bytes = 4;
        let seen = Arc::new(AsyncMutex::new(Vec::new()));
        let intake = EventIntake::new(config, Arc::new(RecordingProcessor { seen }));

        let mut big = event("sms-gw-1", "", 0);
        big.payload = crate::types::Value::String("way too long for four bytes".into());
        assert!(matches!(intake.accept(big).await, Err(AppError::PayloadTooLarge(_, _))));
    }

    #[tokio::test]
    async fn duplicate_correlation_id_within_window_is_dropped() {
        let seen = Arc::new(AsyncMutex::new(Vec::new()));
        let intake = EventIntake::new(IntakeConfig::default(), Arc::new(RecordingProcessor { seen: Arc::clone(&seen) }));

        let accepted_first = intake.accept(event("sms-gw-1", "corr-1", 0)).await.unwrap();
        let accepted_second = intake.accept(event("sms-gw-1", "corr-1", 1)).await.unwrap();
        assert!(accepted_first);
        assert!(!accepted_second);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(seen.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_outside_window_is_accepted_again() {
        let mut config = IntakeConfig::default();
        config.dedup_window_seconds = 5;
        let seen = Arc::new(AsyncMutex::new(Vec::new()));
        let intake = EventIntake::new(config, Arc::new(RecordingProcessor { seen }));

        intake.accept(event("sms-gw-1", "corr-1", 0)).await.unwrap();
        let accepted = intake.accept(event("sms-gw-1", "corr-1", 10)).await.unwrap();
        assert!(accepted);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_increments_counter() {
        let mut config = IntakeConfig::default();
        config.queue_capacity = 2;
        let intake = EventIntake::new(config, Arc::new(SlowProcessor));

        intake.accept(event("sms-gw-1", "corr-1", 0)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        intake.accept(event("sms-gw-1", "corr-2", 1)).await.unwrap();
        intake.accept(event("sms-gw-1", "corr-3", 2)).await.unwrap();
        intake.accept(event("sms-gw-1", "corr-4", 3)).await.unwrap();

        assert_eq!(intake.dropped_total(), 1);
    }

    #[tokio::test]
    async fn per_source_events_process_in_fifo_order() {
        let seen = Arc::new(AsyncMutex::new(Vec::new()));
        let intake = EventIntake::new(IntakeConfig::default(), Arc::new(RecordingProcessor { seen: Arc::clone(&seen) }));

        intake.accept(event("sms-gw-1", "corr-1", 0)).await.unwrap();
        intake.accept(event("sms-gw-1", "corr-2", 1)).await.unwrap();
        intake.accept(event("sms-gw-1", "corr-3", 2)).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let order = seen.lock().await.clone();
        assert_eq!(order, vec!["corr-1", "corr-2", "corr-3"]);
    }
}
