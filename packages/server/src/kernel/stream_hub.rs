//! Per-job event fan-out.
//!
//! One broadcast channel per job topic. Publishing is synchronous and never
//! blocks on consumers: a subscriber that falls a full buffer behind sees a
//! lag error on its next recv, and the SSE endpoint drops it. A job's final
//! event goes out through [`StreamHub::publish_final`], which retires the
//! topic so drained subscribers observe a closed channel instead of waiting
//! on a finished job.
//!
//! # Usage
//!
//! Producers (the orchestrator):
//!   hub.publish("discovery:abc-123", json!({"type": "progress", "succeeded": 2}));
//!   hub.publish_final("discovery:abc-123", json!({"type": "complete", ...}));
//!
//! Consumers (SSE endpoints):
//!   let rx = hub.subscribe("discovery:abc-123");

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

/// Event fan-out hub, keyed by job topic.
///
/// Payloads are already-serialized events; the hub never inspects them.
/// Thread-safe and cloneable; every clone shares the topic map.
#[derive(Clone)]
pub struct StreamHub {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<serde_json::Value>>>>,
    /// Per-subscriber buffer. A consumer more than this many events behind
    /// is lagged out rather than back-pressuring the publisher.
    capacity: usize,
}

impl StreamHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    /// Push an event to a topic's subscribers. No-op if nobody ever
    /// subscribed (events are live-only; there is no replay).
    pub fn publish(&self, topic: &str, event: serde_json::Value) {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = topics.get(topic) {
            // Send only fails with zero receivers, which is fine here.
            let _ = tx.send(event);
        }
    }

    /// Push a topic's last event and retire the topic. Subscribers drain
    /// whatever is buffered, then see the channel close.
    pub fn publish_final(&self, topic: &str, event: serde_json::Value) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = topics.remove(topic) {
            let _ = tx.send(event);
        }
    }

    /// Attach to a topic, creating its channel on first use. Only events
    /// published after this call are delivered.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<serde_json::Value> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Live subscribers on a topic. Zero once the topic is retired.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.get(topic).map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    /// Drop topics whose subscribers have all disconnected. Covers channels
    /// resurrected by late subscribes to already-finished jobs.
    pub fn prune(&self) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_every_subscriber() {
        let hub = StreamHub::default();
        let mut rx1 = hub.subscribe("discovery:job-1");
        let mut rx2 = hub.subscribe("discovery:job-1");

        let event = serde_json::json!({"type": "progress", "succeeded": 2});
        hub.publish("discovery:job-1", event.clone());

        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let hub = StreamHub::default();
        hub.publish("discovery:nobody", serde_json::json!({"type": "progress"}));

        // A later subscriber starts from live events only.
        let mut rx = hub.subscribe("discovery:nobody");
        hub.publish("discovery:nobody", serde_json::json!({"seq": 2}));
        assert_eq!(rx.recv().await.unwrap()["seq"], 2);
    }

    #[tokio::test]
    async fn final_event_closes_the_topic() {
        let hub = StreamHub::default();
        let mut rx = hub.subscribe("discovery:job-1");

        hub.publish("discovery:job-1", serde_json::json!({"type": "progress"}));
        hub.publish_final("discovery:job-1", serde_json::json!({"type": "complete"}));

        assert_eq!(rx.recv().await.unwrap()["type"], "progress");
        assert_eq!(rx.recv().await.unwrap()["type"], "complete");
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert_eq!(hub.subscriber_count("discovery:job-1"), 0);
    }

    #[tokio::test]
    async fn publishes_after_final_are_dropped() {
        let hub = StreamHub::default();
        let mut rx = hub.subscribe("discovery:job-1");

        hub.publish_final("discovery:job-1", serde_json::json!({"type": "complete"}));
        hub.publish("discovery:job-1", serde_json::json!({"type": "progress"}));

        assert_eq!(rx.recv().await.unwrap()["type"], "complete");
        assert!(rx.recv().await.is_err());
    }

    #[tokio::test]
    async fn subscriber_count_tracks_attach_and_drop() {
        let hub = StreamHub::default();
        assert_eq!(hub.subscriber_count("discovery:job-1"), 0);

        let rx1 = hub.subscribe("discovery:job-1");
        let rx2 = hub.subscribe("discovery:job-1");
        assert_eq!(hub.subscriber_count("discovery:job-1"), 2);

        drop(rx1);
        drop(rx2);
        assert_eq!(hub.subscriber_count("discovery:job-1"), 0);
    }

    #[tokio::test]
    async fn prune_drops_abandoned_topics() {
        let hub = StreamHub::default();
        let rx = hub.subscribe("discovery:job-1");
        let _held = hub.subscribe("discovery:job-2");

        drop(rx);
        hub.prune();

        assert_eq!(hub.topics.lock().unwrap().len(), 1);
        assert!(hub.topics.lock().unwrap().contains_key("discovery:job-2"));
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let hub = StreamHub::new(2);
        let mut rx = hub.subscribe("discovery:job-1");

        for i in 0..5 {
            hub.publish("discovery:job-1", serde_json::json!({"seq": i}));
        }

        // First recv reports the lag; the publisher was never blocked.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert!(n >= 1),
            other => panic!("expected lag, got {other:?}"),
        }
    }
}
