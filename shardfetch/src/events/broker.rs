//! Topic-keyed event bus with a bounded queue and a single consumer.
//!
//! Producers publish through cloneable [`Publisher`] handles; when the
//! queue is full `publish` waits, which backpressures shard workers instead
//! of letting events pile up unboundedly. A dedicated consumer task
//! dispatches callbacks one event at a time, so subscribers observe events
//! in publish order and never run concurrently with themselves.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// An event on the bus: a topic and a signed integer payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub topic: String,
    pub payload: i64,
}

type EventCallback = Box<dyn FnMut(&Event) + Send>;

/// Registers subscribers before the bus starts consuming.
#[derive(Default)]
pub struct BrokerBuilder {
    subscribers: HashMap<String, Vec<EventCallback>>,
}

impl BrokerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for one topic. Multiple callbacks per topic are
    /// invoked in registration order.
    pub fn subscribe(mut self, topic: &str, callback: impl FnMut(&Event) + Send + 'static) -> Self {
        self.subscribers
            .entry(topic.to_string())
            .or_default()
            .push(Box::new(callback));
        self
    }

    /// Start the consumer task with the given queue capacity.
    pub fn start(self, capacity: usize) -> EventBroker {
        let (tx, mut rx) = mpsc::channel::<Event>(capacity.max(1));
        let mut subscribers = self.subscribers;

        let consumer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                trace!(topic = %event.topic, payload = event.payload, "dispatching event");
                if let Some(callbacks) = subscribers.get_mut(&event.topic) {
                    for callback in callbacks.iter_mut() {
                        callback(&event);
                    }
                }
            }
        });

        EventBroker {
            tx,
            consumer: Some(consumer),
        }
    }
}

/// Handle for publishing events on one topic.
#[derive(Clone, Debug)]
pub struct Publisher {
    topic: String,
    tx: mpsc::Sender<Event>,
}

impl Publisher {
    /// Publish an event, waiting if the queue is full.
    pub async fn publish(&self, payload: i64) {
        let event = Event {
            topic: self.topic.clone(),
            payload,
        };
        // The only way this fails is the consumer having exited, at which
        // point the event has nowhere to go anyway.
        let _ = self.tx.send(event).await;
    }
}

/// The running event bus. See [`BrokerBuilder`] to construct one.
#[derive(Debug)]
pub struct EventBroker {
    tx: mpsc::Sender<Event>,
    consumer: Option<JoinHandle<()>>,
}

impl EventBroker {
    /// Create a publisher handle bound to one topic.
    pub fn publisher(&self, topic: &str) -> Publisher {
        Publisher {
            topic: topic.to_string(),
            tx: self.tx.clone(),
        }
    }

    /// Drain the queue and stop the consumer.
    ///
    /// All publisher handles must be dropped first; the consumer exits once
    /// the queue is empty and no sender remains.
    pub async fn close(mut self) {
        drop(self.tx);
        if let Some(consumer) = self.consumer.take() {
            let _ = consumer.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_events_reach_subscriber() {
        let sum = Arc::new(AtomicI64::new(0));
        let sum_clone = Arc::clone(&sum);

        let broker = BrokerBuilder::new()
            .subscribe("bytes", move |event| {
                sum_clone.fetch_add(event.payload, Ordering::SeqCst);
            })
            .start(8);

        let publisher = broker.publisher("bytes");
        publisher.publish(10).await;
        publisher.publish(32).await;
        drop(publisher);
        broker.close().await;

        assert_eq!(sum.load(Ordering::SeqCst), 42);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let starts = Arc::new(AtomicUsize::new(0));
        let dones = Arc::new(AtomicUsize::new(0));
        let starts_clone = Arc::clone(&starts);
        let dones_clone = Arc::clone(&dones);

        let broker = BrokerBuilder::new()
            .subscribe("start", move |_| {
                starts_clone.fetch_add(1, Ordering::SeqCst);
            })
            .subscribe("done", move |_| {
                dones_clone.fetch_add(1, Ordering::SeqCst);
            })
            .start(8);

        let start_pub = broker.publisher("start");
        let done_pub = broker.publisher("done");
        start_pub.publish(0).await;
        start_pub.publish(0).await;
        done_pub.publish(0).await;
        drop(start_pub);
        drop(done_pub);
        broker.close().await;

        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert_eq!(dones.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delivery_preserves_publish_order() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let broker = BrokerBuilder::new()
            .subscribe("seq", move |event| {
                seen_clone.lock().unwrap().push(event.payload);
            })
            .start(4);

        let publisher = broker.publisher("seq");
        for i in 0..20 {
            publisher.publish(i).await;
        }
        drop(publisher);
        broker.close().await;

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_unsubscribed_topic_is_dropped() {
        let broker = BrokerBuilder::new().start(2);
        let publisher = broker.publisher("nobody-listens");
        publisher.publish(1).await;
        drop(publisher);
        broker.close().await;
    }

    #[tokio::test]
    async fn test_close_drains_pending_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let broker = BrokerBuilder::new()
            .subscribe("evt", move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            })
            .start(64);

        let publisher = broker.publisher("evt");
        for _ in 0..50 {
            publisher.publish(0).await;
        }
        drop(publisher);
        broker.close().await;

        // Close must not lose queued events.
        assert_eq!(count.load(Ordering::SeqCst), 50);
    }
}
