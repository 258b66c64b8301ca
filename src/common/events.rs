//! In-process publish/subscribe bus sequencing the engine pipeline
//!
//! Every subscription owns a bounded queue. Publishing never blocks: when a subscriber's queue
//! is full the event is dropped for that subscriber and a warning is logged, and subscriptions
//! whose receiver was dropped are pruned on the next publish.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default queue size per subscription
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 16;

/// Event topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    PricesFetched,
    SymbolNotFound,
    BalanceChanged,
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::PricesFetched => write!(f, "prices_fetched"),
            Topic::SymbolNotFound => write!(f, "symbol_not_found"),
            Topic::BalanceChanged => write!(f, "balance_changed"),
        }
    }
}

/// Event with its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    PricesFetched,
    /// Trading symbol the exchange rejected as invalid
    SymbolNotFound(String),
    BalanceChanged,
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::PricesFetched => Topic::PricesFetched,
            Event::SymbolNotFound(_) => Topic::SymbolNotFound,
            Event::BalanceChanged => Topic::BalanceChanged,
        }
    }
}

/// Publish/subscribe hub
pub struct EventBus {
    capacity: usize,
    subscribers: Mutex<HashMap<Topic, Vec<mpsc::Sender<Event>>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIPTION_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new subscription on `topic`
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(topic)
            .or_default()
            .push(tx);
        Subscription { topic, receiver: rx }
    }

    /// Deliver `event` to every live subscriber of its topic, returns the number of deliveries
    pub fn publish(&self, event: Event) -> usize {
        let topic = event.topic();
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let Some(senders) = subscribers.get_mut(&topic) else {
            debug!(%topic, "No subscribers for event");
            return 0;
        };

        let mut delivered = 0;
        senders.retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%topic, "Subscriber queue full, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        delivered
    }

    /// Number of live subscriptions on `topic`
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&topic)
            .map(|s| s.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

/// Receiving side of one subscription
pub struct Subscription {
    topic: Topic,
    receiver: mpsc::Receiver<Event>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Next event, or `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Handle events one at a time until `cancel` fires
    pub async fn run<F, Fut>(mut self, cancel: CancellationToken, mut handler: F)
    where
        F: FnMut(Event) -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(topic = %self.topic, "Subscriber stopped");
                    break;
                }
                event = self.receiver.recv() => match event {
                    Some(event) => handler(event).await,
                    None => break,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_publish_reaches_topic_subscribers_only() {
        let bus = EventBus::default();
        let mut prices = bus.subscribe(Topic::PricesFetched);
        let mut symbols = bus.subscribe(Topic::SymbolNotFound);

        assert_eq!(bus.publish(Event::SymbolNotFound("FOOUSDT".to_string())), 1);
        assert_eq!(
            symbols.recv().await,
            Some(Event::SymbolNotFound("FOOUSDT".to_string()))
        );
        assert!(prices.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let bus = EventBus::new(1);
        let mut sub = bus.subscribe(Topic::BalanceChanged);

        assert_eq!(bus.publish(Event::BalanceChanged), 1);
        assert_eq!(bus.publish(Event::BalanceChanged), 0);
        assert_eq!(sub.recv().await, Some(Event::BalanceChanged));
        assert!(sub.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let bus = EventBus::default();
        let sub = bus.subscribe(Topic::PricesFetched);
        drop(sub);

        assert_eq!(bus.publish(Event::PricesFetched), 0);
        assert_eq!(bus.subscriber_count(Topic::PricesFetched), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let bus = EventBus::default();
        let sub = bus.subscribe(Topic::PricesFetched);
        let cancel = CancellationToken::new();
        let handled = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&handled);
        let task = tokio::spawn(sub.run(cancel.clone(), move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        bus.publish(Event::PricesFetched);
        bus.publish(Event::PricesFetched);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(handled.load(Ordering::SeqCst), 2);
    }
}
