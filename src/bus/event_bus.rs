//! Event bus with per-subscriber backpressure
//!
//! Every subscriber owns a bounded [`EventQueue`]. Publishing snapshots the
//! subscriber map, enqueues the event for each subscriber without blocking and
//! runs each callback in its own task, so a full queue or a failing, panicking
//! or hung callback only ever affects that subscriber.

use super::queue::EventQueue;
use super::{DEFAULT_CALLBACK_TIMEOUT, DEFAULT_QUEUE_CAPACITY};
use crate::error::panic_message;
use crate::events::StatusEvent;
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// Future returned by a subscriber callback
pub type CallbackFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Asynchronous hook invoked after an event is enqueued for a subscriber
pub type EventCallback = Arc<dyn Fn(StatusEvent) -> CallbackFuture + Send + Sync>;

/// Wrap an async closure as an [`EventCallback`]
pub fn callback<F, Fut>(f: F) -> EventCallback
where
    F: Fn(StatusEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

struct Subscriber {
    id: String,
    queue: Arc<EventQueue>,
    callback: Option<EventCallback>,
}

impl Subscriber {
    /// Enqueue `event` and start the callback, if any, without waiting for it
    fn deliver(&self, event: StatusEvent, callback_timeout: Duration) {
        if let Some(callback) = &self.callback {
            spawn_callback(
                self.id.clone(),
                Arc::clone(callback),
                event.clone(),
                callback_timeout,
            );
        }

        if self.queue.push(event).is_some() {
            warn!("Subscriber {} queue full, dropped oldest event", self.id);
        }
    }
}

/// Run one callback invocation in its own task
///
/// Errors, panics and invocations running past `limit` are logged against the
/// subscriber and go no further.
fn spawn_callback(id: String, callback: EventCallback, event: StatusEvent, limit: Duration) {
    tokio::spawn(async move {
        let run = AssertUnwindSafe(async move { callback(event).await }).catch_unwind();
        match tokio::time::timeout(limit, run).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!("Subscriber {} callback failed: {:#}", id, e),
            Ok(Err(panic)) => error!(
                "Subscriber {} callback panicked: {}",
                id,
                panic_message(panic.as_ref())
            ),
            Err(_) => error!(
                "Subscriber {} callback did not finish within {:?}, abandoned",
                id, limit
            ),
        }
    });
}

struct BusInner {
    subscribers: Mutex<HashMap<String, Arc<Subscriber>>>,
    count: AtomicUsize,
    queue_capacity: usize,
    callback_timeout: Duration,
}

impl BusInner {
    fn subscribers(&self) -> MutexGuard<'_, HashMap<String, Arc<Subscriber>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process publish/subscribe hub for [`StatusEvent`]s
///
/// Cloning is cheap; all clones share the same subscriber set.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus whose subscribers buffer [`DEFAULT_QUEUE_CAPACITY`] events
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a bus with a custom default subscriber queue capacity
    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self::with_limits(queue_capacity, DEFAULT_CALLBACK_TIMEOUT)
    }

    /// Create a bus with custom queue capacity and callback time limit
    ///
    /// # Arguments
    ///
    /// * `queue_capacity` - Events buffered per subscriber before the oldest is dropped
    /// * `callback_timeout` - How long a single callback invocation may run before
    ///   it is abandoned and logged
    pub fn with_limits(queue_capacity: usize, callback_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                count: AtomicUsize::new(0),
                queue_capacity: queue_capacity.max(1),
                callback_timeout,
            }),
        }
    }

    /// Default capacity given to new subscriber queues
    pub fn queue_capacity(&self) -> usize {
        self.inner.queue_capacity
    }

    pub fn callback_timeout(&self) -> Duration {
        self.inner.callback_timeout
    }

    /// Register a subscriber with the bus's default queue capacity
    pub fn subscribe(&self, callback: Option<EventCallback>) -> Subscription {
        self.subscribe_with_capacity(callback, self.inner.queue_capacity)
    }

    /// Register a subscriber with its own queue capacity
    pub fn subscribe_with_capacity(
        &self,
        callback: Option<EventCallback>,
        capacity: usize,
    ) -> Subscription {
        let subscriber = Arc::new(Subscriber {
            id: Uuid::new_v4().simple().to_string(),
            queue: Arc::new(EventQueue::new(capacity)),
            callback,
        });
        let subscription = Subscription {
            id: subscriber.id.clone(),
            queue: Arc::clone(&subscriber.queue),
        };

        let total = {
            let mut subscribers = self.inner.subscribers();
            subscribers.insert(subscriber.id.clone(), subscriber);
            self.inner.count.store(subscribers.len(), Ordering::Release);
            subscribers.len()
        };
        info!(
            "New subscriber registered: {} (total: {})",
            subscription.id, total
        );

        subscription
    }

    /// Remove a subscriber; returns whether it was still registered
    ///
    /// The subscriber's queue is closed so a pending receive ends once the
    /// remaining events are drained.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let removed = {
            let mut subscribers = self.inner.subscribers();
            let removed = subscribers.remove(id);
            self.inner.count.store(subscribers.len(), Ordering::Release);
            removed
        };

        match removed {
            Some(subscriber) => {
                subscriber.queue.close();
                info!("Subscriber removed: {}", id);
                true
            }
            None => false,
        }
    }

    /// Fan an event out to every subscriber registered at call time
    ///
    /// Returns once the event is enqueued for each subscriber. Callbacks run in
    /// their own tasks and are never awaited here, so a slow or hung callback
    /// cannot hold up the publisher. Returns the number of subscribers the
    /// event was offered to.
    pub async fn publish(&self, event: StatusEvent) -> usize {
        let subscribers: Vec<Arc<Subscriber>> =
            self.inner.subscribers().values().cloned().collect();

        if subscribers.is_empty() {
            return 0;
        }

        for subscriber in &subscribers {
            subscriber.deliver(event.clone(), self.inner.callback_timeout);
        }

        debug!(
            "Published {} event for {}/{} to {} subscribers",
            event.event_type.as_str(),
            event.provider,
            event.incident.name,
            subscribers.len()
        );
        subscribers.len()
    }

    /// Subscribe and return a stream that unsubscribes when dropped
    pub fn stream(&self) -> EventStream {
        EventStream {
            subscription: self.subscribe(None),
            bus: self.clone(),
        }
    }

    /// Current number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }
}

/// Handle to one subscriber's queue
pub struct Subscription {
    id: String,
    queue: Arc<EventQueue>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the next event; `None` after the subscriber was removed and drained
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        self.queue.pop().await
    }

    pub fn try_recv(&mut self) -> Option<StatusEvent> {
        self.queue.try_pop()
    }

    /// Take every queued event, oldest first
    pub fn drain(&mut self) -> Vec<StatusEvent> {
        self.queue.drain()
    }

    /// Number of events waiting to be received
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

/// Stream of events backed by its own subscription
///
/// Each call to [`EventBus::stream`] creates a fresh subscription. Dropping the
/// stream, including when the consuming task is cancelled or panics,
/// unsubscribes it.
pub struct EventStream {
    subscription: Subscription,
    bus: EventBus,
}

impl EventStream {
    pub fn id(&self) -> &str {
        self.subscription.id()
    }

    pub async fn next(&mut self) -> Option<StatusEvent> {
        self.subscription.recv().await
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscription.id());
    }
}

#[cfg(test)]
mod tests {
    use super::super::queue::test_support::numbered_event;
    use super::*;
    use std::time::Duration;

    fn ids(events: &[StatusEvent]) -> Vec<String> {
        events.iter().map(|e| e.incident.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_publish_fans_out_to_all_subscribers() {
        let bus = EventBus::new();
        let mut first = bus.subscribe(None);
        let mut second = bus.subscribe(None);
        let mut third = bus.subscribe(None);

        let delivered = bus.publish(numbered_event(1)).await;

        assert_eq!(delivered, 3);
        for sub in [&mut first, &mut second, &mut third] {
            assert_eq!(sub.try_recv().unwrap().incident.id, "INC1");
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(numbered_event(1)).await, 0);
    }

    #[tokio::test]
    async fn test_slow_consumer_keeps_most_recent_events() {
        let bus = EventBus::new();
        let mut slow = bus.subscribe_with_capacity(None, 2);
        let mut fast = bus.subscribe(None);

        for n in 1..=3 {
            bus.publish(numbered_event(n)).await;
        }

        assert_eq!(ids(&slow.drain()), vec!["INC2", "INC3"]);
        // Other subscribers are unaffected by the overflow
        assert_eq!(ids(&fast.drain()), vec!["INC1", "INC2", "INC3"]);
    }

    #[tokio::test]
    async fn test_new_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        let _early = bus.subscribe(None);
        bus.publish(numbered_event(1)).await;

        let mut late = bus.subscribe(None);
        assert!(late.is_empty());

        bus.publish(numbered_event(2)).await;
        assert_eq!(ids(&late.drain()), vec!["INC2"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let sub = bus.subscribe(None);
        assert_eq!(bus.subscriber_count(), 1);

        assert!(bus.unsubscribe(sub.id()));
        assert!(!bus.unsubscribe(sub.id()));
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(numbered_event(1)).await, 0);
    }

    #[tokio::test]
    async fn test_recv_ends_after_unsubscribe() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(None);
        bus.publish(numbered_event(1)).await;
        bus.unsubscribe(sub.id());

        assert_eq!(sub.recv().await.unwrap().incident.id, "INC1");
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_callback_receives_events() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _sub = bus.subscribe(Some(callback(move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })));

        bus.publish(numbered_event(1)).await;
        bus.publish(numbered_event(2)).await;

        // Callbacks run detached from publish
        tokio::time::timeout(Duration::from_secs(5), async {
            while calls.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_hung_callback_does_not_block_publish() {
        let bus = EventBus::with_limits(8, Duration::from_millis(200));
        let _hung = bus.subscribe(Some(callback(|_event| async {
            std::future::pending::<()>().await;
            Ok(())
        })));
        let mut healthy = bus.subscribe(None);

        let published = tokio::time::timeout(Duration::from_secs(1), async {
            bus.publish(numbered_event(1)).await;
            bus.publish(numbered_event(2)).await;
        })
        .await;

        assert!(published.is_ok());
        assert_eq!(ids(&healthy.drain()), vec!["INC1", "INC2"]);
        assert_eq!(bus.callback_timeout(), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_failing_callback_is_isolated() {
        let bus = EventBus::new();
        let mut failing = bus.subscribe(Some(callback(|_event| async {
            Err::<(), _>(anyhow::anyhow!("consumer rejected event"))
        })));
        let mut healthy = bus.subscribe(None);

        let delivered = bus.publish(numbered_event(1)).await;

        assert_eq!(delivered, 2);
        assert_eq!(healthy.try_recv().unwrap().incident.id, "INC1");
        // The event is still enqueued for the failing subscriber
        assert_eq!(failing.try_recv().unwrap().incident.id, "INC1");
    }

    #[tokio::test]
    async fn test_panicking_callback_is_isolated() {
        let bus = EventBus::new();
        let _panicking = bus.subscribe(Some(callback(|event| async move {
            if event.incident.id.starts_with("INC") {
                panic!("callback bug");
            }
            Ok(())
        })));
        let mut healthy = bus.subscribe(None);

        bus.publish(numbered_event(1)).await;
        bus.publish(numbered_event(2)).await;

        assert_eq!(ids(&healthy.drain()), vec!["INC1", "INC2"]);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_stream_receives_and_cleans_up() {
        let bus = EventBus::new();
        let mut stream = bus.stream();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(numbered_event(5)).await;
        assert_eq!(stream.next().await.unwrap().incident.id, "INC5");

        drop(stream);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_cleans_up_when_consumer_task_is_aborted() {
        let bus = EventBus::new();
        let consumer = {
            let bus = bus.clone();
            tokio::spawn(async move {
                let mut stream = bus.stream();
                while stream.next().await.is_some() {}
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bus.subscriber_count(), 1);

        consumer.abort();
        let _ = consumer.await;
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_each_stream_is_a_fresh_subscription() {
        let bus = EventBus::new();
        let first = bus.stream();
        let second = bus.stream();

        assert_ne!(first.id(), second.id());
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_subscriber_capacity_defaults() {
        let bus = EventBus::with_capacity(8);
        assert_eq!(bus.subscribe(None).capacity(), 8);
        assert_eq!(EventBus::new().subscribe(None).capacity(), DEFAULT_QUEUE_CAPACITY);
    }
}
