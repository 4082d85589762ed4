//! Delivery of collector notifications.
//!
//! The runtime hands notifications to subscribers off the caller's thread and
//! with some delay after the collection itself. [`ChannelNotificationSource`]
//! reproduces that: events pushed through a [`NotificationPublisher`] are
//! delivered to every listener by a single background task, in FIFO order.

use crate::event::NotificationEvent;
use dashmap::DashMap;
use parking_lot::Mutex;
use shrinkwraprs::Shrinkwrap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Notification source unavailable: {0}")]
    Unavailable(String),
    #[error("Unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),
    #[error("Notification source has shut down")]
    Closed,
}

/// Handle returned by [`NotificationSource::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Shrinkwrap)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

/// Receives notifications. Called sequentially from the delivery task, never
/// concurrently with itself for the same subscription.
pub trait NotificationListener: Send + Sync {
    fn on_notification(&self, event: &NotificationEvent);
}

/// Asynchronous, best-effort notification feed.
pub trait NotificationSource: Send + Sync {
    fn subscribe(
        &self,
        listener: Arc<dyn NotificationListener>,
    ) -> Result<SubscriptionId, SourceError>;

    /// Stops future deliveries. A delivery already in flight may complete.
    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), SourceError>;
}

/// A reference-counted reference to a [`NotificationSource`].
pub type NotificationSourceRef = Arc<dyn NotificationSource>;

type Listeners = DashMap<SubscriptionId, Arc<dyn NotificationListener>>;

/// Feeds notifications into a [`ChannelNotificationSource`].
#[derive(Debug, Clone)]
pub struct NotificationPublisher {
    sender: mpsc::UnboundedSender<NotificationEvent>,
}

impl NotificationPublisher {
    pub fn publish(&self, event: NotificationEvent) -> Result<(), SourceError> {
        self.sender.send(event).map_err(|_| SourceError::Closed)
    }
}

/// In-process source backed by an unbounded channel and one delivery task.
pub struct ChannelNotificationSource {
    listeners: Arc<Listeners>,
    next_id: AtomicU64,
    delivery: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ChannelNotificationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelNotificationSource")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ChannelNotificationSource {
    /// Starts the delivery task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn spawn() -> (Arc<Self>, NotificationPublisher) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let listeners: Arc<Listeners> = Arc::new(DashMap::new());
        let delivery = tokio::spawn(Self::deliver(receiver, Arc::clone(&listeners)));

        let source = Arc::new(Self {
            listeners,
            next_id: AtomicU64::new(1),
            delivery: Mutex::new(Some(delivery)),
        });

        (source, NotificationPublisher { sender })
    }

    async fn deliver(
        mut receiver: mpsc::UnboundedReceiver<NotificationEvent>,
        listeners: Arc<Listeners>,
    ) {
        while let Some(event) = receiver.recv().await {
            // Snapshot the listeners so no map guard is held during callbacks.
            let targets: Vec<_> = listeners
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect();

            trace!(
                collector = %event.collector_name,
                listeners = targets.len(),
                "Delivering collector notification"
            );

            for listener in targets {
                listener.on_notification(&event);
            }
        }

        debug!("Notification publishers dropped, delivery task exiting");
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    /// Stops the delivery task. Later subscriptions are refused.
    pub fn shutdown(&self) {
        if let Some(delivery) = self.delivery.lock().take() {
            delivery.abort();
        }
        self.listeners.clear();
    }
}

impl NotificationSource for ChannelNotificationSource {
    fn subscribe(
        &self,
        listener: Arc<dyn NotificationListener>,
    ) -> Result<SubscriptionId, SourceError> {
        let running = self
            .delivery
            .lock()
            .as_ref()
            .map_or(false, |delivery| !delivery.is_finished());
        if !running {
            warn!("Subscription refused: delivery task is not running");
            return Err(SourceError::Closed);
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, listener);
        debug!(subscription = %id, "Listener subscribed");

        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), SourceError> {
        match self.listeners.remove(&id) {
            Some(_) => {
                debug!(subscription = %id, "Listener unsubscribed");
                Ok(())
            }
            None => Err(SourceError::UnknownSubscription(id)),
        }
    }
}

impl Drop for ChannelNotificationSource {
    /// Detaches every listener. The delivery task keeps draining until the
    /// last publisher is dropped, so publishing never fails because of this.
    fn drop(&mut self) {
        self.listeners.clear();
        debug!("Notification source dropped, listeners detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl NotificationListener for Recorder {
        fn on_notification(&self, event: &NotificationEvent) {
            self.seen.lock().push(event.cause.clone());
        }
    }

    fn event(cause: &str) -> NotificationEvent {
        NotificationEvent::builder()
            .collector_name("Copy")
            .cause(cause)
            .build()
    }

    async fn wait_for(recorder: &Recorder, expected: usize) {
        for _ in 0..40 {
            if recorder.seen.lock().len() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let (source, publisher) = ChannelNotificationSource::spawn();
        let recorder = Arc::new(Recorder::default());
        source.subscribe(recorder.clone()).unwrap();

        for cause in ["first", "second", "third"] {
            publisher.publish(event(cause)).unwrap();
        }
        wait_for(&recorder, 3).await;

        assert_eq!(*recorder.seen.lock(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let (source, publisher) = ChannelNotificationSource::spawn();
        let recorder = Arc::new(Recorder::default());
        let id = source.subscribe(recorder.clone()).unwrap();

        publisher.publish(event("before")).unwrap();
        wait_for(&recorder, 1).await;
        source.unsubscribe(id).unwrap();
        publisher.publish(event("after")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*recorder.seen.lock(), vec!["before"]);
        assert_eq!(source.subscriber_count(), 0);
        assert_eq!(
            source.unsubscribe(id),
            Err(SourceError::UnknownSubscription(id))
        );
    }

    #[tokio::test]
    async fn dropped_source_detaches_listeners_but_accepts_events() {
        let (source, publisher) = ChannelNotificationSource::spawn();
        let recorder = Arc::new(Recorder::default());
        source.subscribe(recorder.clone()).unwrap();

        publisher.publish(event("before")).unwrap();
        wait_for(&recorder, 1).await;
        drop(source);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(publisher.publish(event("after")), Ok(()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*recorder.seen.lock(), vec!["before"]);
    }

    #[tokio::test]
    async fn shut_down_source_refuses_subscriptions() {
        let (source, publisher) = ChannelNotificationSource::spawn();
        source.shutdown();

        let result = source.subscribe(Arc::new(Recorder::default()));

        assert_eq!(result, Err(SourceError::Closed));
        // The receiving task is gone; publishing eventually reports closure.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(publisher.publish(event("late")), Err(SourceError::Closed));
    }
}
