use model::events::Event;
use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone)]
pub struct Subscription {
    event_type_id: TypeId,
    subscriber_id: u64,
}

type Senders = HashMap<u64, Box<dyn Any + Send + Sync>>;

/// Typed fan-out of pipeline events (no-more-data, batch processed,
/// offset committed) to any number of listeners. Delivery never blocks
/// the publisher: a full subscriber channel drops the event.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<TypeId, Senders>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe<E>(&self, sender: mpsc::Sender<Arc<E>>) -> Subscription
    where
        E: Event,
    {
        let event_type_id = TypeId::of::<E>();
        let subscriber_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .write()
            .await
            .entry(event_type_id)
            .or_default()
            .insert(subscriber_id, Box::new(sender));

        debug!(
            event_type = std::any::type_name::<E>(),
            subscriber_id, "Subscribed to event"
        );

        Subscription {
            event_type_id,
            subscriber_id,
        }
    }

    /// Subscribes through a fresh bounded channel.
    pub async fn listen<E>(&self, capacity: usize) -> (Subscription, mpsc::Receiver<Arc<E>>)
    where
        E: Event,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (self.subscribe(tx).await, rx)
    }

    /// Returns how many subscribers accepted the event.
    pub async fn publish<E>(&self, event: E) -> usize
    where
        E: Event,
    {
        let event_type_id = TypeId::of::<E>();
        let event = Arc::new(event);
        let subscribers = self.subscribers.read().await;

        let Some(type_subscribers) = subscribers.get(&event_type_id) else {
            debug!(
                event_type = event.event_type(),
                "No subscribers for event"
            );
            return 0;
        };

        let mut delivered = 0;
        for (subscriber_id, boxed) in type_subscribers {
            let Some(sender) = boxed.downcast_ref::<mpsc::Sender<Arc<E>>>() else {
                warn!(
                    event_type = event.event_type(),
                    subscriber_id, "Failed to downcast sender for subscriber"
                );
                continue;
            };

            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    event_type = event.event_type(),
                    subscriber_id,
                    error = %e,
                    "Dropped event for subscriber"
                ),
            }
        }

        delivered
    }

    pub async fn unsubscribe(&self, subscription: Subscription) {
        let mut subscribers = self.subscribers.write().await;

        if let Some(type_subscribers) = subscribers.get_mut(&subscription.event_type_id) {
            type_subscribers.remove(&subscription.subscriber_id);
            debug!(
                subscriber_id = subscription.subscriber_id,
                "Unsubscribed from event"
            );

            if type_subscribers.is_empty() {
                subscribers.remove(&subscription.event_type_id);
            }
        }
    }

    pub async fn subscriber_count<E>(&self) -> usize
    where
        E: Event,
    {
        self.subscribers
            .read()
            .await
            .get(&TypeId::of::<E>())
            .map_or(0, HashMap::len)
    }
}
