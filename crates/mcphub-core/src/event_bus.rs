//! Event bus: fan-out with per-subscriber queues
//!
//! Single producer path per emission site, many consumers. Each
//! subscriber owns a bounded queue and receives matching events in
//! emission order. A subscriber whose queue fills up is dropped and its
//! channel closed; the producer never blocks on a slow consumer.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::event::{HubEvent, SubscriptionEventType};

/// Default bound on a subscriber's queue.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Unique identity of one subscriber.
pub type SubscriberId = Uuid;

/// Which events a subscriber wants.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// `None` accepts every subscription subtype; otherwise only the
    /// listed ones. `HUB_STATE` and `LOG` events always pass.
    pub subtypes: Option<HashSet<SubscriptionEventType>>,
}

impl EventFilter {
    /// Accept everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn subtypes(subtypes: impl IntoIterator<Item = SubscriptionEventType>) -> Self {
        Self {
            subtypes: Some(subtypes.into_iter().collect()),
        }
    }

    fn matches(&self, event: &HubEvent) -> bool {
        match event {
            HubEvent::Subscription { subtype, .. } => self
                .subtypes
                .as_ref()
                .map(|set| set.contains(subtype))
                .unwrap_or(true),
            HubEvent::HubState { .. } | HubEvent::Log { .. } => true,
        }
    }
}

struct SubscriberEntry {
    filter: EventFilter,
    tx: mpsc::Sender<HubEvent>,
}

/// A live subscription: consume events from `rx`; dropping it (or the
/// bus dropping the sender on overflow) ends the subscription.
pub struct Subscription {
    pub id: SubscriberId,
    pub rx: mpsc::Receiver<HubEvent>,
    bus: Arc<SubscriberMap>,
}

type SubscriberMap = DashMap<SubscriberId, SubscriberEntry>;

impl Subscription {
    pub async fn recv(&mut self) -> Option<HubEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.remove(&self.id);
    }
}

/// The fan-out bus.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<SubscriberMap>,
    queue_capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a subscriber with a filter over subscription subtypes.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.subscribers.insert(id, SubscriberEntry { filter, tx });
        debug!(subscriber = %id, total = self.subscribers.len(), "Subscriber registered");
        Subscription {
            id,
            rx,
            bus: Arc::clone(&self.subscribers),
        }
    }

    /// Remove a subscriber explicitly (normally handled by `Drop`).
    pub fn unsubscribe(&self, id: &SubscriberId) {
        if self.subscribers.remove(id).is_some() {
            debug!(subscriber = %id, "Subscriber removed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver `event` to every matching subscriber, preserving
    /// per-subscriber FIFO order. A full queue drops that subscriber.
    /// Never blocks and never raises into the caller.
    pub fn emit(&self, event: HubEvent) {
        let mut dropped: Vec<SubscriberId> = Vec::new();

        for entry in self.subscribers.iter() {
            if !entry.filter.matches(&event) {
                continue;
            }
            match entry.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        subscriber = %entry.key(),
                        "Subscriber queue full, dropping subscriber"
                    );
                    dropped.push(*entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push(*entry.key());
                }
            }
        }

        // Removing the entry drops the sender, closing the channel.
        for id in dropped {
            self.subscribers.remove(&id);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::HubState;

    #[tokio::test]
    async fn delivers_in_emission_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());

        bus.emit(HubEvent::hub_state(HubState::Starting));
        bus.emit(HubEvent::hub_state(HubState::Ready));

        assert!(matches!(
            sub.recv().await.unwrap(),
            HubEvent::HubState {
                state: HubState::Starting
            }
        ));
        assert!(matches!(
            sub.recv().await.unwrap(),
            HubEvent::HubState {
                state: HubState::Ready
            }
        ));
    }

    #[tokio::test]
    async fn filter_restricts_subtypes() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventFilter::subtypes([
            SubscriptionEventType::ToolListChanged,
        ]));

        bus.emit(HubEvent::subscription(
            SubscriptionEventType::PromptListChanged,
            None,
        ));
        bus.emit(HubEvent::subscription(
            SubscriptionEventType::ToolListChanged,
            None,
        ));

        match sub.recv().await.unwrap() {
            HubEvent::Subscription { subtype, .. } => {
                assert_eq!(subtype, SubscriptionEventType::ToolListChanged)
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn hub_state_passes_any_filter() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventFilter::subtypes([
            SubscriptionEventType::ConfigChanged,
        ]));
        bus.emit(HubEvent::hub_state(HubState::Ready));
        assert!(matches!(
            sub.recv().await.unwrap(),
            HubEvent::HubState { .. }
        ));
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_not_blocking() {
        let bus = EventBus::with_queue_capacity(2);
        let mut slow = bus.subscribe(EventFilter::all());

        // Overflow the slow subscriber's queue without consuming.
        for _ in 0..3 {
            bus.emit(HubEvent::hub_state(HubState::Ready));
        }
        assert_eq!(bus.subscriber_count(), 0);

        // The channel closes after the buffered items drain.
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_none());

        // Later subscribers are unaffected.
        let mut healthy = bus.subscribe(EventFilter::all());
        bus.emit(HubEvent::hub_state(HubState::Stopping));
        assert!(healthy.recv().await.is_some());
    }

    #[tokio::test]
    async fn dropping_subscription_releases_queue() {
        let bus = EventBus::new();
        let sub = bus.subscribe(EventFilter::all());
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
