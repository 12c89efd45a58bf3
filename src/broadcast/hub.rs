//! Topic registry with coalescing per-subscriber buffers.
//!
//! ```text
//! Ledger ── publish(state) ──> Hub registry (RwLock)
//!                                 │ for each matching subscriber
//!                                 ▼
//!                          buffer[normalized_name] = state   (subscriber Mutex)
//!                                 │ notify
//!                                 ▼
//!                     delivery loop ── drain ──> socket
//! ```
//!
//! `publish` never does I/O and only holds one subscriber's buffer lock at a
//! time, so a stalled socket only ever delays its own delivery loop. Buffers
//! are maps, not queues: memory per subscriber is bounded by the number of
//! locations it watches, and a drain sees the latest state of each.
//!
//! Publishers race each other after their commits, so states can arrive out
//! of order. Each subscriber remembers the newest store version it accepted
//! per location and drops anything older, including states that arrive after
//! the newer one was already drained.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::Notify;

use super::messages::{LocationState, TopicSelector};

#[derive(Debug, Default)]
struct Pending {
    /// Undelivered state per normalized name
    states: HashMap<String, LocationState>,
    /// Newest `(location_id, version)` accepted per normalized name
    newest: HashMap<String, (String, u64)>,
}

impl Pending {
    fn accept(&mut self, state: LocationState) -> bool {
        if let Some((id, version)) = self.newest.get(&state.normalized_name) {
            if *id == state.location_id && *version >= state.version {
                return false;
            }
        }
        self.newest.insert(
            state.normalized_name.clone(),
            (state.location_id.clone(), state.version),
        );
        self.states.insert(state.normalized_name.clone(), state);
        true
    }
}

/// One live connection's registration
#[derive(Debug)]
pub struct Subscriber {
    buffer: Mutex<Pending>,
    id: u64,
    peer: String,
    selector: TopicSelector,
    wakeup: Notify,
}

impl Subscriber {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn selector(&self) -> &TopicSelector {
        &self.selector
    }

    /// Buffer a location's state if the selector wants it and nothing newer
    /// was accepted already. Returns whether the state was kept.
    pub fn offer(&self, state: LocationState) -> bool {
        if !self.selector.matches(&state.normalized_name) {
            return false;
        }
        let accepted = self
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .accept(state);
        if accepted {
            self.wakeup.notify_one();
        }
        accepted
    }

    /// Empty the buffer, returning everything that accumulated since the last take
    pub fn take(&self) -> HashMap<String, LocationState> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut buffer.states)
    }

    /// Resolves once something was offered since the last wakeup. A wakeup
    /// that fires while nobody waits is kept for the next call.
    pub async fn changed(&self) {
        self.wakeup.notified().await;
    }
}

/// Registry of live subscribers, shared by the ledger and the delivery loops
#[derive(Debug, Default)]
pub struct BroadcastHub {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<u64, Arc<Subscriber>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection
    pub fn subscribe(&self, peer: impl Into<String>, selector: TopicSelector) -> Arc<Subscriber> {
        let subscriber = Arc::new(Subscriber {
            buffer: Mutex::new(Pending::default()),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            peer: peer.into(),
            selector,
            wakeup: Notify::new(),
        });

        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subscriber.id, Arc::clone(&subscriber));

        tracing::debug!(
            subscriber_id = subscriber.id,
            peer = %subscriber.peer,
            selector = ?subscriber.selector,
            "Subscriber registered"
        );
        subscriber
    }

    /// Fan a location's new state out to every matching subscriber.
    /// Returns how many subscribers kept it.
    pub fn publish(&self, state: &LocationState) -> usize {
        let subscribers = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);

        let delivered = subscribers
            .values()
            .filter(|s| s.offer(state.clone()))
            .count();

        tracing::trace!(
            normalized_name = %state.normalized_name,
            available = state.available,
            delivered,
            "Published location state"
        );
        delivered
    }

    /// Atomically empty a subscriber's buffer
    pub fn drain(&self, subscriber: &Subscriber) -> HashMap<String, LocationState> {
        subscriber.take()
    }

    /// Remove a registration. Safe to call more than once.
    pub fn unsubscribe(&self, subscriber: &Subscriber) -> bool {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&subscriber.id)
            .is_some();

        if removed {
            tracing::debug!(
                subscriber_id = subscriber.id,
                peer = %subscriber.peer,
                "Subscriber removed"
            );
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn state(name: &str, available: u32, version: u64) -> LocationState {
        LocationState {
            available,
            available_yesterday: 0,
            capacity: 10,
            capacity_yesterday: 0,
            location_id: format!("id-{name}"),
            normalized_name: name.to_string(),
            version,
            yesterday_full_at: None,
        }
    }

    #[test]
    fn test_publish_coalesces_to_latest() {
        let hub = BroadcastHub::new();
        let sub = hub.subscribe("peer", TopicSelector::AllLocations);

        hub.publish(&state("zoo", 9, 1));
        hub.publish(&state("zoo", 8, 2));

        let drained = hub.drain(&sub);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained["zoo"].available, 8);
        assert!(hub.drain(&sub).is_empty());
    }

    #[test]
    fn test_out_of_order_publish_keeps_newest() {
        let hub = BroadcastHub::new();
        let sub = hub.subscribe("peer", TopicSelector::AllLocations);

        hub.publish(&state("zoo", 7, 3));
        assert_eq!(hub.publish(&state("zoo", 8, 2)), 0);
        assert_eq!(hub.drain(&sub)["zoo"].available, 7);

        // Already delivered version 3; a late version 2 is never sent after it
        assert_eq!(hub.publish(&state("zoo", 8, 2)), 0);
        assert!(hub.drain(&sub).is_empty());

        hub.publish(&state("zoo", 6, 4));
        assert_eq!(hub.drain(&sub)["zoo"].available, 6);
    }

    #[test]
    fn test_recreated_location_starts_a_new_history() {
        let hub = BroadcastHub::new();
        let sub = hub.subscribe("peer", TopicSelector::AllLocations);

        hub.publish(&state("zoo", 1, 40));
        hub.drain(&sub);

        let mut fresh = state("zoo", 10, 0);
        fresh.location_id = "id-zoo-2".to_string();
        assert_eq!(hub.publish(&fresh), 1);
        assert_eq!(hub.drain(&sub)["zoo"].available, 10);
    }

    #[test]
    fn test_single_location_selector_filters() {
        let hub = BroadcastHub::new();
        let all = hub.subscribe("a", TopicSelector::AllLocations);
        let zoo = hub.subscribe("b", TopicSelector::SingleLocation("zoo".to_string()));

        assert_eq!(hub.publish(&state("zoo", 5, 1)), 2);
        assert_eq!(hub.publish(&state("museum", 5, 1)), 1);

        assert_eq!(hub.drain(&all).len(), 2);
        let only_zoo = hub.drain(&zoo);
        assert_eq!(only_zoo.len(), 1);
        assert!(only_zoo.contains_key("zoo"));
    }

    #[test]
    fn test_unsubscribe_is_idempotent_and_isolated() {
        let hub = BroadcastHub::new();
        let gone = hub.subscribe("a", TopicSelector::AllLocations);
        let stays = hub.subscribe("b", TopicSelector::AllLocations);

        assert!(hub.unsubscribe(&gone));
        assert!(!hub.unsubscribe(&gone));
        assert_eq!(hub.subscriber_count(), 1);

        assert_eq!(hub.publish(&state("zoo", 3, 1)), 1);
        assert!(hub.drain(&gone).is_empty());
        assert_eq!(hub.drain(&stays)["zoo"].available, 3);
    }

    #[test]
    fn test_undrained_buffer_stays_bounded() {
        let hub = BroadcastHub::new();
        let slow = hub.subscribe("slow", TopicSelector::AllLocations);

        for i in 0..1000u32 {
            hub.publish(&state(["a", "b", "c"][(i % 3) as usize], i, u64::from(i) + 1));
        }

        let drained = hub.drain(&slow);
        assert_eq!(drained.len(), 3);
        assert_eq!(drained["a"].available, 999);
    }

    #[test]
    fn test_concurrent_registration() {
        let hub = Arc::new(BroadcastHub::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let hub = Arc::clone(&hub);
                std::thread::spawn(move || {
                    let sub = hub.subscribe(format!("peer-{i}"), TopicSelector::AllLocations);
                    hub.publish(&state("zoo", i, u64::from(i)));
                    if i % 2 == 0 {
                        hub.unsubscribe(&sub);
                    }
                    sub.id()
                })
            })
            .collect();

        let mut ids: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 8);
        assert_eq!(hub.subscriber_count(), 4);
    }

    #[test]
    fn test_seeding_never_overwrites_published_state() {
        let hub = BroadcastHub::new();
        let sub = hub.subscribe("peer", TopicSelector::AllLocations);

        hub.publish(&state("zoo", 4, 5));
        assert!(!sub.offer(state("zoo", 9, 4)));
        assert!(sub.offer(state("museum", 7, 1)));

        let drained = hub.drain(&sub);
        assert_eq!(drained["zoo"].available, 4);
        assert_eq!(drained["museum"].available, 7);
    }

    #[tokio::test]
    async fn test_changed_wakes_after_offer() {
        let hub = BroadcastHub::new();
        let sub = hub.subscribe("peer", TopicSelector::AllLocations);

        // Offer before anyone waits; the permit is kept
        hub.publish(&state("zoo", 1, 1));
        tokio::time::timeout(Duration::from_secs(1), sub.changed())
            .await
            .expect("wakeup should be stored");

        // Nothing new: waiting times out
        assert!(tokio::time::timeout(Duration::from_millis(50), sub.changed())
            .await
            .is_err());
    }
}
