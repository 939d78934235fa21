//! A prioritised, de-duplicated event bus.
//!
//! Subscribers are held in one contiguous vector sorted by `(priority,
//! insertion order)`, so emission is a cache-friendly linear walk. A handler
//! is identified by its [`Arc`] allocation: subscribing the same handler
//! twice updates its priority instead of adding a duplicate.

use std::sync::Arc;

/// A subscriber callback. Clone the `Arc` to keep an unsubscribe key.
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Wrap a closure into a [`Handler`].
pub fn handler<E, F: Fn(&E) + Send + Sync + 'static>(callback: F) -> Handler<E> {
    Arc::new(callback)
}

struct Subscriber<E> {
    callback: Handler<E>,
    priority: i32,
    /// Insertion counter, breaks priority ties.
    seq: u64,
}

/// An ordered list of subscribers for one event type.
pub struct EventBus<E> {
    subscribers: Vec<Subscriber<E>>,
    next_seq: u64,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
            next_seq: 0,
        }
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `callback` with the given priority (lower runs first); returns
    /// `self` for chaining.
    ///
    /// Re-subscribing an already-known handler does not add a second entry;
    /// it updates the stored priority (keeping the original insertion order
    /// for ties).
    pub fn subscribe(&mut self, callback: Handler<E>, priority: i32) -> &mut Self {
        if let Some(existing) = self
            .subscribers
            .iter_mut()
            .find(|subscriber| Arc::ptr_eq(&subscriber.callback, &callback))
        {
            if existing.priority != priority {
                existing.priority = priority;
                self.sort();
            }
            return self;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.subscribers.push(Subscriber {
            callback,
            priority,
            seq,
        });
        self.sort();
        self
    }

    /// Remove `callback`. Returns whether it was subscribed.
    pub fn unsubscribe(&mut self, callback: &Handler<E>) -> bool {
        let before = self.subscribers.len();
        self.subscribers
            .retain(|subscriber| !Arc::ptr_eq(&subscriber.callback, callback));
        self.subscribers.len() != before
    }

    /// Remove every subscriber.
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    /// Invoke every subscriber in `(priority, insertion)` order.
    pub fn emit(&self, event: &E) {
        for subscriber in &self.subscribers {
            (subscriber.callback)(event);
        }
    }

    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn sort(&mut self) {
        self.subscribers
            .sort_by_key(|subscriber| (subscriber.priority, subscriber.seq));
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<i32>>>, tag: i32) -> Handler<()> {
        let log = Arc::clone(log);
        handler(move |_| log.lock().unwrap().push(tag))
    }

    #[test]
    fn emit_runs_in_priority_then_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.subscribe(recorder(&log, 3), 10)
            .subscribe(recorder(&log, 1), -5)
            .subscribe(recorder(&log, 2), 0)
            .subscribe(recorder(&log, 4), 10); // ties with tag 3, inserted later

        bus.emit(&());
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn duplicate_subscribe_updates_priority() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        let first = recorder(&log, 1);
        let second = recorder(&log, 2);

        bus.subscribe(Arc::clone(&first), 0)
            .subscribe(Arc::clone(&second), 1)
            .subscribe(Arc::clone(&first), 0);
        assert_eq!(bus.subscriber_count(), 2);

        // Re-subscribing with a new priority re-orders.
        bus.subscribe(Arc::clone(&first), 5);
        assert_eq!(bus.subscriber_count(), 2);
        bus.emit(&());
        assert_eq!(*log.lock().unwrap(), vec![2, 1]);
    }

    #[test]
    fn unsubscribe_removes_only_the_given_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        let kept = recorder(&log, 1);
        let removed = recorder(&log, 2);
        bus.subscribe(Arc::clone(&kept), 0)
            .subscribe(Arc::clone(&removed), 0);

        assert!(bus.unsubscribe(&removed));
        assert!(!bus.unsubscribe(&removed));
        bus.emit(&());
        assert_eq!(*log.lock().unwrap(), vec![1]);
    }

    #[test]
    fn clear_and_counts() {
        let mut bus: EventBus<u32> = EventBus::new();
        assert!(!bus.has_subscribers());
        bus.subscribe(handler(|_| {}), 0);
        assert!(bus.has_subscribers());
        assert_eq!(bus.subscriber_count(), 1);
        bus.clear();
        assert!(!bus.has_subscribers());
    }

    #[test]
    fn emit_carries_the_event_payload() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus: EventBus<u32> = EventBus::new();
        let seen_in = Arc::clone(&seen);
        bus.subscribe(handler(move |value: &u32| seen_in.lock().unwrap().push(*value)), 0);
        bus.emit(&7);
        bus.emit(&9);
        assert_eq!(*seen.lock().unwrap(), vec![7, 9]);
    }
}
