//! Registry events and the observer bus
//!
//! Every state transition the outside world may care about is a
//! [`CacheEvent`]. Observers are called synchronously, in subscription
//! order, on the task that produced the event.

use std::sync::{Arc, PoisonError, RwLock};

use crate::resource::Snapshot;

/// New content stored for a resource
#[derive(Debug, Clone)]
pub struct ResourceUpdate {
    pub alias: String,
    pub snapshot: Arc<Snapshot>,
}

impl ResourceUpdate {
    /// Resumption token for a shared channel: `alias-hash`
    pub fn event_id(&self) -> String {
        format!("{}-{}", self.alias, self.snapshot.hash)
    }
}

/// Registry lifecycle and content events
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A resource passed validation and is about to be started
    Added { alias: String },
    /// A fetch produced content with a new hash
    Updated(ResourceUpdate),
    /// A resource was removed from the registry
    Removed { alias: String },
    /// All fetch loops were started
    Started,
    /// All fetch loops were stopped
    Stopped,
}

impl CacheEvent {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            CacheEvent::Added { .. } => "added",
            CacheEvent::Updated(_) => "updated",
            CacheEvent::Removed { .. } => "removed",
            CacheEvent::Started => "started",
            CacheEvent::Stopped => "stopped",
        }
    }
}

/// Receiver of registry events
pub trait CacheObserver: Send + Sync {
    fn on_event(&self, event: &CacheEvent);
}

impl<F> CacheObserver for F
where
    F: Fn(&CacheEvent) + Send + Sync,
{
    fn on_event(&self, event: &CacheEvent) {
        self(event)
    }
}

/// Fan-out of [`CacheEvent`]s to registered observers
#[derive(Default)]
pub struct EventBus {
    observers: RwLock<Vec<Arc<dyn CacheObserver>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for all future events
    pub fn subscribe(&self, observer: Arc<dyn CacheObserver>) {
        self.observers.write().unwrap_or_else(PoisonError::into_inner).push(observer);
    }

    /// Deliver an event to every observer
    pub fn publish(&self, event: &CacheEvent) {
        // Observers may subscribe others; never call out with the lock held
        let observers = self.observers.read().unwrap_or_else(PoisonError::into_inner).clone();

        log::trace!("publishing {} event to {} observers", event.kind(), observers.len());
        for observer in observers {
            observer.on_event(event);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_publish_reaches_every_observer_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = seen.clone();
            bus.subscribe(Arc::new(move |event: &CacheEvent| {
                seen.lock().unwrap().push(format!("{}:{}", tag, event.kind()));
            }));
        }

        bus.publish(&CacheEvent::Started);
        bus.publish(&CacheEvent::Removed { alias: "a".into() });

        assert_eq!(bus.observer_count(), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:started", "second:started", "first:removed", "second:removed"]
        );
    }

    #[test]
    fn test_update_event_id() {
        let snapshot = Snapshot { hash: "abc".into(), ..Snapshot::empty() };
        let update = ResourceUpdate { alias: "clock".into(), snapshot: Arc::new(snapshot) };
        assert_eq!(update.event_id(), "clock-abc");
    }
}
