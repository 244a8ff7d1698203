//! Per-topic listener registry with isolated fan-out.

use crate::onchain::types::ProtocolEvent;
use dashmap::DashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// Topic carrying every classified event.
pub const EVENT_TOPIC: &str = "event";

/// A registered callback. Identity (for `off`) is the `Arc` allocation.
pub type Listener = Arc<dyn Fn(&ProtocolEvent) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&ProtocolEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Default)]
pub struct EventDispatcher {
    listeners: DashMap<String, Vec<Listener>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener. Registering the same listener twice means it
    /// fires twice.
    pub fn on(&self, topic: &str, listener: Listener) {
        self.listeners
            .entry(topic.to_string())
            .or_default()
            .push(listener);
    }

    /// Remove the first registration of `listener`. Returns whether one was
    /// found.
    pub fn off(&self, topic: &str, listener: &Listener) -> bool {
        let Some(mut list) = self.listeners.get_mut(topic) else {
            return false;
        };
        match list.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(idx) => {
                list.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.listeners.get(topic).map(|l| l.len()).unwrap_or(0)
    }

    /// Deliver `event` to a snapshot of the topic's listeners, in
    /// registration order. A listener that errors or panics is logged and
    /// skipped. Returns the number of listeners that succeeded.
    pub fn dispatch(&self, topic: &str, event: &ProtocolEvent) -> usize {
        // Snapshot so listeners may call on/off without touching this fan-out.
        let snapshot: Vec<Listener> = self
            .listeners
            .get(topic)
            .map(|l| l.value().clone())
            .unwrap_or_default();

        let mut delivered = 0;
        for (idx, listener) in snapshot.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    error!(topic = topic, listener = idx, error = %e, "listener failed");
                }
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(topic = topic, listener = idx, panic = %reason, "listener panicked");
                }
            }
        }
        delivered
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics: Vec<(String, usize)> = self
            .listeners
            .iter()
            .map(|e| (e.key().clone(), e.value().len()))
            .collect();
        f.debug_struct("EventDispatcher")
            .field("listeners", &topics)
            .finish()
    }
}
