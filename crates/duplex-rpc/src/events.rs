//! Notification channel: one-way named events in both directions.
//!
//! Incoming notifications fan out to every listener registered for the event
//! name, in registration order. Outgoing notifications ([`emit`]) go to the
//! other peer only and are never delivered to local listeners.
//!
//! [`emit`]: NotificationChannel::emit

use duplex_protocol::Message;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

use crate::error::Result;
use crate::outbound::Outbound;

/// Callback invoked with a notification's params (`Null` when absent).
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle returned by [`NotificationChannel::on`], used to remove exactly
/// that registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct NotificationChannel {
    listeners: RwLock<HashMap<String, Vec<(ListenerId, Listener)>>>,
    next_listener: AtomicU64,
    outbound: Outbound,
}

impl NotificationChannel {
    pub(crate) fn new(outbound: Outbound) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
            outbound,
        }
    }

    /// Register a listener for `event`. The same closure may be registered
    /// more than once; each registration gets its own id.
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let Some(entries) = listeners.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Drop every listener for `event`. Returns how many were removed.
    pub fn remove_all_listeners(&self, event: &str) -> usize {
        self.listeners
            .write()
            .remove(event)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.read().get(event).map_or(0, Vec::len)
    }

    /// Send a notification to the other peer.
    pub fn emit(&self, event: &str, data: Value) -> Result<()> {
        self.outbound.send(Message::notification(event, data))
    }

    /// Deliver an incoming notification. Returns the number of listeners run.
    ///
    /// Listeners run against a snapshot, so one may add or remove
    /// registrations (including its own) while being called. A panicking
    /// listener is logged and the rest still run.
    pub(crate) fn fan_out(&self, event: &str, params: &Value) -> usize {
        let snapshot: Vec<Listener> = match self.listeners.read().get(event) {
            Some(entries) => entries.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => {
                trace!(event, "No listeners for notification");
                return 0;
            }
        };

        for (index, listener) in snapshot.iter().enumerate() {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(params))).is_err() {
                warn!(event, index, "Notification listener panicked");
            }
        }
        snapshot.len()
    }
}
