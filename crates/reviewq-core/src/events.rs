//! Event broker and push frame schema for live progress delivery.
//!
//! The broker is a publish/subscribe hub with two addressing modes:
//!
//! - **per-user**: `subscribe(user, event_type)` / `publish(user, event_type)`
//!   reaches only subscriptions registered for that exact pair;
//! - **per-channel**: `subscribe_channel(channel)` / `broadcast(channel)`
//!   reaches every current subscriber of the channel, regardless of identity.
//!   Channels let a push connection and a workflow started by another request
//!   rendezvous on a shared id.
//!
//! Callbacks run synchronously on the publishing task. A callback that
//! returns an error or panics is logged and skipped; the remaining
//! subscribers still receive the event. Within one key, callbacks fire in
//! subscription order.
//!
//! [`InMemoryEventBroker`] keeps subscriptions in process memory, so
//! subscribers and publishers must live in the same process. Services take an
//! `Arc<dyn EventBroker>` so a networked backend can replace it.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::Result;

/// Frame type reserved for the push handshake.
pub const CONNECTED_FRAME_TYPE: &str = "connected";

/// Well-known domain event types.
pub mod event_types {
    pub const TASK_QUEUED: &str = "task-queued";
    pub const TASK_STARTED: &str = "task-started";
    pub const TASK_COMPLETED: &str = "task-completed";
    pub const TASK_FAILED: &str = "task-failed";
    pub const TASK_CANCELLED: &str = "task-cancelled";
    pub const CHECKLIST_PROGRESS: &str = "checklist-progress";
    pub const CHECKLIST_COMPLETED: &str = "checklist-completed";
    pub const REVIEW_PROGRESS: &str = "review-progress";
    pub const REVIEW_COMPLETED: &str = "review-completed";
    pub const QA_DELTA: &str = "qa-delta";
    pub const QA_DONE: &str = "qa-done";
    pub const QA_ERROR: &str = "qa-error";

    /// Event types a per-user push connection subscribes to.
    pub const USER_STREAM: [&str; 9] = [
        TASK_QUEUED,
        TASK_STARTED,
        TASK_COMPLETED,
        TASK_FAILED,
        TASK_CANCELLED,
        CHECKLIST_PROGRESS,
        CHECKLIST_COMPLETED,
        REVIEW_PROGRESS,
        REVIEW_COMPLETED,
    ];
}

/// An event delivered to subscriber callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerEvent {
    pub event_type: String,
    pub data: JsonValue,
}

impl BrokerEvent {
    pub fn new(event_type: impl Into<String>, data: JsonValue) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}

/// Subscriber callback. An `Err` is logged and does not stop the fan-out.
pub type EventCallback = Arc<dyn Fn(&BrokerEvent) -> Result<()> + Send + Sync>;

/// Handle returned by subscribe calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Publish/subscribe hub addressed per user or per channel.
pub trait EventBroker: Send + Sync {
    /// Register `callback` for events of `event_type` addressed to `user_id`.
    fn subscribe(&self, user_id: &str, event_type: &str, callback: EventCallback)
        -> SubscriptionId;

    /// Deliver to the user's subscriptions for `event_type`; returns how many
    /// callbacks accepted the event.
    fn publish(&self, user_id: &str, event_type: &str, data: JsonValue) -> usize;

    /// Register `callback` for every event broadcast on `channel`.
    fn subscribe_channel(&self, channel: &str, callback: EventCallback) -> SubscriptionId;

    /// Deliver to every current subscriber of `channel`.
    fn broadcast(&self, channel: &str, event: BrokerEvent) -> usize;

    /// Remove one subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Remove every per-user subscription of `user_id`. Unknown users are ignored.
    fn unsubscribe_all(&self, user_id: &str);

    /// Total live subscriptions.
    fn subscriber_count(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SubscriptionKey {
    User { user_id: String, event_type: String },
    Channel(String),
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    callback: EventCallback,
}

#[derive(Default)]
struct Registry {
    by_key: HashMap<SubscriptionKey, Vec<Subscription>>,
    key_of: HashMap<SubscriptionId, SubscriptionKey>,
}

impl Registry {
    fn insert(&mut self, key: SubscriptionKey, callback: EventCallback) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.by_key
            .entry(key.clone())
            .or_default()
            .push(Subscription { id, callback });
        self.key_of.insert(id, key);
        id
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let Some(key) = self.key_of.remove(&id) else {
            return false;
        };
        if let Some(subs) = self.by_key.get_mut(&key) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                self.by_key.remove(&key);
            }
        }
        true
    }
}

/// Process-local [`EventBroker`].
#[derive(Default)]
pub struct InMemoryEventBroker {
    registry: RwLock<Registry>,
}

impl InMemoryEventBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot the subscribers of a key so callbacks run without the lock
    /// held; a callback may then (un)subscribe without deadlocking.
    fn snapshot(&self, key: &SubscriptionKey) -> Vec<Subscription> {
        self.read().by_key.get(key).cloned().unwrap_or_default()
    }

    fn deliver(subscribers: Vec<Subscription>, event: &BrokerEvent) -> usize {
        let mut delivered = 0;
        for sub in subscribers {
            match catch_unwind(AssertUnwindSafe(|| (sub.callback)(event))) {
                Ok(Ok(())) => {
                    delivered += 1;
                    trace!(event_type = %event.event_type, subscription = ?sub.id, "Event delivered");
                }
                Ok(Err(e)) => {
                    warn!(
                        subsystem = "broker",
                        event_type = %event.event_type,
                        subscription = ?sub.id,
                        error = %e,
                        "Subscriber callback failed"
                    );
                }
                Err(_) => {
                    warn!(
                        subsystem = "broker",
                        event_type = %event.event_type,
                        subscription = ?sub.id,
                        "Subscriber callback panicked"
                    );
                }
            }
        }
        delivered
    }
}

impl EventBroker for InMemoryEventBroker {
    fn subscribe(
        &self,
        user_id: &str,
        event_type: &str,
        callback: EventCallback,
    ) -> SubscriptionId {
        let key = SubscriptionKey::User {
            user_id: user_id.to_string(),
            event_type: event_type.to_string(),
        };
        let id = self.write().insert(key, callback);
        debug!(subsystem = "broker", user_id, event_type, subscription = ?id, "Subscribed");
        id
    }

    fn publish(&self, user_id: &str, event_type: &str, data: JsonValue) -> usize {
        if event_type == CONNECTED_FRAME_TYPE {
            warn!(subsystem = "broker", user_id, "Refusing to publish reserved event type");
            return 0;
        }
        let key = SubscriptionKey::User {
            user_id: user_id.to_string(),
            event_type: event_type.to_string(),
        };
        let subscribers = self.snapshot(&key);
        let event = BrokerEvent::new(event_type, data);
        let delivered = Self::deliver(subscribers, &event);
        debug!(subsystem = "broker", op = "publish", user_id, event_type, delivered, "Event published");
        delivered
    }

    fn subscribe_channel(&self, channel: &str, callback: EventCallback) -> SubscriptionId {
        let id = self
            .write()
            .insert(SubscriptionKey::Channel(channel.to_string()), callback);
        debug!(subsystem = "broker", channel, subscription = ?id, "Subscribed to channel");
        id
    }

    fn broadcast(&self, channel: &str, event: BrokerEvent) -> usize {
        if event.event_type == CONNECTED_FRAME_TYPE {
            warn!(subsystem = "broker", channel, "Refusing to broadcast reserved event type");
            return 0;
        }
        let subscribers = self.snapshot(&SubscriptionKey::Channel(channel.to_string()));
        let delivered = Self::deliver(subscribers, &event);
        debug!(
            subsystem = "broker",
            op = "broadcast",
            channel,
            event_type = %event.event_type,
            delivered,
            "Event broadcast"
        );
        delivered
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if self.write().remove(id) {
            debug!(subsystem = "broker", subscription = ?id, "Unsubscribed");
        }
    }

    fn unsubscribe_all(&self, user_id: &str) {
        let mut registry = self.write();
        let ids: Vec<SubscriptionId> = registry
            .key_of
            .iter()
            .filter(|(_, key)| {
                matches!(key, SubscriptionKey::User { user_id: u, .. } if u == user_id)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            registry.remove(*id);
        }
        if !ids.is_empty() {
            debug!(subsystem = "broker", user_id, removed = ids.len(), "Unsubscribed user");
        }
    }

    fn subscriber_count(&self) -> usize {
        self.read().key_of.len()
    }
}

// ============================================================================
// Push frames
// ============================================================================

/// Wire frame sent over a push connection; one JSON object per frame.
///
/// ```text
/// {"type":"connected","connection_id":"…"}
/// {"type":"review-progress","data":{"target_id":"…","completed_items":10,"total_items":40}}
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum PushFrame {
    /// Handshake sent once when the connection opens.
    Connected { connection_id: Uuid },
    /// A domain event.
    Event(BrokerEvent),
}

impl PushFrame {
    pub fn frame_type(&self) -> &str {
        match self {
            PushFrame::Connected { .. } => CONNECTED_FRAME_TYPE,
            PushFrame::Event(event) => &event.event_type,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            PushFrame::Connected { connection_id } => serde_json::json!({
                "type": CONNECTED_FRAME_TYPE,
                "connection_id": connection_id,
            }),
            PushFrame::Event(event) => serde_json::json!({
                "type": event.event_type,
                "data": event.data,
            }),
        }
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
