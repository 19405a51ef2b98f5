//! Mutation event stream: bounded ring plus filtered fan-out.
//!
//! Every successful mutation appends an event to an in-memory ring
//! (drop-oldest on overflow). Subscribers register a filter (ID prefix,
//! event types) and receive matching events as they occur, optionally
//! preceded by a window of history. Fan-out happens outside the store
//! lock: the publisher only touches the broker's own mutex.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::mpsc::{Receiver, Sender, channel};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use beadslog_core::enums::EventType;

/// Default ring capacity.
pub const DEFAULT_RING_CAPACITY: usize = 1024;

/// One mutation event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MutationEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub issue_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl MutationEvent {
    /// Builds a bare event stamped now.
    pub fn new(event_type: EventType, issue_id: impl Into<String>) -> Self {
        Self {
            event_type,
            issue_id: issue_id.into(),
            timestamp: Utc::now(),
            old_status: None,
            new_status: None,
            parent_id: None,
        }
    }
}

/// Subscription filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Only events whose issue ID starts with this prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_prefix: Option<String>,
    /// Only these event types (empty = all).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_types: Vec<EventType>,
}

impl EventFilter {
    /// Returns `true` if the event passes the filter.
    pub fn matches(&self, event: &MutationEvent) -> bool {
        if let Some(ref prefix) = self.id_prefix {
            if !event.issue_id.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        true
    }
}

struct Subscriber {
    filter: EventFilter,
    sender: Sender<MutationEvent>,
}

struct BrokerState {
    ring: VecDeque<MutationEvent>,
    subscribers: Vec<Subscriber>,
}

/// Producer-multiconsumer event broker with a bounded history ring.
pub struct EventBroker {
    capacity: usize,
    state: Mutex<BrokerState>,
}

impl EventBroker {
    /// Creates a broker with the given ring capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(BrokerState {
                ring: VecDeque::with_capacity(capacity),
                subscribers: Vec::new(),
            }),
        }
    }

    /// Appends an event to the ring and fans it out to matching
    /// subscribers. Disconnected subscribers are pruned.
    pub fn publish(&self, event: MutationEvent) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if state.ring.len() == self.capacity {
            state.ring.pop_front(); // drop-oldest
        }
        state.ring.push_back(event.clone());

        state
            .subscribers
            .retain(|sub| !sub.filter.matches(&event) || sub.sender.send(event.clone()).is_ok());
    }

    /// Registers a subscriber.
    ///
    /// Returns the channel of future events plus up to `history` matching
    /// events already in the ring, oldest first.
    pub fn subscribe(
        &self,
        filter: EventFilter,
        history: usize,
    ) -> (Receiver<MutationEvent>, Vec<MutationEvent>) {
        let (sender, receiver) = channel();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let replay: Vec<MutationEvent> = state
            .ring
            .iter()
            .filter(|e| filter.matches(e))
            .rev()
            .take(history)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        state.subscribers.push(Subscriber { filter, sender });
        (receiver, replay)
    }

    /// Number of events currently buffered.
    pub fn ring_len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .ring
            .len()
    }
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}
