//! Listener registry.
//!
//! Callbacks are registered with a set of event kinds and an optional topic
//! pattern (prefix rule of the subscription matcher). The registry only
//! selects callbacks; the caller invokes them after releasing its lock so a
//! callback never observes a half-applied change and may call back into the
//! client.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::broker::subscription;
use crate::client::reconciler::TopicEvent;

pub type ListenerId = u64;
pub type Callback = Arc<dyn Fn(&TopicEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Publish,
    Unpublish,
    ValueRemote,
    ValueLocal,
    Properties,
    Connected,
    Disconnected,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::Publish,
        EventKind::Unpublish,
        EventKind::ValueRemote,
        EventKind::ValueLocal,
        EventKind::Properties,
        EventKind::Connected,
        EventKind::Disconnected,
    ];

    pub fn of(event: &TopicEvent) -> Self {
        match event {
            TopicEvent::Published { .. } => EventKind::Publish,
            TopicEvent::Unpublished { .. } => EventKind::Unpublish,
            TopicEvent::Properties { .. } => EventKind::Properties,
            TopicEvent::Value { remote: true, .. } => EventKind::ValueRemote,
            TopicEvent::Value { remote: false, .. } => EventKind::ValueLocal,
            TopicEvent::Connected => EventKind::Connected,
            TopicEvent::Disconnected => EventKind::Disconnected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerOptions {
    pub kinds: HashSet<EventKind>,
    /// Fire once for the current state when registered.
    pub immediate: bool,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            kinds: EventKind::ALL.into_iter().collect(),
            immediate: false,
        }
    }
}

impl ListenerOptions {
    pub fn kinds(kinds: &[EventKind]) -> Self {
        Self {
            kinds: kinds.iter().copied().collect(),
            immediate: false,
        }
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

struct Listener {
    callback: Callback,
    kinds: HashSet<EventKind>,
    pattern: Option<String>,
}

impl Listener {
    fn wants(&self, event: &TopicEvent) -> bool {
        if !self.kinds.contains(&EventKind::of(event)) {
            return false;
        }
        match (&self.pattern, event.topic_name()) {
            (Some(pattern), Some(name)) => {
                subscription::matches(name, std::slice::from_ref(pattern), true)
            }
            _ => true,
        }
    }
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: BTreeMap<ListenerId, Listener>,
    next_id: ListenerId,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn add(&mut self, callback: Callback, options: &ListenerOptions, pattern: Option<String>) -> ListenerId {
        self.next_id += 1;
        let id = self.next_id;
        self.listeners.insert(
            id,
            Listener {
                callback,
                kinds: options.kinds.clone(),
                pattern,
            },
        );
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Pair every event with each callback that wants it, in registration order.
    pub fn route(&self, events: Vec<TopicEvent>) -> Vec<(Callback, TopicEvent)> {
        let mut routed = Vec::new();
        for event in events {
            for listener in self.listeners.values() {
                if listener.wants(&event) {
                    routed.push((listener.callback.clone(), event.clone()));
                }
            }
        }
        routed
    }

    /// Like `route`, restricted to one listener.
    pub fn route_to(&self, id: ListenerId, events: Vec<TopicEvent>) -> Vec<(Callback, TopicEvent)> {
        let Some(listener) = self.listeners.get(&id) else {
            return Vec::new();
        };
        events
            .into_iter()
            .filter(|event| listener.wants(event))
            .map(|event| (listener.callback.clone(), event))
            .collect()
    }
}

/// Invoke routed callbacks. Must be called without any client lock held.
pub fn fire(routed: Vec<(Callback, TopicEvent)>) {
    for (callback, event) in routed {
        callback(&event);
    }
}
