//! Client-side topic state.
//!
//! The `Reconciler` keeps the caller's intents (publications and
//! subscriptions) separately from what the authority has confirmed. Writes
//! to a topic whose id is not yet known are buffered on the publication and
//! flushed when the announce carrying the matching `pubuid` arrives. On
//! reconnect every intent is replayed against the new connection.
//!
//! Nothing here touches a socket: outbound frames accumulate in an outbox
//! and caller-visible changes in an event list, both drained by the
//! connection task.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::codec::nt4::{
    ControlMessage, Properties, PublishParams, SetPropertiesParams, SubscribeOptions,
    SubscribeParams, UnpublishParams, UnsubscribeParams, ValueFrame,
};
use crate::codec::{Value, ValueType};
use crate::utils::NtError;
use crate::utils::error::validate_name;

/// A frame waiting to be written to the authority.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Control(ControlMessage),
    Value(ValueFrame),
}

/// Caller-visible change, handed to listeners once the mutation is complete.
#[derive(Debug, Clone, PartialEq)]
pub enum TopicEvent {
    Published {
        name: String,
        value_type: ValueType,
        properties: Properties,
    },
    Unpublished {
        name: String,
    },
    Properties {
        name: String,
        update: Properties,
    },
    Value {
        name: String,
        value: Value,
        timestamp: u64,
        /// False for the caller's own writes.
        remote: bool,
    },
    Connected,
    Disconnected,
}

impl TopicEvent {
    pub fn topic_name(&self) -> Option<&str> {
        match self {
            TopicEvent::Published { name, .. }
            | TopicEvent::Unpublished { name }
            | TopicEvent::Properties { name, .. }
            | TopicEvent::Value { name, .. } => Some(name),
            TopicEvent::Connected | TopicEvent::Disconnected => None,
        }
    }
}

/// Snapshot of one topic as the client sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicInfo {
    pub name: String,
    pub value_type: ValueType,
    pub properties: Properties,
    /// Authority-issued id; `None` until announced on the current connection.
    pub id: Option<i64>,
    pub value: Option<Value>,
    pub timestamp: u64,
}

impl TopicInfo {
    fn new(name: &str, value_type: ValueType) -> Self {
        Self {
            name: name.to_string(),
            value_type,
            properties: Properties::new(),
            id: None,
            value: None,
            timestamp: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct LocalPublication {
    pubuid: i64,
    value_type: ValueType,
    properties: Properties,
    /// Latest write not yet sent because the topic id is unknown.
    pending: Option<(Value, u64)>,
}

#[derive(Debug, Clone)]
struct LocalSubscription {
    patterns: Vec<String>,
    options: SubscribeOptions,
}

#[derive(Debug, Default)]
pub struct Reconciler {
    topics: BTreeMap<String, TopicInfo>,
    ids: HashMap<i64, String>,
    publications: BTreeMap<String, LocalPublication>,
    subscriptions: BTreeMap<i64, LocalSubscription>,
    next_pubuid: i64,
    next_subuid: i64,
    connected: bool,
    outbox: Vec<ClientFrame>,
    events: Vec<TopicEvent>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn get_topic(&self, name: &str) -> Option<TopicInfo> {
        self.topics.get(name).cloned()
    }

    pub fn get_value(&self, name: &str) -> Option<Value> {
        self.topics.get(name).and_then(|t| t.value.clone())
    }

    pub fn is_published(&self, name: &str) -> bool {
        self.publications.contains_key(name)
    }

    pub fn take_outbox(&mut self) -> Vec<ClientFrame> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_events(&mut self) -> Vec<TopicEvent> {
        std::mem::take(&mut self.events)
    }

    /// Declare intent to write `name`. Publishing the same name and type
    /// again returns the existing `pubuid`.
    pub fn publish(
        &mut self,
        name: &str,
        value_type: ValueType,
        properties: Properties,
    ) -> Result<i64, NtError> {
        validate_name(name)?;
        if let Some(existing) = self.publications.get(name) {
            if existing.value_type != value_type {
                return Err(NtError::TypeMismatch {
                    name: name.to_string(),
                    expected: existing.value_type,
                    actual: value_type,
                });
            }
            return Ok(existing.pubuid);
        }

        self.next_pubuid += 1;
        let pubuid = self.next_pubuid;
        let publication = LocalPublication {
            pubuid,
            value_type,
            properties,
            pending: None,
        };
        if self.connected {
            self.outbox
                .push(ClientFrame::Control(publish_message(name, &publication)));
        }
        self.publications.insert(name.to_string(), publication);
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| TopicInfo::new(name, value_type));
        Ok(pubuid)
    }

    pub fn unpublish(&mut self, name: &str) -> Result<(), NtError> {
        let publication = self
            .publications
            .remove(name)
            .ok_or_else(|| NtError::NotPublished(name.to_string()))?;
        if self.connected {
            self.outbox
                .push(ClientFrame::Control(ControlMessage::Unpublish(UnpublishParams {
                    pubuid: publication.pubuid,
                })));
        }
        Ok(())
    }

    pub fn subscribe(&mut self, patterns: Vec<String>, options: SubscribeOptions) -> i64 {
        self.next_subuid += 1;
        let subuid = self.next_subuid;
        let subscription = LocalSubscription { patterns, options };
        if self.connected {
            self.outbox
                .push(ClientFrame::Control(subscribe_message(subuid, &subscription)));
        }
        self.subscriptions.insert(subuid, subscription);
        subuid
    }

    pub fn unsubscribe(&mut self, subuid: i64) -> bool {
        if self.subscriptions.remove(&subuid).is_none() {
            return false;
        }
        if self.connected {
            self.outbox
                .push(ClientFrame::Control(ControlMessage::Unsubscribe(UnsubscribeParams {
                    subuid,
                })));
        }
        true
    }

    /// Write a value. Visible to `get_value` immediately; sent now if the
    /// topic id is known, otherwise buffered until the announce arrives.
    pub fn set_value(&mut self, name: &str, value: Value, timestamp: u64) -> Result<(), NtError> {
        let publication = self
            .publications
            .get_mut(name)
            .ok_or_else(|| NtError::NotPublished(name.to_string()))?;
        if value.value_type() != publication.value_type {
            return Err(NtError::TypeMismatch {
                name: name.to_string(),
                expected: publication.value_type,
                actual: value.value_type(),
            });
        }
        let topic = self
            .topics
            .entry(name.to_string())
            .or_insert_with(|| TopicInfo::new(name, publication.value_type));
        topic.value = Some(value.clone());
        topic.timestamp = timestamp;

        match topic.id.filter(|_| self.connected) {
            Some(id) => self
                .outbox
                .push(ClientFrame::Value(ValueFrame::new(id, timestamp, value.clone()))),
            None => publication.pending = Some((value.clone(), timestamp)),
        }
        self.events.push(TopicEvent::Value {
            name: name.to_string(),
            value,
            timestamp,
            remote: false,
        });
        Ok(())
    }

    pub fn set_properties(&mut self, name: &str, update: Properties) -> Result<(), NtError> {
        if !self.topics.contains_key(name) {
            return Err(NtError::UnknownTopic(name.to_string()));
        }
        if let Some(publication) = self.publications.get_mut(name) {
            merge_properties(&mut publication.properties, &update);
        }
        if self.connected {
            self.outbox
                .push(ClientFrame::Control(ControlMessage::SetProperties(
                    SetPropertiesParams {
                        name: name.to_string(),
                        update,
                    },
                )));
        }
        Ok(())
    }

    /// The connection reached `Ready`: replay every intent. Ids from the
    /// previous connection are gone, so the latest local value of each
    /// publication waits for its announce again.
    pub fn on_connected(&mut self) {
        self.connected = true;
        self.outbox.clear();
        for (name, publication) in self.publications.iter_mut() {
            if let Some(value) = self.topics.get(name).and_then(|t| t.value.clone()) {
                let timestamp = self.topics.get(name).map(|t| t.timestamp).unwrap_or(0);
                publication.pending = Some((value, timestamp));
            }
            self.outbox
                .push(ClientFrame::Control(publish_message(name, publication)));
        }
        for (subuid, subscription) in &self.subscriptions {
            self.outbox
                .push(ClientFrame::Control(subscribe_message(*subuid, subscription)));
        }
        debug!(
            "replaying {} publications and {} subscriptions",
            self.publications.len(),
            self.subscriptions.len()
        );
        self.events.push(TopicEvent::Connected);
    }

    /// Forget everything tied to the connection; keep intents and values.
    pub fn on_disconnected(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.outbox.clear();
        self.ids.clear();
        for topic in self.topics.values_mut() {
            topic.id = None;
        }
        self.events.push(TopicEvent::Disconnected);
    }

    pub fn handle_control(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::Announce(params) => {
                self.ids.insert(params.id, params.name.clone());
                let topic = self
                    .topics
                    .entry(params.name.clone())
                    .or_insert_with(|| TopicInfo::new(&params.name, params.value_type));
                let newly_announced = topic.id != Some(params.id);
                topic.id = Some(params.id);
                if topic.value_type != params.value_type {
                    topic.value_type = params.value_type;
                    topic.value = None;
                }
                topic.properties = params.properties.clone();
                if newly_announced {
                    self.events.push(TopicEvent::Published {
                        name: params.name.clone(),
                        value_type: params.value_type,
                        properties: params.properties,
                    });
                }

                let Some(publication) = self.publications.get_mut(&params.name) else {
                    return;
                };
                if params.pubuid != Some(publication.pubuid) {
                    return;
                }
                if let Some((value, timestamp)) = publication.pending.take() {
                    if value.value_type() == params.value_type {
                        self.outbox
                            .push(ClientFrame::Value(ValueFrame::new(params.id, timestamp, value)));
                    } else {
                        warn!("buffered write to '{}' dropped: type changed", params.name);
                    }
                }
            }
            ControlMessage::Unannounce(params) => {
                self.ids.remove(&params.id);
                if self.publications.contains_key(&params.name) {
                    if let Some(topic) = self.topics.get_mut(&params.name) {
                        topic.id = None;
                    }
                } else {
                    self.topics.remove(&params.name);
                }
                self.events.push(TopicEvent::Unpublished { name: params.name });
            }
            ControlMessage::Properties(params) => {
                let Some(topic) = self.topics.get_mut(&params.name) else {
                    debug!("properties for unknown topic '{}'", params.name);
                    return;
                };
                merge_properties(&mut topic.properties, &params.update);
                self.events.push(TopicEvent::Properties {
                    name: params.name,
                    update: params.update,
                });
            }
            other => debug!("ignoring client-only method '{}' from server", other.method()),
        }
    }

    /// Apply a value frame from the authority. Unknown ids and mismatched
    /// types are dropped, and so is anything for a topic whose local write
    /// has not been sent yet.
    pub fn handle_value(&mut self, frame: ValueFrame) {
        let Some(name) = self.ids.get(&frame.id) else {
            debug!("value for unannounced id {}", frame.id);
            return;
        };
        if self
            .publications
            .get(name)
            .is_some_and(|p| p.pending.is_some())
        {
            debug!("value for '{}' superseded by a pending local write", name);
            return;
        }
        let Some(topic) = self.topics.get_mut(name) else {
            return;
        };
        if frame.value.value_type() != topic.value_type {
            warn!(
                "value for '{}' dropped: expected {}, got {}",
                name,
                topic.value_type,
                frame.value.value_type()
            );
            return;
        }
        topic.value = Some(frame.value.clone());
        topic.timestamp = frame.timestamp;
        self.events.push(TopicEvent::Value {
            name: name.clone(),
            value: frame.value,
            timestamp: frame.timestamp,
            remote: true,
        });
    }

    /// Events describing the current state, for listeners registered with
    /// `immediate`.
    pub fn snapshot_events(&self) -> Vec<TopicEvent> {
        let mut events = Vec::new();
        if self.connected {
            events.push(TopicEvent::Connected);
        }
        for topic in self.topics.values() {
            if topic.id.is_some() {
                events.push(TopicEvent::Published {
                    name: topic.name.clone(),
                    value_type: topic.value_type,
                    properties: topic.properties.clone(),
                });
            }
            if let Some(value) = &topic.value {
                events.push(TopicEvent::Value {
                    name: topic.name.clone(),
                    value: value.clone(),
                    timestamp: topic.timestamp,
                    remote: !self.publications.contains_key(&topic.name),
                });
            }
        }
        events
    }
}

fn publish_message(name: &str, publication: &LocalPublication) -> ControlMessage {
    ControlMessage::Publish(PublishParams {
        name: name.to_string(),
        pubuid: publication.pubuid,
        value_type: publication.value_type,
        properties: publication.properties.clone(),
    })
}

fn subscribe_message(subuid: i64, subscription: &LocalSubscription) -> ControlMessage {
    ControlMessage::Subscribe(SubscribeParams {
        topics: subscription.patterns.clone(),
        subuid,
        options: subscription.options.clone(),
    })
}

fn merge_properties(properties: &mut Properties, update: &Properties) {
    for (key, value) in update {
        if value.is_null() {
            properties.remove(key);
        } else {
            properties.insert(key.clone(), value.clone());
        }
    }
}
