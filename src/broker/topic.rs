//! Topic management
//!
//! `TopicDirectory` is the authority's mapping from topic name to id, type,
//! properties and flags, and it doubles as the value store: each `Topic`
//! holds its last value and timestamp.
//!
//! Concurrency note: the directory has no interior locking. The coordinator
//! owns it and is itself held behind one lock, so every mutation here is
//! atomic with respect to other sessions.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::broker::session::SessionId;
use crate::codec::nt3::{FLAG_NONE, FLAG_PERSISTENT};
use crate::codec::nt4::Properties;
use crate::codec::{Value, ValueType};

pub type TopicId = u32;

pub const PROP_PERSISTENT: &str = "persistent";
pub const PROP_RETAINED: &str = "retained";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopicFlags(u8);

impl TopicFlags {
    pub const NONE: TopicFlags = TopicFlags(FLAG_NONE);
    pub const PERSISTENT: TopicFlags = TopicFlags(FLAG_PERSISTENT);

    pub fn from_bits(bits: u8) -> Self {
        TopicFlags(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_persistent(self) -> bool {
        self.0 & FLAG_PERSISTENT != 0
    }

    fn with_persistent(self, on: bool) -> Self {
        if on {
            TopicFlags(self.0 | FLAG_PERSISTENT)
        } else {
            TopicFlags(self.0 & !FLAG_PERSISTENT)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimestampedValue {
    pub value: Value,
    pub timestamp: u64,
}

/// One writer's claim on a topic: the session and its publish identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Publication {
    pub session: SessionId,
    pub pubuid: i64,
}

#[derive(Debug, Clone)]
pub struct Topic {
    pub id: TopicId,
    pub name: String,
    pub value_type: ValueType,
    pub properties: Properties,
    pub flags: TopicFlags,
    pub value: Option<TimestampedValue>,
    /// NT3 sequence number, bumped on every value change.
    pub seq: u16,
    publications: BTreeSet<Publication>,
}

impl Topic {
    fn new(id: TopicId, name: &str, value_type: ValueType) -> Self {
        Self {
            id,
            name: name.to_string(),
            value_type,
            properties: Properties::new(),
            flags: TopicFlags::NONE,
            value: None,
            seq: 0,
            publications: BTreeSet::new(),
        }
    }

    pub fn has_publication(&self, publication: &Publication) -> bool {
        self.publications.contains(publication)
    }

    pub fn is_published(&self) -> bool {
        !self.publications.is_empty()
    }

    pub fn is_retained(&self) -> bool {
        self.property_flag(PROP_RETAINED)
    }

    pub fn is_persistent(&self) -> bool {
        self.flags.is_persistent()
    }

    /// Unpublished topics survive only when persistent or retained.
    pub fn is_orphaned(&self) -> bool {
        !self.is_published() && !self.is_persistent() && !self.is_retained()
    }

    /// The current value, or the type default when none has arrived yet.
    pub fn value_or_default(&self) -> Value {
        self.value
            .as_ref()
            .map(|v| v.value.clone())
            .unwrap_or_else(|| self.value_type.default_value())
    }

    fn property_flag(&self, key: &str) -> bool {
        self.properties
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Merge a partial update: `null` deletes a key. Returns the keys whose
    /// stored value actually changed, with their new value (or `null`).
    fn merge_properties(&mut self, update: &Properties) -> Properties {
        let mut applied = Properties::new();
        for (key, value) in update {
            if value.is_null() {
                if self.properties.remove(key).is_some() {
                    applied.insert(key.clone(), serde_json::Value::Null);
                }
            } else if self.properties.get(key) != Some(value) {
                self.properties.insert(key.clone(), value.clone());
                applied.insert(key.clone(), value.clone());
            }
        }
        self.flags = self.flags.with_persistent(self.property_flag(PROP_PERSISTENT));
        applied
    }
}

/// Outcome of `TopicDirectory::create_or_update`.
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    Created(TopicId),
    /// Existing topic; carries the property delta that was applied, which may be empty.
    Existing { id: TopicId, applied: Properties },
}

impl Upsert {
    pub fn id(&self) -> TopicId {
        match self {
            Upsert::Created(id) => *id,
            Upsert::Existing { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueRejected {
    UnknownTopic(TopicId),
    TypeMismatch {
        expected: ValueType,
        actual: ValueType,
    },
}

#[derive(Debug)]
pub struct TopicDirectory {
    topics: BTreeMap<TopicId, Topic>,
    by_name: HashMap<String, TopicId>,
    next_id: TopicId,
}

impl Default for TopicDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicDirectory {
    pub fn new() -> Self {
        Self {
            topics: BTreeMap::new(),
            by_name: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Topics in directory (creation) order.
    pub fn iter(&self) -> impl Iterator<Item = &Topic> {
        self.topics.values()
    }

    pub fn lookup(&self, name: &str) -> Option<&Topic> {
        self.by_name.get(name).and_then(|id| self.topics.get(id))
    }

    pub fn lookup_by_id(&self, id: TopicId) -> Option<&Topic> {
        self.topics.get(&id)
    }

    /// Create the topic with a fresh id, or merge type and properties into
    /// the existing one. A type change discards the stored value.
    pub fn create_or_update(
        &mut self,
        name: &str,
        value_type: ValueType,
        properties: &Properties,
    ) -> Upsert {
        if let Some(&id) = self.by_name.get(name) {
            if let Some(topic) = self.topics.get_mut(&id) {
                if topic.value_type != value_type {
                    topic.value_type = value_type;
                    topic.value = None;
                }
                let applied = topic.merge_properties(properties);
                return Upsert::Existing { id, applied };
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        let mut topic = Topic::new(id, name, value_type);
        topic.merge_properties(properties);
        self.by_name.insert(name.to_string(), id);
        self.topics.insert(id, topic);
        Upsert::Created(id)
    }

    pub fn remove(&mut self, id: TopicId) -> Option<Topic> {
        let topic = self.topics.remove(&id)?;
        self.by_name.remove(&topic.name);
        Some(topic)
    }

    pub fn remove_by_name(&mut self, name: &str) -> Option<Topic> {
        let id = self.by_name.get(name).copied()?;
        self.remove(id)
    }

    /// Store a value; last arrival wins and the timestamp is not compared.
    pub fn set_value(
        &mut self,
        id: TopicId,
        value: Value,
        timestamp: u64,
    ) -> Result<&Topic, ValueRejected> {
        let topic = self
            .topics
            .get_mut(&id)
            .ok_or(ValueRejected::UnknownTopic(id))?;
        if value.value_type() != topic.value_type {
            return Err(ValueRejected::TypeMismatch {
                expected: topic.value_type,
                actual: value.value_type(),
            });
        }
        topic.value = Some(TimestampedValue { value, timestamp });
        topic.seq = topic.seq.wrapping_add(1);
        Ok(topic)
    }

    /// Apply a partial property update. `None` if the topic does not exist.
    pub fn set_properties(&mut self, name: &str, update: &Properties) -> Option<(TopicId, Properties)> {
        let id = *self.by_name.get(name)?;
        let topic = self.topics.get_mut(&id)?;
        Some((id, topic.merge_properties(update)))
    }

    /// Set NT3 flags, mirroring the persistent bit into the properties.
    pub fn set_flags(&mut self, id: TopicId, flags: TopicFlags) -> Option<Properties> {
        let topic = self.topics.get_mut(&id)?;
        let mut update = Properties::new();
        update.insert(
            PROP_PERSISTENT.to_string(),
            if flags.is_persistent() {
                serde_json::Value::Bool(true)
            } else {
                serde_json::Value::Null
            },
        );
        let applied = topic.merge_properties(&update);
        topic.flags = TopicFlags::from_bits(flags.bits());
        Some(applied)
    }

    /// Returns false if the record was already present.
    pub fn add_publication(&mut self, id: TopicId, publication: Publication) -> bool {
        self.topics
            .get_mut(&id)
            .map(|topic| topic.publications.insert(publication))
            .unwrap_or(false)
    }

    pub fn find_publication(&self, publication: &Publication) -> Option<TopicId> {
        self.topics
            .values()
            .find(|topic| topic.publications.contains(publication))
            .map(|topic| topic.id)
    }

    /// Drop a publication record, returning the topic it belonged to.
    pub fn remove_publication(&mut self, publication: &Publication) -> Option<TopicId> {
        let id = self.find_publication(publication)?;
        if let Some(topic) = self.topics.get_mut(&id) {
            topic.publications.remove(publication);
        }
        Some(id)
    }

    /// Drop every publication owned by `session`, returning the affected topics.
    pub fn remove_session_publications(&mut self, session: &SessionId) -> Vec<TopicId> {
        let mut affected = Vec::new();
        for topic in self.topics.values_mut() {
            let before = topic.publications.len();
            topic.publications.retain(|p| &p.session != session);
            if topic.publications.len() != before {
                affected.push(topic.id);
            }
        }
        affected
    }
}
