//! Coordinator engine
//!
//! This module contains the authority-side orchestration responsible for:
//! - assigning topic ids and creating/removing topics on publish/unpublish
//! - fanning out announces, unannounces, property changes and values
//! - registering subscriptions and pushing current values to new subscribers
//! - cleaning up after sessions that disconnect or fall behind
//!
//! Concurrency and usage notes:
//! - The public API here is synchronous and designed to be held behind a
//!   lock (`SharedCoordinator`) by the transport layer. Nothing here awaits,
//!   so the lock is never held across network I/O.
//! - Fan-out only enqueues into each session's bounded queue. A session whose
//!   queue is full is evicted at the end of the operation that overflowed it;
//!   the session that triggered the fan-out never waits on a slow peer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::broker::message::Outgoing;
use crate::broker::session::{DeliveryError, Generation, Session, SessionId};
use crate::broker::subscription::{self, SubscriptionMatcher};
use crate::broker::topic::{
    PROP_PERSISTENT, Publication, TopicDirectory, TopicFlags, TopicId, Upsert, ValueRejected,
};
use crate::codec::nt3::Nt3Message;
use crate::codec::nt4::{ControlMessage, Properties, SubscribeOptions};
use crate::codec::{Value, ValueType};
use crate::utils::time::now_micros;

/// Subscription id NT3 sessions use for their implicit match-all subscription.
const NT3_SUBUID: i64 = -1;

pub type SharedCoordinator = Arc<Mutex<Coordinator>>;

/// Lock the shared coordinator, recovering the guard if a holder panicked.
pub fn lock(coordinator: &SharedCoordinator) -> MutexGuard<'_, Coordinator> {
    coordinator.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct Coordinator {
    directory: TopicDirectory,
    subscriptions: SubscriptionMatcher,
    sessions: HashMap<SessionId, Session>,
    evicted: Vec<SessionId>,
    identity: String,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new("ntables")
    }
}

impl Coordinator {
    pub fn new(identity: &str) -> Self {
        Self {
            directory: TopicDirectory::new(),
            subscriptions: SubscriptionMatcher::new(),
            sessions: HashMap::new(),
            evicted: Vec::new(),
            identity: identity.to_string(),
        }
    }

    pub fn shared(identity: &str) -> SharedCoordinator {
        Arc::new(Mutex::new(Self::new(identity)))
    }

    pub fn directory(&self) -> &TopicDirectory {
        &self.directory
    }

    pub fn subscriptions(&self) -> &SubscriptionMatcher {
        &self.subscriptions
    }

    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().cloned().collect()
    }

    /// Register an NT4 session. It receives an announce and the current value
    /// of every topic, in directory order, before any broadcast traffic.
    pub fn attach_nt4(&mut self, mut session: Session) -> SessionId {
        let id = session.id.clone();
        session.mark_negotiated();
        self.sessions.insert(id.clone(), session);

        let mut snapshot = Vec::new();
        for topic in self.directory.iter() {
            snapshot.push(Outgoing::announce(topic, None));
            snapshot.extend(Outgoing::value(topic));
        }
        for msg in snapshot {
            self.send_now(&id, msg);
        }
        if let Some(session) = self.sessions.get_mut(&id) {
            if session.mark_ready().is_err() {
                self.evicted.push(id.clone());
            }
        }
        info!("[{}] attached ({} topics announced)", id, self.directory.len());
        self.reap();
        id
    }

    /// Start the server half of the NT3 hello sequence: `ServerHello`, one
    /// assignment per topic, `ServerHelloComplete`. Broadcasts are held until
    /// `complete_nt3_handshake`.
    pub fn begin_nt3_handshake(&mut self, mut session: Session) -> SessionId {
        let id = session.id.clone();
        session.mark_negotiated();
        self.sessions.insert(id.clone(), session);

        let mut handshake = vec![Outgoing::Nt3(Nt3Message::ServerHello {
            flags: 0,
            identity: self.identity.clone(),
        })];
        handshake.extend(self.directory.iter().map(|t| Outgoing::announce(t, None)));
        handshake.push(Outgoing::Nt3(Nt3Message::ServerHelloComplete));
        for msg in handshake {
            self.send_now(&id, msg);
        }

        // NT3 has no subscriptions; its peers see every value.
        let everything = SubscribeOptions {
            prefix: true,
            ..SubscribeOptions::default()
        };
        self.subscriptions
            .register(&id, NT3_SUBUID, vec![String::new()], everything);
        debug!("[{}] NT3 server hello sent", id);
        self.reap();
        id
    }

    pub fn complete_nt3_handshake(&mut self, id: &SessionId) {
        if let Some(session) = self.sessions.get_mut(id) {
            if session.mark_ready().is_err() {
                self.evicted.push(id.clone());
            }
            info!("[{}] NT3 handshake complete", id);
        }
        self.reap();
    }

    /// Tear down a session: release its subscriptions and delete the topics
    /// it exclusively published. Returns false for an unknown session.
    pub fn detach(&mut self, id: &SessionId) -> bool {
        let existed = self.detach_inner(id);
        self.reap();
        existed
    }

    pub fn handle_control(&mut self, session: &SessionId, msg: ControlMessage) {
        match msg {
            ControlMessage::Publish(p) => {
                self.publish(session, &p.name, p.value_type, p.pubuid, &p.properties);
            }
            ControlMessage::Unpublish(p) => self.unpublish(session, p.pubuid),
            ControlMessage::SetProperties(p) => self.set_properties(session, &p.name, &p.update),
            ControlMessage::Subscribe(p) => self.subscribe(session, p.subuid, p.topics, p.options),
            ControlMessage::Unsubscribe(p) => self.unsubscribe(session, p.subuid),
            other => debug!(
                "[{}] ignoring server-only method '{}' from peer",
                session,
                other.method()
            ),
        }
    }

    /// Create the topic or join an existing one. New topics are announced to
    /// every session; the publisher's copy carries its `pubuid`. A type that
    /// differs from a topic other publishers still hold is refused.
    pub fn publish(
        &mut self,
        session: &SessionId,
        name: &str,
        value_type: ValueType,
        pubuid: i64,
        properties: &Properties,
    ) -> Option<TopicId> {
        self.publish_with(session, name, value_type, pubuid, properties, None)
    }

    /// `publish`, storing `initial` before anything is announced so NT3
    /// assignments carry it.
    fn publish_with(
        &mut self,
        session: &SessionId,
        name: &str,
        value_type: ValueType,
        pubuid: i64,
        properties: &Properties,
        initial: Option<Value>,
    ) -> Option<TopicId> {
        if !self.sessions.contains_key(session) {
            debug!("[{}] publish from unknown session ignored", session);
            return None;
        }
        let publication = Publication {
            session: session.clone(),
            pubuid,
        };
        let mut retyped = false;
        if let Some(existing) = self.directory.lookup(name) {
            if existing.has_publication(&publication) && existing.value_type == value_type {
                debug!("[{}] duplicate publish of '{}' ({})", session, name, pubuid);
                return Some(existing.id);
            }
            if existing.value_type != value_type {
                if existing.is_published() {
                    warn!(
                        "[{}] publish of '{}' as {} refused: already published as {}",
                        session, name, value_type, existing.value_type
                    );
                    return None;
                }
                retyped = true;
            }
        }

        let upsert = self.directory.create_or_update(name, value_type, properties);
        let id = upsert.id();
        self.directory.add_publication(id, publication);
        let created = matches!(upsert, Upsert::Created(_));
        if let Some(value) = initial.clone() {
            if let Err(e) = self.directory.set_value(id, value, now_micros()) {
                warn!("[{}] initial value for '{}' rejected: {:?}", session, name, e);
            }
        }
        let topic = self.directory.lookup_by_id(id)?;

        let mut fanout = Vec::new();
        match upsert {
            Upsert::Created(_) => {
                info!("[{}] published '{}' as {} (id {})", session, name, value_type, id);
            }
            Upsert::Existing { .. } if retyped => {
                info!("[{}] '{}' (id {}) retyped to {}", session, name, id, value_type);
            }
            Upsert::Existing { ref applied, .. } => {
                debug!("[{}] joined '{}' (id {}) as publisher {}", session, name, id, pubuid);
                fanout.push((session.clone(), Outgoing::announce(topic, Some(pubuid))));
                if !applied.is_empty() {
                    let msg = Outgoing::properties(topic, applied.clone(), false);
                    for target in self.sessions.keys() {
                        fanout.push((target.clone(), msg.clone()));
                    }
                }
            }
        }
        if created || retyped {
            let own = Outgoing::announce(topic, Some(pubuid));
            let others = Outgoing::announce(topic, None);
            for target in self.sessions.keys() {
                let msg = if target == session { own.clone() } else { others.clone() };
                fanout.push((target.clone(), msg));
            }
        }

        // NT3 announces already carry the value; NT4 peers need a value frame.
        if let Some(msg) = Outgoing::value(topic).filter(|_| initial.is_some()) {
            for target in self.subscriptions.value_targets(name) {
                if &target == session {
                    continue;
                }
                let announced_with_value = (created || retyped)
                    && self
                        .sessions
                        .get(&target)
                        .is_some_and(|s| s.generation == Generation::Nt3);
                if !announced_with_value {
                    fanout.push((target, msg.clone()));
                }
            }
        }

        for (target, msg) in fanout {
            self.deliver(&target, msg);
        }
        self.reap();
        Some(id)
    }

    pub fn unpublish(&mut self, session: &SessionId, pubuid: i64) {
        let publication = Publication {
            session: session.clone(),
            pubuid,
        };
        match self.directory.remove_publication(&publication) {
            Some(id) => {
                debug!("[{}] unpublished {} from topic {}", session, pubuid, id);
                self.delete_if_orphaned(id);
            }
            None => warn!("[{}] unpublish of unknown pubuid {}", session, pubuid),
        }
        self.reap();
    }

    /// Partial property update; `null` deletes a key. The issuer's copy of
    /// the `properties` broadcast is marked as the acknowledgment.
    pub fn set_properties(&mut self, session: &SessionId, name: &str, update: &Properties) {
        let Some((id, applied)) = self.directory.set_properties(name, update) else {
            warn!("[{}] setproperties on unknown topic '{}'", session, name);
            return;
        };
        if let Some(topic) = self.directory.lookup_by_id(id) {
            let mut fanout = Vec::new();
            for target in self.sessions.keys() {
                let ack = target == session;
                fanout.push((target.clone(), Outgoing::properties(topic, applied.clone(), ack)));
            }
            for (target, msg) in fanout {
                self.deliver(&target, msg);
            }
        }
        // Clearing `retained` on an unpublished topic releases it.
        self.delete_if_orphaned(id);
        self.reap();
    }

    pub fn subscribe(
        &mut self,
        session: &SessionId,
        subuid: i64,
        patterns: Vec<String>,
        options: SubscribeOptions,
    ) {
        if !self.sessions.contains_key(session) {
            return;
        }
        let push_values = options.immediate && !options.topicsonly;
        let prefix = options.prefix;
        debug!("[{}] subscribe {} to {:?} (prefix={})", session, subuid, patterns, prefix);
        let current: Vec<Outgoing> = if push_values {
            self.directory
                .iter()
                .filter(|t| subscription::matches(&t.name, &patterns, prefix))
                .filter_map(Outgoing::value)
                .collect()
        } else {
            Vec::new()
        };
        self.subscriptions.register(session, subuid, patterns, options);
        for msg in current {
            self.deliver(session, msg);
        }
        self.reap();
    }

    pub fn unsubscribe(&mut self, session: &SessionId, subuid: i64) {
        if self.subscriptions.unregister_subuid(session, subuid).is_none() {
            debug!("[{}] unsubscribe of unknown subuid {}", session, subuid);
        }
    }

    /// Store a value and forward it to every other session subscribed to the
    /// topic. Unknown ids and type mismatches are logged and dropped.
    pub fn set_value(&mut self, session: &SessionId, id: i64, timestamp: u64, value: Value) -> bool {
        let Ok(topic_id) = TopicId::try_from(id) else {
            warn!("[{}] value for unknown topic id {}", session, id);
            return false;
        };
        let timestamp = if timestamp == 0 { now_micros() } else { timestamp };
        let msg = match self.directory.set_value(topic_id, value, timestamp) {
            Ok(topic) => match Outgoing::value(topic) {
                Some(msg) => (topic.name.clone(), msg),
                None => return false,
            },
            Err(ValueRejected::UnknownTopic(_)) => {
                warn!("[{}] value for unknown topic id {}", session, id);
                return false;
            }
            Err(ValueRejected::TypeMismatch { expected, actual }) => {
                warn!(
                    "[{}] value for topic {} rejected: expected {}, got {}",
                    session, id, expected, actual
                );
                return false;
            }
        };
        let (name, msg) = msg;
        for target in self.subscriptions.value_targets(&name) {
            if &target != session {
                self.deliver(&target, msg.clone());
            }
        }
        self.reap();
        true
    }

    /// Answer a clock-sync probe with the server's current time.
    pub fn time_sync(&mut self, session: &SessionId, client_time: i64) {
        let reply = Outgoing::TimeSync {
            server_time: now_micros(),
            client_time,
        };
        self.deliver(session, reply);
        self.reap();
    }

    /// NT3 `EntryAssignment` from a peer: publish under `pubuid` with the
    /// carried value, then apply the flags.
    pub fn assign_entry(
        &mut self,
        session: &SessionId,
        name: &str,
        flags: TopicFlags,
        value: Value,
        pubuid: i64,
    ) -> Option<TopicId> {
        let mut properties = Properties::new();
        if flags.is_persistent() {
            properties.insert(PROP_PERSISTENT.to_string(), serde_json::Value::Bool(true));
        }
        let id = self.publish_with(
            session,
            name,
            value.value_type(),
            pubuid,
            &properties,
            Some(value),
        )?;
        if self.directory.lookup_by_id(id).map(|t| t.flags) != Some(flags) {
            self.set_flags(session, id, flags);
        }
        Some(id)
    }

    /// NT3 `FlagsUpdate`: the persistent bit is mirrored into the properties.
    pub fn set_flags(&mut self, session: &SessionId, id: TopicId, flags: TopicFlags) {
        let Some(applied) = self.directory.set_flags(id, flags) else {
            warn!("[{}] flags update for unknown topic id {}", session, id);
            return;
        };
        if let Some(topic) = self.directory.lookup_by_id(id) {
            let msg = Outgoing::properties(topic, applied, false);
            let targets: Vec<SessionId> = self.sessions.keys().cloned().collect();
            for target in targets {
                if &target != session {
                    self.deliver(&target, msg.clone());
                }
            }
        }
        self.delete_if_orphaned(id);
        self.reap();
    }

    /// NT3 `EntryDelete`: removes the topic whoever published it.
    pub fn delete_entry(&mut self, session: &SessionId, id: TopicId) {
        if self.directory.lookup_by_id(id).is_none() {
            warn!("[{}] delete of unknown topic id {}", session, id);
            return;
        }
        self.delete_topic(id);
        self.reap();
    }

    /// NT3 `ClearEntries`: removes every non-persistent topic.
    pub fn clear_entries(&mut self, session: &SessionId) {
        let doomed: Vec<TopicId> = self
            .directory
            .iter()
            .filter(|t| !t.is_persistent())
            .map(|t| t.id)
            .collect();
        info!("[{}] clearing {} entries", session, doomed.len());
        for id in doomed {
            self.delete_topic(id);
        }
        self.reap();
    }

    fn detach_inner(&mut self, id: &SessionId) -> bool {
        let Some(mut session) = self.sessions.remove(id) else {
            return false;
        };
        session.mark_closed();
        let released = self.subscriptions.remove_session(id);
        let affected = self.directory.remove_session_publications(id);
        info!(
            "[{}] detached ({} subscriptions released, {} topics affected)",
            id,
            released,
            affected.len()
        );
        for topic_id in affected {
            self.delete_if_orphaned(topic_id);
        }
        true
    }

    fn delete_if_orphaned(&mut self, id: TopicId) {
        let orphaned = self
            .directory
            .lookup_by_id(id)
            .map(|t| t.is_orphaned())
            .unwrap_or(false);
        if orphaned {
            self.delete_topic(id);
        }
    }

    fn delete_topic(&mut self, id: TopicId) {
        if let Some(topic) = self.directory.remove(id) {
            info!("topic '{}' (id {}) removed", topic.name, topic.id);
            let msg = Outgoing::unannounce(&topic);
            let targets: Vec<SessionId> = self.sessions.keys().cloned().collect();
            for target in targets {
                self.deliver(&target, msg.clone());
            }
        }
    }

    fn deliver(&mut self, target: &SessionId, msg: Outgoing) {
        if let Some(session) = self.sessions.get_mut(target) {
            if let Err(e) = session.deliver(msg) {
                self.note_failure(target, e);
            }
        }
    }

    fn send_now(&mut self, target: &SessionId, msg: Outgoing) {
        if let Some(session) = self.sessions.get_mut(target) {
            if let Err(e) = session.send_now(msg) {
                self.note_failure(target, e);
            }
        }
    }

    fn note_failure(&mut self, target: &SessionId, error: DeliveryError) {
        match error {
            DeliveryError::Overflow => warn!("[{}] outbound queue full, evicting", target),
            DeliveryError::Closed => debug!("[{}] writer gone, evicting", target),
        }
        if !self.evicted.contains(target) {
            self.evicted.push(target.clone());
        }
    }

    /// Detach evicted sessions. Detaching can unannounce topics, which can
    /// overflow further queues, so this loops until nothing is left.
    fn reap(&mut self) {
        while let Some(id) = self.evicted.pop() {
            self.detach_inner(&id);
        }
    }
}
