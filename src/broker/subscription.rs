//! Subscription matching.
//!
//! A subscription is a set of patterns matched either exactly or by prefix.
//! An empty pattern set matches nothing; "everything" is spelled as the
//! single prefix pattern `""`.

use std::collections::BTreeMap;

use crate::broker::session::SessionId;
use crate::codec::nt4::SubscribeOptions;

pub type SubscriptionId = u64;

/// True iff `topic_name` equals any pattern, or falls under one when
/// `prefix_match` is set.
pub fn matches<S: AsRef<str>>(topic_name: &str, patterns: &[S], prefix_match: bool) -> bool {
    patterns.iter().any(|pattern| {
        let pattern = pattern.as_ref();
        if prefix_match {
            prefix_matches(topic_name, pattern)
        } else {
            topic_name == pattern
        }
    })
}

/// Prefixes respect path segments: `/a` covers `/a` and `/a/b` but not `/ab`.
/// A pattern that is empty or ends in `/` is a plain string prefix.
fn prefix_matches(topic_name: &str, pattern: &str) -> bool {
    if pattern.is_empty() || pattern.ends_with('/') {
        return topic_name.starts_with(pattern);
    }
    match topic_name.strip_prefix(pattern) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub session: SessionId,
    /// The peer's own identifier for this subscription.
    pub subuid: i64,
    pub patterns: Vec<String>,
    pub options: SubscribeOptions,
}

impl Subscription {
    pub fn matches(&self, topic_name: &str) -> bool {
        matches(topic_name, &self.patterns, self.options.prefix)
    }

    pub fn wants_values(&self) -> bool {
        !self.options.topicsonly
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionMatcher {
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    next_id: SubscriptionId,
}

impl SubscriptionMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subscriptions.get(&id)
    }

    /// Re-registering a `(session, subuid)` pair replaces the earlier entry.
    pub fn register(
        &mut self,
        session: &SessionId,
        subuid: i64,
        patterns: Vec<String>,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        self.unregister_subuid(session, subuid);
        self.next_id += 1;
        let id = self.next_id;
        self.subscriptions.insert(
            id,
            Subscription {
                id,
                session: session.clone(),
                subuid,
                patterns,
                options,
            },
        );
        id
    }

    /// No-op for an unknown id.
    pub fn unregister(&mut self, id: SubscriptionId) -> Option<Subscription> {
        self.subscriptions.remove(&id)
    }

    pub fn unregister_subuid(&mut self, session: &SessionId, subuid: i64) -> Option<Subscription> {
        let id = self
            .subscriptions
            .values()
            .find(|s| &s.session == session && s.subuid == subuid)
            .map(|s| s.id)?;
        self.unregister(id)
    }

    /// Release every subscription owned by `session`.
    pub fn remove_session(&mut self, session: &SessionId) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|_, s| &s.session != session);
        before - self.subscriptions.len()
    }

    /// Sessions with at least one value-receiving subscription matching `topic_name`.
    pub fn value_targets(&self, topic_name: &str) -> Vec<SessionId> {
        let mut targets: Vec<SessionId> = self
            .subscriptions
            .values()
            .filter(|s| s.wants_values() && s.matches(topic_name))
            .map(|s| s.session.clone())
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }
}
