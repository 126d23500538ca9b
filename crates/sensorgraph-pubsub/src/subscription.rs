use crate::topic::TopicPattern;
use chrono::{DateTime, Utc};
use sensorgraph_query::CompiledPredicate;
use sensorgraph_schema::FilterNode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a transport connection asks for when it subscribes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub connection: String,
    pub topic: String,
    /// Query-string filter scoped to the subscription.
    #[serde(default)]
    pub filter: Option<FilterNode>,
    /// Property names (as clients spell them) whose changes are of interest.
    #[serde(default)]
    pub watched: BTreeSet<String>,
}

impl SubscriptionRequest {
    pub fn new(connection: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            topic: topic.into(),
            filter: None,
            watched: BTreeSet::new(),
        }
    }

    pub fn with_filter(mut self, filter: FilterNode) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn watching<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.watched.extend(properties.into_iter().map(Into::into));
        self
    }
}

/// An active subscription. Never mutated after creation; resubscribing
/// creates a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub connection: String,
    pub topic: String,
    pub pattern: TopicPattern,
    pub filter: Option<CompiledPredicate>,
    /// Storage columns; an update matches only if it changed one of them.
    /// Empty means every change matches.
    pub watched: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}
