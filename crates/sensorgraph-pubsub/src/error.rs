use crate::subscription::SubscriptionId;
use sensorgraph_query::{CompileError, StoreError};
use std::time::Duration;
use thiserror::Error;

/// Subscribe-time rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("malformed topic `{topic}`: {reason}")]
    Malformed { topic: String, reason: String },

    #[error("ambiguous topic `{topic}`: `{segment}` names both a relation and a property")]
    Ambiguous { topic: String, segment: String },

    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl TopicError {
    pub(crate) fn malformed(topic: &str, reason: impl Into<String>) -> Self {
        TopicError::Malformed {
            topic: topic.to_string(),
            reason: reason.into(),
        }
    }
}

/// Entity-state lookup failure reported by the persistence collaborator.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("unknown entity type `{0}`")]
    UnknownEntityType(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("state backend failed: {0}")]
    Backend(String),
}

/// Per-subscription failure during one match pass. Never aborts the pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchFailure {
    #[error("state lookup for subscription {subscription} timed out after {timeout:?}")]
    PersistenceTimeout {
        subscription: SubscriptionId,
        timeout: Duration,
    },

    #[error("state lookup for subscription {subscription} failed: {message}")]
    State {
        subscription: SubscriptionId,
        message: String,
    },
}

impl MatchFailure {
    pub fn subscription(&self) -> SubscriptionId {
        match self {
            MatchFailure::PersistenceTimeout { subscription, .. }
            | MatchFailure::State { subscription, .. } => *subscription,
        }
    }
}
