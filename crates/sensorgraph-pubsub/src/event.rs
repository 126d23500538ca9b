//! Normalized mutation events.

use sensorgraph_query::RelatedCollections;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// One committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity_type: String,
    /// Storage key.
    pub key: u32,
    /// Externally visible identifier, when the type has one distinct from
    /// the key.
    #[serde(default)]
    pub external_id: Option<String>,
    pub operation: Operation,
    /// Storage columns changed by an update.
    #[serde(default)]
    pub changed: BTreeSet<String>,
    /// Related entities at commit time, keyed by entity-set name.
    #[serde(default)]
    pub related: RelatedCollections,
}

impl ChangeEvent {
    pub fn new(entity_type: impl Into<String>, key: u32, operation: Operation) -> Self {
        Self {
            entity_type: entity_type.into(),
            key,
            external_id: None,
            operation,
            changed: BTreeSet::new(),
            related: RelatedCollections::new(),
        }
    }

    pub fn created(entity_type: impl Into<String>, key: u32) -> Self {
        Self::new(entity_type, key, Operation::Create)
    }

    pub fn updated<I, S>(entity_type: impl Into<String>, key: u32, changed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut event = Self::new(entity_type, key, Operation::Update);
        event.changed = changed.into_iter().map(Into::into).collect();
        event
    }

    pub fn deleted(entity_type: impl Into<String>, key: u32) -> Self {
        Self::new(entity_type, key, Operation::Delete)
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    pub fn with_related<I, S>(mut self, set_name: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related
            .entry(set_name.into())
            .or_default()
            .extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_related_collections(mut self, related: RelatedCollections) -> Self {
        self.related = related;
        self
    }
}
