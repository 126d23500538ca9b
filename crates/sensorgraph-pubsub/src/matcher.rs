//! Change-event matching.
//!
//! A pass takes one registry snapshot and checks every subscription in it:
//!
//! 1. the event's entity type must equal the pattern's wanted type;
//! 2. the address must match (identifier for direct patterns, the
//!    related-collection snapshot for related ones);
//! 3. subscriptions watching specific columns need an update to touch one
//!    of them (creates and deletes touch all of them);
//! 4. filtered subscriptions are checked against current entity state,
//!    under a timeout. A timeout or lookup error fails that subscription only.

use crate::config::EngineConfig;
use crate::error::{MatchFailure, StateError};
use crate::event::{ChangeEvent, Operation};
use crate::registry::SubscriptionRegistry;
use crate::state::EntityStateSource;
use crate::subscription::{Subscription, SubscriptionId};
use crate::topic::Address;
use sensorgraph_query::CompiledPredicate;
use sensorgraph_schema::{IdentifierField, Registry};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of one match pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchReport {
    pub matched: BTreeSet<SubscriptionId>,
    pub failures: Vec<MatchFailure>,
}

/// Steps 1–3: everything decidable from the event alone.
pub fn structural_match(
    schema: &Registry,
    subscription: &Subscription,
    event: &ChangeEvent,
) -> bool {
    let pattern = &subscription.pattern;
    if pattern.wanted_type() != event.entity_type {
        return false;
    }
    let addressed = match pattern.address() {
        Address::Direct(direct) => {
            let Some(ty) = schema.entity(&event.entity_type) else {
                return false;
            };
            match &ty.identifier {
                IdentifierField::Key => direct.id.parse::<u32>() == Ok(event.key),
                IdentifierField::External { .. } => {
                    event.external_id.as_deref() == Some(direct.id.as_str())
                }
            }
        }
        // A collection present without the source id is a definitive miss.
        Address::Related(related) => event
            .related
            .get(&related.source_set)
            .is_some_and(|ids| ids.contains(&related.source_id)),
    };
    if !addressed {
        return false;
    }
    if subscription.watched.is_empty() {
        return true;
    }
    match event.operation {
        Operation::Update => !subscription.watched.is_disjoint(&event.changed),
        Operation::Create | Operation::Delete => true,
    }
}

pub struct MatchingEngine {
    registry: Arc<SubscriptionRegistry>,
    state: Arc<dyn EntityStateSource>,
    timeout: Duration,
}

impl MatchingEngine {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        state: Arc<dyn EntityStateSource>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            registry,
            state,
            timeout: config.state_timeout(),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Subscriptions to notify for `event`. Each subscription appears at most
    /// once; failures of individual filter checks are reported alongside.
    pub async fn match_event(&self, event: &ChangeEvent) -> MatchReport {
        let snapshot = self.registry.snapshot();
        let schema = self.registry.schema();
        let mut report = MatchReport::default();

        for subscription in snapshot.iter() {
            if !structural_match(schema, subscription, event) {
                continue;
            }
            let Some(filter) = &subscription.filter else {
                report.matched.insert(subscription.id);
                continue;
            };
            match self.check_filter(subscription.id, filter, event).await {
                Ok(true) => {
                    report.matched.insert(subscription.id);
                }
                Ok(false) => {}
                Err(failure) => {
                    warn!(
                        subscription = %subscription.id,
                        entity_type = %event.entity_type,
                        key = event.key,
                        error = %failure,
                        "filter check failed"
                    );
                    report.failures.push(failure);
                }
            }
        }

        debug!(
            entity_type = %event.entity_type,
            key = event.key,
            candidates = snapshot.len(),
            matched = report.matched.len(),
            failed = report.failures.len(),
            "matched change event"
        );
        report
    }

    /// Step 4, bounded by the configured state timeout.
    async fn check_filter(
        &self,
        subscription: SubscriptionId,
        filter: &CompiledPredicate,
        event: &ChangeEvent,
    ) -> Result<bool, MatchFailure> {
        match tokio::time::timeout(self.timeout, self.evaluate(filter, event)).await {
            Ok(Ok(satisfied)) => Ok(satisfied),
            Ok(Err(err)) => Err(MatchFailure::State {
                subscription,
                message: err.to_string(),
            }),
            Err(_) => Err(MatchFailure::PersistenceTimeout {
                subscription,
                timeout: self.timeout,
            }),
        }
    }

    /// An entity without current state (deleted) never satisfies a filter.
    async fn evaluate(
        &self,
        filter: &CompiledPredicate,
        event: &ChangeEvent,
    ) -> Result<bool, StateError> {
        let current = self
            .state
            .current_state(&event.entity_type, event.key)
            .await?;
        if current.is_none() {
            return Ok(false);
        }
        self.state.satisfies(filter, event.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SharedStore;
    use crate::subscription::SubscriptionRequest;
    use sensorgraph_query::MemoryStore;
    use sensorgraph_schema::sensor_things;

    fn engine() -> MatchingEngine {
        let schema = Arc::new(sensor_things());
        let config = EngineConfig::default();
        let registry = Arc::new(SubscriptionRegistry::new(schema.clone(), config.clone()));
        let store = MemoryStore::for_registry(&schema);
        let state = Arc::new(SharedStore::new(schema, store));
        MatchingEngine::new(registry, state, &config)
    }

    #[tokio::test]
    async fn related_topic_matches_on_snapshot_membership() {
        let engine = engine();
        let id = engine
            .registry()
            .subscribe(SubscriptionRequest::new("c1", "Things(52)/Locations"))
            .unwrap();

        let hit = ChangeEvent::created("Location", 4).with_related("Things", ["52", "7"]);
        assert_eq!(engine.match_event(&hit).await.matched, BTreeSet::from([id]));

        let miss = ChangeEvent::created("Location", 4).with_related("Things", ["7"]);
        assert!(engine.match_event(&miss).await.matched.is_empty());

        let wrong_type = ChangeEvent::created("Thing", 52).with_related("Things", ["52"]);
        assert!(engine.match_event(&wrong_type).await.matched.is_empty());
    }

    #[tokio::test]
    async fn observed_properties_match_on_external_identifier() {
        let engine = engine();
        let id = engine
            .registry()
            .subscribe(SubscriptionRequest::new("c1", "ObservedProperties('temp')"))
            .unwrap();
        let by_identifier = ChangeEvent::updated("ObservedProperty", 3, ["name"])
            .with_external_id("temp");
        assert!(engine.match_event(&by_identifier).await.matched.contains(&id));
        let by_key_only = ChangeEvent::updated("ObservedProperty", 3, ["name"]);
        assert!(engine.match_event(&by_key_only).await.matched.is_empty());
    }

    #[tokio::test]
    async fn property_topics_need_a_changed_column() {
        let engine = engine();
        let id = engine
            .registry()
            .subscribe(SubscriptionRequest::new("c1", "Things(1)/name"))
            .unwrap();
        let other = ChangeEvent::updated("Thing", 1, ["description"]);
        assert!(engine.match_event(&other).await.matched.is_empty());
        let named = ChangeEvent::updated("Thing", 1, ["name", "description"]);
        assert!(engine.match_event(&named).await.matched.contains(&id));
        let deleted = ChangeEvent::deleted("Thing", 1);
        assert!(engine.match_event(&deleted).await.matched.contains(&id));
    }
}
