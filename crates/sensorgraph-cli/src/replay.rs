//! `sensorgraph replay`: run change events through the matching engine.
//!
//! Events that omit their related-collections snapshot or external
//! identifier get them filled in from the store, the way a commit hook would
//! before publishing.

use crate::{load_store, read_input};
use anyhow::{Context, Result};
use colored::Colorize;
use sensorgraph_pubsub::{
    ChangeEvent, EngineConfig, MatchingEngine, Operation, SharedStore, SubscriptionId,
    SubscriptionRegistry, SubscriptionRequest,
};
use sensorgraph_query::MemoryStore;
use sensorgraph_schema::{IdentifierField, Registry};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub struct ReplayInputs {
    pub store: MemoryStore,
    pub requests: Vec<SubscriptionRequest>,
    pub events: Vec<ChangeEvent>,
}

impl ReplayInputs {
    pub fn load(
        registry: &Registry,
        store: &Path,
        subscriptions: &Path,
        events: &Path,
    ) -> Result<Self> {
        let store = load_store(registry, store)?;
        let requests = serde_json::from_str(&read_input(subscriptions)?)
            .with_context(|| format!("parsing subscriptions {}", subscriptions.display()))?;
        let events = serde_json::from_str(&read_input(events)?)
            .with_context(|| format!("parsing events {}", events.display()))?;
        Ok(Self {
            store,
            requests,
            events,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedSubscription {
    pub connection: String,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayOutcome {
    pub entity_type: String,
    pub key: u32,
    pub operation: Operation,
    pub matched: Vec<MatchedSubscription>,
    pub failures: Vec<String>,
}

pub fn run(
    registry: Registry,
    config: EngineConfig,
    inputs: ReplayInputs,
) -> Result<Vec<ReplayOutcome>> {
    let schema = Arc::new(registry);
    let events: Vec<ChangeEvent> = inputs
        .events
        .into_iter()
        .map(|event| complete(&schema, &inputs.store, event))
        .collect::<Result<_>>()?;

    let subscriptions = Arc::new(SubscriptionRegistry::new(schema.clone(), config.clone()));
    let mut described: BTreeMap<SubscriptionId, MatchedSubscription> = BTreeMap::new();
    for request in inputs.requests {
        let entry = MatchedSubscription {
            connection: request.connection.clone(),
            topic: request.topic.clone(),
        };
        let id = subscriptions
            .subscribe(request)
            .with_context(|| format!("subscribing to `{}`", entry.topic))?;
        described.insert(id, entry);
    }
    info!(
        subscriptions = described.len(),
        events = events.len(),
        "replaying"
    );

    let state = Arc::new(SharedStore::new(schema, inputs.store));
    let engine = MatchingEngine::new(subscriptions, state, &config);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let mut outcomes = Vec::with_capacity(events.len());
    for event in &events {
        let report = runtime.block_on(engine.match_event(event));
        let mut matched: Vec<MatchedSubscription> = report
            .matched
            .iter()
            .filter_map(|id| described.get(id).cloned())
            .collect();
        matched.sort_by(|a, b| (&a.connection, &a.topic).cmp(&(&b.connection, &b.topic)));
        outcomes.push(ReplayOutcome {
            entity_type: event.entity_type.clone(),
            key: event.key,
            operation: event.operation,
            matched,
            failures: report.failures.iter().map(ToString::to_string).collect(),
        });
    }
    Ok(outcomes)
}

/// Fill in what the store can tell about the committed entity. Deleted
/// entities are gone from the store, so their events are taken as given.
fn complete(schema: &Registry, store: &MemoryStore, mut event: ChangeEvent) -> Result<ChangeEvent> {
    if event.operation == Operation::Delete {
        return Ok(event);
    }
    let ty = schema
        .entity(&event.entity_type)
        .with_context(|| format!("unknown entity type `{}`", event.entity_type))?;
    if event.related.is_empty() {
        event.related = store.related_collections(schema, &ty.name, event.key)?;
    }
    if event.external_id.is_none() && matches!(ty.identifier, IdentifierField::External { .. }) {
        event.external_id = Some(store.addressable_id(ty, event.key));
    }
    Ok(event)
}

pub fn print(outcomes: &[ReplayOutcome]) {
    for outcome in outcomes {
        println!(
            "{} {:?} {}({})",
            "Event".green().bold(),
            outcome.operation,
            outcome.entity_type,
            outcome.key
        );
        if outcome.matched.is_empty() {
            println!("  {}", "no subscribers".dimmed());
        }
        for m in &outcome.matched {
            println!("  {} {} {}", "->".cyan(), m.connection, m.topic);
        }
        for failure in &outcome.failures {
            println!("  {} {}", "failed".red(), failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorgraph_schema::sensor_things;
    use std::fs;
    use tempfile::tempdir;

    const STORE: &str = r#"{"tables": {
        "thing": {"52": {"name": "weather station"}, "7": {"name": "buoy"}},
        "location": {"4": {"name": "roof"}},
        "thing_location": {"1": {"thing_id": 52, "location_id": 4}},
        "datastream": {"1": {"thing_id": 52}, "2": {"thing_id": 52}},
        "dataset": {"1": {"datastream_id": 1}, "2": {"datastream_id": 2}},
        "observation": {
            "1": {"dataset_id": 1, "value": 15},
            "2": {"dataset_id": 2, "value": 3}
        },
        "observed_property": {"3": {"identifier": "temp", "name": "Temperature"}}
    }}"#;

    const SUBSCRIPTIONS: &str = r#"[
        {"connection": "a", "topic": "v1.1/Things(52)/Locations"},
        {"connection": "b", "topic": "Things(7)/Locations"},
        {"connection": "c", "topic": "Things(52)/Datastreams",
         "filter": {"node": "comparison", "path": "Observations/result",
                    "op": "gt", "literal": {"kind": "number", "value": 10}}},
        {"connection": "d", "topic": "ObservedProperties('temp')/name"}
    ]"#;

    const EVENTS: &str = r#"[
        {"entity_type": "Location", "key": 4, "operation": "update", "changed": ["name"]},
        {"entity_type": "Datastream", "key": 1, "operation": "update", "changed": ["name"]},
        {"entity_type": "Datastream", "key": 2, "operation": "update", "changed": ["name"]},
        {"entity_type": "ObservedProperty", "key": 3, "operation": "update", "changed": ["name"]},
        {"entity_type": "ObservedProperty", "key": 3, "operation": "update", "changed": ["definition"]}
    ]"#;

    fn replay() -> Vec<ReplayOutcome> {
        let dir = tempdir().unwrap();
        let paths = [
            ("store.json", STORE),
            ("subscriptions.json", SUBSCRIPTIONS),
            ("events.json", EVENTS),
        ]
        .map(|(name, body)| {
            let path = dir.path().join(name);
            fs::write(&path, body).unwrap();
            path
        });
        let registry = sensor_things();
        let inputs = ReplayInputs::load(&registry, &paths[0], &paths[1], &paths[2]).unwrap();
        run(registry, EngineConfig::default(), inputs).unwrap()
    }

    fn connections(outcome: &ReplayOutcome) -> Vec<&str> {
        outcome.matched.iter().map(|m| m.connection.as_str()).collect()
    }

    #[test]
    fn replay_fills_related_collections_and_matches() {
        let outcomes = replay();
        assert_eq!(outcomes.len(), 5);
        assert_eq!(connections(&outcomes[0]), vec!["a"]);
        assert_eq!(connections(&outcomes[1]), vec!["c"]);
        assert!(outcomes[2].matched.is_empty());
        assert_eq!(connections(&outcomes[3]), vec!["d"]);
        assert!(outcomes[4].matched.is_empty());
        assert!(outcomes.iter().all(|o| o.failures.is_empty()));
    }

    #[test]
    fn bad_topics_fail_the_replay() {
        let registry = sensor_things();
        let inputs = ReplayInputs {
            store: MemoryStore::for_registry(&registry),
            requests: vec![SubscriptionRequest::new("a", "Things(1)/colour")],
            events: Vec::new(),
        };
        let err = run(registry, EngineConfig::default(), inputs).unwrap_err();
        assert!(err.to_string().contains("Things(1)/colour"));
    }
}
