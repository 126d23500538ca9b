//! Integration tests for the complete Sensorgraph pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Catalog → Predicate compiler → Reference store
//! - Store mutation → Related-collection snapshot → Change event
//! - Topic + filter subscription → Matching engine
//!
//! Run with: cargo test --test integration_tests

use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::tempdir;

const STORE: &str = r#"{"tables": {
    "thing": {"52": {"name": "weather station"}, "53": {"name": "buoy"}},
    "location": {"4": {"name": "roof"}, "5": {"name": "pier"}},
    "thing_location": {"1": {"thing_id": 52, "location_id": 4}},
    "sensor": {"9": {"name": "DHT22", "encoding_type": "application/pdf"}},
    "observed_property": {"3": {"identifier": "temp", "name": "Temperature"}},
    "datastream": {
        "1": {"name": "air", "thing_id": 52, "sensor_id": 9, "observed_property_id": 3},
        "2": {"name": "water", "thing_id": 53, "sensor_id": 9, "observed_property_id": 3}
    },
    "feature": {"6": {"name": "roof", "encoding_type": "application/vnd.geo+json"}},
    "dataset": {
        "1": {"datastream_id": 1, "feature_id": 6},
        "2": {"datastream_id": 2, "feature_id": 6}
    },
    "observation": {
        "1": {"dataset_id": 1, "value": 21.5, "result_time": "2024-03-01T10:00:00Z"},
        "2": {"dataset_id": 1, "value": 8},
        "3": {"dataset_id": 2, "value": 4}
    }
}}"#;

fn load_store(
    registry: &sensorgraph_schema::Registry,
) -> sensorgraph_query::MemoryStore {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(&path, STORE).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    sensorgraph_query::MemoryStore::from_json(&text, registry).unwrap()
}

// ============================================================================
// Catalog
// ============================================================================

#[test]
fn test_catalog_is_consistent() {
    use sensorgraph_schema::sensor_things;

    let registry = sensor_things();
    registry.validate().unwrap();
    assert!(registry.by_set("Datasets").is_none());
    assert_eq!(registry.by_set("FeaturesOfInterest").unwrap().name, "FeatureOfInterest");
}

// ============================================================================
// Compiler → Store
// ============================================================================

#[test]
fn test_hub_filter_selects_datastreams() {
    use sensorgraph_query::{PredicateCompiler, QueryExecutor, QueryOptions};
    use sensorgraph_schema::{sensor_things, ComparisonOp, FilterNode, Value};

    let registry = sensor_things();
    let store = load_store(&registry);
    let compiled = PredicateCompiler::new(&registry)
        .compile(
            "Datastream",
            &FilterNode::compare("Observations/result", ComparisonOp::Gt, Value::number(10)),
        )
        .unwrap();
    assert_eq!(
        compiled.predicate.to_string(),
        "id IN (SELECT datastream_id FROM dataset WHERE \
         id IN (SELECT dataset_id FROM observation WHERE value > 10))"
    );
    let rows = store.find_all(&compiled, &QueryOptions::default()).unwrap();
    let keys: Vec<u32> = rows.iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, vec![1]);
}

#[test]
fn test_filter_json_compiles_like_the_builder() {
    use sensorgraph_query::PredicateCompiler;
    use sensorgraph_schema::{sensor_things, ComparisonOp, FilterNode, FunctionArg, Value};

    let json = r#"{
        "node": "logical", "op": "and", "children": [
            {"node": "comparison", "path": "Sensor/name", "op": "eq",
             "literal": {"kind": "text", "value": "DHT22"}},
            {"node": "function_call", "name": "startswith", "args": [
                {"arg": "property", "path": "name"},
                {"arg": "literal", "value": {"kind": "text", "value": "ai"}}
            ]}
        ]
    }"#;
    let filter: FilterNode = serde_json::from_str(json).unwrap();
    let built = FilterNode::and(vec![
        FilterNode::compare("Sensor/name", ComparisonOp::Eq, Value::text("DHT22")),
        FilterNode::call(
            "startswith",
            vec![FunctionArg::property("name"), FunctionArg::literal(Value::text("ai"))],
        ),
    ]);
    let registry = sensor_things();
    let compiler = PredicateCompiler::new(&registry);
    assert_eq!(
        compiler.compile("Datastream", &filter).unwrap(),
        compiler.compile("Datastream", &built).unwrap()
    );
}

#[test]
fn test_computed_properties_fold_against_rows() {
    use sensorgraph_query::{PredicateCompiler, QueryExecutor};
    use sensorgraph_schema::{sensor_things, ComparisonOp, FilterNode, Value};

    let registry = sensor_things();
    let store = load_store(&registry);
    let compiler = PredicateCompiler::new(&registry);
    let geo = compiler
        .compile(
            "FeatureOfInterest",
            &FilterNode::compare(
                "encodingType",
                ComparisonOp::Eq,
                Value::text("application/vnd.geo+json"),
            ),
        )
        .unwrap();
    assert_eq!(store.count(&geo).unwrap(), 1);

    let constant = compiler
        .compile(
            "Location",
            &FilterNode::compare("encodingType", ComparisonOp::Eq, Value::text("text/plain")),
        )
        .unwrap();
    assert_eq!(store.count(&constant).unwrap(), 0);
}

// ============================================================================
// Store → Change events → Matching
// ============================================================================

#[test]
fn test_commit_snapshot_drives_related_subscriptions() {
    use sensorgraph_pubsub::{
        ChangeEvent, EngineConfig, MatchingEngine, SharedStore, SubscriptionRegistry,
        SubscriptionRequest,
    };
    use sensorgraph_schema::{sensor_things, Value};

    let schema = Arc::new(sensor_things());
    let shared = SharedStore::new(schema.clone(), load_store(&schema));
    let config = EngineConfig::default();
    let subscriptions = Arc::new(SubscriptionRegistry::new(schema.clone(), config.clone()));
    let engine = MatchingEngine::new(subscriptions.clone(), Arc::new(shared.clone()), &config);

    let station = subscriptions
        .subscribe(SubscriptionRequest::new("mqtt-1", "v1.1/Things(52)/Locations"))
        .unwrap();
    let buoy = subscriptions
        .subscribe(SubscriptionRequest::new("mqtt-2", "v1.1/Things(53)/Locations"))
        .unwrap();

    // Link location 5 to the buoy, then publish what the commit produced.
    let mut link = sensorgraph_query::Row::new();
    link.insert("thing_id".into(), Value::number(53));
    link.insert("location_id".into(), Value::number(5));
    shared.store().write().append("thing_location", link);
    let related = shared
        .store()
        .read()
        .related_collections(&schema, "Location", 5)
        .unwrap();
    let event = ChangeEvent::updated("Location", 5, ["name"]).with_related_collections(related);

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let report = runtime.block_on(engine.match_event(&event));
    assert_eq!(report.matched, BTreeSet::from([buoy]));
    assert!(!report.matched.contains(&station));
}

#[test]
fn test_filtered_subscription_follows_store_updates() {
    use sensorgraph_pubsub::{
        ChangeEvent, EngineConfig, MatchingEngine, SharedStore, SubscriptionRegistry,
        SubscriptionRequest,
    };
    use sensorgraph_schema::{sensor_things, ComparisonOp, FilterNode, Value};

    let schema = Arc::new(sensor_things());
    let shared = SharedStore::new(schema.clone(), load_store(&schema));
    let config = EngineConfig::default();
    let subscriptions = Arc::new(SubscriptionRegistry::new(schema.clone(), config.clone()));
    let engine = MatchingEngine::new(subscriptions.clone(), Arc::new(shared.clone()), &config);

    let hot = subscriptions
        .subscribe(
            SubscriptionRequest::new("mqtt-1", "ObservedProperties('temp')/Datastreams")
                .with_filter(FilterNode::compare(
                    "Observations/result",
                    ComparisonOp::Gt,
                    Value::number(10),
                )),
        )
        .unwrap();

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let event_for = |key: u32| {
        let related = shared
            .store()
            .read()
            .related_collections(&schema, "Datastream", key)
            .unwrap();
        ChangeEvent::updated("Datastream", key, ["name"]).with_related_collections(related)
    };

    assert!(runtime
        .block_on(engine.match_event(&event_for(1)))
        .matched
        .contains(&hot));
    assert!(runtime
        .block_on(engine.match_event(&event_for(2)))
        .matched
        .is_empty());

    let mut obs = sensorgraph_query::Row::new();
    obs.insert("dataset_id".into(), Value::number(2));
    obs.insert("value".into(), Value::number(30));
    shared.store().write().insert("observation", 4, obs);
    assert!(runtime
        .block_on(engine.match_event(&event_for(2)))
        .matched
        .contains(&hot));
}

// ============================================================================
// Concurrent Access Tests
// ============================================================================

#[test]
fn test_matching_while_subscribing() {
    use sensorgraph_pubsub::{
        ChangeEvent, EngineConfig, MatchingEngine, SharedStore, SubscriptionRegistry,
        SubscriptionRequest,
    };
    use sensorgraph_schema::sensor_things;

    let schema = Arc::new(sensor_things());
    let config = EngineConfig::default();
    let subscriptions = Arc::new(SubscriptionRegistry::new(schema.clone(), config.clone()));
    let state = Arc::new(SharedStore::new(schema.clone(), load_store(&schema)));
    let engine = Arc::new(MatchingEngine::new(subscriptions.clone(), state, &config));
    let event = ChangeEvent::updated("Thing", 52, ["name"]);

    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let writer = {
            let subscriptions = subscriptions.clone();
            tokio::task::spawn_blocking(move || {
                for i in 0..100 {
                    subscriptions
                        .subscribe(SubscriptionRequest::new(format!("c{i}"), "Things(52)"))
                        .unwrap();
                }
            })
        };
        let mut seen = 0;
        for _ in 0..50 {
            let report = engine.match_event(&event).await;
            // Registrations only grow here, so no pass can see fewer.
            assert!(report.matched.len() >= seen);
            seen = report.matched.len();
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    });

    let report = runtime.block_on(engine.match_event(&event));
    assert_eq!(report.matched.len(), 100);
}

// ============================================================================
// Error Handling Tests
// ============================================================================

#[test]
fn test_rejections_leave_the_registry_untouched() {
    use sensorgraph_pubsub::{EngineConfig, SubscriptionRegistry, SubscriptionRequest, TopicError};
    use sensorgraph_query::CompileError;
    use sensorgraph_schema::{sensor_things, ComparisonOp, FilterNode, Value};

    let registry = SubscriptionRegistry::new(Arc::new(sensor_things()), EngineConfig::default());
    assert!(matches!(
        registry.subscribe(SubscriptionRequest::new("c", "Things")),
        Err(TopicError::Malformed { .. })
    ));
    assert!(matches!(
        registry.subscribe(SubscriptionRequest::new("c", "Things(1)/Gadgets")),
        Err(TopicError::Compile(CompileError::UnknownProperty { .. }))
    ));
    assert!(matches!(
        registry.subscribe(
            SubscriptionRequest::new("c", "Things(1)").with_filter(FilterNode::compare(
                "name",
                ComparisonOp::Gt,
                Value::Null
            ))
        ),
        Err(TopicError::Compile(CompileError::IncompatibleLiteral { .. }))
    ));
    assert!(registry.is_empty());
}
