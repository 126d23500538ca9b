//! The SensorThings entity catalog.
//!
//! Observations do not reference datastreams or features directly: every
//! observation row points at a `dataset` hub row, and the hub row carries the
//! datastream, feature, phenomenon, procedure and platform keys. Relations
//! that cross the hub are declared `ViaHub`.

use crate::registry::{
    Cardinality, ComputedRule, EntityType, ForeignKey, HubDescriptor, HubLink, IdentifierField,
    JoinStrategy, PropertyDescriptor, Registry,
};
use crate::value::{Value, ValueKind};
use std::collections::BTreeMap;

/// MIME spellings accepted for the synthetic feature type fields. The second
/// is what a `+` becomes after form-decoding a query string.
pub const GEOJSON_MIME: [&str; 2] = ["application/vnd.geo+json", "application/vnd.geo json"];

/// Name of the internal hub type.
pub const HUB_TYPE: &str = "Dataset";

fn local(column: &str) -> JoinStrategy {
    JoinStrategy::Direct(ForeignKey::Local {
        column: column.to_string(),
    })
}

fn remote(column: &str) -> JoinStrategy {
    JoinStrategy::Direct(ForeignKey::Remote {
        column: column.to_string(),
    })
}

fn link(table: &str, source_column: &str, target_column: &str) -> JoinStrategy {
    JoinStrategy::Direct(ForeignKey::Link {
        table: table.to_string(),
        source_column: source_column.to_string(),
        target_column: target_column.to_string(),
    })
}

fn via_hub(source: HubLink, target: HubLink) -> JoinStrategy {
    JoinStrategy::ViaHub { source, target }
}

fn hub_col(column: &str) -> HubLink {
    HubLink::HubColumn(column.to_string())
}

fn entity_col(column: &str) -> HubLink {
    HubLink::EntityColumn(column.to_string())
}

fn prop(name: &str, kind: ValueKind, column: &str) -> PropertyDescriptor {
    PropertyDescriptor::direct(name, kind, &[column])
}

fn interval(name: &str, start: &str, end: &str) -> PropertyDescriptor {
    PropertyDescriptor::direct(name, ValueKind::DateTime, &[start, end])
}

fn accepted_mime(name: &str) -> PropertyDescriptor {
    PropertyDescriptor::computed(
        name,
        ValueKind::String,
        ComputedRule::AcceptedMime {
            accepted: GEOJSON_MIME.iter().map(|s| s.to_string()).collect(),
        },
    )
}

fn common(ty: EntityType) -> EntityType {
    ty.with_property(prop("id", ValueKind::Number, "id"))
        .with_property(prop("name", ValueKind::String, "name"))
        .with_property(prop("description", ValueKind::String, "description"))
}

fn thing() -> EntityType {
    common(EntityType::new("Thing", "Things", "thing"))
        .with_property(prop("properties", ValueKind::String, "properties"))
        .with_relation(
            "Locations",
            "Location",
            Cardinality::Many,
            link("thing_location", "thing_id", "location_id"),
        )
        .with_relation(
            "HistoricalLocations",
            "HistoricalLocation",
            Cardinality::Many,
            remote("thing_id"),
        )
        .with_relation("Datastreams", "Datastream", Cardinality::Many, remote("thing_id"))
}

fn location() -> EntityType {
    common(EntityType::new("Location", "Locations", "location"))
        .with_property(PropertyDescriptor::computed(
            "encodingType",
            ValueKind::String,
            ComputedRule::Constant(Value::text(GEOJSON_MIME[0])),
        ))
        .with_property(prop("location", ValueKind::Geometry, "location"))
        .with_relation(
            "Things",
            "Thing",
            Cardinality::Many,
            link("thing_location", "location_id", "thing_id"),
        )
        .with_relation(
            "HistoricalLocations",
            "HistoricalLocation",
            Cardinality::Many,
            link(
                "location_historical_location",
                "location_id",
                "historical_location_id",
            ),
        )
}

fn historical_location() -> EntityType {
    EntityType::new("HistoricalLocation", "HistoricalLocations", "historical_location")
        .with_property(prop("id", ValueKind::Number, "id"))
        .with_property(prop("time", ValueKind::DateTime, "time"))
        .with_relation("Thing", "Thing", Cardinality::One, local("thing_id"))
        .with_relation(
            "Locations",
            "Location",
            Cardinality::Many,
            link(
                "location_historical_location",
                "historical_location_id",
                "location_id",
            ),
        )
}

fn datastream() -> EntityType {
    common(EntityType::new("Datastream", "Datastreams", "datastream"))
        .with_property(prop("observationType", ValueKind::String, "observation_type"))
        .with_property(prop(
            "unitOfMeasurement",
            ValueKind::String,
            "unit_of_measurement",
        ))
        .with_property(interval(
            "phenomenonTime",
            "phenomenon_time_start",
            "phenomenon_time_end",
        ))
        .with_property(interval("resultTime", "result_time_start", "result_time_end"))
        .with_property(prop("observedArea", ValueKind::Geometry, "observed_area"))
        .with_relation("Thing", "Thing", Cardinality::One, local("thing_id"))
        .with_relation("Sensor", "Sensor", Cardinality::One, local("sensor_id"))
        .with_relation(
            "ObservedProperty",
            "ObservedProperty",
            Cardinality::One,
            local("observed_property_id"),
        )
        .with_relation(
            "Observations",
            "Observation",
            Cardinality::Many,
            via_hub(hub_col("datastream_id"), entity_col("dataset_id")),
        )
}

fn sensor() -> EntityType {
    common(EntityType::new("Sensor", "Sensors", "sensor"))
        .with_property(prop("encodingType", ValueKind::String, "encoding_type"))
        .with_property(prop("metadata", ValueKind::String, "metadata"))
        .with_relation("Datastreams", "Datastream", Cardinality::Many, remote("sensor_id"))
}

fn observed_property() -> EntityType {
    common(EntityType::new(
        "ObservedProperty",
        "ObservedProperties",
        "observed_property",
    ))
    .with_identifier(IdentifierField::External {
        column: "identifier".to_string(),
    })
    .with_property(prop("definition", ValueKind::String, "definition"))
    .with_relation(
        "Datastreams",
        "Datastream",
        Cardinality::Many,
        remote("observed_property_id"),
    )
}

fn observation() -> EntityType {
    EntityType::new("Observation", "Observations", "observation")
        .with_property(prop("id", ValueKind::Number, "id"))
        .with_property(interval(
            "phenomenonTime",
            "phenomenon_time_start",
            "phenomenon_time_end",
        ))
        .with_property(prop("resultTime", ValueKind::DateTime, "result_time"))
        .with_property(prop("result", ValueKind::Number, "value"))
        .with_property(prop("resultQuality", ValueKind::String, "result_quality"))
        .with_property(interval("validTime", "valid_time_start", "valid_time_end"))
        .with_property(prop("parameters", ValueKind::String, "parameters"))
        .with_relation(
            "Datastream",
            "Datastream",
            Cardinality::One,
            via_hub(entity_col("dataset_id"), hub_col("datastream_id")),
        )
        .with_relation(
            "FeatureOfInterest",
            "FeatureOfInterest",
            Cardinality::One,
            via_hub(entity_col("dataset_id"), hub_col("feature_id")),
        )
}

fn feature_of_interest() -> EntityType {
    common(EntityType::new(
        "FeatureOfInterest",
        "FeaturesOfInterest",
        "feature",
    ))
    .with_property(accepted_mime("encodingType"))
    .with_property(accepted_mime("featureType"))
    .with_property(prop("feature", ValueKind::Geometry, "geometry"))
    .with_relation(
        "Observations",
        "Observation",
        Cardinality::Many,
        via_hub(hub_col("feature_id"), entity_col("dataset_id")),
    )
}

fn dataset() -> EntityType {
    EntityType::new(HUB_TYPE, "Datasets", "dataset")
        .with_property(prop("id", ValueKind::Number, "id"))
        .with_property(prop("phenomenonId", ValueKind::Number, "phenomenon_id"))
        .with_property(prop("procedureId", ValueKind::Number, "procedure_id"))
        .with_property(prop("featureId", ValueKind::Number, "feature_id"))
        .with_property(prop("platformId", ValueKind::Number, "platform_id"))
        .with_property(prop("datastreamId", ValueKind::Number, "datastream_id"))
}

/// Build the SensorThings registry.
pub fn sensor_things() -> Registry {
    let hub = HubDescriptor {
        table: "dataset".to_string(),
        key_column: "id".to_string(),
    };
    let types: BTreeMap<String, EntityType> = [
        thing(),
        location(),
        historical_location(),
        datastream(),
        sensor(),
        observed_property(),
        observation(),
        feature_of_interest(),
        dataset(),
    ]
    .into_iter()
    .map(|ty| (ty.name.clone(), ty))
    .collect();
    Registry::assemble(hub, types, &[HUB_TYPE])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PropertyStrategy;

    #[test]
    fn catalog_is_consistent() {
        let registry = sensor_things();
        registry.validate().unwrap();
        assert_eq!(registry.types().count(), 9);
    }

    #[test]
    fn every_relation_has_an_inverse() {
        let registry = sensor_things();
        for ty in registry.types() {
            for rel in ty.relations() {
                let inverse = registry.inverse(ty, rel);
                assert!(
                    inverse.is_some(),
                    "{}.{} has no inverse",
                    ty.name,
                    rel.name
                );
            }
        }
    }

    #[test]
    fn hub_is_internal() {
        let registry = sensor_things();
        assert!(registry.by_set("Datasets").is_none());
        assert!(!registry.is_addressable(HUB_TYPE));
        assert_eq!(registry.by_set("Things").unwrap().name, "Thing");
    }

    #[test]
    fn feature_mime_fields_are_synthetic() {
        let registry = sensor_things();
        let foi = registry.entity("FeatureOfInterest").unwrap();
        for name in ["encodingType", "featureType"] {
            let p = foi.property(name).unwrap();
            assert!(matches!(
                p.strategy,
                PropertyStrategy::Computed(ComputedRule::AcceptedMime { .. })
            ));
        }
    }

    #[test]
    fn observed_properties_are_addressed_externally() {
        let registry = sensor_things();
        let op = registry.entity("ObservedProperty").unwrap();
        assert_eq!(
            op.identifier,
            IdentifierField::External {
                column: "identifier".to_string()
            }
        );
    }
}
