//! Component H — Update Model.

mod apply;
mod build;
mod model;
mod path_projection;
mod processor;

pub use apply::apply_update;
pub use build::{build_complete, build_partial};
pub use model::{SubjectPropertyUpdate, SubjectUpdate};
pub use path_projection::resolve_owner;
pub use processor::{FactoryUpdateProcessor, UpdateProcessor};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::Context;
    use crate::lifecycle::LifecycleTracker;
    use crate::observable::PropertyChange;
    use crate::registry::{Registry, RegistryConfig};
    use crate::subject::SubjectBuilder;
    use crate::value::{PropertyValue, ScalarValue};

    #[test]
    fn build_complete_then_apply_round_trips_scalars() {
        let context = Context::new();
        let subject = SubjectBuilder::new("Tire", context)
            .property("Pressure", PropertyValue::Scalar(ScalarValue::Int(32)))
            .build();

        let snapshot = build_complete(&subject).unwrap();
        subject
            .subject()
            .store_raw_value("Pressure", PropertyValue::Scalar(ScalarValue::Int(0)));

        let processor = FactoryUpdateProcessor::new();
        apply_update(&subject, &snapshot, &processor).unwrap();

        assert_eq!(
            subject.subject().raw_value("Pressure").as_scalar(),
            Some(&ScalarValue::Int(32))
        );
    }

    #[test]
    fn build_complete_nests_attribute_under_root_property() {
        let context = Context::new();
        let subject = SubjectBuilder::new("Widget", context)
            .property("Name", PropertyValue::Scalar(ScalarValue::Text("Bolt".into())))
            .attribute_property(
                "Name",
                "MaxLength",
                PropertyValue::Scalar(ScalarValue::Int(123)),
            )
            .build();

        let update = build_complete(&subject).unwrap();
        assert!(!update.properties.contains_key("Name_MaxLength"));
        let name_update = update.properties.get("Name").unwrap();
        let max_length = name_update.attributes().get("MaxLength").unwrap();
        match max_length {
            SubjectPropertyUpdate::Scalar { value, .. } => {
                assert_eq!(*value, ScalarValue::Int(123));
            }
            other => panic!("expected a scalar attribute update, got {other:?}"),
        }
    }

    /// S6: a complete update nests `Name`'s `MaxLength` attribute under
    /// `Name`, and applying that shape back writes `Name_MaxLength`.
    #[test]
    fn attribute_update_round_trips_to_backing_property() {
        let context = Context::new();
        let subject = SubjectBuilder::new("Widget", context)
            .property("Name", PropertyValue::Scalar(ScalarValue::Text("Bolt".into())))
            .attribute_property(
                "Name",
                "MaxLength",
                PropertyValue::Scalar(ScalarValue::Int(123)),
            )
            .build();

        let snapshot = build_complete(&subject).unwrap();
        subject
            .subject()
            .store_raw_value("Name_MaxLength", PropertyValue::Scalar(ScalarValue::Int(0)));

        let processor = FactoryUpdateProcessor::new();
        apply_update(&subject, &snapshot, &processor).unwrap();

        assert_eq!(
            subject.subject().raw_value("Name_MaxLength").as_scalar(),
            Some(&ScalarValue::Int(123))
        );
    }

    #[test]
    fn build_partial_walks_parent_chain_for_nested_child() {
        let context = Context::new();
        let registry = Arc::new(Registry::new(RegistryConfig::default()));
        let lifecycle = Arc::new(LifecycleTracker::new());
        lifecycle.add_subject_handler(registry.clone());
        lifecycle.add_property_handler(registry.clone());

        let tire = SubjectBuilder::new("Tire", context.clone())
            .property("Pressure", PropertyValue::Scalar(ScalarValue::Int(32)))
            .build();
        let car = SubjectBuilder::new("Car", context.clone())
            .property("Tires", PropertyValue::Sequence(vec![tire.clone()]))
            .build();
        lifecycle.attach_root(&car);

        let change = PropertyChange {
            subject: tire.clone(),
            property: "Pressure".to_string(),
            old_value: PropertyValue::Scalar(ScalarValue::Int(32)),
            new_value: PropertyValue::Scalar(ScalarValue::Int(28)),
            timestamp: chrono::Utc::now(),
            is_derived: false,
        };

        let partial = build_partial(&registry, &[change]).unwrap();
        assert_eq!(partial.subject_type, "Car");
        let tires = match partial.properties.get("Tires").unwrap() {
            SubjectPropertyUpdate::Sequence { items, .. } => items,
            other => panic!("expected a sequence update, got {other:?}"),
        };
        assert_eq!(tires.len(), 1);
        assert_eq!(tires[0].subject_type, "Tire");
        match tires[0].properties.get("Pressure").unwrap() {
            SubjectPropertyUpdate::Scalar { value, .. } => {
                assert_eq!(*value, ScalarValue::Int(28));
            }
            other => panic!("expected a scalar update, got {other:?}"),
        }
    }
}
