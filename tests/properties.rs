//! Quantified invariants from spec.md §8, checked with `proptest` the way
//! the teacher checks its state-machine contracts: generate a sequence of
//! operations, replay it against the real engine, and assert the invariant
//! holds for every generated case rather than a handful of fixed examples.

use std::sync::Arc;

use proptest::prelude::*;

use reactive_subjects::engine::Engine;
use reactive_subjects::observable::{ChangeHandler, PropertyChange};
use reactive_subjects::pipeline::write_property;
use reactive_subjects::subject::SubjectBuilder;
use reactive_subjects::value::{PropertyValue, ScalarValue, SubjectRef};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("reactive_subjects=debug")
        .try_init();
}

fn make_tire(engine: &Engine) -> SubjectRef {
    SubjectBuilder::new("Tire", engine.new_subject_context())
        .property("Pressure", PropertyValue::Scalar(ScalarValue::Int(32)))
        .build()
}

struct CountingHandler(std::sync::atomic::AtomicUsize);

impl ChangeHandler for CountingHandler {
    fn on_change(&self, _change: &PropertyChange) {
        self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}

proptest! {
    /// Attaching a tire into `count` of a car's slots and then detaching
    /// them one at a time always leaves the reference count exactly equal
    /// to the number of slots still holding it (spec.md §8's
    /// reference-count invariant).
    #[test]
    fn reference_count_matches_live_parent_count(count in 1usize..6) {
        init_tracing();
        let engine = Engine::new();
        let car = SubjectBuilder::new("Car", engine.new_subject_context())
            .property("Tires", PropertyValue::Sequence(Vec::new()))
            .build();
        engine.attach_root(&car);
        let tire = make_tire(&engine);

        write_property(
            &car,
            "Tires",
            PropertyValue::Sequence(vec![tire.clone(); count]),
        )
        .unwrap();
        prop_assert_eq!(tire.subject().reference_count(), count as i64);

        write_property(&car, "Tires", PropertyValue::Sequence(Vec::new())).unwrap();
        prop_assert_eq!(tire.subject().reference_count(), 0);
        prop_assert!(!engine.registry().is_registered(tire.id()));
    }

    /// Writing the same scalar value a property already holds, any number
    /// of times, never publishes a change event (spec.md §8's no-op-write
    /// invariant).
    #[test]
    fn repeated_identical_writes_never_publish(repeats in 1usize..20, psi in 0i64..200) {
        let engine = Engine::new();
        let tire = SubjectBuilder::new("Tire", engine.new_subject_context())
            .property("Pressure", PropertyValue::Scalar(ScalarValue::Int(psi)))
            .build();
        engine.attach_root(&tire);

        let handler = Arc::new(CountingHandler(std::sync::atomic::AtomicUsize::new(0)));
        engine.observable().subscribe(handler.clone());

        for _ in 0..repeats {
            write_property(&tire, "Pressure", PropertyValue::Scalar(ScalarValue::Int(psi))).unwrap();
        }
        prop_assert_eq!(handler.0.load(std::sync::atomic::Ordering::Relaxed), 0);
    }
}
