//! End-to-end scenarios exercising the engine the way an application
//! would: build a subject graph, attach it, observe changes, and drive it
//! through an update round trip.

use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use reactive_subjects::engine::Engine;
use reactive_subjects::observable::{ChangeHandler, PropertyChange};
use reactive_subjects::path::PathProvider;
use reactive_subjects::pipeline::{read_property, write_property};
use reactive_subjects::subject::SubjectBuilder;
use reactive_subjects::update::{apply_update, build_complete, FactoryUpdateProcessor};
use reactive_subjects::value::{PropertyValue, ScalarValue, SubjectRef};
use rust_decimal::Decimal;

struct Recorder(Mutex<Vec<PropertyChange>>);

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Vec::new())))
    }

    fn names(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|c| c.property.clone()).collect()
    }
}

impl ChangeHandler for Recorder {
    fn on_change(&self, change: &PropertyChange) {
        self.0.lock().unwrap().push(change.clone());
    }
}

fn build_tire(engine: &Engine, psi: i64) -> SubjectRef {
    SubjectBuilder::new("Tire", engine.new_subject_context())
        .property(
            "Pressure",
            PropertyValue::Scalar(ScalarValue::Decimal(Decimal::from(psi))),
        )
        .derived_property(
            "IsUnderinflated",
            Arc::new(|s: &SubjectRef| {
                let pressure = read_property(s, "Pressure")
                    .ok()
                    .and_then(|v| v.as_scalar().and_then(ScalarValue::as_decimal))
                    .unwrap_or_default();
                PropertyValue::Scalar(ScalarValue::Bool(pressure < Decimal::from(28)))
            }),
        )
        .build()
}

fn build_car(engine: &Engine, tires: Vec<SubjectRef>) -> SubjectRef {
    SubjectBuilder::new("Car", engine.new_subject_context())
        .property("Tires", PropertyValue::Sequence(tires))
        .derived_property(
            "AveragePressure",
            Arc::new(|s: &SubjectRef| {
                let tires = read_property(s, "Tires")
                    .ok()
                    .map(|v| v.enumerate_children())
                    .unwrap_or_default();
                let mut total = Decimal::ZERO;
                let mut count = 0i64;
                for (tire, _) in &tires {
                    if let Some(p) = read_property(tire, "Pressure")
                        .ok()
                        .and_then(|v| v.as_scalar().and_then(ScalarValue::as_decimal))
                    {
                        total += p;
                        count += 1;
                    }
                }
                let average = if count == 0 {
                    Decimal::ZERO
                } else {
                    total / Decimal::from(count)
                };
                PropertyValue::Scalar(ScalarValue::Decimal(average))
            }),
        )
        .build()
}

/// S1: `Car.AveragePressure = average(Tires.Pressure)` — a derived property
/// that aggregates over *another subject's* property. Writing a single
/// tire's `Pressure` must recompute and publish a synthetic change on the
/// car's `AveragePressure`, proving dependency tracking crosses subjects.
#[test]
fn cross_subject_aggregate_auto_invalidates() {
    let engine = Engine::new();
    let tire_a = build_tire(&engine, 30);
    let tire_b = build_tire(&engine, 34);
    let car = build_car(&engine, vec![tire_a.clone(), tire_b.clone()]);
    engine.attach_root(&car);

    assert_eq!(
        read_property(&car, "AveragePressure").unwrap().as_scalar(),
        Some(&ScalarValue::Decimal(Decimal::from(32)))
    );

    let recorder = Recorder::new();
    engine.observable().subscribe(recorder.clone());

    write_property(
        &tire_a,
        "Pressure",
        PropertyValue::Scalar(ScalarValue::Decimal(Decimal::from(40))),
    )
    .unwrap();

    assert!(recorder.names().contains(&"AveragePressure".to_string()));
    assert_eq!(
        read_property(&car, "AveragePressure").unwrap().as_scalar(),
        Some(&ScalarValue::Decimal(Decimal::from(37)))
    );
}

/// A decimal-valued property feeds a derived boolean on the same subject,
/// and a write that actually changes the stored value produces exactly one
/// triggering event followed by one derived event.
#[test]
fn decimal_property_drives_derived_boolean() {
    let engine = Engine::new();
    let tire = build_tire(&engine, 32);
    engine.attach_root(&tire);

    let recorder = Recorder::new();
    engine.observable().subscribe(recorder.clone());

    assert_eq!(
        read_property(&tire, "IsUnderinflated").unwrap().as_scalar(),
        Some(&ScalarValue::Bool(false))
    );

    write_property(
        &tire,
        "Pressure",
        PropertyValue::Scalar(ScalarValue::Decimal(Decimal::from(20))),
    )
    .unwrap();

    assert_eq!(recorder.names(), vec!["Pressure", "IsUnderinflated"]);
    assert_eq!(
        read_property(&tire, "IsUnderinflated").unwrap().as_scalar(),
        Some(&ScalarValue::Bool(true))
    );
}

/// A write that does not change the stored value must not publish any
/// event and must not trigger derived recomputation.
#[test]
fn no_op_write_produces_no_event() {
    let engine = Engine::new();
    let tire = build_tire(&engine, 32);
    engine.attach_root(&tire);

    let recorder = Recorder::new();
    engine.observable().subscribe(recorder.clone());

    write_property(
        &tire,
        "Pressure",
        PropertyValue::Scalar(ScalarValue::Decimal(Decimal::from(32))),
    )
    .unwrap();

    assert!(recorder.names().is_empty());
}

/// Attaching a subject into a sequence increments its reference count;
/// removing it drops the count back to zero and detaches it from the
/// registry.
#[test]
fn sequence_membership_drives_reference_count_and_registry() {
    let engine = Engine::new();
    let car = SubjectBuilder::new("Car", engine.new_subject_context())
        .property("Tires", PropertyValue::Sequence(Vec::new()))
        .build();
    engine.attach_root(&car);

    let tire = build_tire(&engine, 32);
    write_property(&car, "Tires", PropertyValue::Sequence(vec![tire.clone()])).unwrap();
    assert_eq!(tire.subject().reference_count(), 1);
    assert!(engine.registry().is_registered(tire.id()));
    assert_eq!(engine.registry().path_of(&tire).as_deref(), Some("Tires[0]"));

    write_property(&car, "Tires", PropertyValue::Sequence(Vec::new())).unwrap();
    assert_eq!(tire.subject().reference_count(), 0);
    assert!(!engine.registry().is_registered(tire.id()));
}

/// A full snapshot built from a live subject, applied onto a
/// freshly-reset copy, reproduces every scalar property.
#[test]
fn build_complete_round_trips_through_apply_update() {
    let engine = Engine::new();
    let tire = build_tire(&engine, 32);
    engine.attach_root(&tire);

    let snapshot = build_complete(&tire).unwrap();

    tire.subject()
        .store_raw_value("Pressure", PropertyValue::Scalar(ScalarValue::Decimal(Decimal::ZERO)));

    let processor = FactoryUpdateProcessor::new();
    apply_update(&tire, &snapshot, &processor).unwrap();

    assert_eq!(
        read_property(&tire, "Pressure").unwrap().as_scalar(),
        Some(&ScalarValue::Decimal(Decimal::from(32)))
    );
}

/// Applying an update for the wrong subject type is rejected rather than
/// silently coerced.
#[test]
fn apply_update_rejects_type_mismatch() {
    let engine = Engine::new();
    let tire = build_tire(&engine, 32);
    engine.attach_root(&tire);

    let mut bogus = build_complete(&tire).unwrap();
    bogus.subject_type = "Wheel".to_string();

    let processor = FactoryUpdateProcessor::new();
    let err = apply_update(&tire, &bogus, &processor).unwrap_err();
    assert_eq!(err.kind(), reactive_subjects::error::ErrorKind::TypeMismatch);
}
