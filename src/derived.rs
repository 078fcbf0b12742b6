//! Component F — Derived-Property Engine.
//!
//! Dependencies are auto-discovered the way the specification's Design
//! Notes favour: the getter is run inside a recording frame, and every
//! property read through the pipeline while that frame is active is
//! recorded as a dependency (spec.md §4.F), regardless of which subject
//! owns the property being read. A derived property that aggregates over
//! a collection (e.g. a car's average tire pressure) therefore has every
//! tire's `Pressure` read registered as one of its inputs, and a write to
//! any one of them auto-invalidates the aggregate.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::lifecycle::LifecycleTracker;
use crate::observable::ChangeObservable;
use crate::pipeline::{ReadContinuation, ReadInterceptor};
use crate::subject::unknown_property_error;
use crate::value::{PropertyReference, PropertyValue, SubjectRef};

thread_local! {
    static FRAMES: RefCell<Vec<HashSet<PropertyReference>>> = RefCell::new(Vec::new());
}

/// Attached as the first read interceptor on every context; records which
/// (subject, property) pairs were read while a derived recompute frame is
/// active, no matter which subject owns the property.
pub struct ReadRecorder {
    #[allow(dead_code)]
    derived: Arc<DerivedEngine>,
}

impl ReadRecorder {
    pub fn new(derived: Arc<DerivedEngine>) -> Self {
        Self { derived }
    }
}

impl ReadInterceptor for ReadRecorder {
    fn read(
        &self,
        subject: &SubjectRef,
        property: &str,
        next: ReadContinuation<'_>,
    ) -> Result<PropertyValue> {
        let value = next(subject, property)?;
        FRAMES.with(|frames| {
            if let Some(touched) = frames.borrow_mut().last_mut() {
                touched.insert(PropertyReference::new(subject.clone(), property));
            }
        });
        Ok(value)
    }
}

/// Resolves the stored value for `property` without going back through the
/// read interceptor chain; the terminal step of [`crate::pipeline::read_property`].
pub(crate) fn read_terminal(subject: &SubjectRef, property: &str) -> Result<PropertyValue> {
    if !subject.subject().has_property(property) {
        return Err(unknown_property_error(subject, property));
    }
    Ok(subject.subject().raw_value(property))
}

pub struct DerivedEngine {
    lifecycle: Arc<LifecycleTracker>,
    observable: Arc<ChangeObservable>,
}

impl DerivedEngine {
    pub fn new(lifecycle: Arc<LifecycleTracker>, observable: Arc<ChangeObservable>) -> Self {
        Self {
            lifecycle,
            observable,
        }
    }

    /// Computes every derived property declared on `subject` for the
    /// first time, discovering and recording their dependency sets. Called
    /// once, right after a subject is built.
    pub fn initialize(&self, subject: &SubjectRef) {
        for name in subject.subject().property_names() {
            let getter = match subject
                .subject()
                .metadata(&name)
                .filter(|m| m.is_derived)
                .and_then(|m| m.derived_getter.clone())
            {
                Some(g) => g,
                None => continue,
            };
            let value = self.recompute(subject, &name, &getter);
            subject.subject().store_raw_value(&name, value.clone());
            subject.subject().set_last_known_value(&name, value);
        }
    }

    /// Recomputes every derived property that depends on `input_property`
    /// on `subject` — wherever that derived property actually lives,
    /// including other subjects that read `subject`'s property as part of
    /// an aggregate — publishing a change event for each one whose value
    /// actually changed, and cascading into properties derived from those
    /// in turn. Called by [`crate::pipeline::DerivedChangeInterceptor`]
    /// after a triggering write commits.
    pub fn on_input_changed(&self, subject: &SubjectRef, input_property: &str) {
        let dependents = subject.subject().used_by_properties(input_property);
        for dependent in dependents {
            let derived_subject = dependent.subject;
            let derived_property = dependent.property;
            let getter = match derived_subject
                .subject()
                .metadata(&derived_property)
                .and_then(|m| m.derived_getter.clone())
            {
                Some(g) => g,
                None => continue,
            };
            let previous = derived_subject
                .subject()
                .last_known_value(&derived_property)
                .unwrap_or_else(PropertyValue::null);
            let new_value = self.recompute(&derived_subject, &derived_property, &getter);
            if new_value.is_equal_to(&previous) {
                continue;
            }
            tracing::debug!(
                subject.id = derived_subject.id().as_u64(),
                property.name = %derived_property,
                "derived property recomputed"
            );
            self.lifecycle
                .apply_transition(&derived_subject, &derived_property, &previous, &new_value);
            derived_subject
                .subject()
                .store_raw_value(&derived_property, new_value.clone());
            derived_subject
                .subject()
                .set_last_known_value(&derived_property, new_value.clone());
            self.observable.publish_derived(
                derived_subject.clone(),
                derived_property.clone(),
                previous,
                new_value,
            );
            self.on_input_changed(&derived_subject, &derived_property);
        }
    }

    fn recompute(
        &self,
        subject: &SubjectRef,
        derived_property: &str,
        getter: &Arc<dyn Fn(&SubjectRef) -> PropertyValue + Send + Sync>,
    ) -> PropertyValue {
        FRAMES.with(|frames| frames.borrow_mut().push(HashSet::new()));
        let value = getter(subject);
        let touched = FRAMES.with(|frames| frames.borrow_mut().pop()).unwrap_or_default();

        let previous_required = subject.subject().required_properties(derived_property);
        let this_derived = PropertyReference::new(subject.clone(), derived_property);
        for removed in previous_required.difference(&touched) {
            let mut used_by = removed.subject.subject().used_by_properties(&removed.property);
            used_by.remove(&this_derived);
            removed
                .subject
                .subject()
                .set_used_by_properties(&removed.property, used_by);
        }
        for added in touched.difference(&previous_required) {
            let mut used_by = added.subject.subject().used_by_properties(&added.property);
            used_by.insert(this_derived.clone());
            added
                .subject
                .subject()
                .set_used_by_properties(&added.property, used_by);
        }
        subject
            .subject()
            .set_required_properties(derived_property, touched);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::subject::SubjectBuilder;
    use crate::value::ScalarValue;

    fn make_engine() -> DerivedEngine {
        let lifecycle = Arc::new(LifecycleTracker::new());
        let observable = Arc::new(ChangeObservable::new());
        DerivedEngine::new(lifecycle, observable)
    }

    #[test]
    fn initializes_and_recomputes_on_dependency_change() {
        let context = Context::new();
        let engine = make_engine();
        context.add_read_interceptor(Arc::new(ReadRecorder::new(Arc::new(DerivedEngine::new(
            Arc::new(LifecycleTracker::new()),
            Arc::new(ChangeObservable::new()),
        )))));

        let subject = SubjectBuilder::new("Tire", context.clone())
            .property("Psi", PropertyValue::Scalar(ScalarValue::Int(30)))
            .derived_property(
                "IsLow",
                Arc::new(|s: &SubjectRef| {
                    let psi = crate::pipeline::read_property(s, "Psi")
                        .ok()
                        .and_then(|v| v.as_scalar().and_then(ScalarValue::as_decimal))
                        .unwrap_or_default();
                    PropertyValue::Scalar(ScalarValue::Bool(
                        psi < rust_decimal::Decimal::from(28),
                    ))
                }),
            )
            .build();

        engine.initialize(&subject);
        assert_eq!(
            subject.subject().raw_value("IsLow").as_scalar(),
            Some(&ScalarValue::Bool(false))
        );

        subject
            .subject()
            .store_raw_value("Psi", PropertyValue::Scalar(ScalarValue::Int(20)));
        engine.on_input_changed(&subject, "Psi");
        assert_eq!(
            subject.subject().raw_value("IsLow").as_scalar(),
            Some(&ScalarValue::Bool(true))
        );
    }
}
