//! Component G — Change Observable & Timestamping.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::value::{PropertyValue, SubjectId, SubjectRef, Timestamp};

/// A single property change, published after it has committed (spec.md
/// §4.G). `is_derived` distinguishes a user-triggered write from a
/// recompute performed by the derived engine.
#[derive(Clone)]
pub struct PropertyChange {
    pub subject: SubjectRef,
    pub property: String,
    pub old_value: PropertyValue,
    pub new_value: PropertyValue,
    pub timestamp: Timestamp,
    pub is_derived: bool,
}

pub trait ChangeHandler: Send + Sync {
    fn on_change(&self, change: &PropertyChange);
}

pub struct ChangeObservable {
    handlers: RwLock<Vec<Arc<dyn ChangeHandler>>>,
}

impl ChangeObservable {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, handler: Arc<dyn ChangeHandler>) {
        self.handlers.write().push(handler);
    }

    pub fn publish_triggered(
        &self,
        subject: SubjectRef,
        property: String,
        old_value: PropertyValue,
        new_value: PropertyValue,
    ) {
        let timestamp = current_timestamp();
        subject.subject().set_timestamp(&property, timestamp);
        self.notify(PropertyChange {
            subject,
            property,
            old_value,
            new_value,
            timestamp,
            is_derived: false,
        });
    }

    pub fn publish_derived(
        &self,
        subject: SubjectRef,
        property: String,
        old_value: PropertyValue,
        new_value: PropertyValue,
    ) {
        let timestamp = current_timestamp();
        subject.subject().set_timestamp(&property, timestamp);
        self.notify(PropertyChange {
            subject,
            property,
            old_value,
            new_value,
            timestamp,
            is_derived: true,
        });
    }

    fn notify(&self, change: PropertyChange) {
        for handler in self.handlers.read().iter() {
            handler.on_change(&change);
        }
    }
}

impl Default for ChangeObservable {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static TIMESTAMP_OVERRIDE: RefCell<Option<Timestamp>> = RefCell::new(None);
}

/// Pins every change published on the current thread for the duration of
/// `f` to a single timestamp, so a batch applied by a
/// [`crate::source::SourceCoordinator`] gets one consistent publish time
/// instead of one per property (spec.md §4.G).
pub struct SubjectChangeContext;

impl SubjectChangeContext {
    pub fn with_timestamp<R>(timestamp: Timestamp, f: impl FnOnce() -> R) -> R {
        TIMESTAMP_OVERRIDE.with(|cell| *cell.borrow_mut() = Some(timestamp));
        let result = f();
        TIMESTAMP_OVERRIDE.with(|cell| *cell.borrow_mut() = None);
        result
    }
}

fn current_timestamp() -> Timestamp {
    TIMESTAMP_OVERRIDE.with(|cell| cell.borrow().unwrap_or_else(Utc::now))
}

/// Collapses a run of changes down to the latest one per `(subject,
/// property)`, preserving first-seen order (spec.md §4.G names this
/// combinator explicitly). Used by sources that want to coalesce bursts of
/// writes before handing them to a `Source::write_changes` call.
pub fn buffer_changes(changes: impl IntoIterator<Item = PropertyChange>) -> Vec<PropertyChange> {
    let mut order: Vec<(SubjectId, String)> = Vec::new();
    let mut latest: HashMap<(SubjectId, String), PropertyChange> = HashMap::new();
    for change in changes {
        let key = (change.subject.id(), change.property.clone());
        if !latest.contains_key(&key) {
            order.push(key.clone());
        }
        latest.insert(key, change);
    }
    order
        .into_iter()
        .filter_map(|key| latest.remove(&key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::subject::SubjectBuilder;
    use crate::value::ScalarValue;

    fn change(subject: &SubjectRef, property: &str, value: i64) -> PropertyChange {
        PropertyChange {
            subject: subject.clone(),
            property: property.to_string(),
            old_value: PropertyValue::null(),
            new_value: PropertyValue::Scalar(ScalarValue::Int(value)),
            timestamp: Utc::now(),
            is_derived: false,
        }
    }

    #[test]
    fn buffer_changes_keeps_latest_per_property() {
        let context = Context::new();
        let subject = SubjectBuilder::new("Counter", context)
            .property("Value", PropertyValue::null())
            .build();
        let changes = vec![
            change(&subject, "Value", 1),
            change(&subject, "Value", 2),
            change(&subject, "Value", 3),
        ];
        let buffered = buffer_changes(changes);
        assert_eq!(buffered.len(), 1);
        assert_eq!(
            buffered[0].new_value.as_scalar(),
            Some(&ScalarValue::Int(3))
        );
    }
}
