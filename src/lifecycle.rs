//! Component D — Lifecycle Tracker.
//!
//! Maintains a reference count per subject (stored in the subject's own
//! data bag under `KEY_REFERENCE_COUNT`) and runs the two-phase attach /
//! detach protocol described in spec.md §4.D whenever a write changes
//! which subjects are reachable through a property. Traversal is
//! iterative with an explicit "in this operation" guard set rather than
//! plain recursion, so a subject reachable twice in the same write (a
//! diamond, or a genuine reference cycle) is only attached or detached
//! once per top-level transition, matching spec.md §8's reference-count
//! invariant.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::value::{ChildIndex, PropertyValue, SubjectId, SubjectRef};

#[derive(Debug, Clone)]
pub struct LifecycleChange {
    pub subject: SubjectRef,
    pub is_attached: bool,
}

#[derive(Debug, Clone)]
pub struct PropertyLifecycleChange {
    pub subject: SubjectRef,
    pub property: String,
    pub child: SubjectRef,
    pub index: Option<ChildIndex>,
    pub is_attached: bool,
}

/// Notified when a subject's reference count crosses zero in either
/// direction (i.e. it becomes reachable, or becomes unreachable).
pub trait LifecycleHandler: Send + Sync {
    fn on_subject_attached(&self, change: &LifecycleChange);
    fn on_subject_detached(&self, change: &LifecycleChange);
}

/// Notified for every individual reference edge added or removed, even
/// when the child subject's own reference count does not cross zero.
pub trait PropertyLifecycleHandler: Send + Sync {
    fn on_property_changed(&self, change: &PropertyLifecycleChange);
}

pub struct LifecycleTracker {
    subject_handlers: RwLock<Vec<Arc<dyn LifecycleHandler>>>,
    property_handlers: RwLock<Vec<Arc<dyn PropertyLifecycleHandler>>>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self {
            subject_handlers: RwLock::new(Vec::new()),
            property_handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn add_subject_handler(&self, handler: Arc<dyn LifecycleHandler>) {
        self.subject_handlers.write().push(handler);
    }

    pub fn add_property_handler(&self, handler: Arc<dyn PropertyLifecycleHandler>) {
        self.property_handlers.write().push(handler);
    }

    /// Attaches `root` (and transitively, on first attach, everything it
    /// currently points to) with an initial reference count of one. Used
    /// by `Engine::attach_root` to seed the graph's entry point, which has
    /// no parent write to trigger the ordinary path.
    pub fn attach_root(&self, root: &SubjectRef) {
        let mut in_progress = HashSet::new();
        self.attach_inner(root, &mut in_progress);
    }

    pub fn detach_root(&self, root: &SubjectRef) {
        let mut in_progress = HashSet::new();
        self.detach_inner(root, &mut in_progress);
    }

    /// Diffs the children reachable from `previous` and `incoming` and
    /// runs attach/detach for the added/removed edges (spec.md §4.D).
    /// Called by [`crate::pipeline::LifecycleInterceptor`] after a write
    /// has committed.
    pub fn apply_transition(
        &self,
        subject: &SubjectRef,
        property: &str,
        previous: &PropertyValue,
        incoming: &PropertyValue,
    ) {
        let prev_children = previous.enumerate_children();
        let new_children = incoming.enumerate_children();

        for (child, index) in &prev_children {
            if !new_children.iter().any(|(c, _)| c == child) {
                let mut in_progress = HashSet::new();
                self.detach_inner(child, &mut in_progress);
                self.notify_property_change(subject, property, child, index.clone(), false);
            }
        }
        for (child, index) in &new_children {
            if !prev_children.iter().any(|(c, _)| c == child) {
                let mut in_progress = HashSet::new();
                self.attach_inner(child, &mut in_progress);
                self.notify_property_change(subject, property, child, index.clone(), true);
            }
        }
    }

    fn attach_inner(&self, subject: &SubjectRef, in_progress: &mut HashSet<SubjectId>) {
        if !in_progress.insert(subject.id()) {
            return;
        }
        let previous_count = subject.subject().reference_count();
        subject.subject().set_reference_count(previous_count + 1);
        if previous_count == 0 {
            tracing::debug!(
                subject.id = subject.id().as_u64(),
                lifecycle.ref_count = previous_count + 1,
                "subject attached"
            );
            self.notify_subject_change(subject, true);
            for (child, _) in self.reachable_children(subject) {
                self.attach_inner(&child, in_progress);
            }
        }
    }

    fn detach_inner(&self, subject: &SubjectRef, in_progress: &mut HashSet<SubjectId>) {
        if !in_progress.insert(subject.id()) {
            return;
        }
        let previous_count = subject.subject().reference_count();
        let next_count = (previous_count - 1).max(0);
        subject.subject().set_reference_count(next_count);
        if next_count == 0 {
            // Detach children in reverse enumeration order, mirroring the
            // reverse unwind spec.md §4.D requires for deterministic
            // teardown order.
            let mut children = self.reachable_children(subject);
            children.reverse();
            for (child, _) in children {
                self.detach_inner(&child, in_progress);
            }
            tracing::debug!(
                subject.id = subject.id().as_u64(),
                lifecycle.ref_count = 0,
                "subject detached"
            );
            self.notify_subject_change(subject, false);
        }
    }

    fn reachable_children(&self, subject: &SubjectRef) -> Vec<(SubjectRef, Option<ChildIndex>)> {
        let mut out = Vec::new();
        for property in subject.subject().property_names() {
            let meta = match subject.subject().metadata(&property) {
                Some(m) => m,
                None => continue,
            };
            if !(meta.is_subject_reference || meta.is_container()) {
                continue;
            }
            let value = subject.subject().raw_value(&property);
            out.extend(value.enumerate_children());
        }
        out
    }

    fn notify_subject_change(&self, subject: &SubjectRef, is_attached: bool) {
        let change = LifecycleChange {
            subject: subject.clone(),
            is_attached,
        };
        for handler in self.subject_handlers.read().iter() {
            if is_attached {
                handler.on_subject_attached(&change);
            } else {
                handler.on_subject_detached(&change);
            }
        }
    }

    fn notify_property_change(
        &self,
        subject: &SubjectRef,
        property: &str,
        child: &SubjectRef,
        index: Option<ChildIndex>,
        is_attached: bool,
    ) {
        let change = PropertyLifecycleChange {
            subject: subject.clone(),
            property: property.to_string(),
            child: child.clone(),
            index,
            is_attached,
        };
        for handler in self.property_handlers.read().iter() {
            handler.on_property_changed(&change);
        }
    }
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::subject::SubjectBuilder;

    fn leaf(context: &Context) -> SubjectRef {
        SubjectBuilder::new("Leaf", context.clone())
            .property("Value", PropertyValue::null())
            .build()
    }

    #[test]
    fn attach_and_detach_single_child_crosses_zero_once() {
        let context = Context::new();
        let tracker = LifecycleTracker::new();
        let parent = SubjectBuilder::new("Parent", context.clone())
            .property("Child", PropertyValue::Item(None))
            .build();
        let child = leaf(&context);

        tracker.apply_transition(
            &parent,
            "Child",
            &PropertyValue::Item(None),
            &PropertyValue::Item(Some(child.clone())),
        );
        assert_eq!(child.subject().reference_count(), 1);

        tracker.apply_transition(
            &parent,
            "Child",
            &PropertyValue::Item(Some(child.clone())),
            &PropertyValue::Item(None),
        );
        assert_eq!(child.subject().reference_count(), 0);
    }

    #[test]
    fn mutual_cycle_does_not_overflow_stack() {
        let context = Context::new();
        let a = SubjectBuilder::new("A", context.clone())
            .property("Other", PropertyValue::Item(None))
            .build();
        let b = SubjectBuilder::new("B", context.clone())
            .property("Other", PropertyValue::Item(None))
            .build();
        a.subject()
            .store_raw_value("Other", PropertyValue::Item(Some(b.clone())));
        b.subject()
            .store_raw_value("Other", PropertyValue::Item(Some(a.clone())));

        let tracker = LifecycleTracker::new();
        tracker.attach_root(&a);
        assert_eq!(a.subject().reference_count(), 1);
        assert_eq!(b.subject().reference_count(), 1);
    }
}
