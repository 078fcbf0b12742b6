//! The four standard write interceptors attached to every subject context
//! by [`crate::engine::Engine`], in spec.md §5's required order:
//! equality-check, lifecycle, derived-change, change-observable.

use std::sync::Arc;

use crate::derived::DerivedEngine;
use crate::error::Result;
use crate::lifecycle::LifecycleTracker;
use crate::observable::ChangeObservable;

use super::chain::{WriteCx, WriteContinuation, WriteInterceptor};

/// Short-circuits writes that would not change the stored value, per
/// spec.md §8: "a write that does not change the stored value produces no
/// synthetic change event and does not run any downstream interceptor."
pub struct EqualityCheckInterceptor;

impl WriteInterceptor for EqualityCheckInterceptor {
    fn write(&self, cx: WriteCx, next: WriteContinuation<'_>) -> Result<()> {
        if cx.is_noop() {
            return Ok(());
        }
        next(cx)
    }
}

/// Runs the two-phase attach/detach protocol around every write that
/// changes a subject-reference-bearing property (spec.md §4.D).
pub struct LifecycleInterceptor {
    lifecycle: Arc<LifecycleTracker>,
}

impl LifecycleInterceptor {
    pub fn new(lifecycle: Arc<LifecycleTracker>) -> Self {
        Self { lifecycle }
    }
}

impl WriteInterceptor for LifecycleInterceptor {
    fn write(&self, cx: WriteCx, next: WriteContinuation<'_>) -> Result<()> {
        let subject = cx.subject().clone();
        let property = cx.property().to_string();
        let previous = cx.previous_value().clone();
        let incoming = cx.value().clone();
        next(cx)?;
        self.lifecycle
            .apply_transition(&subject, &property, &previous, &incoming);
        Ok(())
    }
}

/// After a triggering write commits, asks the derived engine to recompute
/// every derived property that reads the written property, strictly after
/// the triggering write's own change event has been published (spec.md
/// §8: "a derived-property change event is always published after, never
/// interleaved with, the triggering event").
pub struct DerivedChangeInterceptor {
    derived: Arc<DerivedEngine>,
}

impl DerivedChangeInterceptor {
    pub fn new(derived: Arc<DerivedEngine>) -> Self {
        Self { derived }
    }
}

impl WriteInterceptor for DerivedChangeInterceptor {
    fn write(&self, cx: WriteCx, next: WriteContinuation<'_>) -> Result<()> {
        let subject = cx.subject().clone();
        let property = cx.property().to_string();
        next(cx)?;
        self.derived.on_input_changed(&subject, &property);
        Ok(())
    }
}

/// Publishes the triggering change event, using the ambient timestamp
/// override if one is active (see [`crate::observable::SubjectChangeContext`]),
/// else the publish-time clock (spec.md §4.G).
pub struct ChangeObservableInterceptor {
    observable: Arc<ChangeObservable>,
}

impl ChangeObservableInterceptor {
    pub fn new(observable: Arc<ChangeObservable>) -> Self {
        Self { observable }
    }
}

impl WriteInterceptor for ChangeObservableInterceptor {
    fn write(&self, cx: WriteCx, next: WriteContinuation<'_>) -> Result<()> {
        let subject = cx.subject().clone();
        let property = cx.property().to_string();
        let previous = cx.previous_value().clone();
        let incoming = cx.value().clone();
        next(cx)?;
        self.observable
            .publish_triggered(subject, property, previous, incoming);
        Ok(())
    }
}
