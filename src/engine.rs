//! Composition root wiring the four standard services onto a shared root
//! [`Context`] and exposing the entry points application code and source
//! coordinators use to bring subjects into the graph.

use std::collections::HashSet;
use std::sync::Arc;

use crate::context::Context;
use crate::derived::DerivedEngine;
use crate::lifecycle::LifecycleTracker;
use crate::observable::ChangeObservable;
use crate::pipeline::attach_standard_interceptors;
use crate::registry::{Registry, RegistryConfig};
use crate::value::{SubjectId, SubjectRef};

pub struct Engine {
    root_context: Context,
    registry: Arc<Registry>,
    lifecycle: Arc<LifecycleTracker>,
    derived: Arc<DerivedEngine>,
    observable: Arc<ChangeObservable>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_registry_config(RegistryConfig::default())
    }

    pub fn with_registry_config(registry_config: RegistryConfig) -> Self {
        let registry = Arc::new(Registry::new(registry_config));
        let lifecycle = Arc::new(LifecycleTracker::new());
        let observable = Arc::new(ChangeObservable::new());
        let derived = Arc::new(DerivedEngine::new(lifecycle.clone(), observable.clone()));

        lifecycle.add_subject_handler(registry.clone());
        lifecycle.add_property_handler(registry.clone());

        let root_context = Context::new();
        root_context.add_service(registry.clone());
        root_context.add_service(lifecycle.clone());
        root_context.add_service(derived.clone());
        root_context.add_service(observable.clone());

        Self {
            root_context,
            registry,
            lifecycle,
            derived,
            observable,
        }
    }

    pub fn root_context(&self) -> &Context {
        &self.root_context
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleTracker> {
        &self.lifecycle
    }

    pub fn derived(&self) -> &Arc<DerivedEngine> {
        &self.derived
    }

    pub fn observable(&self) -> &Arc<ChangeObservable> {
        &self.observable
    }

    /// A fresh context for a new subject: falls back to the root context
    /// for service lookup and carries its own copy of the four standard
    /// interceptors (interceptors are local, never inherited — spec.md
    /// glossary `ContextInheritance` covers services, not interceptors).
    pub fn new_subject_context(&self) -> Context {
        let context = Context::with_fallback(self.root_context.clone());
        attach_standard_interceptors(
            &context,
            self.lifecycle.clone(),
            self.derived.clone(),
            self.observable.clone(),
        );
        context
    }

    /// Attaches `subject` (and, on this first attach, everything it
    /// currently references) as a root of the graph, and computes every
    /// derived property reachable from it.
    pub fn attach_root(&self, subject: &SubjectRef) {
        self.lifecycle.attach_root(subject);
        let mut visited = HashSet::new();
        self.initialize_derived_recursive(subject, &mut visited);
    }

    pub fn detach_root(&self, subject: &SubjectRef) {
        self.lifecycle.detach_root(subject);
    }

    fn initialize_derived_recursive(&self, subject: &SubjectRef, visited: &mut HashSet<SubjectId>) {
        if !visited.insert(subject.id()) {
            return;
        }
        self.derived.initialize(subject);
        for name in subject.subject().property_names() {
            let meta = match subject.subject().metadata(&name) {
                Some(m) => m,
                None => continue,
            };
            if meta.is_derived || !(meta.is_subject_reference || meta.is_container()) {
                continue;
            }
            let value = subject.subject().raw_value(&name);
            for (child, _) in value.enumerate_children() {
                self.initialize_derived_recursive(&child, visited);
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::SubjectBuilder;
    use crate::value::{PropertyValue, ScalarValue};

    #[test]
    fn attach_root_seeds_registry_and_derived_values() {
        let engine = Engine::new();
        let context = engine.new_subject_context();
        let subject = SubjectBuilder::new("Tire", context)
            .property("Psi", PropertyValue::Scalar(ScalarValue::Int(32)))
            .derived_property(
                "IsLow",
                Arc::new(|s: &SubjectRef| {
                    let psi = crate::pipeline::read_property(s, "Psi")
                        .ok()
                        .and_then(|v| v.as_scalar().cloned());
                    PropertyValue::Scalar(ScalarValue::Bool(matches!(
                        psi,
                        Some(ScalarValue::Int(n)) if n < 28
                    )))
                }),
            )
            .build();

        engine.attach_root(&subject);

        assert!(engine.registry().is_registered(subject.id()));
        assert_eq!(
            subject.subject().raw_value("IsLow").as_scalar(),
            Some(&ScalarValue::Bool(false))
        );
    }
}
