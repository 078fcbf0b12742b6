//! Component E — Registry.
//!
//! Tracks every currently-attached subject and, for each, the single most
//! recent parent edge that attached it (spec.md §4.E's "path" is defined
//! relative to that edge). A subject reachable through more than one
//! parent keeps whichever edge attached it most recently; this is recorded
//! as an explicit simplification in `DESIGN.md` rather than modelled as a
//! set of equally-valid paths.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;

use crate::error::{CoreError, Result};
use crate::lifecycle::{LifecycleChange, LifecycleHandler, PropertyLifecycleChange, PropertyLifecycleHandler};
use crate::path::{self, PathProvider, PathSegment};
use crate::value::{PropertyValue, SubjectId, SubjectRef};

struct ParentLink {
    parent: SubjectRef,
    property: String,
    index: Option<crate::value::ChildIndex>,
}

pub struct RegisteredSubject {
    pub subject: SubjectRef,
    parent: ArcSwapOption<ParentLink>,
}

impl RegisteredSubject {
    pub fn subject(&self) -> &SubjectRef {
        &self.subject
    }
}

/// Registry configuration; currently only the path delimiter is
/// meaningful, but the struct exists so future knobs (e.g. case folding
/// for dictionary keys) have a home without a breaking API change.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub path_delimiter: char,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path_delimiter: path::DEFAULT_DELIMITER,
        }
    }
}

pub struct Registry {
    entries: DashMap<SubjectId, Arc<RegisteredSubject>>,
    #[allow(dead_code)]
    config: RegistryConfig,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    pub fn get(&self, id: SubjectId) -> Option<Arc<RegisteredSubject>> {
        self.entries.get(&id).map(|e| e.clone())
    }

    pub fn is_registered(&self, id: SubjectId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn register(&self, subject: &SubjectRef) {
        self.entries.entry(subject.id()).or_insert_with(|| {
            Arc::new(RegisteredSubject {
                subject: subject.clone(),
                parent: ArcSwapOption::empty(),
            })
        });
    }

    fn unregister(&self, id: SubjectId) {
        self.entries.remove(&id);
    }

    fn set_parent(
        &self,
        child: &SubjectRef,
        parent: &SubjectRef,
        property: &str,
        index: Option<crate::value::ChildIndex>,
    ) {
        if let Some(entry) = self.entries.get(&child.id()) {
            entry.parent.store(Some(Arc::new(ParentLink {
                parent: parent.clone(),
                property: property.to_string(),
                index,
            })));
        }
    }

    /// The live parent edge currently attaching `subject`, if any — used by
    /// the update model to walk up the parent chain when building a
    /// partial update (spec.md §4.H).
    pub fn parent_of(
        &self,
        subject: &SubjectRef,
    ) -> Option<(SubjectRef, String, Option<crate::value::ChildIndex>)> {
        let entry = self.entries.get(&subject.id())?;
        let link = entry.parent.load();
        link.as_ref()
            .map(|link| (link.parent.clone(), link.property.clone(), link.index.clone()))
    }

    fn clear_parent_if_matches(&self, child: &SubjectRef, parent: &SubjectRef, property: &str) {
        if let Some(entry) = self.entries.get(&child.id()) {
            let matches = entry
                .parent
                .load()
                .as_ref()
                .map(|link| link.parent.id() == parent.id() && link.property == property)
                .unwrap_or(false);
            if matches {
                entry.parent.store(None);
            }
        }
    }
}

impl LifecycleHandler for Registry {
    fn on_subject_attached(&self, change: &LifecycleChange) {
        self.register(&change.subject);
    }

    fn on_subject_detached(&self, change: &LifecycleChange) {
        self.unregister(change.subject.id());
    }
}

impl PropertyLifecycleHandler for Registry {
    fn on_property_changed(&self, change: &PropertyLifecycleChange) {
        if change.is_attached {
            self.set_parent(&change.child, &change.subject, &change.property, change.index.clone());
        } else {
            self.clear_parent_if_matches(&change.child, &change.subject, &change.property);
        }
    }
}

impl PathProvider for Registry {
    fn path_of(&self, subject: &SubjectRef) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = self.entries.get(&subject.id())?.clone();
        loop {
            let link = current.parent.load();
            match link.as_ref() {
                None => break,
                Some(link) => {
                    segments.push(PathSegment::new(link.property.clone(), link.index.clone()));
                    current = self.entries.get(&link.parent.id())?.clone();
                }
            }
        }
        segments.reverse();
        Some(path::format_path(&segments))
    }

    fn resolve(&self, root: &SubjectRef, path_str: &str) -> Result<SubjectRef> {
        let segments = path::parse_path(path_str)?;
        let mut current = root.clone();
        for segment in segments {
            let value = crate::pipeline::read_property(&current, &segment.property)?;
            current = match (&value, &segment.index) {
                (PropertyValue::Item(Some(s)), None) => s.clone(),
                (PropertyValue::Sequence(items), Some(crate::value::ChildIndex::Sequence(i))) => {
                    items.get(*i).cloned().ok_or_else(|| {
                        CoreError::internal_invariant(format!(
                            "index {i} out of range for `{}`",
                            segment.property
                        ))
                    })?
                }
                (PropertyValue::Dictionary(map), Some(crate::value::ChildIndex::Key(k))) => {
                    map.get(k).cloned().ok_or_else(|| {
                        CoreError::internal_invariant(format!(
                            "key `{k}` not found in `{}`",
                            segment.property
                        ))
                    })?
                }
                _ => {
                    return Err(CoreError::internal_invariant(format!(
                        "path segment `{segment}` does not address a subject reference"
                    )))
                }
            };
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::lifecycle::LifecycleTracker;
    use crate::subject::SubjectBuilder;
    use std::sync::Arc;

    #[test]
    fn path_of_reflects_most_recent_attach() {
        let context = Context::new();
        let registry = Arc::new(Registry::new(RegistryConfig::default()));
        let tracker = LifecycleTracker::new();
        tracker.add_subject_handler(registry.clone());
        tracker.add_property_handler(registry.clone());

        let child = SubjectBuilder::new("Tire", context.clone())
            .property("Pressure", PropertyValue::null())
            .build();
        let parent = SubjectBuilder::new("Car", context.clone())
            .property("Tires", PropertyValue::Sequence(Vec::new()))
            .build();

        tracker.apply_transition(
            &parent,
            "Tires",
            &PropertyValue::Sequence(Vec::new()),
            &PropertyValue::Sequence(vec![child.clone()]),
        );

        assert_eq!(registry.path_of(&child).as_deref(), Some("Tires[0]"));
    }
}
