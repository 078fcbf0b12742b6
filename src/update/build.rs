//! Building a [`SubjectUpdate`] from the live object graph.

use std::collections::{BTreeMap, HashMap};

use crate::error::{CoreError, Result};
use crate::observable::PropertyChange;
use crate::pipeline::read_property;
use crate::registry::Registry;
use crate::value::{ChildIndex, PropertyValue, ScalarValue, SubjectId, SubjectRef};

use super::model::{SubjectPropertyUpdate, SubjectUpdate};

/// Builds a full snapshot of every non-attribute property on `subject`,
/// recursing into every reachable child subject (spec.md §4.H "complete
/// update"). Attribute properties are nested under their root property's
/// `attributes` map rather than appearing as siblings.
pub fn build_complete(subject: &SubjectRef) -> Result<SubjectUpdate> {
    let mut update = SubjectUpdate::new(subject.subject().type_tag());
    for name in subject.subject().property_names() {
        let meta = match subject.subject().metadata(&name) {
            Some(m) => m,
            None => continue,
        };
        if meta.is_attribute || meta.is_derived {
            continue;
        }
        let value = read_property(subject, &name)?;
        update.properties.insert(name, property_update_of(&value)?);
    }
    for name in subject.subject().property_names() {
        let meta = match subject.subject().metadata(&name) {
            Some(m) => m,
            None => continue,
        };
        let attr = match &meta.attribute_of {
            Some(a) => a,
            None => continue,
        };
        let value = read_property(subject, &name)?;
        let leaf = property_update_of(&value)?;
        nest_attribute(&mut update, &attr.root_property, &attr.attribute_name, leaf);
    }
    Ok(update)
}

fn nest_attribute(
    update: &mut SubjectUpdate,
    root_property: &str,
    attribute_name: &str,
    leaf: SubjectPropertyUpdate,
) {
    let root_entry = update
        .properties
        .entry(root_property.to_string())
        .or_insert_with(empty_scalar_slot);
    root_entry
        .attributes_mut()
        .insert(attribute_name.to_string(), leaf);
}

fn empty_scalar_slot() -> SubjectPropertyUpdate {
    SubjectPropertyUpdate::Scalar {
        value: ScalarValue::Null,
        attributes: BTreeMap::new(),
    }
}

/// Builds a parent-rooted [`SubjectUpdate`] tree from a list of
/// `PropertyChange` records (spec.md §4.H "partial update"). For each
/// change, the owning subject's property update is set directly (attribute
/// properties are nested under their root property's `attributes` map
/// instead), and the parent chain — looked up through `registry` — is
/// walked from that subject up to whichever ancestor has no live parent,
/// wiring each subject's update into the right slot (`Item` for a single
/// reference, keyed by index/key for a collection) on the way. The
/// returned tree is rooted at that top-most ancestor, not necessarily at
/// any one subject named in `changes`.
pub fn build_partial(registry: &Registry, changes: &[PropertyChange]) -> Result<SubjectUpdate> {
    let mut nodes: HashMap<SubjectId, (SubjectRef, BTreeMap<String, SubjectPropertyUpdate>)> =
        HashMap::new();
    let mut parent_of: HashMap<SubjectId, (SubjectRef, String, Option<ChildIndex>)> =
        HashMap::new();

    for change in changes {
        let subject = &change.subject;
        let meta = match subject.subject().metadata(&change.property) {
            Some(m) => m,
            None => continue,
        };
        if meta.is_derived {
            continue;
        }
        let leaf = property_update_of(&change.new_value)?;
        let entry = nodes
            .entry(subject.id())
            .or_insert_with(|| (subject.clone(), BTreeMap::new()));

        match &meta.attribute_of {
            Some(attr) => {
                let root_entry = entry
                    .1
                    .entry(attr.root_property.clone())
                    .or_insert_with(empty_scalar_slot);
                root_entry
                    .attributes_mut()
                    .insert(attr.attribute_name.clone(), leaf);
            }
            None => {
                entry.1.insert(change.property.clone(), leaf);
            }
        }

        let mut current = subject.clone();
        loop {
            match registry.parent_of(&current) {
                None => break,
                Some((parent, property, index)) => {
                    nodes
                        .entry(parent.id())
                        .or_insert_with(|| (parent.clone(), BTreeMap::new()));
                    parent_of
                        .entry(current.id())
                        .or_insert_with(|| (parent.clone(), property, index));
                    current = parent;
                }
            }
        }
    }

    if nodes.is_empty() {
        return Err(CoreError::internal_invariant(
            "build_partial: no included changes",
        ));
    }

    let mut children_by_parent: HashMap<SubjectId, Vec<(SubjectId, String, Option<ChildIndex>)>> =
        HashMap::new();
    for (child_id, (parent, property, index)) in &parent_of {
        children_by_parent
            .entry(parent.id())
            .or_default()
            .push((*child_id, property.clone(), index.clone()));
    }

    let root_id = nodes
        .keys()
        .find(|id| !parent_of.contains_key(id))
        .copied()
        .ok_or_else(|| CoreError::internal_invariant("build_partial: could not determine root"))?;

    Ok(materialize(root_id, &nodes, &children_by_parent))
}

fn materialize(
    id: SubjectId,
    nodes: &HashMap<SubjectId, (SubjectRef, BTreeMap<String, SubjectPropertyUpdate>)>,
    children_by_parent: &HashMap<SubjectId, Vec<(SubjectId, String, Option<ChildIndex>)>>,
) -> SubjectUpdate {
    let (subject, properties) = &nodes[&id];
    let mut update = SubjectUpdate {
        subject_type: subject.subject().type_tag().to_string(),
        properties: properties.clone(),
    };
    if let Some(children) = children_by_parent.get(&id) {
        for (child_id, property, index) in children {
            let child_update = materialize(*child_id, nodes, children_by_parent);
            wire_child(&mut update, property, index.as_ref(), child_update);
        }
    }
    update
}

fn wire_child(
    update: &mut SubjectUpdate,
    property: &str,
    index: Option<&ChildIndex>,
    child: SubjectUpdate,
) {
    match index {
        None => {
            update.properties.insert(
                property.to_string(),
                SubjectPropertyUpdate::Item {
                    value: Some(Box::new(child)),
                    attributes: BTreeMap::new(),
                },
            );
        }
        Some(ChildIndex::Sequence(i)) => {
            let entry = update
                .properties
                .entry(property.to_string())
                .or_insert_with(|| SubjectPropertyUpdate::Sequence {
                    items: Vec::new(),
                    attributes: BTreeMap::new(),
                });
            if let SubjectPropertyUpdate::Sequence { items, .. } = entry {
                while items.len() <= *i {
                    items.push(SubjectUpdate::default());
                }
                items[*i] = child;
            }
        }
        Some(ChildIndex::Key(key)) => {
            let entry = update
                .properties
                .entry(property.to_string())
                .or_insert_with(|| SubjectPropertyUpdate::Dictionary {
                    items: BTreeMap::new(),
                    attributes: BTreeMap::new(),
                });
            if let SubjectPropertyUpdate::Dictionary { items, .. } = entry {
                items.insert(key.clone(), child);
            }
        }
    }
}

fn property_update_of(value: &PropertyValue) -> Result<SubjectPropertyUpdate> {
    Ok(match value {
        PropertyValue::Scalar(scalar) => SubjectPropertyUpdate::Scalar {
            value: scalar.clone(),
            attributes: BTreeMap::new(),
        },
        PropertyValue::Item(None) => SubjectPropertyUpdate::Item {
            value: None,
            attributes: BTreeMap::new(),
        },
        PropertyValue::Item(Some(child)) => SubjectPropertyUpdate::Item {
            value: Some(Box::new(build_complete(child)?)),
            attributes: BTreeMap::new(),
        },
        PropertyValue::Sequence(items) => {
            let mut built = Vec::with_capacity(items.len());
            for item in items {
                built.push(build_complete(item)?);
            }
            SubjectPropertyUpdate::Sequence {
                items: built,
                attributes: BTreeMap::new(),
            }
        }
        PropertyValue::Dictionary(map) => {
            let mut built = BTreeMap::new();
            for (key, item) in map {
                built.insert(key.clone(), build_complete(item)?);
            }
            SubjectPropertyUpdate::Dictionary {
                items: built,
                attributes: BTreeMap::new(),
            }
        }
    })
}
