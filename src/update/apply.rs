//! Applying an inbound [`SubjectUpdate`] onto a live subject graph.

use std::collections::{BTreeMap, HashSet};

use crate::error::{CoreError, Result};
use crate::pipeline::write_property;
use crate::value::{PropertyValue, SubjectId, SubjectRef};

use super::model::{SubjectPropertyUpdate, SubjectUpdate};
use super::processor::UpdateProcessor;

/// Applies `update` onto `root`, creating child subjects through
/// `processor` wherever the update names a subject identity the graph
/// does not already hold at that position (spec.md §4.H). Properties
/// absent from `update` are left untouched; sequence and dictionary
/// properties are replaced wholesale to match `update`'s membership,
/// per the ordered/shrink-to-length collection policy recorded in
/// `DESIGN.md`.
pub fn apply_update(
    root: &SubjectRef,
    update: &SubjectUpdate,
    processor: &dyn UpdateProcessor,
) -> Result<()> {
    tracing::debug!(
        subject.id = root.id().as_u64(),
        subject_type = %update.subject_type,
        property_count = update.properties.len(),
        "applying subject update"
    );
    let mut in_progress = HashSet::new();
    apply_into(root, update, processor, &mut in_progress)
}

fn apply_into(
    subject: &SubjectRef,
    update: &SubjectUpdate,
    processor: &dyn UpdateProcessor,
    in_progress: &mut HashSet<SubjectId>,
) -> Result<()> {
    if subject.subject().type_tag() != update.subject_type {
        return Err(CoreError::type_mismatch(&update.subject_type));
    }
    if !in_progress.insert(subject.id()) {
        return Err(CoreError::cycle_in_update(subject.subject().type_tag()));
    }

    for (name, property_update) in &update.properties {
        if !subject.subject().has_property(name) {
            return Err(CoreError::unknown_property(subject.subject().type_tag(), name));
        }
        apply_property(subject, name, property_update, processor, in_progress)?;
        apply_attributes(subject, name, property_update.attributes(), processor, in_progress)?;
    }

    in_progress.remove(&subject.id());
    Ok(())
}

/// Dispatches each entry of a property update's `attributes` map onto its
/// backing property (e.g. `Name`'s `MaxLength` attribute writes
/// `Name_MaxLength`), per spec.md §4.H "Attributes → dispatched to the
/// attribute property."
fn apply_attributes(
    subject: &SubjectRef,
    root_property: &str,
    attributes: &BTreeMap<String, SubjectPropertyUpdate>,
    processor: &dyn UpdateProcessor,
    in_progress: &mut HashSet<SubjectId>,
) -> Result<()> {
    for (attribute_name, attribute_update) in attributes {
        let backing = crate::subject::attribute_backing_name(root_property, attribute_name);
        if !subject.subject().has_property(&backing) {
            return Err(CoreError::unknown_property(subject.subject().type_tag(), &backing));
        }
        apply_property(subject, &backing, attribute_update, processor, in_progress)?;
    }
    Ok(())
}

fn apply_property(
    subject: &SubjectRef,
    name: &str,
    property_update: &SubjectPropertyUpdate,
    processor: &dyn UpdateProcessor,
    in_progress: &mut HashSet<SubjectId>,
) -> Result<()> {
    match property_update {
        SubjectPropertyUpdate::Scalar { value, .. } => {
            write_property(subject, name, PropertyValue::Scalar(value.clone()))
        }
        SubjectPropertyUpdate::Item { value: None, .. } => {
            write_property(subject, name, PropertyValue::Item(None))
        }
        SubjectPropertyUpdate::Item {
            value: Some(nested),
            ..
        } => {
            let current = subject.subject().raw_value(name);
            let child = match current.as_item().and_then(|opt| opt.clone()) {
                Some(existing) if existing.subject().type_tag() == nested.subject_type => existing,
                _ => processor.create_subject(&nested.subject_type, subject.subject().context())?,
            };
            apply_into(&child, nested, processor, in_progress)?;
            write_property(subject, name, PropertyValue::Item(Some(child)))
        }
        SubjectPropertyUpdate::Sequence { items, .. } => {
            let current = subject.subject().raw_value(name);
            let existing = match &current {
                PropertyValue::Sequence(v) => v.clone(),
                _ => Vec::new(),
            };
            let mut result = Vec::with_capacity(items.len());
            for (index, nested) in items.iter().enumerate() {
                let child = match existing.get(index) {
                    Some(item) if item.subject().type_tag() == nested.subject_type => item.clone(),
                    _ => processor
                        .create_subject(&nested.subject_type, subject.subject().context())?,
                };
                apply_into(&child, nested, processor, in_progress)?;
                result.push(child);
            }
            write_property(subject, name, PropertyValue::Sequence(result))
        }
        SubjectPropertyUpdate::Dictionary { items, .. } => {
            let current = subject.subject().raw_value(name);
            let existing = match &current {
                PropertyValue::Dictionary(m) => m.clone(),
                _ => BTreeMap::new(),
            };
            let mut result = BTreeMap::new();
            for (key, nested) in items {
                let child = match existing.get(key) {
                    Some(item) if item.subject().type_tag() == nested.subject_type => item.clone(),
                    _ => processor
                        .create_subject(&nested.subject_type, subject.subject().context())?,
                };
                apply_into(&child, nested, processor, in_progress)?;
                result.insert(key.clone(), child);
            }
            write_property(subject, name, PropertyValue::Dictionary(result))
        }
    }
}
