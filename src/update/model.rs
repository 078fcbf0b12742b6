//! The wire-facing update tree: a structural snapshot or delta of a
//! subject, serializable to JSON (spec.md §6).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::ScalarValue;

/// A full or partial description of one subject's properties. Only
/// properties present in `properties` are touched by `apply_update`; a
/// property absent from the map is left exactly as-is (spec.md §4.H's
/// "partial update" semantics).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubjectUpdate {
    pub subject_type: String,
    pub properties: BTreeMap<String, SubjectPropertyUpdate>,
}

impl SubjectUpdate {
    pub fn new(subject_type: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            properties: BTreeMap::new(),
        }
    }
}

/// A single property's contribution to a [`SubjectUpdate`]. The shape
/// mirrors `PropertyValue` one-to-one so building and applying never needs
/// to guess which variant a property is. Every kind may additionally carry
/// `attributes`: the update for each attribute property that annotates
/// this one, nested by attribute name rather than listed as a sibling
/// property (spec.md §3 "Attribute properties", §6 wire format).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubjectPropertyUpdate {
    Scalar {
        value: ScalarValue,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: BTreeMap<String, SubjectPropertyUpdate>,
    },
    Item {
        value: Option<Box<SubjectUpdate>>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: BTreeMap<String, SubjectPropertyUpdate>,
    },
    Sequence {
        items: Vec<SubjectUpdate>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: BTreeMap<String, SubjectPropertyUpdate>,
    },
    Dictionary {
        items: BTreeMap<String, SubjectUpdate>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: BTreeMap<String, SubjectPropertyUpdate>,
    },
}

impl SubjectPropertyUpdate {
    pub fn attributes(&self) -> &BTreeMap<String, SubjectPropertyUpdate> {
        match self {
            SubjectPropertyUpdate::Scalar { attributes, .. }
            | SubjectPropertyUpdate::Item { attributes, .. }
            | SubjectPropertyUpdate::Sequence { attributes, .. }
            | SubjectPropertyUpdate::Dictionary { attributes, .. } => attributes,
        }
    }

    pub fn attributes_mut(&mut self) -> &mut BTreeMap<String, SubjectPropertyUpdate> {
        match self {
            SubjectPropertyUpdate::Scalar { attributes, .. }
            | SubjectPropertyUpdate::Item { attributes, .. }
            | SubjectPropertyUpdate::Sequence { attributes, .. }
            | SubjectPropertyUpdate::Dictionary { attributes, .. } => attributes,
        }
    }
}
