//! The dynamic value model flowing through reads, writes and the update tree.
//!
//! Subjects are declared dynamically (no compile-time code generator is in
//! scope for this crate — see `DESIGN.md`), so every tracked property holds
//! a [`PropertyValue`]: either a scalar, a single subject reference, an
//! ordered sequence of subject references, or a keyed dictionary of subject
//! references. This matches the `is-subject-reference` /
//! `is-subject-collection` / `is-subject-dictionary` flags on
//! `PropertyMetadata` in spec.md §3.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::subject::Subject;

/// Process-wide monotonic counter used to mint [`SubjectId`]s. Identity
/// equality for subjects is reference equality in spec.md §3; the id exists
/// so identity can be compared, hashed and logged without holding a
/// pointer.
static NEXT_SUBJECT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectId(u64);

impl SubjectId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SUBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A scalar leaf value. Does not include subject references, which are
/// carried separately by [`PropertyValue`] so that the lifecycle tracker
/// never needs to inspect scalar payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
}

impl ScalarValue {
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            ScalarValue::Decimal(d) => Some(*d),
            ScalarValue::Int(i) => Some(Decimal::from(*i)),
            ScalarValue::Float(f) => Decimal::try_from(*f).ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ScalarValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<Decimal> for ScalarValue {
    fn from(v: Decimal) -> Self {
        ScalarValue::Decimal(v)
    }
}
impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Text(v.to_string())
    }
}
impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        ScalarValue::Text(v)
    }
}
impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int(v)
    }
}
impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Bool(v)
    }
}

/// A reference-counted handle to a live [`Subject`]. Equality and hashing
/// are by identity (pointer), never by content, matching spec.md's
/// "reference equality" identity rule.
#[derive(Clone)]
pub struct SubjectRef(pub(crate) Arc<Subject>);

impl SubjectRef {
    pub fn new(subject: Arc<Subject>) -> Self {
        Self(subject)
    }

    pub fn id(&self) -> SubjectId {
        self.0.id()
    }

    pub fn subject(&self) -> &Arc<Subject> {
        &self.0
    }
}

impl PartialEq for SubjectRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for SubjectRef {}

impl Hash for SubjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id().hash(state);
    }
}

impl std::fmt::Debug for SubjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SubjectRef({})", self.0.id())
    }
}

/// A value flowing through the interception pipeline and the update model.
#[derive(Debug, Clone)]
pub enum PropertyValue {
    Scalar(ScalarValue),
    /// Single subject-reference property. `None` means "cleared".
    Item(Option<SubjectRef>),
    /// Ordered sequence of subject references.
    Sequence(Vec<SubjectRef>),
    /// Keyed dictionary of subject references.
    Dictionary(BTreeMap<String, SubjectRef>),
}

impl PropertyValue {
    pub fn null() -> Self {
        PropertyValue::Scalar(ScalarValue::Null)
    }

    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            PropertyValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_item(&self) -> Option<&Option<SubjectRef>> {
        match self {
            PropertyValue::Item(i) => Some(i),
            _ => None,
        }
    }

    /// Enumerate every subject reachable from this value as
    /// `(subject, index)` tuples, per the enumeration rules in spec.md
    /// §4.D: single reference has `index = None`, sequence elements are
    /// indexed `0, 1, …`, dictionary entries are keyed by their string key.
    pub fn enumerate_children(&self) -> Vec<(SubjectRef, Option<ChildIndex>)> {
        match self {
            PropertyValue::Scalar(_) => Vec::new(),
            PropertyValue::Item(None) => Vec::new(),
            PropertyValue::Item(Some(s)) => vec![(s.clone(), None)],
            PropertyValue::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, s)| (s.clone(), Some(ChildIndex::Sequence(i))))
                .collect(),
            PropertyValue::Dictionary(map) => map
                .iter()
                .map(|(k, s)| (s.clone(), Some(ChildIndex::Key(k.clone()))))
                .collect(),
        }
    }

    /// Structural equality used only by the equality-check interceptor to
    /// decide whether a write is a true no-op. Subject-bearing variants
    /// compare by identity of every element, never by deep content.
    pub fn is_equal_to(&self, other: &PropertyValue) -> bool {
        match (self, other) {
            (PropertyValue::Scalar(a), PropertyValue::Scalar(b)) => a == b,
            (PropertyValue::Item(a), PropertyValue::Item(b)) => a == b,
            (PropertyValue::Sequence(a), PropertyValue::Sequence(b)) => a == b,
            (PropertyValue::Dictionary(a), PropertyValue::Dictionary(b)) => a == b,
            _ => false,
        }
    }
}

/// Index of a child within a container-valued property: `None` for a
/// single reference, `Sequence(i)` for an ordered collection, `Key(k)` for
/// a dictionary. Mirrors `SubjectPropertyChild` in spec.md §3.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChildIndex {
    Sequence(usize),
    Key(String),
}

impl std::fmt::Display for ChildIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildIndex::Sequence(i) => write!(f, "{i}"),
            ChildIndex::Key(k) => write!(f, "{k}"),
        }
    }
}

/// A `(subject, property-name)` pair — the fundamental addressing unit
/// inside the core (spec.md §3 `PropertyReference`). Equality is
/// structural over subject identity and property name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyReference {
    pub subject: SubjectRef,
    pub property: String,
}

impl PropertyReference {
    pub fn new(subject: SubjectRef, property: impl Into<String>) -> Self {
        Self {
            subject,
            property: property.into(),
        }
    }
}

/// A write-timestamp recorded on a property's data-bag entry.
pub type Timestamp = DateTime<Utc>;
