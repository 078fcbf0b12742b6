//! Component A — Subject & Property Model.
//!
//! A compile-time source generator is out of scope for this crate (see
//! `DESIGN.md`); instead every subject is declared through [`SubjectBuilder`]
//! and accessed through a uniform, table-driven dispatch by property name
//! (Design Notes 4.A, option b). This keeps per-access cost at "one map
//! lookup plus one fold over a small interceptor slice", exactly as spec.md
//! §9 asks for, without requiring macros or reflection.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::context::Context;
use crate::error::{CoreError, Result};
use crate::value::{PropertyReference, PropertyValue, SubjectId, SubjectRef, Timestamp};

/// A role-carrying annotation on a property, used by the derived engine,
/// registry and source adapters to discover extensibility hooks without
/// hard-coding the concrete property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    Derived,
    SourcePath(String),
    AttributeOf { root_property: String, name: String },
    Custom { key: String, value: String },
}

/// Identifies the root property an attribute property annotates, e.g.
/// `Name_MaxLength` annotates `Name` with attribute name `MaxLength`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeOf {
    pub root_property: String,
    pub attribute_name: String,
}

pub type Validator = Arc<dyn Fn(&SubjectRef, &PropertyValue) -> Result<()> + Send + Sync>;
pub type DerivedGetter = Arc<dyn Fn(&SubjectRef) -> PropertyValue + Send + Sync>;

/// Immutable per-(subject-type, property-name) metadata record (spec.md
/// §3). Because subjects here are built dynamically rather than generated,
/// "declared value type" is implicit in how the property was constructed
/// (`SubjectBuilder::property` vs `::derived_property`) rather than a
/// reflected `System.Type`.
#[derive(Clone)]
pub struct PropertyMetadata {
    pub name: String,
    pub is_derived: bool,
    pub is_subject_reference: bool,
    pub is_subject_collection: bool,
    pub is_subject_dictionary: bool,
    pub is_attribute: bool,
    pub attribute_of: Option<AttributeOf>,
    pub attributes: Vec<Attribute>,
    /// Present only for derived properties: recomputes the value, reading
    /// other properties transparently through the pipeline (which is how
    /// the derived engine discovers dependencies).
    pub(crate) derived_getter: Option<DerivedGetter>,
    /// Present when the property accepts writes. `None` means read-only
    /// (derived properties always have `None` here as well as
    /// `is_derived == true`).
    pub(crate) setter: Option<Validator>,
}

impl PropertyMetadata {
    pub fn is_writable(&self) -> bool {
        !self.is_derived && self.setter.is_some()
    }

    pub fn is_container(&self) -> bool {
        self.is_subject_collection || self.is_subject_dictionary
    }
}

impl std::fmt::Debug for PropertyMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyMetadata")
            .field("name", &self.name)
            .field("is_derived", &self.is_derived)
            .field("is_subject_reference", &self.is_subject_reference)
            .field("is_subject_collection", &self.is_subject_collection)
            .field("is_subject_dictionary", &self.is_subject_dictionary)
            .field("is_attribute", &self.is_attribute)
            .finish()
    }
}

/// Distinguishes property-scoped from subject-scoped data-bag entries
/// (spec.md §3 `Subject`: "key type must distinguish property-scoped from
/// subject-scoped entries").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataBagKey {
    pub property: Option<String>,
    pub key: &'static str,
}

impl DataBagKey {
    pub fn subject_scoped(key: &'static str) -> Self {
        Self { property: None, key }
    }
    pub fn property_scoped(property: impl Into<String>, key: &'static str) -> Self {
        Self {
            property: Some(property.into()),
            key,
        }
    }
}

pub const KEY_REFERENCE_COUNT: &str = "reference_count";
pub const KEY_TIMESTAMP: &str = "changed_timestamp";
pub const KEY_LAST_KNOWN_VALUE: &str = "last_known_value";
pub const KEY_REQUIRED_PROPERTIES: &str = "required_properties";
pub const KEY_USED_BY_PROPERTIES: &str = "used_by_properties";

#[derive(Clone)]
pub(crate) enum DataBagEntry {
    ReferenceCount(i64),
    Timestamp(Timestamp),
    LastKnownValue(PropertyValue),
    RequiredProperties(HashSet<PropertyReference>),
    UsedByProperties(HashSet<PropertyReference>),
}

/// The concurrent, untyped extension bag attached to every subject.
pub(crate) type DataBag = DashMap<DataBagKey, DataBagEntry>;

/// A composite entity with a stable identity, property metadata, and an
/// untyped concurrent data bag (spec.md §3 `Subject`).
pub struct Subject {
    id: SubjectId,
    type_tag: &'static str,
    context: Context,
    metadata: DashMap<String, PropertyMetadata>,
    /// Preserves declaration order for registry enumeration and complete
    /// update construction, since `DashMap` iteration order is arbitrary.
    property_order: parking_lot::Mutex<Vec<String>>,
    values: DashMap<String, PropertyValue>,
    data: DataBag,
}

impl Subject {
    pub fn id(&self) -> SubjectId {
        self.id
    }

    pub fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn metadata(&self, property: &str) -> Option<PropertyMetadata> {
        self.metadata.get(property).map(|m| m.clone())
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.metadata.contains_key(property)
    }

    /// Properties in declaration order, excluding attribute properties
    /// (those are nested under their root property in the update model).
    pub fn property_names(&self) -> Vec<String> {
        self.property_order.lock().clone()
    }

    /// Adds a property to an already-registered subject. Used by the
    /// registry for dynamic/late-bound fields and by attribute support
    /// (spec.md §4.E "users may add properties to a registered subject").
    pub fn add_property(&self, metadata: PropertyMetadata, initial: PropertyValue) {
        let name = metadata.name.clone();
        if !self.metadata.contains_key(&name) {
            self.property_order.lock().push(name.clone());
        }
        self.metadata.insert(name.clone(), metadata);
        self.values.insert(name, initial);
    }

    /// Raw fetch of the currently stored value, bypassing the read
    /// pipeline. Used as the terminal getter for non-derived properties,
    /// and as the "current-value" observed by write interceptors.
    pub(crate) fn raw_value(&self, property: &str) -> PropertyValue {
        self.values
            .get(property)
            .map(|v| v.clone())
            .unwrap_or_else(PropertyValue::null)
    }

    /// Stores `value` directly, bypassing the write pipeline and every
    /// interceptor it would normally run. Intended for seeding a subject's
    /// initial state and for tests; application code should go through
    /// [`crate::pipeline::write_property`] instead so lifecycle, derived
    /// recompute and change notification still fire.
    pub fn store_raw_value(&self, property: &str, value: PropertyValue) {
        self.values.insert(property.to_string(), value);
    }

    pub(crate) fn data(&self) -> &DataBag {
        &self.data
    }

    /// The number of live parent edges currently pointing at this subject,
    /// as tracked by [`crate::lifecycle::LifecycleTracker`].
    pub fn reference_count(&self) -> i64 {
        match self.data.get(&DataBagKey::subject_scoped(KEY_REFERENCE_COUNT)) {
            Some(e) => match &*e {
                DataBagEntry::ReferenceCount(n) => *n,
                _ => 0,
            },
            None => 0,
        }
    }

    pub(crate) fn set_reference_count(&self, n: i64) {
        self.data.insert(
            DataBagKey::subject_scoped(KEY_REFERENCE_COUNT),
            DataBagEntry::ReferenceCount(n),
        );
    }

    pub(crate) fn timestamp_of(&self, property: &str) -> Option<Timestamp> {
        self.data
            .get(&DataBagKey::property_scoped(property, KEY_TIMESTAMP))
            .and_then(|e| match &*e {
                DataBagEntry::Timestamp(t) => Some(*t),
                _ => None,
            })
    }

    pub(crate) fn set_timestamp(&self, property: &str, ts: Timestamp) {
        self.data.insert(
            DataBagKey::property_scoped(property, KEY_TIMESTAMP),
            DataBagEntry::Timestamp(ts),
        );
    }

    /// The full set of (subject, property) pairs read the last time
    /// `derived_property` was recomputed, on whichever subjects they
    /// actually live on.
    pub(crate) fn required_properties(&self, derived_property: &str) -> HashSet<PropertyReference> {
        self.data
            .get(&DataBagKey::property_scoped(
                derived_property,
                KEY_REQUIRED_PROPERTIES,
            ))
            .and_then(|e| match &*e {
                DataBagEntry::RequiredProperties(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub(crate) fn set_required_properties(
        &self,
        derived_property: &str,
        set: HashSet<PropertyReference>,
    ) {
        self.data.insert(
            DataBagKey::property_scoped(derived_property, KEY_REQUIRED_PROPERTIES),
            DataBagEntry::RequiredProperties(set),
        );
    }

    /// The derived properties (on this subject or any other) that read
    /// `input_property` on *this* subject during their last recompute.
    pub(crate) fn used_by_properties(&self, input_property: &str) -> HashSet<PropertyReference> {
        self.data
            .get(&DataBagKey::property_scoped(
                input_property,
                KEY_USED_BY_PROPERTIES,
            ))
            .and_then(|e| match &*e {
                DataBagEntry::UsedByProperties(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub(crate) fn set_used_by_properties(
        &self,
        input_property: &str,
        set: HashSet<PropertyReference>,
    ) {
        self.data.insert(
            DataBagKey::property_scoped(input_property, KEY_USED_BY_PROPERTIES),
            DataBagEntry::UsedByProperties(set),
        );
    }

    pub(crate) fn last_known_value(&self, derived_property: &str) -> Option<PropertyValue> {
        self.data
            .get(&DataBagKey::property_scoped(
                derived_property,
                KEY_LAST_KNOWN_VALUE,
            ))
            .and_then(|e| match &*e {
                DataBagEntry::LastKnownValue(v) => Some(v.clone()),
                _ => None,
            })
    }

    pub(crate) fn set_last_known_value(&self, derived_property: &str, value: PropertyValue) {
        self.data.insert(
            DataBagKey::property_scoped(derived_property, KEY_LAST_KNOWN_VALUE),
            DataBagEntry::LastKnownValue(value),
        );
    }
}

/// Builds a [`Subject`] with a declared set of properties, the way a
/// code-generated constructor would, but at runtime. Construction never
/// attaches the subject to any graph; see [`crate::lifecycle::LifecycleTracker`].
pub struct SubjectBuilder {
    type_tag: &'static str,
    context: Context,
    properties: Vec<(PropertyMetadata, PropertyValue)>,
}

impl SubjectBuilder {
    pub fn new(type_tag: &'static str, context: Context) -> Self {
        Self {
            type_tag,
            context,
            properties: Vec::new(),
        }
    }

    /// A plain mutable property with no custom validation.
    pub fn property(self, name: impl Into<String>, initial: PropertyValue) -> Self {
        self.validated_property(name, initial, Arc::new(|_, _| Ok(())))
    }

    /// A mutable property whose writes are validated before being
    /// committed (spec.md §7 `ValidationFailed`).
    pub fn validated_property(
        mut self,
        name: impl Into<String>,
        initial: PropertyValue,
        validator: Validator,
    ) -> Self {
        let name = name.into();
        let is_subject_reference = matches!(initial, PropertyValue::Item(_));
        let is_subject_collection = matches!(initial, PropertyValue::Sequence(_));
        let is_subject_dictionary = matches!(initial, PropertyValue::Dictionary(_));
        let meta = PropertyMetadata {
            name: name.clone(),
            is_derived: false,
            is_subject_reference,
            is_subject_collection,
            is_subject_dictionary,
            is_attribute: false,
            attribute_of: None,
            attributes: Vec::new(),
            derived_getter: None,
            setter: Some(validator),
        };
        self.properties.push((meta, initial));
        self
    }

    /// A derived (read-only, auto-discovered dependency) property. The
    /// initial value is computed eagerly so `last_known_value` is seeded.
    pub fn derived_property(
        mut self,
        name: impl Into<String>,
        getter: DerivedGetter,
    ) -> Self {
        let name = name.into();
        let meta = PropertyMetadata {
            name: name.clone(),
            is_derived: true,
            is_subject_reference: false,
            is_subject_collection: false,
            is_subject_dictionary: false,
            is_attribute: false,
            attribute_of: None,
            attributes: vec![Attribute::Derived],
            derived_getter: Some(getter),
            setter: None,
        };
        self.properties.push((meta, PropertyValue::null()));
        self
    }

    /// Declares `attribute_name` (e.g. `MaxLength`) as annotating
    /// `root_property` (e.g. `Name`), stored under the backing property
    /// name `{root_property}_{attribute_name}` (spec.md §3 "Attribute
    /// properties").
    pub fn attribute_property(
        mut self,
        root_property: impl Into<String>,
        attribute_name: impl Into<String>,
        initial: PropertyValue,
    ) -> Self {
        let root_property = root_property.into();
        let attribute_name = attribute_name.into();
        let backing_name = format!("{root_property}_{attribute_name}");
        let meta = PropertyMetadata {
            name: backing_name.clone(),
            is_derived: false,
            is_subject_reference: false,
            is_subject_collection: false,
            is_subject_dictionary: false,
            is_attribute: true,
            attribute_of: Some(AttributeOf {
                root_property,
                attribute_name,
            }),
            attributes: Vec::new(),
            derived_getter: None,
            setter: Some(Arc::new(|_, _| Ok(()))),
        };
        self.properties.push((meta, initial));
        self
    }

    pub fn build(self) -> SubjectRef {
        let subject = Arc::new(Subject {
            id: SubjectId::next(),
            type_tag: self.type_tag,
            context: self.context,
            metadata: DashMap::new(),
            property_order: parking_lot::Mutex::new(Vec::new()),
            values: DashMap::new(),
            data: DashMap::new(),
        });
        let handle = SubjectRef::new(subject.clone());
        for (meta, initial) in self.properties {
            subject.add_property(meta, initial);
        }
        handle
    }
}

/// The backing property name an attribute is stored under, e.g.
/// `attribute_backing_name("Name", "MaxLength") == "Name_MaxLength"`
/// (spec.md §3 "Attribute properties").
pub fn attribute_backing_name(root_property: &str, attribute_name: &str) -> String {
    format!("{root_property}_{attribute_name}")
}

pub(crate) fn unknown_property_error(subject: &SubjectRef, property: &str) -> CoreError {
    CoreError::unknown_property(subject.subject().type_tag(), property)
}
