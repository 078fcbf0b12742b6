//! Stable error taxonomy shared by every component.
//!
//! Mirrors the teacher's `CoreError` shape: a stable code, a human message
//! and an optional boxed cause, but the `kind` enum is specific to this
//! crate's domain (interception, lifecycle, update model) rather than a
//! generic transport/codec taxonomy.

use std::fmt;
use std::sync::Arc;

/// The six stable error kinds named in the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A path or name refers to a property not present on the subject.
    UnknownProperty,
    /// A write targets a property with no setter, or one flagged derived.
    ReadOnlyProperty,
    /// A value setter rejected a value.
    ValidationFailed,
    /// An inbound update would create a subject cycle that cannot be applied.
    CycleInUpdate,
    /// `apply_update` received a value incompatible with the declared type.
    TypeMismatch,
    /// A programming-error-grade invariant tripped (e.g. negative refcount).
    InternalInvariant,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::UnknownProperty => "unknown_property",
            ErrorKind::ReadOnlyProperty => "read_only_property",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::CycleInUpdate => "cycle_in_update",
            ErrorKind::TypeMismatch => "type_mismatch",
            ErrorKind::InternalInvariant => "internal_invariant",
        };
        f.write_str(s)
    }
}

/// The crate-wide error type. Carries a stable [`ErrorKind`], a
/// human-readable message for diagnostics, and an optional underlying
/// cause for chaining (e.g. a validation interceptor's own error).
#[derive(Debug, thiserror::Error, Clone)]
#[error("{kind}: {message}")]
pub struct CoreError {
    kind: ErrorKind,
    message: Arc<str>,
    #[source]
    cause: Option<Arc<CoreError>>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: CoreError) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn unknown_property(subject_type: &str, property: &str) -> Self {
        Self::new(
            ErrorKind::UnknownProperty,
            format!("subject of type `{subject_type}` has no property `{property}`"),
        )
    }

    pub fn read_only_property(property: &str) -> Self {
        Self::new(
            ErrorKind::ReadOnlyProperty,
            format!("property `{property}` has no setter"),
        )
    }

    pub fn validation_failed(property: &str, reason: impl Into<Arc<str>>) -> Self {
        Self::new(
            ErrorKind::ValidationFailed,
            format!("property `{property}` rejected value: {}", reason.into()),
        )
    }

    pub fn cycle_in_update(path: &str) -> Self {
        Self::new(
            ErrorKind::CycleInUpdate,
            format!("applying update at `{path}` would create a subject cycle"),
        )
    }

    pub fn type_mismatch(property: &str) -> Self {
        Self::new(
            ErrorKind::TypeMismatch,
            format!("property `{property}` received a value of the wrong type"),
        )
    }

    pub fn internal_invariant(message: impl Into<Arc<str>>) -> Self {
        Self::new(ErrorKind::InternalInvariant, message)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
