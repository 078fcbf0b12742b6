//! A reactive object-graph observation engine.
//!
//! Plain properties are read and written through an interception pipeline
//! ([`pipeline`]); subject lifecycle is tracked by reference count
//! ([`lifecycle`]); derived properties recompute automatically when the
//! properties they read change ([`derived`]); every attached subject gets
//! a stable hierarchical path ([`registry`], [`path`]); and the whole
//! graph can be snapshotted, diffed and re-applied ([`update`]) or kept in
//! sync with an external system ([`source`]).
//!
//! [`Engine`] is the composition root: it owns the shared services and
//! hands out per-subject [`Context`]s with the standard interceptor chain
//! already attached.

pub mod context;
pub mod derived;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod observable;
pub mod path;
pub mod pipeline;
pub mod registry;
pub mod source;
pub mod subject;
pub mod update;
pub mod value;

pub use context::Context;
pub use engine::Engine;
pub use error::{CoreError, ErrorKind, Result};
pub use subject::{PropertyMetadata, Subject, SubjectBuilder};
pub use value::{ChildIndex, PropertyReference, PropertyValue, ScalarValue, SubjectId, SubjectRef, Timestamp};
