//! Subject construction hook used while applying an inbound update.
//!
//! A compile-time code generator would let `apply_update` instantiate a
//! concrete type straight from its name; without one, the caller supplies
//! an [`UpdateProcessor`] that knows how to build a blank subject of a
//! given `subject_type` so `apply_update` can fill it in recursively.

use crate::context::Context;
use crate::error::{CoreError, Result};
use crate::value::SubjectRef;

pub trait UpdateProcessor: Send + Sync {
    fn create_subject(&self, subject_type: &str, context: &Context) -> Result<SubjectRef>;
}

/// An [`UpdateProcessor`] backed by a small in-memory registry of named
/// factories, the common case for applications with a fixed, known set of
/// subject types.
pub struct FactoryUpdateProcessor {
    factories: std::collections::HashMap<String, Box<dyn Fn(Context) -> SubjectRef + Send + Sync>>,
}

impl FactoryUpdateProcessor {
    pub fn new() -> Self {
        Self {
            factories: std::collections::HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        subject_type: impl Into<String>,
        factory: impl Fn(Context) -> SubjectRef + Send + Sync + 'static,
    ) {
        self.factories.insert(subject_type.into(), Box::new(factory));
    }
}

impl Default for FactoryUpdateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateProcessor for FactoryUpdateProcessor {
    fn create_subject(&self, subject_type: &str, context: &Context) -> Result<SubjectRef> {
        match self.factories.get(subject_type) {
            Some(factory) => Ok(factory(context.clone())),
            None => Err(CoreError::internal_invariant(format!(
                "no factory registered for subject type `{subject_type}`"
            ))),
        }
    }
}
