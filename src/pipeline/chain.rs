//! The read/write interceptor traits and the write call context.

use crate::error::Result;
use crate::value::{PropertyValue, SubjectRef};

/// The remaining read chain, captured as a one-shot continuation so each
/// interceptor decides whether (and with what arguments) to keep going.
pub type ReadContinuation<'a> =
    Box<dyn FnOnce(&SubjectRef, &str) -> Result<PropertyValue> + 'a>;

/// A read-side interceptor (spec.md §4.C). Most read interceptors are
/// purely observational (the derived engine's dependency recorder); none
/// shipped by this crate rewrites the returned value, but the trait allows
/// it for custom interceptors.
pub trait ReadInterceptor: Send + Sync {
    fn read(
        &self,
        subject: &SubjectRef,
        property: &str,
        next: ReadContinuation<'_>,
    ) -> Result<PropertyValue>;
}

/// The remaining write chain, captured as a one-shot continuation.
pub type WriteContinuation<'a> = Box<dyn FnOnce(WriteCx) -> Result<()> + 'a>;

/// The mutable call context threaded through the write chain: which
/// subject and property are being written, the incoming value, and the
/// value that was stored before this write began (needed by the
/// equality-check interceptor and by lifecycle/derived/change-observable
/// interceptors that must diff old vs. new).
#[derive(Clone)]
pub struct WriteCx {
    subject: SubjectRef,
    property: String,
    value: PropertyValue,
    previous: PropertyValue,
}

impl WriteCx {
    pub fn new(subject: SubjectRef, property: String, value: PropertyValue) -> Self {
        let previous = subject.subject().raw_value(&property);
        Self {
            subject,
            property,
            value,
            previous,
        }
    }

    pub fn subject(&self) -> &SubjectRef {
        &self.subject
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    pub fn previous_value(&self) -> &PropertyValue {
        &self.previous
    }

    pub fn is_noop(&self) -> bool {
        self.value.is_equal_to(&self.previous)
    }
}

/// A write-side interceptor (spec.md §4.C). Wraps `next`: code before the
/// call runs in attachment order, code after runs in reverse, which is how
/// the standard equality/lifecycle/derived/observable chain gets its
/// required ordering without a separate "phase" mechanism.
pub trait WriteInterceptor: Send + Sync {
    fn write(&self, cx: WriteCx, next: WriteContinuation<'_>) -> Result<()>;
}
