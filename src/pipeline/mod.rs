//! Component C — Interception Pipeline.
//!
//! Interceptors are composed the way the teacher composes its transport
//! middleware: each interceptor wraps a `next` continuation and decides
//! whether, and with what value, to call it. For writes this gives the
//! exact nesting order spec.md §5 requires — before-phase runs outer to
//! inner in attachment order, after-phase unwinds inner to outer — because
//! that is simply how nested closures unwind. The four standard write
//! interceptors (equality-check, lifecycle, derived-change, change
//! observable) are attached in that order around a terminal commit step.

mod chain;
mod standard;

pub use chain::{ReadContinuation, ReadInterceptor, WriteContinuation, WriteCx, WriteInterceptor};
pub use standard::{
    ChangeObservableInterceptor, DerivedChangeInterceptor, EqualityCheckInterceptor,
    LifecycleInterceptor,
};

use std::sync::Arc;

use crate::error::Result;
use crate::value::{PropertyValue, SubjectRef};

/// Runs the full read chain (attached interceptors, then the subject's raw
/// stored value) for `property` on `subject`.
pub fn read_property(subject: &SubjectRef, property: &str) -> Result<PropertyValue> {
    let interceptors = subject.subject().context().read_interceptors();
    run_read_chain(&interceptors, subject, property, 0)
}

fn run_read_chain(
    chain: &[Arc<dyn ReadInterceptor>],
    subject: &SubjectRef,
    property: &str,
    index: usize,
) -> Result<PropertyValue> {
    match chain.get(index) {
        Some(interceptor) => {
            let next: ReadContinuation =
                Box::new(move |s, p| run_read_chain(chain, s, p, index + 1));
            interceptor.read(subject, property, next)
        }
        None => crate::derived::read_terminal(subject, property),
    }
}

/// Runs the full write chain (attached interceptors, then the terminal
/// commit) for `property` on `subject`, per spec.md §4.C / §5.
pub fn write_property(subject: &SubjectRef, property: &str, value: PropertyValue) -> Result<()> {
    let metadata = subject
        .subject()
        .metadata(property)
        .ok_or_else(|| crate::subject::unknown_property_error(subject, property))?;
    if !metadata.is_writable() {
        return Err(crate::error::CoreError::read_only_property(property));
    }
    let interceptors = subject.subject().context().write_interceptors();
    let cx = WriteCx::new(subject.clone(), property.to_string(), value);
    run_write_chain(&interceptors, cx, 0)
}

fn run_write_chain(chain: &[Arc<dyn WriteInterceptor>], cx: WriteCx, index: usize) -> Result<()> {
    match chain.get(index) {
        Some(interceptor) => {
            let next: WriteContinuation = Box::new(move |cx| run_write_chain(chain, cx, index + 1));
            interceptor.write(cx, next)
        }
        None => commit_terminal(cx),
    }
}

fn commit_terminal(cx: WriteCx) -> Result<()> {
    cx.subject()
        .subject()
        .store_raw_value(cx.property(), cx.value().clone());
    Ok(())
}

/// Attaches the four standard write interceptors and the read recorder to
/// `context` in the order spec.md §5 requires. Called once per context by
/// [`crate::engine::Engine`] when wiring a subject into the graph.
pub fn attach_standard_interceptors(
    context: &crate::context::Context,
    lifecycle: Arc<crate::lifecycle::LifecycleTracker>,
    derived: Arc<crate::derived::DerivedEngine>,
    observable: Arc<crate::observable::ChangeObservable>,
) {
    context.add_read_interceptor(Arc::new(crate::derived::ReadRecorder::new(derived.clone())));
    context.add_write_interceptor(Arc::new(EqualityCheckInterceptor));
    context.add_write_interceptor(Arc::new(LifecycleInterceptor::new(lifecycle)));
    context.add_write_interceptor(Arc::new(DerivedChangeInterceptor::new(derived)));
    context.add_write_interceptor(Arc::new(ChangeObservableInterceptor::new(observable)));
}
