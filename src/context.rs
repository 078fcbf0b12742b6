//! Component B — Context.
//!
//! A `Context` is the per-subject (or shared-root) service locator and
//! interceptor attachment point described in spec.md §4.B. Interceptors are
//! local and stateless: every context that wants the standard read/write
//! chain attaches the same shared interceptor instances at construction
//! time (see `Engine::new_subject_context`), rather than inheriting them
//! through the fallback chain. Services are the opposite: stateful engine
//! components (`Registry`, `LifecycleTracker`, `DerivedEngine`,
//! `ChangeObservable`) are registered once on a shared root context and
//! discovered by every descendant context through fallback lookup
//! (`ContextInheritance`, spec.md glossary).

use std::any::{Any, TypeId};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::pipeline::{ReadInterceptor, WriteInterceptor};

struct ContextInner {
    services: RwLock<Vec<(TypeId, Arc<dyn Any + Send + Sync>)>>,
    read_interceptors: RwLock<Vec<Arc<dyn ReadInterceptor>>>,
    write_interceptors: RwLock<Vec<Arc<dyn WriteInterceptor>>>,
    fallbacks: RwLock<Vec<Context>>,
}

/// A cheaply-cloneable handle to a context. Cloning shares the same
/// underlying service table and interceptor lists.
#[derive(Clone)]
pub struct Context(Arc<ContextInner>);

impl Context {
    pub fn new() -> Self {
        Self(Arc::new(ContextInner {
            services: RwLock::new(Vec::new()),
            read_interceptors: RwLock::new(Vec::new()),
            write_interceptors: RwLock::new(Vec::new()),
            fallbacks: RwLock::new(Vec::new()),
        }))
    }

    /// A context that falls back to `parent` for service lookup but has
    /// its own interceptor slate.
    pub fn with_fallback(parent: Context) -> Self {
        let ctx = Self::new();
        ctx.add_fallback_context(parent);
        ctx
    }

    pub fn add_fallback_context(&self, fallback: Context) {
        self.0.fallbacks.write().push(fallback);
    }

    pub fn remove_fallback_context(&self, fallback: &Context) {
        self.0
            .fallbacks
            .write()
            .retain(|c| !Arc::ptr_eq(&c.0, &fallback.0));
    }

    /// Registers a service, replacing any existing instance of the same
    /// type on this context (not on fallbacks).
    pub fn add_service<T: Any + Send + Sync>(&self, service: Arc<T>) {
        let type_id = TypeId::of::<T>();
        let mut services = self.0.services.write();
        services.retain(|(id, _)| *id != type_id);
        services.push((type_id, service));
    }

    /// Registers a service only if one of the same type is not already
    /// present on this exact context (fallbacks are not consulted).
    pub fn try_add_service<T: Any + Send + Sync>(&self, service: Arc<T>) -> bool {
        let type_id = TypeId::of::<T>();
        let mut services = self.0.services.write();
        if services.iter().any(|(id, _)| *id == type_id) {
            return false;
        }
        services.push((type_id, service));
        true
    }

    /// Looks up a service of type `T` on this context, then depth-first
    /// through the fallback chain.
    pub fn get_service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let type_id = TypeId::of::<T>();
        if let Some(found) = self
            .0
            .services
            .read()
            .iter()
            .find(|(id, _)| *id == type_id)
            .map(|(_, svc)| svc.clone())
        {
            return found.downcast::<T>().ok();
        }
        for fallback in self.0.fallbacks.read().iter() {
            if let Some(found) = fallback.get_service::<T>() {
                return Some(found);
            }
        }
        None
    }

    /// Collects every service of type `T` reachable from this context,
    /// local services first, then fallbacks in attachment order.
    pub fn get_services<T: Any + Send + Sync>(&self) -> Vec<Arc<T>> {
        let mut out = Vec::new();
        for (id, svc) in self.0.services.read().iter() {
            if *id == TypeId::of::<T>() {
                if let Ok(typed) = svc.clone().downcast::<T>() {
                    out.push(typed);
                }
            }
        }
        for fallback in self.0.fallbacks.read().iter() {
            out.extend(fallback.get_services::<T>());
        }
        out
    }

    pub fn add_read_interceptor(&self, interceptor: Arc<dyn ReadInterceptor>) {
        self.0.read_interceptors.write().push(interceptor);
    }

    pub fn add_write_interceptor(&self, interceptor: Arc<dyn WriteInterceptor>) {
        self.0.write_interceptors.write().push(interceptor);
    }

    pub(crate) fn read_interceptors(&self) -> Vec<Arc<dyn ReadInterceptor>> {
        self.0.read_interceptors.read().clone()
    }

    pub(crate) fn write_interceptors(&self) -> Vec<Arc<dyn WriteInterceptor>> {
        self.0.write_interceptors.read().clone()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("services", &self.0.services.read().len())
            .field("read_interceptors", &self.0.read_interceptors.read().len())
            .field("write_interceptors", &self.0.write_interceptors.read().len())
            .field("fallbacks", &self.0.fallbacks.read().len())
            .finish()
    }
}
