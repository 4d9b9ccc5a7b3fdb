//! Typed service locator.
//!
//! Register during initialization, read-only afterwards; no locking on the
//! lookup path. Services are registered under their concrete type, so
//! trait objects go in as `Arc<dyn Trait>`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct ServiceLocator {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceLocator {
    pub fn new() -> Self {
        ServiceLocator::default()
    }

    /// Register a service instance, replacing any previous one of the same
    /// type.
    pub fn register<S: Clone + Send + Sync + 'static>(&mut self, service: S) {
        self.services.insert(TypeId::of::<S>(), Arc::new(service));
    }

    /// Fetch a clone of a registered service.
    pub fn get<S: Clone + Send + Sync + 'static>(&self) -> Option<S> {
        self.services
            .get(&TypeId::of::<S>())
            .and_then(|any| any.downcast_ref::<S>())
            .cloned()
    }

    pub fn has<S: Clone + Send + Sync + 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<S>())
    }
}
