use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info};

use super::{panic_message, Processor};
use crate::{types::Queueable, QueueError, QueueResult};

/// Builds a fresh processor for one bean
pub type ProcessorFactory<T> = Arc<dyn Fn() -> Box<dyn Processor<T>> + Send + Sync>;

/// Maps a bean type identifier to the factory of its processor
///
/// One registry is created per queue kind by the queue service and shared
/// with every consumer of that kind. Built-in factories survive
/// [`initialize`](Self::initialize); everything else is dropped by it.
pub struct ProcessorRegistry<T: Queueable> {
    factories: RwLock<HashMap<String, ProcessorFactory<T>>>,
    defaults: RwLock<HashMap<String, ProcessorFactory<T>>>,
}

impl<T: Queueable> ProcessorRegistry<T> {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            defaults: RwLock::new(HashMap::new()),
        }
    }

    /// Register a factory, replacing any earlier one for the same type
    pub fn register<F>(&self, bean_type: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Processor<T>> + Send + Sync + 'static,
    {
        let bean_type = bean_type.into();
        if self
            .factories
            .write()
            .insert(bean_type.clone(), Arc::new(factory))
            .is_some()
        {
            debug!("Replaced {} processor for bean type '{}'", T::KIND, bean_type);
        } else {
            info!("Registered {} processor for bean type '{}'", T::KIND, bean_type);
        }
    }

    /// Register a factory that is restored by every `initialize()`
    pub fn register_builtin<F>(&self, bean_type: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Processor<T>> + Send + Sync + 'static,
    {
        let bean_type = bean_type.into();
        let factory: ProcessorFactory<T> = Arc::new(factory);
        self.defaults
            .write()
            .insert(bean_type.clone(), factory.clone());
        self.factories.write().insert(bean_type, factory);
    }

    /// Create a processor for `bean_type`
    pub fn create(&self, bean_type: &str) -> QueueResult<Box<dyn Processor<T>>> {
        let factory = self
            .factories
            .read()
            .get(bean_type)
            .cloned()
            .ok_or_else(|| QueueError::NoProcessor(bean_type.to_string()))?;

        catch_unwind(AssertUnwindSafe(|| factory())).map_err(|payload| {
            let reason = panic_message(payload.as_ref());
            error!(bean_type, reason = %reason, "Processor factory panicked");
            QueueError::ProcessorInstantiation {
                bean_type: bean_type.to_string(),
                reason,
            }
        })
    }

    /// Reset to the built-in factories only
    pub fn initialize(&self) {
        let defaults = self.defaults.read().clone();
        *self.factories.write() = defaults;
        debug!("Reset {} processor registry to built-in defaults", T::KIND);
    }

    pub fn is_registered(&self, bean_type: &str) -> bool {
        self.factories.read().contains_key(bean_type)
    }

    /// Registered bean types, sorted
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl<T: Queueable> Default for ProcessorRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
