//! Host service registration and per-fire resolution scopes.
//!
//! A [`ServiceCollection`] records how to obtain each type (a shared
//! singleton, one instance per scope, or a fresh instance per request) and
//! is frozen into a [`ServiceProvider`]. Every fire resolves its job inside a
//! new [`ServiceScope`]; scoped and transient instances created there are
//! owned by the scope and released with it.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::adapter::NativeJob;

/// A type-erased service instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

type InstanceFactory = Arc<dyn Fn(&ServiceScope) -> Result<Instance, ResolveError> + Send + Sync>;

/// Recovers a native job view of an erased instance.
type NativeCaster = fn(Instance) -> Option<Arc<dyn NativeJob>>;

/// Errors that can occur while resolving services or job instances.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A job type that is resolved through the container was never registered.
    #[error("job type {0} is not registered; register every Job implementation with the service collection")]
    UnregisteredJob(&'static str),

    /// The requested service has no registration.
    #[error("service not registered: {0}")]
    NotRegistered(&'static str),

    /// The registration exists but cannot be used as a native job.
    #[error("service {0} is not registered as a native job")]
    NotNativeJob(&'static str),

    /// Constructing an instance failed.
    #[error("failed to activate {type_name}: {message}")]
    Activation {
        type_name: &'static str,
        message: String,
    },

    /// Scope lock was poisoned.
    #[error("service scope lock poisoned")]
    LockPoisoned,
}

#[derive(Clone)]
enum Lifetime {
    Singleton(Instance),
    Scoped(InstanceFactory),
    Transient(InstanceFactory),
}

#[derive(Clone)]
struct Registration {
    type_name: &'static str,
    lifetime: Lifetime,
    native: Option<NativeCaster>,
}

/// Builder of service registrations.
#[derive(Default)]
pub struct ServiceCollection {
    registrations: HashMap<TypeId, Registration>,
}

impl ServiceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one shared instance.
    pub fn add_singleton<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.insert::<T>(Lifetime::Singleton(Arc::new(value)), None);
        self
    }

    /// Register a factory invoked at most once per scope.
    pub fn add_scoped<T, F>(mut self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceScope) -> Result<T, ResolveError> + Send + Sync + 'static,
    {
        self.insert::<T>(Lifetime::Scoped(erase(factory)), None);
        self
    }

    /// Register a factory invoked on every resolution.
    pub fn add_transient<T, F>(mut self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceScope) -> Result<T, ResolveError> + Send + Sync + 'static,
    {
        self.insert::<T>(Lifetime::Transient(erase(factory)), None);
        self
    }

    /// Register a native job as a shared instance.
    pub fn add_native_singleton<N: NativeJob>(mut self, value: N) -> Self {
        self.insert::<N>(Lifetime::Singleton(Arc::new(value)), Some(cast_native::<N>));
        self
    }

    /// Register a native job built fresh on every resolution.
    pub fn add_native_transient<N, F>(mut self, factory: F) -> Self
    where
        N: NativeJob,
        F: Fn(&ServiceScope) -> Result<N, ResolveError> + Send + Sync + 'static,
    {
        self.insert::<N>(Lifetime::Transient(erase(factory)), Some(cast_native::<N>));
        self
    }

    /// Freeze the registrations.
    pub fn build(self) -> ServiceProvider {
        ServiceProvider {
            registrations: Arc::new(self.registrations),
        }
    }

    fn insert<T: 'static>(&mut self, lifetime: Lifetime, native: Option<NativeCaster>) {
        // Later registrations replace earlier ones for the same type.
        self.registrations.insert(
            TypeId::of::<T>(),
            Registration {
                type_name: type_name::<T>(),
                lifetime,
                native,
            },
        );
    }
}

fn erase<T, F>(factory: F) -> InstanceFactory
where
    T: Send + Sync + 'static,
    F: Fn(&ServiceScope) -> Result<T, ResolveError> + Send + Sync + 'static,
{
    Arc::new(move |scope| factory(scope).map(|value| Arc::new(value) as Instance))
}

fn cast_native<N: NativeJob>(instance: Instance) -> Option<Arc<dyn NativeJob>> {
    instance
        .downcast::<N>()
        .ok()
        .map(|job| job as Arc<dyn NativeJob>)
}

/// Frozen, cheaply cloneable set of registrations.
#[derive(Clone, Default)]
pub struct ServiceProvider {
    registrations: Arc<HashMap<TypeId, Registration>>,
}

impl ServiceProvider {
    /// Open a new resolution scope.
    pub fn create_scope(&self) -> ServiceScope {
        ServiceScope {
            registrations: Arc::clone(&self.registrations),
            scoped: Mutex::new(HashMap::new()),
            owned: Mutex::new(Vec::new()),
        }
    }

    /// Whether a type has its own registration.
    pub fn is_service(&self, type_id: TypeId) -> bool {
        self.registrations.contains_key(&type_id)
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.is_service(TypeId::of::<T>())
    }
}

/// Resolution scope for one fire.
///
/// Dropping the scope releases every scoped and transient instance it
/// created. Singletons stay with the provider.
pub struct ServiceScope {
    registrations: Arc<HashMap<TypeId, Registration>>,
    scoped: Mutex<HashMap<TypeId, Instance>>,
    owned: Mutex<Vec<Instance>>,
}

impl ServiceScope {
    /// Resolve a registered service.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ResolveError> {
        let type_id = TypeId::of::<T>();
        let registration = self
            .registrations
            .get(&type_id)
            .ok_or(ResolveError::NotRegistered(type_name::<T>()))?;

        self.resolve(type_id, registration)?
            .downcast::<T>()
            .map_err(|_| ResolveError::Activation {
                type_name: type_name::<T>(),
                message: "registered instance has a different type".to_string(),
            })
    }

    /// Resolve a registered native job by type id.
    pub fn get_native(&self, type_id: TypeId) -> Result<Arc<dyn NativeJob>, ResolveError> {
        let registration = self
            .registrations
            .get(&type_id)
            .ok_or(ResolveError::NotRegistered("<native job>"))?;
        let cast = registration
            .native
            .ok_or(ResolveError::NotNativeJob(registration.type_name))?;

        cast(self.resolve(type_id, registration)?)
            .ok_or(ResolveError::NotNativeJob(registration.type_name))
    }

    /// Number of instances this scope will release.
    pub fn owned_count(&self) -> usize {
        let owned = self.owned.lock().map(|o| o.len()).unwrap_or(0);
        let scoped = self.scoped.lock().map(|s| s.len()).unwrap_or(0);
        owned + scoped
    }

    /// Release every instance owned by the scope.
    pub fn dispose(self) {
        tracing::trace!(instances = self.owned_count(), "Disposing service scope");
    }

    fn resolve(&self, type_id: TypeId, registration: &Registration) -> Result<Instance, ResolveError> {
        match &registration.lifetime {
            Lifetime::Singleton(instance) => Ok(Arc::clone(instance)),
            Lifetime::Transient(factory) => {
                // Factories may resolve their own dependencies, so no lock is held here.
                let instance = factory(self)?;
                self.owned
                    .lock()
                    .map_err(|_| ResolveError::LockPoisoned)?
                    .push(Arc::clone(&instance));
                Ok(instance)
            }
            Lifetime::Scoped(factory) => {
                if let Some(existing) = self
                    .scoped
                    .lock()
                    .map_err(|_| ResolveError::LockPoisoned)?
                    .get(&type_id)
                {
                    return Ok(Arc::clone(existing));
                }
                let instance = factory(self)?;
                let mut scoped = self.scoped.lock().map_err(|_| ResolveError::LockPoisoned)?;
                Ok(Arc::clone(scoped.entry(type_id).or_insert(instance)))
            }
        }
    }
}
