//! Per-fire job resolution.
//!
//! A job definition records a [`JobType`] descriptor instead of a concrete
//! type. On every fire the [`JobFactory`] opens a fresh [`ServiceScope`] and
//! resolves the descriptor in this order:
//!
//! 1. a native job registered with the container is taken from the scope;
//! 2. an adapted [`Job`] whose type is not registered is a configuration
//!    error ([`ResolveError::UnregisteredJob`]);
//! 3. anything else is built by the type's activator, cached per type.
//!
//! Instances built in step 3 belong to the returned [`ScopedJob`] and are
//! released before the scope; container instances are released by the scope.

use dashmap::DashMap;
use std::any::{type_name, TypeId};
use std::fmt;
use std::sync::Arc;

use super::adapter::{Activate, JobAdapter, NativeJob};
use super::services::{ResolveError, ServiceProvider, ServiceScope};
use crate::core::job::Job;

/// Builds a native job inside a scope.
pub type ObjectFactory =
    Arc<dyn Fn(&ServiceScope) -> Result<Arc<dyn NativeJob>, ResolveError> + Send + Sync>;

/// How a job type is bound to the native contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// A [`Job`] run through [`JobAdapter`].
    Adapted {
        job_type: TypeId,
        job_name: &'static str,
    },
    /// A type implementing [`NativeJob`] directly.
    Native,
}

/// Type descriptor stored with a job definition.
#[derive(Clone, Copy)]
pub struct JobType {
    type_id: TypeId,
    type_name: &'static str,
    kind: JobKind,
    activator: fn() -> ObjectFactory,
}

impl JobType {
    /// Descriptor for a [`Job`] implementation.
    pub fn of<J: Job>() -> Self {
        Self {
            type_id: TypeId::of::<JobAdapter<J>>(),
            type_name: type_name::<J>(),
            kind: JobKind::Adapted {
                job_type: TypeId::of::<J>(),
                job_name: type_name::<J>(),
            },
            activator: activator_for::<JobAdapter<J>>,
        }
    }

    /// Descriptor for a type implementing the native contract directly.
    pub fn native<N: Activate>() -> Self {
        Self {
            type_id: TypeId::of::<N>(),
            type_name: type_name::<N>(),
            kind: JobKind::Native,
            activator: activator_for::<N>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }
}

impl fmt::Debug for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobType")
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl PartialEq for JobType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for JobType {}

fn activator_for<N: Activate>() -> ObjectFactory {
    Arc::new(|scope| Ok(Arc::new(N::activate(scope)?) as Arc<dyn NativeJob>))
}

/// A resolved job together with the scope it was resolved in.
///
/// Field order matters: the job is dropped before the scope.
pub struct ScopedJob {
    job: Arc<dyn NativeJob>,
    scope: ServiceScope,
    owned: bool,
}

impl ScopedJob {
    pub fn job(&self) -> &dyn NativeJob {
        self.job.as_ref()
    }

    /// Whether the factory built the instance itself rather than taking it
    /// from the container.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Release the job, then the scope.
    pub fn release(self) {
        let Self { job, scope, owned } = self;
        // Only frees the instance when the factory built it; container
        // instances are still held by the scope or the provider.
        drop(job);
        tracing::trace!(owned, "Released resolved job");
        scope.dispose();
    }
}

/// Resolves job instances for the engine.
pub struct JobFactory {
    services: ServiceProvider,
    activators: DashMap<TypeId, ObjectFactory>,
}

impl JobFactory {
    pub fn new(services: ServiceProvider) -> Self {
        Self {
            services,
            activators: DashMap::new(),
        }
    }

    /// Resolve a job instance for one fire.
    pub fn new_job(&self, job_type: &JobType) -> Result<ScopedJob, ResolveError> {
        let scope = self.services.create_scope();

        match job_type.kind() {
            JobKind::Native if self.services.is_service(job_type.type_id()) => {
                let job = scope.get_native(job_type.type_id())?;
                return Ok(ScopedJob {
                    job,
                    scope,
                    owned: false,
                });
            }
            JobKind::Adapted { job_type, job_name } if !self.services.is_service(job_type) => {
                return Err(ResolveError::UnregisteredJob(job_name));
            }
            _ => {}
        }

        let activator = self.activator(job_type);
        let job = activator(&scope)?;
        Ok(ScopedJob {
            job,
            scope,
            owned: true,
        })
    }

    /// Hand a job back after its execution finished.
    pub fn return_job(&self, job: ScopedJob) {
        job.release();
    }

    /// Number of job types with a cached activator.
    pub fn cached_activators(&self) -> usize {
        self.activators.len()
    }

    fn activator(&self, job_type: &JobType) -> ObjectFactory {
        if let Some(cached) = self.activators.get(&job_type.type_id()) {
            return Arc::clone(cached.value());
        }
        let entry = self
            .activators
            .entry(job_type.type_id())
            .or_insert_with(job_type.activator);
        Arc::clone(entry.value())
    }
}
