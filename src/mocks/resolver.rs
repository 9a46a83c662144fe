//! Mock dependency resolver implementation for testing.

use crate::{
    types::{TaskId, TaskSpec},
    DependencyResolver, Error, ResolveCallback,
};
use commonware_utils::sync::Mutex;
use std::sync::Arc;

struct Inner {
    immediate: bool,
    held: Vec<(TaskSpec, Option<ResolveCallback>)>,
}

/// Resolver that either completes resolutions synchronously in the submitting
/// call stack or holds them until the test releases them.
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<Mutex<Inner>>,
}

impl Resolver {
    /// Every resolution succeeds synchronously, before `resolve_dependencies`
    /// returns.
    pub fn immediate() -> Self {
        Self::new(true)
    }

    /// Resolutions are held until released with [Resolver::resolve] or
    /// [Resolver::fail].
    pub fn manual() -> Self {
        Self::new(false)
    }

    fn new(immediate: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                immediate,
                held: Vec::new(),
            })),
        }
    }

    /// Completes the held resolution for a task.
    pub fn resolve(&self, task: &TaskId) {
        self.release(task, Ok(()));
    }

    /// Fails the held resolution for a task.
    pub fn fail(&self, task: &TaskId, error: Error) {
        self.release(task, Err(error));
    }

    fn release(&self, task: &TaskId, status: Result<(), Error>) {
        let callback = {
            let mut inner = self.inner.lock();
            let (_, callback) = inner
                .held
                .iter_mut()
                .find(|(spec, callback)| spec.task == *task && callback.is_some())
                .expect("no resolution held for task");
            callback.take().unwrap()
        };
        callback(status);
    }
}

impl DependencyResolver for Resolver {
    fn resolve_dependencies(&self, spec: TaskSpec, callback: ResolveCallback) {
        let immediate = self.inner.lock().immediate;
        if immediate {
            callback(Ok(()));
        } else {
            self.inner.lock().held.push((spec, Some(callback)));
        }
    }
}
