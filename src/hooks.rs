//! Ordered lifecycle hook lists run around the exporter's healthy phase.
//!
//! Two deliberately distinct types: post-start hooks may run every time they
//! are invoked, while pre-stop hooks are consumed by their first run so that
//! teardown actions such as catalog deregistration happen at most once even
//! when the signal-relay thread and the shutdown path race.
use std::sync::Mutex;

use crate::error::SidecarError;

/// A zero-argument fallible lifecycle action.
pub type Hook = Box<dyn FnMut() -> Result<(), SidecarError> + Send>;

/// Runs every hook in order, collecting failures instead of short-circuiting.
fn run_all(hooks: &mut [Hook]) -> Result<(), SidecarError> {
    let mut failures = Vec::new();
    for hook in hooks.iter_mut() {
        if let Err(err) = hook() {
            failures.push(err);
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(SidecarError::HookFailures(failures))
    }
}

/// Hooks executed once the exporter is presumed healthy.
///
/// The list is append-only and re-runnable; the supervisor invokes it exactly
/// once per lifecycle.
#[derive(Default)]
pub struct PostStartHooks {
    hooks: Vec<Hook>,
}

impl PostStartHooks {
    /// Appends a hook; execution order is push order.
    pub fn push<F>(&mut self, hook: F)
    where
        F: FnMut() -> Result<(), SidecarError> + Send + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    /// Whether any hooks are registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs all hooks in order and aggregates every failure.
    pub fn run(&mut self) -> Result<(), SidecarError> {
        run_all(&mut self.hooks)
    }
}

/// Hooks executed ahead of shutdown, consumed by their first run.
///
/// Interior mutability lets the relay thread and the supervisor share the
/// list; whichever runs first drains it, so the other call is a no-op.
#[derive(Default)]
pub struct PreStopHooks {
    hooks: Mutex<Vec<Hook>>,
}

impl PreStopHooks {
    /// Appends a hook; execution order is push order.
    pub fn push<F>(&self, hook: F) -> Result<(), SidecarError>
    where
        F: FnMut() -> Result<(), SidecarError> + Send + 'static,
    {
        self.hooks.lock()?.push(Box::new(hook));
        Ok(())
    }

    /// Whether any hooks remain to be run.
    pub fn is_empty(&self) -> Result<bool, SidecarError> {
        Ok(self.hooks.lock()?.is_empty())
    }

    /// Runs all remaining hooks in order and aggregates every failure.
    ///
    /// The list is drained under the lock before execution, so concurrent or
    /// repeated calls observe an empty list and do nothing. Hooks themselves
    /// run outside the lock.
    pub fn run(&self) -> Result<(), SidecarError> {
        let mut hooks = std::mem::take(&mut *self.hooks.lock()?);
        run_all(&mut hooks)
    }
}
