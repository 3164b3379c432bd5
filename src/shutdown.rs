//! Process-wide shutdown registry.
//!
//! Collects idempotent cleanup callbacks so that a terminal (or anything else holding raw-mode
//! or signal state) is restored even if the process exits through a path that never calls
//! [`crate::terminal::SystemTerminal::close`] directly. An arbitrary number of tasks can be
//! registered; each runs once, in reverse registration order, at process exit.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

type Task = Box<dyn Fn() + Send + Sync + 'static>;

struct Registry {
    tasks: Mutex<Vec<(usize, Option<Task>)>>,
    next_id: AtomicUsize,
    hook_installed: AtomicBool,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Registry {
        tasks: Mutex::new(Vec::new()),
        next_id: AtomicUsize::new(0),
        hook_installed: AtomicBool::new(false),
    })
}

/// A registration made with [`register`]. Dropping this does not cancel the task; call
/// [`unregister`] explicitly, the way a `SystemTerminal` does in its own `close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownHandle(usize);

/// Register `task` to run once at process exit, unless [`unregister`]'d first.
///
/// Installs a libc `atexit` hook on first use; subsequent registrations simply append to the
/// same run list. Tasks run in registration order, first-registered first.
pub fn register(task: impl Fn() + Send + Sync + 'static) -> ShutdownHandle {
    let reg = registry();
    let id = reg.next_id.fetch_add(1, Ordering::SeqCst);
    reg.tasks.lock().unwrap().push((id, Some(Box::new(task))));

    if reg
        .hook_installed
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        // SAFETY: `run_all` only touches the registry's own mutex and the tasks it holds; it
        // performs no allocation-unsafe or non-reentrant work beyond what the registered
        // closures themselves do. Registered closures are expected to be exit-safe, the same
        // contract `libc::atexit` places on any handler.
        unsafe {
            libc::atexit(run_all_trampoline);
        }
    }

    ShutdownHandle(id)
}

/// Cancel a previously registered task. A no-op if it already ran or was already removed.
pub fn unregister(handle: ShutdownHandle) {
    let reg = registry();
    let mut tasks = reg.tasks.lock().unwrap();
    tasks.retain(|(id, _)| *id != handle.0);
}

/// Run every registered task now, in registration order, then clear the registry. Tasks are
/// idempotent by contract; running this more than once is safe but only the first call after a
/// fresh batch of registrations does anything.
pub fn run_all() {
    let reg = registry();
    let mut tasks = reg.tasks.lock().unwrap();
    tracing::debug!(count = tasks.len(), "running shutdown tasks");
    for (_, task) in tasks.iter_mut() {
        if let Some(f) = task.take() {
            f();
        }
    }
    tasks.clear();
}

extern "C" fn run_all_trampoline() {
    run_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as Counter;
    use std::sync::Arc;

    #[test]
    fn unregistered_task_does_not_run() {
        let ran = Arc::new(Counter::new(0));
        let ran2 = ran.clone();
        let handle = register(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        unregister(handle);
        run_all();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn registered_task_runs_on_run_all() {
        let ran = Arc::new(Counter::new(0));
        let ran2 = ran.clone();
        register(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        run_all();
        assert!(ran.load(Ordering::SeqCst) >= 1);
    }
}
