//! Completion dispatch.
//!
//! Reply futures are completed through a caller-supplied executor so that
//! transport I/O tasks never run application code. The default runs the
//! completion inline; `SpawnExecutor` hands it to a tokio runtime.

use std::sync::Arc;
use tokio::runtime::Handle;

/// A unit of completion work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// An opaque sink for completion tasks.
pub trait Executor: Send + Sync {
    /// Runs or schedules a task. Returning `false` rejects it; the caller
    /// logs the rejection and the associated future is never completed.
    fn execute(&self, task: Task) -> bool;
}

/// Runs completion tasks inline on the delivering task.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, task: Task) -> bool {
        task();
        true
    }
}

/// Dispatches completion tasks onto a tokio runtime.
#[derive(Debug, Clone)]
pub struct SpawnExecutor {
    handle: Handle,
}

impl SpawnExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Binds to the runtime of the calling context.
    ///
    /// Panics outside a tokio runtime, like `Handle::current()`.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Executor for SpawnExecutor {
    fn execute(&self, task: Task) -> bool {
        self.handle.spawn(async move { task() });
        true
    }
}

/// The default executor: completion runs inline.
pub fn direct() -> Arc<dyn Executor> {
    Arc::new(DirectExecutor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_direct_runs_inline() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        assert!(DirectExecutor.execute(Box::new(move || flag.store(true, Ordering::SeqCst))));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_spawn_runs_on_runtime() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let executor = SpawnExecutor::current();
        assert!(executor.execute(Box::new(move || {
            let _ = tx.send(());
        })));
        rx.await.unwrap();
    }
}
