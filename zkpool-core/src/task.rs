//! Task spawning provider.

use std::future::Future;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Provider trait for spawning named background tasks.
///
/// The connection engine runs its reader, writer and session driver as
/// separate tasks; the name ends up on a `tracing` span so log lines can be
/// attributed to the activity that produced them.
pub trait TaskProvider: Clone + Send + Sync + 'static {
    /// Spawn a named task on the runtime.
    fn spawn_task<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Tokio-based task provider.
#[derive(Debug, Clone, Default)]
pub struct TokioTaskProvider;

impl TaskProvider for TokioTaskProvider {
    fn spawn_task<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = tracing::debug_span!("task", name = %name);
        tokio::spawn(future.instrument(span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_spawn_task_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let handle = TokioTaskProvider.spawn_task("probe", async move {
            flag.store(true, Ordering::SeqCst);
        });
        handle.await.expect("task");
        assert!(ran.load(Ordering::SeqCst));
    }
}
