//! Handle for the background task that runs one chat.

use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
use tokio::task::JoinHandle;

/// A handle for managing the background task generating a chat.
///
/// The task receives a running flag and is expected to check it between
/// module calls. Dropping the handle clears the flag.
pub(crate) struct GenerationWorker {
    /// Flag indicating whether the background task should continue running
    running: Arc<AtomicBool>,

    /// Handle to the spawned background task, becomes `None` after shutdown is initiated
    handle: Option<JoinHandle<()>>,
}

impl GenerationWorker {
    /// Creates a new `GenerationWorker` by spawning a background task.
    ///
    /// * `task` - A function that takes the running flag and returns a `JoinHandle`.
    pub(crate) fn new<F>(task: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>) -> JoinHandle<()>,
    {
        let running = Arc::new(AtomicBool::new(true));
        let handle = task(running.clone());

        Self {
            running,
            handle: Some(handle),
        }
    }

    /// Signal the task to stop and detach from it.
    ///
    /// The task finishes whatever module call it is in, then observes the flag.
    pub(crate) fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.handle.take();
    }
}

impl Drop for GenerationWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time;

    #[tokio::test]
    async fn test_worker_drop_clears_running_flag() {
        let stopped = Arc::new(AtomicBool::new(false));
        let stopped_clone = stopped.clone();

        {
            let _worker = GenerationWorker::new(|running| {
                tokio::spawn(async move {
                    while running.load(Ordering::SeqCst) {
                        time::sleep(Duration::from_millis(5)).await;
                    }
                    stopped_clone.store(true, Ordering::SeqCst);
                })
            });
        }

        time::sleep(Duration::from_millis(100)).await;
        assert!(stopped.load(Ordering::SeqCst));
    }
}
