use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Handle to a spawned timer or probe task.
///
/// Dropping the handle aborts the task, so whoever owns the handle owns the
/// only disarm path. Replacing or clearing the owning state cancels it.
#[derive(Debug)]
pub(crate) struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawn `fut` on the current runtime
    pub(crate) fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(fut),
        }
    }

    /// One-shot timer: deliver `event` after `delay`.
    pub(crate) fn after<E: Send + 'static>(
        delay: Duration,
        events: mpsc::UnboundedSender<E>,
        event: E,
    ) -> Self {
        Self::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        })
    }

    /// Whether the task has run to completion (or was aborted).
    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
