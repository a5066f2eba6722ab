//! Periodic cleanup of expiring in-memory stores.
//!
//! # Responsibilities
//! - Define the [`Sweep`] contract for stores with time-bounded entries
//! - Run one background loop per store until shutdown

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

/// A store whose expired entries can be removed in bulk.
pub trait Sweep {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// How often [`sweep`](Self::sweep) should run.
    fn interval(&self) -> Duration;

    /// Remove expired entries, returning how many were dropped.
    fn sweep(&self) -> usize;
}

impl<T: Sweep + ?Sized> Sweep for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn interval(&self) -> Duration {
        (**self).interval()
    }

    fn sweep(&self) -> usize {
        (**self).sweep()
    }
}

/// Spawn a loop sweeping `store` every [`Sweep::interval`] until shutdown fires.
pub fn spawn_sweeper<S>(store: S, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()>
where
    S: Sweep + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let period = store.interval().max(Duration::from_millis(1));
        tracing::debug!(store = store.name(), interval_ms = period.as_millis() as u64, "Sweeper starting");

        let mut ticker = time::interval(period);
        // The first tick completes immediately; nothing has expired yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = store.sweep();
                    if removed > 0 {
                        tracing::debug!(store = store.name(), removed, "Swept expired entries");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!(store = store.name(), "Sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::shutdown::Shutdown;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStore {
        sweeps: AtomicUsize,
    }

    impl Sweep for CountingStore {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(10)
        }

        fn sweep(&self) -> usize {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_each_interval_and_stops() {
        let store = Arc::new(CountingStore::default());
        let shutdown = Shutdown::new();
        let handle = spawn_sweeper(store.clone(), shutdown.subscribe());

        time::sleep(Duration::from_secs(35)).await;
        assert_eq!(store.sweeps.load(Ordering::SeqCst), 3);

        shutdown.trigger();
        handle.await.unwrap();

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.sweeps.load(Ordering::SeqCst), 3);
    }
}
