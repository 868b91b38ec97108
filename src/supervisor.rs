//! Worker lifecycle and shutdown
//!
//! Long-running tasks subscribe to one `watch` channel. [`Supervisor::stop`]
//! flips it and waits for each worker up to a deadline.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            workers: Vec::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_stopping(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(worker = name, "Starting worker");
        self.workers.push((name, tokio::spawn(task)));
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Signal shutdown and wait for workers. Returns the names that missed the deadline.
    pub async fn stop(mut self, timeout: Duration) -> Vec<&'static str> {
        self.shutdown_tx.send_replace(true);
        let deadline = Instant::now() + timeout;
        let mut late = Vec::new();

        for (name, mut handle) in self.workers.drain(..) {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => info!(worker = name, "Worker stopped"),
                Ok(Err(e)) => warn!(worker = name, error = %e, "Worker ended abnormally"),
                Err(_) => {
                    warn!(worker = name, "Worker did not stop in time, aborting");
                    handle.abort();
                    late.push(name);
                }
            }
        }
        late
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_workers_observe_shutdown() {
        let mut supervisor = Supervisor::new();
        let mut rx = supervisor.subscribe();
        supervisor.spawn("waiter", async move {
            let _ = rx.changed().await;
        });

        assert!(supervisor.stop(Duration::from_secs(1)).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_worker_reported() {
        let mut supervisor = Supervisor::new();
        supervisor.spawn("stuck", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        assert_eq!(supervisor.stop(Duration::from_secs(5)).await, vec!["stuck"]);
    }
}
