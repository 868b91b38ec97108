//! Time-bounded de-duplication window
//!
//! A key marked at `T` is reported as seen while `now < T + ttl`. Expired
//! entries are ignored on lookup and physically removed by a periodic sweep.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct DedupWindow<K> {
    entries: DashMap<K, Instant>,
    ttl: Duration,
}

impl<K> DedupWindow<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// `clamp(ttl / 3, 5s, 60s)`
    pub fn sweep_interval(&self) -> Duration {
        (self.ttl / 3).clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL)
    }

    pub fn is_seen(&self, key: &K) -> bool {
        self.entries
            .get(key)
            .map(|expires_at| Instant::now() < *expires_at)
            .unwrap_or(false)
    }

    /// Mark `key` as seen from now, replacing any earlier mark
    pub fn mark(&self, key: K) {
        self.entries.insert(key, Instant::now() + self.ttl);
    }

    /// Remove expired entries, returning how many were dropped
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| now < *expires_at);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sweep on [`Self::sweep_interval`] until shutdown flips
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let window = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(window.sweep_interval());
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = window.sweep();
                        if removed > 0 {
                            trace!(removed, remaining = window.len(), "Dedup sweep");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_seen_until_ttl_boundary() {
        let ttl = Duration::from_millis(10_000);
        let window = DedupWindow::new(ttl);
        window.mark("sig".to_string());

        tokio::time::advance(ttl - Duration::from_millis(1)).await;
        assert!(window.is_seen(&"sig".to_string()));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(!window.is_seen(&"sig".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remark_extends() {
        let window = DedupWindow::new(Duration::from_secs(10));
        window.mark(1u32);
        tokio::time::advance(Duration::from_secs(8)).await;
        window.mark(1u32);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(window.is_seen(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_expired_only() {
        let window = DedupWindow::new(Duration::from_secs(10));
        window.mark(1u32);
        tokio::time::advance(Duration::from_secs(6)).await;
        window.mark(2u32);
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(window.sweep(), 1);
        assert!(!window.is_seen(&1));
        assert!(window.is_seen(&2));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_sweep_interval_clamped() {
        assert_eq!(DedupWindow::<u8>::new(Duration::from_secs(3)).sweep_interval(), Duration::from_secs(5));
        assert_eq!(DedupWindow::<u8>::new(Duration::from_secs(30)).sweep_interval(), Duration::from_secs(10));
        assert_eq!(DedupWindow::<u8>::new(Duration::from_secs(600)).sweep_interval(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_runs_and_stops() {
        let window = Arc::new(DedupWindow::new(Duration::from_secs(15)));
        let (tx, rx) = watch::channel(false);
        let handle = window.spawn_sweeper(rx);

        window.mark(7u64);
        tokio::time::sleep(Duration::from_secs(21)).await;
        assert!(window.is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
