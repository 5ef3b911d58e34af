//! Per-link change notification channel.
//!
//! Waiters register a [`Clink`] and are woken on every broadcast. A clink
//! latches: while one wakeup is pending, further broadcasts are folded into
//! it, so a slow waiter never accumulates a backlog.
//!
//! This lock is always taken before the link's own state lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub(crate) struct Clink {
    notify: Notify,
    fired: AtomicBool,
}

impl Clink {
    fn fire(&self) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    /// Re-arm before checking the awaited condition.
    pub(crate) fn arm(&self) {
        self.fired.store(false, Ordering::Release);
    }

    pub(crate) async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[derive(Debug, Default)]
pub(crate) struct LinkChannel {
    clinks: Mutex<Vec<(u64, Arc<Clink>)>>,
    next_id: AtomicU64,
}

/// Deregisters its clink on drop, including when the wait is cancelled.
pub(crate) struct ClinkGuard<'a> {
    channel: &'a LinkChannel,
    id: u64,
    clink: Arc<Clink>,
}

impl ClinkGuard<'_> {
    pub(crate) fn clink(&self) -> &Clink {
        &self.clink
    }
}

impl Drop for ClinkGuard<'_> {
    fn drop(&mut self) {
        self.channel.lock().retain(|(id, _)| *id != self.id);
    }
}

impl LinkChannel {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<(u64, Arc<Clink>)>> {
        self.clinks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self) -> ClinkGuard<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let clink = Arc::new(Clink::default());
        self.lock().push((id, clink.clone()));
        ClinkGuard {
            channel: self,
            id,
            clink,
        }
    }

    pub(crate) fn waiters(&self) -> usize {
        self.lock().len()
    }
}

/// Wake every registered clink. Takes the already-held channel lock.
pub(crate) fn broadcast(clinks: &[(u64, Arc<Clink>)]) {
    for (_, clink) in clinks {
        clink.fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_broadcast_wakes_registered_waiter() {
        let channel = LinkChannel::default();
        let guard = channel.register();
        guard.clink().arm();

        broadcast(&channel.lock());
        tokio::time::timeout(Duration::from_secs(1), guard.clink().wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_repeated_broadcasts_fold_into_one_wakeup() {
        let channel = LinkChannel::default();
        let guard = channel.register();
        guard.clink().arm();

        for _ in 0..5 {
            broadcast(&channel.lock());
        }
        guard.clink().wait().await;
        let second = tokio::time::timeout(Duration::from_millis(20), guard.clink().wait()).await;
        assert!(second.is_err());
    }

    #[test]
    fn test_guard_deregisters_on_drop() {
        let channel = LinkChannel::default();
        {
            let _a = channel.register();
            let _b = channel.register();
            assert_eq!(channel.waiters(), 2);
        }
        assert_eq!(channel.waiters(), 0);
    }
}
