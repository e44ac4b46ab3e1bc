//! Ceiling on how long `loading` may stay raised.
//!
//! Every loading cycle arms the guard with a fresh ticket. When the ceiling
//! elapses the expiry callback receives that ticket and asks the guard whether
//! it is still the armed one; a commit that lands first cancels the guard, and
//! a newer cycle re-arms it, so a stale expiry can never act.

use std::time::Duration;

use tokio::task::JoinHandle;

/// One-shot timer tied to the current loading cycle.
#[derive(Debug)]
pub struct LoadingGuard {
    ceiling: Duration,
    ticket: u64,
    armed: bool,
    pending: Option<JoinHandle<()>>,
}

impl LoadingGuard {
    #[must_use]
    pub const fn new(ceiling: Duration) -> Self {
        Self {
            ceiling,
            ticket: 0,
            armed: false,
            pending: None,
        }
    }

    /// How long a loading cycle may run before the guard fires.
    #[must_use]
    pub const fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Start a new cycle, replacing any armed one, and return its ticket.
    ///
    /// `on_expiry` runs on the Tokio runtime after the ceiling, unless the
    /// cycle is cancelled or replaced first. Must be called from within a
    /// Tokio runtime.
    pub fn arm(&mut self, on_expiry: impl FnOnce(u64) + Send + 'static) -> u64 {
        self.cancel();
        self.ticket += 1;
        self.armed = true;

        let ticket = self.ticket;
        let ceiling = self.ceiling;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(ceiling).await;
            on_expiry(ticket);
        }));
        ticket
    }

    /// Stop the current cycle. A no-op when nothing is armed.
    pub fn cancel(&mut self) {
        self.armed = false;
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }

    /// Called by an expiring timer: returns `true` and disarms if `ticket` is
    /// still the armed cycle, `false` if it was cancelled or superseded.
    pub fn disarm_fired(&mut self, ticket: u64) -> bool {
        if !self.armed || ticket != self.ticket {
            return false;
        }
        self.armed = false;
        // Only the firing task calls this; let it finish instead of aborting it.
        self.pending = None;
        true
    }

    /// Whether a cycle is currently armed.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    const CEILING: Duration = Duration::from_millis(5000);

    fn shared() -> (Arc<Mutex<LoadingGuard>>, Arc<Mutex<Vec<u64>>>) {
        (
            Arc::new(Mutex::new(LoadingGuard::new(CEILING))),
            Arc::new(Mutex::new(Vec::new())),
        )
    }

    fn arm(guard: &Arc<Mutex<LoadingGuard>>, fired: &Arc<Mutex<Vec<u64>>>) -> u64 {
        let guard_ref = Arc::clone(guard);
        let fired = Arc::clone(fired);
        guard.lock().unwrap().arm(move |ticket| {
            if guard_ref.lock().unwrap().disarm_fired(ticket) {
                fired.lock().unwrap().push(ticket);
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_ceiling() {
        let (guard, fired) = shared();
        let ticket = arm(&guard, &fired);

        tokio::time::sleep(CEILING - Duration::from_millis(1)).await;
        assert!(fired.lock().unwrap().is_empty());
        assert!(guard.lock().unwrap().is_armed());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(*fired.lock().unwrap(), [ticket]);
        assert!(!guard.lock().unwrap().is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (guard, fired) = shared();
        arm(&guard, &fired);

        guard.lock().unwrap().cancel();
        tokio::time::sleep(CEILING * 2).await;

        assert!(fired.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous_cycle() {
        let (guard, fired) = shared();
        let first = arm(&guard, &fired);

        tokio::time::sleep(CEILING / 2).await;
        let second = arm(&guard, &fired);
        assert!(second > first);

        tokio::time::sleep(CEILING + Duration::from_millis(1)).await;
        assert_eq!(*fired.lock().unwrap(), [second]);
    }

    #[test]
    fn test_stale_ticket_is_rejected() {
        let mut guard = LoadingGuard::new(CEILING);
        assert!(!guard.disarm_fired(0));
        assert!(!guard.disarm_fired(1));
    }
}
