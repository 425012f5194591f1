//! Cooperative shutdown flag shared by every background loop.
//!
//! Wraps the `Arc<AtomicBool>` running-flag pattern; sleeps are sliced so a
//! cancelled loop wakes within `SLICE` instead of finishing its full period.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

const SLICE: Duration = Duration::from_millis(20);

#[derive(Clone, Default, Debug)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Sleeps for `dur`, returning early if cancelled.
    /// Returns `true` when the full duration elapsed.
    pub fn sleep(&self, dur: Duration) -> bool {
        self.sleep_until(Instant::now() + dur)
    }

    pub fn sleep_until(&self, deadline: Instant) -> bool {
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_sleep_returns_early() {
        let token = CancelToken::new();
        let remote = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });

        let start = Instant::now();
        assert!(!token.sleep(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        canceller.join().unwrap();
    }

    #[test]
    fn uncancelled_sleep_runs_to_completion() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::from_millis(10)));
        assert!(!token.is_cancelled());
    }
}
