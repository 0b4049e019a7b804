//! Cooperative timing primitives.
//!
//! The bridge has no async runtime. Everything that "waits" is either a
//! [`Deadline`] checked on each controller tick, or a bounded [`poll_until`]
//! loop that can be interrupted through a [`CancellationToken`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Shared stop flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Longest delay [`Deadline::arm`] honours; anything longer never fires in
/// practice and would overflow `Instant` on some platforms.
const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A one-shot timer owned by a session. Disarmed until [`Deadline::arm`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    due: Option<Instant>,
}

impl Deadline {
    pub fn disarmed() -> Self {
        Self { due: None }
    }

    pub fn arm(&mut self, now: Instant, after: Duration) {
        self.due = now.checked_add(after.min(MAX_DELAY));
    }

    pub fn cancel(&mut self) {
        self.due = None;
    }

    pub fn is_armed(&self) -> bool {
        self.due.is_some()
    }

    /// True once `now` reaches the deadline. Does not disarm.
    pub fn is_due(&self, now: Instant) -> bool {
        self.due.is_some_and(|due| now >= due)
    }

    /// Returns true and disarms if due.
    pub fn fire(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.due = None;
            true
        } else {
            false
        }
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.due.map(|due| due.saturating_duration_since(now))
    }
}

/// Calls `probe` every `interval` until it yields a value, `timeout` elapses
/// (`None` means wait forever) or `token` is cancelled.
pub fn poll_until<T>(
    token: &CancellationToken,
    interval: Duration,
    timeout: Option<Duration>,
    mut probe: impl FnMut() -> Option<T>,
) -> Option<T> {
    let started = Instant::now();
    loop {
        if token.is_cancelled() {
            return None;
        }
        if let Some(value) = probe() {
            return Some(value);
        }
        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                return None;
            }
        }
        thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_fires_once() {
        let now = Instant::now();
        let mut deadline = Deadline::disarmed();
        assert!(!deadline.fire(now));

        deadline.arm(now, Duration::from_secs(5));
        assert!(!deadline.fire(now + Duration::from_secs(4)));
        assert!(deadline.fire(now + Duration::from_secs(5)));
        assert!(!deadline.is_armed());
        assert!(!deadline.fire(now + Duration::from_secs(10)));
    }

    #[test]
    fn oversized_delay_stays_armed_without_firing() {
        let now = Instant::now();
        let mut deadline = Deadline::disarmed();
        deadline.arm(now, Duration::MAX);
        assert!(deadline.is_armed());
        assert!(!deadline.fire(now + Duration::from_secs(365 * 24 * 60 * 60)));
        assert!(deadline.remaining(now).unwrap() > Duration::from_secs(60 * 60));
    }

    #[test]
    fn cancelled_deadline_never_fires() {
        let now = Instant::now();
        let mut deadline = Deadline::disarmed();
        deadline.arm(now, Duration::from_secs(1));
        deadline.cancel();
        assert!(!deadline.is_due(now + Duration::from_secs(60)));
    }

    #[test]
    fn poll_until_returns_first_value() {
        let token = CancellationToken::new();
        let mut calls = 0;
        let value = poll_until(&token, Duration::from_millis(1), None, || {
            calls += 1;
            (calls == 3).then_some(calls)
        });
        assert_eq!(value, Some(3));
    }

    #[test]
    fn poll_until_times_out() {
        let token = CancellationToken::new();
        let value: Option<()> = poll_until(
            &token,
            Duration::from_millis(1),
            Some(Duration::from_millis(20)),
            || None,
        );
        assert!(value.is_none());
    }

    #[test]
    fn poll_until_stops_when_cancelled() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        let value: Option<()> = poll_until(&token, Duration::from_millis(1), None, || None);
        assert!(value.is_none());
    }
}
