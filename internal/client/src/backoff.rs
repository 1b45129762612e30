//! Jitter-free multiplicative backoff: 500ms initial delay, ×1.5 growth,
//! capped at 30s.

use std::time::Duration;

use tokio::sync::watch;

const INITIAL: Duration = Duration::from_millis(500);
const FACTOR: f64 = 1.5;
const CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self { next: INITIAL }
    }

    pub fn reset(&mut self) {
        self.next = INITIAL;
    }

    /// Returns the delay to use for this retry, and advances internal state
    /// so that the following call returns the next delay in the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        let grown = Duration::from_secs_f64((self.next.as_secs_f64() * FACTOR).min(CAP.as_secs_f64()));
        self.next = grown;
        delay
    }
}

/// Sleeps for `duration`, or returns early (with `false`) if `stop` fires
/// first. Returns `true` if the sleep ran to completion.
pub async fn cancellable_sleep(duration: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = stop.changed() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_starts_at_500ms_and_grows_by_1_5x() {
        let mut b = Backoff::new();
        assert_eq!(b.next_delay(), Duration::from_millis(500));
        assert_eq!(b.next_delay(), Duration::from_millis(750));
        assert_eq!(b.next_delay(), Duration::from_millis(1125));
    }

    #[test]
    fn sequence_caps_at_30s() {
        let mut b = Backoff::new();
        for _ in 0..40 {
            b.next_delay();
        }
        assert_eq!(b.next_delay(), Duration::from_secs(30));
    }

    #[test]
    fn reset_returns_to_initial_delay() {
        let mut b = Backoff::new();
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn cancellable_sleep_returns_false_when_already_stopped() {
        let (_tx, rx) = watch::channel(true);
        let mut rx = rx;
        assert!(!cancellable_sleep(Duration::from_secs(30), &mut rx).await);
    }

    #[tokio::test]
    async fn cancellable_sleep_returns_false_when_stop_fires() {
        let (tx, rx) = watch::channel(false);
        let mut rx = rx;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(true);
        });
        assert!(!cancellable_sleep(Duration::from_secs(30), &mut rx).await);
    }
}
