//! Cancellable deadline timers.
//!
//! Timers never run callbacks on their own. The owner stores the handle next
//! to the state it guards and the global tick asks whether it has expired, so
//! cancelling is just dropping (or cancelling) the handle in the same call
//! that invalidates the state. A stale timer can never fire against state
//! that has already moved on.
//!
//! Deadlines use [`tokio::time::Instant`], which lets tests drive them with
//! `tokio::time::pause` and `tokio::time::advance`.

use tokio::time::{Duration, Instant};

/// A single-shot deadline with an explicit cancellation flag.
#[derive(Debug, Clone)]
pub struct DeadlineTimer {
    deadline: Instant,
    cancelled: bool,
}

impl DeadlineTimer {
    /// Starts a timer that expires `after` from now.
    pub fn start(after: Duration) -> Self {
        Self::at(Instant::now() + after)
    }

    pub fn at(deadline: Instant) -> Self {
        Self { deadline, cancelled: false }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left until expiry (zero once expired).
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// True once the deadline has passed and the timer was not cancelled.
    pub fn is_expired(&self, now: Instant) -> bool {
        !self.cancelled && now >= self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expires_after_deadline() {
        let timer = DeadlineTimer::start(Duration::from_secs(2));
        assert!(!timer.is_expired(Instant::now()));

        tokio::time::advance(Duration::from_millis(1999)).await;
        assert!(!timer.is_expired(Instant::now()));
        assert_eq!(timer.remaining(Instant::now()), Duration::from_millis(1));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(timer.is_expired(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_expires() {
        let mut timer = DeadlineTimer::start(Duration::from_millis(10));
        timer.cancel();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!timer.is_expired(Instant::now()));
        assert!(timer.is_cancelled());
    }
}
