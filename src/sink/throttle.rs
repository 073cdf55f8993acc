//! Leading and trailing edge flush throttle.
//!
//! The first request in a quiet period flushes immediately and opens a
//! window of one interval. Requests inside the window collapse into a
//! single trailing flush at the window's end, which opens the next window.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleState {
    /// No flush in the current interval.
    Idle,
    /// A flush happened and its window is still open.
    Flushing { window_end: Instant },
    /// A trailing flush is due at `window_end`.
    Scheduled { window_end: Instant },
}

/// What the caller must do after feeding the throttle an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    FlushNow,
    Wait,
}

#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    state: ThrottleState,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: ThrottleState::Idle,
        }
    }

    pub fn state(&self) -> ThrottleState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// A flush was requested.
    pub fn on_request(&mut self, now: Instant) -> Action {
        match self.state {
            ThrottleState::Idle => {
                self.state = ThrottleState::Flushing {
                    window_end: now + self.interval,
                };
                Action::FlushNow
            }
            ThrottleState::Flushing { window_end } => {
                self.state = ThrottleState::Scheduled { window_end };
                Action::Wait
            }
            ThrottleState::Scheduled { .. } => Action::Wait,
        }
    }

    /// The current window ended.
    pub fn on_deadline(&mut self, now: Instant) -> Action {
        match self.state {
            ThrottleState::Scheduled { .. } => {
                self.state = ThrottleState::Flushing {
                    window_end: now + self.interval,
                };
                Action::FlushNow
            }
            ThrottleState::Flushing { .. } => {
                self.state = ThrottleState::Idle;
                Action::Wait
            }
            ThrottleState::Idle => Action::Wait,
        }
    }

    /// End of the open window, if any.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            ThrottleState::Idle => None,
            ThrottleState::Flushing { window_end } | ThrottleState::Scheduled { window_end } => {
                Some(window_end)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(60);

    #[test]
    fn test_leading_edge_flushes_immediately() {
        let mut throttle = Throttle::new(INTERVAL);
        let now = Instant::now();
        assert_eq!(throttle.on_request(now), Action::FlushNow);
        assert_eq!(throttle.deadline(), Some(now + INTERVAL));
    }

    #[test]
    fn test_requests_in_window_collapse_to_one_trailing_flush() {
        let mut throttle = Throttle::new(INTERVAL);
        let t0 = Instant::now();
        throttle.on_request(t0);

        assert_eq!(throttle.on_request(t0 + Duration::from_secs(1)), Action::Wait);
        assert_eq!(throttle.on_request(t0 + Duration::from_secs(2)), Action::Wait);
        assert_eq!(
            throttle.state(),
            ThrottleState::Scheduled {
                window_end: t0 + INTERVAL
            }
        );

        let t1 = t0 + INTERVAL;
        assert_eq!(throttle.on_deadline(t1), Action::FlushNow);
        assert_eq!(throttle.deadline(), Some(t1 + INTERVAL));
    }

    #[test]
    fn test_quiet_window_returns_to_idle() {
        let mut throttle = Throttle::new(INTERVAL);
        let t0 = Instant::now();
        throttle.on_request(t0);

        assert_eq!(throttle.on_deadline(t0 + INTERVAL), Action::Wait);
        assert_eq!(throttle.state(), ThrottleState::Idle);
        assert_eq!(throttle.deadline(), None);

        assert_eq!(
            throttle.on_request(t0 + INTERVAL * 3),
            Action::FlushNow
        );
    }

    #[test]
    fn test_deadline_while_idle_is_noop() {
        let mut throttle = Throttle::new(INTERVAL);
        assert_eq!(throttle.on_deadline(Instant::now()), Action::Wait);
        assert_eq!(throttle.state(), ThrottleState::Idle);
    }
}
