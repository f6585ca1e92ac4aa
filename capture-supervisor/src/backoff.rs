//! Restart policy for unexpected encoder exits.
//!
//! Bounded exponential backoff: 2 s doubling to 60 s, reset after ten
//! minutes of continuous Running. Five exits inside a five-minute window pin
//! the supervisor in Failed until an operator restarts it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const INITIAL_DELAY: Duration = Duration::from_secs(2);
pub const MAX_DELAY: Duration = Duration::from_secs(60);
/// Continuous Running time that resets the backoff ladder
pub const STABLE_RESET: Duration = Duration::from_secs(600);
/// Exits within [`PIN_WINDOW`] that pin the supervisor in Failed
pub const PIN_COUNT: usize = 5;
pub const PIN_WINDOW: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Relaunch after this delay
    Retry(Duration),
    /// Retry budget exhausted; stay Failed until operator action
    Pin,
}

#[derive(Debug)]
pub struct RestartPolicy {
    delay: Duration,
    running_since: Option<Instant>,
    recent_exits: VecDeque<Instant>,
}

impl RestartPolicy {
    pub fn new() -> Self {
        Self {
            delay: INITIAL_DELAY,
            running_since: None,
            recent_exits: VecDeque::new(),
        }
    }

    /// The child reached Running
    pub fn on_running(&mut self, now: Instant) {
        self.running_since = Some(now);
    }

    /// The child exited unexpectedly; decide what happens next
    pub fn on_exit(&mut self, now: Instant) -> RestartDecision {
        if let Some(since) = self.running_since.take() {
            if now.duration_since(since) >= STABLE_RESET {
                self.delay = INITIAL_DELAY;
            }
        }

        self.recent_exits.push_back(now);
        while let Some(oldest) = self.recent_exits.front() {
            if now.duration_since(*oldest) > PIN_WINDOW {
                self.recent_exits.pop_front();
            } else {
                break;
            }
        }
        if self.recent_exits.len() >= PIN_COUNT {
            return RestartDecision::Pin;
        }

        let decision = RestartDecision::Retry(self.delay);
        self.delay = (self.delay * 2).min(MAX_DELAY);
        decision
    }

    /// Operator start/restart: forget history and start fresh
    pub fn clear(&mut self) {
        self.delay = INITIAL_DELAY;
        self.running_since = None;
        self.recent_exits.clear();
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_ladder() {
        let mut policy = RestartPolicy::new();
        let t0 = Instant::now();

        assert_eq!(
            policy.on_exit(t0),
            RestartDecision::Retry(Duration::from_secs(2))
        );
        assert_eq!(
            policy.on_exit(t0 + Duration::from_secs(400)),
            RestartDecision::Retry(Duration::from_secs(4))
        );
        assert_eq!(
            policy.on_exit(t0 + Duration::from_secs(800)),
            RestartDecision::Retry(Duration::from_secs(8))
        );
    }

    #[test]
    fn test_delay_caps_at_max() {
        let mut policy = RestartPolicy::new();
        let t0 = Instant::now();

        let mut t = t0;
        let mut last = Duration::ZERO;
        for i in 0..10 {
            // Spread exits out so the pin window never fills
            t += PIN_WINDOW;
            match policy.on_exit(t + Duration::from_secs(i)) {
                RestartDecision::Retry(d) => last = d,
                RestartDecision::Pin => panic!("should not pin"),
            }
        }
        assert_eq!(last, MAX_DELAY);
    }

    #[test]
    fn test_pins_after_five_exits_in_window() {
        let mut policy = RestartPolicy::new();
        let t0 = Instant::now();

        for i in 0..4 {
            let d = policy.on_exit(t0 + Duration::from_secs(i * 10));
            assert!(matches!(d, RestartDecision::Retry(_)));
        }
        assert_eq!(
            policy.on_exit(t0 + Duration::from_secs(40)),
            RestartDecision::Pin
        );
    }

    #[test]
    fn test_exits_outside_window_do_not_pin() {
        let mut policy = RestartPolicy::new();
        let t0 = Instant::now();

        for i in 0..8 {
            let d = policy.on_exit(t0 + Duration::from_secs(i * 301));
            assert!(matches!(d, RestartDecision::Retry(_)));
        }
    }

    #[test]
    fn test_stable_run_resets_delay() {
        let mut policy = RestartPolicy::new();
        let t0 = Instant::now();

        policy.on_exit(t0);
        policy.on_exit(t0 + Duration::from_secs(1000));
        // Delay has grown past the initial value by now
        policy.on_running(t0 + Duration::from_secs(1100));

        // Ran continuously for over ten minutes before the next exit
        let d = policy.on_exit(t0 + Duration::from_secs(1100) + STABLE_RESET);
        assert_eq!(d, RestartDecision::Retry(INITIAL_DELAY));
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut policy = RestartPolicy::new();
        let t0 = Instant::now();

        for i in 0..4 {
            policy.on_exit(t0 + Duration::from_secs(i));
        }
        policy.clear();

        assert_eq!(
            policy.on_exit(t0 + Duration::from_secs(10)),
            RestartDecision::Retry(INITIAL_DELAY)
        );
    }
}
