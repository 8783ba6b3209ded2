//! Reconnect backoff for a single account.
//!
//! Pure and deterministic: the caller owns the [`BackoffState`], feeds it
//! through [`BackoffPolicy::on_failure`] after each failed connection, and
//! replaces it with [`BackoffPolicy::on_success`] once a session is
//! authenticated. No jitter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_FLOOR: Duration = Duration::from_secs(5);
pub const DEFAULT_CEILING: Duration = Duration::from_secs(300);

/// `delay = min(ceiling, floor * 2^attempt)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub floor: Duration,
    pub ceiling: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            floor: DEFAULT_FLOOR,
            ceiling: DEFAULT_CEILING,
        }
    }
}

/// Consecutive-failure bookkeeping. `attempt` is the number of failures
/// already answered with a delay since the last success.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffState {
    pub attempt: u32,
    pub current_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling: ceiling.max(floor),
        }
    }

    /// Delay for the given zero-based attempt, saturating at the ceiling.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.floor.checked_mul(factor))
            .map_or(self.ceiling, |d| d.min(self.ceiling))
    }

    /// Record a failure: returns the delay to wait and the next state.
    #[must_use]
    pub fn on_failure(&self, state: BackoffState) -> (Duration, BackoffState) {
        let delay = self.delay_for(state.attempt);
        let next = BackoffState {
            attempt: state.attempt.saturating_add(1),
            current_delay: delay,
        };
        (delay, next)
    }

    /// Record a successful connection.
    #[must_use]
    pub fn on_success(&self) -> BackoffState {
        BackoffState::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sequence_doubles_to_ceiling() {
        let policy = BackoffPolicy::default();
        let mut state = BackoffState::default();
        let mut delays = Vec::new();
        for _ in 0..9 {
            let (delay, next) = policy.on_failure(state);
            delays.push(delay.as_secs());
            state = next;
        }
        assert_eq!(delays, vec![5, 10, 20, 40, 80, 160, 300, 300, 300]);
        assert_eq!(state.attempt, 9);
        assert_eq!(state.current_delay, Duration::from_secs(300));
    }

    #[test]
    fn delays_never_decrease_across_failures() {
        let policy = BackoffPolicy::new(Duration::from_millis(700), Duration::from_secs(45));
        let mut state = BackoffState::default();
        let mut prev = Duration::ZERO;
        for _ in 0..100 {
            let (delay, next) = policy.on_failure(state);
            assert!(delay >= prev, "{delay:?} < {prev:?}");
            assert!(delay <= policy.ceiling);
            prev = delay;
            state = next;
        }
    }

    #[test]
    fn success_resets_to_floor() {
        let policy = BackoffPolicy::default();
        let mut state = BackoffState::default();
        for _ in 0..5 {
            state = policy.on_failure(state).1;
        }
        assert_eq!(state.current_delay, Duration::from_secs(80));

        state = policy.on_success();
        assert_eq!(state.attempt, 0);
        assert_eq!(state.current_delay, Duration::ZERO);

        let (delay, _) = policy.on_failure(state);
        assert_eq!(delay, policy.floor);
    }

    #[test]
    fn huge_attempt_saturates() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(31), DEFAULT_CEILING);
        assert_eq!(policy.delay_for(u32::MAX), DEFAULT_CEILING);
        let state = BackoffState {
            attempt: u32::MAX,
            current_delay: DEFAULT_CEILING,
        };
        let (delay, next) = policy.on_failure(state);
        assert_eq!(delay, DEFAULT_CEILING);
        assert_eq!(next.attempt, u32::MAX);
    }

    #[test]
    fn ceiling_below_floor_is_lifted() {
        let policy = BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(policy.delay_for(0), Duration::from_secs(10));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
    }
}
