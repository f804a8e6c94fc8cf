//! Backoff ladder shared by asynchronous field processing and asynchronous
//! input validation.
//!
//! The ladder is a fixed ascending table whose last rung repeats forever.
//! Sleeps are deadline based: the time that already passed since the last
//! attempt is credited against the next rung, so a retry never waits longer
//! than `last_attempt_at + rung`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

/// Default rungs in seconds.
pub const DEFAULT_LADDER_SECS: [u64; 4] = [3, 6, 12, 15];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryError {
    #[error("Backoff ladder must have at least one step")]
    EmptyLadder,

    #[error("Backoff ladder step {index} is not a finite non-negative duration")]
    InvalidStep { index: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffLadder {
    steps: Vec<Duration>,
}

impl BackoffLadder {
    pub fn new(steps: Vec<Duration>) -> Result<Self, RetryError> {
        if steps.is_empty() {
            return Err(RetryError::EmptyLadder);
        }
        Ok(Self { steps })
    }

    /// Builds a ladder from fractional seconds, as found in configuration.
    pub fn from_secs_f64(steps: &[f64]) -> Result<Self, RetryError> {
        let steps = steps
            .iter()
            .enumerate()
            .map(|(index, secs)| {
                Duration::try_from_secs_f64(*secs).map_err(|_| RetryError::InvalidStep { index })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(steps)
    }

    pub fn steps(&self) -> &[Duration] {
        &self.steps
    }

    /// Nominal wait after the `failure_number`-th consecutive failure
    /// (1-based). Failure zero waits nothing.
    pub fn delay_for(&self, failure_number: u32) -> Duration {
        if failure_number == 0 {
            return Duration::ZERO;
        }
        let index = (failure_number as usize - 1).min(self.steps.len() - 1);
        self.steps[index]
    }

    /// Remaining wait before the next attempt:
    /// `max(0, last_attempt_at + delay_for(n) - now)`.
    pub fn next_delay(
        &self,
        failure_number: u32,
        now: DateTime<Utc>,
        last_attempt_at: DateTime<Utc>,
    ) -> Duration {
        let rung = self.delay_for(failure_number);
        // A clock that went backwards credits nothing.
        let elapsed = (now - last_attempt_at).to_std().unwrap_or(Duration::ZERO);
        rung.saturating_sub(elapsed)
    }
}

impl Default for BackoffLadder {
    fn default() -> Self {
        Self {
            steps: DEFAULT_LADDER_SECS
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
        }
    }
}

/// Position on the ladder plus the time of the last attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetryState {
    failures: u32,
    last_attempt_at: Option<DateTime<Utc>>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.last_attempt_at
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.failures = self.failures.saturating_add(1);
        self.last_attempt_at = Some(now);
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.failures = 0;
        self.last_attempt_at = Some(now);
    }

    /// Wait still owed before the next attempt, `None` when the next attempt
    /// may run right away.
    pub fn remaining(&self, ladder: &BackoffLadder, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_attempt_at?;
        if self.failures == 0 {
            return None;
        }
        let remaining = ladder.next_delay(self.failures, now, last);
        if remaining.is_zero() {
            return None;
        }
        debug!(
            failures = self.failures,
            remaining_ms = remaining.as_millis() as u64,
            "backing off before retry"
        );
        Some(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn secs(value: u64) -> Duration {
        Duration::from_secs(value)
    }

    #[test]
    fn test_ladder_plateaus_on_last_step() {
        let ladder = BackoffLadder::default();
        let delays: Vec<Duration> = (1..=7).map(|n| ladder.delay_for(n)).collect();
        assert_eq!(
            delays,
            vec![secs(3), secs(6), secs(12), secs(15), secs(15), secs(15), secs(15)]
        );
        assert_eq!(ladder.delay_for(0), Duration::ZERO);
        assert_eq!(ladder.delay_for(u32::MAX), secs(15));
    }

    #[test]
    fn test_next_delay_credits_elapsed_time() {
        let ladder = BackoffLadder::default();
        let last = Utc::now();

        assert_eq!(ladder.next_delay(5, last, last), secs(15));
        assert_eq!(
            ladder.next_delay(5, last + TimeDelta::seconds(10), last),
            secs(5)
        );
        assert_eq!(
            ladder.next_delay(5, last + TimeDelta::seconds(40), last),
            Duration::ZERO
        );
        // Clock moved backwards: no credit, no overflow.
        assert_eq!(
            ladder.next_delay(1, last - TimeDelta::seconds(5), last),
            secs(3)
        );
    }

    #[test]
    fn test_retry_state_follows_ladder_under_frozen_clock() {
        let ladder = BackoffLadder::default();
        let now = Utc::now();
        let mut state = RetryState::new();
        assert_eq!(state.remaining(&ladder, now), None);

        let mut seen = Vec::new();
        for _ in 0..6 {
            state.record_failure(now);
            seen.push(state.remaining(&ladder, now).unwrap_or_default());
        }
        assert_eq!(
            seen,
            vec![secs(3), secs(6), secs(12), secs(15), secs(15), secs(15)]
        );

        // Credit does not move the ladder position.
        let later = now + TimeDelta::seconds(10);
        assert_eq!(state.remaining(&ladder, later), Some(secs(5)));
        state.record_failure(later);
        assert_eq!(state.remaining(&ladder, later), Some(secs(15)));

        state.record_success(later);
        assert_eq!(state.failures(), 0);
        assert_eq!(state.remaining(&ladder, later), None);
    }

    #[test]
    fn test_custom_ladder_validation() {
        assert_eq!(BackoffLadder::new(vec![]), Err(RetryError::EmptyLadder));
        assert_eq!(
            BackoffLadder::from_secs_f64(&[1.0, -2.0]),
            Err(RetryError::InvalidStep { index: 1 })
        );

        let ladder = BackoffLadder::from_secs_f64(&[0.5, 1.5]).expect("ladder");
        assert_eq!(ladder.delay_for(1), Duration::from_millis(500));
        assert_eq!(ladder.delay_for(9), Duration::from_millis(1500));
    }
}
