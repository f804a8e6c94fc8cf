//! Shared primitives for the layout runtime crates.
//!
//! Everything time related is injected: the backoff machinery reads a
//! [`Clock`] and suspends through a [`TaskSleeper`], and the environment reads
//! elapsed display time from a [`DisplayTimer`]. Deterministic doubles for all
//! three live in [`testing`] behind the `test-util` feature.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Wall-clock source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Suspends the current task for a duration.
#[async_trait]
pub trait TaskSleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by `tokio::time::sleep`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl TaskSleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Accumulates the time a layout has been on screen.
pub trait DisplayTimer: Send + Sync {
    fn start(&self);
    fn stop(&self);
    /// Total accumulated display time, including a currently running span.
    fn time(&self) -> Duration;
}

#[derive(Debug, Default)]
struct StopwatchState {
    running_since: Option<Instant>,
    accumulated: Duration,
}

/// Monotonic stopwatch implementation of [`DisplayTimer`].
#[derive(Debug, Default)]
pub struct StopwatchTimer {
    state: Mutex<StopwatchState>,
}

impl StopwatchTimer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DisplayTimer for StopwatchTimer {
    fn start(&self) {
        let mut state = self.state.lock();
        if state.running_since.is_none() {
            state.running_since = Some(Instant::now());
        }
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        if let Some(since) = state.running_since.take() {
            state.accumulated += since.elapsed();
        }
    }

    fn time(&self) -> Duration {
        let state = self.state.lock();
        let running = state
            .running_since
            .map(|since| since.elapsed())
            .unwrap_or_default();
        state.accumulated + running
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    //! Deterministic doubles for clocks, sleepers and timers.

    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeDelta, Utc};
    use parking_lot::Mutex;
    use tokio::sync::{watch, Notify};

    use crate::{Clock, DisplayTimer, TaskSleeper};

    /// Frozen clock that only moves when told to.
    #[derive(Debug)]
    pub struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                now: Mutex::new(start),
            }
        }

        pub fn advance(&self, by: Duration) {
            let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
            let mut now = self.now.lock();
            *now += delta;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(Utc::now())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }
    }

    /// Sleeper that records every requested duration and returns immediately,
    /// unless paused.
    #[derive(Debug)]
    pub struct RecordingSleeper {
        sleeps: Mutex<Vec<Duration>>,
        recorded: Notify,
        paused: watch::Sender<bool>,
    }

    impl Default for RecordingSleeper {
        fn default() -> Self {
            let (paused, _) = watch::channel(false);
            Self {
                sleeps: Mutex::new(Vec::new()),
                recorded: Notify::new(),
                paused,
            }
        }
    }

    impl RecordingSleeper {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().clone()
        }

        /// Holds every sleeper call until [`RecordingSleeper::resume`].
        pub fn pause(&self) {
            self.paused.send_replace(true);
        }

        pub fn resume(&self) {
            self.paused.send_replace(false);
        }

        /// Waits until at least `count` sleeps were requested.
        pub async fn wait_for_sleeps(&self, count: usize) -> Vec<Duration> {
            loop {
                let notified = self.recorded.notified();
                {
                    let sleeps = self.sleeps.lock();
                    if sleeps.len() >= count {
                        return sleeps.clone();
                    }
                }
                notified.await;
            }
        }
    }

    #[async_trait]
    impl TaskSleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().push(duration);
            self.recorded.notify_waiters();

            let mut gate = self.paused.subscribe();
            while *gate.borrow_and_update() {
                if gate.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    #[derive(Debug, Default)]
    struct ManualTimerState {
        time: Duration,
        started: bool,
        start_count: usize,
        stop_count: usize,
    }

    /// Timer whose elapsed time is set by the test.
    #[derive(Debug, Default)]
    pub struct ManualTimer {
        state: Mutex<ManualTimerState>,
    }

    impl ManualTimer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_time(&self, time: Duration) {
            self.state.lock().time = time;
        }

        pub fn is_started(&self) -> bool {
            self.state.lock().started
        }

        pub fn start_count(&self) -> usize {
            self.state.lock().start_count
        }

        pub fn stop_count(&self) -> usize {
            self.state.lock().stop_count
        }
    }

    impl DisplayTimer for ManualTimer {
        fn start(&self) {
            let mut state = self.state.lock();
            state.started = true;
            state.start_count += 1;
        }

        fn stop(&self) {
            let mut state = self.state.lock();
            state.started = false;
            state.stop_count += 1;
        }

        fn time(&self) -> Duration {
            self.state.lock().time
        }
    }
}
