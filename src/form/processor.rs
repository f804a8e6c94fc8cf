//! Asynchronous field resolution with deadline-based backoff.
//!
//! A [`PendingRequest`] owns one result function and at most one in-flight
//! attempt. Attempts run on the ambient tokio runtime when one exists and
//! only hold a weak reference to the request, so dropping the last handle
//! stops the work. Without a runtime the attempt runs inline on the first
//! [`PendingRequest::process`] call.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use layout_core_types::{Clock, SystemClock, TaskSleeper, TokioSleeper};
use layout_event_bus::{StatusPublisher, StatusStream};
use layout_retry::{BackoffLadder, RetryState};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::field::FieldResult;

/// Resolution of an asynchronous field.
#[derive(Clone, Debug, PartialEq)]
pub enum PendingResult {
    Valid(FieldResult),
    Invalid,
    Error,
}

/// Outcome type a [`PendingRequest`] can resolve to.
pub trait Resolution: Clone + Send + Sync + 'static {
    /// Whether the outcome is transient and may be retried.
    fn is_error(&self) -> bool;

    /// Outcome recorded when the result function itself fails.
    fn failed() -> Self;
}

impl Resolution for PendingResult {
    fn is_error(&self) -> bool {
        matches!(self, PendingResult::Error)
    }

    fn failed() -> Self {
        PendingResult::Error
    }
}

type ResultFn<T> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// Builds pending requests that share a clock, a sleeper and a ladder.
#[derive(Clone)]
pub struct FieldProcessor {
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn TaskSleeper>,
    ladder: BackoffLadder,
}

impl Default for FieldProcessor {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            ladder: BackoffLadder::default(),
        }
    }
}

impl FieldProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn TaskSleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_ladder(mut self, ladder: BackoffLadder) -> Self {
        self.ladder = ladder;
        self
    }

    pub fn ladder(&self) -> &BackoffLadder {
        &self.ladder
    }

    pub(crate) fn sleeper(&self) -> Arc<dyn TaskSleeper> {
        self.sleeper.clone()
    }

    /// Starts resolving right away: the first attempt sleeps `process_delay`
    /// and then calls `result_fn`.
    pub fn submit<F, Fut>(&self, process_delay: Duration, result_fn: F) -> PendingRequest
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<PendingResult>> + Send + 'static,
    {
        self.request(StartMode::After(process_delay), result_fn)
    }

    pub(crate) fn request<T, F, Fut>(&self, mode: StartMode, result_fn: F) -> PendingRequest<T>
    where
        T: Resolution,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let result_fn: ResultFn<T> = Arc::new(move || result_fn().boxed());
        PendingRequest::start(
            RequestInner {
                clock: self.clock.clone(),
                sleeper: self.sleeper.clone(),
                ladder: self.ladder.clone(),
                result_fn,
                updates: StatusPublisher::new(None),
                state: Mutex::new(RequestState::default()),
            },
            mode,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StartMode {
    /// First attempt begins now, without an initial delay.
    Immediately,
    /// First attempt begins now and sleeps the given delay first.
    After(Duration),
    /// Nothing runs until the first `process` call.
    OnDemand,
}

struct InFlight {
    generation: u64,
    done: Shared<BoxFuture<'static, ()>>,
    abort: Option<AbortHandle>,
}

struct RequestState<T> {
    last_result: Option<T>,
    retry: RetryState,
    generation: u64,
    in_flight: Option<InFlight>,
}

impl<T> Default for RequestState<T> {
    fn default() -> Self {
        Self {
            last_result: None,
            retry: RetryState::new(),
            generation: 0,
            in_flight: None,
        }
    }
}

struct RequestInner<T: Resolution> {
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn TaskSleeper>,
    ladder: BackoffLadder,
    result_fn: ResultFn<T>,
    updates: StatusPublisher<Option<T>>,
    state: Mutex<RequestState<T>>,
}

impl<T: Resolution> RequestInner<T> {
    fn backoff_remaining(&self) -> Option<Duration> {
        let state = self.state.lock();
        state.retry.remaining(&self.ladder, self.clock.now())
    }

    fn finish(&self, generation: u64, outcome: T) {
        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(generation, current = state.generation, "discarding stale field result");
            return;
        }

        let now = self.clock.now();
        if outcome.is_error() {
            state.retry.record_failure(now);
        } else {
            state.retry.record_success(now);
        }
        state.last_result = Some(outcome.clone());
        state.in_flight = None;
        self.updates.publish(Some(outcome));
    }
}

impl<T: Resolution> Drop for RequestInner<T> {
    fn drop(&mut self) {
        if let Some(abort) = self
            .state
            .get_mut()
            .in_flight
            .take()
            .and_then(|in_flight| in_flight.abort)
        {
            abort.abort();
        }
    }
}

/// Handle to an asynchronously resolved result.
pub struct PendingRequest<T: Resolution = PendingResult> {
    inner: Arc<RequestInner<T>>,
}

impl<T: Resolution> Clone for PendingRequest<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Resolution> PendingRequest<T> {
    fn start(inner: RequestInner<T>, mode: StartMode) -> Self {
        let request = Self {
            inner: Arc::new(inner),
        };
        let initial_delay = match mode {
            StartMode::OnDemand => return request,
            StartMode::Immediately => None,
            StartMode::After(delay) => Some(delay),
        };
        {
            let mut state = request.inner.state.lock();
            start_attempt(&request.inner, &mut state, initial_delay);
        }
        request
    }

    /// Last resolution, `None` while unresolved or an attempt is running.
    pub fn result(&self) -> Option<T> {
        self.inner.state.lock().last_result.clone()
    }

    /// Replays the current result, then publishes every resolution.
    pub fn updates(&self) -> StatusStream<Option<T>> {
        self.inner.updates.subscribe()
    }

    pub fn failures(&self) -> u32 {
        self.inner.state.lock().retry.failures()
    }

    /// Resolves the request if needed. Concurrent callers share the
    /// in-flight attempt.
    pub async fn process(&self, retry_errors: bool) {
        let attempt = {
            let mut state = self.inner.state.lock();
            match &state.last_result {
                Some(result) if !result.is_error() => return,
                Some(_) if !retry_errors => return,
                _ => {}
            }
            match &state.in_flight {
                Some(in_flight) => in_flight.done.clone(),
                None => start_attempt(&self.inner, &mut state, None),
            }
        };
        attempt.await;
    }

    /// Starts an attempt unless one is running or a result is known.
    pub(crate) fn start_if_idle(&self) {
        let mut state = self.inner.state.lock();
        if state.in_flight.is_none() && state.last_result.is_none() {
            start_attempt(&self.inner, &mut state, None);
        }
    }

    /// Aborts the in-flight attempt. A result it still produces is discarded.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock();
        if let Some(in_flight) = state.in_flight.take() {
            if let Some(abort) = in_flight.abort {
                abort.abort();
            }
            state.generation += 1;
            debug!(generation = in_flight.generation, "cancelled pending request");
        }
    }

    pub(crate) fn downgrade(&self) -> WeakPendingRequest<T> {
        WeakPendingRequest {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

pub(crate) struct WeakPendingRequest<T: Resolution> {
    inner: Weak<RequestInner<T>>,
}

impl<T: Resolution> WeakPendingRequest<T> {
    pub(crate) fn upgrade(&self) -> Option<PendingRequest<T>> {
        self.inner.upgrade().map(|inner| PendingRequest { inner })
    }
}

fn start_attempt<T: Resolution>(
    inner: &Arc<RequestInner<T>>,
    state: &mut RequestState<T>,
    initial_delay: Option<Duration>,
) -> Shared<BoxFuture<'static, ()>> {
    state.generation += 1;
    state.last_result = None;
    let generation = state.generation;

    let attempt = run_attempt(Arc::downgrade(inner), generation, initial_delay).boxed();
    let (done, abort) = match Handle::try_current() {
        Ok(handle) => {
            let task = handle.spawn(attempt);
            let abort = task.abort_handle();
            let done = async move {
                let _ = task.await;
            }
            .boxed();
            (done, Some(abort))
        }
        Err(_) => (attempt, None),
    };

    let done = done.shared();
    state.in_flight = Some(InFlight {
        generation,
        done: done.clone(),
        abort,
    });
    done
}

async fn run_attempt<T: Resolution>(
    request: Weak<RequestInner<T>>,
    generation: u64,
    initial_delay: Option<Duration>,
) {
    let Some(sleeper) = request.upgrade().map(|inner| inner.sleeper.clone()) else {
        return;
    };
    if let Some(delay) = initial_delay.filter(|delay| !delay.is_zero()) {
        sleeper.sleep(delay).await;
    }

    let Some((backoff, result_fn)) = request
        .upgrade()
        .map(|inner| (inner.backoff_remaining(), inner.result_fn.clone()))
    else {
        return;
    };
    if let Some(backoff) = backoff {
        sleeper.sleep(backoff).await;
    }

    let outcome = match result_fn().await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(error = %err, "field result function failed");
            T::failed()
        }
    };

    if let Some(inner) = request.upgrade() {
        inner.finish(generation, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::field::FieldValue;
    use layout_core_types::testing::{ManualClock, RecordingSleeper};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn secs(value: u64) -> Duration {
        Duration::from_secs(value)
    }

    fn processor() -> (FieldProcessor, Arc<ManualClock>, Arc<RecordingSleeper>) {
        let clock = Arc::new(ManualClock::default());
        let sleeper = Arc::new(RecordingSleeper::new());
        let processor = FieldProcessor::new()
            .with_clock(clock.clone())
            .with_sleeper(sleeper.clone());
        (processor, clock, sleeper)
    }

    fn counting<R>(
        calls: &Arc<AtomicUsize>,
        result: R,
    ) -> impl Fn() -> futures::future::Ready<anyhow::Result<R>> + Send + Sync + 'static
    where
        R: Clone + Send + Sync + 'static,
    {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(result.clone()))
        }
    }

    #[tokio::test]
    async fn initial_delay_runs_before_first_attempt() {
        let (processor, _, sleeper) = processor();
        sleeper.pause();

        let request = processor.submit(secs(200), || async { Ok::<_, anyhow::Error>(PendingResult::Invalid) });
        assert_eq!(sleeper.wait_for_sleeps(1).await, vec![secs(200)]);
        assert_eq!(request.result(), None);

        sleeper.resume();
        request.process(false).await;
        assert_eq!(request.result(), Some(PendingResult::Invalid));
    }

    #[tokio::test]
    async fn terminal_results_are_never_retried() {
        let (processor, _, sleeper) = processor();
        let calls = Arc::new(AtomicUsize::new(0));
        let valid = PendingResult::Valid(FieldResult::new(FieldValue::Score(Some(100.into()))));

        let request = processor.submit(secs(1), counting(&calls, valid.clone()));
        for _ in 0..3 {
            request.process(true).await;
        }
        assert_eq!(request.result(), Some(valid));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let invalid = processor.submit(secs(1), counting(&calls, PendingResult::Invalid));
        for _ in 0..3 {
            invalid.process(true).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sleeper.sleeps(), vec![secs(1), secs(1)]);
    }

    #[tokio::test]
    async fn errors_retry_only_when_asked() {
        let (processor, _, _) = processor();
        let calls = Arc::new(AtomicUsize::new(0));

        let request = processor.submit(secs(1), counting(&calls, PendingResult::Error));
        request.process(false).await;
        request.process(false).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        request.process(true).await;
        request.process(true).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(request.result(), Some(PendingResult::Error));
        assert_eq!(request.failures(), 3);
    }

    #[tokio::test]
    async fn retry_sleeps_follow_the_ladder_with_deadline_credit() {
        let (processor, clock, sleeper) = processor();
        let calls = Arc::new(AtomicUsize::new(0));
        let request = processor.submit(secs(1), counting(&calls, PendingResult::Error));

        let expected: [u64; 6] = [1, 3, 6, 12, 15, 15];
        for index in 0..expected.len() {
            request.process(true).await;
            let seen: Vec<u64> = sleeper.sleeps().iter().map(Duration::as_secs).collect();
            assert_eq!(seen, expected[..=index].to_vec());
        }

        clock.advance(secs(10));
        request.process(true).await;
        assert_eq!(sleeper.sleeps().last(), Some(&secs(5)));

        request.process(true).await;
        assert_eq!(sleeper.sleeps().last(), Some(&secs(15)));
        assert_eq!(calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn every_resolution_is_published() {
        let (processor, _, _) = processor();
        let script = Arc::new(parking_lot::Mutex::new(VecDeque::from(vec![
            PendingResult::Error,
            PendingResult::Error,
            PendingResult::Invalid,
        ])));

        let request = processor.submit(secs(1), move || {
            let next = script.lock().pop_front().unwrap_or(PendingResult::Error);
            async move { Ok::<_, anyhow::Error>(next) }
        });

        let mut updates = request.updates();
        assert_eq!(updates.recv().await, Some(None));

        for expected in [PendingResult::Error, PendingResult::Error, PendingResult::Invalid] {
            request.process(true).await;
            assert_eq!(updates.recv().await, Some(Some(expected)));
        }
    }

    #[tokio::test]
    async fn concurrent_process_calls_share_one_attempt() {
        let (processor, _, sleeper) = processor();
        let calls = Arc::new(AtomicUsize::new(0));
        sleeper.pause();

        let request = processor.submit(secs(1), counting(&calls, PendingResult::Invalid));
        let first = request.clone();
        let second = request.clone();
        let joined = tokio::spawn(async move {
            futures::join!(first.process(true), second.process(true));
        });

        sleeper.wait_for_sleeps(1).await;
        sleeper.resume();
        joined.await.expect("join");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_result_function_resolves_to_error() {
        let (processor, _, _) = processor();
        let request = processor.submit(Duration::ZERO, || async {
            Err::<PendingResult, _>(anyhow::anyhow!("lookup failed"))
        });
        request.process(false).await;
        assert_eq!(request.result(), Some(PendingResult::Error));
    }

    #[tokio::test]
    async fn cancel_discards_the_in_flight_attempt() {
        let (processor, _, sleeper) = processor();
        let calls = Arc::new(AtomicUsize::new(0));
        sleeper.pause();

        let request = processor.submit(secs(5), counting(&calls, PendingResult::Invalid));
        sleeper.wait_for_sleeps(1).await;
        request.cancel();
        sleeper.resume();
        tokio::task::yield_now().await;
        assert_eq!(request.result(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        request.process(false).await;
        assert_eq!(request.result(), Some(PendingResult::Invalid));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn runs_inline_without_a_runtime() {
        let (processor, _, sleeper) = processor();
        let request = processor.submit(secs(2), || async { Ok::<_, anyhow::Error>(PendingResult::Invalid) });
        assert!(sleeper.sleeps().is_empty());

        tokio_test::block_on(request.process(false));
        assert_eq!(request.result(), Some(PendingResult::Invalid));
        assert_eq!(sleeper.sleeps(), vec![secs(2)]);
    }
}
