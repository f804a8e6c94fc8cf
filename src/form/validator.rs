//! Input validators for text-like fields.

use std::future::Future;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;

use super::processor::{FieldProcessor, PendingRequest, Resolution, StartMode};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid,
    Error,
}

impl Resolution for ValidationResult {
    fn is_error(&self) -> bool {
        matches!(self, ValidationResult::Error)
    }

    fn failed() -> Self {
        ValidationResult::Error
    }
}

impl From<bool> for ValidationResult {
    fn from(valid: bool) -> Self {
        if valid {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid
        }
    }
}

/// When an asynchronous validator starts before anyone asks for a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EarlyValidation {
    Never,
    Delay(Duration),
}

pub enum InputValidator {
    Just(ValidationResult),
    Async {
        request: PendingRequest<ValidationResult>,
        schedule: Mutex<Option<AbortHandle>>,
    },
}

impl std::fmt::Debug for InputValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputValidator::Just(result) => f.debug_tuple("Just").field(result).finish(),
            InputValidator::Async { request, .. } => f
                .debug_struct("Async")
                .field("result", &request.result())
                .finish(),
        }
    }
}

impl InputValidator {
    pub fn just(valid: bool) -> Self {
        InputValidator::Just(valid.into())
    }

    /// Validator backed by `block`, retried on the processor's ladder when
    /// it fails.
    pub fn asynchronous<F, Fut>(early: EarlyValidation, processor: &FieldProcessor, block: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let validate = move || {
            let attempt = block();
            async move { attempt.await.map(ValidationResult::from) }
        };

        let (request, schedule) = match early {
            EarlyValidation::Never => (processor.request(StartMode::OnDemand, validate), None),
            EarlyValidation::Delay(delay) if delay.is_zero() => {
                (processor.request(StartMode::Immediately, validate), None)
            }
            EarlyValidation::Delay(delay) => {
                let request = processor.request(StartMode::OnDemand, validate);
                let schedule = schedule_early(&request, processor, delay);
                (request, schedule)
            }
        };

        InputValidator::Async {
            request,
            schedule: Mutex::new(schedule),
        }
    }

    pub fn result(&self) -> Option<ValidationResult> {
        match self {
            InputValidator::Just(result) => Some(*result),
            InputValidator::Async { request, .. } => request.result(),
        }
    }

    pub fn updates(&self) -> BoxStream<'static, Option<ValidationResult>> {
        match self {
            InputValidator::Just(result) => stream::once(futures::future::ready(Some(*result))).boxed(),
            InputValidator::Async { request, .. } => request.updates().boxed(),
        }
    }

    /// Validates now, cancelling a scheduled early start. A previous error
    /// is validated again only when `retry_errors` is set.
    pub async fn process(&self, retry_errors: bool) {
        if let InputValidator::Async { request, schedule } = self {
            if let Some(scheduled) = schedule.lock().take() {
                scheduled.abort();
            }
            request.process(retry_errors).await;
        }
    }

    /// Validates now, retrying a previous error.
    pub async fn wait_result(&self) -> Option<ValidationResult> {
        self.process(true).await;
        self.result()
    }
}

impl Drop for InputValidator {
    fn drop(&mut self) {
        if let InputValidator::Async { schedule, .. } = self {
            if let Some(scheduled) = schedule.get_mut().take() {
                scheduled.abort();
            }
        }
    }
}

fn schedule_early(
    request: &PendingRequest<ValidationResult>,
    processor: &FieldProcessor,
    delay: Duration,
) -> Option<AbortHandle> {
    let Ok(handle) = Handle::try_current() else {
        debug!("no runtime for early validation, validating on demand");
        return None;
    };

    let weak = request.downgrade();
    let sleeper = processor.sleeper();
    let task = handle.spawn(async move {
        sleeper.sleep(delay).await;
        if let Some(request) = weak.upgrade() {
            request.start_if_idle();
        }
    });
    Some(task.abort_handle())
}

#[cfg(test)]
mod tests {
    use super::*;
    use layout_core_types::testing::{ManualClock, RecordingSleeper};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn processor(sleeper: &Arc<RecordingSleeper>) -> FieldProcessor {
        FieldProcessor::new()
            .with_clock(Arc::new(ManualClock::default()))
            .with_sleeper(sleeper.clone())
    }

    #[tokio::test]
    async fn just_validators_are_resolved() {
        assert_eq!(InputValidator::just(true).result(), Some(ValidationResult::Valid));
        let invalid = InputValidator::just(false);
        assert_eq!(invalid.wait_result().await, Some(ValidationResult::Invalid));
    }

    #[tokio::test]
    async fn never_waits_for_the_first_request() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let validator = InputValidator::asynchronous(EarlyValidation::Never, &processor(&sleeper), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, anyhow::Error>(true) }
        });

        tokio::task::yield_now().await;
        assert_eq!(validator.result(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(validator.wait_result().await, Some(ValidationResult::Valid));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn delayed_early_validation_starts_after_the_delay() {
        let sleeper = Arc::new(RecordingSleeper::new());
        sleeper.pause();
        let validator = InputValidator::asynchronous(
            EarlyValidation::Delay(Duration::from_secs(1)),
            &processor(&sleeper),
            || async { Ok::<_, anyhow::Error>(false) },
        );
        let mut updates = validator.updates();
        assert_eq!(updates.next().await, Some(None));

        assert_eq!(sleeper.wait_for_sleeps(1).await, vec![Duration::from_secs(1)]);
        assert_eq!(validator.result(), None);

        sleeper.resume();
        assert_eq!(updates.next().await, Some(Some(ValidationResult::Invalid)));
    }

    #[tokio::test]
    async fn wait_result_cancels_the_scheduled_start() {
        let sleeper = Arc::new(RecordingSleeper::new());
        sleeper.pause();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let validator = InputValidator::asynchronous(
            EarlyValidation::Delay(Duration::from_secs(30)),
            &processor(&sleeper),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, anyhow::Error>(true) }
            },
        );
        sleeper.wait_for_sleeps(1).await;
        sleeper.resume();

        assert_eq!(validator.wait_result().await, Some(ValidationResult::Valid));
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_retry_on_the_next_wait() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let validator = InputValidator::asynchronous(
            EarlyValidation::Delay(Duration::ZERO),
            &processor(&sleeper),
            move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        anyhow::bail!("validation backend unavailable");
                    }
                    Ok(true)
                }
            },
        );

        assert_eq!(validator.wait_result().await, Some(ValidationResult::Error));
        assert_eq!(validator.wait_result().await, Some(ValidationResult::Valid));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(3)]);
    }
}
