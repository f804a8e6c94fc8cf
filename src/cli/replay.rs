use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use layout_runtime::form::PendingResult;
use layout_runtime::{
    DisplayTimer, FieldProcessor, FieldResult, FormField, FormState, LayoutContext,
    LayoutDelegate, LayoutEnvironment, LayoutState, PageInfo, PagerState, ReportingEvent,
    RuntimeConfig, SystemClock, TokioSleeper,
};

use super::scenario::{FieldOutcome, Scenario, Step};

#[derive(Args, Clone, Debug)]
pub struct ReplayArgs {
    /// Scenario file (YAML)
    pub scenario: PathBuf,
}

pub async fn cmd_replay(args: ReplayArgs, config: &RuntimeConfig) -> Result<()> {
    let scenario = Scenario::load(&args.scenario).await?;
    info!(
        scenario = %args.scenario.display(),
        steps = scenario.steps.len(),
        "replaying scenario"
    );

    let delegate = Arc::new(JsonLinesDelegate::new(Box::new(std::io::stdout())));
    let mut replay = Replay::new(scenario, config, delegate)?;
    replay.run().await
}

/// Display timer driven by `advance` steps instead of the wall clock.
#[derive(Debug, Default)]
pub struct ScriptedTimer {
    state: Mutex<(bool, Duration)>,
}

impl ScriptedTimer {
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        if state.0 {
            state.1 += by;
        }
    }
}

impl DisplayTimer for ScriptedTimer {
    fn start(&self) {
        self.state.lock().0 = true;
    }

    fn stop(&self) {
        self.state.lock().0 = false;
    }

    fn time(&self) -> Duration {
        self.state.lock().1
    }
}

/// Writes one JSON object per line for everything the environment reports.
pub struct JsonLinesDelegate {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesDelegate {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn emit(&self, line: Value) {
        let mut out = self.out.lock();
        if let Err(err) = writeln!(out, "{line}") {
            warn!(error = %err, "failed to write replay output");
        }
    }
}

impl LayoutDelegate for JsonLinesDelegate {
    fn on_visibility_changed(&self, visible: bool, foregrounded: bool) {
        debug!(visible, foregrounded, "visibility changed");
    }

    fn on_reporting_event(&self, event: ReportingEvent, context: LayoutContext) {
        self.emit(json!({ "event": event, "context": context }));
    }

    fn on_dismissed(&self, cancel: bool) {
        self.emit(json!({ "dismissed": { "cancel": cancel } }));
    }

    fn on_state_changed(&self, state: Value) {
        self.emit(json!({ "state": state }));
    }
}

struct PagerCursor {
    state: PagerState,
    view_counts: Vec<usize>,
}

impl PagerCursor {
    fn page(&self, index: usize) -> Result<PageInfo> {
        if index >= self.state.page_count() {
            bail!(
                "page {index} out of range for pager {} ({} pages)",
                self.state.identifier,
                self.state.page_count()
            );
        }
        Ok(PageInfo {
            identifier: self.state.page_identifier(index),
            index,
            view_count: self.view_counts[index],
        })
    }
}

pub struct Replay {
    steps: Vec<Step>,
    environment: Arc<LayoutEnvironment>,
    timer: Arc<ScriptedTimer>,
    processor: FieldProcessor,
    process_delay: Duration,
    pager: Option<PagerCursor>,
    form: Option<FormState>,
}

impl Replay {
    pub fn new(
        scenario: Scenario,
        config: &RuntimeConfig,
        delegate: Arc<dyn LayoutDelegate>,
    ) -> Result<Self> {
        let timer = Arc::new(ScriptedTimer::default());
        let environment = Arc::new(LayoutEnvironment::new(delegate, timer.clone()));
        let processor = config
            .field_processor(Arc::new(SystemClock), Arc::new(TokioSleeper))
            .context("Invalid backoff ladder")?;

        let pager = scenario.pager.map(|setup| {
            let view_counts = vec![0; setup.pages.len()];
            PagerCursor {
                state: PagerState::new(setup.identifier, setup.pages),
                view_counts,
            }
        });
        let form = scenario.form.map(|setup| {
            let form = FormState::new(
                setup.identifier,
                setup.kind,
                setup.response_type,
                setup.validation,
            );
            form.set_validation_timing(
                config.validation_timing(Arc::new(SystemClock), Arc::new(TokioSleeper)),
            );
            form.set_submit_handler(environment.submit_handler());
            form
        });

        Ok(Self {
            steps: scenario.steps,
            environment,
            timer,
            processor,
            process_delay: config.process_delay(),
            pager,
            form,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        let steps = std::mem::take(&mut self.steps);
        for (index, step) in steps.into_iter().enumerate() {
            debug!(step = index, ?step, "applying step");
            self.apply(step)
                .await
                .with_context(|| format!("step {index} failed"))?;
        }
        Ok(())
    }

    fn layout(&self) -> LayoutState {
        LayoutState {
            form: self.form.clone(),
            pager: self.pager.as_ref().map(|pager| pager.state.clone()),
            button: None,
        }
    }

    fn pager_mut(&mut self) -> Result<&mut PagerCursor> {
        self.pager.as_mut().context("scenario has no pager")
    }

    fn form(&self) -> Result<&FormState> {
        self.form.as_ref().context("scenario has no form")
    }

    async fn apply(&mut self, step: Step) -> Result<()> {
        let env = self.environment.clone();
        match step {
            Step::Visibility {
                visible,
                foregrounded,
            } => env.on_visibility_changed(visible, foregrounded),
            Step::Advance { seconds } => {
                let by = Duration::try_from_secs_f64(seconds)
                    .with_context(|| format!("invalid advance of {seconds} seconds"))?;
                self.timer.advance(by);
            }
            Step::PageView { index } => {
                let pager = self.pager_mut()?;
                pager.page(index)?;
                pager.view_counts[index] += 1;
                pager.state.page_index = index;
                if index + 1 == pager.state.page_count() {
                    pager.state.completed = true;
                }
                let page = pager.page(index)?;
                let pager_state = pager.state.clone();
                env.page_viewed(&pager_state, &page, &self.layout());
            }
            Step::PageSwipe { from, to } => {
                let pager = self.pager_mut()?;
                let (from, to) = (pager.page(from)?, pager.page(to)?);
                let pager_state = pager.state.clone();
                env.page_swiped(&pager_state, &from, &to, &self.layout());
            }
            Step::PagerCompleted => {
                let pager_state = self.pager_mut()?.state.clone();
                env.pager_completed(&pager_state, &self.layout());
            }
            Step::ButtonTap {
                identifier,
                metadata,
            } => env.button_tapped(&identifier, metadata, &self.layout()),
            Step::Gesture {
                identifier,
                metadata,
            } => env.page_gesture(identifier.as_deref(), metadata, &self.layout()),
            Step::Automated {
                identifier,
                metadata,
            } => env.page_automated(identifier.as_deref(), metadata, &self.layout()),
            Step::FormDisplayed => {
                let form = self.form()?;
                env.form_displayed(form, &self.layout());
            }
            Step::Field {
                identifier,
                value,
                outcome,
            } => {
                let field = match outcome {
                    FieldOutcome::Valid => {
                        FormField::valid(identifier, value.clone(), FieldResult::new(value))
                    }
                    FieldOutcome::Invalid => FormField::invalid(identifier, value),
                    FieldOutcome::Pending => {
                        let result = FieldResult::new(value.clone());
                        let request = self.processor.submit(self.process_delay, move || {
                            let result = result.clone();
                            async move { Ok(PendingResult::Valid(result)) }
                        });
                        FormField::pending(identifier, value, request)
                    }
                };
                self.form()?.update_field(field, None);
            }
            Step::SubmitForm => {
                let form = self.form()?.clone();
                if let Err(err) = form.submit(&self.layout()).await {
                    warn!(form = form.identifier(), error = %err, "form submission failed");
                }
            }
            Step::State { value } => env.on_state_change(value),
            Step::Dismiss { cancel, button } => match button {
                Some(button) => env.dismiss_with_button(
                    &button.identifier,
                    &button.description,
                    cancel,
                    &self.layout(),
                ),
                None => env.dismiss(cancel, Some(&self.layout())),
            },
            Step::TimedOut => env.timed_out(Some(&self.layout())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn lines(&self) -> Vec<Value> {
            let bytes = self.0.lock().clone();
            String::from_utf8(bytes)
                .expect("utf8")
                .lines()
                .map(|line| serde_json::from_str(line).expect("json line"))
                .collect()
        }
    }

    #[test]
    fn scripted_timer_only_accumulates_while_running() {
        let timer = ScriptedTimer::default();
        timer.advance(Duration::from_secs(5));
        timer.start();
        timer.advance(Duration::from_secs(2));
        timer.stop();
        timer.advance(Duration::from_secs(5));
        assert_eq!(timer.time(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn replays_pages_form_and_dismissal() {
        let scenario = Scenario::from_yaml(
            r#"
pager:
  identifier: onboarding
  pages: [welcome, done]
form:
  identifier: signup
steps:
  - action: visibility
    visible: true
  - action: page_view
    index: 0
  - action: advance
    seconds: 4
  - action: page_view
    index: 1
  - action: field
    identifier: email
    value: { type: email, value: "a@b.c" }
  - action: submit_form
  - action: advance
    seconds: 1.5
  - action: dismiss
    button: { identifier: close, description: Close }
"#,
        )
        .expect("scenario");

        let buffer = SharedBuffer::default();
        let delegate = Arc::new(JsonLinesDelegate::new(Box::new(buffer.clone())));
        let mut replay = Replay::new(scenario, &RuntimeConfig::default(), delegate).expect("replay");
        replay.run().await.expect("run");

        let lines = buffer.lines();
        let types: Vec<&str> = lines
            .iter()
            .filter_map(|line| line["event"]["type"].as_str())
            .collect();
        assert_eq!(
            types,
            vec!["page_view", "page_view", "form_result", "pager_summary", "dismiss"]
        );

        let summary = &lines[3]["event"]["data"];
        assert_eq!(summary["viewed_pages"].as_array().map(Vec::len), Some(2));
        let dismiss = &lines[4]["event"]["data"];
        assert_eq!(dismiss["reason"], "button_tapped");
        assert_eq!(dismiss["display_time"], "5.50");
        assert_eq!(lines[5], json!({ "dismissed": { "cancel": false } }));
        assert_eq!(lines[2]["context"]["form"]["status"], "valid");
    }

    #[tokio::test]
    async fn out_of_range_pages_fail_the_step() {
        let scenario = Scenario::from_yaml(
            "pager:\n  identifier: p\n  pages: [one]\nsteps:\n  - action: page_view\n    index: 3\n",
        )
        .expect("scenario");
        let buffer = SharedBuffer::default();
        let delegate = Arc::new(JsonLinesDelegate::new(Box::new(buffer.clone())));
        let mut replay = Replay::new(scenario, &RuntimeConfig::default(), delegate).expect("replay");

        let err = replay.run().await.expect_err("out of range");
        assert!(format!("{err:#}").contains("out of range"));
    }
}
