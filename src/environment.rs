//! Environment coordinator for a displayed layout.
//!
//! Turns UI-originated calls into reporting events paired with a layout
//! context snapshot, drives the display timer from visibility edges and
//! sequences dismissal exactly once. No lock is held while the delegate or
//! a callback runs, so both may call back into the environment.

use std::any::Any;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use layout_core_types::DisplayTimer;
use layout_pager_tracker::PagerTracker;

use crate::actions::{ActionArguments, ActionResult, ActionRunner};
use crate::errors::FormError;
use crate::form::{
    form_event_payload, AttributeMutation, ChannelRegistration, FieldResult, FormState,
};
use crate::layout::{
    ButtonContext, FormContext, LayoutContext, LayoutState, PageInfo, PagerContext, PagerState,
};
use crate::registration::{self, RegistrationSink};
use crate::reporting::{
    ButtonTapEvent, DismissEvent, DismissKind, FormDisplayEvent, FormResult, FormResultEvent,
    GestureEvent, PageActionEvent, PageSwipeEvent, PageViewEvent, PagerCompletedEvent,
    ReportingEvent,
};

/// Receives everything the environment reports.
pub trait LayoutDelegate: Send + Sync {
    fn on_visibility_changed(&self, visible: bool, foregrounded: bool);

    fn on_reporting_event(&self, event: ReportingEvent, context: LayoutContext);

    fn on_dismissed(&self, cancel: bool);

    fn on_state_changed(&self, state: Value);
}

type DismissCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct EnvState {
    dismissed: bool,
    timer_running: bool,
}

pub struct LayoutEnvironment {
    delegate: Arc<dyn LayoutDelegate>,
    timer: Arc<dyn DisplayTimer>,
    pager_tracker: Arc<PagerTracker>,
    action_runner: Option<Arc<dyn ActionRunner>>,
    registration_sink: Option<Arc<dyn RegistrationSink>>,
    on_dismiss: Mutex<Option<DismissCallback>>,
    state: Mutex<EnvState>,
    retained: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl LayoutEnvironment {
    pub fn new(delegate: Arc<dyn LayoutDelegate>, timer: Arc<dyn DisplayTimer>) -> Self {
        Self {
            delegate,
            timer,
            pager_tracker: Arc::new(PagerTracker::new()),
            action_runner: None,
            registration_sink: None,
            on_dismiss: Mutex::new(None),
            state: Mutex::new(EnvState::default()),
            retained: DashMap::new(),
        }
    }

    /// Shares a tracker with other environments.
    pub fn with_pager_tracker(mut self, tracker: Arc<PagerTracker>) -> Self {
        self.pager_tracker = tracker;
        self
    }

    pub fn with_action_runner(mut self, runner: Arc<dyn ActionRunner>) -> Self {
        self.action_runner = Some(runner);
        self
    }

    pub fn with_registration_sink(mut self, sink: Arc<dyn RegistrationSink>) -> Self {
        self.registration_sink = Some(sink);
        self
    }

    /// Called once, after the dismissal was reported.
    pub fn with_on_dismiss<F>(self, on_dismiss: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        *self.on_dismiss.lock() = Some(Box::new(on_dismiss));
        self
    }

    pub fn pager_tracker(&self) -> &Arc<PagerTracker> {
        &self.pager_tracker
    }

    pub fn is_dismissed(&self) -> bool {
        self.state.lock().dismissed
    }

    pub fn on_visibility_changed(&self, visible: bool, foregrounded: bool) {
        self.delegate.on_visibility_changed(visible, foregrounded);

        let should_run = visible && foregrounded;
        let edge = {
            let mut state = self.state.lock();
            if state.dismissed || state.timer_running == should_run {
                None
            } else {
                state.timer_running = should_run;
                Some(should_run)
            }
        };

        match edge {
            Some(true) => {
                self.timer.start();
                debug!("display timer started");
            }
            Some(false) => {
                self.timer.stop();
                debug!(
                    display_time_ms = self.timer.time().as_millis() as u64,
                    "display timer stopped"
                );
            }
            None => {}
        }
    }

    pub fn form_displayed(&self, form: &FormState, layout: &LayoutState) {
        let event = FormDisplayEvent {
            form_identifier: form.identifier().to_string(),
            form_type: form.kind().type_name().to_string(),
            form_response_type: form.response_type().map(str::to_string),
        };
        let mut context = self.context(layout);
        context.form = Some(FormContext::from(form));
        self.report(ReportingEvent::FormDisplay(event), context);
    }

    /// Reports a form result and forwards its channel registrations and
    /// attribute edits.
    pub fn submit_form(
        &self,
        result: FormResult,
        channels: &[ChannelRegistration],
        attributes: &[AttributeMutation],
        layout: &LayoutState,
    ) {
        info!(form = %result.identifier, "form result reported");
        self.report(
            ReportingEvent::FormResult(FormResultEvent {
                forms: result.form_data,
            }),
            self.context(layout),
        );

        match &self.registration_sink {
            Some(sink) => registration::forward(sink.as_ref(), channels, attributes),
            None if !channels.is_empty() || !attributes.is_empty() => {
                debug!("no registration sink, dropping form registrations");
            }
            None => {}
        }
    }

    /// Submit handler for a form that reports through this environment.
    pub fn submit_handler(
        self: &Arc<Self>,
    ) -> impl Fn(&str, FieldResult, &LayoutState) -> Result<(), FormError> + Send + Sync + 'static
    {
        let environment: Weak<Self> = Arc::downgrade(self);
        move |identifier: &str, result: FieldResult, layout: &LayoutState| {
            let environment = environment
                .upgrade()
                .ok_or_else(|| FormError::Rejected("environment released".into()))?;
            let form_data = form_event_payload(identifier, &result.value)?;
            environment.submit_form(
                FormResult {
                    identifier: identifier.to_string(),
                    form_data,
                },
                &result.channels,
                &result.attributes,
                layout,
            );
            Ok(())
        }
    }

    pub fn button_tapped(&self, identifier: &str, metadata: Option<Value>, layout: &LayoutState) {
        self.report(
            ReportingEvent::ButtonTap(ButtonTapEvent {
                button_identifier: identifier.to_string(),
                reporting_metadata: metadata,
            }),
            self.context(layout),
        );
    }

    /// Feeds the tracker first so the context history includes the page
    /// that was just left.
    pub fn page_viewed(&self, pager: &PagerState, page: &PageInfo, layout: &LayoutState) {
        let event = PageViewEvent {
            identifier: pager.identifier.clone(),
            page_identifier: page.identifier.clone(),
            page_index: page.index,
            page_view_count: page.view_count,
            page_count: pager.page_count(),
            completed: pager.completed,
        };
        self.pager_tracker.on_page_view(&event, self.timer.time());

        let mut pager_context = self.pager_context(pager);
        pager_context.page_identifier = page.identifier.clone();
        pager_context.page_index = page.index;

        let mut context = self.context(layout);
        context.pager = Some(pager_context);
        self.report(ReportingEvent::PageView(event), context);
    }

    pub fn pager_completed(&self, pager: &PagerState, layout: &LayoutState) {
        let event = PagerCompletedEvent {
            pager_identifier: pager.identifier.clone(),
            page_index: pager.page_index,
            page_count: pager.page_count(),
            page_identifier: pager.page_identifier(pager.page_index),
        };
        let mut context = self.context(layout);
        context.pager = Some(self.pager_context(pager));
        self.report(ReportingEvent::PagerCompleted(event), context);
    }

    pub fn page_swiped(
        &self,
        pager: &PagerState,
        from: &PageInfo,
        to: &PageInfo,
        layout: &LayoutState,
    ) {
        let event = PageSwipeEvent {
            pager_identifier: pager.identifier.clone(),
            to_page_index: to.index,
            to_page_identifier: to.identifier.clone(),
            from_page_index: from.index,
            from_page_identifier: from.identifier.clone(),
        };
        let mut context = self.context(layout);
        context.pager = Some(self.pager_context(pager));
        self.report(ReportingEvent::PageSwipe(event), context);
    }

    pub fn page_gesture(
        &self,
        identifier: Option<&str>,
        metadata: Option<Value>,
        layout: &LayoutState,
    ) {
        let Some(identifier) = identifier else {
            return;
        };
        self.report(
            ReportingEvent::Gesture(GestureEvent {
                gesture_identifier: identifier.to_string(),
                reporting_metadata: metadata,
            }),
            self.context(layout),
        );
    }

    pub fn page_automated(
        &self,
        identifier: Option<&str>,
        metadata: Option<Value>,
        layout: &LayoutState,
    ) {
        let Some(identifier) = identifier else {
            return;
        };
        self.report(
            ReportingEvent::PageAction(PageActionEvent {
                action_identifier: identifier.to_string(),
                reporting_metadata: metadata,
            }),
            self.context(layout),
        );
    }

    pub fn dismiss(&self, cancel: bool, layout: Option<&LayoutState>) {
        self.try_dismiss(DismissKind::UserDismissed, cancel, layout);
    }

    pub fn dismiss_with_button(
        &self,
        identifier: &str,
        description: &str,
        cancel: bool,
        layout: &LayoutState,
    ) {
        self.try_dismiss(
            DismissKind::ButtonTapped {
                button_identifier: identifier.to_string(),
                button_description: description.to_string(),
            },
            cancel,
            Some(layout),
        );
    }

    pub fn timed_out(&self, layout: Option<&LayoutState>) {
        self.try_dismiss(DismissKind::TimedOut, false, layout);
    }

    pub fn on_state_change(&self, state: Value) {
        self.delegate.on_state_changed(state);
    }

    /// Environment-owned state keyed by identifier. The same identifier
    /// yields the same instance for as long as the type matches.
    pub fn retrieve_state<T, F>(&self, identifier: &str, make: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.retained.get(identifier) {
            if let Ok(state) = existing.value().clone().downcast::<T>() {
                return state;
            }
            warn!(identifier, "retained state has a different type, replacing it");
        }

        let state = Arc::new(make());
        self.retained.insert(identifier.to_string(), state.clone());
        state
    }

    /// Hands an actions payload to the runner without waiting.
    pub fn run_actions(&self, actions: Option<&Value>, layout: Option<&LayoutState>) {
        let Some(actions) = actions.filter(|actions| !is_empty_payload(actions)) else {
            return;
        };
        let Some(runner) = &self.action_runner else {
            debug!("no action runner, dropping actions");
            return;
        };
        runner.run_async(actions, &self.optional_context(layout));
    }

    pub async fn run_action(
        &self,
        name: &str,
        arguments: ActionArguments,
        layout: Option<&LayoutState>,
    ) -> ActionResult {
        let Some(runner) = self.action_runner.clone() else {
            warn!(action = name, "no action runner installed");
            return ActionResult::ActionNotFound;
        };
        let context = self.optional_context(layout);
        runner.run(name, arguments, &context).await
    }

    fn try_dismiss(&self, kind: DismissKind, cancel: bool, layout: Option<&LayoutState>) {
        {
            let mut state = self.state.lock();
            if state.dismissed {
                debug!("already dismissed");
                return;
            }
            state.dismissed = true;
            state.timer_running = false;
        }

        self.timer.stop();
        let display_time = self.timer.time();
        self.pager_tracker.stop_all(display_time);

        let context = self.optional_context(layout);
        for summary in self.pager_tracker.summary() {
            if summary.viewed_pages.is_empty() {
                continue;
            }
            self.report(ReportingEvent::PagerSummary(summary), context.clone());
        }

        info!(
            reason = ?kind,
            cancel,
            display_time_ms = display_time.as_millis() as u64,
            "layout dismissed"
        );
        self.report(
            ReportingEvent::Dismiss(DismissEvent { kind, display_time }),
            context,
        );
        self.delegate.on_dismissed(cancel);

        let on_dismiss = self.on_dismiss.lock().take();
        if let Some(on_dismiss) = on_dismiss {
            on_dismiss();
        }
    }

    fn report(&self, event: ReportingEvent, context: LayoutContext) {
        debug!(event = event.name(), "reporting event");
        self.delegate.on_reporting_event(event, context);
    }

    fn pager_context(&self, pager: &PagerState) -> PagerContext {
        PagerContext::new(pager, self.pager_tracker.viewed_pages(&pager.identifier))
    }

    fn context(&self, layout: &LayoutState) -> LayoutContext {
        LayoutContext {
            pager: layout.pager.as_ref().map(|pager| self.pager_context(pager)),
            form: layout.form.as_ref().map(FormContext::from),
            button: layout.button.as_ref().map(ButtonContext::from),
        }
    }

    fn optional_context(&self, layout: Option<&LayoutState>) -> LayoutContext {
        layout.map(|layout| self.context(layout)).unwrap_or_default()
    }
}

fn is_empty_payload(actions: &Value) -> bool {
    match actions {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
