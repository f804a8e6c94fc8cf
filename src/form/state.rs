//! Hierarchical form validation state machine.
//!
//! A form keeps its fields in first-insertion order, each with an optional
//! applicability predicate, plus a recorded validation result per field.
//! Status is derived from the recorded results of the active fields:
//!
//! * any active `Invalid` makes the form `Invalid`,
//! * otherwise any active pending or errored result makes it
//!   `PendingValidation`,
//! * otherwise it is `Valid`.
//!
//! In immediate mode a mutation that leaves an active field unresolved runs
//! a full validation in the background. Every evaluation carries a
//! generation number; only the newest evaluation may apply its outcome.
//!
//! A validation that has to wait for unresolved fields stays `Validating`
//! for at least the configured [`ValidationTiming::min_duration`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use layout_core_types::{Clock, SystemClock, TaskSleeper, TokioSleeper};
use layout_event_bus::{StatusPublisher, StatusStream};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, info};

use super::field::{FieldResult, FieldStatus, FieldValue, FormField};
use super::payload::form_state_payload;
use super::registry::{FormNodeId, FormRegistry};
use crate::errors::FormError;
use crate::layout::LayoutState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormKind {
    Form,
    Nps { score_id: String },
}

impl FormKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            FormKind::Form => "form",
            FormKind::Nps { .. } => "nps",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    Immediate,
    #[default]
    OnDemand,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormStatus {
    PendingValidation,
    Validating,
    Valid,
    Invalid,
    Submitted,
}

impl FormStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormStatus::PendingValidation => "pending_validation",
            FormStatus::Validating => "validating",
            FormStatus::Valid => "valid",
            FormStatus::Invalid => "invalid",
            FormStatus::Submitted => "submitted",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChildResult {
    Pending,
    Valid,
    Invalid,
    Error,
}

impl ChildResult {
    fn is_unresolved(&self) -> bool {
        matches!(self, ChildResult::Pending | ChildResult::Error)
    }
}

impl From<&FieldStatus> for ChildResult {
    fn from(status: &FieldStatus) -> Self {
        match status {
            FieldStatus::Valid(_) => ChildResult::Valid,
            FieldStatus::Invalid => ChildResult::Invalid,
            // Still pending after processing means the attempt was dropped.
            FieldStatus::Pending | FieldStatus::Error => ChildResult::Error,
        }
    }
}

/// Minimum duration of a validation that waits on unresolved fields.
#[derive(Clone)]
pub struct ValidationTiming {
    pub min_duration: Duration,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn TaskSleeper>,
}

impl Default for ValidationTiming {
    fn default() -> Self {
        Self::new(Duration::ZERO, Arc::new(SystemClock), Arc::new(TokioSleeper))
    }
}

impl ValidationTiming {
    pub fn new(min_duration: Duration, clock: Arc<dyn Clock>, sleeper: Arc<dyn TaskSleeper>) -> Self {
        Self {
            min_duration,
            clock,
            sleeper,
        }
    }

    async fn hold(&self, started: DateTime<Utc>) {
        if self.min_duration.is_zero() {
            return;
        }
        let elapsed = self
            .clock
            .now()
            .signed_duration_since(started)
            .to_std()
            .unwrap_or_default();
        if let Some(remaining) = self.min_duration.checked_sub(elapsed).filter(|left| !left.is_zero()) {
            debug!(remaining_ms = remaining.as_millis() as u64, "holding validation");
            self.sleeper.sleep(remaining).await;
        }
    }
}

/// Whether a field currently applies.
pub type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Receives `(form_identifier, merged_result, layout_state)` on submit.
type SubmitHandler =
    Arc<dyn Fn(&str, FieldResult, &LayoutState) -> Result<(), FormError> + Send + Sync>;

struct Child {
    field: FormField,
    predicate: Option<Predicate>,
}

#[derive(Default)]
struct FormData {
    children: Vec<Child>,
    recorded: HashMap<String, ChildResult>,
    active: Vec<String>,
    generation: u64,
}

struct FormInner {
    identifier: String,
    kind: FormKind,
    response_type: Option<String>,
    mode: ValidationMode,
    registry: FormRegistry,
    node: FormNodeId,
    /// Keeps the parent's registry node alive while this form exists.
    _parent: Option<FormState>,
    status: StatusPublisher<FormStatus>,
    data: Mutex<FormData>,
    timing: Mutex<ValidationTiming>,
    on_submit: Mutex<Option<SubmitHandler>>,
}

impl Drop for FormInner {
    fn drop(&mut self) {
        self.registry.remove(self.node);
    }
}

/// Shared handle to a form. Clones observe and mutate the same form.
#[derive(Clone)]
pub struct FormState {
    inner: Arc<FormInner>,
}

impl std::fmt::Debug for FormState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormState")
            .field("identifier", &self.inner.identifier)
            .field("kind", &self.inner.kind)
            .field("status", &self.status())
            .finish()
    }
}

impl FormState {
    pub fn new(
        identifier: impl Into<String>,
        kind: FormKind,
        response_type: Option<String>,
        mode: ValidationMode,
    ) -> Self {
        let registry = FormRegistry::new();
        let node = registry.insert(None);
        Self::with_node(identifier.into(), kind, response_type, mode, registry, node, None)
    }

    /// Nested form whose input enablement and visibility follow `parent`.
    pub fn new_child(
        parent: &FormState,
        identifier: impl Into<String>,
        kind: FormKind,
        response_type: Option<String>,
        mode: ValidationMode,
    ) -> Self {
        let registry = parent.inner.registry.clone();
        let node = registry.insert(Some(parent.inner.node));
        let child = Self::with_node(
            identifier.into(),
            kind,
            response_type,
            mode,
            registry,
            node,
            Some(parent.clone()),
        );
        child.set_validation_timing(parent.inner.timing.lock().clone());
        child
    }

    fn with_node(
        identifier: String,
        kind: FormKind,
        response_type: Option<String>,
        mode: ValidationMode,
        registry: FormRegistry,
        node: FormNodeId,
        parent: Option<FormState>,
    ) -> Self {
        let initial = match mode {
            ValidationMode::Immediate => FormStatus::Invalid,
            ValidationMode::OnDemand => FormStatus::PendingValidation,
        };
        Self {
            inner: Arc::new(FormInner {
                identifier,
                kind,
                response_type,
                mode,
                registry,
                node,
                _parent: parent,
                status: StatusPublisher::new(initial),
                data: Mutex::new(FormData::default()),
                timing: Mutex::new(ValidationTiming::default()),
                on_submit: Mutex::new(None),
            }),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    pub fn kind(&self) -> &FormKind {
        &self.inner.kind
    }

    pub fn response_type(&self) -> Option<&str> {
        self.inner.response_type.as_deref()
    }

    pub fn validation_mode(&self) -> ValidationMode {
        self.inner.mode
    }

    pub fn status(&self) -> FormStatus {
        self.inner.status.current()
    }

    /// Current status first, then every change.
    pub fn status_updates(&self) -> StatusStream<FormStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_submitted(&self) -> bool {
        self.status() == FormStatus::Submitted
    }

    pub fn set_submit_handler<F>(&self, handler: F)
    where
        F: Fn(&str, FieldResult, &LayoutState) -> Result<(), FormError> + Send + Sync + 'static,
    {
        *self.inner.on_submit.lock() = Some(Arc::new(handler));
    }

    pub fn set_validation_timing(&self, timing: ValidationTiming) {
        *self.inner.timing.lock() = timing;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.registry.set_enabled(self.inner.node, enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.registry.is_enabled(self.inner.node)
    }

    /// Own flag, own status and every ancestor allow input.
    pub fn is_form_input_enabled(&self) -> bool {
        self.inner.registry.is_input_enabled(self.inner.node)
    }

    pub fn mark_visible(&self) {
        self.inner.registry.mark_visible(self.inner.node);
    }

    pub fn is_visible(&self) -> bool {
        self.inner.registry.is_visible(self.inner.node)
    }

    /// Fields that applied at the last re-evaluation, in insertion order.
    pub fn active_fields(&self) -> Vec<FormField> {
        let data = self.inner.data.lock();
        active_children(&data)
            .map(|child| child.field.clone())
            .collect()
    }

    pub fn field(&self, identifier: &str) -> Option<FormField> {
        let data = self.inner.data.lock();
        data.children
            .iter()
            .find(|child| child.field.identifier() == identifier)
            .map(|child| child.field.clone())
    }

    /// Inserts or replaces a field. A replaced field keeps its position.
    pub fn update_field(&self, field: FormField, predicate: Option<Predicate>) {
        if self.is_submitted() {
            return;
        }

        {
            let mut data = self.inner.data.lock();
            data.generation += 1;

            let identifier = field.identifier().to_string();
            let keeps_invalid = data.recorded.get(&identifier) == Some(&ChildResult::Invalid)
                && field.status().is_invalid();
            if !keeps_invalid {
                data.recorded.insert(identifier.clone(), ChildResult::Pending);
            }

            let child = Child { field, predicate };
            match data
                .children
                .iter_mut()
                .find(|existing| existing.field.identifier() == identifier)
            {
                Some(existing) => *existing = child,
                None => data.children.push(child),
            }
        }

        self.refresh(true);
    }

    /// Re-evaluates predicates after outside data, such as the current
    /// page, changed.
    pub fn data_changed(&self) {
        if self.is_submitted() {
            return;
        }
        self.refresh(false);
    }

    /// Resolves every active field and returns whether the form is valid.
    pub async fn validate(&self) -> bool {
        if self.is_submitted() {
            return true;
        }

        let active = self.evaluate_predicates();
        let (generation, fields) = {
            let mut data = self.inner.data.lock();
            data.active = active;
            data.generation += 1;
            let fields: Vec<FormField> = active_children(&data)
                .map(|child| child.field.clone())
                .collect();
            (data.generation, fields)
        };
        self.set_status(FormStatus::Validating);

        let timing = self.inner.timing.lock().clone();
        let waits = fields
            .iter()
            .any(|field| matches!(field.status(), FieldStatus::Pending | FieldStatus::Error));
        let started = timing.clock.now();

        let results = join_all(fields.iter().map(|field| async move {
            field.process(true).await;
            (field.identifier().to_string(), ChildResult::from(&field.status()))
        }))
        .await;

        if waits {
            timing.hold(started).await;
        }

        self.apply_results(generation, results)
    }

    /// Validates and hands the merged result of the active fields to the
    /// submit handler. The form is `Submitted` only when the handler accepts.
    pub async fn submit(&self, layout: &LayoutState) -> Result<(), FormError> {
        let handler = self
            .inner
            .on_submit
            .lock()
            .clone()
            .ok_or(FormError::MissingSubmitHandler)?;
        if self.is_submitted() {
            return Err(FormError::AlreadySubmitted);
        }
        if !self.validate().await {
            return Err(FormError::NotValid);
        }

        let result = self.merged_result()?;
        handler(&self.inner.identifier, result, layout)?;

        self.set_status(FormStatus::Submitted);
        info!(form = %self.inner.identifier, "form submitted");
        Ok(())
    }

    /// JSON snapshot of every field with its status plus the form status.
    pub fn state_payload(&self) -> Value {
        let fields: Vec<FormField> = {
            let data = self.inner.data.lock();
            data.children.iter().map(|child| child.field.clone()).collect()
        };
        form_state_payload(self.status(), &fields, &self.inner.kind)
    }

    fn merged_result(&self) -> Result<FieldResult, FormError> {
        let fields = self.active_fields();
        if fields.is_empty() {
            return Err(FormError::EmptyPayload);
        }

        let mut children = BTreeMap::new();
        let mut channels = Vec::new();
        let mut attributes = Vec::new();
        for field in &fields {
            if let Some(result) = field.status().result() {
                children.insert(field.identifier().to_string(), result.value.clone());
                channels.extend(result.channels.iter().cloned());
                attributes.extend(result.attributes.iter().cloned());
            }
        }

        let response_type = self.inner.response_type.clone();
        let value = match &self.inner.kind {
            FormKind::Form => FieldValue::Form {
                response_type,
                children,
            },
            FormKind::Nps { score_id } => FieldValue::NpsForm {
                response_type,
                score_id: score_id.clone(),
                children,
            },
        };
        Ok(FieldResult {
            value,
            channels,
            attributes,
        })
    }

    /// Evaluated without holding the data lock; predicates may read other
    /// state freely.
    fn evaluate_predicates(&self) -> Vec<String> {
        let snapshot: Vec<(String, Option<Predicate>)> = {
            let data = self.inner.data.lock();
            data.children
                .iter()
                .map(|child| (child.field.identifier().to_string(), child.predicate.clone()))
                .collect()
        };
        snapshot
            .into_iter()
            .filter(|(_, predicate)| predicate.as_ref().map_or(true, |applies| applies()))
            .map(|(identifier, _)| identifier)
            .collect()
    }

    fn refresh(&self, force: bool) {
        let active = self.evaluate_predicates();
        let derived = {
            let mut data = self.inner.data.lock();
            if !force && data.active == active {
                return;
            }
            if !force {
                data.generation += 1;
            }
            data.active = active;

            let results: Vec<ChildResult> = data
                .active
                .iter()
                .map(|id| data.recorded.get(id).copied().unwrap_or(ChildResult::Pending))
                .collect();
            (
                results.contains(&ChildResult::Invalid),
                results.iter().any(ChildResult::is_unresolved),
            )
        };

        match derived {
            // Immediate mode resolves pending fields even when another
            // field is already invalid.
            (_, true) if self.inner.mode == ValidationMode::Immediate => {
                self.set_status(FormStatus::PendingValidation);
                self.spawn_validation();
            }
            (true, _) => self.set_status(FormStatus::Invalid),
            (false, true) => self.set_status(FormStatus::PendingValidation),
            (false, false) => self.set_status(FormStatus::Valid),
        }
    }

    fn apply_results(&self, generation: u64, results: Vec<(String, ChildResult)>) -> bool {
        let (status, errored) = {
            let mut data = self.inner.data.lock();
            if data.generation != generation {
                debug!(
                    form = %self.inner.identifier,
                    generation,
                    current = data.generation,
                    "discarding superseded validation"
                );
                return false;
            }

            let errored = results.iter().any(|(_, result)| *result == ChildResult::Error);
            let invalid = data.children.is_empty()
                || results
                    .iter()
                    .any(|(_, result)| matches!(result, ChildResult::Invalid | ChildResult::Error));
            data.recorded.extend(results);

            let status = if invalid {
                FormStatus::Invalid
            } else {
                FormStatus::Valid
            };
            (status, errored)
        };

        self.set_status(status);
        debug!(
            form = %self.inner.identifier,
            status = status.as_str(),
            errored,
            "form validated"
        );

        if errored && self.inner.mode == ValidationMode::Immediate {
            self.spawn_validation();
        }
        status == FormStatus::Valid
    }

    fn set_status(&self, status: FormStatus) {
        if self.inner.status.current() == FormStatus::Submitted {
            return;
        }

        let accepts_input = match status {
            FormStatus::Submitted => false,
            FormStatus::Validating => self.inner.mode == ValidationMode::Immediate,
            _ => true,
        };
        self.inner
            .registry
            .set_accepts_input(self.inner.node, accepts_input);

        if self.inner.status.publish_if_changed(status) {
            debug!(form = %self.inner.identifier, status = status.as_str(), "form status changed");
        }
    }

    fn spawn_validation(&self) {
        let Ok(handle) = Handle::try_current() else {
            debug!(form = %self.inner.identifier, "no runtime, skipping background validation");
            return;
        };
        let weak: Weak<FormInner> = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            if let Some(inner) = weak.upgrade() {
                FormState { inner }.validate().await;
            }
        });
    }
}

fn active_children(data: &FormData) -> impl Iterator<Item = &Child> {
    data.children
        .iter()
        .filter(|child| data.active.iter().any(|id| id == child.field.identifier()))
}
