//! Form field values and the per-field status machine.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use super::processor::{PendingRequest, PendingResult};
use super::validator::{InputValidator, ValidationResult};

/// Typed input value of a field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Toggle(bool),
    Radio(Option<Value>),
    MultipleChoice(Vec<Value>),
    Text(Option<String>),
    Email(Option<String>),
    Sms(Option<String>),
    Score(Option<Number>),
    Form {
        #[serde(default)]
        response_type: Option<String>,
        #[serde(default)]
        children: BTreeMap<String, FieldValue>,
    },
    NpsForm {
        #[serde(default)]
        response_type: Option<String>,
        score_id: String,
        #[serde(default)]
        children: BTreeMap<String, FieldValue>,
    },
}

impl FieldValue {
    pub fn is_form(&self) -> bool {
        matches!(self, FieldValue::Form { .. } | FieldValue::NpsForm { .. })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailOptions {
    #[serde(default)]
    pub double_opt_in: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsOptions {
    pub sender_id: String,
}

/// Channel opt-in requested by a field result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelRegistration {
    Email {
        address: String,
        #[serde(default)]
        options: EmailOptions,
    },
    Sms { msisdn: String, options: SmsOptions },
}

/// Target of an attribute mutation: the channel, the contact, or both.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeName {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

impl AttributeName {
    pub fn channel(name: impl Into<String>) -> Self {
        Self {
            channel: Some(name.into()),
            contact: None,
        }
    }

    pub fn contact(name: impl Into<String>) -> Self {
        Self {
            channel: None,
            contact: Some(name.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Number(f64),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeMutation {
    pub name: AttributeName,
    pub value: AttributeValue,
}

/// Normalized outcome of a valid field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldResult {
    pub value: FieldValue,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<ChannelRegistration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<AttributeMutation>,
}

impl FieldResult {
    pub fn new(value: FieldValue) -> Self {
        Self {
            value,
            channels: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn with_channel(mut self, channel: ChannelRegistration) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_attribute(mut self, name: AttributeName, value: AttributeValue) -> Self {
        self.attributes.push(AttributeMutation { name, value });
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldStatus {
    Pending,
    Valid(FieldResult),
    Invalid,
    Error,
}

impl FieldStatus {
    pub fn is_invalid(&self) -> bool {
        matches!(self, FieldStatus::Invalid)
    }

    pub fn result(&self) -> Option<&FieldResult> {
        match self {
            FieldStatus::Valid(result) => Some(result),
            _ => None,
        }
    }
}

impl From<Option<PendingResult>> for FieldStatus {
    fn from(result: Option<PendingResult>) -> Self {
        match result {
            None => FieldStatus::Pending,
            Some(PendingResult::Valid(result)) => FieldStatus::Valid(result),
            Some(PendingResult::Invalid) => FieldStatus::Invalid,
            Some(PendingResult::Error) => FieldStatus::Error,
        }
    }
}

#[derive(Clone)]
enum FieldSource {
    Fixed(FieldStatus),
    Pending(PendingRequest),
    Validated {
        validator: Arc<InputValidator>,
        result: FieldResult,
    },
}

/// A form field: identifier, raw input and a status source.
#[derive(Clone)]
pub struct FormField {
    identifier: String,
    input: FieldValue,
    source: FieldSource,
}

impl std::fmt::Debug for FormField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormField")
            .field("identifier", &self.identifier)
            .field("input", &self.input)
            .field("status", &self.status())
            .finish()
    }
}

impl FormField {
    pub fn valid(identifier: impl Into<String>, input: FieldValue, result: FieldResult) -> Self {
        Self {
            identifier: identifier.into(),
            input,
            source: FieldSource::Fixed(FieldStatus::Valid(result)),
        }
    }

    pub fn invalid(identifier: impl Into<String>, input: FieldValue) -> Self {
        Self {
            identifier: identifier.into(),
            input,
            source: FieldSource::Fixed(FieldStatus::Invalid),
        }
    }

    /// Field resolved by a pending request from a
    /// [`FieldProcessor`](super::processor::FieldProcessor).
    pub fn pending(identifier: impl Into<String>, input: FieldValue, request: PendingRequest) -> Self {
        Self {
            identifier: identifier.into(),
            input,
            source: FieldSource::Pending(request),
        }
    }

    /// Field whose validity comes from an input validator. `result` is the
    /// value reported once the validator accepts the input.
    pub fn validated(
        identifier: impl Into<String>,
        input: FieldValue,
        validator: InputValidator,
        result: FieldResult,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            input,
            source: FieldSource::Validated {
                validator: Arc::new(validator),
                result,
            },
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn input(&self) -> &FieldValue {
        &self.input
    }

    pub fn status(&self) -> FieldStatus {
        match &self.source {
            FieldSource::Fixed(status) => status.clone(),
            FieldSource::Pending(request) => request.result().into(),
            FieldSource::Validated { validator, result } => {
                validated_status(validator.result(), result)
            }
        }
    }

    /// Current status first, then every later resolution.
    pub fn status_updates(&self) -> BoxStream<'static, FieldStatus> {
        match &self.source {
            FieldSource::Fixed(status) => stream::once(futures::future::ready(status.clone())).boxed(),
            FieldSource::Pending(request) => request.updates().map(FieldStatus::from).boxed(),
            FieldSource::Validated { validator, result } => {
                let result = result.clone();
                validator
                    .updates()
                    .map(move |validation| validated_status(validation, &result))
                    .boxed()
            }
        }
    }

    /// Drives an unresolved field. Valid and invalid results are terminal;
    /// errors are retried only when `retry_errors` is set.
    pub async fn process(&self, retry_errors: bool) {
        match &self.source {
            FieldSource::Fixed(_) => {}
            FieldSource::Pending(request) => request.process(retry_errors).await,
            FieldSource::Validated { validator, .. } => validator.process(retry_errors).await,
        }
    }

    pub fn channels(&self) -> Vec<ChannelRegistration> {
        self.status()
            .result()
            .map(|result| result.channels.clone())
            .unwrap_or_default()
    }

    pub fn attributes(&self) -> Vec<AttributeMutation> {
        self.status()
            .result()
            .map(|result| result.attributes.clone())
            .unwrap_or_default()
    }
}

fn validated_status(validation: Option<ValidationResult>, result: &FieldResult) -> FieldStatus {
    match validation {
        None => FieldStatus::Pending,
        Some(ValidationResult::Valid) => FieldStatus::Valid(result.clone()),
        Some(ValidationResult::Invalid) => FieldStatus::Invalid,
        Some(ValidationResult::Error) => FieldStatus::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::processor::FieldProcessor;
    use crate::form::validator::EarlyValidation;
    use layout_core_types::testing::{ManualClock, RecordingSleeper};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn email(value: &str) -> FieldValue {
        FieldValue::Email(Some(value.to_string()))
    }

    #[tokio::test]
    async fn fixed_fields_emit_a_single_status() {
        let field = FormField::valid("email", FieldValue::Email(None), FieldResult::new(email("a@b.c")));
        field.process(true).await;

        let statuses: Vec<FieldStatus> = field.status_updates().collect().await;
        assert_eq!(statuses, vec![FieldStatus::Valid(FieldResult::new(email("a@b.c")))]);

        let invalid = FormField::invalid("email", FieldValue::Email(None));
        assert!(invalid.status().is_invalid());
        assert!(invalid.channels().is_empty());
    }

    #[tokio::test]
    async fn validated_field_error_is_not_retried_without_asking() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let processor = FieldProcessor::new()
            .with_clock(Arc::new(ManualClock::default()))
            .with_sleeper(sleeper.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let validator = InputValidator::asynchronous(EarlyValidation::Never, &processor, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<bool, _>(anyhow::anyhow!("validation backend unavailable")) }
        });
        let field = FormField::validated("email", email("a@b.c"), validator, FieldResult::new(email("a@b.c")));

        field.process(false).await;
        assert_eq!(field.status(), FieldStatus::Error);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.sleeps().is_empty());

        field.process(false).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        field.process(true).await;
        assert_eq!(field.status(), FieldStatus::Error);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sleeper.sleeps(), vec![std::time::Duration::from_secs(3)]);
    }

    #[test]
    fn channels_and_attributes_come_from_valid_results() {
        let result = FieldResult::new(email("a@b.c"))
            .with_channel(ChannelRegistration::Email {
                address: "a@b.c".into(),
                options: EmailOptions::default(),
            })
            .with_attribute(AttributeName::contact("email"), AttributeValue::String("a@b.c".into()));
        let field = FormField::valid("email", FieldValue::Email(None), result);

        assert_eq!(field.channels().len(), 1);
        assert_eq!(field.attributes()[0].name.contact.as_deref(), Some("email"));
    }

    #[test]
    fn field_values_use_type_and_value_keys() {
        let value: FieldValue =
            serde_json::from_value(json!({"type": "score", "value": 7})).expect("score");
        assert_eq!(value, FieldValue::Score(Some(7.into())));

        let form: FieldValue = serde_json::from_value(json!({
            "type": "nps_form",
            "value": {"score_id": "nps", "children": {"nps": {"type": "score", "value": 9}}}
        }))
        .expect("nps form");
        assert!(form.is_form());
    }
}
