//! JSON payloads for form results and form state snapshots.

use serde_json::{json, Map, Value};

use super::field::{FieldStatus, FieldValue, FormField};
use super::state::{FormKind, FormStatus};
use crate::errors::FormError;

/// `{identifier: <value payload>}` for a form or NPS form value.
pub fn form_event_payload(identifier: &str, value: &FieldValue) -> Result<Value, FormError> {
    if !value.is_form() {
        return Err(FormError::NotAForm);
    }
    let mut payload = Map::new();
    payload.insert(identifier.to_string(), value_payload(value, None));
    Ok(Value::Object(payload))
}

/// Snapshot of every field with its status plus the form status.
pub fn form_state_payload(status: FormStatus, fields: &[FormField], kind: &FormKind) -> Value {
    let children: Map<String, Value> = fields
        .iter()
        .map(|field| {
            let status = field.status();
            (field.identifier().to_string(), value_payload(field.input(), Some(&status)))
        })
        .collect();

    let mut data = Map::new();
    data.insert("type".into(), Value::from(kind.type_name()));
    if let FormKind::Nps { score_id } = kind {
        data.insert("score_id".into(), Value::from(score_id.as_str()));
    }
    data.insert("children".into(), Value::Object(children));

    json!({
        "data": data,
        "status": { "type": status.as_str() },
    })
}

pub fn value_payload(value: &FieldValue, status: Option<&FieldStatus>) -> Value {
    fn set_value(payload: &mut Map<String, Value>, value: Option<Value>) {
        if let Some(value) = value {
            payload.insert("value".into(), value);
        }
    }

    let mut payload = Map::new();

    match value {
        FieldValue::Toggle(on) => {
            payload.insert("type".into(), "toggle".into());
            set_value(&mut payload, Some(Value::Bool(*on)));
        }
        FieldValue::Radio(choice) => {
            payload.insert("type".into(), "single_choice".into());
            set_value(&mut payload, choice.clone());
        }
        FieldValue::MultipleChoice(choices) => {
            payload.insert("type".into(), "multiple_choice".into());
            set_value(&mut payload, Some(Value::Array(choices.clone())));
        }
        FieldValue::Text(text) => {
            payload.insert("type".into(), "text_input".into());
            set_value(&mut payload, text.clone().map(Value::String));
        }
        FieldValue::Email(address) => {
            payload.insert("type".into(), "email_input".into());
            set_value(&mut payload, address.clone().map(Value::String));
        }
        FieldValue::Sms(msisdn) => {
            payload.insert("type".into(), "sms_input".into());
            set_value(&mut payload, msisdn.clone().map(Value::String));
        }
        FieldValue::Score(score) => {
            payload.insert("type".into(), "score".into());
            set_value(&mut payload, score.clone().map(Value::Number));
        }
        FieldValue::Form {
            response_type,
            children,
        } => {
            payload.insert("type".into(), "form".into());
            if let Some(response_type) = response_type {
                payload.insert("response_type".into(), response_type.as_str().into());
            }
            payload.insert("children".into(), children_payload(children));
        }
        FieldValue::NpsForm {
            response_type,
            score_id,
            children,
        } => {
            payload.insert("type".into(), "nps".into());
            if let Some(response_type) = response_type {
                payload.insert("response_type".into(), response_type.as_str().into());
            }
            payload.insert("score_id".into(), score_id.as_str().into());
            payload.insert("children".into(), children_payload(children));
        }
    }

    if let Some(status) = status {
        payload.insert("status".into(), field_status_payload(status));
    }
    Value::Object(payload)
}

fn children_payload(children: &std::collections::BTreeMap<String, FieldValue>) -> Value {
    Value::Object(
        children
            .iter()
            .map(|(identifier, child)| (identifier.clone(), value_payload(child, None)))
            .collect(),
    )
}

fn field_status_payload(status: &FieldStatus) -> Value {
    match status {
        FieldStatus::Valid(result) => json!({
            "type": "valid",
            "result": value_payload(&result.value, None),
        }),
        FieldStatus::Invalid => json!({ "type": "invalid" }),
        FieldStatus::Pending => json!({ "type": "pending" }),
        FieldStatus::Error => json!({ "type": "error" }),
    }
}
