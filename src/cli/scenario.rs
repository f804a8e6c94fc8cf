//! Scenario file format for `replay`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use layout_runtime::{FieldValue, FormKind, ValidationMode};

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub pager: Option<PagerSetup>,
    #[serde(default)]
    pub form: Option<FormSetup>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
pub struct PagerSetup {
    pub identifier: String,
    pub pages: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct FormSetup {
    pub identifier: String,
    #[serde(default = "default_kind")]
    pub kind: FormKind,
    #[serde(default)]
    pub response_type: Option<String>,
    #[serde(default)]
    pub validation: ValidationMode,
}

fn default_kind() -> FormKind {
    FormKind::Form
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOutcome {
    #[default]
    Valid,
    Invalid,
    /// Resolved by the field processor after the configured delay.
    Pending,
}

#[derive(Debug, Deserialize)]
pub struct ButtonSetup {
    pub identifier: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Visibility {
        visible: bool,
        #[serde(default = "yes")]
        foregrounded: bool,
    },
    Advance {
        seconds: f64,
    },
    PageView {
        index: usize,
    },
    PageSwipe {
        from: usize,
        to: usize,
    },
    PagerCompleted,
    ButtonTap {
        identifier: String,
        #[serde(default)]
        metadata: Option<Value>,
    },
    Gesture {
        #[serde(default)]
        identifier: Option<String>,
        #[serde(default)]
        metadata: Option<Value>,
    },
    Automated {
        #[serde(default)]
        identifier: Option<String>,
        #[serde(default)]
        metadata: Option<Value>,
    },
    FormDisplayed,
    Field {
        identifier: String,
        value: FieldValue,
        #[serde(default)]
        outcome: FieldOutcome,
    },
    SubmitForm,
    State {
        value: Value,
    },
    Dismiss {
        #[serde(default)]
        cancel: bool,
        #[serde(default)]
        button: Option<ButtonSetup>,
    },
    TimedOut,
}

fn yes() -> bool {
    true
}

impl Scenario {
    pub fn from_yaml(source: &str) -> Result<Self> {
        serde_yaml::from_str(source).context("Failed to parse scenario")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let source = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        Self::from_yaml(&source)
    }
}
