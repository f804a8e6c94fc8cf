//! Action runner seam.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::layout::LayoutContext;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionArguments {
    pub value: Value,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl ActionArguments {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            metadata: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ActionResult {
    Completed(Value),
    ArgumentsRejected,
    ActionNotFound,
    Error(String),
}

/// Runs actions requested by a layout.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// Fire-and-forget execution of an actions payload.
    fn run_async(&self, actions: &Value, context: &LayoutContext);

    async fn run(&self, name: &str, arguments: ActionArguments, context: &LayoutContext) -> ActionResult;
}
