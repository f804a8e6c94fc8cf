//! Layout state handed in by the UI and the context snapshot attached to
//! every reporting event.

use layout_pager_tracker::PageView;
use serde::Serialize;

use crate::form::{FormState, FormStatus};

/// Nearest pager, form and button around the UI element that triggered a
/// call.
#[derive(Clone, Debug, Default)]
pub struct LayoutState {
    pub form: Option<FormState>,
    pub pager: Option<PagerState>,
    pub button: Option<ButtonState>,
}

impl LayoutState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_form(mut self, form: FormState) -> Self {
        self.form = Some(form);
        self
    }

    pub fn with_pager(mut self, pager: PagerState) -> Self {
        self.pager = Some(pager);
        self
    }

    pub fn with_button(mut self, button: ButtonState) -> Self {
        self.button = Some(button);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PagerState {
    pub identifier: String,
    pub pages: Vec<String>,
    pub page_index: usize,
    pub completed: bool,
}

impl PagerState {
    pub fn new(identifier: impl Into<String>, pages: Vec<String>) -> Self {
        Self {
            identifier: identifier.into(),
            pages,
            page_index: 0,
            completed: false,
        }
    }

    /// Identifier of the page at `index`, empty when out of range.
    pub fn page_identifier(&self, index: usize) -> String {
        self.pages.get(index).cloned().unwrap_or_default()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// A page as seen by a view or swipe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageInfo {
    pub identifier: String,
    pub index: usize,
    pub view_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ButtonState {
    pub identifier: String,
}

impl ButtonState {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LayoutContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pager: Option<PagerContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<FormContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button: Option<ButtonContext>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PagerContext {
    pub pager_identifier: String,
    pub page_identifier: String,
    pub page_index: usize,
    pub page_count: usize,
    pub completed: bool,
    pub page_history: Vec<PageView>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FormContext {
    pub form_identifier: String,
    pub submitted: bool,
    pub form_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_response_type: Option<String>,
    pub status: FormStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ButtonContext {
    pub button_identifier: String,
}

impl PagerContext {
    pub fn new(pager: &PagerState, page_history: Vec<PageView>) -> Self {
        Self {
            pager_identifier: pager.identifier.clone(),
            page_identifier: pager.page_identifier(pager.page_index),
            page_index: pager.page_index,
            page_count: pager.page_count(),
            completed: pager.completed,
            page_history,
        }
    }
}

impl From<&FormState> for FormContext {
    fn from(form: &FormState) -> Self {
        let status = form.status();
        Self {
            form_identifier: form.identifier().to_string(),
            submitted: status == FormStatus::Submitted,
            form_type: form.kind().type_name().to_string(),
            form_response_type: form.response_type().map(str::to_string),
            status,
        }
    }
}

impl From<&ButtonState> for ButtonContext {
    fn from(button: &ButtonState) -> Self {
        Self {
            button_identifier: button.identifier.clone(),
        }
    }
}
