//! Reporting events emitted by the environment.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

pub use layout_pager_tracker::{serialize_seconds, PageView, PageViewEvent, PagerSummaryEvent};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ReportingEvent {
    ButtonTap(ButtonTapEvent),
    FormDisplay(FormDisplayEvent),
    FormResult(FormResultEvent),
    Gesture(GestureEvent),
    PageAction(PageActionEvent),
    PagerCompleted(PagerCompletedEvent),
    PageSwipe(PageSwipeEvent),
    PageView(PageViewEvent),
    PagerSummary(PagerSummaryEvent),
    Dismiss(DismissEvent),
}

impl ReportingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ReportingEvent::ButtonTap(_) => "button_tap",
            ReportingEvent::FormDisplay(_) => "form_display",
            ReportingEvent::FormResult(_) => "form_result",
            ReportingEvent::Gesture(_) => "gesture",
            ReportingEvent::PageAction(_) => "page_action",
            ReportingEvent::PagerCompleted(_) => "pager_completed",
            ReportingEvent::PageSwipe(_) => "page_swipe",
            ReportingEvent::PageView(_) => "page_view",
            ReportingEvent::PagerSummary(_) => "pager_summary",
            ReportingEvent::Dismiss(_) => "dismiss",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ButtonTapEvent {
    pub button_identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporting_metadata: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GestureEvent {
    pub gesture_identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporting_metadata: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PageActionEvent {
    pub action_identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporting_metadata: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FormDisplayEvent {
    pub form_identifier: String,
    pub form_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_response_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FormResultEvent {
    pub forms: Value,
}

/// Submitted form as handed to the environment.
#[derive(Clone, Debug, PartialEq)]
pub struct FormResult {
    pub identifier: String,
    pub form_data: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PagerCompletedEvent {
    pub pager_identifier: String,
    pub page_index: usize,
    pub page_count: usize,
    pub page_identifier: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PageSwipeEvent {
    pub pager_identifier: String,
    pub to_page_index: usize,
    pub to_page_identifier: String,
    pub from_page_index: usize,
    pub from_page_identifier: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DismissKind {
    ButtonTapped {
        button_identifier: String,
        button_description: String,
    },
    UserDismissed,
    TimedOut,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DismissEvent {
    #[serde(flatten)]
    pub kind: DismissKind,
    #[serde(serialize_with = "serialize_seconds")]
    pub display_time: Duration,
}
