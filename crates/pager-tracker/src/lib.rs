//! Pager view-time tracking.
//!
//! Display time is sampled from the caller (the environment's display timer),
//! so the tracker never reads a clock itself. A page's duration is finalized
//! when the next page-view for the same pager arrives or on [`PagerTracker::stop_all`].

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use tracing::trace;

/// A page of a pager became visible.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PageViewEvent {
    #[serde(rename = "pager_identifier")]
    pub identifier: String,
    pub page_identifier: String,
    pub page_index: usize,
    #[serde(rename = "viewed_count")]
    pub page_view_count: usize,
    pub page_count: usize,
    pub completed: bool,
}

/// A finalized page view.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PageView {
    #[serde(rename = "page_identifier")]
    pub identifier: String,
    #[serde(rename = "page_index")]
    pub index: usize,
    #[serde(serialize_with = "serialize_seconds")]
    pub display_time: Duration,
}

impl PageView {
    pub fn new(identifier: impl Into<String>, index: usize, display_time: Duration) -> Self {
        Self {
            identifier: identifier.into(),
            index,
            display_time,
        }
    }
}

/// Per-pager aggregate reported at dismissal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PagerSummaryEvent {
    #[serde(rename = "pager_identifier")]
    pub identifier: String,
    pub viewed_pages: Vec<PageView>,
    pub page_count: usize,
    pub completed: bool,
}

/// Seconds with two decimals, as a string.
pub fn serialize_seconds<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{:.2}", value.as_secs_f64()))
}

#[derive(Debug)]
struct OpenPage {
    identifier: String,
    index: usize,
    since: Duration,
}

#[derive(Debug)]
struct PagerRecord {
    identifier: String,
    last_event: PageViewEvent,
    viewed: Vec<PageView>,
    open: Option<OpenPage>,
}

impl PagerRecord {
    fn close_open(&mut self, current: Duration) {
        if let Some(open) = self.open.take() {
            self.viewed.push(PageView {
                identifier: open.identifier,
                index: open.index,
                display_time: current.saturating_sub(open.since),
            });
        }
    }
}

/// Tracks view durations for every pager of a layout.
///
/// Safe to share between environments; all state sits behind one lock.
#[derive(Debug, Default)]
pub struct PagerTracker {
    // Insertion ordered, one entry per pager identifier.
    pagers: Mutex<Vec<PagerRecord>>,
}

impl PagerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_page_view(&self, event: &PageViewEvent, current_display_time: Duration) {
        let mut pagers = self.pagers.lock();
        let open = OpenPage {
            identifier: event.page_identifier.clone(),
            index: event.page_index,
            since: current_display_time,
        };

        match pagers
            .iter_mut()
            .find(|record| record.identifier == event.identifier)
        {
            Some(record) => {
                record.close_open(current_display_time);
                record.open = Some(open);
                record.last_event = event.clone();
            }
            None => pagers.push(PagerRecord {
                identifier: event.identifier.clone(),
                last_event: event.clone(),
                viewed: Vec::new(),
                open: Some(open),
            }),
        }

        trace!(
            pager = %event.identifier,
            page = %event.page_identifier,
            index = event.page_index,
            "page view tracked"
        );
    }

    /// Finalizes every open page. Calling it again changes nothing.
    pub fn stop_all(&self, current_display_time: Duration) {
        let mut pagers = self.pagers.lock();
        for record in pagers.iter_mut() {
            record.close_open(current_display_time);
        }
    }

    pub fn summary(&self) -> Vec<PagerSummaryEvent> {
        self.pagers
            .lock()
            .iter()
            .map(|record| PagerSummaryEvent {
                identifier: record.identifier.clone(),
                viewed_pages: record.viewed.clone(),
                page_count: record.last_event.page_count,
                completed: record.last_event.completed,
            })
            .collect()
    }

    /// Finalized views for `pager_identifier`, empty when unknown.
    pub fn viewed_pages(&self, pager_identifier: &str) -> Vec<PageView> {
        self.pagers
            .lock()
            .iter()
            .find(|record| record.identifier == pager_identifier)
            .map(|record| record.viewed.clone())
            .unwrap_or_default()
    }
}
