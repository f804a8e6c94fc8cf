//! Layout runtime library
//!
//! State machines and coordination behind an in-app experience layout:
//! forms and their fields, pager view tracking and the environment that
//! reports what happened while a layout was on screen.

pub mod actions;
pub mod config;
pub mod environment;
pub mod errors;
pub mod form;
pub mod layout;
pub mod registration;
pub mod reporting;
pub mod telemetry;

// Re-export commonly used types for external use
pub use actions::{ActionArguments, ActionResult, ActionRunner};
pub use config::RuntimeConfig;
pub use environment::{LayoutDelegate, LayoutEnvironment};
pub use errors::{FormError, RuntimeError, RuntimeResult};
pub use form::{
    FieldProcessor, FieldResult, FieldStatus, FieldValue, FormField, FormKind, FormState,
    FormStatus, ValidationMode,
};
pub use layout::{LayoutContext, LayoutState, PageInfo, PagerState};
pub use registration::RegistrationSink;
pub use reporting::ReportingEvent;

pub use layout_core_types::{
    Clock, DisplayTimer, StopwatchTimer, SystemClock, TaskSleeper, TokioSleeper,
};
pub use layout_pager_tracker::PagerTracker;
pub use layout_retry::{BackoffLadder, RetryState};
