//! Error types for form submission and runtime setup.

use thiserror::Error;

pub use layout_retry::RetryError;

/// Form submission and payload errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormError {
    /// No submit handler was installed on the form
    #[error("Form has no submit handler")]
    MissingSubmitHandler,

    /// The form already reached its terminal submitted status
    #[error("Form already submitted")]
    AlreadySubmitted,

    /// Validation did not end in a valid status
    #[error("Form not valid")]
    NotValid,

    /// Merging the active fields produced nothing to submit
    #[error("Form has no active fields to submit")]
    EmptyPayload,

    /// A form event payload was requested for a non-form value
    #[error("Value should be a form or an nps form")]
    NotAForm,

    /// The submit handler refused the result
    #[error("Form submission rejected: {0}")]
    Rejected(String),
}

/// Errors raised while wiring a runtime together
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Retry configuration error: {0}")]
    Retry(#[from] RetryError),

    #[error("Form error: {0}")]
    Form(#[from] FormError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
