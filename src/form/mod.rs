//! Forms: fields, asynchronous field resolution and the form state machine.

pub mod field;
pub mod payload;
pub mod processor;
pub mod registry;
pub mod state;
pub mod validator;

pub use field::{
    AttributeMutation, AttributeName, AttributeValue, ChannelRegistration, EmailOptions,
    FieldResult, FieldStatus, FieldValue, FormField, SmsOptions,
};
pub use payload::{form_event_payload, form_state_payload};
pub use processor::{FieldProcessor, PendingRequest, PendingResult};
pub use registry::{FormNodeId, FormRegistry};
pub use state::{FormKind, FormState, FormStatus, Predicate, ValidationMode, ValidationTiming};
pub use validator::{EarlyValidation, InputValidator, ValidationResult};
