//! # Validation
//!
//! Validator definitions, the built-in validator kinds and the model-level
//! pipeline producing one aggregate [`ValidationError`].

mod definition;
mod errors;
mod kinds;
mod pipeline;

pub use definition::ValidatorDef;
pub use errors::{PropertyFailure, ValidationError, ValidatorFailure, ValidatorRef};
pub use kinds::{ValidatorKind, ValidatorKinds, KEY_PATTERN};
pub use pipeline::{
    collect_failures, validate, RecordLookup, ValidationEnv, ValidationTarget, ValidatorInput,
};
