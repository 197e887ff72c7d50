//! Consistency Validator: cross-contribution checks over one snapshot.

pub mod checks;
pub mod validator;

pub use validator::{ConsistencyValidator, ValidationLevel, ValidationResult, ValidatorConfig};
