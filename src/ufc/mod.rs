//! Universal Flag Configuration: the canonical, format-independent flag model and its evaluation.
mod assignment;
mod error;
mod eval;
mod models;
mod rules;

pub use assignment::AssignmentValue;
pub use error::FlagEvaluationError;
pub use eval::{EvaluationReason, FlagEvaluation};
pub use models::*;
