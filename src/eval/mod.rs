//! Evaluation entry points. Both functions are synchronous and never block on I/O; they only read
//! the configuration snapshot they're given.
mod eval_assignment;
mod eval_precomputed_assignment;

pub use eval_assignment::get_assignment;
pub use eval_precomputed_assignment::get_precomputed_assignment;

use crate::{ufc::AssignmentValue, AssignmentEvent};

/// Result of a successful assignment: the value for the caller and, if the allocation asks for
/// it, an event for the assignment logger.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// Assignment value that should be returned to the user.
    pub value: AssignmentValue,
    /// Optional assignment event that should be logged to storage.
    pub event: Option<AssignmentEvent>,
}

/// Shared tail of both evaluation paths: normal conditions turn into `Ok(None)`, everything else
/// is reported.
fn finish_evaluation(
    result: Result<Assignment, crate::ufc::FlagEvaluationError>,
    flag_key: &str,
    subject_key: &str,
) -> Result<Option<Assignment>, crate::ufc::FlagEvaluationError> {
    use crate::ufc::FlagEvaluationError;

    match result {
        Ok(assignment) => {
            log::trace!(target: "eppo",
                        flag_key,
                        subject_key,
                        assignment:serde = assignment.value;
                        "evaluated a flag");
            Ok(Some(assignment))
        }

        Err(FlagEvaluationError::ConfigurationMissing) => {
            log::warn!(target: "eppo",
                       flag_key,
                       subject_key;
                       "evaluating a flag before Eppo configuration has been fetched");
            Ok(None)
        }

        // These are considered normal conditions and usually don't need extra attention, so we
        // remap them to Ok(None) before returning to the user.
        Err(err) if err.is_normal() => {
            log::trace!(target: "eppo",
                        flag_key,
                        subject_key;
                        "returning default assignment because of: {err}");
            Ok(None)
        }

        Err(err) => {
            log::warn!(target: "eppo",
                       flag_key,
                       subject_key;
                       "error occurred while evaluating a flag: {err}");
            Err(err)
        }
    }
}
