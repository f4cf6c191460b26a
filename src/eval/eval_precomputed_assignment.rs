use crate::{
    events::EventMetaData,
    ufc::{FlagEvaluationError, Timestamp, VariationType},
    AssignmentEvent, Configuration, SdkMetadata,
};

use super::{finish_evaluation, Assignment};

/// Look up a server-precomputed assignment for the subject the configuration was fetched for.
///
/// Follows the same conventions as [`get_assignment`](super::get_assignment): normal conditions
/// yield `Ok(None)`, a type mismatch is reported as an error.
pub fn get_precomputed_assignment(
    configuration: Option<&Configuration>,
    flag_key: &str,
    expected_type: Option<VariationType>,
    now: Timestamp,
    sdk: &SdkMetadata,
) -> Result<Option<Assignment>, FlagEvaluationError> {
    let subject_key = configuration
        .and_then(|config| config.precomputed.as_ref())
        .map(|precomputed| precomputed.subject().subject_key.as_str())
        .unwrap_or_default();

    let result =
        get_precomputed_assignment_inner(configuration, flag_key, expected_type, now, sdk);
    finish_evaluation(result, flag_key, subject_key)
}

fn get_precomputed_assignment_inner(
    configuration: Option<&Configuration>,
    flag_key: &str,
    expected_type: Option<VariationType>,
    now: Timestamp,
    sdk: &SdkMetadata,
) -> Result<Assignment, FlagEvaluationError> {
    let precomputed = configuration
        .and_then(|config| config.precomputed.as_ref())
        .ok_or(FlagEvaluationError::ConfigurationMissing)?;

    let flag = precomputed
        .get_flag(flag_key)
        .ok_or(FlagEvaluationError::FlagNotFound)?;

    if let Some(expected) = expected_type {
        if flag.variation_type != expected {
            return Err(FlagEvaluationError::InvalidType {
                expected,
                found: flag.variation_type,
            });
        }
    }

    let event = flag.do_log.then(|| {
        let subject = precomputed.subject();
        AssignmentEvent {
            feature_flag: flag_key.into(),
            allocation: flag.allocation_key.clone(),
            experiment: AssignmentEvent::experiment_key(flag_key, flag.allocation_key.as_deref()),
            variation: flag.variation_key.clone(),
            subject: subject.subject_key.clone(),
            subject_attributes: subject.subject_attributes.clone(),
            timestamp: now,
            meta_data: EventMetaData::new(sdk, precomputed.is_obfuscated()),
            extra_logging: flag.extra_logging.clone(),
        }
    });

    Ok(Assignment {
        value: flag.variation_value.clone(),
        event,
    })
}
