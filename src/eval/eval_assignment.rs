use crate::{
    events::EventMetaData,
    sharder::Md5Sharder,
    ufc::{FlagEvaluationError, Timestamp, VariationType},
    AssignmentEvent, Attributes, Configuration, SdkMetadata,
};

use super::{finish_evaluation, Assignment};

/// Evaluate the specified feature flag for the given subject and return assigned variation and
/// an optional assignment event for logging.
///
/// Returns `Ok(None)` when the caller should fall back to its default value under normal
/// conditions (no configuration yet, unknown or disabled flag, no matching allocation).
pub fn get_assignment(
    configuration: Option<&Configuration>,
    flag_key: &str,
    subject_key: &str,
    subject_attributes: &Attributes,
    expected_type: Option<VariationType>,
    now: Timestamp,
    sdk: &SdkMetadata,
) -> Result<Option<Assignment>, FlagEvaluationError> {
    let result = get_assignment_inner(
        configuration,
        flag_key,
        subject_key,
        subject_attributes,
        expected_type,
        now,
        sdk,
    );
    finish_evaluation(result, flag_key, subject_key)
}

fn get_assignment_inner(
    configuration: Option<&Configuration>,
    flag_key: &str,
    subject_key: &str,
    subject_attributes: &Attributes,
    expected_type: Option<VariationType>,
    now: Timestamp,
    sdk: &SdkMetadata,
) -> Result<Assignment, FlagEvaluationError> {
    let flags = configuration
        .and_then(|config| config.flags.as_ref())
        .ok_or(FlagEvaluationError::ConfigurationMissing)?;

    let flag = flags
        .find_flag(flag_key)
        .ok_or(FlagEvaluationError::FlagNotFound)?
        .map_err(|_| FlagEvaluationError::ConfigurationParseError)?;

    if let Some(ty) = expected_type {
        flag.verify_type(ty)?;
    }

    let evaluation = flag.eval(subject_key, subject_attributes, &Md5Sharder, now)?;

    let event = evaluation.do_log.then(|| AssignmentEvent {
        feature_flag: flag.key.clone(),
        allocation: Some(evaluation.allocation_key.clone()),
        experiment: AssignmentEvent::experiment_key(&flag.key, Some(&evaluation.allocation_key)),
        variation: Some(evaluation.variation_key.clone()),
        subject: subject_key.into(),
        subject_attributes: subject_attributes.clone(),
        timestamp: now,
        meta_data: EventMetaData::new(sdk, false),
        extra_logging: evaluation.extra_logging.clone(),
    });

    Ok(Assignment {
        value: evaluation.value,
        event,
    })
}
