use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    sharder::{matches_shard_range, shard_input, Sharder},
    Attributes, Str,
};

use super::{
    Allocation, AssignmentValue, Flag, FlagEvaluationError, Shard, Split, Timestamp, VariationType,
};

/// Why the subject landed in a particular variation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationReason {
    /// The matching allocation had targeting rules and the subject satisfied all of them.
    TargetingMatch,
    /// The subject was bucketed into a split by its shard.
    Split,
    /// The allocation serves the same variation to everyone it reaches.
    Static,
}

/// Result of evaluating a single flag for a subject.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagEvaluation {
    /// Assigned value, already converted to the flag's variation type.
    pub value: AssignmentValue,
    #[allow(missing_docs)]
    pub variation_key: Str,
    #[allow(missing_docs)]
    pub allocation_key: Str,
    /// Whether the assignment should be reported to the assignment logger.
    pub do_log: bool,
    /// Extra key-value pairs attached to the split.
    pub extra_logging: HashMap<String, String>,
    #[allow(missing_docs)]
    pub reason: EvaluationReason,
}

impl Flag {
    /// Check that the flag holds values of type `ty`.
    pub fn verify_type(&self, ty: VariationType) -> Result<(), FlagEvaluationError> {
        if self.variation_type == ty {
            Ok(())
        } else {
            Err(FlagEvaluationError::InvalidType {
                expected: ty,
                found: self.variation_type,
            })
        }
    }

    /// Evaluate the flag for the given subject at time `now`.
    ///
    /// The subject key is visible to targeting rules as the `id` attribute unless `attributes`
    /// already carries one.
    pub fn eval(
        &self,
        subject_key: &str,
        attributes: &Attributes,
        sharder: &impl Sharder,
        now: Timestamp,
    ) -> Result<FlagEvaluation, FlagEvaluationError> {
        if !self.enabled {
            return Err(FlagEvaluationError::FlagDisabled);
        }

        // Augmenting attributes with id, so that subject_key can be used in the rules.
        let attributes_with_id = {
            let mut attrs = attributes.clone();
            attrs
                .entry("id".into())
                .or_insert_with(|| subject_key.into());
            attrs
        };

        let Some((allocation, split)) = self.allocations.iter().find_map(|allocation| {
            let result = allocation.get_matching_split(
                subject_key,
                &attributes_with_id,
                sharder,
                self.total_shards,
                now,
            );
            if let Err(reason) = result {
                log::trace!(target: "eppo",
                            flag_key:display = self.key,
                            allocation_key:display = allocation.key,
                            subject_key;
                            "allocation skipped: {reason:?}");
            }
            result.ok().map(|split| (allocation, split))
        }) else {
            return Err(FlagEvaluationError::NoAllocation);
        };

        let variation = self.variations.get(&split.variation_key).ok_or_else(|| {
            log::warn!(target: "eppo",
                       flag_key:display = self.key,
                       subject_key,
                       variation_key:display = split.variation_key;
                       "internal: unable to find variation");
            FlagEvaluationError::ConfigurationError
        })?;

        let value = variation
            .value
            .to_assignment_value(self.variation_type)
            .ok_or_else(|| {
                log::warn!(target: "eppo",
                           flag_key:display = self.key,
                           subject_key,
                           variation_key:display = split.variation_key;
                           "internal: unable to convert Value to AssignmentValue");
                FlagEvaluationError::ConfigurationError
            })?;

        let reason = if !allocation.rules.is_empty() {
            EvaluationReason::TargetingMatch
        } else if !split.shards.is_empty() {
            EvaluationReason::Split
        } else {
            EvaluationReason::Static
        };

        Ok(FlagEvaluation {
            value,
            variation_key: variation.key.clone(),
            allocation_key: allocation.key.clone(),
            do_log: allocation.do_log,
            extra_logging: split.extra_logging.clone(),
            reason,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum AllocationNonMatchReason {
    BeforeStartDate,
    AfterEndDate,
    FailingRules,
    TrafficExposureMiss,
}

impl Allocation {
    /// Active window is `[start_at, end_at)`.
    fn get_matching_split(
        &self,
        subject_key: &str,
        attributes_with_id: &Attributes,
        sharder: &impl Sharder,
        total_shards: u32,
        now: Timestamp,
    ) -> Result<&Split, AllocationNonMatchReason> {
        if self.start_at.is_some_and(|t| now < t) {
            return Err(AllocationNonMatchReason::BeforeStartDate);
        }
        if self.end_at.is_some_and(|t| now >= t) {
            return Err(AllocationNonMatchReason::AfterEndDate);
        }

        if !self.rules.iter().all(|rule| rule.eval(attributes_with_id)) {
            return Err(AllocationNonMatchReason::FailingRules);
        }

        self.splits
            .iter()
            .find(|split| split.matches(subject_key, sharder, total_shards))
            .ok_or(AllocationNonMatchReason::TrafficExposureMiss)
    }
}

impl Split {
    /// Return `true` if `subject_key` matches the given split under the provided `sharder`.
    ///
    /// To match a split, subject must match all underlying shards.
    fn matches(&self, subject_key: &str, sharder: &impl Sharder, total_shards: u32) -> bool {
        self.shards
            .iter()
            .all(|shard| shard.matches(subject_key, sharder, total_shards))
    }
}

impl Shard {
    fn matches(&self, subject_key: &str, sharder: &impl Sharder, total_shards: u32) -> bool {
        let input = shard_input(&self.salt, subject_key);
        self.ranges
            .iter()
            .any(|range| matches_shard_range(sharder, &input, total_shards, range))
    }
}
