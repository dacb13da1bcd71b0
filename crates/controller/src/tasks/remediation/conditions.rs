//! Status condition bookkeeping for remediation requests.
//!
//! Changes are decided on (type, status) alone; reason and message never trigger a
//! write by themselves. Callers use the returned flag to decide whether to pause
//! until the new status is durable.

use tracing::info;

use crate::crds::{ConditionStatus, ConditionType, MachineDeletionRemediationStatus};
use crate::machine::provider::Platform;

/// Why the Processing/Succeeded pair is moving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    RemediationStarted,
    /// The health checker set its stop annotation
    RemediationStoppedByNhc,
    RemediationFinished,
    RemediationFailed,
}

impl TransitionReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RemediationStarted => "RemediationStarted",
            Self::RemediationStoppedByNhc => "RemediationStoppedByNHC",
            Self::RemediationFinished => "RemediationFinished",
            Self::RemediationFailed => "RemediationFailed",
        }
    }

    /// Target (Processing, Succeeded) statuses
    #[must_use]
    pub fn targets(self) -> (ConditionStatus, ConditionStatus) {
        match self {
            Self::RemediationStarted => (ConditionStatus::True, ConditionStatus::Unknown),
            Self::RemediationFinished => (ConditionStatus::False, ConditionStatus::True),
            Self::RemediationStoppedByNhc | Self::RemediationFailed => {
                (ConditionStatus::False, ConditionStatus::False)
            }
        }
    }
}

/// Move Processing and Succeeded according to `reason`.
///
/// Processing never returns to True once it has been False. Returns whether the
/// in-memory status changed.
pub fn record_transition(
    status: &mut MachineDeletionRemediationStatus,
    reason: TransitionReason,
) -> bool {
    let (processing, succeeded) = reason.targets();

    if processing == ConditionStatus::True
        && status.is_condition_present_and_equal(ConditionType::Processing, ConditionStatus::False)
    {
        return false;
    }

    if status.is_condition_present_and_equal(ConditionType::Processing, processing)
        && status.is_condition_present_and_equal(ConditionType::Succeeded, succeeded)
    {
        return false;
    }

    info!(
        processing_condition_status = %processing,
        succeeded_condition_status = %succeeded,
        reason = reason.as_str(),
        "updating Status Condition"
    );
    status.set_condition(ConditionType::Processing, processing, reason.as_str(), "");
    status.set_condition(ConditionType::Succeeded, succeeded, reason.as_str(), "");
    true
}

/// Record whether the replacement node will get a new name. Returns whether it changed.
pub fn record_deletion_expectation(
    status: &mut MachineDeletionRemediationStatus,
    platform: Platform,
) -> bool {
    let expected = platform.permanent_node_deletion_expected();
    if status.is_condition_present_and_equal(ConditionType::PermanentNodeDeletionExpected, expected)
    {
        return false;
    }

    info!(
        permanent_node_deletion_expected = %expected,
        reason = platform.reason(),
        message = platform.message(),
        "updating Status Condition"
    );
    status.set_condition(
        ConditionType::PermanentNodeDeletionExpected,
        expected,
        platform.reason(),
        platform.message(),
    );
    true
}

/// Succeeded has settled on True or False
#[must_use]
pub fn is_terminal(status: &MachineDeletionRemediationStatus) -> bool {
    status.is_condition_present_and_equal(ConditionType::Succeeded, ConditionStatus::True)
        || status.is_condition_present_and_equal(ConditionType::Succeeded, ConditionStatus::False)
}
