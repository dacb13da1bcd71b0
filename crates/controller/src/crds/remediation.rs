//! `MachineDeletionRemediation` Custom Resource Definition
//!
//! One request exists per unhealthy node and carries the node's name. The spec is
//! intentionally empty: everything the controller learns is kept in annotations and
//! status conditions so that every reconcile can resume from durable state.

use chrono::Utc;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Annotation holding the `<namespace>/<name>` of the Machine selected for deletion.
/// Written once, before the Machine is deleted, and never overwritten afterwards.
pub const MACHINE_BINDING_ANNOTATION: &str =
    "machine-deletion-remediation.medik8s.io/machineNameNamespace";

pub const CLOUD_PROVIDER_REASON: &str = "MachineDeletionOnCloudProviderCausesNewNodeName";
pub const BARE_METAL_PROVIDER_REASON: &str = "MachineDeletionOnBareMetalProviderKeepsNodeName";
pub const UNDEFINED_PROVIDER_REASON: &str = "MachineDeletionUndefinedNodeNameExpectation";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "machine-deletion-remediation.medik8s.io",
    version = "v1alpha1",
    kind = "MachineDeletionRemediation"
)]
#[kube(namespaced)]
#[kube(shortname = "mdr")]
#[kube(status = "MachineDeletionRemediationStatus")]
#[kube(
    printcolumn = r#"{"name":"Processing","type":"string","jsonPath":".status.conditions[?(@.type==\"Processing\")].status"}"#
)]
#[kube(
    printcolumn = r#"{"name":"Succeeded","type":"string","jsonPath":".status.conditions[?(@.type==\"Succeeded\")].status"}"#
)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
pub struct MachineDeletionRemediationSpec {}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeletionRemediationStatus {
    /// Known condition types are "Processing", "Succeeded" and "PermanentNodeDeletionExpected"
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<RemediationCondition>,
}

/// Condition for the `MachineDeletionRemediation`
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemediationCondition {
    /// Type of condition
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status of the condition (True, False, or Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition's last transition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message about the condition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last time the condition status changed (RFC3339 format)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        };
        f.write_str(value)
    }
}

/// The condition types this controller maintains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionType {
    /// Remediation is in progress
    Processing,
    /// Outcome of the remediation; Unknown while processing
    Succeeded,
    /// Whether the replacement node is expected to come back under a different name
    PermanentNodeDeletionExpected,
}

impl ConditionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "Processing",
            Self::Succeeded => "Succeeded",
            Self::PermanentNodeDeletionExpected => "PermanentNodeDeletionExpected",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MachineDeletionRemediationStatus {
    #[must_use]
    pub fn find_condition(&self, condition_type: ConditionType) -> Option<&RemediationCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type.as_str())
    }

    /// True when the condition exists and carries `status`. Reason and message are ignored.
    #[must_use]
    pub fn is_condition_present_and_equal(
        &self,
        condition_type: ConditionType,
        status: ConditionStatus,
    ) -> bool {
        self.find_condition(condition_type)
            .is_some_and(|c| c.status == status)
    }

    /// Insert or update the condition of the given type.
    ///
    /// The transition time only moves when the status value changes.
    pub fn set_condition(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) {
        let now = Utc::now().to_rfc3339();

        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type.as_str())
        {
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = Some(now);
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            return;
        }

        self.conditions.push(RemediationCondition {
            condition_type: condition_type.as_str().to_string(),
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: Some(now),
        });
    }
}
