//! Platform classification from a Machine's provider identifier.
//!
//! The providerID carries the platform as a prefix (e.g. `baremetal:///...`,
//! `aws:///...`). Bare-metal hosts come back under the same node name after their
//! Machine is recreated; cloud instances come back as new nodes.

use crate::crds::{
    ConditionStatus, BARE_METAL_PROVIDER_REASON, CLOUD_PROVIDER_REASON, UNDEFINED_PROVIDER_REASON,
};

const BARE_METAL_PREFIX: &str = "baremetal";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// No providerID on the Machine
    Unknown,
    BareMetal,
    Cloud,
}

impl Platform {
    #[must_use]
    pub fn classify(provider_id: &str) -> Self {
        if provider_id.is_empty() {
            Self::Unknown
        } else if provider_id.starts_with(BARE_METAL_PREFIX) {
            Self::BareMetal
        } else {
            Self::Cloud
        }
    }

    /// Value of the PermanentNodeDeletionExpected condition for this platform
    #[must_use]
    pub fn permanent_node_deletion_expected(self) -> ConditionStatus {
        match self {
            Self::Unknown => ConditionStatus::Unknown,
            Self::BareMetal => ConditionStatus::False,
            Self::Cloud => ConditionStatus::True,
        }
    }

    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Self::Unknown => UNDEFINED_PROVIDER_REASON,
            Self::BareMetal => BARE_METAL_PROVIDER_REASON,
            Self::Cloud => CLOUD_PROVIDER_REASON,
        }
    }

    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::Unknown => "Machine will be deleted and the unhealthy node replaced. Unknown cluster provider: no information about the new node's name",
            Self::BareMetal => "Machine will be deleted and the unhealthy node replaced. This is a BareMetal cluster provider: the new node is NOT expected to have a new name",
            Self::Cloud => "Machine will be deleted and the unhealthy node replaced. This is a Cloud cluster provider: the new node is expected to have a new name",
        }
    }
}
