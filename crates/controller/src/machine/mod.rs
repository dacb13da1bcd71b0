//! Read-only view of infrastructure Machines.
//!
//! Machines are fetched as `DynamicObject`s because their schema depends on the
//! infrastructure provider. Object metadata (owners, deletion timestamp) is common
//! to every Kubernetes kind; spec and status are read through [`document`].

pub mod document;
pub mod provider;

use std::fmt;

use kube::api::DynamicObject;
use kube::ResourceExt;
use tracing::debug;

use self::document::{nested_str, FieldError};

const UNKNOWN_PHASE: &str = "unknown";

/// Namespace and name of a Machine, serialized as `<namespace>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MachineKey {
    pub namespace: String,
    pub name: String,
}

impl MachineKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `<namespace>/<name>`. Anything but exactly one separator is rejected;
    /// segments themselves are taken as-is, even when empty.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let (namespace, name) = value.split_once('/')?;
        if name.contains('/') {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for MachineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct Machine {
    object: DynamicObject,
}

impl Machine {
    #[must_use]
    pub fn new(object: DynamicObject) -> Self {
        Self { object }
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.object.name_any()
    }

    /// `spec.providerID`, `Ok(None)` when the Machine carries none.
    pub fn provider_id(&self) -> Result<Option<&str>, FieldError> {
        nested_str(&self.object.data, &["spec", "providerID"])
    }

    /// Best-effort `status.phase`, for progress logging only.
    #[must_use]
    pub fn status_phase(&self) -> &str {
        match nested_str(&self.object.data, &["status", "phase"]) {
            Ok(Some(phase)) => phase,
            Ok(None) => {
                debug!(machine = %self.name(), "machine does not have status.phase");
                UNKNOWN_PHASE
            }
            Err(e) => {
                debug!(machine = %self.name(), error = %e, "could not read machine status.phase");
                UNKNOWN_PHASE
            }
        }
    }

    /// Whether some higher-level controller (e.g. a MachineSet) will recreate this Machine.
    #[must_use]
    pub fn has_controller_owner(&self) -> bool {
        self.object
            .owner_references()
            .iter()
            .any(|owner| owner.controller == Some(true))
    }

    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.object.metadata.deletion_timestamp.is_some()
    }
}
