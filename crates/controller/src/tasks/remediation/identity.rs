//! Resolves which Machine backs a remediation request.

use kube::ResourceExt;
use thiserror::Error;
use tracing::{debug, error};

use crate::crds::{MachineDeletionRemediation, MACHINE_BINDING_ANNOTATION};
use crate::machine::MachineKey;
use crate::tasks::client::RemediationClient;
use crate::tasks::types::Result;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error(
        "could not get Machine data from remediation '{remediation}' annotation '{value}': \
         failed to extract Machine Name and Machine Namespace from machine annotation on the node for node name: {remediation}"
    )]
    InvalidBinding { remediation: String, value: String },

    #[error("failed to find openshift machine annotation on node name: {node}")]
    NoMachineAnnotation { node: String },

    #[error("empty openshift machine annotation on node name: {node}")]
    EmptyMachineAnnotation { node: String },

    #[error(
        "failed to extract Machine Name and Machine Namespace from machine annotation on the node for node name: {node} (value '{value}')"
    )]
    InvalidNodeAnnotation { node: String, value: String },
}

/// Where the Machine identity came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// Sticky annotation saved on the request by an earlier pass
    BindingAnnotation,
    /// Read off the Node on a first pass
    Node,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMachine {
    pub key: MachineKey,
    pub source: IdentitySource,
}

impl ResolvedMachine {
    /// Whether the Machine has to be present when fetched.
    ///
    /// Only a Node-derived identity does: a bound Machine may be gone because we deleted it.
    #[must_use]
    pub fn must_exist(&self) -> bool {
        self.source == IdentitySource::Node
    }
}

/// Resolve the backing Machine, preferring the sticky binding annotation over the Node.
///
/// `None` means the request has no binding and its Node no longer exists.
pub async fn resolve_machine(
    client: &dyn RemediationClient,
    remediation: &MachineDeletionRemediation,
    node_annotation: &str,
) -> Result<Option<ResolvedMachine>> {
    let name = remediation.name_any();

    if let Some(value) = remediation.annotations().get(MACHINE_BINDING_ANNOTATION) {
        let Some(key) = MachineKey::parse(value) else {
            error!(
                remediation = %name,
                annotation = MACHINE_BINDING_ANNOTATION,
                value = %value,
                "could not get Machine data from remediation"
            );
            return Err(IdentityError::InvalidBinding {
                remediation: name,
                value: value.clone(),
            }
            .into());
        };
        debug!(remediation = %name, machine = %key, "using saved machine binding");
        return Ok(Some(ResolvedMachine {
            key,
            source: IdentitySource::BindingAnnotation,
        }));
    }

    let Some(node) = client.get_node(&name).await? else {
        error!(node = %name, "failed to fetch node");
        return Ok(None);
    };

    let key = match machine_key_from_node(&name, node.annotations().get(node_annotation)) {
        Ok(key) => key,
        Err(e) => {
            error!(
                node = %name,
                annotation = node_annotation,
                error = %e,
                "could not get Machine Name NS from Node"
            );
            return Err(e.into());
        }
    };

    Ok(Some(ResolvedMachine {
        key,
        source: IdentitySource::Node,
    }))
}

fn machine_key_from_node(
    node: &str,
    value: Option<&String>,
) -> std::result::Result<MachineKey, IdentityError> {
    let value = value.ok_or_else(|| IdentityError::NoMachineAnnotation {
        node: node.to_string(),
    })?;
    if value.is_empty() {
        return Err(IdentityError::EmptyMachineAnnotation {
            node: node.to_string(),
        });
    }
    MachineKey::parse(value).ok_or_else(|| IdentityError::InvalidNodeAnnotation {
        node: node.to_string(),
        value: value.clone(),
    })
}
