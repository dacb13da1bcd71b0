//! Cluster access used by the remediation controller.
//!
//! The reconcile logic only talks to the cluster through [`RemediationClient`], so
//! tests can drive it against an in-memory cluster or a mock.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use serde_json::{json, Value};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crds::MachineDeletionRemediation;
use crate::machine::{Machine, MachineKey};
use crate::tasks::config::MachineResourceConfig;
use crate::tasks::types::Result;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemediationClient: Send + Sync {
    /// Fresh read of a remediation request, `None` if it no longer exists
    async fn get_remediation(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<MachineDeletionRemediation>>;

    /// Add an annotation to the request, guarded by its resource version.
    /// Returns the updated request as stored by the API server.
    async fn save_annotation(
        &self,
        remediation: &MachineDeletionRemediation,
        key: &str,
        value: &str,
    ) -> Result<MachineDeletionRemediation>;

    /// Write the request's status sub-resource, guarded by its resource version
    async fn update_status(&self, remediation: &MachineDeletionRemediation) -> Result<()>;

    async fn get_node(&self, name: &str) -> Result<Option<Node>>;

    async fn get_machine(&self, key: &MachineKey) -> Result<Option<Machine>>;

    /// Request Machine deletion. A Machine that is already gone counts as deleted.
    async fn delete_machine(&self, key: &MachineKey) -> Result<()>;
}

/// Real Kubernetes client implementation
pub struct KubeRemediationClient {
    client: Client,
    machine_resource: ApiResource,
}

impl KubeRemediationClient {
    #[must_use]
    pub fn new(client: Client, machine: &MachineResourceConfig) -> Self {
        Self {
            client,
            machine_resource: machine.api_resource(),
        }
    }

    fn remediations(&self, namespace: &str) -> Api<MachineDeletionRemediation> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn machines(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.machine_resource)
    }
}

/// Attach the request's resource version so the API server rejects stale writes with 409.
fn with_resource_version(mut patch: Value, remediation: &MachineDeletionRemediation) -> Value {
    if let Some(version) = remediation.resource_version() {
        patch["metadata"]["resourceVersion"] = json!(version);
    }
    patch
}

fn namespace_of(remediation: &MachineDeletionRemediation) -> String {
    remediation.namespace().unwrap_or_else(|| "default".to_string())
}

#[async_trait]
impl RemediationClient for KubeRemediationClient {
    async fn get_remediation(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<MachineDeletionRemediation>> {
        Ok(self.remediations(namespace).get_opt(name).await?)
    }

    async fn save_annotation(
        &self,
        remediation: &MachineDeletionRemediation,
        key: &str,
        value: &str,
    ) -> Result<MachineDeletionRemediation> {
        let patch = with_resource_version(
            json!({ "metadata": { "annotations": { (key): value } } }),
            remediation,
        );

        let updated = self
            .remediations(&namespace_of(remediation))
            .patch(
                &remediation.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(updated)
    }

    async fn update_status(&self, remediation: &MachineDeletionRemediation) -> Result<()> {
        let patch = with_resource_version(
            json!({ "status": remediation.status.clone().unwrap_or_default() }),
            remediation,
        );

        self.remediations(&namespace_of(remediation))
            .patch_status(
                &remediation.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        Ok(nodes.get_opt(name).await?)
    }

    async fn get_machine(&self, key: &MachineKey) -> Result<Option<Machine>> {
        let machine = self.machines(&key.namespace).get_opt(&key.name).await?;
        Ok(machine.map(Machine::new))
    }

    async fn delete_machine(&self, key: &MachineKey) -> Result<()> {
        match self
            .machines(&key.namespace)
            .delete(&key.name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!(machine = %key, "machine already gone when deletion was requested");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
