//! Remediation Controller Configuration
//!
//! Loaded from a mounted YAML file. Every section has defaults, so an empty file
//! (or no file at all) yields a working configuration for OpenShift Machine API clusters.

use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main controller configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Namespace to watch for remediation requests; all namespaces when unset
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub requeue: RequeueConfig,

    #[serde(default)]
    pub annotations: AnnotationConfig,

    /// Machine resource served by the cluster's machine API
    #[serde(default)]
    pub machine: MachineResourceConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Re-invocation delays
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequeueConfig {
    /// Delay after a status write that must land before the next step
    #[serde(default = "default_short_delay")]
    pub short_delay_seconds: u64,

    /// Poll interval while a Machine deletion is in flight
    #[serde(default = "default_deletion_poll")]
    pub deletion_poll_seconds: u64,

    /// Retry delay after a failed reconcile
    #[serde(default = "default_error_backoff")]
    pub error_backoff_seconds: u64,

    /// Periodic reconcile of every request; 0 disables
    #[serde(default = "default_resync")]
    pub resync_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationConfig {
    /// Node annotation pointing at the backing Machine (`<namespace>/<name>`)
    #[serde(default = "default_node_machine_annotation")]
    pub node_machine: String,

    /// Request annotation set by the health checker to stop remediation
    #[serde(default = "default_stop_signal_annotation")]
    pub stop_signal: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineResourceConfig {
    #[serde(default = "default_machine_group")]
    pub group: String,
    #[serde(default = "default_machine_version")]
    pub version: String,
    #[serde(default = "default_machine_kind")]
    pub kind: String,
    #[serde(default = "default_machine_plural")]
    pub plural: String,
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryConfig {
    /// Export metrics over OTLP
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_otlp_endpoint")]
    pub otlp_endpoint: String,

    #[serde(default = "default_export_interval")]
    pub export_interval_seconds: u64,

    /// Emit logs as JSON lines instead of human-readable text
    #[serde(default)]
    pub json_logs: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Address of the health endpoints
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_short_delay() -> u64 {
    1
}

fn default_deletion_poll() -> u64 {
    30
}

fn default_error_backoff() -> u64 {
    10
}

fn default_resync() -> u64 {
    600
}

fn default_node_machine_annotation() -> String {
    "machine.openshift.io/machine".to_string()
}

fn default_stop_signal_annotation() -> String {
    "remediation.medik8s.io/nhc-timed-out".to_string()
}

fn default_machine_group() -> String {
    "machine.openshift.io".to_string()
}

fn default_machine_version() -> String {
    "v1beta1".to_string()
}

fn default_machine_kind() -> String {
    "Machine".to_string()
}

fn default_machine_plural() -> String {
    "machines".to_string()
}

fn default_otlp_endpoint() -> String {
    std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string())
}

fn default_export_interval() -> u64 {
    60
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            short_delay_seconds: default_short_delay(),
            deletion_poll_seconds: default_deletion_poll(),
            error_backoff_seconds: default_error_backoff(),
            resync_seconds: default_resync(),
        }
    }
}

impl RequeueConfig {
    #[must_use]
    pub fn short_delay(&self) -> Duration {
        Duration::from_secs(self.short_delay_seconds)
    }

    #[must_use]
    pub fn deletion_poll(&self) -> Duration {
        Duration::from_secs(self.deletion_poll_seconds)
    }

    #[must_use]
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_seconds)
    }

    #[must_use]
    pub fn resync(&self) -> Option<Duration> {
        (self.resync_seconds > 0).then(|| Duration::from_secs(self.resync_seconds))
    }
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            node_machine: default_node_machine_annotation(),
            stop_signal: default_stop_signal_annotation(),
        }
    }
}

impl Default for MachineResourceConfig {
    fn default() -> Self {
        Self {
            group: default_machine_group(),
            version: default_machine_version(),
            kind: default_machine_kind(),
            plural: default_machine_plural(),
        }
    }
}

impl MachineResourceConfig {
    #[must_use]
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: format!("{}/{}", self.group, self.version),
            kind: self.kind.clone(),
            plural: self.plural.clone(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: default_otlp_endpoint(),
            export_interval_seconds: default_export_interval(),
            json_logs: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl ControllerConfig {
    /// Validate that configuration has required fields
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.requeue.short_delay_seconds == 0 {
            return Err(anyhow::anyhow!(
                "requeue.shortDelaySeconds must be greater than zero"
            ));
        }
        if self.requeue.deletion_poll_seconds == 0 {
            return Err(anyhow::anyhow!(
                "requeue.deletionPollSeconds must be greater than zero"
            ));
        }
        if self.requeue.error_backoff_seconds == 0 {
            return Err(anyhow::anyhow!(
                "requeue.errorBackoffSeconds must be greater than zero"
            ));
        }

        if self.annotations.node_machine.trim().is_empty() {
            return Err(anyhow::anyhow!("annotations.nodeMachine must not be empty"));
        }
        if self.annotations.stop_signal.trim().is_empty() {
            return Err(anyhow::anyhow!("annotations.stopSignal must not be empty"));
        }
        if self.annotations.stop_signal == crate::crds::MACHINE_BINDING_ANNOTATION {
            return Err(anyhow::anyhow!(
                "annotations.stopSignal must differ from the machine binding annotation"
            ));
        }

        let machine = &self.machine;
        for (field, value) in [
            ("group", &machine.group),
            ("version", &machine.version),
            ("kind", &machine.kind),
            ("plural", &machine.plural),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow::anyhow!("machine.{field} must not be empty"));
            }
        }

        self.server
            .bind_address
            .parse::<SocketAddr>()
            .map_err(|e| {
                anyhow::anyhow!(
                    "server.bindAddress '{}' is not a socket address: {e}",
                    self.server.bind_address
                )
            })?;

        Ok(())
    }

    /// Load configuration from mounted YAML file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, anyhow::Error> {
        if config_str.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))
    }
}
