//! # Remediation Metrics
//!
//! The reconcile logic reports what it does through [`RemediationObserver`].
//! [`RemediationMetrics`] turns those reports into OpenTelemetry counters on the
//! global meter; the binary decides whether an exporter is installed behind it.

use std::time::Duration;

use opentelemetry::metrics::Counter;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use tracing::info;

use crate::tasks::remediation::conditions::TransitionReason;

/// Narrow reporting port for the reconcile loop
pub trait RemediationObserver: Send + Sync {
    /// A reconcile pass started for the named request
    fn reconcile_invoked(&self, remediation: &str);

    /// Processing/Succeeded conditions moved because of `reason`
    fn transition_recorded(&self, remediation: &str, reason: TransitionReason);

    fn machine_deletion_requested(&self, remediation: &str);
}

/// Observer that drops every report
pub struct NoopObserver;

impl RemediationObserver for NoopObserver {
    fn reconcile_invoked(&self, _remediation: &str) {}

    fn transition_recorded(&self, _remediation: &str, _reason: TransitionReason) {}

    fn machine_deletion_requested(&self, _remediation: &str) {}
}

/// OpenTelemetry counters for the remediation controller
#[derive(Debug)]
pub struct RemediationMetrics {
    /// Reconcile calls per request
    reconcile_calls: Counter<u64>,
    transitions: Counter<u64>,
    machine_deletions: Counter<u64>,
}

impl RemediationMetrics {
    #[must_use]
    pub fn new() -> Self {
        let meter = global::meter("machine_deletion_remediation");

        let reconcile_calls = meter
            .u64_counter("machinedeletionremediation_cr_call_total")
            .with_description("Number of reconcile call per given CR")
            .build();

        let transitions = meter
            .u64_counter("machinedeletionremediation_transitions_total")
            .with_description("Number of Processing/Succeeded condition transitions by reason")
            .build();

        let machine_deletions = meter
            .u64_counter("machinedeletionremediation_machine_deletions_total")
            .with_description("Number of Machine deletions requested")
            .build();

        Self {
            reconcile_calls,
            transitions,
            machine_deletions,
        }
    }
}

impl Default for RemediationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RemediationObserver for RemediationMetrics {
    fn reconcile_invoked(&self, remediation: &str) {
        self.reconcile_calls.add(
            1,
            &[KeyValue::new("custom_resource_name", remediation.to_string())],
        );
    }

    fn transition_recorded(&self, _remediation: &str, reason: TransitionReason) {
        self.transitions
            .add(1, &[KeyValue::new("reason", reason.as_str())]);
    }

    fn machine_deletion_requested(&self, _remediation: &str) {
        self.machine_deletions.add(1, &[]);
    }
}

/// Install an OTLP/gRPC meter provider as the global meter provider.
///
/// The returned provider must be shut down on exit to flush pending exports.
pub fn init_meter_provider(
    endpoint: &str,
    interval: Duration,
) -> Result<SdkMeterProvider, anyhow::Error> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build OTLP metric exporter: {e}"))?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(interval)
        .build();

    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider.clone());

    info!(endpoint = %endpoint, ?interval, "OTLP metrics export enabled");
    Ok(provider)
}
