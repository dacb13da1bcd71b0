use crate::crds::MachineDeletionRemediation;
use futures::{Stream, StreamExt};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn, Instrument};

pub mod client;
pub mod config;
pub mod metrics;
pub mod remediation;
pub mod types;

// Re-export commonly used items
pub use config::ControllerConfig;
pub use remediation::reconcile_remediation;
pub use types::{Context, Error, Result};

use client::KubeRemediationClient;
use metrics::RemediationObserver;

/// Main entry point for the remediation controller. Runs until the watch stream ends.
#[instrument(skip_all, fields(namespace = config.namespace.as_deref().unwrap_or("<all>")))]
pub async fn run_remediation_controller(
    client: Client,
    config: Arc<ControllerConfig>,
    observer: Arc<dyn RemediationObserver>,
) -> Result<()> {
    info!("Starting MachineDeletionRemediation controller");

    let remediations: Api<MachineDeletionRemediation> = match config.namespace.as_deref() {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    };

    let context = Arc::new(Context {
        client: Arc::new(KubeRemediationClient::new(client, &config.machine)),
        config: config.clone(),
        observer,
    });
    debug!("Controller context created successfully");

    let mut controller = Controller::new(remediations, Config::default().any_semantic());
    match config.requeue.resync() {
        Some(period) => {
            info!(?period, "periodic resync enabled");
            controller = controller.reconcile_all_on(resync_ticks(period));
        }
        None => debug!("periodic resync disabled"),
    }

    controller
        .run(reconcile, error_policy, context)
        .for_each(|reconciliation_result| {
            let span = tracing::info_span!("remediation_reconciliation_result");
            async move {
                match reconciliation_result {
                    Ok((object, action)) => {
                        debug!(
                            remediation = %object,
                            ?action,
                            "MachineDeletionRemediation reconciliation successful"
                        );
                    }
                    Err(reconciliation_err) => {
                        warn!(
                            error = %reconciliation_err,
                            "MachineDeletionRemediation reconciliation error"
                        );
                    }
                }
            }
            .instrument(span)
        })
        .await;

    info!("MachineDeletionRemediation controller shutting down");
    Ok(())
}

async fn reconcile(remediation: Arc<MachineDeletionRemediation>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = remediation.namespace().unwrap_or_default();
    reconcile_remediation(&namespace, &remediation.name_any(), &ctx).await
}

/// Status write failures retry quickly, everything else backs off
fn error_policy(remediation: Arc<MachineDeletionRemediation>, err: &Error, ctx: Arc<Context>) -> Action {
    let delay = retry_delay(err, &ctx.config);
    error!(
        error = %err,
        remediation = %remediation.name_any(),
        ?delay,
        "MachineDeletionRemediation reconciliation failed"
    );
    Action::requeue(delay)
}

fn retry_delay(err: &Error, config: &ControllerConfig) -> Duration {
    match err {
        Error::StatusPersist { .. } => config.requeue.short_delay(),
        _ => config.requeue.error_backoff(),
    }
}

/// Emits one trigger per period, the first one after a full period
fn resync_ticks(period: Duration) -> impl Stream<Item = ()> + Send + Sync + 'static {
    let start = tokio::time::Instant::now() + period;
    futures::stream::unfold(tokio::time::interval_at(start, period), |mut interval| async move {
        interval.tick().await;
        Some(((), interval))
    })
}
