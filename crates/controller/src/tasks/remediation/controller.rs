use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use super::conditions::{is_terminal, record_deletion_expectation, record_transition, TransitionReason};
use super::identity::resolve_machine;
use crate::crds::{MachineDeletionRemediation, MachineDeletionRemediationStatus, MACHINE_BINDING_ANNOTATION};
use crate::machine::provider::Platform;
use crate::tasks::types::{Context, Error, Result};

/// One reconcile pass for a remediation request.
///
/// The request is read fresh on every pass. Conditions changed by the pass are
/// persisted once at the end, whatever path the pass took.
#[instrument(skip(ctx), fields(remediation = %name, namespace = %namespace))]
pub async fn reconcile_remediation(namespace: &str, name: &str, ctx: &Context) -> Result<Action> {
    ctx.observer.reconcile_invoked(name);
    info!("reconciling...");

    let Some(mut remediation) = ctx.client.get_remediation(namespace, name).await? else {
        info!("MDR already deleted, nothing to do");
        return Ok(Action::await_change());
    };

    let loaded = remediation.status.clone().unwrap_or_default();
    if is_terminal(&loaded) {
        debug!("remediation already completed");
        return Ok(Action::await_change());
    }

    let outcome = remediate(&mut remediation, ctx).await;
    complete_pass(&remediation, &loaded, outcome, ctx).await
}

async fn remediate(remediation: &mut MachineDeletionRemediation, ctx: &Context) -> Result<Action> {
    let requeue = &ctx.config.requeue;
    let node = remediation.name_any();

    if stop_requested(remediation, &ctx.config.annotations.stop_signal) {
        info!(node = %node, "NHC stop requested");
        transition(remediation, TransitionReason::RemediationStoppedByNhc, ctx);
        return Ok(Action::await_change());
    }

    if transition(remediation, TransitionReason::RemediationStarted, ctx) {
        return Ok(Action::requeue(requeue.short_delay()));
    }

    let Some(resolved) = resolve_machine(
        ctx.client.as_ref(),
        remediation,
        &ctx.config.annotations.node_machine,
    )
    .await?
    else {
        info!(node = %node, "node is gone, nothing left to remediate");
        transition(remediation, TransitionReason::RemediationFinished, ctx);
        return Ok(Action::await_change());
    };

    let machine = match ctx.client.get_machine(&resolved.key).await {
        Ok(Some(machine)) => machine,
        Ok(None) if resolved.must_exist() => {
            error!(node = %node, machine = %resolved.key, "failed to fetch machine of node");
            transition(remediation, TransitionReason::RemediationFailed, ctx);
            return Ok(Action::await_change());
        }
        Ok(None) => {
            info!(node = %node, machine = %resolved.key, "node-associated machine correctly deleted");
            transition(remediation, TransitionReason::RemediationFinished, ctx);
            return Ok(Action::await_change());
        }
        Err(e) => {
            error!(node = %node, machine = %resolved.key, error = %e, "Unexpected error fetching Machine from Node");
            return Err(e);
        }
    };

    info!(node = %node, machine = %resolved.key, "node-associated machine found");

    // Classification waits for the next external event if providerID is unreadable
    let provider_id = match machine.provider_id() {
        Ok(provider_id) => provider_id.unwrap_or_default(),
        Err(e) => {
            error!(machine = %resolved.key, error = %e, "could not get providerID");
            return Ok(Action::await_change());
        }
    };
    if provider_id.is_empty() {
        info!(machine = %resolved.key, "Machine does not have ProviderID");
    }

    let platform = Platform::classify(provider_id);
    if record_deletion_expectation(status_mut(remediation), platform) {
        info!(node = %node, "{}", platform.message());
        return Ok(Action::requeue(requeue.short_delay()));
    }

    if machine.is_deleting() {
        info!(
            node = %node,
            machine = %resolved.key,
            phase = machine.status_phase(),
            "node-associated machine was not deleted yet"
        );
        return Ok(Action::requeue(requeue.deletion_poll()));
    }

    if !machine.has_controller_owner() {
        warn!(
            node = %node,
            machine = %resolved.key,
            "ignoring remediation of node-associated machine: the machine has no controller owner"
        );
        return Ok(Action::await_change());
    }

    if !remediation.annotations().contains_key(MACHINE_BINDING_ANNOTATION) {
        let binding = resolved.key.to_string();
        let updated = ctx
            .client
            .save_annotation(remediation, MACHINE_BINDING_ANNOTATION, &binding)
            .await
            .inspect_err(|e| {
                error!(machine = %resolved.key, error = %e, "could not save Machine's Name and Namespace");
            })?;
        remediation.metadata = updated.metadata;
        debug!(machine = %resolved.key, "saved machine binding");
    }

    info!(node = %node, machine = %resolved.key, "request node-associated machine deletion");
    ctx.client
        .delete_machine(&resolved.key)
        .await
        .inspect_err(|e| {
            error!(node = %node, machine = %resolved.key, error = %e, "failed to delete machine associated to node");
        })?;
    ctx.observer.machine_deletion_requested(&node);

    Ok(Action::requeue(Duration::ZERO))
}

/// Persist the conditions if the pass changed them and fold the result into the outcome.
async fn complete_pass(
    remediation: &MachineDeletionRemediation,
    loaded: &MachineDeletionRemediationStatus,
    outcome: Result<Action>,
    ctx: &Context,
) -> Result<Action> {
    let unchanged = remediation
        .status
        .as_ref()
        .map_or(loaded.conditions.is_empty(), |status| status.conditions == loaded.conditions);
    if unchanged {
        return outcome;
    }

    match ctx.client.update_status(remediation).await {
        Ok(()) => outcome,
        Err(e) if e.is_conflict() => {
            debug!("status changed concurrently, next pass re-reads it");
            outcome.map(|_| Action::requeue(ctx.config.requeue.short_delay()))
        }
        Err(e) => {
            error!(error = %e, "failed to update mdr status");
            Err(Error::StatusPersist {
                source: Box::new(e),
                pass: outcome.err().map(Box::new),
            })
        }
    }
}

/// The health checker asks to stop by annotating a request that is not itself being deleted
fn stop_requested(remediation: &MachineDeletionRemediation, stop_annotation: &str) -> bool {
    remediation.metadata.deletion_timestamp.is_none()
        && remediation.annotations().contains_key(stop_annotation)
}

fn status_mut(remediation: &mut MachineDeletionRemediation) -> &mut MachineDeletionRemediationStatus {
    remediation.status.get_or_insert_with(Default::default)
}

fn transition(
    remediation: &mut MachineDeletionRemediation,
    reason: TransitionReason,
    ctx: &Context,
) -> bool {
    let changed = record_transition(status_mut(remediation), reason);
    if changed {
        ctx.observer
            .transition_recorded(&remediation.name_any(), reason);
    }
    changed
}
