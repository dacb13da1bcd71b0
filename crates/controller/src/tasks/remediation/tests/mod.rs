//! Reconcile scenarios against an in-memory cluster


use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;

use crate::crds::{
    ConditionStatus, ConditionType, MachineDeletionRemediationStatus, BARE_METAL_PROVIDER_REASON,
    CLOUD_PROVIDER_REASON, UNDEFINED_PROVIDER_REASON,
};
use crate::machine::MachineKey;
use crate::tasks::client::MockRemediationClient;
use crate::tasks::metrics::NoopObserver;
use crate::tasks::remediation::conditions::{record_transition, TransitionReason};
use crate::tasks::remediation::identity::IdentityError;
use crate::tasks::remediation::reconcile_remediation;
use crate::tasks::types::Error;

use fixtures::*;

const SHORT: Duration = Duration::from_secs(1);
const POLL: Duration = Duration::from_secs(30);

struct Harness {
    cluster: Arc<FakeCluster>,
    observer: Arc<RecordingObserver>,
    ctx: crate::tasks::types::Context,
}

impl Harness {
    fn new(cluster: FakeCluster) -> Self {
        let cluster = Arc::new(cluster);
        let observer = Arc::new(RecordingObserver::default());
        let ctx = context(cluster.clone(), observer.clone());
        Self {
            cluster,
            observer,
            ctx,
        }
    }

    async fn pass(&self) -> crate::tasks::Result<Action> {
        reconcile_remediation(NAMESPACE, NODE, &self.ctx).await
    }

    /// Processing/Succeeded as stored
    fn outcome(&self) -> (Option<ConditionStatus>, Option<ConditionStatus>) {
        (
            self.cluster.condition(ConditionType::Processing),
            self.cluster.condition(ConditionType::Succeeded),
        )
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_missing_remediation_is_not_an_error() {
        let harness = Harness::new(FakeCluster::new());

        assert_eq!(harness.pass().await.unwrap(), Action::await_change());
        assert_eq!(harness.observer.reconciles(), 1);
        assert!(harness.observer.transitions().is_empty());
    }

    #[tokio::test]
    async fn test_full_remediation_of_owned_machine() {
        let harness = Harness::new(healthy_setup(None));
        let key = machine_key();

        // Start is recorded before anything else happens
        assert_eq!(harness.pass().await.unwrap(), Action::requeue(SHORT));
        assert_eq!(
            harness.outcome(),
            (Some(ConditionStatus::True), Some(ConditionStatus::Unknown))
        );
        assert_eq!(harness.cluster.machine_fetches(), 0);

        // Classification is recorded before deletion
        assert_eq!(harness.pass().await.unwrap(), Action::requeue(SHORT));
        assert_eq!(
            harness
                .cluster
                .condition(ConditionType::PermanentNodeDeletionExpected),
            Some(ConditionStatus::Unknown)
        );
        assert_eq!(
            harness
                .cluster
                .condition_reason(ConditionType::PermanentNodeDeletionExpected)
                .as_deref(),
            Some(UNDEFINED_PROVIDER_REASON)
        );
        assert!(harness.cluster.delete_calls().is_empty());

        assert_eq!(harness.pass().await.unwrap(), Action::requeue(Duration::ZERO));
        assert_eq!(harness.cluster.binding(), Some(key.to_string()));
        assert_eq!(harness.cluster.delete_calls(), vec![key.clone()]);
        assert_eq!(harness.cluster.status_writes(), 2);

        // Deletion in flight
        assert_eq!(harness.pass().await.unwrap(), Action::requeue(POLL));
        assert_eq!(harness.cluster.delete_calls().len(), 1);

        harness.cluster.finish_deletion(&key);
        assert_eq!(harness.pass().await.unwrap(), Action::await_change());
        assert_eq!(
            harness.outcome(),
            (Some(ConditionStatus::False), Some(ConditionStatus::True))
        );
        assert_eq!(
            harness
                .cluster
                .condition_reason(ConditionType::Succeeded)
                .as_deref(),
            Some("RemediationFinished")
        );

        assert_eq!(
            harness.observer.transitions(),
            vec![
                TransitionReason::RemediationStarted,
                TransitionReason::RemediationFinished
            ]
        );
        assert_eq!(harness.observer.deletions(), 1);
        assert_eq!(harness.observer.reconciles(), 5);
    }

    #[tokio::test]
    async fn test_terminal_request_is_left_alone() {
        let harness = Harness::new(healthy_setup(None));
        for _ in 0..3 {
            harness.pass().await.unwrap();
        }
        harness.cluster.finish_deletion(&machine_key());
        harness.pass().await.unwrap();
        let writes = harness.cluster.status_writes();
        let stored = harness.cluster.stored_remediation();

        // Late signals must not reopen or rewrite a finished request
        harness.cluster.annotate_remediation(STOP_ANNOTATION, "");
        harness.cluster.put_machine(machine(&machine_key(), true, None));
        for _ in 0..3 {
            assert_eq!(harness.pass().await.unwrap(), Action::await_change());
        }

        assert_eq!(harness.cluster.status_writes(), writes);
        assert_eq!(harness.cluster.delete_calls().len(), 1);
        assert_eq!(harness.cluster.stored_remediation().status, stored.status);
        assert_eq!(
            harness.outcome(),
            (Some(ConditionStatus::False), Some(ConditionStatus::True))
        );
    }
}

mod stop_signal {
    use super::*;

    #[tokio::test]
    async fn test_stop_before_start_skips_machine_lookup() {
        let cluster = healthy_setup(None);
        cluster.annotate_remediation(STOP_ANNOTATION, "");
        let harness = Harness::new(cluster);

        assert_eq!(harness.pass().await.unwrap(), Action::await_change());
        assert_eq!(
            harness.outcome(),
            (Some(ConditionStatus::False), Some(ConditionStatus::False))
        );
        assert_eq!(
            harness
                .cluster
                .condition_reason(ConditionType::Processing)
                .as_deref(),
            Some("RemediationStoppedByNHC")
        );
        assert_eq!(harness.cluster.machine_fetches(), 0);

        assert_eq!(harness.pass().await.unwrap(), Action::await_change());
        assert_eq!(harness.cluster.status_writes(), 1);
        assert!(harness.cluster.delete_calls().is_empty());
        assert_eq!(
            harness.observer.transitions(),
            vec![TransitionReason::RemediationStoppedByNhc]
        );
    }

    #[tokio::test]
    async fn test_stop_during_deletion_ends_unsuccessful() {
        let harness = Harness::new(healthy_setup(None));
        for _ in 0..3 {
            harness.pass().await.unwrap();
        }
        harness.cluster.annotate_remediation(STOP_ANNOTATION, "true");

        assert_eq!(harness.pass().await.unwrap(), Action::await_change());
        assert_eq!(
            harness.outcome(),
            (Some(ConditionStatus::False), Some(ConditionStatus::False))
        );
    }

    #[tokio::test]
    async fn test_stop_ignored_while_request_is_being_deleted() {
        let mut request = remediation(&[(STOP_ANNOTATION, "")]);
        request.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
        );
        let key = machine_key();
        let harness = Harness::new(
            FakeCluster::new()
                .with_remediation(request)
                .with_node(node(Some(&key.to_string())))
                .with_machine(machine(&key, true, None)),
        );

        assert_eq!(harness.pass().await.unwrap(), Action::requeue(SHORT));
        assert_eq!(
            harness.outcome(),
            (Some(ConditionStatus::True), Some(ConditionStatus::Unknown))
        );
    }
}

mod identity {
    use super::*;

    #[tokio::test]
    async fn test_malformed_node_annotation_retries_forever() {
        let harness = Harness::new(
            FakeCluster::new()
                .with_remediation(remediation(&[]))
                .with_node(node(Some("not-a-valid-pair"))),
        );

        assert_eq!(harness.pass().await.unwrap(), Action::requeue(SHORT));

        for _ in 0..3 {
            let err = harness.pass().await.unwrap_err();
            let message = err.to_string();
            assert!(message.contains(NODE), "{message}");
            assert!(message.contains("not-a-valid-pair"), "{message}");
            assert!(matches!(
                err,
                Error::Identity(IdentityError::InvalidNodeAnnotation { .. })
            ));
        }

        assert_eq!(
            harness.outcome(),
            (Some(ConditionStatus::True), Some(ConditionStatus::Unknown))
        );
        assert_eq!(harness.cluster.status_writes(), 1);
        assert_eq!(harness.cluster.machine_fetches(), 0);
    }

    #[tokio::test]
    async fn test_missing_node_finishes_remediation() {
        let harness = Harness::new(FakeCluster::new().with_remediation(remediation(&[])));

        assert_eq!(harness.pass().await.unwrap(), Action::requeue(SHORT));
        assert_eq!(harness.pass().await.unwrap(), Action::await_change());
        assert_eq!(
            harness.outcome(),
            (Some(ConditionStatus::False), Some(ConditionStatus::True))
        );
        assert_eq!(
            harness
                .cluster
                .condition_reason(ConditionType::Succeeded)
                .as_deref(),
            Some("RemediationFinished")
        );
        assert_eq!(harness.cluster.machine_fetches(), 0);
        assert!(harness.cluster.delete_calls().is_empty());

        let writes = harness.cluster.status_writes();
        assert_eq!(harness.pass().await.unwrap(), Action::await_change());
        assert_eq!(harness.cluster.status_writes(), writes);
        assert_eq!(
            harness.observer.transitions(),
            vec![
                TransitionReason::RemediationStarted,
                TransitionReason::RemediationFinished
            ]
        );
    }

    #[tokio::test]
    async fn test_machine_gone_before_binding_fails_remediation() {
        let harness = Harness::new(
            FakeCluster::new()
                .with_remediation(remediation(&[]))
                .with_node(node(Some(&machine_key().to_string()))),
        );

        harness.pass().await.unwrap();
        assert_eq!(harness.pass().await.unwrap(), Action::await_change());
        assert_eq!(
            harness.outcome(),
            (Some(ConditionStatus::False), Some(ConditionStatus::False))
        );
        assert_eq!(
            harness
                .cluster
                .condition_reason(ConditionType::Succeeded)
                .as_deref(),
            Some("RemediationFailed")
        );
        assert!(harness.cluster.delete_calls().is_empty());
    }

    #[tokio::test]
    async fn test_binding_survives_node_annotation_change() {
        let harness = Harness::new(healthy_setup(None));
        let key = machine_key();
        for _ in 0..3 {
            harness.pass().await.unwrap();
        }
        assert_eq!(harness.cluster.binding(), Some(key.to_string()));

        // Node now points somewhere else
        let other = MachineKey::new(MACHINE_NAMESPACE, "replacement-machine");
        let harness = Harness::new(
            FakeCluster::new()
                .with_remediation(harness.cluster.stored_remediation())
                .with_node(node(Some(&other.to_string())))
                .with_machine(machine(&other, true, None)),
        );

        // Bound machine is gone: the remediation is finished, the other machine untouched
        assert_eq!(harness.pass().await.unwrap(), Action::await_change());
        assert_eq!(harness.cluster.binding(), Some(key.to_string()));
        assert!(harness.cluster.delete_calls().is_empty());
        assert_eq!(
            harness.outcome(),
            (Some(ConditionStatus::False), Some(ConditionStatus::True))
        );
    }

    #[tokio::test]
    async fn test_corrupted_binding_is_reported() {
        let harness = Harness::new(
            FakeCluster::new()
                .with_remediation(remediation(&[(
                    crate::crds::MACHINE_BINDING_ANNOTATION,
                    "no-separator",
                )]))
                .with_node(node(Some(&machine_key().to_string()))),
        );

        harness.pass().await.unwrap();
        let err = harness.pass().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Identity(IdentityError::InvalidBinding { ref value, .. }) if value == "no-separator"
        ));
    }
}

mod machine_checks {
    use super::*;

    #[tokio::test]
    async fn test_unowned_machine_is_never_deleted() {
        let key = machine_key();
        let harness = Harness::new(
            FakeCluster::new()
                .with_remediation(remediation(&[]))
                .with_node(node(Some(&key.to_string())))
                .with_machine(machine(&key, false, Some(json!("aws:///us-east-1a/i-0abc")))),
        );

        harness.pass().await.unwrap();
        harness.pass().await.unwrap();
        for _ in 0..3 {
            assert_eq!(harness.pass().await.unwrap(), Action::await_change());
        }

        assert!(harness.cluster.delete_calls().is_empty());
        assert_eq!(harness.cluster.binding(), None);
        assert_eq!(
            harness.outcome(),
            (Some(ConditionStatus::True), Some(ConditionStatus::Unknown))
        );
    }

    #[tokio::test]
    async fn test_platform_classification() {
        let cases = [
            (
                json!("baremetalhost:///openshift-machine-api/worker-0/uid"),
                ConditionStatus::False,
                BARE_METAL_PROVIDER_REASON,
            ),
            (
                json!("aws:///us-east-1a/i-0abc"),
                ConditionStatus::True,
                CLOUD_PROVIDER_REASON,
            ),
            (json!(""), ConditionStatus::Unknown, UNDEFINED_PROVIDER_REASON),
        ];

        for (provider_id, expected, reason) in cases {
            let harness = Harness::new(healthy_setup(Some(provider_id.clone())));
            harness.pass().await.unwrap();
            assert_eq!(harness.pass().await.unwrap(), Action::requeue(SHORT));

            assert_eq!(
                harness
                    .cluster
                    .condition(ConditionType::PermanentNodeDeletionExpected),
                Some(expected),
                "{provider_id}"
            );
            assert_eq!(
                harness
                    .cluster
                    .condition_reason(ConditionType::PermanentNodeDeletionExpected)
                    .as_deref(),
                Some(reason)
            );

            // Classification never gates deletion
            assert_eq!(harness.pass().await.unwrap(), Action::requeue(Duration::ZERO));
        }
    }

    #[tokio::test]
    async fn test_unreadable_provider_id_waits_without_writes() {
        let harness = Harness::new(healthy_setup(Some(json!(42))));

        harness.pass().await.unwrap();
        assert_eq!(harness.pass().await.unwrap(), Action::await_change());

        assert_eq!(
            harness
                .cluster
                .condition(ConditionType::PermanentNodeDeletionExpected),
            None
        );
        assert_eq!(harness.cluster.status_writes(), 1);
        assert!(harness.cluster.delete_calls().is_empty());
    }

    #[tokio::test]
    async fn test_annotation_conflict_defers_deletion() {
        let harness = Harness::new(healthy_setup(None));
        harness.pass().await.unwrap();
        harness.pass().await.unwrap();

        harness
            .cluster
            .edit_before_next_annotation("example.com/edited-by", "someone-else");
        let err = harness.pass().await.unwrap_err();
        assert!(err.is_conflict(), "{err}");
        assert_eq!(harness.cluster.binding(), None);
        assert!(harness.cluster.delete_calls().is_empty());
        assert_eq!(harness.observer.deletions(), 0);

        assert_eq!(harness.pass().await.unwrap(), Action::requeue(Duration::ZERO));
        assert_eq!(harness.cluster.binding(), Some(machine_key().to_string()));
        assert_eq!(harness.cluster.delete_calls(), vec![machine_key()]);
        assert_eq!(harness.cluster.annotation_writes(), 1);
        assert_eq!(
            harness
                .cluster
                .stored_remediation()
                .annotations()
                .get("example.com/edited-by")
                .map(String::as_str),
            Some("someone-else")
        );
    }

    #[tokio::test]
    async fn test_failed_delete_is_retried_without_rebinding() {
        let harness = Harness::new(healthy_setup(None));
        harness.pass().await.unwrap();
        harness.pass().await.unwrap();

        harness.cluster.set_fail_delete(true);
        let err = harness.pass().await.unwrap_err();
        assert!(matches!(err, Error::KubeError(_)));
        assert_eq!(harness.cluster.binding(), Some(machine_key().to_string()));
        assert_eq!(harness.observer.deletions(), 0);

        harness.cluster.set_fail_delete(false);
        assert_eq!(harness.pass().await.unwrap(), Action::requeue(Duration::ZERO));
        assert_eq!(harness.cluster.annotation_writes(), 1);
        assert_eq!(harness.cluster.delete_calls().len(), 2);
        assert_eq!(harness.observer.deletions(), 1);
    }
}

mod status_persistence {
    use super::*;

    fn stopped_request() -> crate::crds::MachineDeletionRemediation {
        let mut request = remediation(&[(STOP_ANNOTATION, "")]);
        request.metadata.resource_version = Some("7".to_string());
        request
    }

    fn mock_context(client: MockRemediationClient) -> crate::tasks::types::Context {
        context(Arc::new(client), Arc::new(NoopObserver))
    }

    #[tokio::test]
    async fn test_conflict_on_status_write_requeues_quietly() {
        let mut client = MockRemediationClient::new();
        client
            .expect_get_remediation()
            .returning(|_, _| Ok(Some(stopped_request())));
        client
            .expect_update_status()
            .times(1)
            .returning(|_| Err(api_error(409, "Conflict")));

        let ctx = mock_context(client);
        let action = reconcile_remediation(NAMESPACE, NODE, &ctx).await.unwrap();
        assert_eq!(action, Action::requeue(SHORT));
    }

    #[tokio::test]
    async fn test_other_status_write_failures_are_surfaced() {
        let mut client = MockRemediationClient::new();
        client
            .expect_get_remediation()
            .returning(|_, _| Ok(Some(stopped_request())));
        client
            .expect_update_status()
            .times(1)
            .returning(|_| Err(api_error(500, "InternalError")));

        let ctx = mock_context(client);
        let err = reconcile_remediation(NAMESPACE, NODE, &ctx)
            .await
            .unwrap_err();
        match err {
            Error::StatusPersist { source, pass } => {
                assert!(!source.is_conflict());
                assert!(pass.is_none());
            }
            other => panic!("expected StatusPersist, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unchanged_conditions_are_not_written() {
        let mut request = remediation(&[]);
        let mut status = MachineDeletionRemediationStatus::default();
        record_transition(&mut status, TransitionReason::RemediationStarted);
        request.status = Some(status);

        let mut client = MockRemediationClient::new();
        client
            .expect_get_remediation()
            .returning(move |_, _| Ok(Some(request.clone())));
        client.expect_update_status().never();
        client
            .expect_get_node()
            .returning(|_| Err(api_error(503, "ServiceUnavailable")));

        let ctx = mock_context(client);
        let err = reconcile_remediation(NAMESPACE, NODE, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KubeError(_)));
    }

    #[tokio::test]
    async fn test_machine_lookup_failure_propagates() {
        let binding = machine_key().to_string();
        let mut request = remediation(&[(crate::crds::MACHINE_BINDING_ANNOTATION, binding.as_str())]);
        let mut status = MachineDeletionRemediationStatus::default();
        record_transition(&mut status, TransitionReason::RemediationStarted);
        request.status = Some(status);

        let mut client = MockRemediationClient::new();
        client
            .expect_get_remediation()
            .returning(move |_, _| Ok(Some(request.clone())));
        client.expect_get_node().never();
        client
            .expect_get_machine()
            .times(1)
            .returning(|_| Err(api_error(500, "InternalError")));
        client.expect_delete_machine().never();

        let ctx = mock_context(client);
        let err = reconcile_remediation(NAMESPACE, NODE, &ctx)
            .await
            .unwrap_err();
        assert!(!err.is_conflict());
        assert!(matches!(err, Error::KubeError(_)));
    }
}
