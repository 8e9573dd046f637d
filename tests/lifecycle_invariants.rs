//! Properties that must hold for every host regardless of how remote calls fail.

use futures::future::join_all;
use hostflow_core::constants::messages;
use hostflow_core::error::StepError;
use hostflow_core::messaging::StepQueue;
use hostflow_core::orchestration::ProcessOutcome;
use hostflow_core::persistence::LifecycleStore;
use hostflow_core::test_helpers::{TestHarness, SESSION_REFRESH};
use hostflow_core::{HostflowError, LifecycleState};

fn assert_single_start(results: Vec<hostflow_core::Result<hostflow_core::WorkflowAck>>) {
    let started = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(started, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, HostflowError::WorkflowInFlight { .. })));
}

#[tokio::test]
async fn test_concurrent_starts_admit_a_single_workflow() {
    let harness = TestHarness::new();
    let host = harness.insert_host("race-01").await;

    let attempts = (0..16).map(|_| {
        let orchestrator = harness.orchestrator.clone();
        let request = harness.creation_request(host.id);
        tokio::spawn(async move { orchestrator.start_creation(request).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_single_start(results);
    assert_eq!(harness.queue.depth().await.unwrap(), 1);
    let lifecycle = harness.lifecycles.find_by_host(host.id).await.unwrap().unwrap();
    assert_eq!(lifecycle.status, LifecycleState::CreationInProgress);
}

#[tokio::test]
async fn test_concurrent_deletions_admit_a_single_workflow() {
    let harness = TestHarness::new();
    let host = harness.provisioned_host("race-02").await;

    let attempts = (0..16).map(|_| {
        let orchestrator = harness.orchestrator.clone();
        tokio::spawn(async move { orchestrator.start_deletion(host.id, None).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_single_start(results);
    assert_eq!(harness.queue.depth().await.unwrap(), 1);
    let lifecycle = harness.lifecycles.find_by_host(host.id).await.unwrap().unwrap();
    assert_eq!(lifecycle.status, LifecycleState::DeletionInProgress);
}

#[tokio::test]
async fn test_creation_and_deletion_never_overlap_on_an_active_host() {
    let harness = TestHarness::new();
    let host = harness.provisioned_host("race-03").await;
    harness.monitoring.register_host("race-03");

    let deletion = harness.orchestrator.start_deletion(host.id, None).await.unwrap();
    let err = harness
        .orchestrator
        .start_creation(harness.creation_request(host.id))
        .await
        .unwrap_err();
    assert!(matches!(err, HostflowError::WorkflowInFlight { .. }));

    harness.drain().await;
    assert_eq!(harness.monitoring.calls("host.create"), 0);
    assert_eq!(
        harness.lifecycle(deletion.lifecycle_id).await.status,
        LifecycleState::Inactive
    );
}

#[tokio::test]
async fn test_host_is_free_again_once_workflow_ends() {
    let harness = TestHarness::new();
    harness
        .monitoring
        .always_fail("host.create", StepError::transient("host.create", "503"));
    let host = harness.insert_host("again-01").await;

    harness
        .orchestrator
        .start_creation(harness.creation_request(host.id))
        .await
        .unwrap();
    let err = harness
        .orchestrator
        .start_creation(harness.creation_request(host.id))
        .await
        .unwrap_err();
    assert!(matches!(err, HostflowError::WorkflowInFlight { .. }));

    harness.drain().await;
    let ack = harness
        .orchestrator
        .start_creation(harness.creation_request(host.id))
        .await
        .unwrap();
    assert_eq!(ack.status, LifecycleState::CreationInProgress);
}

#[tokio::test]
async fn test_deletion_never_runs_when_existence_check_keeps_failing() {
    let harness = TestHarness::new();
    harness
        .monitoring
        .always_fail("host.get", StepError::transient("host.get", "timed out"));
    let host = harness.provisioned_host("unreachable-01").await;
    harness.monitoring.register_host("unreachable-01");

    let ack = harness
        .orchestrator
        .start_deletion(host.id, None)
        .await
        .unwrap();
    harness.drain().await;

    assert_eq!(harness.monitoring.calls("host.get"), 9);
    assert_eq!(harness.monitoring.calls("host.delete"), 0);
    assert_eq!(harness.monitoring.remote_host_count(), 1);

    let lifecycle = harness.lifecycle(ack.lifecycle_id).await;
    assert_eq!(lifecycle.status, LifecycleState::DeletionFailed);
    assert_eq!(lifecycle.status_message, messages::REMOTE_UNAVAILABLE);
}

#[tokio::test]
async fn test_auth_invalid_is_retried_by_the_queue_only() {
    let harness = TestHarness::new();
    harness.monitoring.always_fail(
        "host.create",
        StepError::auth_invalid("host.create", "Session terminated, re-login, please."),
    );
    let host = harness.insert_host("expired-01").await;

    let ack = harness
        .orchestrator
        .start_creation(harness.creation_request(host.id))
        .await
        .unwrap();
    let outcomes = harness.drain().await;

    assert_eq!(
        outcomes,
        vec![
            ProcessOutcome::Retried {
                delay: std::time::Duration::ZERO
            },
            ProcessOutcome::Retried {
                delay: std::time::Duration::ZERO
            },
            ProcessOutcome::Compensated,
        ]
    );
    assert_eq!(harness.monitoring.calls("host.create"), 3);
    // each rejection renews the session before the next attempt
    assert_eq!(harness.monitoring.calls(SESSION_REFRESH), 3);
    assert_eq!(
        harness.lifecycle(ack.lifecycle_id).await.status_message,
        messages::REMOTE_AUTH_REJECTED
    );
}

#[tokio::test]
async fn test_later_step_exhaustion_is_bounded_and_keeps_earlier_progress() {
    let harness = TestHarness::new();
    harness.monitoring.always_fail(
        "hostinterface.get",
        StepError::transient("hostinterface.get", "502 Bad Gateway"),
    );
    let host = harness.insert_host("iface-01").await;

    let ack = harness
        .orchestrator
        .start_creation(harness.creation_request(host.id))
        .await
        .unwrap();
    harness.drain().await;

    assert_eq!(harness.monitoring.calls("host.create"), 1);
    assert_eq!(harness.monitoring.calls("hostinterface.get"), 9);
    assert_eq!(harness.monitoring.calls("item.create"), 0);
    assert_eq!(harness.monitoring.remote_host_count(), 1);
    assert_eq!(
        harness.lifecycle(ack.lifecycle_id).await.status,
        LifecycleState::CreationFailed
    );
}

#[tokio::test]
async fn test_single_transient_blip_does_not_fail_the_workflow() {
    let harness = TestHarness::new();
    for _ in 0..3 {
        harness
            .monitoring
            .fail_next("item.create", StepError::transient("item.create", "connection reset"));
    }
    let host = harness.insert_host("blip-01").await;

    let ack = harness
        .orchestrator
        .start_creation(harness.creation_request(host.id))
        .await
        .unwrap();
    let outcomes = harness.drain().await;

    assert!(outcomes.contains(&ProcessOutcome::Retried {
        delay: std::time::Duration::ZERO
    }));
    assert_eq!(harness.monitoring.calls("item.create"), 4);
    assert_eq!(
        harness.lifecycle(ack.lifecycle_id).await.status,
        LifecycleState::Active
    );
}
