mod common;

use std::time::Duration;

use common::{fast_config, FakeConnector, FakeDirectory, Harness};
use nodevisor::triggers::{ExecutorStatus, TriggerExecutor, TriggerOrigin, TriggerRegistry, TriggerRequest};
use nodevisor::{RuntimeBuilder, TriggerError};
use tokio_util::sync::CancellationToken;

fn request(origin_id: i64, incoming: i64, outgoing: i64) -> TriggerRequest {
    TriggerRequest {
        origin: TriggerOrigin::Workflow,
        origin_id,
        origin_reference: format!("wf-{origin_id}"),
        incoming_channel_id: incoming,
        outgoing_channel_id: outgoing,
        amount_msat: 50_000_000,
    }
}

#[tokio::test]
async fn test_cancel_all_except_keeps_listed_channels() {
    let registry = TriggerRegistry::spawn(16, CancellationToken::new());
    let mut executors = Vec::new();
    for channel in [101, 102, 103] {
        let exec = TriggerExecutor::new(request(3, channel, 0), CancellationToken::new());
        assert!(registry.write(exec.clone()).await.unwrap());
        executors.push(exec);
    }
    let other_origin = TriggerExecutor::new(request(4, 102, 0), CancellationToken::new());
    assert!(registry.write(other_origin.clone()).await.unwrap());

    let cancelled = registry
        .cancel_all_except(TriggerOrigin::Workflow, 3, &[101])
        .await
        .unwrap();

    assert_eq!(cancelled, 2);
    assert!(!executors[0].token().is_cancelled());
    assert!(executors[1].token().is_cancelled());
    assert!(executors[2].token().is_cancelled());
    assert!(!other_origin.token().is_cancelled());

    let kept = registry
        .read(TriggerOrigin::Workflow, 3, 101, 0)
        .await
        .unwrap();
    assert!(kept.is_some());
    assert!(registry
        .read(TriggerOrigin::Workflow, 3, 102, 0)
        .await
        .unwrap()
        .is_none());
    assert_eq!(registry.read_all(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_one_executor_per_channel() {
    let registry = TriggerRegistry::spawn(16, CancellationToken::new());
    let first = TriggerExecutor::new(request(3, 101, 202), CancellationToken::new());
    let overlapping = TriggerExecutor::new(request(3, 303, 202), CancellationToken::new());

    assert!(registry.write(first.clone()).await.unwrap());
    assert!(!registry.write(overlapping).await.unwrap());

    first.set_status(ExecutorStatus::Active);
    let active = registry.read_all(Some(ExecutorStatus::Active)).await.unwrap();
    assert_eq!(active.len(), 1);

    assert!(registry.cancel(TriggerOrigin::Workflow, 3, 202).await.unwrap());
    assert!(first.token().is_cancelled());
    // Both keys of the executor are released.
    assert!(registry
        .read(TriggerOrigin::Workflow, 3, 101, 0)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_registry_closes_with_runtime() {
    let h = Harness::start(
        RuntimeBuilder::new(fast_config(), FakeDirectory::new(Vec::new()), FakeConnector::new())
            .bootstrap_core(false),
    );
    let triggers = h.triggers.clone();

    let exec = TriggerExecutor::new(request(9, 11, 0), CancellationToken::new());
    assert!(triggers.write(exec).await.unwrap());

    h.stop().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(matches!(
        triggers.read_all(None).await,
        Err(TriggerError::RegistryClosed)
    ));
}
