mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{counting_body, fast_config, FakeConnector, FakeDirectory, Harness};
use nodevisor::collaborators::{NodeDescriptor, PingSystem};
use nodevisor::{
    EventKind, RuntimeBuilder, RuntimeError, ServiceCommand, ServiceContext, ServiceError, ServiceFn, ServiceStatus,
    ServiceType, DUMMY_NODE_ID,
};

const NODE: i64 = 7;
const WAIT: Duration = Duration::from_secs(2);

fn builder(connector: Arc<FakeConnector>) -> RuntimeBuilder {
    RuntimeBuilder::new(
        fast_config(),
        FakeDirectory::new(vec![NodeDescriptor::new(NODE, "node-7:10009")]),
        connector,
    )
    .bootstrap_core(false)
}

#[tokio::test]
async fn test_boot_reports_every_transition() {
    let body = ServiceFn::arc("link", |ctx: ServiceContext| async move {
        ctx.initializing();
        tokio::time::sleep(Duration::from_millis(60)).await;
        ctx.active();
        ctx.cancelled().await;
        Ok::<_, ServiceError>(())
    });
    let mut h = Harness::start(
        builder(FakeConnector::slow(Duration::from_millis(60))).with_service(ServiceType::NodeLinkService, body),
    );

    h.commands.boot(ServiceType::NodeLinkService, NODE);
    assert!(h.wait_until(WAIT, |h| h.status(ServiceType::NodeLinkService, NODE) == ServiceStatus::Active).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        h.drain_transitions(ServiceType::NodeLinkService, NODE),
        vec![ServiceStatus::Pending, ServiceStatus::Initializing, ServiceStatus::Active]
    );
    h.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_boots_run_one_body() {
    let starts = Arc::new(AtomicUsize::new(0));
    let connector = FakeConnector::slow(Duration::from_millis(50));
    let h = Harness::start(
        builder(Arc::clone(&connector)).with_service(ServiceType::NodeLinkService, counting_body(Arc::clone(&starts))),
    );

    h.commands.boot(ServiceType::NodeLinkService, NODE);
    h.commands.boot(ServiceType::NodeLinkService, NODE);
    assert!(h.wait_until(WAIT, |h| h.status(ServiceType::NodeLinkService, NODE) == ServiceStatus::Active).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(connector.attempts(), 1);
    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_delayed_boot_waits_for_fire_time() {
    let starts = Arc::new(AtomicUsize::new(0));
    let h = Harness::start(
        builder(FakeConnector::new()).with_service(ServiceType::RebalanceService, counting_body(Arc::clone(&starts))),
    );

    h.commands
        .send(ServiceCommand::boot(ServiceType::RebalanceService, NODE).with_delay_secs(5))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert_eq!(starts.load(Ordering::SeqCst), 0);
    assert_eq!(h.status(ServiceType::RebalanceService, NODE), ServiceStatus::Inactive);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(h.status(ServiceType::RebalanceService, NODE), ServiceStatus::Active);
    h.stop().await.unwrap();
}

#[tokio::test]
async fn test_core_death_runs_fatal_path_once() {
    let fired = Arc::new(AtomicUsize::new(0));
    let hook = Arc::clone(&fired);
    let mut h = Harness::start(
        RuntimeBuilder::new(fast_config(), FakeDirectory::new(Vec::new()), FakeConnector::new())
            .on_fatal(move || {
                hook.fetch_add(1, Ordering::SeqCst);
            }),
    );

    assert!(h.wait_until(WAIT, |h| h.status(ServiceType::CoreService, DUMMY_NODE_ID) == ServiceStatus::Active).await);
    h.commands
        .send(ServiceCommand::cancel(ServiceType::CoreService, DUMMY_NODE_ID))
        .unwrap();
    h.commands
        .send(ServiceCommand::cancel(ServiceType::CoreService, DUMMY_NODE_ID))
        .unwrap();

    let mut died = 0;
    let deadline = tokio::time::Instant::now() + WAIT;
    while died == 0 && tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(100), h.events.recv()).await {
            Ok(Ok(ev)) if ev.kind == EventKind::CoreServiceDied => died += 1,
            Ok(Ok(_)) | Err(_) => {}
            Ok(Err(_)) => break,
        }
    }
    assert_eq!(died, 1);

    let res = h.join().await;
    assert!(matches!(res, Err(RuntimeError::CoreServiceDied)));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_core_boot_starts_singletons_without_nodes() {
    let starts = Arc::new(AtomicUsize::new(0));
    let h = Harness::start(
        RuntimeBuilder::new(fast_config(), FakeDirectory::new(Vec::new()), FakeConnector::new())
            .with_service(ServiceType::MaintenanceService, counting_body(Arc::clone(&starts))),
    );

    assert!(
        h.wait_until(WAIT, |h| h.status(ServiceType::MaintenanceService, DUMMY_NODE_ID) == ServiceStatus::Active)
            .await
    );
    assert_eq!(h.status(ServiceType::CoreService, DUMMY_NODE_ID), ServiceStatus::Active);
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert!(h.registry.node_ids(ServiceType::NodeLinkService).is_empty());
    h.stop().await.unwrap();
}

#[tokio::test]
async fn test_link_connection_failure_cancels_dependents() {
    let link_starts = Arc::new(AtomicUsize::new(0));
    let dependent_starts: Vec<Arc<AtomicUsize>> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let connector = FakeConnector::new();
    let node = NodeDescriptor::new(NODE, "node-7:10009")
        .with_ping_system(PingSystem::A)
        .with_ping_system(PingSystem::B);
    let mut builder = RuntimeBuilder::new(fast_config(), FakeDirectory::new(vec![node]), Arc::<FakeConnector>::clone(&connector))
        .bootstrap_core(false)
        .with_service(ServiceType::NodeLinkService, counting_body(Arc::clone(&link_starts)));
    for (dep, starts) in ServiceType::NODE_LINK_DEPENDENTS.into_iter().zip(&dependent_starts) {
        builder = builder.with_service(dep, counting_body(Arc::clone(starts)));
    }
    let h = Harness::start(builder);

    h.commands.boot(ServiceType::NodeLinkService, NODE);
    assert!(
        h.wait_until(WAIT, |h| {
            ServiceType::NODE_LINK_DEPENDENTS
                .into_iter()
                .all(|dep| h.status(dep, NODE) == ServiceStatus::Active)
        })
        .await
    );

    connector.set_failing(true);
    h.commands
        .send(ServiceCommand::cancel(ServiceType::NodeLinkService, NODE).with_no_delay())
        .unwrap();

    assert!(
        h.wait_until(WAIT, |h| {
            connector.attempts() >= 2
                && h.status(ServiceType::NodeLinkService, NODE) == ServiceStatus::Inactive
                && ServiceType::NODE_LINK_DEPENDENTS.into_iter().all(|dep| {
                    h.status(dep, NODE) == ServiceStatus::Inactive && !h.registry.is_booting(dep, NODE)
                })
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.status(ServiceType::NodeLinkService, NODE), ServiceStatus::Inactive);
    assert_eq!(link_starts.load(Ordering::SeqCst), 1);
    for (dep, starts) in ServiceType::NODE_LINK_DEPENDENTS.into_iter().zip(&dependent_starts) {
        assert_eq!(h.status(dep, NODE), ServiceStatus::Inactive, "{dep}");
        assert_eq!(starts.load(Ordering::SeqCst), 1, "{dep} restarted");
    }
    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_instantly_failing_singleton_keeps_restarting() {
    let starts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&starts);
    let failing = ServiceFn::arc("failing", move |ctx: ServiceContext| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            ctx.active();
            Err::<(), _>(ServiceError::fail("maintenance query failed"))
        }
    });
    let mut cfg = fast_config();
    cfg.tick = Duration::from_secs(1);
    cfg.retry_delay = Duration::from_secs(5);
    let h = Harness::start(
        RuntimeBuilder::new(cfg, FakeDirectory::new(Vec::new()), FakeConnector::new())
            .bootstrap_core(false)
            .with_service(ServiceType::MaintenanceService, failing),
    );

    h.commands.boot(ServiceType::MaintenanceService, DUMMY_NODE_ID);
    tokio::time::sleep(Duration::from_secs(120)).await;

    // One cycle takes the retry delay plus at most two ticks.
    let restarts = starts.load(Ordering::SeqCst);
    assert!(restarts >= 10, "only {restarts} starts in two minutes");
    h.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancel_of_idle_service_is_silent() {
    let mut h = Harness::start(builder(FakeConnector::new()));

    h.commands
        .send(ServiceCommand::cancel(ServiceType::RebalanceService, 9))
        .unwrap();
    h.commands
        .send(ServiceCommand::cancel(ServiceType::RebalanceService, 9))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.status(ServiceType::RebalanceService, 9), ServiceStatus::Inactive);
    assert!(h.drain_transitions(ServiceType::RebalanceService, 9).is_empty());
    h.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_bodies_within_grace() {
    let starts = Arc::new(AtomicUsize::new(0));
    let h = Harness::start(
        builder(FakeConnector::new()).with_service(ServiceType::RebalanceService, counting_body(Arc::clone(&starts))),
    );

    h.commands.boot(ServiceType::RebalanceService, NODE);
    assert!(h.wait_until(WAIT, |h| h.status(ServiceType::RebalanceService, NODE) == ServiceStatus::Active).await);

    let registry = Arc::clone(&h.registry);
    let mut events = h.events.resubscribe();
    h.stop().await.unwrap();

    assert_eq!(registry.status(ServiceType::RebalanceService, NODE), ServiceStatus::Inactive);
    assert!(registry.running().is_empty());
    let mut stopped = false;
    while let Ok(ev) = events.try_recv() {
        stopped |= ev.kind == EventKind::AllStoppedWithin;
    }
    assert!(stopped);
}

#[tokio::test]
async fn test_stuck_body_exceeds_grace() {
    let stubborn = ServiceFn::arc("stubborn", |ctx: ServiceContext| async move {
        ctx.active();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok::<_, ServiceError>(())
    });
    let mut cfg = fast_config();
    cfg.grace = Duration::from_millis(50);
    let h = Harness::start(
        RuntimeBuilder::new(
            cfg,
            FakeDirectory::new(vec![NodeDescriptor::new(NODE, "node-7:10009")]),
            FakeConnector::new(),
        )
        .bootstrap_core(false)
        .with_service(ServiceType::RebalanceService, stubborn),
    );

    h.commands.boot(ServiceType::RebalanceService, NODE);
    assert!(h.wait_until(WAIT, |h| h.status(ServiceType::RebalanceService, NODE) == ServiceStatus::Active).await);

    let registry = Arc::clone(&h.registry);
    match h.stop().await {
        Err(RuntimeError::GraceExceeded { stuck, .. }) => {
            assert_eq!(stuck.len(), 1);
            assert!(stuck[0].ends_with("/7"));
        }
        other => panic!("expected grace exceeded, got {other:?}"),
    }
    assert_eq!(registry.status(ServiceType::RebalanceService, NODE), ServiceStatus::TimedOut);
}
