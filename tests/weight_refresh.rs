//! Periodic weight refresh: cadence, overlap protection, failures, cancellation
//! and deregistration

use coordkit::discovery::{
    weight_fn, FixedWeight, InstanceKey, RefreshState, ServiceInstance, WeightPolicy,
};
use coordkit::{
    Config, CoordinationActor, Error, MemEnsemble, Namespaces, Registration, ServiceDiscovery,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

const BASE: &str = "/services";

async fn discovery(ensemble: &MemEnsemble) -> ServiceDiscovery {
    let session = ensemble.connect().await.unwrap();
    let (handle, _task) = CoordinationActor::spawn(session, Namespaces::default());
    ServiceDiscovery::new(handle, &Config::default())
}

async fn register(sd: &ServiceDiscovery, id: &str) -> InstanceKey {
    sd.make_discoverable(Registration::new("api", 80).instance_id(id))
        .await
        .unwrap()
        .key(BASE)
}

async fn weight_of(sd: &ServiceDiscovery, id: &str) -> u64 {
    sd.query_for_instance(BASE, "api", id).await.unwrap().weight
}

#[tokio::test]
async fn test_scheduled_refresh_publishes_weight() {
    let ensemble = MemEnsemble::new();
    let sd = discovery(&ensemble).await;
    let instance = sd
        .make_discoverable(
            Registration::new("api", 80)
                .instance_id("api-1")
                .refresh_every(Arc::new(FixedWeight(10)), Duration::from_millis(40)),
        )
        .await
        .unwrap();
    assert_eq!(instance.weight, 0);

    let key = instance.key(BASE);
    let status = sd.refresher().status(&key).await.unwrap();
    assert_eq!(status.runs, 0);
    assert!(status.last_run.is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(weight_of(&sd, "api-1").await, 10);

    let status = sd.refresher().status(&key).await.unwrap();
    assert!(status.runs >= 3, "only {} runs", status.runs);
    assert_eq!(status.failures, 0);
    assert!(status.last_run.is_some());
    assert_eq!(status.interval, Duration::from_millis(40));

    sd.close().await;
    assert!(sd.refresher().scheduled().await.is_empty());
}

#[tokio::test]
async fn test_slow_refreshes_never_overlap() {
    let ensemble = MemEnsemble::new();
    let sd = discovery(&ensemble).await;
    let key = register(&sd, "api-1").await;

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let policy = {
        let active = active.clone();
        let peak = peak.clone();
        weight_fn(move |inst: ServiceInstance| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                // Runs longer than the interval
                tokio::time::sleep(Duration::from_millis(120)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, Error>(inst.weight + 1)
            }
        })
    };
    sd.refresher()
        .schedule(key.clone(), Duration::from_millis(30), Arc::new(policy))
        .await
        .unwrap();

    let mut skipped = 0;
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if sd.refresher().trigger(&key).await == Some(false) {
            skipped += 1;
        }
    }

    let status = sd.refresher().cancel(&key).await.unwrap();
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(status.runs >= 2, "only {} runs", status.runs);
    assert!(skipped > 0);
    assert_eq!(weight_of(&sd, "api-1").await, status.runs);
}

#[tokio::test]
async fn test_trigger_is_rejected_while_refresh_in_flight() {
    let ensemble = MemEnsemble::new();
    let sd = discovery(&ensemble).await;
    let key = register(&sd, "api-1").await;

    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Semaphore::new(0));
    let policy = {
        let entered = entered.clone();
        let gate = gate.clone();
        weight_fn(move |_inst: ServiceInstance| {
            let entered = entered.clone();
            let gate = gate.clone();
            async move {
                entered.notify_one();
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|e| Error::Internal(e.to_string()))?;
                Ok::<_, Error>(5)
            }
        })
    };
    // Long interval so only manual triggers run
    sd.refresher()
        .schedule(key.clone(), Duration::from_secs(3600), Arc::new(policy))
        .await
        .unwrap();

    let first = {
        let refresher = sd.refresher().clone();
        let key = key.clone();
        tokio::spawn(async move { refresher.trigger(&key).await })
    };
    entered.notified().await;

    let status = sd.refresher().status(&key).await.unwrap();
    assert_eq!(status.state, RefreshState::Refreshing);
    assert_eq!(sd.refresher().trigger(&key).await, Some(false));

    gate.add_permits(1);
    assert_eq!(first.await.unwrap(), Some(true));
    assert_eq!(weight_of(&sd, "api-1").await, 5);

    let status = sd.refresher().status(&key).await.unwrap();
    assert_eq!(status.state, RefreshState::Scheduled);
    assert_eq!(status.runs, 1);

    assert_eq!(
        sd.refresher()
            .trigger(&InstanceKey::new(BASE, "api", "unknown"))
            .await,
        None
    );
}

#[tokio::test]
async fn test_failed_refresh_keeps_last_weight() {
    let ensemble = MemEnsemble::new();
    let sd = discovery(&ensemble).await;
    let key = register(&sd, "api-1").await;
    sd.update_weight(9, BASE, "api", "api-1").await.unwrap();

    let failing = weight_fn(|_inst: ServiceInstance| async {
        Err::<u64, _>(Error::Other("metrics backend down".into()))
    });
    sd.refresher()
        .schedule(key.clone(), Duration::from_millis(30), Arc::new(failing))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = sd.refresher().status(&key).await.unwrap();
    assert!(status.failures >= 2, "only {} failures", status.failures);
    assert_ne!(status.state, RefreshState::Deregistered);
    assert_eq!(weight_of(&sd, "api-1").await, 9);
}

#[tokio::test]
async fn test_refresh_of_removed_instance_deregisters() {
    let ensemble = MemEnsemble::new();
    let sd = discovery(&ensemble).await;
    let key = register(&sd, "api-1").await;
    sd.refresher()
        .schedule(key.clone(), Duration::from_secs(3600), Arc::new(FixedWeight(3)))
        .await
        .unwrap();

    // Removed behind the scheduler's back
    sd.registry().unregister(BASE, "api", "api-1").await.unwrap();

    assert_eq!(sd.refresher().trigger(&key).await, Some(true));
    let status = sd.refresher().status(&key).await.unwrap();
    assert_eq!(status.failures, 1);
    assert_eq!(status.state, RefreshState::Deregistered);

    assert_eq!(sd.refresher().trigger(&key).await, None);
    assert!(sd.refresher().scheduled().await.is_empty());
    assert!(ensemble.stat("/services/api/api-1").await.is_none());
}

#[tokio::test]
async fn test_closed_coordinator_stops_refresh() {
    let ensemble = MemEnsemble::new();
    let session = ensemble.connect().await.unwrap();
    let (handle, _task) = CoordinationActor::spawn(session, Namespaces::default());
    let sd = ServiceDiscovery::new(handle.clone(), &Config::default());
    let key = sd
        .make_discoverable(
            Registration::new("api", 80)
                .instance_id("api-1")
                .refresh_every(Arc::new(FixedWeight(3)), Duration::from_millis(20)),
        )
        .await
        .unwrap()
        .key(BASE);

    tokio::time::sleep(Duration::from_millis(70)).await;
    handle.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = sd.refresher().status(&key).await.unwrap();
    assert_eq!(status.state, RefreshState::Deregistered);
    assert_eq!(status.failures, 1);

    // The timer is gone too
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sd.refresher().status(&key).await.unwrap().runs, status.runs);
    assert!(sd.refresher().scheduled().await.is_empty());
}

#[tokio::test]
async fn test_manual_update_is_overwritten_by_next_tick() {
    let ensemble = MemEnsemble::new();
    let sd = discovery(&ensemble).await;
    let key = register(&sd, "api-1").await;
    sd.refresher()
        .schedule(key.clone(), Duration::from_millis(100), Arc::new(FixedWeight(10)))
        .await
        .unwrap();

    sd.update_weight(99, BASE, "api", "api-1").await.unwrap();
    assert_eq!(weight_of(&sd, "api-1").await, 99);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(weight_of(&sd, "api-1").await, 10);
}

#[tokio::test]
async fn test_unregister_cancels_refresh() {
    let ensemble = MemEnsemble::new();
    let sd = discovery(&ensemble).await;
    let counter = Arc::new(AtomicUsize::new(0));
    let policy: Arc<dyn WeightPolicy> = {
        let counter = counter.clone();
        Arc::new(weight_fn(move |_inst: ServiceInstance| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Error>(1) }
        }))
    };
    let key = sd
        .make_discoverable(
            Registration::new("api", 80)
                .instance_id("api-1")
                .refresh_every(policy, Duration::from_millis(20)),
        )
        .await
        .unwrap()
        .key(BASE);

    tokio::time::sleep(Duration::from_millis(100)).await;
    sd.unregister(BASE, "api", "api-1").await.unwrap();
    assert!(sd.refresher().status(&key).await.is_none());

    let calls = counter.load(Ordering::SeqCst);
    assert!(calls > 0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(counter.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn test_cancel_reports_deregistered() {
    let ensemble = MemEnsemble::new();
    let sd = discovery(&ensemble).await;
    let key = register(&sd, "api-1").await;
    sd.refresher()
        .schedule(key.clone(), Duration::from_secs(60), Arc::new(FixedWeight(1)))
        .await
        .unwrap();

    let status = sd.refresher().cancel(&key).await.unwrap();
    assert_eq!(status.state, RefreshState::Deregistered);
    assert!(sd.refresher().cancel(&key).await.is_none());
}

#[tokio::test]
async fn test_rescheduling_replaces_previous_task() {
    let ensemble = MemEnsemble::new();
    let sd = discovery(&ensemble).await;
    let key = register(&sd, "api-1").await;

    sd.refresher()
        .schedule(key.clone(), Duration::from_secs(60), Arc::new(FixedWeight(1)))
        .await
        .unwrap();
    sd.refresher()
        .schedule(key.clone(), Duration::from_millis(30), Arc::new(FixedWeight(2)))
        .await
        .unwrap();

    assert_eq!(sd.refresher().scheduled().await, vec![key.clone()]);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(weight_of(&sd, "api-1").await, 2);
}

#[tokio::test]
async fn test_rescheduling_during_trigger_keeps_one_refresh_in_flight() {
    let ensemble = MemEnsemble::new();
    let sd = discovery(&ensemble).await;
    let key = register(&sd, "api-1").await;

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let policy: Arc<dyn WeightPolicy> = {
        let active = active.clone();
        let peak = peak.clone();
        Arc::new(weight_fn(move |inst: ServiceInstance| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(150)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, Error>(inst.weight + 1)
            }
        }))
    };
    sd.refresher()
        .schedule(key.clone(), Duration::from_secs(3600), policy.clone())
        .await
        .unwrap();

    let first = {
        let refresher = sd.refresher().clone();
        let key = key.clone();
        tokio::spawn(async move { refresher.trigger(&key).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Replace the schedule while the first refresh is still running
    let rescheduled = {
        let refresher = sd.refresher().clone();
        let key = key.clone();
        let policy = policy.clone();
        tokio::spawn(async move {
            refresher
                .schedule(key, Duration::from_secs(3600), policy)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sd.refresher().trigger(&key).await, Some(false));

    assert_eq!(first.await.unwrap(), Some(true));
    rescheduled.await.unwrap().unwrap();
    assert_eq!(sd.refresher().trigger(&key).await, Some(true));

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(weight_of(&sd, "api-1").await, 2);
}

#[tokio::test]
async fn test_zero_interval_is_rejected() {
    let ensemble = MemEnsemble::new();
    let sd = discovery(&ensemble).await;
    let key = register(&sd, "api-1").await;

    let err = sd
        .refresher()
        .schedule(key, Duration::ZERO, Arc::new(FixedWeight(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}
