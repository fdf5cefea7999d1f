//! Contention tests: many independent callers racing on one coordinator.

mod common;

use std::sync::Arc;

use common::{config, Callbacks};
use enginecore::{
    AttemptId, DisposeOutcome, InitOutcome, LifecycleCoordinator, Phase, RuntimeError,
};
use enginecore_testing::{FakePipeline, Gate};
use futures::future::join_all;
use tokio::sync::{mpsc, Barrier};

const CALLERS: usize = 64;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_initialize_has_single_claimer() {
    let gate = Gate::new();
    let pipeline = FakePipeline::new().with_install_gate(Arc::clone(&gate));
    let stats = pipeline.stats();
    let coordinator = Arc::new(LifecycleCoordinator::new(pipeline));
    let barrier = Arc::new(Barrier::new(CALLERS));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let callbacks = Callbacks::new();

    for _ in 0..CALLERS {
        let coordinator = Arc::clone(&coordinator);
        let barrier = Arc::clone(&barrier);
        let callbacks = callbacks.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            barrier.wait().await;
            let outcome = coordinator
                .initialize(&config(), callbacks.on_error(), callbacks.on_restart())
                .await;
            tx.send(outcome).unwrap();
        });
    }
    drop(tx);

    // Everyone but the claimer returns while the claimer is held at the gate.
    let mut outcomes = Vec::with_capacity(CALLERS);
    for _ in 1..CALLERS {
        outcomes.push(rx.recv().await.unwrap().unwrap());
    }
    assert!(outcomes
        .iter()
        .all(|outcome| *outcome == InitOutcome::AlreadyInProgress));
    gate.wait_for_arrivals(1).await;
    assert_eq!(gate.arrived(), 1);

    gate.open();
    let last = rx.recv().await.unwrap().unwrap();
    assert!(last.is_claimer());
    assert!(rx.recv().await.is_none());

    assert_eq!(stats.pipeline_runs(), 1);
    assert_eq!(stats.installs(), 1);
    assert_eq!(stats.builds(), 1);
    assert_eq!(coordinator.phase(), Phase::Ready);
    assert!(callbacks.errors().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_handle_requests_share_one_runtime() {
    let gate = Gate::new();
    let pipeline = FakePipeline::new().with_build_gate(Arc::clone(&gate));
    let stats = pipeline.stats();
    let coordinator = Arc::new(LifecycleCoordinator::new(pipeline));

    let initializer = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.initialize(&config(), |_| {}, || {}).await })
    };
    gate.wait_for_arrivals(1).await;

    let requests: Vec<_> = (0..CALLERS)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.create_handle().await })
        })
        .collect();

    gate.open();
    initializer.await.unwrap().unwrap();

    let handles: Vec<_> = join_all(requests)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(handles.len(), CALLERS);
    assert!(handles.iter().all(|handle| handle.resource_id == 1));
    assert_eq!(stats.resources_built(), 1);
    assert_eq!(stats.handles_created(), CALLERS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_waiters_observe_failure_after_failed_install() {
    let gate = Gate::new();
    let pipeline = FakePipeline::new()
        .fail_install("archive corrupted")
        .with_install_gate(Arc::clone(&gate));
    let coordinator = Arc::new(LifecycleCoordinator::new(pipeline));
    let callbacks = Callbacks::new();

    let initializer = {
        let coordinator = Arc::clone(&coordinator);
        let callbacks = callbacks.clone();
        tokio::spawn(async move {
            coordinator
                .initialize(&config(), callbacks.on_error(), callbacks.on_restart())
                .await
        })
    };
    gate.wait_for_arrivals(1).await;

    let requests: Vec<_> = (0..CALLERS)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.create_handle().await })
        })
        .collect();

    gate.open();
    initializer.await.unwrap().unwrap();

    for joined in join_all(requests).await {
        let error = joined.unwrap().unwrap_err();
        assert!(matches!(error, RuntimeError::General(_)));
    }
    assert_eq!(callbacks.errors().len(), 1);
    assert_eq!(callbacks.restarts(), 1);
    assert!(coordinator.create_handle().await.unwrap_err().requires_restart());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_published_install_failure_cannot_be_reclaimed_before_claimer_finishes() {
    let gate = Gate::new();
    let pipeline = FakePipeline::new()
        .fail_install("offline")
        .with_build_gate(Arc::clone(&gate));
    let stats = pipeline.stats();
    let coordinator = Arc::new(LifecycleCoordinator::new(pipeline));
    let callbacks = Callbacks::new();

    let claimer = {
        let coordinator = Arc::clone(&coordinator);
        let callbacks = callbacks.clone();
        tokio::spawn(async move {
            coordinator
                .initialize(&config(), callbacks.on_error(), callbacks.on_restart())
                .await
        })
    };
    // The claimer has published the install failure and is held in its
    // best-effort build.
    gate.wait_for_arrivals(1).await;
    assert_eq!(coordinator.phase(), Phase::Failed);

    let late = Callbacks::new();
    let outcome = coordinator
        .initialize(&config(), late.on_error(), late.on_restart())
        .await
        .unwrap();
    assert_eq!(outcome, InitOutcome::AlreadyInProgress);
    assert_eq!(stats.pipeline_runs(), 1);

    let early = coordinator.create_handle().await.unwrap_err();
    assert!(matches!(early, RuntimeError::General(_)));

    gate.open();
    let outcome = claimer.await.unwrap().unwrap();
    assert_eq!(
        outcome,
        InitOutcome::Claimed {
            attempt: AttemptId::INITIAL.next(),
            phase: Phase::Failed,
        }
    );

    assert_eq!(stats.pipeline_runs(), 1);
    assert_eq!(stats.installs(), 1);
    assert_eq!(stats.releases(), 1);
    assert_eq!(callbacks.restarts(), 1);
    assert!(late.errors().is_empty());
    assert_eq!(late.restarts(), 0);
    assert!(coordinator.create_handle().await.unwrap_err().requires_restart());
}

#[tokio::test]
async fn test_cancelled_claimer_releases_its_claim() {
    let gate = Gate::new();
    let pipeline = FakePipeline::new()
        .fail_install("offline")
        .with_build_gate(Arc::clone(&gate));
    let stats = pipeline.stats();
    let coordinator = Arc::new(LifecycleCoordinator::new(pipeline));

    let claimer = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.initialize(&config(), |_| {}, || {}).await })
    };
    gate.wait_for_arrivals(1).await;
    assert!(coordinator.state_cell().is_in_flight());

    claimer.abort();
    assert!(claimer.await.unwrap_err().is_cancelled());
    assert!(!coordinator.state_cell().is_in_flight());
    assert_eq!(coordinator.phase(), Phase::Failed);

    gate.open();
    let outcome = coordinator
        .initialize(&config(), |_| {}, || {})
        .await
        .unwrap();
    assert!(outcome.is_claimer());
    assert_eq!(coordinator.phase(), Phase::Ready);
    assert_eq!(stats.pipeline_runs(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_dispose_releases_exactly_once() {
    let pipeline = FakePipeline::new();
    let stats = pipeline.stats();
    let coordinator = Arc::new(LifecycleCoordinator::new(pipeline));
    coordinator
        .initialize(&config(), |_| {}, || {})
        .await
        .unwrap();

    let barrier = Arc::new(Barrier::new(CALLERS));
    let disposers: Vec<_> = (0..CALLERS)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                coordinator.dispose().await
            })
        })
        .collect();

    let released = join_all(disposers)
        .await
        .into_iter()
        .map(Result::unwrap)
        .filter(|outcome| *outcome == DisposeOutcome::Released)
        .count();

    assert_eq!(released, 1);
    assert_eq!(stats.releases(), 1);
    assert_eq!(coordinator.phase(), Phase::Disposed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_handles_racing_dispose_never_outlive_release() {
    let pipeline = FakePipeline::new();
    let stats = pipeline.stats();
    let coordinator = Arc::new(LifecycleCoordinator::new(pipeline));
    coordinator
        .initialize(&config(), |_| {}, || {})
        .await
        .unwrap();

    let barrier = Arc::new(Barrier::new(CALLERS + 1));
    let requests: Vec<_> = (0..CALLERS)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                coordinator.create_handle().await
            })
        })
        .collect();
    let disposer = {
        let coordinator = Arc::clone(&coordinator);
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
            barrier.wait().await;
            coordinator.dispose().await
        })
    };

    let results = join_all(requests).await;
    assert_eq!(disposer.await.unwrap(), DisposeOutcome::Released);

    let succeeded = results
        .into_iter()
        .map(Result::unwrap)
        .filter(|result| match result {
            Ok(_) => true,
            Err(RuntimeError::Disposed) => false,
            Err(other) => panic!("unexpected error: {other}"),
        })
        .count();
    assert_eq!(stats.handles_created(), succeeded);
    assert_eq!(stats.releases(), 1);
}
