//! Tests for admission decisions, waiting and refresh policy.

use sluice_core::{Dimension, DimensionSignal, QuotaSignal, ResourceCost};
use sluice_error::{QuotaErrorKind, SluiceError, SluiceErrorKind};
use sluice_rate_limit::{AdmissionConfig, AdmissionController};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

fn exhausted(dimension: Dimension, reset_in: Duration) -> QuotaSignal {
    QuotaSignal::new().with(
        dimension,
        DimensionSignal::default()
            .with_limit(30)
            .with_remaining(0)
            .with_reset_in(reset_in),
    )
}

fn exceeded_wait(err: &SluiceError) -> Duration {
    match err.kind() {
        SluiceErrorKind::Quota(quota_err) => match quota_err.kind() {
            QuotaErrorKind::Exceeded { wait } => *wait,
            other => panic!("Expected quota exceeded, got {other:?}"),
        },
        other => panic!("Expected quota error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_no_information_admits_everything() {
    let controller = AdmissionController::new(AdmissionConfig::default());
    let huge = ResourceCost::new(1_000, 10_000_000, 100_000);

    assert!(controller.can_proceed(&huge).await);
    assert_eq!(controller.wait_time(&huge).await, Duration::ZERO);
    assert!(controller.needs_refresh().await);
}

#[tokio::test(start_paused = true)]
async fn test_wait_time_then_admissible_after_reset() {
    let controller = AdmissionController::new(AdmissionConfig::default());
    controller
        .record_outcome(Some(&exhausted(Dimension::Requests, Duration::from_secs(5))))
        .await
        .unwrap();

    let cost = ResourceCost::default();
    assert!(!controller.can_proceed(&cost).await);
    assert_eq!(controller.wait_time(&cost).await, Duration::from_secs(5));

    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(controller.can_proceed(&cost).await);
    assert_eq!(controller.wait_time(&cost).await, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_longest_blocking_dimension_wins() {
    let controller = AdmissionController::new(AdmissionConfig::default());
    let signal = exhausted(Dimension::Requests, Duration::from_secs(2)).with(
        Dimension::Tokens,
        DimensionSignal::default()
            .with_limit(1000)
            .with_remaining(10)
            .with_reset_in(Duration::from_secs(9)),
    );
    controller.record_outcome(Some(&signal)).await.unwrap();

    let cost = ResourceCost::default().with_tokens(500);
    assert_eq!(controller.wait_time(&cost).await, Duration::from_secs(9));

    let small = ResourceCost::default().with_tokens(5);
    assert_eq!(controller.wait_time(&small).await, Duration::from_secs(2));
}

#[tokio::test]
async fn test_unknown_reset_uses_fallback() {
    let config = AdmissionConfig::default().with_fallback_wait(Duration::from_secs(45));
    let controller = AdmissionController::new(config);
    let no_reset = QuotaSignal::new().with(
        Dimension::Tokens,
        DimensionSignal::default().with_limit(100).with_remaining(0),
    );
    controller.record_outcome(Some(&no_reset)).await.unwrap();

    let cost = ResourceCost::default().with_tokens(1);
    assert_eq!(controller.wait_time(&cost).await, Duration::from_secs(45));
}

#[tokio::test]
async fn test_untracked_dimension_never_blocks() {
    let controller = AdmissionController::new(AdmissionConfig::default());
    controller
        .record_outcome(Some(&QuotaSignal::new().with(
            Dimension::Requests,
            DimensionSignal::default().with_limit(30).with_remaining(30),
        )))
        .await
        .unwrap();

    assert!(controller.can_proceed(&ResourceCost::transcription(3_600)).await);
}

#[tokio::test]
async fn test_record_outcome_none_is_noop() {
    let controller = AdmissionController::new(AdmissionConfig::default());
    assert!(controller.record_outcome(None).await.unwrap().is_none());
    assert!(!controller.snapshot().await.has_info());
}

#[tokio::test(start_paused = true)]
async fn test_wait_if_needed_sleeps_until_reset() {
    let controller = AdmissionController::new(AdmissionConfig::default());
    controller
        .record_outcome(Some(&exhausted(Dimension::Requests, Duration::from_secs(5))))
        .await
        .unwrap();

    let started = Instant::now();
    controller
        .wait_if_needed(&ResourceCost::default())
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_wait_sees_updates_made_while_sleeping() {
    let controller = AdmissionController::new(AdmissionConfig::default());
    controller
        .record_outcome(Some(&exhausted(Dimension::Requests, Duration::from_secs(5))))
        .await
        .unwrap();

    let updater = controller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        updater
            .record_outcome(Some(&exhausted(Dimension::Requests, Duration::from_secs(10))))
            .await
            .unwrap();
    });

    let started = Instant::now();
    controller
        .wait_if_needed(&ResourceCost::default())
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_secs(13));
}

#[tokio::test(start_paused = true)]
async fn test_bounded_wait_reports_required_wait() {
    let config = AdmissionConfig::default().with_max_wait(Duration::from_secs(30));
    let controller = AdmissionController::new(config);
    controller
        .record_outcome(Some(&exhausted(Dimension::Tokens, Duration::from_secs(120))))
        .await
        .unwrap();

    let cost = ResourceCost::default().with_tokens(10);
    let started = Instant::now();
    let err = controller.wait_if_needed(&cost).await.unwrap_err();
    assert_eq!(exceeded_wait(&err), Duration::from_secs(120));
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_check_fails_fast() {
    let controller = AdmissionController::new(AdmissionConfig::default());
    controller
        .record_outcome(Some(&exhausted(Dimension::Requests, Duration::from_secs(4))))
        .await
        .unwrap();

    let err = controller.check(&ResourceCost::default()).await.unwrap_err();
    assert_eq!(exceeded_wait(&err), Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_acquire_debits_and_blocks_when_spent() {
    let controller = AdmissionController::new(AdmissionConfig::default());
    controller
        .record_outcome(Some(&QuotaSignal::new().with(
            Dimension::Requests,
            DimensionSignal::default()
                .with_limit(2)
                .with_remaining(2)
                .with_reset_in(Duration::from_secs(10)),
        )))
        .await
        .unwrap();

    let cost = ResourceCost::default();
    controller.acquire(&cost).await.unwrap();
    controller.try_acquire(&cost).await.unwrap();
    let err = controller.try_acquire(&cost).await.unwrap_err();
    assert_eq!(exceeded_wait(&err), Duration::from_secs(10));

    let started = Instant::now();
    controller.acquire(&cost).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_needs_refresh_policy() {
    let controller = AdmissionController::new(AdmissionConfig::default());
    let far = QuotaSignal::new()
        .with(
            Dimension::Requests,
            DimensionSignal::default()
                .with_limit(30)
                .with_remaining(30)
                .with_reset_in(Duration::from_secs(120)),
        )
        .with(
            Dimension::Tokens,
            DimensionSignal::default()
                .with_limit(6000)
                .with_remaining(6000)
                .with_reset_in(Duration::from_secs(300)),
        );
    controller.record_outcome(Some(&far)).await.unwrap();
    assert!(!controller.needs_refresh().await);

    // Request window now 30s from rolling over.
    tokio::time::advance(Duration::from_secs(90)).await;
    assert!(controller.needs_refresh().await);
}

#[tokio::test(start_paused = true)]
async fn test_stale_data_needs_refresh() {
    let controller = AdmissionController::new(AdmissionConfig::default());
    let no_resets = QuotaSignal::new().with(
        Dimension::Requests,
        DimensionSignal::default().with_limit(30).with_remaining(30),
    );
    controller.record_outcome(Some(&no_resets)).await.unwrap();
    assert!(!controller.needs_refresh().await);

    tokio::time::advance(Duration::from_secs(601)).await;
    assert!(controller.needs_refresh().await);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_if_needed_only_when_due() {
    let controller = AdmissionController::new(AdmissionConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let refresher = move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, SluiceError>(QuotaSignal::new().with(
                Dimension::Requests,
                DimensionSignal::default().with_limit(30).with_remaining(30),
            ))
        }
    };

    assert!(controller.refresh_if_needed(&refresher).await.unwrap().is_some());
    assert!(controller.refresh_if_needed(&refresher).await.unwrap().is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    controller.force_refresh(&refresher).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_summary_usage_percent() {
    let controller = AdmissionController::new(AdmissionConfig::default());
    controller
        .record_outcome(Some(&QuotaSignal::new().with(
            Dimension::Tokens,
            DimensionSignal::default()
                .with_limit(200)
                .with_remaining(50)
                .with_reset_in(Duration::from_secs(600)),
        )))
        .await
        .unwrap();

    let summary = controller.summary().await;
    assert!(summary.has_info);
    let tokens = &summary.dimensions[&Dimension::Tokens];
    assert_eq!(tokens.remaining, 50);
    assert!((tokens.used_percent - 75.0).abs() < f64::EPSILON);
    assert!(!summary.dimensions.contains_key(&Dimension::Requests));
}

#[tokio::test(start_paused = true)]
async fn test_periodic_refresh_runs_in_background() {
    let controller = AdmissionController::new(AdmissionConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let refresher = move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, SluiceError>(QuotaSignal::new().with(
                Dimension::Requests,
                DimensionSignal::default()
                    .with_limit(30)
                    .with_remaining(30)
                    .with_reset_in(Duration::from_secs(5)),
            ))
        }
    };

    let handle = controller.spawn_periodic_refresh(Arc::new(refresher), Duration::from_secs(10));
    tokio::time::sleep(Duration::from_secs(25)).await;
    handle.abort();

    assert!(calls.load(Ordering::SeqCst) >= 2);
    assert!(*controller.snapshot().await.has_info());
}
