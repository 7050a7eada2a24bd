//! Tests for the session facade.

use reqwest::header::{HeaderMap, HeaderValue};
use sluice::{
    Attempt, ConfigErrorKind, Dimension, DimensionSignal, OperationError, OperationErrorKind,
    Priority, QueueErrorKind, QuotaErrorKind, QuotaSignal, RequestStatus, ResourceCost, Sluice,
    SluiceConfig, SluiceError, SluiceErrorKind,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;

fn session<T: Send + 'static>() -> Sluice<T> {
    Sluice::new(SluiceConfig::default()).unwrap()
}

fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        headers.insert(*name, HeaderValue::from_static(*value));
    }
    headers
}

fn kind(err: &SluiceError) -> &SluiceErrorKind {
    err.kind()
}

#[test]
fn test_new_rejects_invalid_config() {
    let mut config = SluiceConfig::default();
    config.queue.max_queue_size = 0;

    let err = Sluice::<()>::new(config).unwrap_err();
    match kind(&err) {
        SluiceErrorKind::Config(config_err) => {
            assert!(matches!(
                config_err.kind(),
                ConfigErrorKind::Invalid { field, .. } if field == "queue.max_queue_size"
            ));
        }
        other => panic!("Expected config error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_observe_headers_updates_quota() {
    let session = session::<()>();

    let update = session
        .observe_headers(&headers(&[
            ("x-ratelimit-limit-requests", "30"),
            ("x-ratelimit-remaining-requests", "12"),
            ("x-ratelimit-reset-requests", "20s"),
            ("x-ratelimit-limit-tokens", "150000"),
            ("x-ratelimit-remaining-tokens", "149000"),
        ]))
        .await
        .unwrap()
        .expect("rate limit headers present");
    assert_eq!(update.applied().len(), 2);

    let report = session.quota_snapshot().await;
    assert!(report.has_info);
    let requests = &report.dimensions[&Dimension::Requests];
    assert_eq!(requests.limit, 30);
    assert_eq!(requests.remaining, 12);
    assert!(requests.reset_in_ms.is_some_and(|ms| ms <= 20_000));
    assert_eq!(report.dimensions[&Dimension::Tokens].remaining, 149_000);
    assert!(!report.dimensions.contains_key(&Dimension::AudioSeconds));

    // The request window resets within the 30s refresh window.
    assert!(session.quota_summary().await.needs_refresh);
}

#[tokio::test]
async fn test_observe_headers_without_rate_limits_is_noop() {
    let session = session::<()>();

    let update = session
        .observe_headers(&headers(&[("content-type", "application/json")]))
        .await
        .unwrap();

    assert!(update.is_none());
    assert!(!session.quota_snapshot().await.has_info);
}

#[tokio::test]
async fn test_malformed_headers_leave_state_unchanged() {
    let session = session::<()>();
    session
        .observe_headers(&headers(&[
            ("x-ratelimit-limit-requests", "30"),
            ("x-ratelimit-remaining-requests", "30"),
        ]))
        .await
        .unwrap();
    let before = session.quota_snapshot().await;

    let err = session
        .observe_headers(&headers(&[
            ("x-ratelimit-remaining-requests", "5"),
            ("x-ratelimit-reset-requests", "whenever"),
        ]))
        .await
        .unwrap_err();

    assert!(matches!(
        kind(&err),
        SluiceErrorKind::Quota(quota_err) if matches!(quota_err.kind(), QuotaErrorKind::InvalidSignal(_))
    ));
    assert_eq!(
        session.quota_snapshot().await.dimensions,
        before.dimensions
    );
}

#[tokio::test]
async fn test_clones_share_queue_and_quota() {
    let session = session::<u32>();
    let other = session.clone();

    let id = other
        .enqueue(|| async { Attempt::ok(1) }, ResourceCost::default(), Priority::Low)
        .await
        .unwrap();
    assert_eq!(session.status().await.total, 1);
    assert_eq!(session.request_status(&id).await, Some(RequestStatus::Queued));

    session
        .observe_headers(&headers(&[("x-ratelimit-limit-tokens", "1000")]))
        .await
        .unwrap();
    assert!(other.quota_snapshot().await.has_info);

    other.cancel(&id).await.unwrap();
    assert_eq!(
        session.request_status(&id).await,
        Some(RequestStatus::Cancelled)
    );
}

#[tokio::test]
async fn test_worker_resolves_tickets() {
    let session = session::<String>();
    let worker = session.start().unwrap();

    let err = session.start().unwrap_err();
    assert!(matches!(
        kind(&err),
        SluiceErrorKind::Queue(queue_err) if matches!(queue_err.kind(), QueueErrorKind::AlreadyProcessing)
    ));

    let ticket = session
        .submit(
            || async { Attempt::ok("done".to_string()) },
            ResourceCost::text("Summarize this", 64),
            Priority::High,
        )
        .await
        .unwrap();
    assert_eq!(ticket.outcome().await.unwrap(), "done");

    worker.stop().await;
    assert_eq!(session.status().await.stats.total_processed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_quota_from_one_call_gates_the_next() {
    let session = session::<Instant>();

    let exhausting = || async {
        Attempt::ok(Instant::now()).with_signal(QuotaSignal::new().with(
            Dimension::Requests,
            DimensionSignal::default()
                .with_limit(10)
                .with_remaining(0)
                .with_reset_in(Duration::from_secs(5)),
        ))
    };
    let first = session
        .submit(exhausting, ResourceCost::default(), Priority::Normal)
        .await
        .unwrap();
    let second = session
        .submit(
            || async { Attempt::ok(Instant::now()) },
            ResourceCost::default(),
            Priority::Normal,
        )
        .await
        .unwrap();

    session.dispatcher().run_until_idle().await.unwrap();

    let first_at = first.outcome().await.unwrap();
    let second_at = second.outcome().await.unwrap();
    assert!(second_at.duration_since(first_at) >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_uses_configured_retry_budget() {
    let mut config = SluiceConfig::default();
    config.queue.default_max_retries = 1;
    let session: Sluice<()> = Sluice::new(config).unwrap();

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let ticket = session
        .submit(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Attempt::err(OperationError::new(OperationErrorKind::Timeout(
                        "no response".into(),
                    )))
                }
            },
            ResourceCost::default(),
            Priority::Normal,
        )
        .await
        .unwrap();

    session.dispatcher().run_until_idle().await.unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    let err = ticket.outcome().await.unwrap_err();
    assert!(matches!(
        kind(&err),
        SluiceErrorKind::Operation(op) if matches!(op.kind(), OperationErrorKind::RetriesExhausted { attempts: 2, .. })
    ));
}
