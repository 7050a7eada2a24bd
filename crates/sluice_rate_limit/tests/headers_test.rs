//! Tests for rate limit header parsing.

use reqwest::header::{HeaderMap, HeaderValue};
use sluice_core::Dimension;
use sluice_error::{QuotaErrorKind, SluiceErrorKind};
use sluice_rate_limit::{QuotaState, signal_from_headers};
use std::time::Duration;
use tokio::time::Instant;

fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        map.insert(*name, HeaderValue::from_static(*value));
    }
    map
}

#[tokio::test(start_paused = true)]
async fn test_full_header_family() {
    let map = headers(&[
        ("x-ratelimit-limit-requests", "30"),
        ("x-ratelimit-remaining-requests", "29"),
        ("x-ratelimit-reset-requests", "2s"),
        ("x-ratelimit-limit-tokens", "6000"),
        ("x-ratelimit-remaining-tokens", "5400"),
        ("x-ratelimit-reset-tokens", "6s"),
        ("x-ratelimit-limit-audio-seconds", "7200"),
        ("x-ratelimit-remaining-audio-seconds", "7000"),
        ("x-ratelimit-reset-audio-seconds", "1m30s"),
    ]);

    let now = Instant::now();
    let signal = signal_from_headers(&map).unwrap().unwrap();

    let requests = signal.get(Dimension::Requests).unwrap();
    assert_eq!(*requests.limit(), Some(30));
    assert_eq!(*requests.remaining(), Some(29));
    assert_eq!(*requests.reset_at(), Some(now + Duration::from_secs(2)));

    let tokens = signal.get(Dimension::Tokens).unwrap();
    assert_eq!(*tokens.remaining(), Some(5400));

    let audio = signal.get(Dimension::AudioSeconds).unwrap();
    assert_eq!(*audio.reset_at(), Some(now + Duration::from_secs(90)));
}

#[tokio::test]
async fn test_no_rate_limit_headers() {
    let map = headers(&[("content-type", "application/json")]);
    assert!(signal_from_headers(&map).unwrap().is_none());
}

#[tokio::test]
async fn test_partial_headers_give_partial_signal() {
    let map = headers(&[("x-ratelimit-remaining-tokens", "120")]);
    let signal = signal_from_headers(&map).unwrap().unwrap();

    assert!(signal.get(Dimension::Requests).is_none());
    let tokens = signal.get(Dimension::Tokens).unwrap();
    assert_eq!(*tokens.limit(), None);
    assert_eq!(*tokens.remaining(), Some(120));
}

#[tokio::test]
async fn test_malformed_values_are_invalid_signals() {
    for (name, value) in [
        ("x-ratelimit-limit-requests", "lots"),
        ("x-ratelimit-remaining-tokens", "-5"),
        ("x-ratelimit-reset-requests", "soon"),
    ] {
        let err = signal_from_headers(&headers(&[(name, value)])).unwrap_err();
        match err.kind() {
            SluiceErrorKind::Quota(quota_err) => {
                assert!(
                    matches!(quota_err.kind(), QuotaErrorKind::InvalidSignal(_)),
                    "{name}: {value}"
                );
            }
            other => panic!("Expected quota error, got {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_parsed_headers_apply_to_state() {
    let map = headers(&[
        ("x-ratelimit-limit-requests", "30"),
        ("x-ratelimit-remaining-requests", "0"),
        ("x-ratelimit-reset-requests", "500ms"),
    ]);
    let state = QuotaState::new();
    let signal = signal_from_headers(&map).unwrap().unwrap();
    state.update_from_signal(&signal).await.unwrap();

    let snapshot = state.snapshot().await;
    let requests = snapshot.get(Dimension::Requests).unwrap();
    assert_eq!(*requests.remaining(), 0);
    assert_eq!(
        requests.reset_in(*snapshot.taken_at()),
        Some(Duration::from_millis(500))
    );
}
