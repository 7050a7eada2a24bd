//! Tests for quota signals.

use sluice_core::{Dimension, DimensionSignal, QuotaSignal};
use std::time::Duration;
use tokio::time::Instant;

#[test]
fn test_empty_signal_is_invalid() {
    assert!(QuotaSignal::new().validate().is_err());
}

#[test]
fn test_dimension_without_fields_is_invalid() {
    let signal = QuotaSignal::new()
        .with(Dimension::Requests, DimensionSignal::default().with_remaining(3))
        .with(Dimension::Tokens, DimensionSignal::default());
    let err = signal.validate().unwrap_err();
    assert!(err.to_string().contains("tokens"));
}

#[test]
fn test_partial_signal_is_valid() {
    let signal = QuotaSignal::new().with(
        Dimension::AudioSeconds,
        DimensionSignal::default().with_limit(7_200),
    );
    assert!(signal.validate().is_ok());
    assert_eq!(
        signal.iter().map(|(dimension, _)| dimension).collect::<Vec<_>>(),
        vec![Dimension::AudioSeconds]
    );
}

#[test]
fn test_insert_replaces_previous_entry() {
    let mut signal = QuotaSignal::new();
    signal.insert(Dimension::Tokens, DimensionSignal::default().with_limit(100));
    signal.insert(Dimension::Tokens, DimensionSignal::default().with_remaining(40));

    let tokens = signal.get(Dimension::Tokens).unwrap();
    assert_eq!(*tokens.limit(), None);
    assert_eq!(*tokens.remaining(), Some(40));
}

#[test]
fn test_full_constructor_sets_every_field() {
    let reset_at = Instant::now() + Duration::from_secs(60);
    let signal = DimensionSignal::new(10, 4, reset_at);
    assert_eq!(*signal.limit(), Some(10));
    assert_eq!(*signal.remaining(), Some(4));
    assert_eq!(*signal.reset_at(), Some(reset_at));
    assert!(!signal.is_empty());
}
