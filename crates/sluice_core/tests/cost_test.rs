//! Tests for resource costs and token estimation.

use sluice_core::{Dimension, ResourceCost, estimate_tokens};

#[test]
fn test_default_cost_is_one_request() {
    let cost = ResourceCost::default();
    assert_eq!(*cost.requests(), 1);
    assert_eq!(
        cost.requested().collect::<Vec<_>>(),
        vec![(Dimension::Requests, 1)]
    );
}

#[test]
fn test_text_cost_adds_completion_budget() {
    // 10 characters round up to 4 tokens.
    let cost = ResourceCost::text("0123456789", 500);
    assert_eq!(cost.get(Dimension::Tokens), 504);
    assert_eq!(cost.get(Dimension::Requests), 1);
    assert_eq!(cost.get(Dimension::AudioSeconds), 0);
}

#[test]
fn test_transcription_cost_touches_audio_only() {
    let cost = ResourceCost::transcription(90);
    assert_eq!(
        cost.requested().collect::<Vec<_>>(),
        vec![(Dimension::Requests, 1), (Dimension::AudioSeconds, 90)]
    );
}

#[test]
fn test_zero_request_cost_is_untracked() {
    let cost = ResourceCost::new(0, 0, 0);
    assert_eq!(cost.requested().count(), 0);
}

#[test]
fn test_estimate_counts_characters_not_bytes() {
    // Four characters, twelve bytes.
    assert_eq!(estimate_tokens("日本語だ"), 2);
    assert_eq!(estimate_tokens(&"a".repeat(3_000)), 1_000);
    assert_eq!(estimate_tokens(&"a".repeat(3_001)), 1_001);
}
