//! Resource cost of a single call.

use crate::Dimension;
use serde::{Deserialize, Serialize};

/// Quota a call is expected to consume, per dimension.
///
/// Requests default to 1; every other dimension defaults to 0, meaning the
/// call does not touch it.
///
/// # Examples
///
/// ```
/// use sluice_core::{Dimension, ResourceCost};
///
/// let cost = ResourceCost::default().with_tokens(1200);
/// assert_eq!(cost.get(Dimension::Requests), 1);
/// assert_eq!(cost.get(Dimension::Tokens), 1200);
/// assert_eq!(cost.get(Dimension::AudioSeconds), 0);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_getters::Getters,
)]
pub struct ResourceCost {
    /// Estimated tokens (prompt plus completion budget)
    tokens: u64,
    /// Requests consumed
    requests: u64,
    /// Seconds of audio submitted
    audio_seconds: u64,
}

impl Default for ResourceCost {
    fn default() -> Self {
        Self {
            tokens: 0,
            requests: 1,
            audio_seconds: 0,
        }
    }
}

impl ResourceCost {
    /// Cost with explicit values for every dimension.
    pub fn new(requests: u64, tokens: u64, audio_seconds: u64) -> Self {
        Self {
            tokens,
            requests,
            audio_seconds,
        }
    }

    /// Cost of a text generation call.
    ///
    /// Prompt tokens come from [`estimate_tokens`]; the completion budget is
    /// added on top because the remote API reserves it up front.
    pub fn text(prompt: &str, max_completion_tokens: u64) -> Self {
        Self::default().with_tokens(estimate_tokens(prompt) + max_completion_tokens)
    }

    /// Cost of a transcription call over `audio_seconds` of audio.
    pub fn transcription(audio_seconds: u64) -> Self {
        Self::default().with_audio_seconds(audio_seconds)
    }

    /// Set the token estimate.
    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = tokens;
        self
    }

    /// Set the request count.
    pub fn with_requests(mut self, requests: u64) -> Self {
        self.requests = requests;
        self
    }

    /// Set the audio duration in seconds.
    pub fn with_audio_seconds(mut self, audio_seconds: u64) -> Self {
        self.audio_seconds = audio_seconds;
        self
    }

    /// Amount requested for one dimension.
    pub fn get(&self, dimension: Dimension) -> u64 {
        match dimension {
            Dimension::Requests => self.requests,
            Dimension::Tokens => self.tokens,
            Dimension::AudioSeconds => self.audio_seconds,
        }
    }

    /// Dimensions this cost actually touches, with their amounts.
    pub fn requested(&self) -> impl Iterator<Item = (Dimension, u64)> + '_ {
        Dimension::ALL
            .into_iter()
            .map(move |dimension| (dimension, self.get(dimension)))
            .filter(|(_, amount)| *amount > 0)
    }
}

/// Conservative token estimate for a piece of text.
///
/// Uses one token per three characters, rounded up. Real tokenizers average
/// closer to four characters per token for English; the tighter ratio leaves
/// headroom for other scripts.
///
/// ```
/// use sluice_core::estimate_tokens;
///
/// assert_eq!(estimate_tokens(""), 0);
/// assert_eq!(estimate_tokens("abc"), 1);
/// assert_eq!(estimate_tokens("abcd"), 2);
/// ```
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(3)
}
