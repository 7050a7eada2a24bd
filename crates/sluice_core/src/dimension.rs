//! Independently enforced quota dimensions.

use serde::{Deserialize, Serialize};

/// One independently tracked limit.
///
/// The remote API enforces each dimension on its own, so a caller can be far
/// from one limit and right at another.
///
/// The string form matches the suffix used in rate limit headers:
///
/// ```
/// use sluice_core::Dimension;
///
/// assert_eq!(Dimension::AudioSeconds.to_string(), "audio-seconds");
/// assert_eq!("tokens".parse::<Dimension>().unwrap(), Dimension::Tokens);
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "kebab-case")]
pub enum Dimension {
    /// Requests per window
    Requests,
    /// Tokens per window
    Tokens,
    /// Seconds of transcribed audio per window
    AudioSeconds,
}

impl Dimension {
    /// Every dimension, in storage order.
    pub const ALL: [Dimension; 3] = [
        Dimension::Requests,
        Dimension::Tokens,
        Dimension::AudioSeconds,
    ];

    /// Position of this dimension in fixed-size per-dimension arrays.
    pub fn index(self) -> usize {
        match self {
            Dimension::Requests => 0,
            Dimension::Tokens => 1,
            Dimension::AudioSeconds => 2,
        }
    }
}
