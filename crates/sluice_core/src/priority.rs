//! Dispatch priority tiers.

use serde::{Deserialize, Serialize};

/// Priority tier of a queued request.
///
/// Tiers are served with strict precedence: urgent, then high, then normal,
/// then low. Low priority work can wait indefinitely under sustained load
/// from higher tiers.
///
/// Parsing is case-insensitive:
///
/// ```
/// use sluice_core::Priority;
///
/// assert_eq!("URGENT".parse::<Priority>().unwrap(), Priority::Urgent);
/// assert!(Priority::Urgent > Priority::Low);
/// assert_eq!(Priority::Urgent.rank(), 0);
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
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
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Priority {
    /// Background work
    Low,
    /// Default tier
    #[default]
    Normal,
    /// Interactive work
    High,
    /// Served before everything else
    Urgent,
}

impl Priority {
    /// Tiers in dispatch order, highest first.
    pub const DISPATCH_ORDER: [Priority; 4] = [
        Priority::Urgent,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Position in [`Priority::DISPATCH_ORDER`]; 0 is served first.
    pub fn rank(self) -> usize {
        match self {
            Priority::Urgent => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}
