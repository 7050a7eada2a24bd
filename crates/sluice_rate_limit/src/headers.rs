//! Quota signals from HTTP response headers.
//!
//! The remote API reports its limits in a family of headers, one triple per
//! dimension:
//!
//! - `x-ratelimit-limit-<dimension>`: window capacity
//! - `x-ratelimit-remaining-<dimension>`: capacity left
//! - `x-ratelimit-reset-<dimension>`: time until the window refills
//!
//! where `<dimension>` is `requests`, `tokens` or `audio-seconds`. Reset
//! values are compact durations such as `6s`, `60ms`, `1m30s` or `7.66s`.

use regex::Regex;
use reqwest::header::HeaderMap;
use sluice_core::{Dimension, DimensionSignal, QuotaSignal};
use sluice_error::{QuotaError, SluiceResult};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

static DURATION_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)(ms|h|m|s)").expect("Valid duration regex"));

/// Parse a reset duration such as `1m30s`, `250ms` or `7.66s`.
///
/// A bare number is read as seconds.
///
/// # Errors
///
/// Returns `InvalidSignal` for empty, negative or otherwise malformed values.
///
/// # Examples
///
/// ```
/// use sluice_rate_limit::parse_reset_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_reset_duration("1m30s").unwrap(), Duration::from_secs(90));
/// assert_eq!(parse_reset_duration("60ms").unwrap(), Duration::from_millis(60));
/// assert_eq!(parse_reset_duration("2").unwrap(), Duration::from_secs(2));
/// assert!(parse_reset_duration("soon").is_err());
/// ```
pub fn parse_reset_duration(value: &str) -> SluiceResult<Duration> {
    let value = value.trim();
    if value.is_empty() {
        Err(QuotaError::invalid_signal("empty reset duration"))?
    }

    if let Ok(seconds) = value.parse::<f64>() {
        return scaled_duration(seconds, NANOS_PER_SECOND, value);
    }

    let mut total = Duration::ZERO;
    let mut position = 0;
    for captures in DURATION_PART.captures_iter(value) {
        let (Some(whole), Some(amount), Some(unit)) =
            (captures.get(0), captures.get(1), captures.get(2))
        else {
            continue;
        };
        if whole.start() != position {
            break;
        }
        position = whole.end();

        let amount: f64 = amount.as_str().parse().map_err(|_| {
            QuotaError::invalid_signal(format!("bad number in reset duration '{}'", value))
        })?;
        let nanos_per_unit = match unit.as_str() {
            "ms" => NANOS_PER_SECOND / 1_000.0,
            "s" => NANOS_PER_SECOND,
            "m" => NANOS_PER_SECOND * 60.0,
            _ => NANOS_PER_SECOND * 3_600.0,
        };
        total = total.saturating_add(scaled_duration(amount, nanos_per_unit, value)?);
    }

    if position != value.len() {
        Err(QuotaError::invalid_signal(format!(
            "malformed reset duration '{}'",
            value
        )))?
    }

    Ok(total)
}

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

fn scaled_duration(amount: f64, nanos_per_unit: f64, original: &str) -> SluiceResult<Duration> {
    let nanos = (amount * nanos_per_unit).round();
    if !nanos.is_finite() || nanos < 0.0 || nanos > u64::MAX as f64 {
        Err(QuotaError::invalid_signal(format!(
            "reset duration '{}' out of range",
            original
        )))?
    }
    Ok(Duration::from_nanos(nanos as u64))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> SluiceResult<Option<&'a str>> {
    headers
        .get(name)
        .map(|value| {
            value.to_str().map_err(|_| {
                QuotaError::invalid_signal(format!("header {} is not valid text", name)).into()
            })
        })
        .transpose()
}

fn header_amount(headers: &HeaderMap, name: &str) -> SluiceResult<Option<u64>> {
    let Some(raw) = header_str(headers, name)? else {
        return Ok(None);
    };
    let raw = raw.trim();
    if let Ok(amount) = raw.parse::<u64>() {
        return Ok(Some(amount));
    }
    // Audio quotas are sometimes reported with a fractional part.
    match raw.parse::<f64>() {
        Ok(amount) if amount.is_finite() && amount >= 0.0 => Ok(Some(amount.floor() as u64)),
        _ => Err(QuotaError::invalid_signal(format!(
            "header {} has non-numeric value '{}'",
            name, raw
        )))?,
    }
}

/// Build a quota signal from rate limit response headers.
///
/// Returns `Ok(None)` when the response carries no rate limit headers at all.
/// Reset durations are anchored at the moment of parsing.
///
/// # Errors
///
/// Returns `InvalidSignal` if a rate limit header is present but malformed.
///
/// # Examples
///
/// ```
/// use reqwest::header::{HeaderMap, HeaderValue};
/// use sluice_core::Dimension;
/// use sluice_rate_limit::signal_from_headers;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut headers = HeaderMap::new();
/// headers.insert("x-ratelimit-limit-requests", HeaderValue::from_static("30"));
/// headers.insert("x-ratelimit-remaining-requests", HeaderValue::from_static("29"));
/// headers.insert("x-ratelimit-reset-requests", HeaderValue::from_static("2s"));
///
/// let signal = signal_from_headers(&headers)?.expect("rate limit headers present");
/// let requests = signal.get(Dimension::Requests).unwrap();
/// assert_eq!(*requests.limit(), Some(30));
/// assert_eq!(*requests.remaining(), Some(29));
/// # Ok(())
/// # }
/// ```
#[instrument(skip(headers), fields(header_count = headers.len()))]
pub fn signal_from_headers(headers: &HeaderMap) -> SluiceResult<Option<QuotaSignal>> {
    let now = Instant::now();
    let mut signal = QuotaSignal::new();

    for dimension in Dimension::ALL {
        let suffix = dimension.as_ref();
        let mut reported = DimensionSignal::default();

        if let Some(limit) = header_amount(headers, &format!("x-ratelimit-limit-{}", suffix))? {
            reported = reported.with_limit(limit);
        }
        if let Some(remaining) =
            header_amount(headers, &format!("x-ratelimit-remaining-{}", suffix))?
        {
            reported = reported.with_remaining(remaining);
        }
        if let Some(reset) = header_str(headers, &format!("x-ratelimit-reset-{}", suffix))? {
            reported = reported.with_reset_at(now + parse_reset_duration(reset)?);
        }

        if !reported.is_empty() {
            debug!(%dimension, ?reported, "Parsed rate limit headers");
            signal.insert(dimension, reported);
        }
    }

    if signal.is_empty() {
        debug!("No rate limit headers present");
        Ok(None)
    } else {
        Ok(Some(signal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compound_durations() {
        assert_eq!(
            parse_reset_duration("2h").unwrap(),
            Duration::from_secs(7_200)
        );
        assert_eq!(
            parse_reset_duration("1h2m3s").unwrap(),
            Duration::from_secs(3_723)
        );
        assert_eq!(
            parse_reset_duration("7.66s").unwrap(),
            Duration::from_millis(7_660)
        );
        assert_eq!(
            parse_reset_duration("1s500ms").unwrap(),
            Duration::from_millis(1_500)
        );
    }

    #[test]
    fn test_rejects_garbage() {
        for value in ["", "  ", "-3s", "3x", "s", "1m 30s", "3s later", "abc1s"] {
            assert!(parse_reset_duration(value).is_err(), "{value:?} should fail");
        }
    }
}
