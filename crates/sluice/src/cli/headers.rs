//! Header inspection command.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sluice::{Sluice, SluiceConfig};
use std::io::BufRead;
use tracing::debug;

/// Parse `name: value` lines into a header map.
///
/// Blank lines and HTTP status lines are skipped, so a raw response head can
/// be piped in unchanged.
pub fn parse_header_lines(
    lines: impl IntoIterator<Item = String>,
) -> Result<HeaderMap, Box<dyn std::error::Error>> {
    let mut headers = HeaderMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with("HTTP/") {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(format!("Malformed header line: '{}'", line).into());
        };
        let name = HeaderName::from_bytes(name.trim().as_bytes())?;
        let value = HeaderValue::from_str(value.trim())?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// Read headers from stdin, apply them to a fresh quota state and print it.
pub async fn show_headers(
    config: SluiceConfig,
    summary: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let lines = std::io::stdin()
        .lock()
        .lines()
        .collect::<Result<Vec<_>, _>>()?;
    let headers = parse_header_lines(lines)?;
    debug!(count = headers.len(), "Read headers from stdin");

    let session: Sluice<()> = Sluice::new(config)?;
    if session.observe_headers(&headers).await?.is_none() {
        eprintln!("No rate limit headers found");
    }

    let output = if summary {
        serde_json::to_string_pretty(&session.quota_summary().await)?
    } else {
        serde_json::to_string_pretty(&session.quota_snapshot().await)?
    };
    println!("{}", output);
    Ok(())
}
