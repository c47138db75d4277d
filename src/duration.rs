//! Parsing for human-readable duration strings like "3s", "500ms", "24h".

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer};

/// Parse a duration string like "14d", "24h", "30m", "3s", or "500ms".
///
/// The input is case-insensitive and whitespace is trimmed.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    // "ms" must be peeled off before the single-letter units.
    let (num, unit) = if s.ends_with("ms") {
        (s.trim_end_matches("ms"), "ms")
    } else if s.ends_with('d') {
        (s.trim_end_matches('d'), "d")
    } else if s.ends_with('h') {
        (s.trim_end_matches('h'), "h")
    } else if s.ends_with('m') {
        (s.trim_end_matches('m'), "m")
    } else if s.ends_with('s') {
        (s.trim_end_matches('s'), "s")
    } else {
        anyhow::bail!("duration must end with d, h, m, s, or ms");
    };

    let num: u64 = num.parse().context("invalid number in duration")?;

    Ok(match unit {
        "ms" => Duration::from_millis(num),
        "d" => Duration::from_secs(
            num.checked_mul(24 * 60 * 60)
                .context("duration is too large")?,
        ),
        "h" => Duration::from_secs(num.checked_mul(60 * 60).context("duration is too large")?),
        "m" => Duration::from_secs(num.checked_mul(60).context("duration is too large")?),
        "s" => Duration::from_secs(num),
        _ => unreachable!(),
    })
}

/// Serde deserializer for duration strings.
///
/// Use with `#[serde(deserialize_with = "deserialize_duration")]`.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(de::Error::custom)
}
