//! Parsing and formatting of byte quantities.
//!
//! Sizes and rates on the command line and in the config file accept an
//! optional binary suffix: `k`, `m`, `g`, `t`, `p`, `e` (case-insensitive),
//! each a power of 1024. `16M` is 16777216 bytes.

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SIZE_PATTERN: Regex =
        Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*([kmgtpe])?(?:i?b)?\s*$").unwrap();
}

fn suffix_shift(suffix: Option<&str>) -> u32 {
    match suffix.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("k") => 10,
        Some("m") => 20,
        Some("g") => 30,
        Some("t") => 40,
        Some("p") => 50,
        Some("e") => 60,
        _ => 0,
    }
}

/// Parse a whole number of bytes with an optional binary suffix.
///
/// # Example
///
/// ```
/// use glacier_pipe::utils::format::parse_size;
///
/// assert_eq!(parse_size("16M").unwrap(), 16 * 1024 * 1024);
/// assert_eq!(parse_size("4096").unwrap(), 4096);
/// ```
pub fn parse_size(input: &str) -> Result<u64> {
    let caps = SIZE_PATTERN
        .captures(input)
        .ok_or_else(|| anyhow!("Unable to parse size '{}'", input))?;

    let digits = &caps[1];
    if digits.contains('.') {
        return Err(anyhow!("Size '{}' must be a whole number of bytes", input));
    }

    let value: u64 = digits
        .parse()
        .map_err(|e| anyhow!("Unable to parse size '{}': {}", input, e))?;
    let shift = suffix_shift(caps.get(2).map(|m| m.as_str()));

    value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| anyhow!("Size '{}' overflows 64 bits", input))
}

/// Parse a bytes-per-second rate with an optional binary suffix.
/// Fractional values are allowed, e.g. `1.5M`.
pub fn parse_rate(input: &str) -> Result<f64> {
    let caps = SIZE_PATTERN
        .captures(input)
        .ok_or_else(|| anyhow!("Unable to parse rate '{}'", input))?;

    let value: f64 = caps[1]
        .parse()
        .map_err(|e| anyhow!("Unable to parse rate '{}': {}", input, e))?;
    let shift = suffix_shift(caps.get(2).map(|m| m.as_str()));

    Ok(value * (1u64 << shift) as f64)
}

/// Render a byte count for humans, e.g. `1.500 MB`.
///
/// A unit is used until the value reaches 128 of it, so small
/// quantities keep three significant decimals.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["KB", "MB", "GB", "TB", "PB", "EB"];

    if bytes < 128 {
        return format!("{} B", bytes);
    }

    let value = bytes as u128;
    for (i, unit) in UNITS.iter().enumerate() {
        let shift = 10 * (i as u32 + 1);
        if value < (128u128 << shift) || i == UNITS.len() - 1 {
            return format!("{:.3} {}", bytes as f64 / (1u128 << shift) as f64, unit);
        }
    }

    unreachable!("the last unit always matches")
}

/// Render a rate for humans, e.g. `64.000 KB/s`.
pub fn human_rate(bytes_per_second: f64) -> String {
    if !bytes_per_second.is_finite() {
        return "unlimited".to_string();
    }
    format!("{}/s", human_size(bytes_per_second.max(0.0).round() as u64))
}
