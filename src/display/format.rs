//! Column formatting helpers

use chrono::{DateTime, Utc};

/// Placeholder for a column with no value
pub const MISSING: &str = "---";

/// Format a UTC timestamp as HH:MM:SS
pub fn format_utc_time(time: &DateTime<Utc>) -> String {
    time.format("%H:%M:%S").to_string()
}

/// Format a dial frequency in Hz as MHz with three decimals, e.g. "14.074MHz"
pub fn format_frequency_mhz(freq_hz: u64) -> String {
    format!("{:.3}MHz", freq_hz as f64 / 1_000_000.0)
}

/// Column text for an optional value
pub fn or_missing(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => MISSING.to_string(),
    }
}
