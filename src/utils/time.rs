//! Duration parsing and formatting for configuration values and log output

use regex::Regex;
use std::time::Duration;

/// Parse a duration string like "1h30m", "45s", "250ms", "2m30s" or a bare
/// number of seconds ("90").
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();

    if value.is_empty() {
        return Err("Empty duration".to_string());
    }

    if let Ok(seconds) = value.parse::<u64>() {
        if seconds == 0 {
            return Err(format!("Duration must be greater than zero: '{}'", value));
        }
        return Ok(Duration::from_secs(seconds));
    }

    let re = Regex::new(r"^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?(?:(\d+)ms)?$")
        .map_err(|e| format!("Invalid regex: {}", e))?;

    let caps = re.captures(value).ok_or_else(|| {
        format!(
            "Invalid duration format: '{}'. Expected format like '1h30m', '45s', '250ms' or '90'",
            value
        )
    })?;

    let component = |index: usize| -> Result<u64, String> {
        match caps.get(index) {
            Some(m) => m
                .as_str()
                .parse::<u64>()
                .map_err(|e| format!("Invalid number '{}': {}", m.as_str(), e)),
            None => Ok(0),
        }
    };

    let hours = component(1)?;
    let minutes = component(2)?;
    let seconds = component(3)?;
    let millis = component(4)?;

    let total_ms = hours
        .checked_mul(3_600_000)
        .and_then(|h| minutes.checked_mul(60_000).and_then(|m| h.checked_add(m)))
        .and_then(|hm| seconds.checked_mul(1_000).and_then(|s| hm.checked_add(s)))
        .and_then(|hms| hms.checked_add(millis))
        .ok_or_else(|| format!("Duration too large: '{}'", value))?;

    if total_ms == 0 {
        return Err(format!("Duration must be greater than zero: '{}'", value));
    }

    Ok(Duration::from_millis(total_ms))
}

/// Format a duration for humans, e.g. "1h 30m", "45s", "250ms"
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    if total_ms < 1_000 {
        return format!("{}ms", total_ms);
    }

    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
