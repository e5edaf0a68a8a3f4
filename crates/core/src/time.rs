/// UPnP time strings (`H+:MM:SS[.F+]`) used by AVTransport
use std::time::Duration;

/// Parse an AVTransport duration such as `0:03:45` or `01:02:03.500`
///
/// Returns `None` for empty strings, `NOT_IMPLEMENTED` and anything malformed.
pub fn parse_hms(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("NOT_IMPLEMENTED") {
        return None;
    }

    let mut parts = value.split(':');
    let hours: u64 = parts.next()?.trim_start_matches('+').parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds_part = parts.next()?;
    if parts.next().is_some() || minutes >= 60 {
        return None;
    }

    let (secs, frac) = match seconds_part.split_once('.') {
        Some((s, f)) => (s, Some(f)),
        None => (seconds_part, None),
    };
    let seconds: u64 = secs.parse().ok()?;
    if seconds >= 60 {
        return None;
    }

    let mut millis = 0u64;
    if let Some(frac) = frac {
        // Some renderers send fractions like "500/1000"; only decimal fractions are kept
        if !frac.is_empty() && frac.chars().all(|c| c.is_ascii_digit()) {
            let padded: String = frac.chars().chain(std::iter::repeat('0')).take(3).collect();
            millis = padded.parse().ok()?;
        }
    }

    // Device-supplied hours can be arbitrarily large
    let total_secs = hours
        .checked_mul(3600)?
        .checked_add(minutes * 60 + seconds)?;
    let total_millis = total_secs.checked_mul(1000)?.checked_add(millis)?;
    Some(Duration::from_millis(total_millis))
}

/// Format a duration as `HH:MM:SS` (sub-second part dropped)
pub fn format_hms(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}
