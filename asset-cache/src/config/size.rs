//! Byte size parsing and formatting.

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Formats a byte count for display (e.g. `1.50 GB`).
pub fn format_size(bytes: u64) -> String {
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Formats a byte count in the compact form accepted by [`parse_size`],
/// using the largest unit that divides it exactly (e.g. `2G`, `1536K`).
pub fn to_size_string(bytes: u64) -> String {
    if bytes == 0 {
        return "0".to_string();
    }
    for (unit, suffix) in [(GB, "G"), (MB, "M"), (KB, "K")] {
        if bytes % unit == 0 {
            return format!("{}{}", bytes / unit, suffix);
        }
    }
    bytes.to_string()
}

/// Parses a size such as `4096`, `512K`, `2G` or `1.5 GB`.
///
/// Suffixes are binary (K = 1024) and case-insensitive; a trailing `B` is
/// optional.
pub fn parse_size(input: &str) -> Option<u64> {
    let s = input.trim().to_ascii_uppercase();
    let s = s.strip_suffix('B').unwrap_or(&s).trim_end();

    let (number, multiplier) = match s.chars().last()? {
        'K' => (&s[..s.len() - 1], KB),
        'M' => (&s[..s.len() - 1], MB),
        'G' => (&s[..s.len() - 1], GB),
        _ => (s, 1),
    };
    let number = number.trim();

    if let Ok(whole) = number.parse::<u64>() {
        return whole.checked_mul(multiplier);
    }
    let fractional: f64 = number.parse().ok()?;
    if !fractional.is_finite() || fractional < 0.0 {
        return None;
    }
    let bytes = fractional * multiplier as f64;
    (bytes <= u64::MAX as f64).then(|| bytes.round() as u64)
}
