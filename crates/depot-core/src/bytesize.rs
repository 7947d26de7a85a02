//! Byte-accounting display helpers.
//!
//! Pure functions over plain numbers; admission arithmetic never goes
//! through these (comparisons stay in integer space).

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Render a byte count as a short human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Percentage of the limit in use. Display only.
pub fn used_percent(used_bytes: u64, limit_bytes: u64) -> f64 {
    if limit_bytes == 0 {
        return 0.0;
    }
    (used_bytes as f64 / limit_bytes as f64) * 100.0
}

/// Bytes-per-second as a short human-readable rate.
pub fn format_rate(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GiB");
        assert_eq!(format_bytes(u64::MAX).split(' ').nth(1), Some("TiB"));
    }

    #[test]
    fn test_used_percent() {
        assert_eq!(used_percent(0, 100), 0.0);
        assert_eq!(used_percent(50, 100), 50.0);
        assert_eq!(used_percent(100, 0), 0.0);
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(2048), "2.0 KiB/s");
    }
}
