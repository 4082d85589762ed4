use std::time::Duration;

/// Pretty-print a duration (used in logs and diagnostics)
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    let seconds = duration.as_secs_f64();

    match nanos {
        0..=999 => format!("{}ns", nanos),
        1_000..=999_999 => format!("{:.3}μs", nanos as f64 / 1_000.0),
        1_000_000..=999_999_999 => format!("{:.3}ms", nanos as f64 / 1_000_000.0),
        _ if seconds < 60.0 => format!("{:.3}s", seconds),
        _ if seconds < 3_600.0 => format!("{:.3}m", seconds / 60.0),
        _ if seconds < 86_400.0 => format!("{:.3}h", seconds / 3_600.0),
        _ => format!("{:.3}d", seconds / 86_400.0),
    }
}

/// Pretty-print a byte count using binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    match unit {
        0 => format!("{}B", bytes),
        _ => format!("{:.2}{}", value, UNITS[unit]),
    }
}
