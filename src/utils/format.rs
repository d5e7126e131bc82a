//! Formatting utilities for human-readable output

/// Bytes per megabyte constant
pub const MB: u64 = 1024 * 1024;

/// Convert bytes to megabytes as f64 (for calculations and logging)
#[inline]
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / MB as f64
}

/// Format bytes into human-readable size string (e.g., "1.5 GB", "256 MB")
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.0} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.0} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Render a 50-column progress bar, e.g. `[=====     ]`
pub fn progress_bar(done: u64, total: u64) -> String {
    const WIDTH: u64 = 50;
    let filled = if total == 0 {
        0
    } else {
        (WIDTH * done.min(total) / total) as usize
    };
    format!(
        "[{}{}]",
        "=".repeat(filled),
        " ".repeat(WIDTH as usize - filled)
    )
}
