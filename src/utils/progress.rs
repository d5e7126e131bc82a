//! Progress tracking utility
//!
//! Logs transfer progress at a fixed byte interval and draws a bar when
//! stderr is a terminal.

use std::io::{IsTerminal, Write};
use std::time::Instant;

use super::{bytes_to_mb, progress_bar};
use crate::{log_debug, log_info};

/// Progress tracker for downloads and transfers with speed calculation
pub struct ProgressTracker {
    /// Operation name for logging (e.g., "Download")
    operation_name: String,
    /// Module name for logging
    module_name: String,
    /// Total bytes to process (0 if unknown)
    total_bytes: u64,
    processed_bytes: u64,
    start_time: Instant,
    last_log_time: Instant,
    last_log_bytes: u64,
    log_interval_bytes: u64,
    /// Draw a bar on stderr
    interactive: bool,
}

/// Final summary data
pub struct ProgressSummary {
    pub total_mb: f64,
    pub elapsed_secs: f64,
    pub avg_speed_mbps: f64,
}

impl ProgressTracker {
    pub fn new(operation: &str, module: &str, total_bytes: u64, log_interval_mb: u64) -> Self {
        let now = Instant::now();
        Self {
            operation_name: operation.to_string(),
            module_name: module.to_string(),
            total_bytes,
            processed_bytes: 0,
            start_time: now,
            last_log_time: now,
            last_log_bytes: 0,
            log_interval_bytes: log_interval_mb * 1024 * 1024,
            interactive: total_bytes > 0 && std::io::stderr().is_terminal(),
        }
    }

    /// Record `bytes_added` and log when a log interval boundary is crossed
    pub fn update(&mut self, bytes_added: u64) {
        self.processed_bytes += bytes_added;

        if self.interactive {
            let mut stderr = std::io::stderr();
            let _ = write!(
                stderr,
                "\r{}",
                progress_bar(self.processed_bytes, self.total_bytes)
            );
            let _ = stderr.flush();
        }

        if self.log_interval_bytes == 0 {
            return;
        }

        let current_interval = self.processed_bytes / self.log_interval_bytes;
        let last_interval = self.last_log_bytes / self.log_interval_bytes;
        if current_interval <= last_interval {
            return;
        }

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_log_time).as_secs_f64();
        let speed_mbps = if elapsed > 0.0 {
            bytes_to_mb(self.processed_bytes - self.last_log_bytes) / elapsed
        } else {
            0.0
        };
        self.last_log_time = now;
        self.last_log_bytes = self.processed_bytes;

        if self.total_bytes > 0 {
            log_debug!(
                &self.module_name,
                "{} progress: {:.1} MB / {:.1} MB ({:.1}%) @ {:.1} MB/s",
                self.operation_name,
                bytes_to_mb(self.processed_bytes),
                bytes_to_mb(self.total_bytes),
                self.percent(),
                speed_mbps
            );
        } else {
            log_debug!(
                &self.module_name,
                "{} progress: {:.1} MB @ {:.1} MB/s",
                self.operation_name,
                bytes_to_mb(self.processed_bytes),
                speed_mbps
            );
        }
    }

    /// Percentage complete, 0 when the total is unknown
    pub fn percent(&self) -> f64 {
        if self.total_bytes > 0 {
            (self.processed_bytes as f64 / self.total_bytes as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Log completion with average speed
    pub fn finish(&self) -> ProgressSummary {
        if self.interactive {
            eprintln!();
        }

        let elapsed_secs = self.start_time.elapsed().as_secs_f64();
        let total_mb = bytes_to_mb(self.processed_bytes);
        let summary = ProgressSummary {
            total_mb,
            elapsed_secs,
            avg_speed_mbps: if elapsed_secs > 0.0 {
                total_mb / elapsed_secs
            } else {
                0.0
            },
        };

        log_info!(
            &self.module_name,
            "{} complete: {:.1} MB in {:.1}s (avg {:.1} MB/s)",
            self.operation_name,
            summary.total_mb,
            summary.elapsed_secs,
            summary.avg_speed_mbps
        );

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        let mut tracker = ProgressTracker::new("Download", "test", 200, 1);
        tracker.update(50);
        assert!((tracker.percent() - 25.0).abs() < f64::EPSILON);
        tracker.update(150);
        assert!((tracker.percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_total() {
        let mut tracker = ProgressTracker::new("Download", "test", 0, 1);
        tracker.update(3 * 1024 * 1024);
        assert_eq!(tracker.percent(), 0.0);
        let summary = tracker.finish();
        assert!((summary.total_mb - 3.0).abs() < f64::EPSILON);
    }
}
