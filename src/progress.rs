//! Transfer progress and throughput accounting.

use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};

/// Throughput in whole kB/s, truncated.
pub fn kilobytes_per_sec(bytes: u64, elapsed_secs: f64) -> u64 {
    if elapsed_secs <= 0.0 {
        return 0;
    }
    (bytes as f64 / elapsed_secs / 1000.0) as u64
}

/// Format bytes for human-readable display.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} bytes")
    }
}

/// Progress bar plus byte/elapsed accounting for one transfer.
pub struct TransferProgress {
    bar: ProgressBar,
    moved: u64,
    started: Instant,
}

impl TransferProgress {
    pub fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[transfer] |{bar:40.cyan/blue}| {percent}% ({bytes}/{total_bytes}) {msg}")
                .expect("valid progress template")
                .progress_chars("=>-"),
        );
        Self {
            bar,
            moved: 0,
            started: Instant::now(),
        }
    }

    /// Bar-less accounting, for tests and quiet contexts.
    pub fn hidden(total: u64) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(total);
        Self {
            bar,
            moved: 0,
            started: Instant::now(),
        }
    }

    /// Record `n` more bytes moved and refresh the display.
    pub fn advance(&mut self, n: u64) {
        self.moved += n;
        self.bar.set_position(self.moved);
        self.bar.set_message(format!("{} kB/s", self.throughput()));
    }

    pub fn throughput(&self) -> u64 {
        kilobytes_per_sec(self.moved, self.started.elapsed().as_secs_f64())
    }

    pub fn bytes_moved(&self) -> u64 {
        self.moved
    }

    /// Stop reporting after a successful transfer.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    /// Stop reporting after a failed transfer.
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_is_truncated_to_whole_kilobytes() {
        assert_eq!(kilobytes_per_sec(16_000, 2.0), 8);
        assert_eq!(kilobytes_per_sec(1_999, 1.0), 1);
        assert_eq!(kilobytes_per_sec(999, 1.0), 0);
    }

    #[test]
    fn zero_elapsed_reports_zero() {
        assert_eq!(kilobytes_per_sec(1 << 20, 0.0), 0);
    }

    #[test]
    fn advance_accumulates() {
        let mut progress = TransferProgress::hidden(100);
        progress.advance(30);
        progress.advance(70);
        assert_eq!(progress.bytes_moved(), 100);
    }

    #[test]
    fn formats_byte_counts() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }
}
