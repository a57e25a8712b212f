use serde::Serialize;

/// One throttled progress reading for a transfer session.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProgressSample {
    /// Bytes received since this session started.
    pub bytes_received: u64,
    /// Bytes already held locally before the session (the resume offset).
    pub bytes_previously: u64,
    /// Expected total including `bytes_previously`, or -1 when the server
    /// declared no length.
    pub total_bytes: i64,
    /// Integer percentage, 0–100. Only meaningful when `total_bytes` >= 0;
    /// never decreases within a session.
    pub percent: u32,
    /// Smoothed receive rate in bytes per second.
    pub speed: f64,
}

impl ProgressSample {
    /// Session bytes plus the resume baseline.
    pub fn total_received(&self) -> u64 {
        self.bytes_received + self.bytes_previously
    }
}

/// Human-readable byte formatting.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;

    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}
