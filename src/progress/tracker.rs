use std::time::Instant;

use super::sample::ProgressSample;

/// EMA smoothing factor. 0.3 = responsive but stable.
const EMA_ALPHA: f64 = 0.3;

/// Emission cadence when the total is unknown and percent cannot advance.
const UNKNOWN_TOTAL_STEP: u64 = 64 * 1024;

/// Pure byte accounting for one transfer session.
///
/// Accumulates received bytes on top of a resume baseline, keeps the
/// integer percentage monotonically non-decreasing, smooths the receive
/// rate, and decides which readings are worth emitting: one per whole
/// percent when the total is known, one per 64 KiB otherwise, plus a
/// forced final sample.
pub struct ProgressTracker {
    bytes_received: u64,
    bytes_previously: u64,
    total_bytes: i64,
    percent: u32,
    speed: f64,
    last_update: Instant,
    last_emitted_percent: Option<u32>,
    last_emitted_bytes: u64,
}

impl ProgressTracker {
    pub fn new(resume_offset: u64) -> Self {
        Self {
            bytes_received: 0,
            bytes_previously: resume_offset,
            total_bytes: -1,
            percent: 0,
            speed: 0.0,
            last_update: Instant::now(),
            last_emitted_percent: None,
            last_emitted_bytes: 0,
        }
    }

    /// Learn the declared remaining length once the response headers are in.
    /// The expected total is the resume baseline plus the remaining bytes.
    pub fn set_total(&mut self, remaining: Option<u64>) {
        self.total_bytes = match remaining {
            Some(remaining) => (self.bytes_previously + remaining) as i64,
            None => -1,
        };
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn total_received(&self) -> u64 {
        self.bytes_received + self.bytes_previously
    }

    /// Account for a received chunk. Returns a sample when the reading
    /// crossed the emission threshold, `None` while throttled.
    pub fn record(&mut self, delta: u64) -> Option<ProgressSample> {
        self.bytes_received += delta;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        if elapsed > 0.0 {
            let instant_speed = delta as f64 / elapsed;
            self.speed = EMA_ALPHA * instant_speed + (1.0 - EMA_ALPHA) * self.speed;
            self.last_update = now;
        }

        self.refresh_percent();

        let due = if self.total_bytes >= 0 {
            self.last_emitted_percent != Some(self.percent)
        } else {
            self.last_emitted_percent.is_none()
                || self.bytes_received - self.last_emitted_bytes >= UNKNOWN_TOTAL_STEP
        };
        if !due {
            return None;
        }

        self.last_emitted_percent = Some(self.percent);
        self.last_emitted_bytes = self.bytes_received;
        Some(self.sample())
    }

    /// The forced last sample of a session, emitted regardless of throttling.
    pub fn final_sample(&mut self) -> ProgressSample {
        self.refresh_percent();
        self.last_emitted_percent = Some(self.percent);
        self.last_emitted_bytes = self.bytes_received;
        self.sample()
    }

    fn refresh_percent(&mut self) {
        if self.total_bytes > 0 {
            let computed = (self.total_received() * 100 / self.total_bytes as u64) as u32;
            // Monotonic within a session.
            self.percent = self.percent.max(computed.min(100));
        }
    }

    fn sample(&self) -> ProgressSample {
        ProgressSample {
            bytes_received: self.bytes_received,
            bytes_previously: self.bytes_previously,
            total_bytes: self.total_bytes,
            percent: self.percent,
            speed: self.speed,
        }
    }
}
