use webload::progress::sample::format_bytes;
use webload::progress::tracker::ProgressTracker;

#[test]
fn percent_advances_once_per_whole_percent() {
    let mut tracker = ProgressTracker::new(0);
    tracker.set_total(Some(10_000));

    // 50 bytes is below one percent: recorded, but only the first reading
    // (0%) is emitted.
    assert!(tracker.record(50).is_some());
    assert!(tracker.record(40).is_none());

    // Crossing 1% emits again.
    let sample = tracker.record(20).expect("crossed a whole percent");
    assert_eq!(sample.percent, 1);
    assert_eq!(sample.bytes_received, 110);
}

#[test]
fn percent_is_monotonic_and_capped_at_one_hundred() {
    let mut tracker = ProgressTracker::new(0);
    tracker.set_total(Some(100));

    let mut last = 0;
    for _ in 0..10 {
        if let Some(sample) = tracker.record(10) {
            assert!(sample.percent >= last);
            last = sample.percent;
        }
    }
    assert_eq!(tracker.final_sample().percent, 100);
}

#[test]
fn resume_baseline_counts_toward_totals() {
    let mut tracker = ProgressTracker::new(1000);
    tracker.set_total(Some(4000)); // remaining bytes; total is 5000

    tracker.record(4000);
    let sample = tracker.final_sample();
    assert_eq!(sample.bytes_previously, 1000);
    assert_eq!(sample.bytes_received, 4000);
    assert_eq!(sample.total_received(), 5000);
    assert_eq!(sample.total_bytes, 5000);
    assert_eq!(sample.percent, 100);
}

#[test]
fn resumed_transfer_starts_above_zero_percent() {
    let mut tracker = ProgressTracker::new(5000);
    tracker.set_total(Some(5000)); // half already held locally

    let sample = tracker.record(100).expect("first reading is emitted");
    assert!(sample.percent >= 50, "got {}", sample.percent);
}

#[test]
fn unknown_total_reports_minus_one_and_emits_on_byte_cadence() {
    let mut tracker = ProgressTracker::new(0);
    tracker.set_total(None);

    let first = tracker.record(10).expect("first reading is emitted");
    assert_eq!(first.total_bytes, -1);
    assert_eq!(first.percent, 0);

    // Below the 64 KiB cadence: throttled.
    assert!(tracker.record(1024).is_none());
    // Past the cadence: emitted.
    assert!(tracker.record(64 * 1024).is_some());
}

#[test]
fn final_sample_is_forced_even_when_throttled() {
    let mut tracker = ProgressTracker::new(0);
    tracker.set_total(Some(1_000_000));
    tracker.record(10);

    let sample = tracker.final_sample();
    assert_eq!(sample.bytes_received, 10);
}

#[test]
fn byte_formatting_picks_sensible_units() {
    assert_eq!(format_bytes(512), "512 B");
    assert_eq!(format_bytes(2048), "2.0 KB");
    assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
}
