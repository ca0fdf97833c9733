//! Metrics collection and reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use tracing::debug;

use camstream_ipc::{StreamMetrics, WarningType};

/// Collects and reports stream metrics.
///
/// Counters are updated by the drain loop and read by the operator loop.
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    datagrams_sent: AtomicU64,
    bytes_sent: AtomicU64,
    buffers_released: AtomicU64,
    empty_buffers: AtomicU64,
    keyframes: AtomicU64,
    send_failures: AtomicU64,
    oversized_payloads: AtomicU64,
    format_changes: AtomicU64,
    last_report_time: RwLock<Instant>,
    last_datagram_count: AtomicU64,
    last_send_failures: AtomicU64,
    last_oversized: AtomicU64,
    target_bitrate_bps: u32,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new(target_bitrate_bps: u32) -> Self {
        Self {
            start_time: RwLock::new(None),
            datagrams_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            buffers_released: AtomicU64::new(0),
            empty_buffers: AtomicU64::new(0),
            keyframes: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            oversized_payloads: AtomicU64::new(0),
            format_changes: AtomicU64::new(0),
            last_report_time: RwLock::new(Instant::now()),
            last_datagram_count: AtomicU64::new(0),
            last_send_failures: AtomicU64::new(0),
            last_oversized: AtomicU64::new(0),
            target_bitrate_bps,
        }
    }

    /// Start metrics collection.
    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
        *self.last_report_time.write() = Instant::now();
    }

    /// Stop metrics collection.
    pub fn stop(&self) {
        *self.start_time.write() = None;
    }

    /// Record a datagram handed to the socket.
    pub fn record_datagram(&self, bytes: usize) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record an output buffer returned to the encoder.
    pub fn record_buffer_released(&self) {
        self.buffers_released.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a zero-size output buffer.
    pub fn record_empty_buffer(&self) {
        self.empty_buffers.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a keyframe.
    pub fn record_keyframe(&self) {
        self.keyframes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed send.
    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a payload above the datagram limit.
    pub fn record_oversized(&self) {
        self.oversized_payloads.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an output format change.
    pub fn record_format_change(&self) {
        self.format_changes.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> StreamMetrics {
        let now = Instant::now();

        // Output rate since the last report
        let last_time = *self.last_report_time.read();
        let elapsed = now.duration_since(last_time).as_secs_f32();
        let datagrams = self.datagrams_sent.load(Ordering::Relaxed);
        let last_datagrams = self.last_datagram_count.load(Ordering::Relaxed);

        let output_rate = if elapsed > 0.0 {
            datagrams.saturating_sub(last_datagrams) as f32 / elapsed
        } else {
            0.0
        };

        let start = *self.start_time.read();
        let bytes_sent = self.bytes_sent.load(Ordering::Relaxed);
        let bitrate_bps = start
            .map(|s| now.duration_since(s).as_secs_f64())
            .filter(|secs| *secs > 0.0)
            .map(|secs| ((bytes_sent * 8) as f64 / secs) as u64)
            .unwrap_or(0);

        let uptime_seconds = start.map(|s| now.duration_since(s).as_secs()).unwrap_or(0);

        StreamMetrics {
            datagrams_sent: datagrams,
            bytes_sent,
            bitrate_bps,
            target_bitrate_bps: self.target_bitrate_bps,
            output_rate,
            buffers_released: self.buffers_released.load(Ordering::Relaxed),
            empty_buffers: self.empty_buffers.load(Ordering::Relaxed),
            keyframes: self.keyframes.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            oversized_payloads: self.oversized_payloads.load(Ordering::Relaxed),
            format_changes: self.format_changes.load(Ordering::Relaxed),
            uptime_seconds,
        }
    }

    /// Check for warnings raised since the last report.
    pub fn check_warnings(&self) -> Vec<WarningType> {
        let mut warnings = Vec::new();

        let failures = self
            .send_failures
            .load(Ordering::Relaxed)
            .saturating_sub(self.last_send_failures.load(Ordering::Relaxed));
        if failures > 0 {
            warnings.push(WarningType::SendFailures { count: failures });
        }

        let oversized = self
            .oversized_payloads
            .load(Ordering::Relaxed)
            .saturating_sub(self.last_oversized.load(Ordering::Relaxed));
        if oversized > 0 {
            warnings.push(WarningType::OversizedPayloads { count: oversized });
        }

        warnings
    }

    /// Update last report markers for rate and warning calculation.
    pub fn mark_reported(&self) {
        *self.last_report_time.write() = Instant::now();
        self.last_datagram_count.store(
            self.datagrams_sent.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
        self.last_send_failures.store(
            self.send_failures.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
        self.last_oversized.store(
            self.oversized_payloads.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
        debug!("Metrics reported");
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = MetricsCollector::new(2_000_000);
        metrics.start();
        metrics.record_datagram(100);
        metrics.record_datagram(50);
        metrics.record_empty_buffer();
        metrics.record_buffer_released();
        metrics.record_keyframe();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.datagrams_sent, 2);
        assert_eq!(snapshot.bytes_sent, 150);
        assert_eq!(snapshot.empty_buffers, 1);
        assert_eq!(snapshot.buffers_released, 1);
        assert_eq!(snapshot.keyframes, 1);
        assert_eq!(snapshot.target_bitrate_bps, 2_000_000);
    }

    #[test]
    fn test_warnings_cover_only_new_events() {
        let metrics = MetricsCollector::default();
        assert!(metrics.check_warnings().is_empty());

        metrics.record_send_failure();
        metrics.record_send_failure();
        metrics.record_oversized();
        assert_eq!(
            metrics.check_warnings(),
            vec![
                WarningType::SendFailures { count: 2 },
                WarningType::OversizedPayloads { count: 1 },
            ]
        );

        metrics.mark_reported();
        assert!(metrics.check_warnings().is_empty());
    }

    #[test]
    fn test_uptime_zero_when_stopped() {
        let metrics = MetricsCollector::default();
        metrics.start();
        metrics.stop();
        assert_eq!(metrics.snapshot().uptime_seconds, 0);
        assert_eq!(metrics.snapshot().bitrate_bps, 0);
    }
}
