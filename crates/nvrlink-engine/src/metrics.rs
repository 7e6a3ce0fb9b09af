//! Metrics collection and reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use nvrlink_ipc::StreamMetrics;

/// Collects stream session counters.
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    bytes_received: AtomicU64,
    chunks_ingested: AtomicU64,
    chunks_rejected: AtomicU64,
    chunks_throttled: AtomicU64,
    frames_decoded: AtomicU64,
    reconnects: AtomicU64,
    last_report_time: RwLock<Instant>,
    last_frame_count: AtomicU64,
    buffer_fullness: RwLock<f32>,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            start_time: RwLock::new(None),
            bytes_received: AtomicU64::new(0),
            chunks_ingested: AtomicU64::new(0),
            chunks_rejected: AtomicU64::new(0),
            chunks_throttled: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            last_report_time: RwLock::new(Instant::now()),
            last_frame_count: AtomicU64::new(0),
            buffer_fullness: RwLock::new(0.0),
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

    /// Record bytes read from the socket.
    pub fn record_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a chunk accepted by the ingest buffer.
    pub fn record_chunk_ingested(&self) {
        self.chunks_ingested.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a chunk rejected because the ingest buffer was full.
    pub fn record_chunk_rejected(&self) {
        self.chunks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a chunk replaced by a ready unit.
    pub fn record_chunk_throttled(&self) {
        self.chunks_throttled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a decoded frame.
    pub fn record_frame(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful reconnect.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Update buffer fullness percentage.
    pub fn update_buffer_fullness(&self, fullness: f32) {
        *self.buffer_fullness.write() = fullness.clamp(0.0, 100.0);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> StreamMetrics {
        let now = Instant::now();

        let last_time = *self.last_report_time.read();
        let elapsed = now.duration_since(last_time).as_secs_f32();
        let current_frames = self.frames_decoded.load(Ordering::Relaxed);
        let last_frames = self.last_frame_count.load(Ordering::Relaxed);

        let fps = if elapsed > 0.0 {
            current_frames.saturating_sub(last_frames) as f32 / elapsed
        } else {
            0.0
        };

        let uptime_seconds = self
            .start_time
            .read()
            .map(|s| now.duration_since(s).as_secs())
            .unwrap_or(0);

        StreamMetrics {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            chunks_ingested: self.chunks_ingested.load(Ordering::Relaxed),
            chunks_rejected: self.chunks_rejected.load(Ordering::Relaxed),
            chunks_throttled: self.chunks_throttled.load(Ordering::Relaxed),
            frames_decoded: current_frames,
            fps,
            reconnects: self.reconnects.load(Ordering::Relaxed),
            buffer_fullness_percent: *self.buffer_fullness.read(),
            uptime_seconds,
        }
    }

    /// Update last report time for FPS calculation.
    pub fn mark_reported(&self) {
        *self.last_report_time.write() = Instant::now();
        self.last_frame_count.store(
            self.frames_decoded.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
