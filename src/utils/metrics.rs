//! Observability and Metrics
//!
//! Atomic counters for the session core. A `Metrics` instance is owned by the
//! gateway and shared through `Arc`; there is no global instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for session operations
#[derive(Debug)]
pub struct Metrics {
    /// Connections ever accepted into the registry
    pub connections_total: AtomicU64,
    /// Connections accept refused (limit or duplicate id)
    pub connections_refused: AtomicU64,
    /// Total handshake attempts
    pub handshakes_total: AtomicU64,
    /// Successful handshakes
    pub handshakes_success: AtomicU64,
    /// Failed handshakes
    pub handshakes_failed: AtomicU64,
    /// Frames received
    pub frames_received: AtomicU64,
    /// Bytes received
    pub bytes_received: AtomicU64,
    /// Replies produced
    pub replies_sent: AtomicU64,
    /// Credential packets that made it through the pipeline
    pub credentials_unprotected: AtomicU64,
    /// Credential submissions rejected by policy
    pub policy_rejections: AtomicU64,
    /// Opaque crypto failures (encoding, cipher, compression)
    pub crypto_failures: AtomicU64,
    /// Protocol errors (framing, wrong type, key size)
    pub protocol_errors: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_refused: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            replies_sent: AtomicU64::new(0),
            credentials_unprotected: AtomicU64::new(0),
            policy_rejections: AtomicU64::new(0),
            crypto_failures: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_accepted(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_refused(&self) {
        self.connections_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an inbound frame
    pub fn frame_received(&self, byte_count: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn reply_sent(&self) {
        self.replies_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn credentials_unprotected(&self) {
        self.credentials_unprotected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn policy_rejection(&self) {
        self.policy_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn crypto_failure(&self) {
        self.crypto_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_refused: self.connections_refused.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            replies_sent: self.replies_sent.load(Ordering::Relaxed),
            credentials_unprotected: self.credentials_unprotected.load(Ordering::Relaxed),
            policy_rejections: self.policy_rejections.load(Ordering::Relaxed),
            crypto_failures: self.crypto_failures.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_refused = snapshot.connections_refused,
            handshakes_total = snapshot.handshakes_total,
            handshakes_success = snapshot.handshakes_success,
            handshakes_failed = snapshot.handshakes_failed,
            frames_received = snapshot.frames_received,
            bytes_received = snapshot.bytes_received,
            replies_sent = snapshot.replies_sent,
            credentials_unprotected = snapshot.credentials_unprotected,
            policy_rejections = snapshot.policy_rejections,
            crypto_failures = snapshot.crypto_failures,
            protocol_errors = snapshot.protocol_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Session metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_refused: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub frames_received: u64,
    pub bytes_received: u64,
    pub replies_sent: u64,
    pub credentials_unprotected: u64,
    pub policy_rejections: u64,
    pub crypto_failures: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.handshake_attempt();
        metrics.handshake_attempt();
        metrics.handshake_success();
        metrics.handshake_failed();
        metrics.frame_received(40);
        metrics.frame_received(2);

        let snap = metrics.snapshot();
        assert_eq!(snap.handshakes_total, 2);
        assert_eq!(snap.handshakes_success, 1);
        assert_eq!(snap.handshakes_failed, 1);
        assert_eq!(snap.frames_received, 2);
        assert_eq!(snap.bytes_received, 42);
    }
}
