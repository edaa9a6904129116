//! Metrics collection for mesh operations
//!
//! Counters are process-wide and carry no per-agent labels, so their
//! cardinality stays fixed no matter how many worker agents get launched.

use std::sync::Arc;
use tokio::sync::RwLock;

/// Counters for mesh operations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshMetrics {
    /// Messages accepted by a mailbox
    pub messages_sent_total: u64,
    /// Send attempts rejected (unknown recipient, full mailbox)
    pub send_failures_total: u64,
    /// Inbound messages claimed by a registered listener
    pub listener_deliveries_total: u64,
    /// Inbound messages queued for an agent's behaviour
    pub behaviour_deliveries_total: u64,
    /// Inbound messages that matched nothing and were dropped
    pub unmatched_total: u64,
    /// Correlated requests sent
    pub requests_total: u64,
    /// Correlated requests that never saw a reply in time
    pub request_timeouts_total: u64,
    /// Round-trip latency of answered requests
    pub reply_latency_ms: LatencyStats,
}

/// Latency statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyStats {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

/// Shared metrics collector; clones observe the same counters
#[derive(Clone)]
pub struct MeshMetricsCollector {
    metrics: Arc<RwLock<MeshMetrics>>,
    latency_samples: Arc<RwLock<Vec<u64>>>,
    max_samples: usize,
}

impl Default for MeshMetricsCollector {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl MeshMetricsCollector {
    /// Create a collector keeping at most `max_samples` latency samples
    pub fn new(max_samples: usize) -> Self {
        Self {
            metrics: Arc::new(RwLock::new(MeshMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::new())),
            max_samples,
        }
    }

    async fn bump(&self, field: impl FnOnce(&mut MeshMetrics) -> &mut u64) {
        let mut metrics = self.metrics.write().await;
        let counter = field(&mut metrics);
        *counter = counter.saturating_add(1);
    }

    pub async fn record_send(&self) {
        self.bump(|m| &mut m.messages_sent_total).await;
    }

    pub async fn record_send_failure(&self) {
        self.bump(|m| &mut m.send_failures_total).await;
    }

    pub async fn record_listener_delivery(&self) {
        self.bump(|m| &mut m.listener_deliveries_total).await;
    }

    pub async fn record_behaviour_delivery(&self) {
        self.bump(|m| &mut m.behaviour_deliveries_total).await;
    }

    pub async fn record_unmatched(&self) {
        self.bump(|m| &mut m.unmatched_total).await;
    }

    pub async fn record_request(&self) {
        self.bump(|m| &mut m.requests_total).await;
    }

    pub async fn record_request_timeout(&self) {
        self.bump(|m| &mut m.request_timeouts_total).await;
    }

    /// Record the round-trip latency of an answered request
    pub async fn record_reply_latency(&self, duration_ms: u64) {
        let mut samples = self.latency_samples.write().await;
        samples.push(duration_ms);

        // Keep only recent samples
        if samples.len() > self.max_samples {
            let drain_count = samples.len() - self.max_samples;
            samples.drain(0..drain_count);
        }

        let mut sorted = samples.clone();
        drop(samples);
        sorted.sort_unstable();

        let Some(max) = sorted.last().copied() else {
            return;
        };
        let at = |q: f64| sorted[((sorted.len() as f64 * q) as usize).min(sorted.len() - 1)] as f64;

        let mut metrics = self.metrics.write().await;
        metrics.reply_latency_ms = LatencyStats {
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
            max: max as f64,
        };
    }

    /// Get current metrics snapshot
    pub async fn snapshot(&self) -> MeshMetrics {
        self.metrics.read().await.clone()
    }

    /// Reset all metrics
    pub async fn reset(&self) {
        *self.metrics.write().await = MeshMetrics::default();
        self.latency_samples.write().await.clear();
    }
}
