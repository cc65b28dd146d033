//! Rolling latency statistics reported by SLAVE acknowledgements

use std::collections::VecDeque;
use std::time::Instant;

/// One server-computed latency measurement
#[derive(Debug, Clone)]
pub struct LatencySample {
    pub capture_id: String,
    pub latency_ms: i64,
    pub recorded_at: Instant,
}

/// Bounded history of latency samples with summary statistics
///
/// Acks whose latency the server could not compute (no capture timestamp)
/// are counted but kept out of the statistics.
#[derive(Debug)]
pub struct LatencyTracker {
    history: VecDeque<LatencySample>,
    max_samples: usize,
    unknown: usize,
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(100)
    }
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
            unknown: 0,
        }
    }

    pub fn record(&mut self, capture_id: &str, latency_ms: Option<i64>) {
        let Some(latency_ms) = latency_ms else {
            self.unknown += 1;
            return;
        };

        self.history.push_back(LatencySample {
            capture_id: capture_id.to_string(),
            latency_ms,
            recorded_at: Instant::now(),
        });

        // Maintain max samples
        while self.history.len() > self.max_samples {
            self.history.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Acks that arrived without a computable latency
    pub fn unknown_count(&self) -> usize {
        self.unknown
    }

    pub fn last(&self) -> Option<&LatencySample> {
        self.history.back()
    }

    pub fn min(&self) -> Option<i64> {
        self.history.iter().map(|s| s.latency_ms).min()
    }

    pub fn max(&self) -> Option<i64> {
        self.history.iter().map(|s| s.latency_ms).max()
    }

    pub fn average(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let total: i64 = self.history.iter().map(|s| s.latency_ms).sum();
        Some(total as f64 / self.history.len() as f64)
    }

    pub fn summary(&self) -> String {
        match (self.min(), self.average(), self.max()) {
            (Some(min), Some(avg), Some(max)) => format!(
                "latency over {} samples: min={}ms avg={:.1}ms max={}ms (unknown={})",
                self.len(),
                min,
                avg,
                max,
                self.unknown
            ),
            _ => format!("no latency samples yet (unknown={})", self.unknown),
        }
    }
}
