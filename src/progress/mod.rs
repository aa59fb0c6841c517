//! Progress events emitted by the load driver and the aggregate stats built
//! from them. The driver only ever `try_send`s onto a bounded channel — a
//! slow consumer drops events rather than backpressuring the run itself.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    VuStarted { vu: u64 },
    IterationStarted { vu: u64, iteration: u64 },
    RequestCompleted {
        vu: u64,
        iteration: u64,
        step: String,
        status: u16,
        latency_ms: u64,
        bytes: u64,
        error: Option<String>,
    },
    VuFinished { vu: u64, iterations: u64 },
}

/// Capacity of the progress channel; a driver iteration that can't deliver
/// an event within this headroom drops it instead of blocking the VU loop.
pub const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Default, Clone, Serialize)]
pub struct Stats {
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub bytes_received: u64,
    #[serde(skip)]
    latency_sum_ms: u64,
    pub latency_min_ms: Option<u64>,
    pub latency_max_ms: Option<u64>,
    pub per_vu: HashMap<u64, VuStats>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct VuStats {
    pub requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub iterations: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RequestCompleted {
                vu,
                status,
                latency_ms,
                bytes,
                error,
                ..
            } => {
                self.total_requests += 1;
                self.bytes_received += bytes;
                self.latency_sum_ms += latency_ms;
                self.latency_min_ms = Some(self.latency_min_ms.map_or(*latency_ms, |m| m.min(*latency_ms)));
                self.latency_max_ms = Some(self.latency_max_ms.map_or(*latency_ms, |m| m.max(*latency_ms)));

                let passed = error.is_none() && *status != 0 && *status < 400;
                if passed {
                    self.successful += 1;
                } else {
                    self.failed += 1;
                }

                let vu_stats = self.per_vu.entry(*vu).or_default();
                vu_stats.requests += 1;
                if passed {
                    vu_stats.successful += 1;
                } else {
                    vu_stats.failed += 1;
                }
            }
            ProgressEvent::VuFinished { vu, iterations } => {
                self.per_vu.entry(*vu).or_default().iterations = *iterations;
            }
            ProgressEvent::VuStarted { .. } | ProgressEvent::IterationStarted { .. } => {}
        }
    }

    pub fn latency_avg_ms(&self) -> Option<f64> {
        if self.total_requests == 0 {
            None
        } else {
            Some(self.latency_sum_ms as f64 / self.total_requests as f64)
        }
    }

    pub fn throughput_per_sec(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.total_requests as f64 / secs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_latency_and_pass_fail_counts() {
        let mut stats = Stats::new();
        stats.record(&ProgressEvent::RequestCompleted {
            vu: 1,
            iteration: 1,
            step: "login".to_string(),
            status: 200,
            latency_ms: 100,
            bytes: 50,
            error: None,
        });
        stats.record(&ProgressEvent::RequestCompleted {
            vu: 1,
            iteration: 2,
            step: "login".to_string(),
            status: 500,
            latency_ms: 300,
            bytes: 10,
            error: None,
        });
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.latency_min_ms, Some(100));
        assert_eq!(stats.latency_max_ms, Some(300));
        assert_eq!(stats.latency_avg_ms(), Some(200.0));
    }

    #[test]
    fn transport_error_counts_as_failure_even_with_status_zero() {
        let mut stats = Stats::new();
        stats.record(&ProgressEvent::RequestCompleted {
            vu: 2,
            iteration: 1,
            step: "ping".to_string(),
            status: 0,
            latency_ms: 5000,
            bytes: 0,
            error: Some("connection refused".to_string()),
        });
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.successful, 0);
    }

    #[test]
    fn per_vu_breakdown_tracks_iterations() {
        let mut stats = Stats::new();
        stats.record(&ProgressEvent::VuFinished { vu: 3, iterations: 7 });
        assert_eq!(stats.per_vu.get(&3).unwrap().iterations, 7);
    }
}
