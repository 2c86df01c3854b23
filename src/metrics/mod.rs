//! Metrics Sink (§4.5): lock-free counters/histograms, scraped as a text exposition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Fixed bucket boundaries (seconds) for the discover-latency histogram.
const LATENCY_BUCKETS: [f64; 7] = [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5];

struct Histogram {
    buckets: [AtomicU64; LATENCY_BUCKETS.len()],
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, seconds: f64) {
        for (i, bound) in LATENCY_BUCKETS.iter().enumerate() {
            if seconds <= *bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum_micros.fetch_add((seconds * 1_000_000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct MetricsSink {
    registrations: AtomicU64,
    deregistrations: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    backend_degraded: AtomicU64,
    discover_latency: Histogram,
    health_transitions: RwLock<HashMap<(String, String), AtomicU64>>,
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self {
            registrations: AtomicU64::new(0),
            deregistrations: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            backend_degraded: AtomicU64::new(0),
            discover_latency: Histogram::new(),
            health_transitions: RwLock::new(HashMap::new()),
        }
    }
}

impl MetricsSink {
    pub fn record_register(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deregister(&self) {
        self.deregistrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discover_latency(&self, seconds: f64) {
        self.discover_latency.observe(seconds);
    }

    pub fn set_backend_degraded(&self, degraded: bool) {
        self.backend_degraded.store(if degraded { 1 } else { 0 }, Ordering::Relaxed);
    }

    pub fn record_health_transition(&self, from: &str, to: &str) {
        let key = (from.to_string(), to.to_string());
        let transitions = self.health_transitions.read().unwrap();
        if let Some(counter) = transitions.get(&key) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        drop(transitions);
        let mut transitions = self.health_transitions.write().unwrap();
        transitions.entry(key).or_insert_with(|| AtomicU64::new(0)).fetch_add(1, Ordering::Relaxed);
    }

    /// Render the text exposition served at `GET /metrics`.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("# TYPE registry_register_total counter\n");
        out.push_str(&format!("registry_register_total {}\n", self.registrations.load(Ordering::Relaxed)));

        out.push_str("# TYPE registry_deregister_total counter\n");
        out.push_str(&format!("registry_deregister_total {}\n", self.deregistrations.load(Ordering::Relaxed)));

        out.push_str("# TYPE registry_cache_hits_total counter\n");
        out.push_str(&format!("registry_cache_hits_total {}\n", self.cache_hits.load(Ordering::Relaxed)));

        out.push_str("# TYPE registry_cache_misses_total counter\n");
        out.push_str(&format!("registry_cache_misses_total {}\n", self.cache_misses.load(Ordering::Relaxed)));

        out.push_str("# TYPE registry_backend_degraded gauge\n");
        out.push_str(&format!("registry_backend_degraded {}\n", self.backend_degraded.load(Ordering::Relaxed)));

        out.push_str("# TYPE registry_health_transitions_total counter\n");
        for ((from, to), counter) in self.health_transitions.read().unwrap().iter() {
            out.push_str(&format!(
                "registry_health_transitions_total{{from=\"{}\",to=\"{}\"}} {}\n",
                from,
                to,
                counter.load(Ordering::Relaxed)
            ));
        }

        out.push_str("# TYPE registry_discover_latency_seconds histogram\n");
        let mut cumulative = 0u64;
        for (i, bound) in LATENCY_BUCKETS.iter().enumerate() {
            cumulative = self.discover_latency.buckets[i].load(Ordering::Relaxed).max(cumulative);
            out.push_str(&format!(
                "registry_discover_latency_seconds_bucket{{le=\"{}\"}} {}\n",
                bound, cumulative
            ));
        }
        out.push_str(&format!(
            "registry_discover_latency_seconds_bucket{{le=\"+Inf\"}} {}\n",
            self.discover_latency.count.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "registry_discover_latency_seconds_sum {}\n",
            self.discover_latency.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
        ));
        out.push_str(&format!(
            "registry_discover_latency_seconds_count {}\n",
            self.discover_latency.count.load(Ordering::Relaxed)
        ));

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_all_required_series() {
        let sink = MetricsSink::default();
        sink.record_register();
        sink.record_cache_hit();
        sink.record_health_transition("passing", "critical");
        sink.record_discover_latency(0.004);

        let text = sink.render();
        assert!(text.contains("registry_register_total 1"));
        assert!(text.contains("registry_cache_hits_total 1"));
        assert!(text.contains("registry_health_transitions_total{from=\"passing\",to=\"critical\"} 1"));
        assert!(text.contains("registry_discover_latency_seconds_count 1"));
    }
}
