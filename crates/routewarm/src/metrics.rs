//! Performance samples and load-time reporting

use crate::RouteId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tracing::warn;

/// Number of routes listed in `PerformanceReport::slowest_routes`
pub const SLOWEST_ROUTES: usize = 5;

/// One module load sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    /// Route the module belongs to
    pub route: RouteId,
    /// Time from import start to resolution
    pub load_time: Duration,
    /// Estimated chunk size in KB
    pub bundle_size_kb: u32,
    /// Load time when the import was started by a preload
    pub preload_time: Option<Duration>,
    /// Served from an already resolved module
    pub cache_hit: bool,
    /// Wall-clock timestamp (ms since epoch)
    pub timestamp_ms: u64,
}

impl PerformanceMetric {
    /// Create a sample for a fresh import
    pub fn new(route: impl Into<RouteId>, load_time: Duration) -> Self {
        Self {
            route: route.into(),
            load_time,
            bundle_size_kb: 0,
            preload_time: None,
            cache_hit: false,
            timestamp_ms: 0,
        }
    }

    /// Set bundle size
    pub fn with_bundle_size_kb(mut self, size_kb: u32) -> Self {
        self.bundle_size_kb = size_kb;
        self
    }

    /// Mark as preloaded
    pub fn with_preload_time(mut self, preload_time: Duration) -> Self {
        self.preload_time = Some(preload_time);
        self
    }

    /// Mark as cache hit
    pub fn with_cache_hit(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        self
    }

    /// Set timestamp
    pub fn with_timestamp_ms(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }
}

/// Aggregate view over the sample buffer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    /// Mean load time
    pub average_load_time: Duration,
    /// Slowest samples, slowest first
    pub slowest_routes: Vec<PerformanceMetric>,
    /// Distinct routes that finished loading
    pub total_preloaded_routes: usize,
    /// Share of cache-hit samples in percent
    pub cache_hit_rate: f64,
}

/// Bounded ring buffer of performance samples
#[derive(Debug)]
pub struct MetricsCollector {
    samples: Mutex<VecDeque<PerformanceMetric>>,
    capacity: usize,
    slow_threshold: Duration,
}

impl MetricsCollector {
    /// Create a collector keeping at most `capacity` samples
    pub fn new(capacity: usize, slow_threshold: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            slow_threshold,
        }
    }

    /// Record a sample, evicting the oldest when full
    pub fn record(&self, metric: PerformanceMetric) {
        if metric.load_time > self.slow_threshold {
            warn!(
                route = %metric.route,
                load_time_ms = metric.load_time.as_millis() as u64,
                "Slow route load"
            );
        }

        let mut samples = self.samples.lock();
        samples.push_back(metric);
        while samples.len() > self.capacity {
            samples.pop_front();
        }
    }

    /// Build a report over the current buffer
    pub fn report(&self) -> PerformanceReport {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return PerformanceReport::default();
        }

        let count = samples.len();
        let total: Duration = samples.iter().map(|m| m.load_time).sum();

        let mut slowest: Vec<PerformanceMetric> = samples.iter().cloned().collect();
        slowest.sort_by(|a, b| b.load_time.cmp(&a.load_time));
        slowest.truncate(SLOWEST_ROUTES);

        let hits = samples.iter().filter(|m| m.cache_hit).count();
        let loaded: HashSet<&RouteId> = samples
            .iter()
            .filter(|m| !m.cache_hit)
            .map(|m| &m.route)
            .collect();

        PerformanceReport {
            average_load_time: total / count as u32,
            slowest_routes: slowest,
            total_preloaded_routes: loaded.len(),
            cache_hit_rate: hits as f64 / count as f64 * 100.0,
        }
    }

    /// Copy of the buffered samples, oldest first
    pub fn snapshot(&self) -> Vec<PerformanceMetric> {
        self.samples.lock().iter().cloned().collect()
    }

    /// Samples for a single route
    pub fn for_route(&self, route: &str) -> Vec<PerformanceMetric> {
        self.samples
            .lock()
            .iter()
            .filter(|m| m.route.as_str() == route)
            .cloned()
            .collect()
    }

    /// Number of buffered samples
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    /// Check if no samples are buffered
    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Maximum number of samples kept
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all samples
    pub fn clear(&self) {
        self.samples.lock().clear();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(100, Duration::from_millis(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(route: &str, ms: u64) -> PerformanceMetric {
        PerformanceMetric::new(route, Duration::from_millis(ms))
    }

    #[test]
    fn test_ring_buffer_eviction() {
        let collector = MetricsCollector::default();
        for i in 1..=150u64 {
            collector.record(sample("/pos", i).with_timestamp_ms(i));
        }

        let samples = collector.snapshot();
        assert_eq!(samples.len(), 100);
        assert_eq!(samples.first().unwrap().timestamp_ms, 51);
        assert_eq!(samples.last().unwrap().timestamp_ms, 150);
    }

    #[test]
    fn test_report_average_and_slowest() {
        let collector = MetricsCollector::default();
        for (route, ms) in [
            ("/a", 100),
            ("/b", 700),
            ("/c", 300),
            ("/d", 500),
            ("/e", 200),
            ("/f", 600),
        ] {
            collector.record(sample(route, ms));
        }

        let report = collector.report();
        assert_eq!(report.average_load_time, Duration::from_millis(400));
        let slowest: Vec<_> = report.slowest_routes.iter().map(|m| m.route.as_str()).collect();
        assert_eq!(slowest, vec!["/b", "/f", "/d", "/c", "/e"]);
        assert_eq!(report.total_preloaded_routes, 6);
    }

    #[test]
    fn test_cache_hit_rate() {
        let collector = MetricsCollector::default();
        collector.record(sample("/pos", 100));
        collector.record(sample("/pos", 0).with_cache_hit(true));
        collector.record(sample("/crm", 100));
        collector.record(sample("/crm", 0).with_cache_hit(true));

        let report = collector.report();
        assert!((report.cache_hit_rate - 50.0).abs() < 1e-9);
        assert_eq!(report.total_preloaded_routes, 2);
    }

    #[test]
    fn test_empty_report() {
        let collector = MetricsCollector::default();
        let report = collector.report();
        assert_eq!(report.average_load_time, Duration::ZERO);
        assert!(report.slowest_routes.is_empty());
        assert_eq!(report.cache_hit_rate, 0.0);
    }

    #[test]
    fn test_slow_sample_still_recorded() {
        let collector = MetricsCollector::new(10, Duration::from_millis(1000));
        collector.record(sample("/crm", 2500));
        assert_eq!(collector.for_route("/crm").len(), 1);
    }
}
