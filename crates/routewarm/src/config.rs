//! Route and scheduler configuration

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::time::Duration;

/// Opaque identifier of a navigable route (e.g. `/dashboard`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(String);

impl RouteId {
    /// Create a new route identifier
    pub fn new(route: impl Into<String>) -> Self {
        Self(route.into())
    }

    /// Get the route as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for RouteId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RouteId {
    fn from(route: &str) -> Self {
        Self(route.to_string())
    }
}

impl From<String> for RouteId {
    fn from(route: String) -> Self {
        Self(route)
    }
}

impl From<&RouteId> for RouteId {
    fn from(route: &RouteId) -> Self {
        route.clone()
    }
}

/// Preload priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Needed for first paint
    Critical,
    /// Likely next navigation
    High,
    /// Standard priority
    #[default]
    Medium,
    /// Background only
    Low,
}

impl Priority {
    /// Queue weight (higher = dequeued first)
    pub fn weight(&self) -> u8 {
        match self {
            Priority::Critical => 4,
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.weight().cmp(&other.weight())
    }
}

/// Condition that starts a route's preload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    /// Load as soon as the route is requested
    Immediate,
    /// Load during a host idle window
    #[default]
    Idle,
    /// Load when a tagged element is hovered
    Hover,
    /// Load when a tagged element becomes visible
    Intersection,
    /// Load once network activity has settled
    NetworkIdle,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TriggerKind::Immediate => "immediate",
            TriggerKind::Idle => "idle",
            TriggerKind::Hover => "hover",
            TriggerKind::Intersection => "intersection",
            TriggerKind::NetworkIdle => "network-idle",
        };
        f.write_str(name)
    }
}

/// Preload policy for a single route
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PreloadConfig {
    /// Priority class
    pub priority: Priority,
    /// Trigger kind
    pub trigger: TriggerKind,
    /// Routes to load alongside this one
    #[serde(default)]
    pub dependencies: Vec<RouteId>,
    /// Estimated chunk size in KB
    #[serde(default)]
    pub estimated_size_kb: Option<u32>,
    /// Estimated load time in ms
    #[serde(default)]
    pub estimated_load_time_ms: Option<u64>,
}

impl PreloadConfig {
    /// Create a new config
    pub fn new(priority: Priority, trigger: TriggerKind) -> Self {
        Self {
            priority,
            trigger,
            ..Default::default()
        }
    }

    /// Add a dependency (duplicates are ignored)
    pub fn with_dependency(mut self, route: impl Into<RouteId>) -> Self {
        let route = route.into();
        if !self.dependencies.contains(&route) {
            self.dependencies.push(route);
        }
        self
    }

    /// Set estimated size
    pub fn with_estimated_size_kb(mut self, size_kb: u32) -> Self {
        self.estimated_size_kb = Some(size_kb);
        self
    }

    /// Set estimated load time
    pub fn with_estimated_load_time_ms(mut self, load_time_ms: u64) -> Self {
        self.estimated_load_time_ms = Some(load_time_ms);
        self
    }

    /// Estimated size, 0 when unknown
    pub fn size_kb(&self) -> u32 {
        self.estimated_size_kb.unwrap_or(0)
    }
}

/// Thresholds for bundle optimization suggestions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionThresholds {
    /// Total bundle size (KB) above which code splitting is suggested
    pub total_size_kb: u64,
    /// Share (%) of the largest chunk above which it is called out
    pub dominant_chunk_percent: f64,
    /// Number of large chunks above which consolidation is suggested
    pub max_large_chunks: usize,
}

impl Default for SuggestionThresholds {
    fn default() -> Self {
        Self {
            total_size_kb: 500,
            dominant_chunk_percent: 30.0,
            max_large_chunks: 3,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Queue items drained per idle window
    pub idle_budget: usize,
    /// Quiet period before network-idle routes load
    #[serde(with = "duration_ms")]
    pub network_idle_debounce: Duration,
    /// Visible fraction (0.0 - 1.0) that fires the intersection trigger
    pub intersection_threshold: f64,
    /// Performance samples kept
    pub metrics_capacity: usize,
    /// Load time that is logged as slow
    #[serde(with = "duration_ms")]
    pub slow_load_threshold: Duration,
    /// Location of the prebuilt bundle analysis
    pub artifact_path: String,
    /// Suggestion rule thresholds
    pub thresholds: SuggestionThresholds,
    /// Promote declared dependencies whenever a route is promoted
    pub cascade_dependencies: bool,
    /// Preload critical routes from `start()`
    pub preload_critical_on_start: bool,
    /// Idle window cadence for hosts without native idle callbacks
    #[serde(with = "duration_ms")]
    pub idle_poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_budget: 1,
            network_idle_debounce: Duration::from_millis(1000),
            intersection_threshold: 0.1,
            metrics_capacity: 100,
            slow_load_threshold: Duration::from_millis(1000),
            artifact_path: crate::DEFAULT_ARTIFACT_PATH.into(),
            thresholds: SuggestionThresholds::default(),
            cascade_dependencies: false,
            preload_critical_on_start: true,
            idle_poll_interval: Duration::from_millis(50),
        }
    }
}

impl SchedulerConfig {
    /// Set idle budget (at least one item per window)
    pub fn with_idle_budget(mut self, budget: usize) -> Self {
        self.idle_budget = budget.max(1);
        self
    }

    /// Set network-idle debounce
    pub fn with_network_idle_debounce(mut self, debounce: Duration) -> Self {
        self.network_idle_debounce = debounce;
        self
    }

    /// Set intersection threshold
    pub fn with_intersection_threshold(mut self, threshold: f64) -> Self {
        self.intersection_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set metrics capacity
    pub fn with_metrics_capacity(mut self, capacity: usize) -> Self {
        self.metrics_capacity = capacity.max(1);
        self
    }

    /// Set artifact path
    pub fn with_artifact_path(mut self, path: impl Into<String>) -> Self {
        self.artifact_path = path.into();
        self
    }

    /// Enable or disable dependency cascading on promotion
    pub fn with_cascade_dependencies(mut self, cascade: bool) -> Self {
        self.cascade_dependencies = cascade;
        self
    }

    /// Enable or disable critical preloading in `start()`
    pub fn with_preload_critical_on_start(mut self, enabled: bool) -> Self {
        self.preload_critical_on_start = enabled;
        self
    }

    /// Set idle poll interval
    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = interval;
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
