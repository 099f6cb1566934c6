//! Route registry and navigation flow table

use crate::{PreloadConfig, Priority, Result, RouteId, TriggerKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Static table of preload policies, in registration order.
///
/// A route without an entry is never preloaded automatically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteRegistry {
    routes: IndexMap<RouteId, PreloadConfig>,
}

impl RouteRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route (replaces an earlier entry for the same route)
    pub fn with_route(mut self, route: impl Into<RouteId>, config: PreloadConfig) -> Self {
        self.routes.insert(route.into(), config);
        self
    }

    /// Parse a registry from a JSON object of `route -> config`
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Look up a route's preload policy
    pub fn lookup(&self, route: &str) -> Option<&PreloadConfig> {
        self.routes.get(route)
    }

    /// Check if a route is registered
    pub fn contains(&self, route: &str) -> bool {
        self.routes.contains_key(route)
    }

    /// Iterate over routes in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&RouteId, &PreloadConfig)> {
        self.routes.iter()
    }

    /// Registered routes in registration order
    pub fn routes(&self) -> impl Iterator<Item = &RouteId> {
        self.routes.keys()
    }

    /// Routes with the given priority
    pub fn routes_with_priority(&self, priority: Priority) -> Vec<RouteId> {
        self.routes
            .iter()
            .filter(|(_, config)| config.priority == priority)
            .map(|(route, _)| route.clone())
            .collect()
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routes of the ERP frontend
    pub fn erp_defaults() -> Self {
        Self::new()
            .with_route(
                "/dashboard",
                PreloadConfig::new(Priority::Critical, TriggerKind::Immediate)
                    .with_estimated_size_kb(45)
                    .with_estimated_load_time_ms(120),
            )
            .with_route(
                "/streckengeschaeft",
                PreloadConfig::new(Priority::High, TriggerKind::Idle)
                    .with_dependency("/dashboard")
                    .with_estimated_size_kb(78)
                    .with_estimated_load_time_ms(200),
            )
            .with_route(
                "/pos",
                PreloadConfig::new(Priority::High, TriggerKind::Idle)
                    .with_dependency("/dashboard")
                    .with_estimated_size_kb(92)
                    .with_estimated_load_time_ms(250),
            )
            .with_route(
                "/lakasir-features",
                PreloadConfig::new(Priority::Medium, TriggerKind::Hover)
                    .with_estimated_size_kb(35)
                    .with_estimated_load_time_ms(150),
            )
            .with_route(
                "/daily-report",
                PreloadConfig::new(Priority::Medium, TriggerKind::Hover)
                    .with_dependency("/pos")
                    .with_estimated_size_kb(28)
                    .with_estimated_load_time_ms(100),
            )
            .with_route(
                "/e-invoicing",
                PreloadConfig::new(Priority::Medium, TriggerKind::NetworkIdle)
                    .with_estimated_size_kb(65)
                    .with_estimated_load_time_ms(180),
            )
            .with_route(
                "/crm",
                PreloadConfig::new(Priority::Low, TriggerKind::Intersection)
                    .with_estimated_size_kb(120)
                    .with_estimated_load_time_ms(300),
            )
    }
}

/// Hand-maintained table of likely next routes.
///
/// This is a static heuristic, not learned from navigation analytics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteFlow {
    next: IndexMap<RouteId, Vec<RouteId>>,
}

impl RouteFlow {
    /// Create an empty flow table
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the likely successors of a route
    pub fn with_successors<I, R>(mut self, route: impl Into<RouteId>, successors: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RouteId>,
    {
        self.next
            .insert(route.into(), successors.into_iter().map(Into::into).collect());
        self
    }

    /// Likely next routes (empty for unknown routes)
    pub fn likely_next(&self, route: &str) -> &[RouteId] {
        self.next.get(route).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterate over the table
    pub fn iter(&self) -> impl Iterator<Item = (&RouteId, &Vec<RouteId>)> {
        self.next.iter()
    }

    /// Navigation flow of the ERP frontend
    pub fn erp_defaults() -> Self {
        Self::new()
            .with_successors("/dashboard", ["/streckengeschaeft", "/pos", "/lakasir-features"])
            .with_successors("/streckengeschaeft", ["/pos", "/lakasir-features"])
            .with_successors("/pos", ["/daily-report", "/dashboard"])
            .with_successors("/lakasir-features", ["/dashboard", "/streckengeschaeft"])
            .with_successors("/daily-report", ["/pos", "/dashboard"])
            .with_successors("/e-invoicing", ["/dashboard", "/crm"])
            .with_successors("/crm", ["/dashboard", "/e-invoicing"])
    }
}
