//! Trigger-driven preload scheduler
//!
//! ```text
//!            preload_route(route)
//!                    │
//!          ┌─────────┼───────────┬──────────────┬──────────────┐
//!          ▼         ▼           ▼              ▼              ▼
//!      immediate    idle       hover      intersection   network-idle
//!          │         │           │              │              │
//!          │    PreloadQueue  pointer-enter  visibility    debounce timer
//!          │    (idle window)  listeners     observer      (reset on I/O)
//!          │         │           │              │              │
//!          └─────────┴───────────┴──────┬───────┴──────────────┘
//!                                       ▼
//!                                    promote
//!                                       │
//!                             LazyModule::preload ──▶ HostPort::spawn
//! ```
//!
//! Whichever trigger fires first wins. The lazy module guarantees the import
//! runs once, so late triggers are no-ops.

use crate::bundle::{artifact_source, ArtifactSource, BundleAnalysis, BundleAnalyzer};
use crate::loader::{Importer, LazyModule, LoadPhase, Preloadable, Telemetry};
use crate::metrics::{MetricsCollector, PerformanceReport};
use crate::port::{Clock, ElementId, HostPort, MaybeSend, MaybeSync, TimerId};
use crate::queue::PreloadQueue;
use crate::{
    ImportError, PreloadError, Priority, Result, RouteFlow, RouteId, RouteRegistry, SchedulerConfig,
    TriggerKind,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Scheduler view of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteState {
    /// Not armed and not loading
    Idle,
    /// Waiting for its trigger
    Queued(TriggerKind),
    /// Import in flight
    Loading,
    /// Module resolved
    Loaded,
    /// Import rejected
    Failed,
}

/// Whether the host is inside an idle window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Idle,
    Active,
}

/// Scheduler snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Routes whose module resolved
    pub preloaded_count: usize,
    /// Items waiting for an idle window
    pub queue_length: usize,
    /// Inside an idle window
    pub is_idle: bool,
    /// Buffered performance samples
    pub metric_count: usize,
}

#[derive(Default)]
struct NetworkIdle {
    timer: Option<TimerId>,
    pending: Vec<RouteId>,
}

struct Inner {
    registry: RouteRegistry,
    flow: RouteFlow,
    config: SchedulerConfig,
    port: Arc<dyn HostPort>,
    telemetry: Telemetry,
    analyzer: BundleAnalyzer,
    modules: DashMap<RouteId, Arc<dyn Preloadable>>,
    waiting: DashMap<RouteId, TriggerKind>,
    hover_armed: DashMap<RouteId, HashSet<ElementId>>,
    observed: DashMap<RouteId, HashSet<ElementId>>,
    queue: Mutex<PreloadQueue>,
    network: Mutex<NetworkIdle>,
    analysis: Mutex<Option<BundleAnalysis>>,
    is_idle: AtomicBool,
    window_used: AtomicUsize,
    started: AtomicBool,
}

impl Inner {
    fn metrics(&self) -> &Arc<MetricsCollector> {
        self.telemetry.metrics()
    }

    fn module(&self, route: &str) -> Option<Arc<dyn Preloadable>> {
        self.modules.get(route).map(|m| Arc::clone(m.value()))
    }

    fn route_state(&self, route: &str) -> RouteState {
        if let Some(module) = self.module(route) {
            match module.phase() {
                LoadPhase::InFlight => return RouteState::Loading,
                LoadPhase::Resolved => return RouteState::Loaded,
                LoadPhase::Failed => return RouteState::Failed,
                LoadPhase::NotRequested => {}
            }
        }
        match self.waiting.get(route) {
            Some(trigger) => RouteState::Queued(*trigger),
            None => RouteState::Idle,
        }
    }

    fn is_started(&self, route: &str) -> bool {
        matches!(
            self.route_state(route),
            RouteState::Loading | RouteState::Loaded | RouteState::Failed
        )
    }

    fn preload_route(self: &Arc<Self>, route: &str) {
        let Some(config) = self.registry.lookup(route) else {
            debug!(route, "No preload config, skipping");
            return;
        };
        if self.is_started(route) {
            return;
        }

        let route = RouteId::from(route);
        match config.trigger {
            TriggerKind::Immediate => self.execute_preload(route.as_str()),
            TriggerKind::Idle => {
                if !self.queue.lock().contains(route.as_str()) {
                    self.queue_for_idle(route, config.priority);
                }
            }
            TriggerKind::Hover => self.arm_hover(&route),
            TriggerKind::Intersection => self.arm_intersection(&route),
            TriggerKind::NetworkIdle => self.arm_network_idle(&route),
        }
    }

    fn execute_preload(self: &Arc<Self>, route: &str) {
        self.promote(route, &mut HashSet::new());
    }

    fn promote(self: &Arc<Self>, route: &str, seen: &mut HashSet<RouteId>) {
        if !seen.insert(RouteId::from(route)) {
            return;
        }
        self.waiting.remove(route);
        self.queue.lock().remove(route);

        let Some(module) = self.module(route) else {
            warn!(route, "Route promoted without a registered module");
            return;
        };
        if module.phase() != LoadPhase::NotRequested {
            return;
        }

        info!(route, "Preloading route");
        self.port.spawn(module.preload());

        if self.config.cascade_dependencies {
            if let Some(config) = self.registry.lookup(route) {
                for dependency in &config.dependencies {
                    self.promote(dependency.as_str(), seen);
                }
            }
        }
    }

    // Idle queue

    fn queue_for_idle(self: &Arc<Self>, route: RouteId, priority: Priority) {
        if self.try_claim_window() {
            debug!(route = %route, "Idle window open, preloading now");
            self.execute_preload(route.as_str());
            return;
        }

        let weak = Arc::downgrade(self);
        let target = route.clone();
        self.waiting.insert(route.clone(), TriggerKind::Idle);
        self.queue.lock().enqueue(
            route,
            priority,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.execute_preload(target.as_str());
                }
            }),
        );
    }

    fn try_claim_window(&self) -> bool {
        if !self.is_idle.load(Ordering::SeqCst) {
            return false;
        }
        let budget = self.config.idle_budget.max(1);
        self.window_used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < budget).then_some(used + 1)
            })
            .is_ok()
    }

    fn release_window(&self) {
        self.window_used.fetch_sub(1, Ordering::SeqCst);
    }

    fn process_queue(&self) {
        while self.try_claim_window() {
            let Some(item) = self.queue.lock().dequeue() else {
                self.release_window();
                break;
            };
            // Started elsewhere (navigation, dependency); costs no budget
            if self.is_started(item.route.as_str()) {
                debug!(route = %item.route, "Queued route already started, skipping");
                self.waiting.remove(item.route.as_str());
                self.release_window();
                continue;
            }
            debug!(route = %item.route, priority = item.priority, "Draining idle queue");
            item.run();
        }
    }

    fn idle_tick(&self) {
        self.window_used.store(0, Ordering::SeqCst);
        self.is_idle.store(true, Ordering::SeqCst);
        self.process_queue();
        self.is_idle.store(false, Ordering::SeqCst);
    }

    fn request_idle_window(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let result = self.port.request_idle(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.idle_tick();
                inner.request_idle_window();
            }
        }));
        if let Err(e) = result {
            warn!(error = %e, "Idle detection unavailable, idle queue will not drain");
        }
    }

    // DOM triggers

    fn arm_hover(self: &Arc<Self>, route: &RouteId) {
        let elements = match self.port.elements_for_route(route.as_str()) {
            Ok(elements) => elements,
            Err(e) => {
                debug!(route = %route, error = %e, "Hover trigger unavailable");
                return;
            }
        };
        let fresh = self.fresh_elements(&self.hover_armed, route, elements);
        self.waiting.insert(route.clone(), TriggerKind::Hover);

        for element in fresh {
            let weak = Arc::downgrade(self);
            let target = route.clone();
            let listener = Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.execute_preload(target.as_str());
                }
            });
            if let Err(e) = self.port.on_pointer_enter(element, listener) {
                warn!(route = %route, %element, error = %e, "Failed to attach hover listener");
            }
        }
    }

    fn arm_intersection(self: &Arc<Self>, route: &RouteId) {
        let elements = match self.port.elements_for_route(route.as_str()) {
            Ok(elements) => elements,
            Err(e) => {
                debug!(route = %route, error = %e, "Intersection trigger unavailable");
                return;
            }
        };
        let fresh = self.fresh_elements(&self.observed, route, elements);
        self.waiting.insert(route.clone(), TriggerKind::Intersection);
        if fresh.is_empty() {
            return;
        }

        let weak = Arc::downgrade(self);
        let target = route.clone();
        let listener = Box::new(move |element: ElementId| {
            if let Some(inner) = weak.upgrade() {
                debug!(route = %target, %element, "Route link became visible");
                inner.execute_preload(target.as_str());
            }
        });
        if let Err(e) =
            self.port
                .observe_intersection_once(&fresh, self.config.intersection_threshold, listener)
        {
            warn!(route = %route, error = %e, "Failed to observe route links");
        }
    }

    /// Elements not yet tracked for `route`, now tracked
    fn fresh_elements(
        &self,
        tracked: &DashMap<RouteId, HashSet<ElementId>>,
        route: &RouteId,
        elements: Vec<ElementId>,
    ) -> Vec<ElementId> {
        let mut known = tracked.entry(route.clone()).or_default();
        elements.into_iter().filter(|el| known.insert(*el)).collect()
    }

    // Network idle

    fn arm_network_idle(self: &Arc<Self>, route: &RouteId) {
        {
            let mut network = self.network.lock();
            if !network.pending.contains(route) {
                network.pending.push(route.clone());
            }
        }
        self.waiting.insert(route.clone(), TriggerKind::NetworkIdle);
        self.restart_network_timer();
    }

    fn network_activity(self: &Arc<Self>) {
        if self.network.lock().pending.is_empty() {
            return;
        }
        debug!("Network activity, postponing network-idle preloads");
        self.restart_network_timer();
    }

    fn restart_network_timer(self: &Arc<Self>) {
        let previous = self.network.lock().timer.take();
        if let Some(timer) = previous {
            self.port.clear_timeout(timer);
        }

        let weak = Arc::downgrade(self);
        let result = self.port.set_timeout(
            self.config.network_idle_debounce,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.network_idle();
                }
            }),
        );

        match result {
            Ok(timer) => {
                let stale = self.network.lock().timer.replace(timer);
                if let Some(stale) = stale {
                    self.port.clear_timeout(stale);
                }
            }
            Err(e) => warn!(error = %e, "Network-idle timer unavailable"),
        }
    }

    fn network_idle(self: &Arc<Self>) {
        let routes = {
            let mut network = self.network.lock();
            network.timer = None;
            std::mem::take(&mut network.pending)
        };
        if routes.is_empty() {
            return;
        }
        info!(count = routes.len(), "Network idle, preloading waiting routes");
        for route in routes {
            self.execute_preload(route.as_str());
        }
    }

    fn preloaded_count(&self) -> usize {
        self.modules.iter().filter(|m| m.value().is_loaded()).count()
    }
}

/// Builder for [`PreloadScheduler`]
#[derive(Default)]
pub struct SchedulerBuilder {
    registry: RouteRegistry,
    flow: RouteFlow,
    config: SchedulerConfig,
    source: Option<Arc<dyn ArtifactSource>>,
}

impl SchedulerBuilder {
    /// Set route registry
    pub fn with_registry(mut self, registry: RouteRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Set route flow table
    pub fn with_flow(mut self, flow: RouteFlow) -> Self {
        self.flow = flow;
        self
    }

    /// Set scheduler config
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Read bundle analyses from `source` instead of `config.artifact_path`
    pub fn with_artifact_source(mut self, source: Arc<dyn ArtifactSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Build the scheduler on a host port
    pub fn build<P: HostPort + 'static>(self, port: Arc<P>) -> PreloadScheduler {
        let clock: Arc<dyn Clock> = port.clone();
        let metrics = Arc::new(MetricsCollector::new(
            self.config.metrics_capacity,
            self.config.slow_load_threshold,
        ));
        let source = self
            .source
            .or_else(|| artifact_source(&self.config.artifact_path));
        let mut analyzer = BundleAnalyzer::new(self.config.thresholds.clone());
        if let Some(source) = source {
            analyzer = analyzer.with_source(source);
        }

        PreloadScheduler {
            inner: Arc::new(Inner {
                registry: self.registry,
                flow: self.flow,
                config: self.config,
                port,
                telemetry: Telemetry::new(clock, metrics),
                analyzer,
                modules: DashMap::new(),
                waiting: DashMap::new(),
                hover_armed: DashMap::new(),
                observed: DashMap::new(),
                queue: Mutex::new(PreloadQueue::new()),
                network: Mutex::new(NetworkIdle::default()),
                analysis: Mutex::new(None),
                is_idle: AtomicBool::new(false),
                window_used: AtomicUsize::new(0),
                started: AtomicBool::new(false),
            }),
        }
    }
}

/// Route preloading service.
///
/// One per page session, handed to UI code explicitly. Clones share state.
#[derive(Clone)]
pub struct PreloadScheduler {
    inner: Arc<Inner>,
}

impl PreloadScheduler {
    /// Create a scheduler builder
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    /// Create a scheduler with the given tables and default config
    pub fn new<P: HostPort + 'static>(port: Arc<P>, registry: RouteRegistry, flow: RouteFlow) -> Self {
        Self::builder()
            .with_registry(registry)
            .with_flow(flow)
            .build(port)
    }

    /// Start idle detection, network monitoring and critical preloading.
    ///
    /// Calling it again does nothing.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.request_idle_window();

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let subscribed = self.inner.port.on_network_activity(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.network_activity();
            }
        }));
        if let Err(e) = subscribed {
            debug!(error = %e, "Network activity monitoring unavailable");
        }

        if let Some(load_time) = self.inner.port.navigation_timing() {
            info!(load_time_ms = load_time.as_millis() as u64, "Page load time");
        }

        if self.inner.config.preload_critical_on_start {
            self.preload_critical_routes();
        }
        info!(routes = self.inner.registry.len(), "Preload scheduler started");
    }

    /// Register a module for its route, wiring it to the scheduler's metrics.
    ///
    /// A route keeps the first module registered for it; later ones are
    /// rejected with [`PreloadError::AlreadyRegistered`].
    pub fn register<M: Clone + MaybeSend + MaybeSync + 'static>(
        &self,
        module: LazyModule<M>,
    ) -> Result<LazyModule<M>> {
        match self.inner.modules.entry(module.route().clone()) {
            Entry::Occupied(_) => {
                warn!(route = %module.route(), "Route already has a module, keeping the first");
                Err(PreloadError::AlreadyRegistered(module.route().clone()))
            }
            Entry::Vacant(slot) => {
                let size_kb = self
                    .inner
                    .registry
                    .lookup(module.route().as_str())
                    .map_or(0, |c| c.size_kb());
                Preloadable::attach(&module, self.inner.telemetry.clone(), size_kb);
                slot.insert(Arc::new(module.clone()));
                Ok(module)
            }
        }
    }

    /// Create and register a module from an import function
    pub fn lazy<M, F, Fut>(&self, route: impl Into<RouteId>, import: F) -> Result<LazyModule<M>>
    where
        M: Clone + MaybeSend + MaybeSync + 'static,
        F: Fn() -> Fut + MaybeSend + MaybeSync + 'static,
        Fut: Future<Output = std::result::Result<M, ImportError>> + MaybeSend + 'static,
    {
        self.register(LazyModule::new(route, import))
    }

    /// Register a module from a boxed importer
    pub fn lazy_boxed<M: Clone + MaybeSend + MaybeSync + 'static>(
        &self,
        route: impl Into<RouteId>,
        importer: Importer<M>,
    ) -> Result<LazyModule<M>> {
        self.register(LazyModule::from_importer(route, importer))
    }

    /// Arm a route according to its configured trigger.
    ///
    /// Routes without config are ignored; loading or finished routes are
    /// left alone.
    pub fn preload_route(&self, route: &str) {
        self.inner.preload_route(route);
    }

    /// Preload every route with critical priority
    pub fn preload_critical_routes(&self) {
        for route in self.inner.registry.routes_with_priority(Priority::Critical) {
            self.inner.preload_route(route.as_str());
        }
    }

    /// Arm every registered route
    pub fn preload_all_routes(&self) {
        let routes: Vec<RouteId> = self.inner.registry.routes().cloned().collect();
        for route in routes {
            self.inner.preload_route(route.as_str());
        }
    }

    /// Start loading a route's dependencies now, regardless of their triggers
    pub fn preload_dependencies(&self, route: &str) {
        let Some(config) = self.inner.registry.lookup(route) else {
            return;
        };
        for dependency in &config.dependencies {
            debug!(route, dependency = %dependency, "Preloading dependency");
            self.inner.execute_preload(dependency.as_str());
        }
    }

    /// Arm the routes likely to follow `current`
    pub fn preload_based_on_current_route(&self, current: &str) {
        for route in self.inner.flow.likely_next(current) {
            self.inner.preload_route(route.as_str());
        }
    }

    /// Queue a route for the idle window with an explicit priority
    pub fn queue_preload(&self, route: impl Into<RouteId>, priority: Priority) {
        let route = route.into();
        if self.inner.is_started(route.as_str()) {
            return;
        }
        self.inner.queue_for_idle(route, priority);
        self.inner.process_queue();
    }

    /// Loaded flag per registered route
    pub fn preload_status(&self) -> BTreeMap<RouteId, bool> {
        self.inner
            .registry
            .routes()
            .map(|route| {
                let loaded = self
                    .inner
                    .module(route.as_str())
                    .map_or(false, |m| m.is_loaded());
                (route.clone(), loaded)
            })
            .collect()
    }

    /// State of a single route
    pub fn route_state(&self, route: &str) -> RouteState {
        self.inner.route_state(route)
    }

    /// Routes whose module resolved, sorted
    pub fn preloaded_routes(&self) -> Vec<RouteId> {
        let mut routes: Vec<RouteId> = self
            .inner
            .modules
            .iter()
            .filter(|m| m.value().is_loaded())
            .map(|m| m.key().clone())
            .collect();
        routes.sort();
        routes
    }

    /// Routes waiting for their trigger, sorted
    pub fn pending_routes(&self) -> Vec<RouteId> {
        let waiting: Vec<RouteId> = self.inner.waiting.iter().map(|w| w.key().clone()).collect();
        let mut routes: Vec<RouteId> = waiting
            .into_iter()
            .filter(|route| matches!(self.inner.route_state(route.as_str()), RouteState::Queued(_)))
            .collect();
        routes.sort();
        routes
    }

    /// Whether an idle window is open
    pub fn activity(&self) -> Activity {
        if self.inner.is_idle.load(Ordering::SeqCst) {
            Activity::Idle
        } else {
            Activity::Active
        }
    }

    /// Load-time report over the sample buffer
    pub fn performance_report(&self) -> PerformanceReport {
        let mut report = self.inner.metrics().report();
        report.total_preloaded_routes = self.inner.preloaded_count();
        report
    }

    /// Most recent bundle analysis, if any was computed
    pub fn bundle_analysis(&self) -> Option<BundleAnalysis> {
        self.inner.analysis.lock().clone()
    }

    /// Recompute the bundle analysis and cache it
    pub async fn analyze(&self) -> BundleAnalysis {
        let analysis = self.inner.analyzer.analyze(&self.inner.registry).await;
        *self.inner.analysis.lock() = Some(analysis.clone());
        analysis
    }

    /// Scheduler snapshot
    pub fn service_status(&self) -> ServiceStatus {
        ServiceStatus {
            preloaded_count: self.inner.preloaded_count(),
            queue_length: self.inner.queue.lock().len(),
            is_idle: self.inner.is_idle.load(Ordering::SeqCst),
            metric_count: self.inner.metrics().len(),
        }
    }

    /// Performance samples
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        self.inner.metrics()
    }

    /// Route registry
    pub fn registry(&self) -> &RouteRegistry {
        &self.inner.registry
    }

    /// Route flow table
    pub fn flow(&self) -> &RouteFlow {
        &self.inner.flow
    }

    /// Scheduler config
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }
}

impl fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("routes", &self.registry.len())
            .field("config", &self.config)
            .field("source", &self.source.as_ref().map(|s| s.location()))
            .finish()
    }
}

impl fmt::Debug for PreloadScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreloadScheduler")
            .field("routes", &self.inner.registry.len())
            .field("modules", &self.inner.modules.len())
            .field("status", &self.service_status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::ManualPort;
    use crate::PreloadConfig;
    use std::time::Duration;

    fn idle_route(priority: Priority) -> PreloadConfig {
        PreloadConfig::new(priority, TriggerKind::Idle)
    }

    fn scheduler(registry: RouteRegistry) -> (PreloadScheduler, Arc<ManualPort>) {
        let port = Arc::new(ManualPort::new());
        let config = SchedulerConfig::default().with_preload_critical_on_start(false);
        let scheduler = PreloadScheduler::builder()
            .with_registry(registry)
            .with_config(config)
            .build(port.clone());
        (scheduler, port)
    }

    fn register_all(scheduler: &PreloadScheduler) {
        let routes: Vec<RouteId> = scheduler.registry().routes().cloned().collect();
        for route in routes {
            scheduler.lazy(route, || async { Ok::<_, ImportError>(()) }).unwrap();
        }
    }

    #[test]
    fn test_idle_queue_drains_by_priority() {
        let registry = RouteRegistry::new()
            .with_route("/low", idle_route(Priority::Low))
            .with_route("/critical-1", idle_route(Priority::Critical))
            .with_route("/medium", idle_route(Priority::Medium))
            .with_route("/critical-2", idle_route(Priority::Critical));
        let (scheduler, port) = scheduler(registry);
        register_all(&scheduler);

        scheduler.preload_all_routes();
        assert_eq!(scheduler.service_status().queue_length, 4);
        scheduler.start();

        let mut order = Vec::new();
        for _ in 0..4 {
            port.run_idle();
            let loaded = scheduler.preloaded_routes();
            let newly = loaded
                .into_iter()
                .find(|r| !order.contains(r))
                .unwrap();
            order.push(newly);
        }
        let order: Vec<&str> = order.iter().map(RouteId::as_str).collect();
        assert_eq!(order, vec!["/critical-1", "/critical-2", "/medium", "/low"]);
    }

    #[test]
    fn test_idle_budget() {
        let registry = (0..5).fold(RouteRegistry::new(), |r, i| {
            r.with_route(format!("/r{}", i), idle_route(Priority::Medium))
        });
        let port = Arc::new(ManualPort::new());
        let scheduler = PreloadScheduler::builder()
            .with_registry(registry)
            .with_config(SchedulerConfig::default().with_idle_budget(2))
            .build(port.clone());
        register_all(&scheduler);
        scheduler.preload_all_routes();
        scheduler.start();

        port.run_idle();
        assert_eq!(scheduler.service_status().queue_length, 3);
        assert_eq!(scheduler.preloaded_routes().len(), 2);
        assert_eq!(scheduler.activity(), Activity::Active);
    }

    #[test]
    fn test_queue_waits_for_idle_window() {
        let registry = RouteRegistry::new().with_route("/pos", idle_route(Priority::High));
        let (scheduler, port) = scheduler(registry);
        register_all(&scheduler);

        scheduler.preload_route("/pos");
        assert_eq!(scheduler.route_state("/pos"), RouteState::Queued(TriggerKind::Idle));
        port.run_until_stalled();
        assert_eq!(scheduler.route_state("/pos"), RouteState::Queued(TriggerKind::Idle));

        // Re-arming does not queue twice
        scheduler.preload_route("/pos");
        assert_eq!(scheduler.service_status().queue_length, 1);
        assert_eq!(scheduler.pending_routes(), vec![RouteId::from("/pos")]);

        scheduler.start();
        port.run_idle();
        assert_eq!(scheduler.route_state("/pos"), RouteState::Loaded);
        assert!(scheduler.pending_routes().is_empty());
    }

    #[test]
    fn test_unregistered_module_stays_idle() {
        let registry = RouteRegistry::new()
            .with_route("/dashboard", PreloadConfig::new(Priority::Critical, TriggerKind::Immediate));
        let (scheduler, _port) = scheduler(registry);

        scheduler.preload_critical_routes();
        assert_eq!(scheduler.route_state("/dashboard"), RouteState::Idle);
        assert_eq!(scheduler.preload_status()[&RouteId::from("/dashboard")], false);
    }

    #[test]
    fn test_unknown_route_ignored() {
        let (scheduler, port) = scheduler(RouteRegistry::new());
        scheduler.preload_route("/nowhere");
        port.run_until_stalled();
        assert_eq!(scheduler.route_state("/nowhere"), RouteState::Idle);
        assert_eq!(port.spawned(), 0);
    }

    #[test]
    fn test_start_is_idempotent() {
        let (scheduler, port) = scheduler(RouteRegistry::erp_defaults());
        scheduler.start();
        scheduler.start();
        assert_eq!(port.pending_idle(), 1);
    }

    #[test]
    fn test_idle_loop_ends_with_scheduler() {
        let (scheduler, port) = scheduler(RouteRegistry::new());
        scheduler.start();
        assert_eq!(port.run_idle(), 1);
        assert_eq!(port.pending_idle(), 1);

        drop(scheduler);
        port.run_idle();
        assert_eq!(port.pending_idle(), 0);
    }

    #[test]
    fn test_critical_preload_on_start() {
        let port = Arc::new(ManualPort::new());
        port.set_navigation_timing(Duration::from_millis(840));
        let scheduler = PreloadScheduler::new(
            port.clone(),
            RouteRegistry::erp_defaults(),
            RouteFlow::erp_defaults(),
        );
        register_all(&scheduler);

        scheduler.start();
        assert_eq!(scheduler.route_state("/dashboard"), RouteState::Loading);
        port.run_until_stalled();
        assert_eq!(scheduler.route_state("/dashboard"), RouteState::Loaded);
    }

    #[test]
    fn test_cascade_on_promotion() {
        let registry = RouteRegistry::new()
            .with_route("/dashboard", idle_route(Priority::Critical))
            .with_route(
                "/pos",
                PreloadConfig::new(Priority::High, TriggerKind::Immediate).with_dependency("/dashboard"),
            );
        let port = Arc::new(ManualPort::new());
        let scheduler = PreloadScheduler::builder()
            .with_registry(registry)
            .with_config(SchedulerConfig::default().with_cascade_dependencies(true))
            .build(port.clone());
        register_all(&scheduler);

        scheduler.preload_route("/pos");
        assert_eq!(scheduler.route_state("/dashboard"), RouteState::Loading);
        port.run_until_stalled();
        assert_eq!(scheduler.preloaded_routes().len(), 2);
    }

    #[test]
    fn test_second_registration_rejected() {
        let registry = RouteRegistry::new()
            .with_route("/dashboard", PreloadConfig::new(Priority::Critical, TriggerKind::Immediate));
        let (scheduler, port) = scheduler(registry);
        let first = scheduler
            .lazy("/dashboard", || async { Ok::<_, ImportError>(1u8) })
            .unwrap();
        scheduler.preload_route("/dashboard");
        port.run_until_stalled();
        assert!(scheduler.preload_status()[&RouteId::from("/dashboard")]);

        let err = scheduler
            .lazy("/dashboard", || async { Ok::<_, ImportError>(2u8) })
            .unwrap_err();
        assert!(matches!(err, PreloadError::AlreadyRegistered(ref r) if r.as_str() == "/dashboard"));
        assert!(scheduler.preload_status()[&RouteId::from("/dashboard")]);

        scheduler.preload_route("/dashboard");
        port.run_until_stalled();
        assert_eq!(first.import_count(), 1);
        assert_eq!(scheduler.metrics().len(), 1);
    }

    #[test]
    fn test_started_routes_cost_no_idle_budget() {
        let registry = RouteRegistry::new()
            .with_route(
                "/dashboard",
                PreloadConfig::new(Priority::Critical, TriggerKind::Immediate).with_dependency("/pos"),
            )
            .with_route("/pos", idle_route(Priority::High))
            .with_route("/crm", idle_route(Priority::Medium))
            .with_route("/reports", idle_route(Priority::Low));
        let (scheduler, port) = scheduler(registry);
        for route in ["/dashboard", "/pos", "/reports"] {
            scheduler.lazy(route, || async { Ok::<_, ImportError>(()) }).unwrap();
        }
        let crm = scheduler.lazy("/crm", || async { Ok::<_, ImportError>(()) }).unwrap();

        for route in ["/pos", "/crm", "/reports"] {
            scheduler.preload_route(route);
        }
        assert_eq!(scheduler.service_status().queue_length, 3);

        // Promotion drops the queued job
        scheduler.preload_dependencies("/dashboard");
        assert_eq!(scheduler.route_state("/pos"), RouteState::Loading);
        assert_eq!(scheduler.service_status().queue_length, 2);

        // Navigation starts /crm behind the scheduler's back
        let _navigation = crm.preload();
        assert_eq!(scheduler.route_state("/crm"), RouteState::Loading);

        scheduler.start();
        port.run_idle();
        assert_eq!(scheduler.service_status().queue_length, 0);
        assert!(matches!(
            scheduler.route_state("/reports"),
            RouteState::Loading | RouteState::Loaded
        ));
        assert_eq!(scheduler.pending_routes(), Vec::<RouteId>::new());
    }

    #[tokio::test]
    async fn test_artifact_path_read_by_default() {
        let path = std::env::temp_dir().join(format!("routewarm-default-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"totalSize":900,"chunkCount":4,"largestChunks":[]}"#).unwrap();

        let port = Arc::new(ManualPort::new());
        let scheduler = PreloadScheduler::builder()
            .with_registry(RouteRegistry::erp_defaults())
            .with_config(SchedulerConfig::default().with_artifact_path(path.display().to_string()))
            .build(port);
        let analysis = scheduler.analyze().await;
        let _ = std::fs::remove_file(&path);

        assert_eq!(analysis.total_size, 900.0);
        assert_eq!(analysis.chunk_count, 4);
        assert_eq!(scheduler.bundle_analysis(), Some(analysis));
    }

    #[test]
    fn test_service_status() {
        let (scheduler, port) = scheduler(RouteRegistry::erp_defaults());
        register_all(&scheduler);
        scheduler.preload_route("/dashboard");
        port.run_until_stalled();

        let status = scheduler.service_status();
        assert_eq!(status.preloaded_count, 1);
        assert_eq!(status.metric_count, 1);
        assert!(!status.is_idle);
        assert_eq!(scheduler.performance_report().total_preloaded_routes, 1);
    }
}
