//! Memoized lazy module loading
//!
//! A [`LazyModule`] wraps a route's import function and guarantees it runs at
//! most once. Every caller, whether a navigation or a preload trigger, joins
//! the same shared import. The outcome is cached for the lifetime of the
//! module, including failures.
//!
//! ```text
//!   NotRequested ──load()/preload()──▶ InFlight ──ok──▶ Resolved
//!                                         │
//!                                         └──err──▶ Failed
//! ```

use crate::metrics::{MetricsCollector, PerformanceMetric};
use crate::port::{BoxedFuture, Clock, MaybeSend, MaybeSync};
use crate::{ImportError, PreloadError, Result, RouteId};
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// Future returned by an import function.
///
/// Not `Send` on wasm32, where imports are JS promises.
pub type ImportFuture<M> = BoxedFuture<std::result::Result<M, ImportError>>;

/// Import function for one route
#[cfg(not(target_arch = "wasm32"))]
pub type Importer<M> = Arc<dyn Fn() -> ImportFuture<M> + Send + Sync>;

/// Import function for one route
#[cfg(target_arch = "wasm32")]
pub type Importer<M> = Arc<dyn Fn() -> ImportFuture<M>>;

type SharedImport<M> = Shared<ImportFuture<M>>;

/// Load state of a module
pub enum LoadState<M> {
    /// Nobody asked for the module yet
    NotRequested,
    /// Import running; callers await the shared future
    InFlight(SharedImport<M>),
    /// Module available
    Resolved(M),
    /// Import rejected; never retried
    Failed(ImportError),
}

impl<M> LoadState<M> {
    /// Phase without the payload
    pub fn phase(&self) -> LoadPhase {
        match self {
            LoadState::NotRequested => LoadPhase::NotRequested,
            LoadState::InFlight(_) => LoadPhase::InFlight,
            LoadState::Resolved(_) => LoadPhase::Resolved,
            LoadState::Failed(_) => LoadPhase::Failed,
        }
    }
}

impl<M> fmt::Debug for LoadState<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
            other => write!(f, "{:?}", other.phase()),
        }
    }
}

/// Payload-free view of [`LoadState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadPhase {
    NotRequested,
    InFlight,
    Resolved,
    Failed,
}

/// Who started an import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    /// The application needed the module to render
    Navigation,
    /// A preload trigger fired
    Preload,
}

/// Where load samples go
#[derive(Clone)]
pub struct Telemetry {
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
}

impl Telemetry {
    /// Create a new telemetry sink
    pub fn new(clock: Arc<dyn Clock>, metrics: Arc<MetricsCollector>) -> Self {
        Self { clock, metrics }
    }

    /// Collector receiving the samples
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("samples", &self.metrics.len())
            .finish()
    }
}

struct Inner<M> {
    route: RouteId,
    importer: Importer<M>,
    size_kb: AtomicU32,
    telemetry: Mutex<Option<Telemetry>>,
    state: Mutex<LoadState<M>>,
    imports: AtomicUsize,
    cache_hit_recorded: AtomicBool,
}

impl<M: Clone + MaybeSend + MaybeSync + 'static> Inner<M> {
    /// Start the import. Must be called with the state lock held so two
    /// callers cannot both see `NotRequested`.
    fn begin(self: &Arc<Self>, origin: LoadOrigin) -> SharedImport<M> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        debug!(route = %self.route, ?origin, "Starting route import");

        let telemetry = self.telemetry.lock().clone();
        let started = telemetry.as_ref().map(|t| t.clock.now());
        let import = (self.importer)();
        let weak = Arc::downgrade(self);

        let settled: ImportFuture<M> = Box::pin(async move {
            let result = import.await;
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.settle(&result, telemetry, started, origin);
            }
            result
        });
        settled.shared()
    }

    fn settle(
        &self,
        result: &std::result::Result<M, ImportError>,
        telemetry: Option<Telemetry>,
        started: Option<Duration>,
        origin: LoadOrigin,
    ) {
        match result {
            Ok(module) => {
                *self.state.lock() = LoadState::Resolved(module.clone());
                debug!(route = %self.route, "Route module resolved");

                if let (Some(telemetry), Some(started)) = (telemetry, started) {
                    let load_time = telemetry.clock.now().saturating_sub(started);
                    let mut metric = PerformanceMetric::new(self.route.clone(), load_time)
                        .with_bundle_size_kb(self.size_kb.load(Ordering::Relaxed))
                        .with_timestamp_ms(telemetry.clock.timestamp_ms());
                    if origin == LoadOrigin::Preload {
                        metric = metric.with_preload_time(load_time);
                    }
                    telemetry.metrics.record(metric);
                }
            }
            Err(err) => {
                *self.state.lock() = LoadState::Failed(err.clone());
                warn!(route = %self.route, error = %err, "Route import failed");
            }
        }
    }
}

enum Step<M> {
    Cached(M),
    Pending(SharedImport<M>),
    Failed(ImportError),
}

/// Lazily imported module for one route.
///
/// Cloning is cheap; clones share the same load state.
pub struct LazyModule<M> {
    inner: Arc<Inner<M>>,
}

impl<M> Clone for LazyModule<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> fmt::Debug for LazyModule<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyModule")
            .field("route", &self.inner.route)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

impl<M: Clone + MaybeSend + MaybeSync + 'static> LazyModule<M> {
    /// Create a new lazy module from an import function
    pub fn new<F, Fut>(route: impl Into<RouteId>, import: F) -> Self
    where
        F: Fn() -> Fut + MaybeSend + MaybeSync + 'static,
        Fut: Future<Output = std::result::Result<M, ImportError>> + MaybeSend + 'static,
    {
        let importer: Importer<M> = Arc::new(move || -> ImportFuture<M> { Box::pin(import()) });
        Self::from_importer(route, importer)
    }

    /// Create a new lazy module from a boxed importer
    pub fn from_importer(route: impl Into<RouteId>, importer: Importer<M>) -> Self {
        Self {
            inner: Arc::new(Inner {
                route: route.into(),
                importer,
                size_kb: AtomicU32::new(0),
                telemetry: Mutex::new(None),
                state: Mutex::new(LoadState::NotRequested),
                imports: AtomicUsize::new(0),
                cache_hit_recorded: AtomicBool::new(false),
            }),
        }
    }

    /// Set the chunk size reported in load samples
    pub fn with_estimated_size_kb(self, size_kb: u32) -> Self {
        self.inner.size_kb.store(size_kb, Ordering::Relaxed);
        self
    }

    /// Record load samples into `telemetry`
    pub fn with_telemetry(self, telemetry: Telemetry) -> Self {
        *self.inner.telemetry.lock() = Some(telemetry);
        self
    }

    /// Load the module, starting the import if nobody has yet.
    ///
    /// Served from cache once resolved. A failed import stays failed.
    pub async fn load(&self) -> Result<M> {
        let step = {
            let mut state = self.inner.state.lock();
            match &*state {
                LoadState::Resolved(module) => Step::Cached(module.clone()),
                LoadState::Failed(err) => Step::Failed(err.clone()),
                LoadState::InFlight(pending) => Step::Pending(pending.clone()),
                LoadState::NotRequested => {
                    let pending = self.inner.begin(LoadOrigin::Navigation);
                    *state = LoadState::InFlight(pending.clone());
                    Step::Pending(pending)
                }
            }
        };

        match step {
            Step::Cached(module) => {
                self.record_cache_hit();
                Ok(module)
            }
            Step::Failed(err) => Err(PreloadError::import(self.inner.route.clone(), err)),
            Step::Pending(pending) => pending
                .await
                .map_err(|err| PreloadError::import(self.inner.route.clone(), err)),
        }
    }

    /// Start or join the import without waiting for the module.
    ///
    /// The import is started before this returns; the future only drives it
    /// to completion and swallows the outcome.
    pub fn preload(&self) -> BoxedFuture<()> {
        let pending = {
            let mut state = self.inner.state.lock();
            match &*state {
                LoadState::Resolved(_) | LoadState::Failed(_) => None,
                LoadState::InFlight(pending) => Some(pending.clone()),
                LoadState::NotRequested => {
                    let pending = self.inner.begin(LoadOrigin::Preload);
                    *state = LoadState::InFlight(pending.clone());
                    Some(pending)
                }
            }
        };

        Box::pin(async move {
            if let Some(pending) = pending {
                let _ = pending.await;
            }
        })
    }

    /// Check if the module resolved
    pub fn is_loaded(&self) -> bool {
        self.phase() == LoadPhase::Resolved
    }

    /// Current load phase
    pub fn phase(&self) -> LoadPhase {
        self.inner.state.lock().phase()
    }

    /// Route this module belongs to
    pub fn route(&self) -> &RouteId {
        &self.inner.route
    }

    /// Number of times the import function was invoked
    pub fn import_count(&self) -> usize {
        self.inner.imports.load(Ordering::SeqCst)
    }

    /// Only the first cache hit per module is sampled; repeated renders
    /// would otherwise flood the buffer with zero-time loads.
    fn record_cache_hit(&self) {
        if self.inner.cache_hit_recorded.swap(true, Ordering::SeqCst) {
            return;
        }
        let telemetry = self.inner.telemetry.lock().clone();
        if let Some(telemetry) = telemetry {
            telemetry.metrics.record(
                PerformanceMetric::new(self.inner.route.clone(), Duration::ZERO)
                    .with_bundle_size_kb(self.inner.size_kb.load(Ordering::Relaxed))
                    .with_cache_hit(true)
                    .with_timestamp_ms(telemetry.clock.timestamp_ms()),
            );
        }
    }
}

/// Type-erased handle the scheduler keeps per route
pub trait Preloadable: MaybeSend + MaybeSync {
    /// Route the module belongs to
    fn route(&self) -> &RouteId;

    /// Current load phase
    fn phase(&self) -> LoadPhase;

    /// Check if the module resolved
    fn is_loaded(&self) -> bool {
        self.phase() == LoadPhase::Resolved
    }

    /// Start or join the import
    fn preload(&self) -> BoxedFuture<()>;

    /// Route samples to `telemetry`, using `size_kb` unless a size was set
    fn attach(&self, telemetry: Telemetry, size_kb: u32);
}

impl<M: Clone + MaybeSend + MaybeSync + 'static> Preloadable for LazyModule<M> {
    fn route(&self) -> &RouteId {
        LazyModule::route(self)
    }

    fn phase(&self) -> LoadPhase {
        LazyModule::phase(self)
    }

    fn preload(&self) -> BoxedFuture<()> {
        LazyModule::preload(self)
    }

    fn attach(&self, telemetry: Telemetry, size_kb: u32) {
        let _ = self
            .inner
            .size_kb
            .compare_exchange(0, size_kb, Ordering::Relaxed, Ordering::Relaxed);
        *self.inner.telemetry.lock() = Some(telemetry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::ManualPort;
    use futures::channel::oneshot;

    type Gate = Arc<Mutex<Option<oneshot::Receiver<&'static str>>>>;

    fn gated(route: &str) -> (LazyModule<&'static str>, oneshot::Sender<&'static str>) {
        let (tx, rx) = oneshot::channel();
        let gate: Gate = Arc::new(Mutex::new(Some(rx)));
        let module = LazyModule::new(route, move || {
            let rx = gate.lock().take();
            async move {
                match rx {
                    Some(rx) => rx.await.map_err(|_| ImportError::new("cancelled")),
                    None => Err(ImportError::new("imported twice")),
                }
            }
        });
        (module, tx)
    }

    fn telemetry() -> (Telemetry, Arc<MetricsCollector>) {
        let metrics = Arc::new(MetricsCollector::default());
        let clock: Arc<dyn Clock> = Arc::new(ManualPort::new());
        (Telemetry::new(clock, metrics.clone()), metrics)
    }

    #[tokio::test]
    async fn test_concurrent_loads_import_once() {
        let module = LazyModule::new("/pos", || async { Ok::<_, ImportError>(7u32) });

        let loads = (0..5).map(|_| module.load());
        let results = futures::future::join_all(loads).await;

        assert!(results.iter().all(|r| matches!(r, Ok(7))));
        assert_eq!(module.import_count(), 1);
        assert!(module.is_loaded());
    }

    #[tokio::test]
    async fn test_loaded_only_after_resolution() {
        let (module, tx) = gated("/crm");
        assert_eq!(module.phase(), LoadPhase::NotRequested);

        let preload = module.preload();
        assert_eq!(module.phase(), LoadPhase::InFlight);
        assert!(!module.is_loaded());

        tx.send("crm").unwrap();
        preload.await;
        assert!(module.is_loaded());
        assert_eq!(module.load().await.unwrap(), "crm");
        assert_eq!(module.import_count(), 1);
    }

    #[tokio::test]
    async fn test_preload_then_load_joins_import() {
        let (module, tx) = gated("/dashboard");
        let preload = module.preload();
        let load = module.load();

        tx.send("dash").unwrap();
        let (_, loaded) = futures::join!(preload, load);
        assert_eq!(loaded.unwrap(), "dash");
        assert_eq!(module.import_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_cached() {
        let module = LazyModule::new("/e-invoicing", || async {
            Err::<u32, _>(ImportError::new("chunk missing"))
        });
        let (telemetry, metrics) = telemetry();
        let module = module.with_telemetry(telemetry);

        let err = module.load().await.unwrap_err();
        assert!(matches!(err, PreloadError::Import { .. }));
        assert_eq!(err.to_string(), "Import failed for /e-invoicing: chunk missing");

        module.preload().await;
        assert!(module.load().await.is_err());
        assert_eq!(module.import_count(), 1);
        assert_eq!(module.phase(), LoadPhase::Failed);
        assert!(metrics.is_empty());
    }

    #[tokio::test]
    async fn test_navigation_metrics() {
        let (telemetry, metrics) = telemetry();
        let module = LazyModule::new("/pos", || async { Ok::<_, ImportError>(1u8) })
            .with_estimated_size_kb(92)
            .with_telemetry(telemetry);

        module.load().await.unwrap();
        let samples = metrics.snapshot();
        assert_eq!(samples.len(), 1);
        assert!(!samples[0].cache_hit);
        assert_eq!(samples[0].preload_time, None);
        assert_eq!(samples[0].bundle_size_kb, 92);

        module.load().await.unwrap();
        let samples = metrics.snapshot();
        assert_eq!(samples.len(), 2);
        assert!(samples[1].cache_hit);
        assert_eq!(samples[1].load_time, Duration::ZERO);

        for _ in 0..10 {
            module.load().await.unwrap();
        }
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics.report().average_load_time, samples[0].load_time / 2);
    }

    #[tokio::test]
    async fn test_preload_metrics() {
        let (telemetry, metrics) = telemetry();
        let module = LazyModule::new("/pos", || async { Ok::<_, ImportError>(1u8) });
        Preloadable::attach(&module, telemetry, 92);

        module.preload().await;
        module.preload().await;

        let samples = metrics.snapshot();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].preload_time, Some(samples[0].load_time));
        assert_eq!(samples[0].bundle_size_kb, 92);
    }

    #[test]
    fn test_attach_keeps_explicit_size() {
        let (telemetry, _) = telemetry();
        let module = LazyModule::new("/crm", || async { Ok::<_, ImportError>(()) })
            .with_estimated_size_kb(10);
        Preloadable::attach(&module, telemetry, 120);
        assert_eq!(module.inner.size_kb.load(Ordering::Relaxed), 10);
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod local_tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_local_import() {
        let module = LazyModule::new("/crm", || async { Ok::<_, ImportError>(Rc::<str>::from("crm")) });
        let loaded = module.load().now_or_never();
        assert!(matches!(loaded, Some(Ok(ref m)) if &**m == "crm"));
        assert!(module.is_loaded());
    }
}
