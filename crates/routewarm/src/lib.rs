//! Adaptive Route Preloading
//!
//! Fetch deferred UI modules before the user navigates to them, driven by
//! per-route triggers, a priority queue drained in idle windows, and a small
//! table of likely next routes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      PreloadScheduler                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  RouteRegistry ──▶ trigger ──┬─ immediate ──────────────┐       │
//! │  RouteFlow                   ├─ idle ──▶ PreloadQueue ──┤       │
//! │                              ├─ hover ─────────────────┤       │
//! │                              ├─ intersection ──────────┤       │
//! │                              └─ network-idle ──────────┤       │
//! │                                                        ▼       │
//! │                                            LazyModule (once)   │
//! │                                                        │       │
//! │                                     MetricsCollector ◀─┘       │
//! │                                                                 │
//! │  BundleAnalyzer: artifact or registry estimate + suggestions    │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 │ HostPort
//!            ┌────────────────────┼────────────────────┐
//!            ▼                    ▼                    ▼
//!       BrowserPort           TokioPort            ManualPort
//!        (wasm32)             (native)             (testing)
//! ```
//!
//! # Triggers
//!
//! | Trigger | Fires when | Re-arming |
//! |---------|------------|-----------|
//! | immediate | `preload_route` is called | no-op |
//! | idle | the route reaches the queue head in an idle window | not queued twice |
//! | hover | the pointer enters a `data-route` element | new elements only |
//! | intersection | a `data-route` element becomes visible | new elements only |
//! | network-idle | no request for the debounce period | joins the pending set |

mod bundle;
mod config;
mod error;
mod loader;
mod metrics;
pub mod port;
mod queue;
mod registry;
mod scheduler;

pub use bundle::{
    artifact_source, suggest, ArtifactSource, BundleAnalysis, BundleAnalyzer, ChunkSummary, Suggestion,
};
#[cfg(not(target_arch = "wasm32"))]
pub use bundle::FileArtifact;
#[cfg(all(feature = "http", not(target_arch = "wasm32")))]
pub use bundle::HttpArtifact;
pub use config::{PreloadConfig, Priority, RouteId, SchedulerConfig, SuggestionThresholds, TriggerKind};
pub use error::{ImportError, PreloadError, Result};
pub use loader::{
    ImportFuture, Importer, LazyModule, LoadOrigin, LoadPhase, LoadState, Preloadable, Telemetry,
};
pub use metrics::{MetricsCollector, PerformanceMetric, PerformanceReport};
pub use port::{Clock, ElementId, HostPort, MaybeSend, MaybeSync};
pub use queue::{PreloadJob, PreloadQueue, QueueItem};
pub use registry::{RouteFlow, RouteRegistry};
pub use scheduler::{Activity, PreloadScheduler, RouteState, SchedulerBuilder, ServiceStatus};

/// Default artifact location
pub const DEFAULT_ARTIFACT_PATH: &str = "/bundle-analysis.json";

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        ImportError, LazyModule, PreloadConfig, PreloadScheduler, Priority, Result, RouteId,
        RouteRegistry, SchedulerConfig, TriggerKind,
    };
}
