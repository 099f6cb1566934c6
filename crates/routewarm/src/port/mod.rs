//! Host capabilities used by the scheduler
//!
//! The scheduler never touches browser or runtime primitives directly. It
//! talks to a [`HostPort`], which adapters implement per host:
//!
//! - [`BrowserPort`]: `requestIdleCallback`, `setTimeout`, DOM listeners,
//!   `IntersectionObserver` and resource timing (wasm32 only)
//! - [`TokioPort`]: timers and spawning on a tokio runtime, no DOM
//! - [`ManualPort`]: deterministic fake driven by tests (`testing` feature)
//!
//! A capability an adapter cannot provide returns
//! [`PreloadError::Unsupported`](crate::PreloadError::Unsupported); the
//! scheduler logs it and the corresponding trigger simply never fires.

#[cfg(target_arch = "wasm32")]
mod browser;
#[cfg(any(test, feature = "testing"))]
mod manual;
#[cfg(not(target_arch = "wasm32"))]
mod native;

#[cfg(target_arch = "wasm32")]
pub use browser::BrowserPort;
#[cfg(any(test, feature = "testing"))]
pub use manual::ManualPort;
#[cfg(not(target_arch = "wasm32"))]
pub use native::TokioPort;

use crate::{PreloadError, Result};
use std::fmt;
use std::time::Duration;

pub use bounds::{BoxedFuture, CallbackFn, ListenerFn, MaybeSend, MaybeSync, VisibilityFn};

/// Thread-safety bounds per host.
///
/// Native hosts run on a multi-threaded runtime, so futures and callbacks
/// must be `Send`. The browser is single-threaded and JS promises are not,
/// so the same names drop the bound on wasm32.
#[cfg(not(target_arch = "wasm32"))]
mod bounds {
    use super::ElementId;

    /// `Send` on native hosts
    pub trait MaybeSend: Send {}
    impl<T: Send + ?Sized> MaybeSend for T {}

    /// `Sync` on native hosts
    pub trait MaybeSync: Sync {}
    impl<T: Sync + ?Sized> MaybeSync for T {}

    /// Boxed `'static` future the host can drive
    pub type BoxedFuture<T> = futures::future::BoxFuture<'static, T>;

    pub type CallbackFn = dyn FnOnce() + Send + 'static;
    pub type ListenerFn = dyn Fn() + Send + Sync + 'static;
    pub type VisibilityFn = dyn Fn(ElementId) + Send + Sync + 'static;
}

#[cfg(target_arch = "wasm32")]
mod bounds {
    use super::ElementId;

    /// No bound in the browser
    pub trait MaybeSend {}
    impl<T: ?Sized> MaybeSend for T {}

    /// No bound in the browser
    pub trait MaybeSync {}
    impl<T: ?Sized> MaybeSync for T {}

    /// Boxed `'static` future the host can drive
    pub type BoxedFuture<T> = futures::future::LocalBoxFuture<'static, T>;

    pub type CallbackFn = dyn FnOnce() + 'static;
    pub type ListenerFn = dyn Fn() + 'static;
    pub type VisibilityFn = dyn Fn(ElementId) + 'static;
}

/// Callback fired once by the host
pub type HostCallback = Box<CallbackFn>;

/// Callback the host may fire repeatedly
pub type HostListener = Box<ListenerFn>;

/// Callback receiving the element that became visible
pub type VisibilityListener = Box<VisibilityFn>;

/// Opaque handle to a DOM element tagged with `data-route`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element#{}", self.0)
    }
}

/// Handle of a pending timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Monotonic and wall-clock time source
pub trait Clock: MaybeSend + MaybeSync {
    /// Monotonic time since the clock's origin
    fn now(&self) -> Duration;

    /// Wall-clock milliseconds since the Unix epoch
    fn timestamp_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Host services the scheduler depends on
pub trait HostPort: Clock {
    /// Drive a future to completion in the background
    fn spawn(&self, task: BoxedFuture<()>);

    /// Run `callback` in the next idle window
    fn request_idle(&self, callback: HostCallback) -> Result<()>;

    /// Run `callback` after `delay`
    fn set_timeout(&self, delay: Duration, callback: HostCallback) -> Result<TimerId>;

    /// Cancel a pending timer (unknown or fired timers are ignored)
    fn clear_timeout(&self, timer: TimerId);

    /// Call `listener` for every outgoing network request
    fn on_network_activity(&self, _listener: HostListener) -> Result<()> {
        Err(PreloadError::Unsupported("network activity"))
    }

    /// Elements carrying `data-route="<route>"`
    fn elements_for_route(&self, _route: &str) -> Result<Vec<ElementId>> {
        Err(PreloadError::Unsupported("DOM queries"))
    }

    /// Call `listener` whenever the pointer enters `element`
    fn on_pointer_enter(&self, _element: ElementId, _listener: HostListener) -> Result<()> {
        Err(PreloadError::Unsupported("pointer events"))
    }

    /// Call `listener` once per element when its visible fraction reaches
    /// `threshold`; the element is unobserved afterwards
    fn observe_intersection_once(
        &self,
        _elements: &[ElementId],
        _threshold: f64,
        _listener: VisibilityListener,
    ) -> Result<()> {
        Err(PreloadError::Unsupported("intersection observer"))
    }

    /// Page load duration reported by the host, if known
    fn navigation_timing(&self) -> Option<Duration> {
        None
    }
}
