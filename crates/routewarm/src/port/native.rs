//! Host port backed by a tokio runtime

use super::{BoxedFuture, Clock, HostCallback, HostListener, HostPort, ListenerFn, TimerId};
use crate::{PreloadError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

type SharedListener = Arc<ListenerFn>;

/// Host port for native hosts.
///
/// Idle windows are emulated by a fixed cadence; there is no DOM, so hover
/// and intersection triggers are unsupported. Network activity has to be
/// reported by the application through [`TokioPort::notify_network_activity`].
pub struct TokioPort {
    handle: Handle,
    origin: Instant,
    idle_interval: Duration,
    timers: Arc<DashMap<u64, AbortHandle>>,
    next_timer: AtomicU64,
    network: Mutex<Vec<SharedListener>>,
}

impl TokioPort {
    /// Create a port on the current runtime
    pub fn new(idle_interval: Duration) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| PreloadError::Config(format!("No tokio runtime: {}", e)))?;
        Ok(Self::with_handle(handle, idle_interval))
    }

    /// Create a port on an explicit runtime
    pub fn with_handle(handle: Handle, idle_interval: Duration) -> Self {
        Self {
            handle,
            origin: Instant::now(),
            idle_interval,
            timers: Arc::new(DashMap::new()),
            next_timer: AtomicU64::new(0),
            network: Mutex::new(Vec::new()),
        }
    }

    /// Report an outgoing network request
    pub fn notify_network_activity(&self) {
        let listeners = self.network.lock().clone();
        for listener in listeners {
            listener();
        }
    }

    /// Timers not yet fired or cleared
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }
}

impl Clock for TokioPort {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl HostPort for TokioPort {
    fn spawn(&self, task: BoxedFuture<()>) {
        self.handle.spawn(task);
    }

    fn request_idle(&self, callback: HostCallback) -> Result<()> {
        let interval = self.idle_interval;
        self.handle.spawn(async move {
            tokio::time::sleep(interval).await;
            tokio::task::yield_now().await;
            callback();
        });
        Ok(())
    }

    fn set_timeout(&self, delay: Duration, callback: HostCallback) -> Result<TimerId> {
        let id = self.next_timer.fetch_add(1, Ordering::Relaxed) + 1;
        let timers = Arc::clone(&self.timers);
        // The task may not touch `timers` until its handle is stored
        let (armed_tx, armed_rx) = oneshot::channel::<()>();
        let task = self.handle.spawn(async move {
            let _ = armed_rx.await;
            tokio::time::sleep(delay).await;
            timers.remove(&id);
            callback();
        });

        self.timers.insert(id, task.abort_handle());
        let _ = armed_tx.send(());
        Ok(TimerId(id))
    }

    fn clear_timeout(&self, timer: TimerId) {
        if let Some((_, task)) = self.timers.remove(&timer.0) {
            debug!(timer = timer.0, "Clearing timer");
            task.abort();
        }
    }

    fn on_network_activity(&self, listener: HostListener) -> Result<()> {
        self.network.lock().push(Arc::from(listener));
        Ok(())
    }
}
