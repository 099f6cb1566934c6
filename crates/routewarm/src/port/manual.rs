//! Deterministic host port for tests
//!
//! Nothing happens on its own: time advances only through [`ManualPort::advance`],
//! idle windows open only through [`ManualPort::run_idle`], and DOM events are
//! injected with [`ManualPort::hover`] and [`ManualPort::set_visibility`].
//! Spawned tasks are polled after every injected event.

use super::{
    BoxedFuture, Clock, ElementId, HostCallback, HostListener, HostPort, ListenerFn, TimerId,
    VisibilityFn, VisibilityListener,
};
use crate::{PreloadError, Result, RouteId};
use futures::task::noop_waker;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::task::Context;
use std::time::Duration;

/// Epoch offset used for `timestamp_ms`
const EPOCH_MS: u64 = 1_700_000_000_000;

type SharedListener = Arc<ListenerFn>;
type SharedVisibilityListener = Arc<VisibilityFn>;

struct Observer {
    threshold: f64,
    elements: HashSet<ElementId>,
    listener: SharedVisibilityListener,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    idle: Vec<HostCallback>,
    timers: BTreeMap<(Duration, u64), HostCallback>,
    next_timer: u64,
    tasks: Vec<BoxedFuture<()>>,
    spawned: usize,
    network: Vec<SharedListener>,
    elements: Vec<(ElementId, RouteId)>,
    hover: HashMap<ElementId, Vec<SharedListener>>,
    observers: Vec<Observer>,
    navigation_timing: Option<Duration>,
}

/// Host port whose clock, idle windows and DOM are driven by the caller
pub struct ManualPort {
    state: Mutex<ManualState>,
    idle_supported: bool,
    dom_supported: bool,
}

impl ManualPort {
    /// Create a port with every capability available
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManualState::default()),
            idle_supported: true,
            dom_supported: true,
        }
    }

    /// Port without idle callbacks
    pub fn without_idle() -> Self {
        Self {
            idle_supported: false,
            ..Self::new()
        }
    }

    /// Port without DOM access (hover and intersection never fire)
    pub fn without_dom() -> Self {
        Self {
            dom_supported: false,
            ..Self::new()
        }
    }

    /// Report a page load duration
    pub fn set_navigation_timing(&self, timing: Duration) {
        self.state.lock().navigation_timing = Some(timing);
    }

    /// Render an element tagged with `data-route="<route>"`
    pub fn add_element(&self, route: impl Into<RouteId>) -> ElementId {
        let mut state = self.state.lock();
        let id = ElementId(state.elements.len() as u64 + 1);
        state.elements.push((id, route.into()));
        id
    }

    /// Move the pointer onto an element
    pub fn hover(&self, element: ElementId) {
        let listeners = self
            .state
            .lock()
            .hover
            .get(&element)
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            listener();
        }
        self.run_until_stalled();
    }

    /// Change the visible fraction of an element
    pub fn set_visibility(&self, element: ElementId, ratio: f64) {
        let fired: Vec<SharedVisibilityListener> = {
            let mut state = self.state.lock();
            state
                .observers
                .iter_mut()
                .filter_map(|observer| {
                    (ratio >= observer.threshold && observer.elements.remove(&element))
                        .then(|| observer.listener.clone())
                })
                .collect()
        };
        for listener in fired {
            listener(element);
        }
        self.run_until_stalled();
    }

    /// Simulate an outgoing network request
    pub fn network_request(&self) {
        let listeners = self.state.lock().network.clone();
        for listener in listeners {
            listener();
        }
        self.run_until_stalled();
    }

    /// Open one idle window, firing every callback registered before it
    /// opened. Returns the number of callbacks fired.
    pub fn run_idle(&self) -> usize {
        let callbacks = std::mem::take(&mut self.state.lock().idle);
        let fired = callbacks.len();
        for callback in callbacks {
            callback();
        }
        self.run_until_stalled();
        fired
    }

    /// Advance the clock, firing due timers in deadline order
    pub fn advance(&self, by: Duration) {
        let target = self.state.lock().now + by;
        loop {
            let due = {
                let mut state = self.state.lock();
                let next = state
                    .timers
                    .keys()
                    .next()
                    .copied()
                    .filter(|(deadline, _)| *deadline <= target);
                match next {
                    Some(key) => {
                        state.now = key.0;
                        state.timers.remove(&key)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            match due {
                Some(callback) => {
                    callback();
                    self.run_until_stalled();
                }
                None => break,
            }
        }
        self.run_until_stalled();
    }

    /// Poll spawned tasks until none of them makes progress
    pub fn run_until_stalled(&self) {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        loop {
            let mut tasks = std::mem::take(&mut self.state.lock().tasks);
            if tasks.is_empty() {
                return;
            }
            let before = tasks.len();
            tasks.retain_mut(|task| task.as_mut().poll(&mut cx).is_pending());
            let progressed = tasks.len() < before;

            let mut state = self.state.lock();
            let spawned_more = !state.tasks.is_empty();
            tasks.append(&mut state.tasks);
            state.tasks = tasks;
            if !progressed && !spawned_more {
                return;
            }
        }
    }

    /// Idle callbacks waiting for the next window
    pub fn pending_idle(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Timers not yet fired or cleared
    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }

    /// Spawned tasks still pending
    pub fn pending_tasks(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Total number of spawned tasks
    pub fn spawned(&self) -> usize {
        self.state.lock().spawned
    }

    /// Hover listeners attached to an element
    pub fn hover_listeners(&self, element: ElementId) -> usize {
        self.state.lock().hover.get(&element).map_or(0, Vec::len)
    }

    /// Check if any observer still watches an element
    pub fn is_observed(&self, element: ElementId) -> bool {
        self.state
            .lock()
            .observers
            .iter()
            .any(|observer| observer.elements.contains(&element))
    }
}

impl Default for ManualPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualPort {
    fn now(&self) -> Duration {
        self.state.lock().now
    }

    fn timestamp_ms(&self) -> u64 {
        EPOCH_MS + self.now().as_millis() as u64
    }
}

impl HostPort for ManualPort {
    fn spawn(&self, task: BoxedFuture<()>) {
        let mut state = self.state.lock();
        state.spawned += 1;
        state.tasks.push(task);
    }

    fn request_idle(&self, callback: HostCallback) -> Result<()> {
        if !self.idle_supported {
            return Err(PreloadError::Unsupported("idle callbacks"));
        }
        self.state.lock().idle.push(callback);
        Ok(())
    }

    fn set_timeout(&self, delay: Duration, callback: HostCallback) -> Result<TimerId> {
        let mut state = self.state.lock();
        state.next_timer += 1;
        let id = state.next_timer;
        let deadline = state.now + delay;
        state.timers.insert((deadline, id), callback);
        Ok(TimerId(id))
    }

    fn clear_timeout(&self, timer: TimerId) {
        let mut state = self.state.lock();
        let key = state.timers.keys().find(|(_, id)| *id == timer.0).copied();
        if let Some(key) = key {
            state.timers.remove(&key);
        }
    }

    fn on_network_activity(&self, listener: HostListener) -> Result<()> {
        self.state.lock().network.push(Arc::from(listener));
        Ok(())
    }

    fn elements_for_route(&self, route: &str) -> Result<Vec<ElementId>> {
        if !self.dom_supported {
            return Err(PreloadError::Unsupported("DOM queries"));
        }
        Ok(self
            .state
            .lock()
            .elements
            .iter()
            .filter(|(_, r)| r.as_str() == route)
            .map(|(id, _)| *id)
            .collect())
    }

    fn on_pointer_enter(&self, element: ElementId, listener: HostListener) -> Result<()> {
        if !self.dom_supported {
            return Err(PreloadError::Unsupported("pointer events"));
        }
        self.state
            .lock()
            .hover
            .entry(element)
            .or_default()
            .push(Arc::from(listener));
        Ok(())
    }

    fn observe_intersection_once(
        &self,
        elements: &[ElementId],
        threshold: f64,
        listener: VisibilityListener,
    ) -> Result<()> {
        if !self.dom_supported {
            return Err(PreloadError::Unsupported("intersection observer"));
        }
        self.state.lock().observers.push(Observer {
            threshold,
            elements: elements.iter().copied().collect(),
            listener: Arc::from(listener),
        });
        Ok(())
    }

    fn navigation_timing(&self) -> Option<Duration> {
        self.state.lock().navigation_timing
    }
}
