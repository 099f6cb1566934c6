//! Host port for the browser main thread

use super::{
    BoxedFuture, Clock, ElementId, HostCallback, HostListener, HostPort, TimerId,
    VisibilityListener,
};
use crate::{PreloadError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    Element, IntersectionObserver, IntersectionObserverEntry, IntersectionObserverInit,
    PerformanceObserver, PerformanceObserverInit, Window,
};

/// Attribute used to give tagged elements a stable handle
const ID_ATTR: &str = "data-preload-id";

/// Host port using `requestIdleCallback`, timers, DOM listeners,
/// `IntersectionObserver` and resource timing.
///
/// The port keeps no JS objects itself: elements are addressed through a
/// `data-preload-id` attribute assigned on first lookup.
#[derive(Debug, Default)]
pub struct BrowserPort {
    next_element: AtomicU64,
}

impl BrowserPort {
    /// Create a new browser port
    pub fn new() -> Self {
        Self::default()
    }

    fn element(&self, id: ElementId) -> Result<Element> {
        let document = window()?
            .document()
            .ok_or(PreloadError::Unsupported("document"))?;
        document
            .query_selector(&format!("[{}=\"{}\"]", ID_ATTR, id.0))
            .ok()
            .flatten()
            .ok_or(PreloadError::Unsupported("element lookup"))
    }

    fn element_id(&self, element: &Element) -> ElementId {
        if let Some(id) = element.get_attribute(ID_ATTR).and_then(|v| v.parse().ok()) {
            return ElementId(id);
        }
        let id = self.next_element.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = element.set_attribute(ID_ATTR, &id.to_string());
        ElementId(id)
    }
}

fn window() -> Result<Window> {
    web_sys::window().ok_or(PreloadError::Unsupported("window"))
}

fn has_property(target: &JsValue, name: &str) -> bool {
    js_sys::Reflect::has(target, &JsValue::from_str(name)).unwrap_or(false)
}

impl Clock for BrowserPort {
    fn now(&self) -> Duration {
        let ms = web_sys::window()
            .and_then(|w| w.performance())
            .map(|p| p.now())
            .unwrap_or(0.0);
        Duration::from_secs_f64(ms.max(0.0) / 1000.0)
    }

    fn timestamp_ms(&self) -> u64 {
        js_sys::Date::now() as u64
    }
}

impl HostPort for BrowserPort {
    fn spawn(&self, task: BoxedFuture<()>) {
        wasm_bindgen_futures::spawn_local(task);
    }

    fn request_idle(&self, callback: HostCallback) -> Result<()> {
        let window = window()?;
        if !has_property(&window, "requestIdleCallback") {
            return Err(PreloadError::Unsupported("requestIdleCallback"));
        }
        let callback = Closure::once_into_js(move || callback());
        window
            .request_idle_callback(callback.unchecked_ref())
            .map(|_| ())
            .map_err(|_| PreloadError::Unsupported("requestIdleCallback"))
    }

    fn set_timeout(&self, delay: Duration, callback: HostCallback) -> Result<TimerId> {
        let callback = Closure::once_into_js(move || callback());
        let handle = window()?
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                callback.unchecked_ref(),
                delay.as_millis().min(i32::MAX as u128) as i32,
            )
            .map_err(|_| PreloadError::Unsupported("setTimeout"))?;
        Ok(TimerId(handle as u64))
    }

    fn clear_timeout(&self, timer: TimerId) {
        if let Ok(window) = window() {
            window.clear_timeout_with_handle(timer.0 as i32);
        }
    }

    fn on_network_activity(&self, listener: HostListener) -> Result<()> {
        let callback = Closure::<dyn FnMut(JsValue, JsValue)>::new(move |_entries, _observer| {
            listener();
        });
        let observer = PerformanceObserver::new(callback.as_ref().unchecked_ref())
            .map_err(|_| PreloadError::Unsupported("PerformanceObserver"))?;

        let init = PerformanceObserverInit::new();
        init.set_entry_types(&js_sys::Array::of1(&JsValue::from_str("resource")));
        observer.observe(&init);

        callback.forget();
        Ok(())
    }

    fn elements_for_route(&self, route: &str) -> Result<Vec<ElementId>> {
        let document = window()?
            .document()
            .ok_or(PreloadError::Unsupported("document"))?;
        let nodes = document
            .query_selector_all(&format!("[data-route=\"{}\"]", route))
            .map_err(|_| PreloadError::Unsupported("querySelectorAll"))?;

        let mut elements = Vec::with_capacity(nodes.length() as usize);
        for i in 0..nodes.length() {
            if let Some(element) = nodes.get(i).and_then(|n| n.dyn_into::<Element>().ok()) {
                elements.push(self.element_id(&element));
            }
        }
        Ok(elements)
    }

    fn on_pointer_enter(&self, element: ElementId, listener: HostListener) -> Result<()> {
        let target = self.element(element)?;
        let callback = Closure::<dyn Fn()>::new(move || listener());
        target
            .add_event_listener_with_callback("mouseenter", callback.as_ref().unchecked_ref())
            .map_err(|_| PreloadError::Unsupported("addEventListener"))?;
        callback.forget();
        Ok(())
    }

    fn observe_intersection_once(
        &self,
        elements: &[ElementId],
        threshold: f64,
        listener: VisibilityListener,
    ) -> Result<()> {
        let window = window()?;
        if !has_property(&window, "IntersectionObserver") {
            return Err(PreloadError::Unsupported("IntersectionObserver"));
        }

        let callback = Closure::<dyn FnMut(js_sys::Array, IntersectionObserver)>::new(
            move |entries: js_sys::Array, observer: IntersectionObserver| {
                for entry in entries.iter() {
                    let Ok(entry) = entry.dyn_into::<IntersectionObserverEntry>() else {
                        continue;
                    };
                    if !entry.is_intersecting() || entry.intersection_ratio() < threshold {
                        continue;
                    }
                    let target = entry.target();
                    observer.unobserve(&target);
                    if let Some(id) = target.get_attribute(ID_ATTR).and_then(|v| v.parse().ok()) {
                        listener(ElementId(id));
                    }
                }
            },
        );

        let init = IntersectionObserverInit::new();
        init.set_threshold(&JsValue::from_f64(threshold));
        let observer =
            IntersectionObserver::new_with_options(callback.as_ref().unchecked_ref(), &init)
                .map_err(|_| PreloadError::Unsupported("IntersectionObserver"))?;

        for element in elements {
            observer.observe(&self.element(*element)?);
        }
        callback.forget();
        Ok(())
    }

    fn navigation_timing(&self) -> Option<Duration> {
        let performance = web_sys::window()?.performance()?;
        let entry = performance.get_entries_by_type("navigation").get(0);
        if entry.is_undefined() {
            return None;
        }
        let field = |name: &str| {
            js_sys::Reflect::get(&entry, &JsValue::from_str(name))
                .ok()
                .and_then(|v| v.as_f64())
        };
        let elapsed = field("loadEventEnd")? - field("loadEventStart")?;
        Some(Duration::from_secs_f64(elapsed.max(0.0) / 1000.0))
    }
}
