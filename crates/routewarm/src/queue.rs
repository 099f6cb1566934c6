//! Priority queue for idle-time preloading

use crate::{Priority, RouteId};
use std::fmt;

/// Deferred preload work
pub type PreloadJob = crate::port::HostCallback;

/// A queued preload
pub struct QueueItem {
    /// Route the job loads
    pub route: RouteId,
    /// Queue weight (see `Priority::weight`)
    pub priority: u8,
    job: PreloadJob,
}

impl QueueItem {
    /// Run the job
    pub fn run(self) {
        (self.job)()
    }
}

impl fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueItem")
            .field("route", &self.route)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Queue kept sorted by descending weight.
///
/// Items of equal weight leave in insertion order.
#[derive(Debug, Default)]
pub struct PreloadQueue {
    items: Vec<QueueItem>,
}

impl PreloadQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job and restore the ordering
    pub fn enqueue(&mut self, route: impl Into<RouteId>, priority: Priority, job: PreloadJob) {
        self.items.push(QueueItem {
            route: route.into(),
            priority: priority.weight(),
            job,
        });
        // Stable sort keeps FIFO order among equal weights
        self.items.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Remove the highest-priority item
    pub fn dequeue(&mut self) -> Option<QueueItem> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.remove(0))
        }
    }

    /// Drop every queued job for `route`, returning how many were dropped
    pub fn remove(&mut self, route: &str) -> usize {
        let before = self.items.len();
        self.items.retain(|item| item.route.as_str() != route);
        before - self.items.len()
    }

    /// Check if a route is queued
    pub fn contains(&self, route: &str) -> bool {
        self.items.iter().any(|item| item.route.as_str() == route)
    }

    /// Queued routes in dequeue order
    pub fn routes(&self) -> Vec<RouteId> {
        self.items.iter().map(|item| item.route.clone()).collect()
    }

    /// Queue length
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
