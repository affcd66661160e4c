//! Batched wakes
//!
//! A [`WakeList`] collects task wakes and bare callbacks so they travel
//! through the wake-list queue as one item.

use crate::reactor::{Invocation, Reactor, Shared};
use crate::task::TaskHandle;
use std::fmt;
use std::sync::{Arc, Weak};

/// Batch of wakes and callbacks bound for one reactor
pub struct WakeList {
    reactor: Weak<Shared>,
    tasks: Vec<TaskHandle>,
    funcs: Vec<Invocation>,
}

impl WakeList {
    /// Create an empty list owned by `reactor`
    pub fn new(reactor: &Reactor) -> Self {
        Self::with_capacity(reactor, 0)
    }

    /// Create an empty list with room for `capacity` tasks
    pub fn with_capacity(reactor: &Reactor, capacity: usize) -> Self {
        Self {
            reactor: Arc::downgrade(reactor.shared()),
            tasks: Vec::with_capacity(capacity),
            funcs: Vec::new(),
        }
    }

    /// Add a task wake. Tasks owned by another reactor are forwarded to it when the list drains.
    pub fn push_task(&mut self, task: TaskHandle) {
        self.tasks.push(task);
    }

    /// Add a callback to run on the reactor thread
    pub fn push_fn<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.funcs.push(Box::new(f));
    }

    /// Total entries
    pub fn len(&self) -> usize {
        self.tasks.len() + self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.funcs.is_empty()
    }

    /// Owning reactor, if it still exists
    pub fn reactor(&self) -> Option<Reactor> {
        self.reactor.upgrade().map(Reactor::from_shared)
    }

    pub(crate) fn into_parts(self) -> (Vec<TaskHandle>, Vec<Invocation>) {
        (self.tasks, self.funcs)
    }

    pub(crate) fn owned_by(&self, shared: &Arc<Shared>) -> bool {
        std::ptr::eq(self.reactor.as_ptr(), Arc::as_ptr(shared))
    }
}

impl fmt::Debug for WakeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeList")
            .field("tasks", &self.tasks.len())
            .field("funcs", &self.funcs.len())
            .finish()
    }
}
