//! Extension points invoked on the reactor thread

use crate::error::PollError;
use crate::task::TaskId;
use std::sync::Arc;
use std::time::Duration;

/// Details of a skew episode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkewEvent {
    /// Tick being processed
    pub tick: u64,
    /// Ticks replayed by catch-up before `tick`
    pub missed: u64,
    /// Time spent processing
    pub elapsed: Duration,
    /// Nominal tick duration
    pub tick_duration: Duration,
}

/// Observer hooks. All methods run on the reactor thread and must not block.
pub trait Hooks: Send + Sync + 'static {
    /// A task poll or close notification returned an error or panicked
    fn task_error(&self, _task: TaskId, _error: &PollError) {}

    /// The reactor fell behind real time
    fn rebalance(&self, _event: &SkewEvent) {}
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl Hooks for NoopHooks {}

impl<H: Hooks> Hooks for Arc<H> {
    fn task_error(&self, task: TaskId, error: &PollError) {
        (**self).task_error(task, error)
    }

    fn rebalance(&self, event: &SkewEvent) {
        (**self).rebalance(event)
    }
}
