//! Task handles, poll context, and the capabilities task logic can implement
//!
//! A task wraps user logic implementing [`Pollable`]. The logic itself lives
//! on the reactor thread; other threads only ever hold a [`TaskHandle`], which
//! carries identity, a back-reference to the owning reactor, and read-only
//! counters.

use crate::error::{PollError, ReactorError, Result, StopReason};
use crate::reactor::{Reactor, Shared};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Unique identifier for a task within one reactor
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a TaskId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Enqueued on the spawn queue, not yet polled
    Spawned,
    /// Start poll in progress
    Started,
    /// Registered in the active map, awaiting wake or interval
    Active,
    /// Terminal
    Stopped,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Spawned,
            1 => TaskState::Started,
            2 => TaskState::Active,
            _ => TaskState::Stopped,
        }
    }
}

/// Why a task is being polled
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Reason {
    /// First poll after spawn
    Start,
    /// One-shot wake (immediate or delayed)
    Wake,
    /// Recurring interval fired
    Interval,
}

const NO_SLOT: usize = usize::MAX;

struct TaskShared {
    id: TaskId,
    reactor: Weak<Shared>,
    state: AtomicU8,
    slot: AtomicUsize,
    wakes: AtomicU64,
    intervals: AtomicU64,
}

/// Cloneable handle to a spawned task
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<TaskShared>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, reactor: Weak<Shared>) -> Self {
        Self {
            inner: Arc::new(TaskShared {
                id,
                reactor,
                state: AtomicU8::new(TaskState::Spawned as u8),
                slot: AtomicUsize::new(NO_SLOT),
                wakes: AtomicU64::new(0),
                intervals: AtomicU64::new(0),
            }),
        }
    }

    /// Task ID
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Whether the task has reached its terminal state
    pub fn is_stopped(&self) -> bool {
        self.state() == TaskState::Stopped
    }

    /// Number of wake polls delivered
    pub fn wakes(&self) -> u64 {
        self.inner.wakes.load(Ordering::Relaxed)
    }

    /// Number of interval polls delivered
    pub fn intervals(&self) -> u64 {
        self.inner.intervals.load(Ordering::Relaxed)
    }

    /// Owning reactor, if it still exists
    pub fn reactor(&self) -> Option<Reactor> {
        self.inner.reactor.upgrade().map(Reactor::from_shared)
    }

    /// Wake the task on its owning reactor
    pub fn wake(&self) -> Result<()> {
        self.owner()?.wake(self)
    }

    /// Wake the task on its owning reactor after `delay`
    pub fn wake_after(&self, delay: Duration) -> Result<()> {
        self.owner()?.wake_after(self, delay)
    }

    pub(crate) fn owner(&self) -> Result<Reactor> {
        self.reactor()
            .ok_or_else(|| ReactorError::Orphaned(self.id().as_u64()))
    }

    pub(crate) fn owned_by(&self, shared: &Arc<Shared>) -> bool {
        std::ptr::eq(self.inner.reactor.as_ptr(), Arc::as_ptr(shared))
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn slot(&self) -> Option<usize> {
        match self.inner.slot.load(Ordering::Acquire) {
            NO_SLOT => None,
            index => Some(index),
        }
    }

    pub(crate) fn set_slot(&self, index: Option<usize>) {
        self.inner
            .slot
            .store(index.unwrap_or(NO_SLOT), Ordering::Release);
    }

    pub(crate) fn count_wake(&self) {
        self.inner.wakes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_interval(&self) {
        self.inner.intervals.fetch_add(1, Ordering::Relaxed);
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for TaskHandle {}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Scheduling requests collected while task logic runs
#[derive(Debug, Clone, Default)]
pub(crate) struct Control {
    pub stop: bool,
    pub wake_after: Option<Duration>,
    pub interval: Duration,
}

/// Poll context handed to task logic
pub struct Context<'a> {
    task: &'a TaskHandle,
    now: i64,
    reason: Reason,
    interval: Duration,
    max_delay: Duration,
    control: &'a mut Control,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        task: &'a TaskHandle,
        now: i64,
        reason: Reason,
        interval: Duration,
        max_delay: Duration,
        control: &'a mut Control,
    ) -> Self {
        Self {
            task,
            now,
            reason,
            interval,
            max_delay,
            control,
        }
    }

    /// Handle of the task being polled
    pub fn task(&self) -> &TaskHandle {
        self.task
    }

    /// Task ID
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Reactor time in nanoseconds since the reactor started
    pub fn now(&self) -> i64 {
        self.now
    }

    /// Why this poll happened
    pub fn reason(&self) -> Reason {
        self.reason
    }

    /// The cadence that fired, for `Reason::Interval` polls; zero otherwise
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Recurring interval currently requested by the task
    pub fn current_interval(&self) -> Duration {
        self.control.interval
    }

    /// Request a one-shot wake after `delay`. Zero means the next tick.
    pub fn wake_after(&mut self, delay: Duration) -> Result<()> {
        self.check_delay(delay)?;
        self.control.wake_after = Some(delay);
        Ok(())
    }

    /// Change the recurring interval. Zero stops recurring without stopping the task.
    pub fn set_interval(&mut self, interval: Duration) -> Result<()> {
        self.check_delay(interval)?;
        self.control.interval = interval;
        Ok(())
    }

    /// Stop the task once this poll returns
    pub fn stop(&mut self) {
        self.control.stop = true;
    }

    /// Whether `stop` has been requested during this poll
    pub fn is_stopping(&self) -> bool {
        self.control.stop
    }

    fn check_delay(&self, delay: Duration) -> Result<()> {
        if delay > self.max_delay {
            return Err(ReactorError::DelayOutOfRange {
                delay,
                max: self.max_delay,
            });
        }
        Ok(())
    }
}

/// Notification delivered to [`Closable`] logic when its task stops
#[derive(Debug, Clone)]
pub struct CloseEvent {
    /// The stopped task
    pub task: TaskHandle,
    /// Reactor time of the stop, nanoseconds since the reactor started
    pub time: i64,
    /// Why it stopped
    pub reason: StopReason,
}

/// Required capability of task logic
pub trait Pollable: Send + 'static {
    /// Run one step. Return [`PollError::Stop`] or call [`Context::stop`] to terminate.
    fn poll(&mut self, cx: &mut Context<'_>) -> std::result::Result<(), PollError>;

    /// Optional capability: receive the task handle at spawn time
    fn as_task_aware(&mut self) -> Option<&mut dyn TaskAware> {
        None
    }

    /// Optional capability: be notified when the task stops
    fn as_closable(&mut self) -> Option<&mut dyn Closable> {
        None
    }
}

/// Logic that wants its own task handle, e.g. to schedule itself from elsewhere
pub trait TaskAware {
    /// Called once, on the spawning thread, before the task is enqueued
    fn set_task(&mut self, task: TaskHandle);
}

/// Logic that wants a close notification
pub trait Closable {
    /// Called on the reactor thread after the task left the active map.
    /// Errors are reported and otherwise ignored.
    fn close(&mut self, event: &CloseEvent) -> std::result::Result<(), PollError>;
}

impl Pollable for Box<dyn Pollable> {
    fn poll(&mut self, cx: &mut Context<'_>) -> std::result::Result<(), PollError> {
        (**self).poll(cx)
    }

    fn as_task_aware(&mut self) -> Option<&mut dyn TaskAware> {
        (**self).as_task_aware()
    }

    fn as_closable(&mut self) -> Option<&mut dyn Closable> {
        (**self).as_closable()
    }
}

/// Task logic built from a closure; see [`poll_fn`]
pub struct PollFn<F> {
    f: F,
}

/// Wrap a closure as task logic
pub fn poll_fn<F>(f: F) -> PollFn<F>
where
    F: FnMut(&mut Context<'_>) -> std::result::Result<(), PollError> + Send + 'static,
{
    PollFn { f }
}

impl<F> Pollable for PollFn<F>
where
    F: FnMut(&mut Context<'_>) -> std::result::Result<(), PollError> + Send + 'static,
{
    fn poll(&mut self, cx: &mut Context<'_>) -> std::result::Result<(), PollError> {
        (self.f)(cx)
    }
}

/// Optional capabilities, resolved once at spawn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Capabilities {
    pub task_aware: bool,
    pub closable: bool,
}

impl Capabilities {
    pub fn resolve(logic: &mut dyn Pollable) -> Self {
        Self {
            task_aware: logic.as_task_aware().is_some(),
            closable: logic.as_closable().is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Aware {
        task: Option<TaskHandle>,
    }

    impl Pollable for Aware {
        fn poll(&mut self, _cx: &mut Context<'_>) -> std::result::Result<(), PollError> {
            Ok(())
        }

        fn as_task_aware(&mut self) -> Option<&mut dyn TaskAware> {
            Some(self)
        }
    }

    impl TaskAware for Aware {
        fn set_task(&mut self, task: TaskHandle) {
            self.task = Some(task);
        }
    }

    fn detached(id: u64) -> TaskHandle {
        TaskHandle::new(TaskId::from_u64(id), Weak::new())
    }

    #[test]
    fn test_handle_state_transitions() {
        let handle = detached(1);
        assert_eq!(handle.state(), TaskState::Spawned);
        handle.set_state(TaskState::Active);
        assert_eq!(handle.state(), TaskState::Active);
        handle.set_state(TaskState::Stopped);
        assert!(handle.is_stopped());
    }

    #[test]
    fn test_handle_slot_round_trip() {
        let handle = detached(2);
        assert_eq!(handle.slot(), None);
        handle.set_slot(Some(7));
        assert_eq!(handle.slot(), Some(7));
        handle.set_slot(None);
        assert_eq!(handle.slot(), None);
    }

    #[test]
    fn test_orphaned_handle_cannot_wake() {
        let handle = detached(3);
        assert!(handle.reactor().is_none());
        assert!(matches!(handle.wake(), Err(ReactorError::Orphaned(3))));
    }

    #[test]
    fn test_handle_equality_is_identity() {
        let a = detached(4);
        let b = detached(4);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_context_controls() {
        let handle = detached(5);
        let mut control = Control {
            interval: Duration::from_millis(100),
            ..Control::default()
        };
        let mut cx = Context::new(
            &handle,
            42,
            Reason::Interval,
            Duration::from_millis(100),
            Duration::from_secs(1),
            &mut control,
        );
        assert_eq!(cx.now(), 42);
        assert_eq!(cx.reason(), Reason::Interval);
        assert_eq!(cx.current_interval(), Duration::from_millis(100));

        cx.set_interval(Duration::from_millis(50)).unwrap();
        cx.wake_after(Duration::from_millis(20)).unwrap();
        assert!(matches!(
            cx.wake_after(Duration::from_secs(2)),
            Err(ReactorError::DelayOutOfRange { .. })
        ));
        cx.stop();
        assert!(cx.is_stopping());

        assert!(control.stop);
        assert_eq!(control.interval, Duration::from_millis(50));
        assert_eq!(control.wake_after, Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_capabilities_resolved_once() {
        let mut plain = poll_fn(|_cx| Ok(()));
        assert_eq!(Capabilities::resolve(&mut plain), Capabilities::default());

        let mut aware = Aware { task: None };
        let caps = Capabilities::resolve(&mut aware);
        assert!(caps.task_aware);
        assert!(!caps.closable);

        aware.as_task_aware().unwrap().set_task(detached(6));
        assert_eq!(aware.task.unwrap().id(), TaskId::from_u64(6));
    }
}
