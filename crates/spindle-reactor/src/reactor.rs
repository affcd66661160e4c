//! Reactor handle and the reactor-thread driver
//!
//! A [`Reactor`] is a cheap cloneable handle. Producer threads talk to it only
//! through four bounded queues (wake lists, invokes, wakes, spawns) plus an
//! unbounded blocking-invoke channel, all sharing one coalescing wake signal.
//!
//! The reactor thread runs the [`Driver`]. It is the only code that touches
//! task logic, the wheels, the task arena, or writes the active-task map. Each
//! turn it resolves the current tick from the clock, processes any ticks it
//! missed, then drains the queues in fixed order until they are all empty.

use crate::affinity::{self, ProcessorTracker};
use crate::clock::{Clock, MonotonicClock};
use crate::config::ReactorConfig;
use crate::error::{panic_message, PollError, ReactorError, Result, StopReason};
use crate::hooks::{Hooks, NoopHooks, SkewEvent};
use crate::pool::{Membership, SlotKey, TaskPool, TaskSlot};
use crate::queue::{BoundedWake, WakeSignal};
use crate::registry::{ReactorId, ReactorRegistry};
use crate::stats::{Stats, StatsSnapshot};
use crate::task::{
    Capabilities, CloseEvent, Context, Control, Pollable, Reason, TaskHandle, TaskId, TaskState,
};
use crate::wake_list::WakeList;
use crate::wheel::{Entry, EntryKind, WheelSet};
use crate::worker::{join_with_timeout, WorkerPool};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

const STATE_NEW: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_SHUTDOWN: u8 = 2;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);
const NO_PROCESSOR: usize = usize::MAX;

// ============================================================================
// Queue message types
// ============================================================================

/// Callback run on the reactor thread
pub(crate) type Invocation = Box<dyn FnOnce() + Send + 'static>;

/// One-shot wake, carrying its delay so producers never touch task fields
pub(crate) struct WakeRequest {
    task: TaskHandle,
    after: Duration,
}

/// Task logic travelling to the reactor thread for its start poll
pub(crate) struct SpawnRequest {
    handle: TaskHandle,
    logic: Box<dyn Pollable>,
    caps: Capabilities,
    interval: Duration,
}

// ============================================================================
// Shared state
// ============================================================================

/// State shared between reactor handles and the reactor thread
pub(crate) struct Shared {
    id: ReactorId,
    config: ReactorConfig,
    tick_nanos: i64,
    max_delay: Duration,

    signal: WakeSignal,
    wake_lists: BoundedWake<WakeList>,
    invokes: BoundedWake<Invocation>,
    wakes: BoundedWake<WakeRequest>,
    spawns: BoundedWake<SpawnRequest>,
    blocking_tx: Sender<Invocation>,
    blocking_rx: Receiver<Invocation>,

    /// Started, not yet stopped tasks. Written only by the reactor thread.
    active: DashMap<TaskId, TaskHandle>,
    next_task_id: AtomicU64,

    stats: Stats,
    state: AtomicU8,
    now: AtomicI64,
    current_tick: AtomicU64,
    processor: AtomicUsize,
    thread_id: OnceCell<ThreadId>,

    clock: Arc<dyn Clock>,
    hooks: Arc<dyn Hooks>,
    workers: WorkerPool,
    registry: Option<Weak<ReactorRegistry>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn is_shut_down(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_SHUTDOWN
    }

    /// Drop queued spawns, marking their handles stopped
    fn discard_spawns(&self) {
        self.spawns
            .dequeue_many(usize::MAX, |req| req.handle.set_state(TaskState::Stopped));
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for a [`Reactor`] with a custom clock, hooks, or registry
pub struct ReactorBuilder {
    config: ReactorConfig,
    clock: Option<Arc<dyn Clock>>,
    hooks: Option<Arc<dyn Hooks>>,
    registry: Option<Arc<ReactorRegistry>>,
}

impl ReactorBuilder {
    /// Use `clock` instead of the monotonic system clock
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Install observer hooks
    pub fn hooks(mut self, hooks: impl Hooks) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Register the reactor in `registry` until it shuts down
    pub fn registry(mut self, registry: &Arc<ReactorRegistry>) -> Self {
        self.registry = Some(registry.clone());
        self
    }

    /// Validate the config and construct the reactor. Nothing is started.
    pub fn build(self) -> Result<Reactor> {
        let config = self.config.validate()?;
        let signal = WakeSignal::new();
        let (blocking_tx, blocking_rx) = channel::unbounded();
        let id = ReactorId::next();

        let shared = Arc::new(Shared {
            id,
            tick_nanos: config.level1.tick.as_nanos() as i64,
            max_delay: config.max_delay(),
            wake_lists: BoundedWake::new(config.wake_queue_size, signal.clone()),
            invokes: BoundedWake::new(config.invoke_queue_size, signal.clone()),
            wakes: BoundedWake::new(config.wake_queue_size, signal.clone()),
            spawns: BoundedWake::new(config.spawn_queue_size, signal.clone()),
            signal,
            blocking_tx,
            blocking_rx,
            active: DashMap::new(),
            next_task_id: AtomicU64::new(1),
            stats: Stats::default(),
            state: AtomicU8::new(STATE_NEW),
            now: AtomicI64::new(0),
            current_tick: AtomicU64::new(0),
            processor: AtomicUsize::new(NO_PROCESSOR),
            thread_id: OnceCell::new(),
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(MonotonicClock::new())),
            hooks: self.hooks.unwrap_or_else(|| Arc::new(NoopHooks)),
            workers: WorkerPool::new(config.name.clone(), config.worker_threads),
            registry: self.registry.as_ref().map(Arc::downgrade),
            thread: Mutex::new(None),
            config,
        });

        if let Some(registry) = &self.registry {
            registry.register(id, &shared);
        }
        debug!(reactor = %shared.config.name, id = %id, "reactor created");
        Ok(Reactor { shared })
    }
}

// ============================================================================
// Reactor handle
// ============================================================================

/// Handle to a reactor. Clones refer to the same reactor.
#[derive(Clone)]
pub struct Reactor {
    shared: Arc<Shared>,
}

impl Reactor {
    /// Construct a reactor with the monotonic clock and no hooks
    pub fn new(config: ReactorConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Start building a reactor
    pub fn builder(config: ReactorConfig) -> ReactorBuilder {
        ReactorBuilder {
            config,
            clock: None,
            hooks: None,
            registry: None,
        }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Reactor ID
    pub fn id(&self) -> ReactorId {
        self.shared.id
    }

    /// Configured name
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Validated configuration
    pub fn config(&self) -> &ReactorConfig {
        &self.shared.config
    }

    /// Level-1 tick duration
    pub fn tick_duration(&self) -> Duration {
        self.shared.config.level1.tick
    }

    /// Largest accepted delay or interval
    pub fn max_delay(&self) -> Duration {
        self.shared.max_delay
    }

    /// Reactor time in nanoseconds since start, as last observed by the reactor thread
    pub fn now(&self) -> i64 {
        self.shared.now.load(Ordering::Acquire)
    }

    /// Last tick number processed
    pub fn current_tick(&self) -> u64 {
        self.shared.current_tick.load(Ordering::Acquire)
    }

    /// Duration of `ticks` level-1 ticks
    pub fn duration(&self, ticks: u64) -> Duration {
        Duration::from_nanos((self.shared.tick_nanos as u64).saturating_mul(ticks))
    }

    /// Whole level-1 ticks in `duration`
    pub fn ticks(&self, duration: Duration) -> u64 {
        (duration.as_nanos() / self.shared.tick_nanos as u128) as u64
    }

    /// Number of active tasks
    pub fn len(&self) -> usize {
        self.shared.active.len()
    }

    /// Whether no task is active
    pub fn is_empty(&self) -> bool {
        self.shared.active.is_empty()
    }

    /// Whether `id` is started and not yet stopped
    pub fn is_active(&self, id: TaskId) -> bool {
        self.shared.active.contains_key(&id)
    }

    /// Handle of an active task
    pub fn task(&self, id: TaskId) -> Option<TaskHandle> {
        self.shared.active.get(&id).map(|entry| entry.value().clone())
    }

    /// CPU the reactor thread last ran on
    pub fn processor(&self) -> Option<usize> {
        match self.shared.processor.load(Ordering::Relaxed) {
            NO_PROCESSOR => None,
            cpu => Some(cpu),
        }
    }

    /// Whether the caller is running on this reactor's thread
    pub fn is_reactor_thread(&self) -> bool {
        self.shared.thread_id.get() == Some(&thread::current().id())
    }

    /// Whether the reactor thread has been started and not shut down
    pub fn is_running(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == STATE_RUNNING
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shut_down()
    }

    /// Point-in-time statistics
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::capture(
            &self.shared.stats,
            &self.shared.config.name,
            self.len(),
            self.processor(),
            self.current_tick(),
            self.tick_duration(),
        )
    }

    /// Start the reactor thread. Calling it again is a no-op.
    pub fn start(&self) -> Result<()> {
        match self.shared.state.compare_exchange(
            STATE_NEW,
            STATE_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(STATE_SHUTDOWN) => return Err(ReactorError::ShutDown),
            Err(_) => return Ok(()),
        }

        let driver = Driver::new(self.shared.clone());
        let spawned = thread::Builder::new()
            .name(format!("spindle-{}", self.shared.config.name))
            .spawn(move || driver.run());
        match spawned {
            Ok(handle) => {
                *self.shared.thread.lock() = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.state.store(STATE_NEW, Ordering::Release);
                Err(err.into())
            }
        }
    }

    /// Stop the reactor: every active task is stopped with [`StopReason::Shutdown`],
    /// queued spawns are dropped, threads are joined with a timeout, and the
    /// reactor leaves its registry. Later submissions fail with `ShutDown`.
    pub fn shutdown(&self) {
        let prev = self.shared.state.swap(STATE_SHUTDOWN, Ordering::AcqRel);
        if prev == STATE_SHUTDOWN {
            return;
        }
        self.shared.signal.notify();

        if prev == STATE_RUNNING {
            let handle = self.shared.thread.lock().take();
            // From the reactor thread itself the loop exits after the current turn
            if let Some(handle) = handle {
                if handle.thread().id() != thread::current().id()
                    && !join_with_timeout(handle, SHUTDOWN_TIMEOUT)
                {
                    warn!(reactor = %self.name(), "reactor thread did not stop in time, detached");
                }
            }
        }
        // Spawns enqueued after the driver's final drain
        self.shared.discard_spawns();

        self.shared.workers.shutdown(SHUTDOWN_TIMEOUT);
        if let Some(registry) = self.shared.registry.as_ref().and_then(Weak::upgrade) {
            registry.deregister(self.shared.id);
        }
        debug!(reactor = %self.name(), "reactor shut down");
    }

    /// Poll `task` on its reactor as soon as possible
    pub fn wake(&self, task: &TaskHandle) -> Result<()> {
        self.wake_after(task, Duration::ZERO)
    }

    /// Poll `task` once `delay` has elapsed. A zero delay is an immediate wake.
    ///
    /// Tasks owned by another reactor are forwarded to it.
    pub fn wake_after(&self, task: &TaskHandle, delay: Duration) -> Result<()> {
        if !task.owned_by(&self.shared) {
            return task.owner()?.wake_after(task, delay);
        }
        self.ensure_open()?;
        if task.is_stopped() {
            return Err(ReactorError::NotScheduled(task.id().as_u64()));
        }
        self.check_delay(delay)?;
        self.shared
            .wakes
            .enqueue(WakeRequest {
                task: task.clone(),
                after: delay,
            })
            .map_err(|_| self.rejected())
    }

    /// Submit a batch of wakes and callbacks. Empty lists are accepted and dropped.
    pub fn wake_list(&self, list: WakeList) -> Result<()> {
        if !list.owned_by(&self.shared) {
            let owner = list.reactor().ok_or(ReactorError::ShutDown)?;
            return owner.wake_list(list);
        }
        self.ensure_open()?;
        if list.is_empty() {
            return Ok(());
        }
        self.shared
            .wake_lists
            .enqueue(list)
            .map_err(|_| self.rejected())
    }

    /// Run `f` on the reactor thread, waiting up to the configured invoke timeout for queue space
    pub fn invoke<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_open()?;
        let timeout = self.shared.config.invoke_timeout;
        self.shared
            .invokes
            .enqueue_timeout(Box::new(f), timeout)
            .map_err(|_| {
                self.shared.stats.rejected.incr();
                ReactorError::InvokeTimeout(timeout)
            })
    }

    /// Run `f` on the reactor thread; fails immediately when the queue is full
    pub fn try_invoke<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_open()?;
        self.shared
            .invokes
            .enqueue(Box::new(f))
            .map_err(|_| self.rejected())
    }

    /// Run `f` on the reactor thread through the unbounded channel; never rejected while open
    pub fn invoke_blocking<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_open()?;
        self.shared
            .blocking_tx
            .send(Box::new(f))
            .map_err(|_| ReactorError::ShutDown)?;
        self.shared.signal.notify();
        Ok(())
    }

    /// Spawn a task. Its start poll happens on the reactor thread.
    pub fn spawn<P: Pollable>(&self, logic: P) -> Result<TaskHandle> {
        self.spawn_interval(logic, Duration::ZERO)
    }

    /// Spawn a task that is also polled every `interval` (zero = not recurring)
    pub fn spawn_interval<P: Pollable>(&self, logic: P, interval: Duration) -> Result<TaskHandle> {
        self.ensure_open()?;
        self.check_delay(interval)?;

        let id = TaskId::from_u64(self.shared.next_task_id.fetch_add(1, Ordering::Relaxed));
        let handle = TaskHandle::new(id, Arc::downgrade(&self.shared));
        let mut logic: Box<dyn Pollable> = Box::new(logic);
        let caps = Capabilities::resolve(logic.as_mut());
        if caps.task_aware {
            if let Some(aware) = logic.as_task_aware() {
                aware.set_task(handle.clone());
            }
        }

        self.shared
            .spawns
            .enqueue(SpawnRequest {
                handle: handle.clone(),
                logic,
                caps,
                interval,
            })
            .map_err(|req| {
                req.handle.set_state(TaskState::Stopped);
                self.rejected()
            })?;
        // Shutdown may have drained the queue between the check and the enqueue
        if self.shared.is_shut_down() {
            self.shared.discard_spawns();
            handle.set_state(TaskState::Stopped);
            return Err(ReactorError::ShutDown);
        }
        Ok(handle)
    }

    /// Run `f` on the worker pool, off the reactor thread
    pub fn spawn_worker_fn<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_open()?;
        self.shared.workers.submit(Box::new(f))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.is_shut_down() {
            return Err(ReactorError::ShutDown);
        }
        Ok(())
    }

    fn check_delay(&self, delay: Duration) -> Result<()> {
        if delay > self.shared.max_delay {
            return Err(ReactorError::DelayOutOfRange {
                delay,
                max: self.shared.max_delay,
            });
        }
        Ok(())
    }

    fn rejected(&self) -> ReactorError {
        self.shared.stats.rejected.incr();
        ReactorError::QueueFull
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("id", &self.shared.id)
            .field("name", &self.shared.config.name)
            .field("tasks", &self.shared.active.len())
            .finish()
    }
}

fn nanos(d: Duration) -> i64 {
    d.as_nanos().min(i64::MAX as u128) as i64
}

// ============================================================================
// Driver (reactor thread)
// ============================================================================

type PollOutcome = (Control, std::result::Result<(), PollError>);

/// State owned by the reactor thread
pub(crate) struct Driver {
    shared: Arc<Shared>,
    clock: Arc<dyn Clock>,
    epoch: i64,
    tick_duration: Duration,
    tick_nanos: i64,
    wheels: WheelSet,
    pool: TaskPool,
    now: i64,
    last_tick: u64,
    /// Wakes that arrived before their task's spawn was drained
    deferred: FxHashMap<TaskId, Vec<WakeRequest>>,
    processor: ProcessorTracker,
}

impl Driver {
    fn new(shared: Arc<Shared>) -> Self {
        let clock = shared.clock.clone();
        let epoch = clock.now();
        Self {
            wheels: WheelSet::new(&shared.config),
            tick_duration: shared.config.level1.tick,
            tick_nanos: shared.tick_nanos,
            clock,
            epoch,
            pool: TaskPool::new(),
            now: 0,
            last_tick: 0,
            deferred: FxHashMap::default(),
            processor: ProcessorTracker::default(),
            shared,
        }
    }

    // ========================================================================
    // Reactor loop
    // ========================================================================

    fn run(mut self) {
        let _ = self.shared.thread_id.set(thread::current().id());
        let name = self.shared.config.name.clone();
        if self.shared.config.pin_thread {
            match affinity::pin_current_thread() {
                Some(core) => debug!(reactor = %name, core, "reactor thread pinned"),
                None => warn!(reactor = %name, "failed to pin reactor thread"),
            }
        }
        debug!(reactor = %name, id = %self.shared.id, "reactor started");

        let signal = self.shared.signal.receiver().clone();
        while !self.shared.is_shut_down() {
            match signal.recv_timeout(self.until_next_tick()) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if self.shared.is_shut_down() {
                break;
            }
            self.turn();
        }

        self.close();
        debug!(reactor = %name, "reactor stopped");
    }

    /// One wake-up: process due ticks, then drain until every queue is empty
    fn turn(&mut self) {
        self.sample_processor();
        self.now = self.elapsed();
        let tick = (self.now / self.tick_nanos) as u64;
        self.maybe_process_tick(tick);
        loop {
            self.now = self.elapsed();
            self.shared.now.store(self.now, Ordering::Release);
            if self.flush_queues() == 0 {
                break;
            }
        }
    }

    fn elapsed(&self) -> i64 {
        (self.clock.now() - self.epoch).max(self.now)
    }

    fn until_next_tick(&self) -> Duration {
        let next = (self.last_tick as i64 + 1).saturating_mul(self.tick_nanos);
        let remaining = next - self.elapsed();
        if remaining <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(remaining as u64)
        }
    }

    fn sample_processor(&mut self) {
        let (cpu, switched) = self.processor.sample();
        if switched {
            self.shared.stats.pid_switches.incr();
        }
        if let Some(cpu) = cpu {
            self.shared.processor.store(cpu, Ordering::Relaxed);
        }
    }

    // ========================================================================
    // Ticks
    // ========================================================================

    fn maybe_process_tick(&mut self, tick: u64) {
        if tick < 1 || tick <= self.last_tick {
            return;
        }
        let last = self.last_tick;
        self.last_tick = tick;
        self.shared.current_tick.store(tick, Ordering::Release);
        if last + 1 < tick {
            self.catchup(last, tick);
        }
        self.process_tick(tick);
    }

    /// Replay every tick strictly between `last` and `current`, in order
    fn catchup(&mut self, last: u64, current: u64) {
        let missed = current - last - 1;
        warn!(
            reactor = %self.shared.config.name,
            from = last + 1,
            to = current - 1,
            "reactor fell behind, catching up"
        );
        let start = Instant::now();
        for tick in (last + 1)..current {
            self.tick(tick);
        }
        let stats = &self.shared.stats;
        stats.catchups.incr();
        stats.caught_up_ticks.add(missed);
        self.shared.hooks.rebalance(&SkewEvent {
            tick: current,
            missed,
            elapsed: start.elapsed(),
            tick_duration: self.tick_duration,
        });
    }

    fn process_tick(&mut self, tick: u64) {
        let start = Instant::now();
        self.tick(tick);
        let elapsed = start.elapsed();
        self.shared.stats.ticks.record(1, elapsed);
        if elapsed > self.tick_duration {
            self.shared.stats.skew.record(1, elapsed);
            warn!(
                reactor = %self.shared.config.name,
                tick,
                elapsed = ?elapsed,
                "tick processing exceeded tick duration"
            );
            self.shared.hooks.rebalance(&SkewEvent {
                tick,
                missed: 0,
                elapsed,
                tick_duration: self.tick_duration,
            });
        }
    }

    /// Advance every level due at `tick` and dispatch what expired
    fn tick(&mut self, tick: u64) {
        let time = self.wheels.tick_time(tick);
        for level in self.wheels.levels_for_tick(tick) {
            let start = Instant::now();
            let mut expired = self.wheels.advance(level);
            for entry in expired.drain(..) {
                if entry.deadline > time {
                    self.cascade(entry);
                } else {
                    self.expire(entry);
                }
            }
            self.wheels.recycle(level, expired);
            self.shared.stats.level(level).record(1, start.elapsed());
        }
    }

    /// Whether `entry` is still the task's current membership of its kind
    fn is_current(&mut self, entry: &Entry) -> bool {
        match self.pool.get_mut(entry.key) {
            Some(slot) => slot.membership(entry.kind).map(|m| m.seq) == Some(entry.seq),
            None => false,
        }
    }

    /// Move a coarse entry whose deadline is still ahead into a finer wheel
    fn cascade(&mut self, entry: Entry) {
        if !self.is_current(&entry) {
            return;
        }
        let placement = self.wheels.insert(entry);
        if let Some(slot) = self.pool.get_mut(entry.key) {
            *slot.membership(entry.kind) = Some(Membership {
                level: placement.level,
                slot: placement.slot,
                seq: entry.seq,
            });
        }
    }

    fn expire(&mut self, entry: Entry) {
        if !self.is_current(&entry) {
            return;
        }
        let Some(slot) = self.pool.get_mut(entry.key) else {
            return;
        };
        *slot.membership(entry.kind) = None;
        match entry.kind {
            EntryKind::Wake => self.poll_wake(entry.key),
            EntryKind::Interval(interval) => {
                if slot.interval != interval {
                    return;
                }
                if self.poll_interval(entry.key, interval) {
                    self.rearm(entry, interval);
                }
            }
        }
    }

    /// Keep an interval in rotation at the same cadence
    fn rearm(&mut self, entry: Entry, interval: Duration) {
        let step = nanos(interval);
        let mut deadline = entry.deadline.saturating_add(step);
        if deadline <= self.now {
            deadline = self.now.saturating_add(step);
        }
        self.schedule(entry.key, deadline, EntryKind::Interval(interval));
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Place the task in the wheels, replacing any pending entry of the same kind
    fn schedule(&mut self, key: SlotKey, deadline: i64, kind: EntryKind) {
        let Some(slot) = self.pool.get_mut(key) else {
            return;
        };
        let prior = slot.membership(kind).take();
        let seq = slot.next_seq();
        if let Some(m) = prior {
            self.wheels.remove(m.level, m.slot, key, m.seq);
        }

        let placement = self.wheels.insert(Entry {
            key,
            deadline,
            kind,
            seq,
        });
        if placement.clamped {
            self.shared.stats.delays_clamped.incr();
            warn!(task = %key.id, deadline, "deadline beyond wheel span, clamped");
        }
        if let Some(slot) = self.pool.get_mut(key) {
            *slot.membership(kind) = Some(Membership {
                level: placement.level,
                slot: placement.slot,
                seq,
            });
        }
    }

    fn detach(&mut self, key: SlotKey, kind: EntryKind) {
        let prior = self
            .pool
            .get_mut(key)
            .and_then(|slot| slot.membership(kind).take());
        if let Some(m) = prior {
            self.wheels.remove(m.level, m.slot, key, m.seq);
        }
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Run task logic behind a panic boundary
    fn poll(&mut self, key: SlotKey, reason: Reason, interval: Duration) -> Option<PollOutcome> {
        let now = self.now;
        let max_delay = self.shared.max_delay;
        let slot = self.pool.get_mut(key)?;
        let mut control = Control {
            interval: slot.interval,
            ..Control::default()
        };
        let handle = slot.handle.clone();
        let logic = &mut slot.logic;
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut cx = Context::new(&handle, now, reason, interval, max_delay, &mut control);
            logic.poll(&mut cx)
        }))
        .unwrap_or_else(|payload| Err(PollError::Panicked(panic_message(payload))));
        Some((control, result))
    }

    /// Report poll errors. Returns why the task must stop, if it must.
    fn settle(
        &self,
        id: TaskId,
        control: &Control,
        result: std::result::Result<(), PollError>,
    ) -> Option<StopReason> {
        match result {
            Ok(()) => {}
            Err(PollError::Stop) => return Some(StopReason::Requested),
            Err(PollError::Panicked(message)) => {
                self.shared.stats.task_panics.incr();
                error!(task = %id, panic = %message, "task panicked");
                self.shared
                    .hooks
                    .task_error(id, &PollError::Panicked(message.clone()));
                return Some(StopReason::Panicked(message));
            }
            Err(err) => {
                self.shared.stats.task_errors.incr();
                warn!(task = %id, error = %err, "task poll failed");
                self.shared.hooks.task_error(id, &err);
            }
        }
        control.stop.then_some(StopReason::Requested)
    }

    /// Apply scheduling requests from a poll. Returns true if the recurring interval is unchanged.
    fn apply(&mut self, key: SlotKey, control: &Control) -> bool {
        if let Some(delay) = control.wake_after {
            self.schedule(key, self.now.saturating_add(nanos(delay)), EntryKind::Wake);
        }
        let Some(slot) = self.pool.get_mut(key) else {
            return false;
        };
        let previous = std::mem::replace(&mut slot.interval, control.interval);
        if previous == control.interval {
            return true;
        }
        if control.interval.is_zero() {
            self.detach(key, EntryKind::Interval(previous));
        } else {
            let deadline = self.now.saturating_add(nanos(control.interval));
            self.schedule(key, deadline, EntryKind::Interval(control.interval));
        }
        false
    }

    fn poll_start(&mut self, req: SpawnRequest) {
        let SpawnRequest {
            handle,
            logic,
            caps,
            interval,
        } = req;
        let id = handle.id();
        let key = self
            .pool
            .acquire(TaskSlot::new(handle.clone(), logic, caps, interval));
        handle.set_slot(Some(key.index));
        handle.set_state(TaskState::Started);
        let deferred = self.deferred.remove(&id);

        let Some((control, result)) = self.poll(key, Reason::Start, Duration::ZERO) else {
            return;
        };
        if let Some(reason) = self.settle(id, &control, result) {
            self.retire(key, reason);
            return;
        }

        self.shared.active.insert(id, handle.clone());
        handle.set_state(TaskState::Active);
        debug!(task = %id, "task started");

        if self.apply(key, &control) && !interval.is_zero() {
            let deadline = self.now.saturating_add(nanos(interval));
            self.schedule(key, deadline, EntryKind::Interval(interval));
        }
        for req in deferred.into_iter().flatten() {
            self.wake_request(req);
        }
    }

    fn poll_wake(&mut self, key: SlotKey) {
        if let Some(slot) = self.pool.get(key) {
            slot.handle.count_wake();
        }
        let Some((control, result)) = self.poll(key, Reason::Wake, Duration::ZERO) else {
            return;
        };
        if let Some(reason) = self.settle(key.id, &control, result) {
            self.stop_task(key, reason);
            return;
        }
        self.apply(key, &control);
    }

    /// Returns true to keep the task in rotation at `interval`
    fn poll_interval(&mut self, key: SlotKey, interval: Duration) -> bool {
        if let Some(slot) = self.pool.get(key) {
            slot.handle.count_interval();
        }
        let Some((control, result)) = self.poll(key, Reason::Interval, interval) else {
            return false;
        };
        if let Some(reason) = self.settle(key.id, &control, result) {
            self.stop_task(key, reason);
            return false;
        }
        self.apply(key, &control)
    }

    fn poll_wake_list(&mut self, list: WakeList) {
        let (tasks, funcs) = list.into_parts();
        let stats = &self.shared.stats;
        stats.wake_list_wakes.add(tasks.len() as u64);
        stats.wake_list_invokes.add(funcs.len() as u64);
        for task in tasks {
            self.wake_request(WakeRequest {
                task,
                after: Duration::ZERO,
            });
        }
        for f in funcs {
            self.invoke(f);
        }
    }

    fn wake_request(&mut self, req: WakeRequest) {
        let task = &req.task;
        if !task.owned_by(&self.shared) {
            if let Err(err) = task.wake_after(req.after) {
                debug!(task = %task.id(), error = %err, "forwarded wake rejected");
            }
            return;
        }
        match task.state() {
            TaskState::Spawned => {
                self.deferred.entry(task.id()).or_default().push(req);
                return;
            }
            TaskState::Stopped => return,
            TaskState::Started | TaskState::Active => {}
        }
        let Some(index) = task.slot() else {
            return;
        };
        let key = SlotKey {
            index,
            id: task.id(),
        };
        if req.after.is_zero() {
            self.poll_wake(key);
        } else {
            let deadline = self.now.saturating_add(nanos(req.after));
            self.schedule(key, deadline, EntryKind::Wake);
        }
    }

    fn invoke(&self, f: Invocation) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
            self.shared.stats.invoke_panics.incr();
            error!(reactor = %self.shared.config.name, panic = %panic_message(payload), "invoke panicked");
        }
    }

    // ========================================================================
    // Stopping
    // ========================================================================

    /// Stop an active task. A no-op for tasks no longer in the active map.
    fn stop_task(&mut self, key: SlotKey, reason: StopReason) {
        if self.shared.active.remove(&key.id).is_none() {
            return;
        }
        self.retire(key, reason);
    }

    /// Drop wheel memberships, notify close, and free the arena slot
    fn retire(&mut self, key: SlotKey, reason: StopReason) {
        let Some(mut slot) = self.pool.release(key) else {
            return;
        };
        for m in [slot.wake.take(), slot.recurring.take()].into_iter().flatten() {
            self.wheels.remove(m.level, m.slot, key, m.seq);
        }
        slot.handle.set_state(TaskState::Stopped);
        slot.handle.set_slot(None);
        self.deferred.remove(&key.id);
        debug!(task = %key.id, reason = ?reason, "task stopped");
        if slot.caps.closable {
            self.notify_close(&mut slot, reason);
        }
    }

    fn notify_close(&self, slot: &mut TaskSlot, reason: StopReason) {
        let event = CloseEvent {
            task: slot.handle.clone(),
            time: self.now,
            reason,
        };
        let id = event.task.id();
        let Some(closable) = slot.logic.as_closable() else {
            return;
        };
        let err = match catch_unwind(AssertUnwindSafe(|| closable.close(&event))) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => {
                self.shared.stats.task_errors.incr();
                warn!(task = %id, error = %err, "task close failed");
                err
            }
            Err(payload) => {
                self.shared.stats.task_panics.incr();
                let message = panic_message(payload);
                error!(task = %id, panic = %message, "task close panicked");
                PollError::Panicked(message)
            }
        };
        self.shared.hooks.task_error(id, &err);
    }

    // ========================================================================
    // Queues
    // ========================================================================

    /// Drain every queue once, in order. Returns the number of items handled.
    fn flush_queues(&mut self) -> usize {
        let shared = self.shared.clone();
        let stats = &shared.stats;
        let start = Instant::now();
        let mut total = 0;

        if !shared.wake_lists.is_empty() {
            let t = Instant::now();
            let n = shared
                .wake_lists
                .dequeue_many(shared.wake_lists.capacity(), |list| self.poll_wake_list(list));
            stats.wake_lists.record(n as u64, t.elapsed());
            total += n;
        }

        if !shared.invokes.is_empty() {
            let t = Instant::now();
            let n = shared
                .invokes
                .dequeue_many(shared.invokes.capacity(), |f| self.invoke(f));
            stats.invokes.record(n as u64, t.elapsed());
            total += n;
        }

        let mut blocking = 0;
        while blocking < shared.invokes.capacity() {
            match shared.blocking_rx.try_recv() {
                Ok(f) => {
                    self.invoke(f);
                    blocking += 1;
                }
                Err(_) => break,
            }
        }
        stats.blocking_invokes.add(blocking as u64);
        total += blocking;

        if !shared.wakes.is_empty() {
            let t = Instant::now();
            let n = shared
                .wakes
                .dequeue_many(shared.wakes.capacity(), |req| self.wake_request(req));
            stats.wakes.record(n as u64, t.elapsed());
            total += n;
        }

        if !shared.spawns.is_empty() {
            let t = Instant::now();
            let n = shared
                .spawns
                .dequeue_many(shared.spawns.capacity(), |req| self.poll_start(req));
            stats.spawns.record(n as u64, t.elapsed());
            total += n;
        }

        if total > 0 {
            stats.flushes.record(1, start.elapsed());
        }
        total
    }

    /// Stop every task and discard queued work
    fn close(&mut self) {
        self.now = self.elapsed();
        for key in self.pool.keys() {
            self.stop_task(key, StopReason::Shutdown);
        }
        debug_assert_eq!(self.pool.len(), 0);
        let shared = self.shared.clone();
        shared.discard_spawns();
        shared.wakes.dequeue_many(usize::MAX, drop);
        shared.wake_lists.dequeue_many(usize::MAX, drop);
        shared.invokes.dequeue_many(usize::MAX, drop);
        while shared.blocking_rx.try_recv().is_ok() {}
        self.deferred.clear();
    }
}
