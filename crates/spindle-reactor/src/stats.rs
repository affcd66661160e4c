//! Reactor statistics
//!
//! Counters are plain atomics written by the reactor thread and read from
//! anywhere. [`StatsSnapshot`] is a point-in-time copy that serializes with
//! serde and renders a human-readable report through `Display`.

use crate::wheel::Level;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Monotonic event counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Add one
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n`
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    pub fn load(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Accumulated duration plus the fastest and slowest sample
#[derive(Debug)]
pub struct TimeCounter {
    total: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Default for TimeCounter {
    fn default() -> Self {
        Self {
            total: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }
}

impl TimeCounter {
    /// Record one sample
    pub fn record(&self, elapsed: Duration) {
        let nanos = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        self.total.fetch_add(nanos, Ordering::Relaxed);
        self.min.fetch_min(nanos, Ordering::Relaxed);
        self.max.fetch_max(nanos, Ordering::Relaxed);
    }

    /// Sum of all samples
    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.total.load(Ordering::Relaxed))
    }

    /// Fastest sample, zero before the first one
    pub fn min(&self) -> Duration {
        match self.min.load(Ordering::Relaxed) {
            u64::MAX => Duration::ZERO,
            nanos => Duration::from_nanos(nanos),
        }
    }

    /// Slowest sample
    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max.load(Ordering::Relaxed))
    }

    fn snapshot(&self, count: u64) -> TimingSnapshot {
        TimingSnapshot {
            count,
            total: self.total(),
            min: self.min(),
            max: self.max(),
        }
    }
}

/// Counter paired with its timing
#[derive(Debug, Default)]
pub struct Timed {
    pub count: Counter,
    pub time: TimeCounter,
}

impl Timed {
    /// Record `n` events that together took `elapsed`
    pub fn record(&self, n: u64, elapsed: Duration) {
        self.count.add(n);
        self.time.record(elapsed);
    }

    fn snapshot(&self) -> TimingSnapshot {
        self.time.snapshot(self.count.load())
    }
}

/// Live counters of one reactor
#[derive(Debug, Default)]
pub struct Stats {
    pub ticks: Timed,
    pub levels: [Timed; 3],
    pub spawns: Timed,
    pub wakes: Timed,
    pub wake_lists: Timed,
    pub wake_list_wakes: Counter,
    pub wake_list_invokes: Counter,
    pub invokes: Timed,
    pub blocking_invokes: Counter,
    pub flushes: Timed,
    /// Ticks whose processing took longer than one tick
    pub skew: Timed,
    /// Catch-up passes and the ticks they replayed
    pub catchups: Counter,
    pub caught_up_ticks: Counter,
    pub pid_switches: Counter,
    pub task_errors: Counter,
    pub task_panics: Counter,
    pub invoke_panics: Counter,
    pub delays_clamped: Counter,
    pub rejected: Counter,
}

impl Stats {
    pub fn level(&self, level: Level) -> &Timed {
        &self.levels[level as usize]
    }
}

/// Count and timing of one kind of event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimingSnapshot {
    pub count: u64,
    #[serde(serialize_with = "nanos")]
    pub total: Duration,
    #[serde(serialize_with = "nanos")]
    pub min: Duration,
    #[serde(serialize_with = "nanos")]
    pub max: Duration,
}

impl TimingSnapshot {
    /// Mean duration per recorded batch
    pub fn average(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((self.total.as_nanos() / self.count as u128) as u64)
    }
}

/// Point-in-time copy of a reactor's statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub name: String,
    /// Active tasks
    pub size: usize,
    pub processor: Option<usize>,
    pub current_tick: u64,
    #[serde(serialize_with = "nanos")]
    pub tick_duration: Duration,
    pub ticks: TimingSnapshot,
    pub level1: TimingSnapshot,
    pub level2: TimingSnapshot,
    pub level3: TimingSnapshot,
    pub spawns: TimingSnapshot,
    pub wakes: TimingSnapshot,
    pub wake_lists: TimingSnapshot,
    pub wake_list_wakes: u64,
    pub wake_list_invokes: u64,
    pub invokes: TimingSnapshot,
    pub blocking_invokes: u64,
    pub flushes: TimingSnapshot,
    pub skew: TimingSnapshot,
    pub catchups: u64,
    pub caught_up_ticks: u64,
    pub pid_switches: u64,
    pub task_errors: u64,
    pub task_panics: u64,
    pub invoke_panics: u64,
    pub delays_clamped: u64,
    pub rejected: u64,
}

impl StatsSnapshot {
    pub(crate) fn capture(
        stats: &Stats,
        name: &str,
        size: usize,
        processor: Option<usize>,
        current_tick: u64,
        tick_duration: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            size,
            processor,
            current_tick,
            tick_duration,
            ticks: stats.ticks.snapshot(),
            level1: stats.level(Level::One).snapshot(),
            level2: stats.level(Level::Two).snapshot(),
            level3: stats.level(Level::Three).snapshot(),
            spawns: stats.spawns.snapshot(),
            wakes: stats.wakes.snapshot(),
            wake_lists: stats.wake_lists.snapshot(),
            wake_list_wakes: stats.wake_list_wakes.load(),
            wake_list_invokes: stats.wake_list_invokes.load(),
            invokes: stats.invokes.snapshot(),
            blocking_invokes: stats.blocking_invokes.load(),
            flushes: stats.flushes.snapshot(),
            skew: stats.skew.snapshot(),
            catchups: stats.catchups.load(),
            caught_up_ticks: stats.caught_up_ticks.load(),
            pid_switches: stats.pid_switches.load(),
            task_errors: stats.task_errors.load(),
            task_panics: stats.task_panics.load(),
            invoke_panics: stats.invoke_panics.load(),
            delays_clamped: stats.delays_clamped.load(),
            rejected: stats.rejected.load(),
        }
    }

    /// Fraction of each tick spent processing it
    pub fn tick_cpu(&self) -> f64 {
        if self.tick_duration.is_zero() {
            return 0.0;
        }
        self.ticks.average().as_secs_f64() / self.tick_duration.as_secs_f64()
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reactor             {}", self.name)?;
        writeln!(f, "Size                {}", self.size)?;
        match self.processor {
            Some(cpu) => writeln!(f, "Processor           {}", cpu)?,
            None => writeln!(f, "Processor           -")?,
        }
        writeln!(f, "Processor Switches  {}", self.pid_switches)?;
        writeln!(f, "Ticks               {}", self.current_tick)?;
        writeln!(f, "Tick Avg Dur        {:?}", self.ticks.average())?;
        writeln!(f, "Tick CPU            {:.6}", self.tick_cpu())?;
        writeln!(f, "Min                 {:?}", self.ticks.min)?;
        writeln!(f, "Max                 {:?}", self.ticks.max)?;
        writeln!(
            f,
            "Skew                {} ({:?})",
            self.skew.count, self.skew.total
        )?;
        writeln!(
            f,
            "Catch-ups           {} ({} ticks)",
            self.catchups, self.caught_up_ticks
        )?;
        for (label, level) in [("L1", &self.level1), ("L2", &self.level2), ("L3", &self.level3)] {
            writeln!(
                f,
                "{}                  {} avg {:?} max {:?}",
                label,
                level.count,
                level.average(),
                level.max
            )?;
        }
        writeln!(f, "Spawns              {}", self.spawns.count)?;
        writeln!(f, "Wakes               {}", self.wakes.count)?;
        writeln!(
            f,
            "Wake Lists          {} ({} wakes, {} invokes)",
            self.wake_lists.count, self.wake_list_wakes, self.wake_list_invokes
        )?;
        writeln!(
            f,
            "Invokes             {} (+{} blocking)",
            self.invokes.count, self.blocking_invokes
        )?;
        writeln!(f, "Task Errors         {}", self.task_errors)?;
        writeln!(f, "Task Panics         {}", self.task_panics)?;
        writeln!(f, "Delays Clamped      {}", self.delays_clamped)?;
        write!(f, "Rejected            {}", self.rejected)
    }
}

fn nanos<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_nanos().min(u64::MAX as u128) as u64)
}
