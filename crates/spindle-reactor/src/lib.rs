//! Spindle Reactor
//!
//! A single-threaded task reactor. Each [`Reactor`] owns one thread that polls
//! a set of tasks, driven by:
//! - **Timing wheels**: three cascading rings (`wheel` module) resolving
//!   delayed wakes and recurring intervals at level-1 tick resolution
//! - **Wake queues**: four bounded queues plus a blocking-invoke channel
//!   (`queue` module), drained in fixed order after every tick
//! - **Tasks**: user logic behind the [`Pollable`] trait, addressed from other
//!   threads through [`TaskHandle`]s (`task` module)
//! - **Stats**: per-level and per-queue counters (`stats` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use spindle_reactor::{poll_fn, Reactor, ReactorConfig, Reason};
//! use std::time::Duration;
//!
//! let reactor = Reactor::new(ReactorConfig::named("io"))?;
//! reactor.start()?;
//!
//! let task = reactor.spawn_interval(
//!     poll_fn(|cx| {
//!         if cx.reason() == Reason::Interval {
//!             println!("tick at {}ns", cx.now());
//!         }
//!         Ok(())
//!     }),
//!     Duration::from_millis(100),
//! )?;
//!
//! task.wake_after(Duration::from_millis(50))?;
//! reactor.shutdown();
//! ```

#![warn(rust_2018_idioms)]
#![allow(clippy::new_without_default)]
#![allow(clippy::len_without_is_empty)]

// ============================================================================
// Core Modules
// ============================================================================

/// Reactor handle, builder, and the reactor-thread driver
pub mod reactor;

/// Hierarchical timing wheel
pub mod wheel;

/// Task handles, poll context, and task capabilities
pub mod task;

/// Bounded wake queues and the coalescing wake signal
pub mod queue;

/// Batched wakes
pub mod wake_list;

// ============================================================================
// Support Modules
// ============================================================================

/// CPU pinning and processor sampling
pub mod affinity;

/// Clock sources
pub mod clock;

/// Reactor and wheel configuration
pub mod config;

/// Error types
pub mod error;

/// Observer hooks
pub mod hooks;

/// Task slot arena
pub mod pool;

/// Registry of live reactors
pub mod registry;

/// Statistics
pub mod stats;

/// Worker pool for off-reactor work
pub mod worker;

// ============================================================================
// Re-exports
// ============================================================================

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ReactorConfig, WheelConfig};
pub use error::{BoxError, ConfigError, PollError, ReactorError, Result, StopReason};
pub use hooks::{Hooks, NoopHooks, SkewEvent};
pub use pool::SlotKey;
pub use reactor::{Reactor, ReactorBuilder};
pub use registry::{ReactorId, ReactorRegistry};
pub use stats::{StatsSnapshot, TimingSnapshot};
pub use task::{
    poll_fn, CloseEvent, Closable, Context, PollFn, Pollable, Reason, TaskAware, TaskHandle,
    TaskId, TaskState,
};
pub use wake_list::WakeList;
pub use wheel::{Entry, EntryKind, Level, Placement, WheelSet};
