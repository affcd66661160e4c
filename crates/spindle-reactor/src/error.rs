//! Error types for the reactor, its configuration, and task logic

use std::time::Duration;

/// Boxed error type carried by [`PollError::Failed`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned synchronously by reactor submission APIs
#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    /// Bounded submission queue is at capacity (backpressure)
    #[error("queue full")]
    QueueFull,

    /// Bounded enqueue did not succeed within the allowed wait
    #[error("invoke timed out after {0:?}")]
    InvokeTimeout(Duration),

    /// Task has already stopped and can no longer be scheduled
    #[error("task {0} is not scheduled")]
    NotScheduled(u64),

    /// Task's owning reactor no longer exists
    #[error("task {0} has no owning reactor")]
    Orphaned(u64),

    /// Requested delay exceeds the span of every wheel
    #[error("delay {delay:?} exceeds maximum representable delay {max:?}")]
    DelayOutOfRange {
        /// Requested delay
        delay: Duration,
        /// Largest delay the coarsest wheel can hold
        max: Duration,
    },

    /// Reactor has been shut down
    #[error("reactor is shut down")]
    ShutDown,

    /// Worker pool rejected the job
    #[error("worker pool unavailable: {0}")]
    WorkerPool(String),

    /// Reactor thread could not be spawned
    #[error("failed to spawn reactor thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration errors, raised once at construction
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Wheel tick duration is zero
    #[error("{level} wheel tick must be non-zero")]
    ZeroTick {
        /// Wheel level name
        level: &'static str,
    },

    /// Wheel has no slots
    #[error("{level} wheel must have at least one slot")]
    ZeroSlots {
        /// Wheel level name
        level: &'static str,
    },

    /// Coarse tick is not an exact multiple of the level-1 tick
    #[error("{level} tick not evenly divisible by level 1 tick: {tick:?} mod {base:?} = {remainder:?}")]
    NotDivisible {
        /// Wheel level name
        level: &'static str,
        /// Coarse tick duration
        tick: Duration,
        /// Level-1 tick duration
        base: Duration,
        /// Non-zero remainder
        remainder: Duration,
    },

    /// Wheel span is shorter than the next level's tick
    #[error("{level} span {span:?} shorter than {next} tick {tick:?}")]
    SpanTooShort {
        /// Wheel level name
        level: &'static str,
        /// Ticks times slots of that wheel
        span: Duration,
        /// Next coarser level name
        next: &'static str,
        /// Tick duration of the coarser level
        tick: Duration,
    },

    /// Config file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be serialized
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Error returned by task poll logic
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// Stop sentinel: orderly termination requested by the task
    #[error("stop")]
    Stop,

    /// Ordinary failure; reported, the task keeps running
    #[error("task failed: {0}")]
    Failed(#[source] BoxError),

    /// Task logic panicked; produced by the reactor's panic boundary
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl PollError {
    /// Wrap an arbitrary error as a non-fatal failure
    pub fn failed<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        PollError::Failed(err.into())
    }

    /// Whether this is the stop sentinel
    pub fn is_stop(&self) -> bool {
        matches!(self, PollError::Stop)
    }
}

impl From<ReactorError> for PollError {
    fn from(err: ReactorError) -> Self {
        PollError::Failed(Box::new(err))
    }
}

/// Why a task stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Task logic called `Context::stop` or returned [`PollError::Stop`]
    Requested,
    /// Task logic panicked
    Panicked(String),
    /// Reactor shut down while the task was active
    Shutdown,
}

/// Reactor result alias
pub type Result<T> = std::result::Result<T, ReactorError>;

/// Render a caught panic payload as a message
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
