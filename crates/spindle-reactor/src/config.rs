//! Reactor configuration
//!
//! Supplied once at construction. Durations are written to and read from
//! TOML as integer milliseconds:
//!
//! ```toml
//! name = "orders"
//! pin_thread = true
//!
//! [level1]
//! tick_ms = 10
//! slots = 256
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default capacity of the invoke queue
pub const DEFAULT_INVOKE_QUEUE_SIZE: usize = 1024;
/// Default capacity of the wake and wake-list queues
pub const DEFAULT_WAKE_QUEUE_SIZE: usize = 1024;
/// Default capacity of the spawn queue
pub const DEFAULT_SPAWN_QUEUE_SIZE: usize = 1024;
/// Default bound on how long `Reactor::invoke` waits for queue space
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Queue sizes at or below this fall back to the defaults
const MIN_QUEUE_SIZE: usize = 4;

/// Definition of one timing wheel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelConfig {
    /// Duration of one slot
    #[serde(rename = "tick_ms", with = "millis")]
    pub tick: Duration,
    /// Number of slots in the ring
    pub slots: usize,
}

impl WheelConfig {
    /// Create a wheel definition
    pub const fn new(tick: Duration, slots: usize) -> Self {
        Self { tick, slots }
    }

    /// 10ms × 256 slots (2.56s span)
    pub const fn fine() -> Self {
        Self::new(Duration::from_millis(10), 256)
    }

    /// 250ms × 256 slots (64s span)
    pub const fn medium() -> Self {
        Self::new(Duration::from_millis(250), 256)
    }

    /// 4s × 1024 slots (~68 minute span)
    pub const fn coarse() -> Self {
        Self::new(Duration::from_secs(4), 1024)
    }

    /// Largest delay the wheel can hold
    pub fn max_delay(&self) -> Duration {
        span(self.tick, self.slots)
    }
}

/// `tick * slots`, saturating at the largest representable span
pub(crate) fn span(tick: Duration, slots: usize) -> Duration {
    let nanos = tick.as_nanos().saturating_mul(slots as u128);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Reactor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
    /// Cosmetic name, also used for the reactor thread name
    pub name: String,
    /// Finest wheel; its tick is the reactor tick
    pub level1: WheelConfig,
    /// Medium wheel; tick must be a multiple of the level-1 tick
    pub level2: WheelConfig,
    /// Coarse wheel; tick must be a multiple of the level-1 tick
    pub level3: WheelConfig,
    /// Invoke queue capacity (rounded up to a power of two)
    pub invoke_queue_size: usize,
    /// Wake and wake-list queue capacity (rounded up to a power of two)
    pub wake_queue_size: usize,
    /// Spawn queue capacity (rounded up to a power of two)
    pub spawn_queue_size: usize,
    /// Pin the reactor thread to the CPU it starts on
    pub pin_thread: bool,
    /// Worker pool size for `spawn_worker_fn` (0 = number of CPUs)
    pub worker_threads: usize,
    /// Bound on how long `invoke` waits for queue space
    #[serde(rename = "invoke_timeout_ms", with = "millis")]
    pub invoke_timeout: Duration,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            name: "reactor".to_string(),
            level1: WheelConfig::fine(),
            level2: WheelConfig::medium(),
            level3: WheelConfig::coarse(),
            invoke_queue_size: DEFAULT_INVOKE_QUEUE_SIZE,
            wake_queue_size: DEFAULT_WAKE_QUEUE_SIZE,
            spawn_queue_size: DEFAULT_SPAWN_QUEUE_SIZE,
            pin_thread: false,
            worker_threads: 0,
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
        }
    }
}

impl ReactorConfig {
    /// Create a default config with the given name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parse a config from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a config from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Render the config as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply defaults and power-of-two rounding, then check wheel geometry.
    ///
    /// Fails without side effects when a tick is zero, a wheel has no slots,
    /// a coarse tick is not an exact multiple of the level-1 tick, or a
    /// wheel's span is shorter than the next level's tick.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.name.is_empty() {
            self.name = "reactor".to_string();
        }
        self.invoke_queue_size = normalize_queue_size(self.invoke_queue_size, DEFAULT_INVOKE_QUEUE_SIZE);
        self.wake_queue_size = normalize_queue_size(self.wake_queue_size, DEFAULT_WAKE_QUEUE_SIZE);
        self.spawn_queue_size = normalize_queue_size(self.spawn_queue_size, DEFAULT_SPAWN_QUEUE_SIZE);
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get().max(1);
        }

        for (level, wheel) in [
            ("level 1", &self.level1),
            ("level 2", &self.level2),
            ("level 3", &self.level3),
        ] {
            if wheel.tick.is_zero() {
                return Err(ConfigError::ZeroTick { level });
            }
            if wheel.slots == 0 {
                return Err(ConfigError::ZeroSlots { level });
            }
        }

        let base = self.level1.tick.as_nanos();
        for (level, wheel) in [("level 2", &self.level2), ("level 3", &self.level3)] {
            let remainder = wheel.tick.as_nanos() % base;
            if remainder != 0 {
                return Err(ConfigError::NotDivisible {
                    level,
                    tick: wheel.tick,
                    base: self.level1.tick,
                    remainder: Duration::from_nanos(remainder as u64),
                });
            }
        }

        // Cascaded entries must fit the finer wheel they drop into
        for (level, wheel, next, coarser) in [
            ("level 1", &self.level1, "level 2", &self.level2),
            ("level 2", &self.level2, "level 3", &self.level3),
        ] {
            if wheel.max_delay() < coarser.tick {
                return Err(ConfigError::SpanTooShort {
                    level,
                    span: wheel.max_delay(),
                    next,
                    tick: coarser.tick,
                });
            }
        }

        Ok(self)
    }

    /// Level-1 ticks per level-2 tick
    pub fn ticks_per_level2(&self) -> u64 {
        (self.level2.tick.as_nanos() / self.level1.tick.as_nanos()) as u64
    }

    /// Level-1 ticks per level-3 tick
    pub fn ticks_per_level3(&self) -> u64 {
        (self.level3.tick.as_nanos() / self.level1.tick.as_nanos()) as u64
    }

    /// Largest delay any of the three wheels can hold
    pub fn max_delay(&self) -> Duration {
        self.level1
            .max_delay()
            .max(self.level2.max_delay())
            .max(self.level3.max_delay())
    }
}

fn normalize_queue_size(size: usize, default: usize) -> usize {
    let size = if size <= MIN_QUEUE_SIZE { default } else { size };
    size.next_power_of_two()
}

/// Serialize a `Duration` as integer milliseconds
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_wheels(l1: u64, l2: u64, l3: u64) -> ReactorConfig {
        ReactorConfig {
            level1: WheelConfig::new(Duration::from_millis(l1), 32),
            level2: WheelConfig::new(Duration::from_millis(l2), 16),
            level3: WheelConfig::new(Duration::from_millis(l3), 64),
            ..ReactorConfig::default()
        }
    }

    #[test]
    fn test_default_presets_validate() {
        let config = ReactorConfig::default().validate().unwrap();
        assert_eq!(config.ticks_per_level2(), 25);
        assert_eq!(config.ticks_per_level3(), 400);
        assert_eq!(config.max_delay(), Duration::from_secs(4 * 1024));
    }

    #[test]
    fn test_divisible_wheels_accepted() {
        let config = with_wheels(10, 250, 4000).validate().unwrap();
        assert_eq!(config.ticks_per_level2(), 25);
        assert_eq!(config.ticks_per_level3(), 400);

        let config = with_wheels(10, 300, 4000).validate().unwrap();
        assert_eq!(config.ticks_per_level2(), 30);
    }

    #[test]
    fn test_non_divisible_level2_rejected() {
        let err = with_wheels(10, 25, 4000).validate().unwrap_err();
        match err {
            ConfigError::NotDivisible { level, remainder, .. } => {
                assert_eq!(level, "level 2");
                assert_eq!(remainder, Duration::from_millis(5));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_divisible_level3_rejected() {
        let err = with_wheels(10, 250, 4005).validate().unwrap_err();
        assert!(matches!(err, ConfigError::NotDivisible { level: "level 3", .. }));
    }

    #[test]
    fn test_short_span_rejected() {
        let mut config = with_wheels(10, 250, 4000);
        config.level1.slots = 10;
        match config.validate().unwrap_err() {
            ConfigError::SpanTooShort { level, span, next, tick } => {
                assert_eq!((level, next), ("level 1", "level 2"));
                assert_eq!(span, Duration::from_millis(100));
                assert_eq!(tick, Duration::from_millis(250));
            }
            other => panic!("unexpected error: {other}"),
        }

        let mut config = with_wheels(10, 250, 4000);
        config.level2.slots = 15;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SpanTooShort { level: "level 2", .. })
        ));

        // a span exactly one coarse tick long is enough
        let mut config = with_wheels(10, 250, 4000);
        config.level1.slots = 25;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_span_does_not_truncate_slot_count() {
        let slots = (u32::MAX as usize).saturating_add(2);
        let wheel = WheelConfig::new(Duration::from_nanos(1), slots);
        assert_eq!(wheel.max_delay(), Duration::from_nanos(slots as u64));

        let wheel = WheelConfig::new(Duration::from_secs(u64::MAX), 2);
        assert_eq!(wheel.max_delay(), Duration::from_nanos(u64::MAX));
    }

    #[test]
    fn test_zero_tick_and_slots_rejected() {
        let mut config = ReactorConfig::default();
        config.level1.tick = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTick { level: "level 1" })));

        let mut config = ReactorConfig::default();
        config.level3.slots = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroSlots { level: "level 3" })));
    }

    #[test]
    fn test_queue_sizes_rounded() {
        let config = ReactorConfig {
            invoke_queue_size: 1000,
            wake_queue_size: 3,
            spawn_queue_size: 1025,
            ..ReactorConfig::default()
        }
        .validate()
        .unwrap();
        assert_eq!(config.invoke_queue_size, 1024);
        assert_eq!(config.wake_queue_size, DEFAULT_WAKE_QUEUE_SIZE);
        assert_eq!(config.spawn_queue_size, 2048);
        assert!(config.worker_threads >= 1);
    }

    #[test]
    fn test_empty_name_defaulted() {
        let config = ReactorConfig::named("").validate().unwrap();
        assert_eq!(config.name, "reactor");
    }

    #[test]
    fn test_toml_round_trip_uses_millis() {
        let config = ReactorConfig::named("orders");
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("tick_ms = 10"));
        assert!(text.contains("invoke_timeout_ms = 5000"));
        assert_eq!(ReactorConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = ReactorConfig::from_toml_str(
            r#"
            name = "edge"
            pin_thread = true

            [level2]
            tick_ms = 300
            slots = 128
            "#,
        )
        .unwrap();
        assert_eq!(config.name, "edge");
        assert!(config.pin_thread);
        assert_eq!(config.level1, WheelConfig::fine());
        assert_eq!(config.level2, WheelConfig::new(Duration::from_millis(300), 128));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reactor.toml");
        std::fs::write(&path, "name = \"disk\"\nwake_queue_size = 64\n").unwrap();
        let config = ReactorConfig::load(&path).unwrap();
        assert_eq!(config.name, "disk");
        assert_eq!(config.wake_queue_size, 64);

        assert!(matches!(
            ReactorConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
