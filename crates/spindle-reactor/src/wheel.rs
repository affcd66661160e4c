//! Hierarchical timing wheel
//!
//! Three fixed-resolution rings. Level 1 advances on every reactor tick;
//! level 2 and level 3 advance on every Nth and Mth level-1 tick, where N and
//! M are the exact tick ratios checked by `ReactorConfig::validate`.
//!
//! Times are nanoseconds since the reactor epoch. Tick `n` of a level is the
//! instant `n * tick` and each ring stores entries at most one revolution
//! ahead of its cursor, so a slot only ever holds entries for the next time
//! the cursor reaches it.
//!
//! Level 1 rounds deadlines up, so its entries never expire early. The coarse
//! levels round down: an entry expiring there with its deadline still ahead
//! is cascaded by re-inserting it, which lands it in a finer wheel. Each
//! wheel's span covers the next level's tick, so a cascade always fits and
//! nothing fires more than one level-1 tick late.
//!
//! Expiring a slot swaps its entry list with a spare buffer. The caller owns
//! the expired list while it runs task logic, and anything rescheduled during
//! that run (including into the very same slot) lands in the fresh buffer.

use crate::config::{span, ReactorConfig, WheelConfig};
use crate::pool::SlotKey;
use std::time::Duration;

/// Wheel level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Finest resolution, advanced every tick
    One,
    /// Medium resolution
    Two,
    /// Coarse resolution
    Three,
}

impl Level {
    /// All levels, finest first
    pub const ALL: [Level; 3] = [Level::One, Level::Two, Level::Three];

    fn index(self) -> usize {
        match self {
            Level::One => 0,
            Level::Two => 1,
            Level::Three => 2,
        }
    }
}

/// What an entry does when its slot expires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// One-shot wake
    Wake,
    /// Recurring interval registered at this cadence
    Interval(Duration),
}

/// A scheduled task reference inside a wheel slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Arena slot and identity of the task
    pub key: SlotKey,
    /// Requested expiry, nanoseconds since the reactor epoch
    pub deadline: i64,
    /// Wake or interval
    pub kind: EntryKind,
    /// Membership sequence; a mismatch with the task's record marks the entry stale
    pub seq: u64,
}

/// Where an entry was placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Wheel level
    pub level: Level,
    /// Slot index within that wheel
    pub slot: usize,
    /// The deadline did not fit any wheel and was clamped into the coarsest
    pub clamped: bool,
}

/// A single fixed-resolution ring of slots
#[derive(Debug)]
pub struct Wheel {
    tick: Duration,
    tick_nanos: i64,
    slots: Vec<Vec<Entry>>,
    spare: Vec<Entry>,
    cursor: u64,
    len: usize,
    round_up: bool,
}

impl Wheel {
    /// Create an empty wheel. `round_up` places deadlines at the first tick at or after them.
    pub fn new(config: WheelConfig, round_up: bool) -> Self {
        let slots = config.slots.max(1);
        Self {
            tick: config.tick,
            tick_nanos: (config.tick.as_nanos() as i64).max(1),
            slots: (0..slots).map(|_| Vec::new()).collect(),
            spare: Vec::new(),
            cursor: 0,
            len: 0,
            round_up,
        }
    }

    /// Duration of one slot
    pub fn tick_duration(&self) -> Duration {
        self.tick
    }

    /// Number of slots
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Largest delay this wheel can hold
    pub fn max_delay(&self) -> Duration {
        span(self.tick, self.slots.len())
    }

    /// Last tick processed at this level
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Number of entries held
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no entries are held
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Tick at which `deadline` expires, never earlier than the next tick
    fn target_tick(&self, deadline: i64) -> u64 {
        let deadline = deadline.max(0);
        let tick = if self.round_up {
            (deadline + self.tick_nanos - 1) / self.tick_nanos
        } else {
            deadline / self.tick_nanos
        };
        (tick as u64).max(self.cursor + 1)
    }

    /// Slot for `deadline` if it is within one revolution of the cursor
    fn slot_for(&self, deadline: i64) -> Option<usize> {
        let target = self.target_tick(deadline);
        let slots = self.slots.len() as u64;
        if target - self.cursor <= slots {
            Some((target % slots) as usize)
        } else {
            None
        }
    }

    /// Slot furthest from the cursor
    fn last_slot(&self) -> usize {
        let slots = self.slots.len() as u64;
        ((self.cursor + slots) % slots) as usize
    }

    fn push(&mut self, slot: usize, entry: Entry) {
        self.slots[slot].push(entry);
        self.len += 1;
    }

    /// Remove a specific entry. Returns false if it was not in the slot.
    fn remove(&mut self, slot: usize, key: SlotKey, seq: u64) -> bool {
        let entries = &mut self.slots[slot];
        match entries.iter().position(|e| e.key == key && e.seq == seq) {
            Some(pos) => {
                entries.remove(pos);
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    /// Move the cursor one tick and take the entries of the slot it lands on
    fn advance(&mut self) -> Vec<Entry> {
        self.cursor += 1;
        let slot = (self.cursor % self.slots.len() as u64) as usize;
        let expired = std::mem::replace(&mut self.slots[slot], std::mem::take(&mut self.spare));
        self.len -= expired.len();
        expired
    }

    /// Return an expired list so its allocation backs the next expiry
    fn recycle(&mut self, mut buffer: Vec<Entry>) {
        buffer.clear();
        if buffer.capacity() > self.spare.capacity() {
            self.spare = buffer;
        }
    }

    #[cfg(test)]
    fn count(&self, key: SlotKey) -> usize {
        self.slots
            .iter()
            .flat_map(|s| s.iter())
            .filter(|e| e.key == key)
            .count()
    }
}

/// The three cascading wheels
#[derive(Debug)]
pub struct WheelSet {
    levels: [Wheel; 3],
    ticks_per_level2: u64,
    ticks_per_level3: u64,
}

impl WheelSet {
    /// Build the wheels from a validated config
    pub fn new(config: &ReactorConfig) -> Self {
        Self {
            levels: [
                Wheel::new(config.level1, true),
                Wheel::new(config.level2, false),
                Wheel::new(config.level3, false),
            ],
            ticks_per_level2: config.ticks_per_level2().max(1),
            ticks_per_level3: config.ticks_per_level3().max(1),
        }
    }

    /// Access one wheel
    pub fn wheel(&self, level: Level) -> &Wheel {
        &self.levels[level.index()]
    }

    /// Level-1 ticks per level-2 tick
    pub fn ticks_per_level2(&self) -> u64 {
        self.ticks_per_level2
    }

    /// Level-1 ticks per level-3 tick
    pub fn ticks_per_level3(&self) -> u64 {
        self.ticks_per_level3
    }

    /// Largest delay any wheel can hold
    pub fn max_delay(&self) -> Duration {
        self.levels
            .iter()
            .map(Wheel::max_delay)
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Total entries across all wheels
    pub fn len(&self) -> usize {
        self.levels.iter().map(Wheel::len).sum()
    }

    /// Whether all wheels are empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time of level-1 tick `tick`, nanoseconds since the epoch
    pub fn tick_time(&self, tick: u64) -> i64 {
        (tick as i64).saturating_mul(self.levels[0].tick_nanos)
    }

    /// Which levels advance on level-1 tick `tick`
    pub fn levels_for_tick(&self, tick: u64) -> impl Iterator<Item = Level> {
        let two = tick % self.ticks_per_level2 == 0;
        let three = tick % self.ticks_per_level3 == 0;
        [Some(Level::One), two.then_some(Level::Two), three.then_some(Level::Three)]
            .into_iter()
            .flatten()
    }

    /// Choose the finest wheel that can hold `deadline`
    pub fn place(&self, deadline: i64) -> Placement {
        for level in Level::ALL {
            if let Some(slot) = self.wheel(level).slot_for(deadline) {
                return Placement {
                    level,
                    slot,
                    clamped: false,
                };
            }
        }
        Placement {
            level: Level::Three,
            slot: self.wheel(Level::Three).last_slot(),
            clamped: true,
        }
    }

    /// Insert an entry at the placement its deadline maps to
    pub fn insert(&mut self, entry: Entry) -> Placement {
        let placement = self.place(entry.deadline);
        self.levels[placement.level.index()].push(placement.slot, entry);
        placement
    }

    /// Detach an entry from the slot it was placed in
    pub fn remove(&mut self, level: Level, slot: usize, key: SlotKey, seq: u64) -> bool {
        self.levels[level.index()].remove(slot, key, seq)
    }

    /// Advance one level by a tick, taking the expired slot's entries
    pub fn advance(&mut self, level: Level) -> Vec<Entry> {
        self.levels[level.index()].advance()
    }

    /// Hand an expired list back to its wheel
    pub fn recycle(&mut self, level: Level, buffer: Vec<Entry>) {
        self.levels[level.index()].recycle(buffer);
    }

    /// Number of entries held for `key` across all wheels
    #[cfg(test)]
    pub(crate) fn count(&self, key: SlotKey) -> usize {
        self.levels.iter().map(|w| w.count(key)).sum()
    }
}
