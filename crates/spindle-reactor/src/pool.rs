//! Slot arena for task state owned by the reactor thread.
//!
//! When a task stops, its slot index goes onto a free list and the next
//! spawned task reuses it. Wheel entries refer to tasks by [`SlotKey`], which
//! pairs the index with the task ID so an entry left behind by a previous
//! occupant never resolves to the new one.

use crate::task::{Capabilities, Pollable, TaskHandle, TaskId};
use crate::wheel::{EntryKind, Level};
use std::time::Duration;

/// Arena index plus the identity of the task expected there
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    /// Arena index
    pub index: usize,
    /// Expected occupant
    pub id: TaskId,
}

/// Where a task currently sits in the wheels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Membership {
    pub level: Level,
    pub slot: usize,
    pub seq: u64,
}

/// Reactor-side state of one task
pub(crate) struct TaskSlot {
    pub handle: TaskHandle,
    pub logic: Box<dyn Pollable>,
    pub caps: Capabilities,
    /// Recurring interval; zero when not recurring
    pub interval: Duration,
    /// Pending one-shot wake
    pub wake: Option<Membership>,
    /// Pending recurring interval
    pub recurring: Option<Membership>,
    /// Last membership sequence handed out
    pub seq: u64,
}

impl TaskSlot {
    pub fn new(
        handle: TaskHandle,
        logic: Box<dyn Pollable>,
        caps: Capabilities,
        interval: Duration,
    ) -> Self {
        Self {
            handle,
            logic,
            caps,
            interval,
            wake: None,
            recurring: None,
            seq: 0,
        }
    }

    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Membership record for entries of `kind`
    pub fn membership(&mut self, kind: EntryKind) -> &mut Option<Membership> {
        match kind {
            EntryKind::Wake => &mut self.wake,
            EntryKind::Interval(_) => &mut self.recurring,
        }
    }
}

/// Arena of task slots with index reuse
pub(crate) struct TaskPool {
    slots: Vec<Option<TaskSlot>>,
    free: Vec<usize>,
    len: usize,
}

impl TaskPool {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Store a freshly reset slot, reusing a freed index when one exists
    pub fn acquire(&mut self, slot: TaskSlot) -> SlotKey {
        let id = slot.handle.id();
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.len += 1;
        SlotKey { index, id }
    }

    /// Take the slot out of the arena and free its index
    pub fn release(&mut self, key: SlotKey) -> Option<TaskSlot> {
        self.get(key)?;
        let slot = self.slots[key.index].take();
        self.free.push(key.index);
        self.len -= 1;
        slot
    }

    pub fn get(&self, key: SlotKey) -> Option<&TaskSlot> {
        self.slots
            .get(key.index)?
            .as_ref()
            .filter(|slot| slot.handle.id() == key.id)
    }

    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut TaskSlot> {
        self.slots
            .get_mut(key.index)?
            .as_mut()
            .filter(|slot| slot.handle.id() == key.id)
    }

    /// Keys of every occupied slot
    pub fn keys(&self) -> Vec<SlotKey> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref().map(|s| SlotKey {
                    index,
                    id: s.handle.id(),
                })
            })
            .collect()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.len
    }

    /// Total slots allocated, occupied or free
    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
