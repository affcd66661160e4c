//! Registry of live reactors
//!
//! Passed to `ReactorBuilder::registry` so that a group of reactors can find
//! each other. Reactors hold only a weak link back; dropping the registry
//! does not affect running reactors.

use crate::reactor::{Reactor, Shared};
use crate::task::TaskHandle;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Unique identifier for a reactor
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReactorId(u64);

static NEXT_REACTOR_ID: AtomicU64 = AtomicU64::new(1);

impl ReactorId {
    /// Generate a new unique ReactorId
    pub(crate) fn next() -> Self {
        ReactorId(NEXT_REACTOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReactorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lookup service for a group of reactors
#[derive(Default)]
pub struct ReactorRegistry {
    reactors: DashMap<ReactorId, Weak<Shared>>,
}

impl ReactorRegistry {
    /// Create an empty registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn register(&self, id: ReactorId, shared: &Arc<Shared>) {
        self.reactors.insert(id, Arc::downgrade(shared));
    }

    pub(crate) fn deregister(&self, id: ReactorId) {
        self.reactors.remove(&id);
    }

    /// Look up a reactor by ID
    pub fn get(&self, id: ReactorId) -> Option<Reactor> {
        let shared = self.reactors.get(&id)?.upgrade();
        match shared {
            Some(shared) => Some(Reactor::from_shared(shared)),
            None => {
                self.reactors.remove(&id);
                None
            }
        }
    }

    /// Reactor owning `task`, if it is registered here
    pub fn route(&self, task: &TaskHandle) -> Option<Reactor> {
        let owner = task.reactor()?;
        self.reactors.contains_key(&owner.id()).then_some(owner)
    }

    /// All live registered reactors, ordered by ID
    pub fn reactors(&self) -> Vec<Reactor> {
        let mut out: Vec<Reactor> = self
            .reactors
            .iter()
            .filter_map(|entry| entry.value().upgrade().map(Reactor::from_shared))
            .collect();
        out.sort_by_key(|r| r.id());
        out
    }

    /// Number of registered reactors
    pub fn len(&self) -> usize {
        self.reactors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reactors.is_empty()
    }
}

impl fmt::Debug for ReactorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorRegistry")
            .field("reactors", &self.reactors.len())
            .finish()
    }
}
