//! Bounded multi-producer queues paired with a shared wake signal
//!
//! Every successful enqueue nudges the reactor through a single shared
//! [`WakeSignal`]. The signal channel holds at most one pending wake, so a
//! burst of producers costs the reactor one wake-up, not one per item.

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::queue::ArrayQueue;
use crossbeam::utils::Backoff;
use std::thread;
use std::time::{Duration, Instant};

/// Coalescing wake signal shared by all queues of one reactor
#[derive(Debug, Clone)]
pub struct WakeSignal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl WakeSignal {
    /// Create a signal holding at most one pending wake
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(1);
        Self { tx, rx }
    }

    /// Request a wake-up; coalesces with any wake already pending
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }

    /// Receiving side, waited on by the reactor thread
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock-free bounded MPMC queue that signals the reactor on enqueue
pub struct BoundedWake<T> {
    queue: ArrayQueue<T>,
    signal: WakeSignal,
}

impl<T> BoundedWake<T> {
    /// Create a queue; capacity is rounded up to a power of two
    pub fn new(capacity: usize, signal: WakeSignal) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1).next_power_of_two()),
            signal,
        }
    }

    /// Enqueue without blocking. On a full queue the item is handed back.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        self.queue.push(item)?;
        self.signal.notify();
        Ok(())
    }

    /// Enqueue, retrying with backoff until space frees up or `timeout` elapses
    pub fn enqueue_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        let mut item = item;
        loop {
            match self.queue.push(item) {
                Ok(()) => {
                    self.signal.notify();
                    return Ok(());
                }
                Err(rejected) => item = rejected,
            }
            if Instant::now() >= deadline {
                return Err(item);
            }
            // Make sure a stalled consumer hears about the pending item
            self.signal.notify();
            if backoff.is_completed() {
                thread::sleep(Duration::from_micros(50));
            } else {
                backoff.snooze();
            }
        }
    }

    /// Pop up to `max` items, handing each to `f`. Returns the number popped.
    pub fn dequeue_many(&self, max: usize, mut f: impl FnMut(T)) -> usize {
        let mut count = 0;
        while count < max {
            match self.queue.pop() {
                Some(item) => {
                    f(item);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Whether the queue currently holds no items
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Fixed capacity
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}
