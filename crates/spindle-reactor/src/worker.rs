//! Worker pool for blocking or CPU-heavy work submitted through `Reactor::spawn_worker_fn`
//!
//! Threads are started lazily on the first submission and share one
//! unbounded crossbeam channel.

use crate::error::{panic_message, ReactorError, Result};
use crossbeam::channel::{self, Receiver, Sender};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Workers {
    tx: Mutex<Option<Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Fixed-size pool of named worker threads
pub struct WorkerPool {
    name: String,
    size: usize,
    workers: OnceCell<Workers>,
    shutdown: AtomicBool,
    panics: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Create a pool of `size` threads; nothing is spawned until the first job
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size: size.max(1),
            workers: OnceCell::new(),
            shutdown: AtomicBool::new(false),
            panics: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs that panicked
    pub fn panics(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }

    /// Queue a job. Fails once the pool has been shut down.
    pub fn submit(&self, job: Job) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(ReactorError::WorkerPool("pool is shut down".to_string()));
        }
        let workers = self.workers.get_or_try_init(|| self.spawn())?;
        let tx = workers.tx.lock();
        match tx.as_ref() {
            Some(tx) => tx
                .send(job)
                .map_err(|_| ReactorError::WorkerPool("workers exited".to_string())),
            None => Err(ReactorError::WorkerPool("pool is shut down".to_string())),
        }
    }

    fn spawn(&self) -> Result<Workers> {
        let (tx, rx) = channel::unbounded::<Job>();
        let mut handles = Vec::with_capacity(self.size);
        for id in 0..self.size {
            let rx = rx.clone();
            let panics = self.panics.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-worker-{}", self.name, id))
                .spawn(move || Self::run_loop(id, rx, panics))?;
            handles.push(handle);
        }
        tracing::debug!(pool = %self.name, size = self.size, "worker pool started");
        Ok(Workers {
            tx: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
        })
    }

    fn run_loop(id: usize, rx: Receiver<Job>, panics: Arc<AtomicU64>) {
        while let Ok(job) = rx.recv() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                panics.fetch_add(1, Ordering::Relaxed);
                tracing::error!(worker = id, panic = %panic_message(payload), "worker job panicked");
            }
        }
    }

    /// Close the channel and join the threads, detaching any that outlive `timeout`
    pub fn shutdown(&self, timeout: Duration) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(workers) = self.workers.get() else {
            return;
        };
        workers.tx.lock().take();
        let deadline = Instant::now() + timeout;
        for handle in workers.handles.lock().drain(..) {
            join_with_timeout(handle, deadline.saturating_duration_since(Instant::now()));
        }
    }
}

/// Join a thread with timeout, detach if stuck.
pub(crate) fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        if handle.is_finished() {
            let _ = handle.join();
            return true;
        }
        if start.elapsed() > timeout {
            drop(handle);
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_jobs_run_off_thread() {
        let pool = WorkerPool::new("test", 2);
        let caller = thread::current().id();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let ran = ran.clone();
            pool.submit(Box::new(move || {
                assert_ne!(thread::current().id(), caller);
                ran.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        assert!(wait_for(|| ran.load(Ordering::SeqCst) == 10));
        pool.shutdown(Duration::from_secs(2));
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new("test", 1);
        let ran = Arc::new(AtomicUsize::new(0));
        pool.submit(Box::new(|| panic!("job failure"))).unwrap();
        let r = ran.clone();
        pool.submit(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        assert!(wait_for(|| ran.load(Ordering::SeqCst) == 1));
        assert_eq!(pool.panics(), 1);
        pool.shutdown(Duration::from_secs(2));
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new("test", 1);
        pool.shutdown(Duration::from_secs(1));
        assert!(matches!(
            pool.submit(Box::new(|| {})),
            Err(ReactorError::WorkerPool(_))
        ));
    }

    #[test]
    fn test_join_with_timeout_detaches_stuck_thread() {
        let (tx, rx) = channel::bounded::<()>(0);
        let handle = thread::spawn(move || {
            let _ = rx.recv();
        });
        assert!(!join_with_timeout(handle, Duration::from_millis(20)));
        drop(tx);
    }
}
