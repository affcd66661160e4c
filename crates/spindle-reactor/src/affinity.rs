//! CPU pinning and processor sampling for the reactor thread

use core_affinity::CoreId;
use once_cell::sync::Lazy;

fn cpu_cores() -> &'static [CoreId] {
    static CPU_CORES: Lazy<Option<Vec<CoreId>>> = Lazy::new(core_affinity::get_core_ids);
    match CPU_CORES.as_ref() {
        Some(cores) => cores.as_slice(),
        None => &[],
    }
}

/// Processor the calling thread is currently running on, where the platform reports it
pub fn current_processor() -> Option<usize> {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: sched_getcpu has no preconditions
        let cpu = unsafe { libc::sched_getcpu() };
        if cpu >= 0 {
            return Some(cpu as usize);
        }
    }
    None
}

/// Pin the calling thread to the core it is running on (or the first core).
///
/// Returns the pinned core id, or `None` when pinning is unsupported or refused.
pub fn pin_current_thread() -> Option<usize> {
    let cores = cpu_cores();
    let core = current_processor()
        .and_then(|cpu| cores.iter().find(|c| c.id == cpu))
        .or_else(|| cores.first())
        .copied()?;
    if core_affinity::set_for_current(core) {
        Some(core.id)
    } else {
        None
    }
}

/// Tracks processor migrations of one thread
#[derive(Debug, Default)]
pub(crate) struct ProcessorTracker {
    last: Option<usize>,
}

impl ProcessorTracker {
    /// Sample the current processor. Returns it plus whether it changed since the last sample.
    pub fn sample(&mut self) -> (Option<usize>, bool) {
        let current = current_processor();
        let switched = matches!((self.last, current), (Some(a), Some(b)) if a != b);
        if current.is_some() {
            self.last = current;
        }
        (current, switched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn test_current_processor_on_linux() {
        let cpu = current_processor().unwrap();
        assert!(cpu < 4096);
    }

    #[test]
    fn test_tracker_first_sample_is_not_a_switch() {
        let mut tracker = ProcessorTracker::default();
        let (_, switched) = tracker.sample();
        assert!(!switched);
    }
}
