//! `spindle run` — Drive reactors with a synthetic load and report their stats.
//!
//! Every reactor gets `tasks` recurring tasks. The driving thread then submits
//! wake-list batches round-robin across reactors until the scenario ends.

use anyhow::Context as _;
use spindle_reactor::{
    poll_fn, Reactor, ReactorConfig, ReactorError, ReactorRegistry, Reason, StatsSnapshot,
    TaskHandle, WakeList,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Parameters of a load run
pub struct Scenario {
    pub config: Option<PathBuf>,
    pub reactors: usize,
    pub tasks: usize,
    pub interval_ms: u64,
    pub wake_every_ms: u64,
    pub batch: usize,
    pub duration_ms: u64,
    pub json: bool,
}

struct Loaded {
    reactor: Reactor,
    tasks: Vec<TaskHandle>,
    cursor: usize,
}

pub fn execute(scenario: Scenario) -> anyhow::Result<()> {
    let base = match &scenario.config {
        Some(path) => ReactorConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ReactorConfig::default(),
    };

    let registry = ReactorRegistry::new();
    let polls = Arc::new(AtomicU64::new(0));
    let mut loaded = Vec::with_capacity(scenario.reactors.max(1));
    for n in 0..scenario.reactors.max(1) {
        let config = ReactorConfig {
            name: format!("{}-{}", base.name, n),
            ..base.clone()
        };
        let reactor = Reactor::builder(config).registry(&registry).build()?;
        reactor.start()?;
        let tasks = spawn_tasks(&reactor, &scenario, &polls)?;
        loaded.push(Loaded {
            reactor,
            tasks,
            cursor: 0,
        });
    }
    info!(
        reactors = loaded.len(),
        tasks = scenario.tasks,
        "load scenario started"
    );

    let started = Instant::now();
    let run_for = Duration::from_millis(scenario.duration_ms);
    let every = Duration::from_millis(scenario.wake_every_ms.max(1));
    let mut rejected = 0u64;
    while started.elapsed() < run_for {
        for entry in loaded.iter_mut() {
            if let Err(err) = submit_batch(entry, scenario.batch) {
                rejected += 1;
                warn!(reactor = %entry.reactor.name(), error = %err, "wake list rejected");
            }
        }
        thread::sleep(every);
    }

    let snapshots: Vec<StatsSnapshot> = loaded.iter().map(|l| l.reactor.stats()).collect();
    for entry in &loaded {
        entry.reactor.shutdown();
    }

    if scenario.json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
    } else {
        for snapshot in &snapshots {
            println!("{}\n", snapshot);
        }
        println!(
            "Polls {} in {:?}, {} rejected batches",
            polls.load(Ordering::Relaxed),
            started.elapsed(),
            rejected
        );
    }
    Ok(())
}

fn spawn_tasks(
    reactor: &Reactor,
    scenario: &Scenario,
    polls: &Arc<AtomicU64>,
) -> anyhow::Result<Vec<TaskHandle>> {
    let interval = Duration::from_millis(scenario.interval_ms);
    let mut tasks = Vec::with_capacity(scenario.tasks);
    for _ in 0..scenario.tasks {
        // The spawn queue is bounded; give the reactor a moment to drain it
        let task = loop {
            let polls = polls.clone();
            let logic = poll_fn(move |cx| {
                if cx.reason() != Reason::Start {
                    polls.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            });
            match reactor.spawn_interval(logic, interval) {
                Ok(task) => break task,
                Err(ReactorError::QueueFull) => thread::sleep(Duration::from_millis(1)),
                Err(err) => return Err(err.into()),
            }
        };
        tasks.push(task);
    }
    Ok(tasks)
}

fn submit_batch(entry: &mut Loaded, batch: usize) -> spindle_reactor::Result<()> {
    if entry.tasks.is_empty() {
        return Ok(());
    }
    let mut list = WakeList::with_capacity(&entry.reactor, batch);
    for _ in 0..batch.min(entry.tasks.len()) {
        list.push_task(entry.tasks[entry.cursor].clone());
        entry.cursor = (entry.cursor + 1) % entry.tasks.len();
    }
    entry.reactor.wake_list(list)
}
