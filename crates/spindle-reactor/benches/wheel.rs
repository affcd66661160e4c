use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spindle_reactor::{Entry, EntryKind, Level, ReactorConfig, SlotKey, TaskId, WheelSet};

const MS: i64 = 1_000_000;

fn wheels() -> WheelSet {
    let config = ReactorConfig::default()
        .validate()
        .expect("default config is valid");
    WheelSet::new(&config)
}

fn entries(n: usize, max_ms: i64) -> Vec<Entry> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..n)
        .map(|i| Entry {
            key: SlotKey {
                index: i,
                id: TaskId::from_u64(i as u64 + 1),
            },
            deadline: rng.gen_range(1..max_ms) * MS,
            kind: EntryKind::Wake,
            seq: 1,
        })
        .collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");

    for (label, max_ms) in [("level1", 2_000), ("level2", 60_000), ("level3", 3_600_000)] {
        let batch = entries(10_000, max_ms);
        group.throughput(Throughput::Elements(batch.len() as u64));
        group.bench_with_input(BenchmarkId::new("random", label), &batch, |b, batch| {
            b.iter(|| {
                let mut set = wheels();
                for entry in batch {
                    black_box(set.insert(*entry));
                }
                set
            });
        });
    }

    group.finish();
}

fn bench_expire(c: &mut Criterion) {
    let batch = entries(10_000, 60_000);

    c.bench_function("expire_one_minute", |b| {
        b.iter(|| {
            let mut set = wheels();
            for entry in &batch {
                set.insert(*entry);
            }
            let mut fired = 0usize;
            for tick in 1..=6_000u64 {
                let time = set.tick_time(tick);
                for level in set.levels_for_tick(tick) {
                    let mut expired = set.advance(level);
                    for entry in expired.drain(..) {
                        if entry.deadline > time {
                            set.insert(entry);
                        } else {
                            fired += 1;
                        }
                    }
                    set.recycle(level, expired);
                }
            }
            black_box(fired)
        });
    });
}

fn bench_remove(c: &mut Criterion) {
    let batch = entries(1_000, 2_000);

    c.bench_function("insert_remove", |b| {
        b.iter(|| {
            let mut set = wheels();
            let placed: Vec<_> = batch.iter().map(|e| (set.insert(*e), e.key)).collect();
            for (placement, key) in placed {
                black_box(set.remove(placement.level, placement.slot, key, 1));
            }
            debug_assert!(set.wheel(Level::One).is_empty());
            set
        });
    });
}

criterion_group!(benches, bench_insert, bench_expire, bench_remove);
criterion_main!(benches);
