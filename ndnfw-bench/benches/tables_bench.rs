use std::time::{Duration, Instant};

use crossbeam::epoch;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndnfw_bench::random_names;
use ndnfw_core::Interest;
use ndnfw_tables::{Fib, FibConfig, Ndt, NdtConfig, Pcct, PcctConfig, PitInsertResult};

fn benchmark_ndt(c: &mut Criterion) {
    let ndt = Ndt::new(NdtConfig::default()).unwrap();
    ndt.randomize(8);
    let names = random_names(1024, 4, 1);
    let mut querier = ndt.querier();
    let mut i = 0;
    c.bench_function("ndt_lookup", |b| {
        b.iter(|| {
            i = (i + 1) % names.len();
            black_box(querier.lookup(&names[i]))
        })
    });
}

fn benchmark_fib(c: &mut Criterion) {
    let mut group = c.benchmark_group("fib_lpm");
    for routes in [1_000usize, 100_000] {
        let fib = Fib::new(
            FibConfig {
                capacity: routes * 2,
                ..Default::default()
            },
            1,
        )
        .unwrap();
        let prefixes = random_names(routes, 2, 2);
        for prefix in &prefixes {
            fib.insert(prefix.clone(), vec![1], None).unwrap();
        }
        let lookups: Vec<_> = prefixes
            .iter()
            .take(1024)
            .map(|p| p.append(b"seg").and_then(|n| n.append(b"0")).unwrap())
            .collect();
        let mut i = 0;
        group.bench_with_input(BenchmarkId::from_parameter(routes), &lookups, |b, lookups| {
            b.iter(|| {
                i = (i + 1) % lookups.len();
                let guard = epoch::pin();
                black_box(fib.lpm(&lookups[i], &guard).map(|e| e.nexthops().len()))
            })
        });
    }
    group.finish();
}

fn benchmark_pcct(c: &mut Criterion) {
    let names = random_names(4096, 3, 3);
    c.bench_function("pit_insert_erase", |b| {
        let mut pcct = Pcct::new(PcctConfig::default()).unwrap();
        let now = Instant::now();
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % names.len();
            let interest = Interest::new(names[i].clone()).with_lifetime(Duration::from_secs(1));
            if let PitInsertResult::New(pit) = pcct.pit_insert(&interest, 1, None, now) {
                let _ = pcct.pit_erase(pit);
            }
        })
    });
}

criterion_group!(benches, benchmark_ndt, benchmark_fib, benchmark_pcct);
criterion_main!(benches);
