//! Workload generators shared by the benchmarks.

use std::sync::Arc;

use ndnfw_core::{FaceId, Name};
use ndnfw_fwd::{BuiltinRuntime, FaceTable, Forwarder, ForwarderConfig, QueueFace};
use ndnfw_tables::{FibConfig, NdtConfig, PcctConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// `count` names of `depth` components under `/bench`, reproducible for a given seed.
pub fn random_names(count: usize, depth: usize, seed: u64) -> Vec<Name> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let uri: String = (0..depth).map(|_| format!("/{:x}", rng.gen::<u32>())).collect();
            Name::parse(&format!("/bench{uri}")).unwrap_or_default()
        })
        .collect()
}

/// A single-worker forwarder whose routes cover every name in `prefixes`,
/// with face 1 downstream and face 2 upstream.
pub fn bench_forwarder(prefixes: &[Name]) -> (Forwarder, Vec<Arc<QueueFace>>) {
    let config = ForwarderConfig {
        workers: 1,
        pool_capacity: 4096,
        pool_buf_size: 2048,
        ndt: NdtConfig::default(),
        fib: FibConfig {
            capacity: prefixes.len().max(1) * 2,
            ..Default::default()
        },
        pcct: PcctConfig {
            capacity: 1 << 16,
            cs_direct_capacity: 1 << 14,
            cs_indirect_capacity: 1 << 12,
            ..Default::default()
        },
        ..Default::default()
    };
    let table = Arc::new(FaceTable::new());
    let faces: Vec<_> = (1..=2 as FaceId)
        .map(|id| {
            let face = Arc::new(QueueFace::new(1 << 16));
            table.add(id, face.clone());
            face
        })
        .collect();
    let forwarder = match Forwarder::new(config, table, Arc::new(BuiltinRuntime)) {
        Ok(forwarder) => forwarder,
        Err(e) => panic!("benchmark forwarder: {e}"),
    };
    for program in BuiltinRuntime::PROGRAMS {
        let _ = forwarder.load_strategy(program, program.as_bytes());
    }
    for prefix in prefixes {
        let _ = forwarder.insert_route(prefix.clone(), vec![2], "best-route");
    }
    (forwarder, faces)
}
