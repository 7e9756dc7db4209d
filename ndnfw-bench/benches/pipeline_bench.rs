use std::time::Instant;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndnfw_bench::{bench_forwarder, random_names};
use ndnfw_core::{Data, Interest, LpPacket, Packet};
use ndnfw_fwd::RxPacket;

fn benchmark_interest_data(c: &mut Criterion) {
    let prefixes = random_names(1000, 2, 4);
    let (forwarder, faces) = bench_forwarder(&prefixes);
    let mut worker = forwarder.take_workers().remove(0);
    let names: Vec<_> = prefixes.iter().map(|p| p.append(b"obj").unwrap()).collect();
    let mut i = 0;

    c.bench_function("interest_data_exchange", |b| {
        b.iter(|| {
            i = (i + 1) % names.len();
            let now = Instant::now();
            let interest = Interest::new(names[i].clone()).with_must_be_fresh(true);
            worker.handle(
                RxPacket {
                    face: 1,
                    token: Some(i as u64),
                    packet: Packet::Interest(interest),
                    arrival: now,
                },
                now,
            );
            let Some(up) = faces[1].pop_packet() else { return };
            let data = Data::new(names[i].clone(), Bytes::from_static(b"payload"));
            worker.handle(
                RxPacket {
                    face: 2,
                    token: up.token,
                    packet: Packet::Data(data),
                    arrival: now,
                },
                now,
            );
            black_box(faces[0].pop());
        })
    });
}

fn benchmark_codec(c: &mut Criterion) {
    let name = random_names(1, 6, 5).remove(0);
    let wire = Bytes::from(LpPacket::new(Packet::Interest(Interest::new(name)), Some(42)).encode());
    c.bench_function("lp_decode_interest", |b| {
        b.iter(|| black_box(LpPacket::decode(wire.clone()).is_ok()))
    });
}

criterion_group!(benches, benchmark_interest_data, benchmark_codec);
criterion_main!(benches);
