//! End-to-end forwarding through the dispatcher and the workers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use ndnfw_core::{Data, FaceId, Interest, LpPacket, Nack, NackReason, Name, Packet};
use ndnfw_fwd::{
    token_worker, BuiltinRuntime, FaceTable, Forwarder, ForwarderConfig, FwdWorker, QueueFace, RxPacket,
};
use ndnfw_tables::{FibConfig, NdtConfig, PcctConfig};

struct Node {
    forwarder: Forwarder,
    faces: Vec<Arc<QueueFace>>,
}

impl Node {
    fn new(workers: usize, n_faces: u16) -> Self {
        let config = ForwarderConfig {
            workers,
            queue_capacity: 64,
            pool_capacity: 128,
            pool_buf_size: 2048,
            ndt: NdtConfig {
                capacity: 1024,
                ..Default::default()
            },
            fib: FibConfig {
                capacity: 1024,
                start_depth: 2,
                ..Default::default()
            },
            pcct: PcctConfig {
                capacity: 1024,
                cs_direct_capacity: 64,
                cs_indirect_capacity: 64,
                ..Default::default()
            },
            ..Default::default()
        };
        let table = Arc::new(FaceTable::new());
        let faces = (1..=n_faces)
            .map(|id| {
                let face = Arc::new(QueueFace::new(256));
                table.add(id, face.clone());
                face
            })
            .collect();
        let forwarder = Forwarder::new(config, table, Arc::new(BuiltinRuntime)).unwrap();
        for program in BuiltinRuntime::PROGRAMS {
            forwarder.load_strategy(program, program.as_bytes()).unwrap();
        }
        Self { forwarder, faces }
    }

    fn sent(&self, face: FaceId) -> Vec<LpPacket> {
        self.faces[face as usize - 1].drain_packets()
    }
}

fn name(uri: &str) -> Name {
    Name::parse(uri).unwrap()
}

fn rx(face: FaceId, token: Option<u64>, packet: Packet, at: Instant) -> RxPacket {
    RxPacket {
        face,
        token,
        packet,
        arrival: at,
    }
}

fn interest(uri: &str, nonce: u32) -> Packet {
    Packet::Interest(Interest::new(name(uri)).with_nonce(nonce))
}

fn single_worker(node: &Node) -> FwdWorker {
    let mut workers = node.forwarder.take_workers();
    assert_eq!(workers.len(), 1);
    workers.remove(0)
}

#[test]
fn test_aggregation_forwards_once_and_answers_all() {
    let node = Node::new(1, 3);
    node.forwarder.insert_route(name("/P"), vec![3], "best-route").unwrap();
    let mut worker = single_worker(&node);
    let t0 = Instant::now();

    worker.handle(rx(1, Some(11), interest("/P/x", 1), t0), t0);
    worker.handle(rx(2, Some(22), interest("/P/x", 2), t0), t0 + Duration::from_millis(1));
    let up = node.sent(3);
    assert_eq!(up.len(), 1);

    let data = Data::new(name("/P/x"), Bytes::from_static(b"payload"));
    worker.handle(rx(3, up[0].token, Packet::Data(data.clone()), t0), t0 + Duration::from_millis(2));
    assert_eq!(node.sent(1), vec![LpPacket::new(Packet::Data(data.clone()), Some(11))]);
    assert_eq!(node.sent(2), vec![LpPacket::new(Packet::Data(data), Some(22))]);
    assert_eq!(worker.pcct().pit_len(), 0);
}

#[test]
fn test_nack_to_aggregated_interest_keeps_pending_request() {
    let node = Node::new(1, 2);
    node.forwarder.insert_route(name("/A"), vec![2], "multicast").unwrap();
    let mut worker = single_worker(&node);
    let t0 = Instant::now();

    worker.handle(rx(1, Some(11), interest("/A/agg", 1), t0), t0);
    let up = node.sent(2);
    assert_eq!(up.len(), 1);

    // the only nexthop is the face asking, so it alone is refused
    worker.handle(rx(2, Some(22), interest("/A/agg", 2), t0), t0 + Duration::from_millis(1));
    let back = node.sent(2);
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].token, Some(22));
    match &back[0].packet {
        Packet::Nack(nack) => {
            assert_eq!(nack.reason, NackReason::NoRoute);
            assert_eq!(nack.interest.nonce, 2);
        }
        other => panic!("expected Nack, got {other:?}"),
    }
    assert!(node.sent(1).is_empty());
    assert_eq!(worker.pcct().pit_len(), 1);

    let data = Data::new(name("/A/agg"), Bytes::from_static(b"v"));
    worker.handle(rx(2, up[0].token, Packet::Data(data.clone()), t0), t0 + Duration::from_millis(2));
    assert_eq!(node.sent(1), vec![LpPacket::new(Packet::Data(data), Some(11))]);
    assert!(node.sent(2).is_empty());
    assert_eq!(worker.counters().snapshot().n_unsolicited_data, 0);
    assert_eq!(worker.pcct().pit_len(), 0);
}

#[test]
fn test_retransmissions_are_suppressed() {
    let node = Node::new(1, 2);
    node.forwarder.insert_route(name("/S"), vec![2], "best-route").unwrap();
    let mut worker = single_worker(&node);
    let t0 = Instant::now();

    let mut sent_at = Vec::new();
    for ms in 0..=360u64 {
        let now = t0 + Duration::from_millis(ms);
        worker.handle(rx(1, None, interest("/S", 5000 + ms as u32), now), now);
        if !node.sent(2).is_empty() {
            sent_at.push(ms);
        }
    }
    assert_eq!(sent_at, vec![0, 10, 30, 70, 150, 250, 350]);
    assert_eq!(worker.counters().snapshot().n_suppressed, 361 - 7);
}

#[test]
fn test_nack_merge_over_two_upstreams() {
    let node = Node::new(1, 3);
    node.forwarder.insert_route(name("/M"), vec![2, 3], "multicast").unwrap();
    let mut worker = single_worker(&node);
    let t0 = Instant::now();

    worker.handle(rx(1, Some(5), interest("/M", 9), t0), t0);
    let (a, b) = (node.sent(2), node.sent(3));
    assert_eq!((a.len(), b.len()), (1, 1));

    let nack_of = |lp: &LpPacket, reason| match &lp.packet {
        Packet::Interest(i) => Packet::Nack(Nack::new(i.clone(), reason)),
        other => panic!("expected Interest, got {other:?}"),
    };
    worker.handle(rx(2, a[0].token, nack_of(&a[0], NackReason::NoRoute), t0), t0);
    assert!(node.sent(1).is_empty());

    worker.handle(rx(3, b[0].token, nack_of(&b[0], NackReason::Congestion), t0), t0);
    let down = node.sent(1);
    assert_eq!(down.len(), 1);
    assert_eq!(down[0].token, Some(5));
    match &down[0].packet {
        Packet::Nack(nack) => {
            assert_eq!(nack.reason, NackReason::Congestion);
            assert_eq!(nack.interest.nonce, 9);
        }
        other => panic!("expected Nack, got {other:?}"),
    }
    assert_eq!(worker.pcct().pit_len(), 0);
}

#[test]
fn test_longest_prefix_match_with_deep_routes() {
    let node = Node::new(1, 4);
    node.forwarder.insert_route(name("/a"), vec![2], "best-route").unwrap();
    node.forwarder.insert_route(name("/a/b/c/d"), vec![3], "best-route").unwrap();
    node.forwarder.insert_route(name("/a/b/c/d/e/f"), vec![4], "best-route").unwrap();
    assert_eq!(node.forwarder.counters().fib.entries, 3);
    let mut worker = single_worker(&node);
    let t0 = Instant::now();

    worker.handle(rx(1, None, interest("/a/b/c/d/e/x", 1), t0), t0);
    assert_eq!(node.sent(3).len(), 1);
    worker.handle(rx(1, None, interest("/a/b/c/d/e/f/g", 2), t0), t0);
    assert_eq!(node.sent(4).len(), 1);
    worker.handle(rx(1, None, interest("/a/b/x", 3), t0), t0);
    assert_eq!(node.sent(2).len(), 1);

    node.forwarder.erase_route(&name("/a/b/c/d")).unwrap();
    worker.handle(rx(1, None, interest("/a/b/c/d/zz", 4), t0), t0);
    assert_eq!(node.sent(2).len(), 1);
    assert!(node.forwarder.erase_route(&name("/a/b/c/d")).is_err());
}

#[test]
fn test_token_brings_data_back_to_owning_worker() {
    let node = Node::new(2, 2);
    node.forwarder.insert_route(name("/T"), vec![2], "best-route").unwrap();
    let mut workers = node.forwarder.take_workers();
    let mut demux = node.forwarder.input_demux();
    let run_all = |workers: &mut Vec<FwdWorker>| {
        let now = Instant::now();
        workers.iter_mut().map(|w| w.run_once(now)).sum::<usize>()
    };

    let mut owners = Vec::new();
    for i in 0..16u32 {
        let uri = format!("/T/{i}");
        let wire = LpPacket::new(interest(&uri, i), Some(1000 + u64::from(i))).encode();
        assert!(demux.on_frame(1, Bytes::from(wire)));
        run_all(&mut workers);

        let up = node.sent(2);
        assert_eq!(up.len(), 1);
        let token = up[0].token.unwrap();
        let expected = node.forwarder.ndt().lookup(&name(&uri)) as usize % 2;
        assert_eq!(token_worker(token) as usize, expected);
        owners.push(expected);

        let data = Data::new(name(&uri), Bytes::new());
        let reply = LpPacket::new(Packet::Data(data), Some(token)).encode();
        assert!(demux.on_frame(2, Bytes::from(reply)));
        run_all(&mut workers);
        let down = node.sent(1);
        assert_eq!(down.len(), 1);
        assert_eq!(down[0].token, Some(1000 + u64::from(i)));
    }

    let counters = node.forwarder.counters();
    assert_eq!(counters.demux[0].n_interests, 16);
    assert_eq!(counters.demux[0].n_data, 16);
    let interests: Vec<u64> = counters.workers.iter().map(|w| w.fwd.n_interests).collect();
    for (worker, n) in interests.iter().enumerate() {
        assert_eq!(*n as usize, owners.iter().filter(|&&o| o == worker).count());
    }
}

#[test]
fn test_launched_workers_forward() {
    let node = Node::new(2, 2);
    node.forwarder.insert_route(name("/L"), vec![2], "multicast").unwrap();
    let handle = node.forwarder.launch().unwrap();
    let mut demux = node.forwarder.input_demux();

    let wire = LpPacket::new(interest("/L/1", 42), None).encode();
    assert!(demux.on_frame(1, Bytes::from(wire)));
    let deadline = Instant::now() + Duration::from_secs(5);
    let up = loop {
        if let Some(lp) = node.faces[1].pop_packet() {
            break lp;
        }
        assert!(Instant::now() < deadline, "Interest never forwarded");
        std::thread::sleep(Duration::from_millis(1));
    };
    assert!(matches!(up.packet, Packet::Interest(ref i) if i.nonce == 42));
    handle.shutdown();
}
