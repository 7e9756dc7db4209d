//! Forwarder assembly, thread launch and management operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::epoch;
use log::{info, warn};
use ndnfw_core::{FaceId, Name, PktPool};
use ndnfw_tables::pcct::PcctCounters;
use ndnfw_tables::{
    DiskSizing, FibEntryCounters, FibReplicas, MemDiskBackend, Ndt, NdtUpdater, Pcct, StrategyId, StrategyInfo,
    StrategyRuntime, StrategyTable, TableError, ThreadedDiskStore,
};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::ForwarderConfig;
use crate::dispatch::{DemuxCounters, DemuxCountersSnapshot, InputDemux, WorkerQueues};
use crate::error::{FwdError, Result};
use crate::face::FaceTable;
use crate::fwd::{FwdCounters, FwdWorker, WorkerCountersSnapshot};

/// A FIB entry as reported to management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    pub prefix: Name,
    pub nexthops: Vec<FaceId>,
    pub strategy: String,
    pub counters: FibEntryCounters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NdtSummary {
    pub capacity: usize,
    /// NDT slots assigned to each worker.
    pub slots_per_worker: Vec<usize>,
    /// Sampled lookups that landed on each worker.
    pub hits_per_worker: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FibSummary {
    pub entries: usize,
    pub virtual_entries: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub capacity: usize,
    pub available: usize,
    pub alloc_failures: u64,
}

/// Snapshot of every counter of the forwarder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwarderCounters {
    pub ndt: NdtSummary,
    pub fib: FibSummary,
    pub workers: Vec<WorkerCountersSnapshot>,
    pub demux: Vec<DemuxCountersSnapshot>,
    pub pools: Vec<PoolSummary>,
}

/// Pin the calling thread to `cpu`.
#[cfg(target_os = "linux")]
pub fn pin_to_cpu(cpu: usize) -> std::io::Result<()> {
    if cpu >= libc::CPU_SETSIZE as usize {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("cpu {cpu} beyond CPU_SETSIZE"),
        ));
    }
    // SAFETY: cpu_set_t is plain data and all-zero is the empty set; `cpu`
    // is within the set.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_to_cpu(_cpu: usize) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "CPU pinning is only available on Linux",
    ))
}

/// The forwarding plane: tables, workers and their rings.
///
/// Management operations take `&self` and may run while workers are live.
pub struct Forwarder {
    config: ForwarderConfig,
    ndt: Ndt,
    updater: NdtUpdater,
    fib: FibReplicas,
    strategies: StrategyTable,
    faces: Arc<FaceTable>,
    queues: Vec<Arc<WorkerQueues>>,
    pools: Vec<PktPool>,
    fwd_counters: Vec<Arc<FwdCounters>>,
    pcct_counters: Vec<Arc<PcctCounters>>,
    demux_counters: Mutex<Vec<Weak<DemuxCounters>>>,
    workers: Mutex<Vec<FwdWorker>>,
}

impl Forwarder {
    pub fn new(config: ForwarderConfig, faces: Arc<FaceTable>, runtime: Arc<dyn StrategyRuntime>) -> Result<Self> {
        config.validate()?;
        let ndt = Ndt::new(config.ndt.clone())?;
        ndt.randomize(config.workers as u8);
        let updater = NdtUpdater::new(ndt.clone(), config.ndt_drain);
        let fib = FibReplicas::new(config.fib.clone(), config.numa_sockets, config.workers)?;
        let pools = (0..config.numa_sockets)
            .map(|_| PktPool::new(config.pool_capacity, config.pool_buf_size, config.headroom))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut queues = Vec::with_capacity(config.workers);
        let mut workers = Vec::with_capacity(config.workers);
        for id in 0..config.workers {
            let ring = Arc::new(WorkerQueues::new(config.queue_capacity));
            let mut pcct = Pcct::new(config.pcct.clone())?;
            if config.pcct.cs_disk_capacity > 0 {
                let sizing = DiskSizing::calc(
                    config.pcct.cs_disk_capacity as u64,
                    config.pool_buf_size,
                    DiskSizing::DEFAULT_BLOCK_SIZE,
                )?;
                let store = ThreadedDiskStore::spawn(MemDiskBackend::new(sizing), config.disk_queue_capacity)
                    .map_err(|source| FwdError::Spawn {
                        what: format!("disk helper of worker {id}"),
                        source,
                    })?;
                pcct.attach_disk(Arc::new(store))?;
            }
            let socket = config.socket_of(id);
            let worker = FwdWorker::new(
                id as u8,
                ring.clone(),
                pcct,
                fib.replica(socket),
                faces.clone(),
                pools[socket].clone(),
            )
            .with_timing(
                config.burst_size,
                config.sweep_interval,
                Duration::from_micros(config.idle_sleep_us),
            );
            queues.push(ring);
            workers.push(worker);
        }

        info!(
            "Forwarder ready: {} workers on {} sockets, NDT {} slots, FIB capacity {}",
            config.workers, config.numa_sockets, config.ndt.capacity, config.fib.capacity
        );
        Ok(Self {
            fwd_counters: workers.iter().map(FwdWorker::counters).collect(),
            pcct_counters: workers.iter().map(FwdWorker::pcct_counters).collect(),
            config,
            ndt,
            updater,
            fib,
            strategies: StrategyTable::new(runtime),
            faces,
            queues,
            pools,
            demux_counters: Mutex::new(Vec::new()),
            workers: Mutex::new(workers),
        })
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    pub fn faces(&self) -> &Arc<FaceTable> {
        &self.faces
    }

    pub fn ndt(&self) -> &Ndt {
        &self.ndt
    }

    pub fn fib(&self) -> &FibReplicas {
        &self.fib
    }

    /// Workers not yet launched. Taking them lets the caller drive
    /// [`FwdWorker::run_once`] itself.
    pub fn take_workers(&self) -> Vec<FwdWorker> {
        std::mem::take(&mut *self.workers.lock())
    }

    /// A demultiplexer for one input thread.
    pub fn input_demux(&self) -> InputDemux {
        let demux = InputDemux::new(self.ndt.querier(), self.queues.clone());
        let mut registered = self.demux_counters.lock();
        registered.retain(|c| c.strong_count() > 0);
        registered.push(Arc::downgrade(&demux.counters()));
        drop(registered);
        demux
    }

    fn live_demux_counters(&self) -> Vec<Arc<DemuxCounters>> {
        let mut registered = self.demux_counters.lock();
        registered.retain(|c| c.strong_count() > 0);
        registered.iter().filter_map(Weak::upgrade).collect()
    }

    /// Start one thread per worker.
    pub fn launch(&self) -> Result<ForwarderHandle> {
        let workers = self.take_workers();
        if workers.is_empty() {
            return Err(FwdError::AlreadyLaunched);
        }
        let mut handle = ForwarderHandle {
            stop: Arc::new(AtomicBool::new(false)),
            threads: Vec::with_capacity(workers.len()),
        };
        for mut worker in workers {
            let id = worker.id();
            let stop = handle.stop.clone();
            let cpu = self.config.cpus.get(id as usize).copied();
            let spawned = std::thread::Builder::new().name(format!("fwd-{id}")).spawn(move || {
                if let Some(cpu) = cpu {
                    match pin_to_cpu(cpu) {
                        Ok(()) => info!("Worker {} pinned to cpu {}", id, cpu),
                        Err(e) => warn!("Worker {} cannot be pinned to cpu {}: {}", id, cpu, e),
                    }
                }
                worker.run(&stop);
            });
            match spawned {
                Ok(thread) => handle.threads.push(thread),
                Err(source) => {
                    handle.stop_and_join();
                    return Err(FwdError::Spawn {
                        what: format!("worker {id}"),
                        source,
                    });
                }
            }
        }
        info!("Launched {} forwarding workers", handle.threads.len());
        Ok(handle)
    }

    /// Add or replace a route. Returns whether the prefix is new.
    pub fn insert_route(&self, prefix: Name, nexthops: Vec<FaceId>, strategy: &str) -> Result<bool> {
        for face in nexthops.iter().filter(|&&face| !self.faces.contains(face)) {
            warn!("Route {} uses face {} which is not registered", prefix, face);
        }
        let handle = self.strategies.find(strategy).ok_or(TableError::NoStrategy)?;
        let is_new = self.fib.insert(prefix.clone(), nexthops.clone(), Some(handle))?;
        info!(
            "{} route {} via {:?} with strategy {}",
            if is_new { "Added" } else { "Updated" },
            prefix,
            nexthops,
            strategy
        );
        Ok(is_new)
    }

    pub fn erase_route(&self, prefix: &Name) -> Result<()> {
        self.fib.erase(prefix)?;
        info!("Removed route {}", prefix);
        Ok(())
    }

    /// Every route, sorted by prefix.
    pub fn routes(&self) -> Vec<RouteInfo> {
        let fib = self.fib.replica(0);
        let guard = epoch::pin();
        fib.names()
            .into_iter()
            .filter_map(|name| {
                let entry = fib.find(&name, &guard)?;
                Some(RouteInfo {
                    nexthops: entry.nexthops().to_vec(),
                    strategy: entry.strategy().map(|s| s.name().to_string()).unwrap_or_default(),
                    counters: self.fib.entry_counters(&name).unwrap_or_default(),
                    prefix: name,
                })
            })
            .collect()
    }

    /// Move NDT slot `index` to `worker` and wait for queued packets to drain.
    /// Returns the previous worker.
    pub fn ndt_update(&self, index: usize, worker: usize) -> Result<u8> {
        if index >= self.ndt.capacity() {
            return Err(FwdError::OutOfRange {
                what: "NDT index",
                value: index,
                limit: self.ndt.capacity(),
            });
        }
        if worker >= self.config.workers {
            return Err(FwdError::OutOfRange {
                what: "worker",
                value: worker,
                limit: self.config.workers,
            });
        }
        Ok(self.updater.update_and_drain(index, worker as u8))
    }

    pub fn load_strategy(&self, name: &str, image: &[u8]) -> Result<StrategyId> {
        Ok(self.strategies.load(name, image)?)
    }

    pub fn unload_strategy(&self, id: StrategyId) -> Result<()> {
        Ok(self.strategies.unload(id)?)
    }

    pub fn strategies(&self) -> Vec<StrategyInfo> {
        self.strategies.list()
    }

    pub fn counters(&self) -> ForwarderCounters {
        let workers = self.config.workers;
        let mut slots_per_worker = vec![0; workers];
        let mut hits_per_worker = vec![0; workers];
        for (value, hits) in self.ndt.snapshot().into_iter().zip(self.ndt.counters()) {
            let worker = value as usize % workers;
            slots_per_worker[worker] += 1;
            hits_per_worker[worker] += hits;
        }
        let fib = self.fib.replica(0);

        ForwarderCounters {
            ndt: NdtSummary {
                capacity: self.ndt.capacity(),
                slots_per_worker,
                hits_per_worker,
            },
            fib: FibSummary {
                entries: fib.len(),
                virtual_entries: fib.count_virtual(),
            },
            workers: self
                .fwd_counters
                .iter()
                .zip(&self.pcct_counters)
                .map(|(fwd, pcct)| WorkerCountersSnapshot {
                    fwd: fwd.snapshot(),
                    pcct: pcct.snapshot(),
                })
                .collect(),
            demux: self.live_demux_counters().iter().map(|c| c.snapshot()).collect(),
            pools: self
                .pools
                .iter()
                .map(|pool| PoolSummary {
                    capacity: pool.capacity(),
                    available: pool.available(),
                    alloc_failures: pool.alloc_failures(),
                })
                .collect(),
        }
    }
}

/// Running workers. Dropping the handle stops and joins them.
pub struct ForwarderHandle {
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl ForwarderHandle {
    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::Acquire) && self.threads.iter().any(|t| !t.is_finished())
    }

    /// Stop every worker and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        for thread in self.threads.drain(..) {
            let name = thread.thread().name().unwrap_or("fwd").to_string();
            if thread.join().is_err() {
                warn!("Thread {} panicked", name);
            }
        }
    }
}

impl Drop for ForwarderHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::BuiltinRuntime;
    use ndnfw_tables::PcctConfig;

    fn forwarder(workers: usize) -> Forwarder {
        let config = ForwarderConfig {
            workers,
            pool_capacity: 64,
            pool_buf_size: 2048,
            ndt: ndnfw_tables::NdtConfig {
                capacity: 256,
                ..Default::default()
            },
            pcct: PcctConfig {
                capacity: 1024,
                cs_direct_capacity: 128,
                cs_indirect_capacity: 128,
                ..Default::default()
            },
            ..Default::default()
        };
        let forwarder = Forwarder::new(config, Arc::new(FaceTable::new()), Arc::new(BuiltinRuntime)).unwrap();
        for name in BuiltinRuntime::PROGRAMS {
            forwarder.load_strategy(name, name.as_bytes()).unwrap();
        }
        forwarder
    }

    fn name(uri: &str) -> Name {
        Name::parse(uri).unwrap()
    }

    #[test]
    fn test_routes() {
        let fwd = forwarder(1);
        assert!(fwd.insert_route(name("/a"), vec![1, 2], "multicast").unwrap());
        assert!(!fwd.insert_route(name("/a"), vec![3], "best-route").unwrap());
        assert!(matches!(
            fwd.insert_route(name("/b"), vec![1], "nope"),
            Err(FwdError::Table(TableError::NoStrategy))
        ));
        let routes = fwd.routes();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].nexthops, vec![3]);
        assert_eq!(routes[0].strategy, "best-route");

        fwd.erase_route(&name("/a")).unwrap();
        assert!(matches!(fwd.erase_route(&name("/a")), Err(FwdError::Table(TableError::NotFound))));
        assert_eq!(fwd.counters().fib.entries, 0);
    }

    #[test]
    fn test_strategy_in_use() {
        let fwd = forwarder(1);
        fwd.insert_route(name("/a"), vec![1], "reject").unwrap();
        let id = fwd.strategies().iter().find(|s| s.name == "reject").unwrap().id;
        assert!(matches!(
            fwd.unload_strategy(id),
            Err(FwdError::Table(TableError::StrategyInUse { .. }))
        ));
        fwd.erase_route(&name("/a")).unwrap();
        // the old record is released after a grace period
        for _ in 0..256 {
            epoch::pin().flush();
            if fwd.unload_strategy(id).is_ok() {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("strategy still referenced");
    }

    #[test]
    fn test_ndt_update_bounds() {
        let fwd = forwarder(2);
        assert!(fwd.ndt_update(0, 1).is_ok());
        assert_eq!(fwd.ndt().read(0), 1);
        assert!(matches!(fwd.ndt_update(0, 2), Err(FwdError::OutOfRange { .. })));
        assert!(matches!(fwd.ndt_update(256, 0), Err(FwdError::OutOfRange { .. })));
        let counters = fwd.counters();
        assert_eq!(counters.ndt.slots_per_worker.iter().sum::<usize>(), 256);
    }

    #[test]
    fn test_launch_once() {
        let fwd = forwarder(2);
        let handle = fwd.launch().unwrap();
        assert!(handle.is_running());
        assert!(matches!(fwd.launch(), Err(FwdError::AlreadyLaunched)));
        handle.shutdown();
    }

    #[test]
    fn test_counters_serialize() {
        let fwd = forwarder(2);
        let _demux = fwd.input_demux();
        let json = serde_json::to_value(fwd.counters()).unwrap();
        assert_eq!(json["workers"].as_array().unwrap().len(), 2);
        assert_eq!(json["demux"].as_array().unwrap().len(), 1);
        assert_eq!(json["pools"][0]["capacity"], 64);
    }

    #[test]
    fn test_dropped_demux_leaves_counters() {
        let fwd = forwarder(2);
        let first = fwd.input_demux();
        let _second = fwd.input_demux();
        assert_eq!(fwd.counters().demux.len(), 2);
        assert_eq!(fwd.ndt().querier_count(), 2);
        drop(first);
        assert_eq!(fwd.counters().demux.len(), 1);
        assert_eq!(fwd.ndt().querier_count(), 1);
    }
}
