//! Forwarder configuration.

use std::time::Duration;

use ndnfw_tables::{FibConfig, NdtConfig, PcctConfig};
use serde::{Deserialize, Serialize};

use crate::error::{FwdError, Result};

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Forwarder parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Number of forwarding workers
    pub workers: usize,
    /// FIB replicas and packet pools; worker `i` uses socket `i % numa_sockets`
    pub numa_sockets: usize,
    /// Capacity of each worker input ring
    pub queue_capacity: usize,
    /// Packet buffers per pool
    pub pool_capacity: usize,
    pub pool_buf_size: usize,
    pub headroom: usize,
    /// Packets taken from each ring per iteration
    pub burst_size: usize,
    /// Interval between PIT expiry sweeps
    #[serde(with = "duration_ms")]
    pub sweep_interval: Duration,
    /// Pause of an idle worker
    pub idle_sleep_us: u64,
    /// CPU of each worker; empty disables pinning
    pub cpus: Vec<usize>,
    /// Request queue of each disk helper
    pub disk_queue_capacity: usize,
    /// Wait after an NDT relocation
    #[serde(with = "duration_ms")]
    pub ndt_drain: Duration,
    pub ndt: NdtConfig,
    pub fib: FibConfig,
    pub pcct: PcctConfig,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            numa_sockets: 1,
            queue_capacity: 4096,
            pool_capacity: 8192,
            pool_buf_size: 9000,
            headroom: 128,
            burst_size: 64,
            sweep_interval: Duration::from_millis(100),
            idle_sleep_us: 50,
            cpus: Vec::new(),
            disk_queue_capacity: 1024,
            ndt_drain: Duration::from_millis(10),
            ndt: NdtConfig::default(),
            fib: FibConfig::default(),
            pcct: PcctConfig::default(),
        }
    }
}

impl ForwarderConfig {
    /// Check every parameter, including the table configs.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 || self.workers > usize::from(u8::MAX) {
            return Err(FwdError::InvalidConfig(format!(
                "workers must be within 1..=255, got {}",
                self.workers
            )));
        }
        if self.numa_sockets == 0 {
            return Err(FwdError::InvalidConfig("numa_sockets must be positive".into()));
        }
        if self.queue_capacity == 0 || self.burst_size == 0 || self.disk_queue_capacity == 0 {
            return Err(FwdError::InvalidConfig(
                "queue_capacity, burst_size and disk_queue_capacity must be positive".into(),
            ));
        }
        if self.pool_capacity == 0 || self.headroom >= self.pool_buf_size {
            return Err(FwdError::InvalidConfig(format!(
                "pool of {} buffers of {} octets cannot keep {} octets of headroom",
                self.pool_capacity, self.pool_buf_size, self.headroom
            )));
        }
        if !self.cpus.is_empty() && self.cpus.len() < self.workers {
            return Err(FwdError::InvalidConfig(format!(
                "{} cpus listed for {} workers",
                self.cpus.len(),
                self.workers
            )));
        }
        self.ndt.validate()?;
        self.fib.validate()?;
        self.pcct.validate()?;
        Ok(())
    }

    pub fn socket_of(&self, worker: usize) -> usize {
        worker % self.numa_sockets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        ForwarderConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad = [
            ForwarderConfig {
                workers: 0,
                ..Default::default()
            },
            ForwarderConfig {
                workers: 256,
                ..Default::default()
            },
            ForwarderConfig {
                headroom: 9000,
                ..Default::default()
            },
            ForwarderConfig {
                cpus: vec![0],
                ..Default::default()
            },
            ForwarderConfig {
                fib: FibConfig {
                    start_depth: 0,
                    ..Default::default()
                },
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn test_json_durations() {
        let config: ForwarderConfig = serde_json::from_str(r#"{"workers": 4, "sweep_interval": 250}"#).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.sweep_interval, Duration::from_millis(250));
        assert_eq!(config.numa_sockets, 1);
    }
}
