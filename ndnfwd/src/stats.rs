//! Periodic counter reports.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::{info, warn};
use ndnfw_fwd::{Forwarder, ForwarderCounters};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::service::Service;

/// Logs forwarder counters as JSON at a fixed interval.
pub struct StatsReporter {
    forwarder: Arc<Forwarder>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StatsReporter {
    pub fn new(forwarder: Arc<Forwarder>, interval: Duration) -> Self {
        Self {
            forwarder,
            interval,
            task: Mutex::new(None),
        }
    }

    /// One report line.
    pub fn report(counters: &ForwarderCounters) -> String {
        match serde_json::to_string(counters) {
            Ok(json) => json,
            Err(e) => format!("{{\"error\":\"{e}\"}}"),
        }
    }
}

#[async_trait]
impl Service for StatsReporter {
    async fn start(&self) -> Result<()> {
        if self.interval.is_zero() {
            bail!("stats interval must be positive");
        }
        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!("{} already running", self.name());
            return Ok(());
        }
        let forwarder = self.forwarder.clone();
        let period = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!("stats {}", StatsReporter::report(&forwarder.counters()));
            }
        }));
        info!("{} started, reporting every {:?}", self.name(), period);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            let _ = task.await;
            info!("{} stopped", self.name());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "stats-reporter"
    }

    fn is_running(&self) -> bool {
        self.task
            .try_lock()
            .map(|task| task.as_ref().is_some_and(|t| !t.is_finished()))
            .unwrap_or(true)
    }
}
