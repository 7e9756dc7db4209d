use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use ndnfw_core::FaceId;
use ndnfw_fwd::{BuiltinRuntime, FaceTable, Forwarder, ForwarderHandle, QueueFace};

use crate::config::Config;
use crate::service::Service;
use crate::stats::StatsReporter;

pub struct Daemon {
    config: Config,
    forwarder: Option<Arc<Forwarder>>,
    handle: Option<ForwarderHandle>,
    faces: HashMap<FaceId, Arc<QueueFace>>,
    services: Vec<Box<dyn Service>>,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            forwarder: None,
            handle: None,
            faces: HashMap::new(),
            services: Vec::new(),
        }
    }

    pub fn forwarder(&self) -> Option<&Arc<Forwarder>> {
        self.forwarder.as_ref()
    }

    pub fn face(&self, id: FaceId) -> Option<&Arc<QueueFace>> {
        self.faces.get(&id)
    }

    /// Build the forwarder from the config, install faces, strategies and
    /// routes, then launch the workers and the background services.
    pub async fn start(&mut self) -> Result<()> {
        if self.forwarder.is_some() {
            return Err(anyhow!("daemon already started"));
        }
        info!("Starting NDN forwarder daemon");

        let table = Arc::new(FaceTable::new());
        for face in &self.config.faces {
            let queue = Arc::new(QueueFace::new(face.queue_capacity));
            table.add(face.id, queue.clone());
            self.faces.insert(face.id, queue);
            info!("Face {} ready, queue {}", face.id, face.queue_capacity);
        }

        let forwarder = Forwarder::new(self.config.forwarder.clone(), table, Arc::new(BuiltinRuntime))
            .context("creating forwarder")?;
        for program in BuiltinRuntime::PROGRAMS {
            forwarder.load_strategy(program, program.as_bytes())?;
        }
        for strategy in &self.config.strategies {
            forwarder
                .load_strategy(&strategy.name, strategy.image.as_bytes())
                .with_context(|| format!("loading strategy {}", strategy.name))?;
        }
        for route in &self.config.routes {
            forwarder
                .insert_route(route.prefix.clone(), route.nexthops.clone(), &route.strategy)
                .with_context(|| format!("installing route {}", route.prefix))?;
        }

        let forwarder = Arc::new(forwarder);
        self.handle = Some(forwarder.launch()?);

        if self.config.stats.interval_secs > 0 {
            let reporter = StatsReporter::new(forwarder.clone(), Duration::from_secs(self.config.stats.interval_secs));
            reporter.start().await?;
            self.services.push(Box::new(reporter));
        }
        self.forwarder = Some(forwarder);

        info!(
            "Daemon started: {} faces, {} routes",
            self.faces.len(),
            self.config.routes.len()
        );
        Ok(())
    }

    pub async fn stop(&mut self) {
        info!("Stopping NDN forwarder daemon");

        for service in self.services.drain(..) {
            if let Err(e) = service.stop().await {
                error!("Failed to stop {}: {}", service.name(), e);
            }
        }
        if let Some(handle) = self.handle.take() {
            // joining blocks until every worker leaves its loop
            if let Err(e) = tokio::task::spawn_blocking(move || handle.shutdown()).await {
                warn!("Worker shutdown did not complete: {}", e);
            }
        }
        if let Some(forwarder) = self.forwarder.take() {
            info!("Final stats {}", StatsReporter::report(&forwarder.counters()));
        }
        self.faces.clear();
        info!("All services stopped");
    }
}
