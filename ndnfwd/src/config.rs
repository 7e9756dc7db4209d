use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use ndnfw_core::{FaceId, Name};
use ndnfw_fwd::ForwarderConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub stats: StatsConfig,
    pub forwarder: ForwarderConfig,
    /// Strategies loaded at startup, in addition to the builtin ones.
    #[serde(rename = "strategy")]
    pub strategies: Vec<StrategyConfig>,
    #[serde(rename = "face")]
    pub faces: Vec<FaceConfig>,
    #[serde(rename = "route")]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Seconds between counter reports; 0 disables them.
    pub interval_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    /// Program image; a builtin program is named by its image.
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceConfig {
    pub id: FaceId,
    #[serde(default = "default_face_queue")]
    pub queue_capacity: usize,
}

fn default_face_queue() -> usize {
    1024
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub prefix: Name,
    pub nexthops: Vec<FaceId>,
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_strategy() -> String {
    "best-route".to_string()
}

impl Config {
    /// Read a TOML config. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Config = toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = self.to_toml()?;
        fs::write(path.as_ref(), contents).with_context(|| format!("writing {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.forwarder.validate()?;
        let mut seen = std::collections::HashSet::new();
        for face in &self.faces {
            if !seen.insert(face.id) {
                bail!("face {} declared twice", face.id);
            }
            if face.queue_capacity == 0 {
                bail!("face {} has an empty queue", face.id);
            }
        }
        for route in &self.routes {
            if let Some(face) = route.nexthops.iter().find(|f| !seen.contains(*f)) {
                bail!("route {} uses undeclared face {}", route.prefix, face);
            }
        }
        Ok(())
    }
}
