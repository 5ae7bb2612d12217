//! TOML configuration for simulation runs
//!
//! ```toml
//! [engine]
//! rekey_every_n_messages = 4
//! skipped_key_cache_limit = 200
//!
//! [channel]
//! ticks = 500
//! loss_probability = 0.1
//! seed = 42
//!
//! [logging]
//! default_level = "debug"
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use qubee_logging::LogConfig;
use qubee_ratchet::EngineConfig;

use crate::simulation::SimConfig;

/// Everything a run can be configured with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub engine: EngineConfig,
    pub channel: SimConfig,
    pub logging: LogConfig,
}

impl RunConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text).context("parsing run configuration")?;
        config.engine.validate()?;
        config.channel.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("serializing run configuration")
    }
}
