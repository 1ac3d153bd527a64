//! Configuration for the message-passing encoder.
//! Reads jtvae-mpn.toml from the current directory or the path in JTVAE_MPN_CONFIG.

use std::path::Path;

use candle_core::Device;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{MpnError, PoolingStrategy, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "JTVAE_MPN_CONFIG";

/// Config file looked up in the working directory when the env var is unset.
pub const CONFIG_FILE: &str = "jtvae-mpn.toml";

/// Hyperparameters of the junction-tree message-passing network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpnConfig {
    /// Width of every message and atom hidden vector (default: 450)
    pub hidden_size: usize,

    /// Number of message-passing steps; `depth - 1` relaxation rounds run (default: 3)
    pub depth: usize,

    /// Fan-in bound per atom and per directed bond (default: 10)
    pub max_neighbors: usize,

    /// How atom hidden states are summarised per candidate (default: mean)
    pub pooling: PoolingStrategy,

    /// Candidates per forward call in `Jtmpn::encode` (default: 32)
    pub batch_size: usize,

    /// Use GPU if available (default: false)
    pub use_gpu: bool,
}

impl Default for MpnConfig {
    fn default() -> Self {
        Self {
            hidden_size: 450,
            depth: 3,
            max_neighbors: 10,
            pooling: PoolingStrategy::Mean,
            batch_size: 32,
            use_gpu: false,
        }
    }
}

impl MpnConfig {
    /// Create config for CPU-only inference.
    pub fn cpu() -> Self {
        Self {
            use_gpu: false,
            ..Default::default()
        }
    }

    /// Create config that prefers a GPU when one is compiled in.
    pub fn gpu() -> Self {
        Self {
            use_gpu: true,
            ..Default::default()
        }
    }

    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_max_neighbors(mut self, max_neighbors: usize) -> Self {
        self.max_neighbors = max_neighbors;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_pooling(mut self, pooling: PoolingStrategy) -> Self {
        self.pooling = pooling;
        self
    }

    /// Reject hyperparameters the network cannot run with.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("hidden_size", self.hidden_size),
            ("depth", self.depth),
            ("max_neighbors", self.max_neighbors),
            ("batch_size", self.batch_size),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(MpnError::Config(format!("{name} must be at least 1")));
            }
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded MPN config from {}", path.display());
        Ok(config)
    }

    /// Resolve config from `JTVAE_MPN_CONFIG`, then `jtvae-mpn.toml`, then defaults.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(path);
        }
        if Path::new(CONFIG_FILE).exists() {
            return Self::from_file(CONFIG_FILE);
        }
        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Select the best available device.
    pub fn select_device(&self) -> Result<Device> {
        if !self.use_gpu {
            info!("Using CPU device");
            return Ok(Device::Cpu);
        }

        #[cfg(feature = "cuda")]
        {
            match Device::new_cuda(0) {
                Ok(device) => {
                    info!("Using CUDA device {:?}", device.location());
                    return Ok(device);
                }
                Err(e) => {
                    debug!("CUDA not available: {}, falling back to CPU", e);
                }
            }
        }

        #[cfg(feature = "metal")]
        {
            match Device::new_metal(0) {
                Ok(device) => {
                    info!("Using Metal device {:?}", device.location());
                    return Ok(device);
                }
                Err(e) => {
                    debug!("Metal not available: {}, falling back to CPU", e);
                }
            }
        }

        info!("No GPU backend available, using CPU device");
        Ok(Device::Cpu)
    }
}
