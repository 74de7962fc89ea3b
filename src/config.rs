//! Service configuration. Running without a config file or environment
//! overrides serves on `0.0.0.0:5000` in heuristic mode.

use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming a TOML config file
pub const CONFIG_ENV: &str = "TBSCAN_CONFIG";

/// Prefix of environment overrides, e.g. `TBSCAN__SERVER__PORT=8080`
pub const ENV_PREFIX: &str = "TBSCAN";

/// Default maximum JSON payload size. The upload form caps images at 5 MB,
/// which base64 inflates by a third.
pub const DEFAULT_JSON_LIMIT: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub predictor: PredictorSettings,
    pub model: ModelSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Number of actix workers
    pub workers: usize,
    /// Maximum accepted JSON body, in bytes
    pub json_limit: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            host: "0.0.0.0".into(),
            port: 5000,
            workers: 1,
            json_limit: DEFAULT_JSON_LIMIT,
        }
    }
}

/// Which path produces predictions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Never touch the model; always use the brightness heuristic
    #[default]
    Heuristic,

    /// Run the model and fall back to the heuristic when it fails
    Model,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PredictorSettings {
    pub mode: Mode,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// A trained 2-class TorchScript module. Takes precedence over the
    /// ResNet-50 weights below.
    pub torchscript: Option<PathBuf>,

    /// Pretrained ResNet-50 backbone variables
    pub backbone_weights: Option<PathBuf>,

    /// Trained `fc.weight` / `fc.bias` for the 2-class head
    pub head_weights: Option<PathBuf>,

    /// Run on CUDA when available
    pub cuda: bool,
}

impl Settings {
    /// Layer defaults, an optional TOML file and `TBSCAN__*` environment
    /// variables, in that order.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// The address the HTTP server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
