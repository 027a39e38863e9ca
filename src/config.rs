use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use attentrs_vision::{pose, AttentionThresholds, SolverSettings};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::detector::DetectorSettings;
use crate::report::ReportPolicy;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("ATTENTRS_CONFIG_PATH").unwrap_or("/usr/local/etc/attentrs/config.toml"))
});

pub static MODEL_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("ATTENTRS_MODEL_PREFIX").unwrap_or("/usr/local/share/attentrs"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: String,
    /// Single-pose ONNX model.
    pub model: PathBuf,
    pub model_input_size: u32,
    /// Conference API origin, e.g. `https://localhost:8883`.
    pub api_base_url: String,
    /// Pause between the end of one frame and the next capture.
    pub interval_ms: u64,
    pub request_timeout_secs: u64,
    pub report_policy: ReportPolicy,
    pub thresholds: AttentionThresholds,
    pub solver: SolverSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            model: MODEL_PREFIX.join("movenet_singlepose_lightning.onnx"),
            model_input_size: 192,
            api_base_url: "https://localhost:8883".to_string(),
            interval_ms: 2000,
            request_timeout_secs: 10,
            report_policy: ReportPolicy::default(),
            thresholds: AttentionThresholds::default(),
            solver: SolverSettings::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        pose::check_input_size(self.model_input_size)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            interval: Duration::from_millis(self.interval_ms),
            thresholds: self.thresholds,
            solver: self.solver,
            report_policy: self.report_policy,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
