use crate::transport::{DEFAULT_CHUNK_SIZE, DEFAULT_TIMEOUT_MS};
use seek_core::DeadPixelPolicy;
use serde::de::value::StrDeserializer;
use serde::de::IntoDeserializer;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_OPEN_ATTEMPTS: usize = 3;

/// Grab budget when the dead-pixel map comes straight from the sensor mask.
pub const DIRECT_MASK_GRAB_ATTEMPTS: usize = 10;

/// Grab budget for sensors using the histogram policy, which interleave
/// more non-image frames at start-up.
pub const HISTOGRAM_GRAB_ATTEMPTS: usize = 40;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Camera session settings, loaded from TOML and `SEEK_*` environment
/// variables. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    /// Outer open attempts (init script, dead-pixel map, first grab).
    pub open_attempts: usize,
    /// Frame requests allowed per grab; `None` uses the policy default.
    pub grab_attempts: Option<usize>,
    /// Control and bulk transfer timeout in milliseconds.
    pub timeout_ms: u64,
    /// Largest single bulk read in bytes.
    pub chunk_size: usize,
    /// Secondary flat-field image applied after dead-pixel repair.
    pub flat_field: Option<PathBuf>,
    /// Overrides the model's dead-pixel policy.
    pub dead_pixel_policy: Option<DeadPixelPolicy>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            open_attempts: DEFAULT_OPEN_ATTEMPTS,
            grab_attempts: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            flat_field: None,
            dead_pixel_policy: None,
        }
    }
}

impl CameraConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    /// Defaults overridden by `SEEK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env()
    }

    /// Apply `SEEK_*` environment variables on top of `self`.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        self.open_attempts = parse_var(&var, "SEEK_OPEN_ATTEMPTS", self.open_attempts);
        if let Some(n) = var("SEEK_GRAB_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.grab_attempts = Some(n);
        }
        self.timeout_ms = parse_var(&var, "SEEK_TIMEOUT_MS", self.timeout_ms);
        self.chunk_size = parse_var(&var, "SEEK_CHUNK_SIZE", self.chunk_size);
        if let Some(path) = var("SEEK_FLAT_FIELD").filter(|v| !v.is_empty()) {
            self.flat_field = Some(PathBuf::from(path));
        }
        if let Some(policy) = var("SEEK_DEAD_PIXEL_POLICY") {
            self.dead_pixel_policy = Some(parse_policy(&policy)?);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.open_attempts == 0 {
            return Err(ConfigError::Invalid("open_attempts must be at least 1".into()));
        }
        if self.grab_attempts == Some(0) {
            return Err(ConfigError::Invalid("grab_attempts must be at least 1".into()));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be positive".into()));
        }
        if self.chunk_size < 2 || self.chunk_size % 2 != 0 {
            return Err(ConfigError::Invalid(format!(
                "chunk_size must be a positive even byte count, got {}",
                self.chunk_size
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Grab budget for `policy` unless explicitly configured.
    pub fn grab_attempts_for(&self, policy: DeadPixelPolicy) -> usize {
        self.grab_attempts.unwrap_or(match policy {
            DeadPixelPolicy::DirectMask => DIRECT_MASK_GRAB_ATTEMPTS,
            DeadPixelPolicy::Histogram => HISTOGRAM_GRAB_ATTEMPTS,
        })
    }
}

fn parse_var<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_policy(value: &str) -> Result<DeadPixelPolicy, ConfigError> {
    let de: StrDeserializer<'_, serde::de::value::Error> = value.into_deserializer();
    DeadPixelPolicy::deserialize(de)
        .map_err(|e| ConfigError::Invalid(format!("SEEK_DEAD_PIXEL_POLICY: {e}")))
}
