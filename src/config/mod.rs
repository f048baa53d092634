use serde::Deserialize;
use std::path::{Path, PathBuf};
use config::{Config, ConfigError, Environment, File};
use crate::profiler::ProfileConfig;

/// Where model binaries are looked up
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// Directory searched for relative model paths
    pub directory: PathBuf,
}

/// Defaults applied to every model the CLI initializes
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Profiling flags, e.g. "model,layer" or "disable"
    pub profile: ProfileConfig,
    /// Input Q-fraction bits overriding the model's own, if set
    pub input_q: Option<u8>,
    /// Frames run by `bench`
    pub bench_frames: usize,
}

/// Host-link transport settings
#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// Address the `stream` command listens on
    pub host: String,
    pub port: u16,
    /// Socket read/write timeout in milliseconds, 0 to block forever
    pub timeout_ms: u64,
}

/// Logging settings
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Directory for the rolling log files
    pub directory: Option<PathBuf>,
    /// Emit JSON lines instead of text
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub model: ModelConfig,
    pub runtime: RuntimeConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load settings in order of precedence (highest first):
    /// 1. Environment variables prefixed with TINYINFER_
    /// 2. `config/local.toml` if present
    /// 3. `config/default.toml` if present
    /// 4. Built-in defaults
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = std::env::current_dir()
            .map_err(|e| ConfigError::Message(format!("Failed to get current directory: {}", e)))?
            .join("config");
        Self::load(&config_dir)
    }

    /// Load settings from the TOML files in `config_dir`.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let default_config = config_dir.join("default.toml");
        let local_config = config_dir.join("local.toml");

        let settings = Self::builder()?
            .add_source(File::from(default_config).required(false))
            .add_source(File::from(local_config).required(false))
            .add_source(
                Environment::with_prefix("TINYINFER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Settings>()?;

        settings.validate()?;
        Ok(settings)
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("model.directory", "models")?
            .set_default("runtime.profile", "disable")?
            .set_default("runtime.bench_frames", 1000)?
            .set_default("stream.host", "127.0.0.1")?
            .set_default("stream.port", 5555)?
            .set_default("stream.timeout_ms", 5000)?
            .set_default("logging.level", "info")?
            .set_default("logging.directory", "logs")?
            .set_default("logging.json", false)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(q) = self.runtime.input_q {
            if q > 15 {
                return Err(ConfigError::Message(format!(
                    "input_q must be between 0 and 15, got: {}",
                    q
                )));
            }
        }

        if self.runtime.bench_frames == 0 {
            return Err(ConfigError::Message("bench_frames must be greater than 0".to_string()));
        }

        if self.stream.port == 0 {
            return Err(ConfigError::Message("stream port must be between 1 and 65535".to_string()));
        }

        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            _ => Err(ConfigError::Message(format!(
                "Invalid logging level: {}. Must be one of: error, warn, info, debug, trace",
                self.logging.level
            ))),
        }?;

        Ok(())
    }

    /// Resolve a model path against the configured model directory.
    pub fn model_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() || path.exists() {
            path.to_path_buf()
        } else {
            self.model.directory.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.stream.port, 5555);
        assert!(settings.runtime.profile.is_disabled());
        assert_eq!(settings.runtime.input_q, None);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_file_overrides_and_validation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            "[runtime]\nprofile = \"model,layer\"\ninput_q = 7\n[stream]\nport = 6000\n",
        )
        .unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.stream.port, 6000);
        assert_eq!(settings.runtime.input_q, Some(7));
        assert!(settings.runtime.profile.contains(ProfileConfig::ENABLE_LAYER));

        std::fs::write(dir.path().join("local.toml"), "[logging]\nlevel = \"loud\"\n").unwrap();
        assert!(Settings::load(dir.path()).is_err());
    }
}
