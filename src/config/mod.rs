use crate::models::EngineConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// File name of the engine configuration inside the config directory.
pub const CONFIG_FILE_NAME: &str = "holeinspect.yaml";

/// Prefix of environment variables overriding file values, e.g.
/// `HOLEINSPECT__SYNC__BUFFER_SIZE=8`.
pub const ENV_PREFIX: &str = "HOLEINSPECT";

/// Configuration manager for loading and saving the YAML engine configuration.
///
/// Loading layers, lowest priority first:
/// - built-in defaults (serde `default` attributes on [`EngineConfig`])
/// - `holeinspect.yaml` in the config directory, when present
/// - `HOLEINSPECT__<SECTION>__<KEY>` environment variables
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
        })
    }

    /// Load the engine configuration.
    ///
    /// # Returns
    /// The layered EngineConfig; defaults if neither the file nor any override exists
    pub fn load_engine_config(&self) -> Result<EngineConfig> {
        if !self.config_path.exists() {
            tracing::warn!(
                "Engine config file not found at {}, using defaults",
                self.config_path
            );
        }

        let layered = config::Config::builder()
            .add_source(
                config::File::new(self.config_path.as_str(), config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read engine config: {}", self.config_path))?;

        let engine_config: EngineConfig = layered
            .try_deserialize()
            .with_context(|| format!("Failed to parse engine config: {}", self.config_path))?;

        tracing::info!("Loaded engine config from {}", self.config_dir);
        Ok(engine_config)
    }

    /// Save the engine configuration file.
    pub fn save_engine_config(&self, engine_config: &EngineConfig) -> Result<()> {
        let yaml_string = serde_yaml_ng::to_string(engine_config)
            .context("Failed to serialize engine config to YAML")?;

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write engine config: {}", self.config_path))?;

        tracing::info!("Saved engine config to {}", self.config_path);
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    /// Get the configuration file path.
    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }
}
