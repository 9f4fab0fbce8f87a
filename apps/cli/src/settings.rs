//! CLI settings
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. `fims-query.toml` in the working directory, or the file passed with `--settings`
//! 3. `FIMS_QUERY_*` environment variables (a `.env` file is loaded first)
//!
//! Command line flags override all of them.

use anyhow::Context;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_SETTINGS_FILE: &str = "fims-query.toml";
pub const ENV_PREFIX: &str = "FIMS_QUERY";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub log_level: String,
    /// JSON log lines instead of human readable output.
    pub log_json: bool,
    /// Also write logs to this file.
    pub log_file: Option<PathBuf>,
    /// Query entity used when `--entity` is not given.
    pub default_entity: Option<String>,
    /// Restrict compiled queries to public expeditions.
    pub public_only: bool,
    /// Project configuration used when `--config` is not given.
    pub project_config: Option<PathBuf>,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_SETTINGS_FILE).required(false),
        };

        let settings: Settings = Config::builder()
            .set_default("log_level", "info")?
            .set_default("log_json", false)?
            .set_default("public_only", false)?
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            anyhow::bail!(
                "Unknown log level '{}', expected one of {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            );
        }

        if let Some(entity) = &self.default_entity {
            if entity.trim().is_empty() {
                anyhow::bail!("default_entity cannot be empty");
            }
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            log_file: None,
            default_entity: None,
            public_only: false,
            project_config: None,
        }
    }
}
