//! Configuration loader

use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use std::path::Path;

use super::types::AppConfig;
use crate::common::errors::{EngineError, Result};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. `BINANCE_API_KEY` / `BINANCE_API_SECRET`
/// 2. Environment variables (prefixed with APP, `__` as section separator)
/// 3. Configuration file (TOML format)
/// 4. Default values
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    dotenvy::dotenv().ok();

    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    finish(builder)
}

/// Load configuration from a TOML document, environment still applies on top
pub fn load_from_str(toml: &str) -> Result<AppConfig> {
    let builder = Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
    finish(builder)
}

fn finish(builder: ConfigBuilder<config::builder::DefaultState>) -> Result<AppConfig> {
    let builder = builder
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("binance.api_key", std::env::var("BINANCE_API_KEY").ok())
        .and_then(|b| {
            b.set_override_option("binance.api_secret", std::env::var("BINANCE_API_SECRET").ok())
        })
        .map_err(|e| EngineError::Configuration(e.to_string()))?;

    let config = builder
        .build()
        .map_err(|e| EngineError::Configuration(e.to_string()))?;

    let app: AppConfig = config
        .try_deserialize()
        .map_err(|e| EngineError::Configuration(e.to_string()))?;

    app.validate()?;
    Ok(app)
}
