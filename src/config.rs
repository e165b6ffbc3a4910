use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

pub mod cache;
pub mod logging;
pub mod registries;
pub mod server;


pub use cache::CacheConfig;
pub use logging::LoggingConfig;
pub use registries::RegistriesConfig;
pub use server::ServerConfig;

pub const DEFAULT_CONFIG_FILE: &str = "capillary.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub registries: RegistriesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let candidate = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if candidate.exists() {
            let raw = fs::read_to_string(&candidate)
                .with_context(|| format!("failed to read config {}", candidate.display()))?;
            let mut config: Config = toml::from_str(&raw)
                .with_context(|| format!("invalid config {}", candidate.display()))?;
            config
                .cache
                .normalize_paths(candidate.parent().unwrap_or(Path::new(".")));
            Ok(config)
        } else {
            if let Some(path) = candidate.to_str() {
                tracing::warn!("configuration file {path} not found, using defaults");
            } else {
                tracing::warn!("configuration file not found, using defaults");
            }
            let mut config = Config::default();
            let cwd = std::env::current_dir().context("reading current directory")?;
            config.cache.normalize_paths(&cwd);
            Ok(config)
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("npm", &self.registries.npm),
            ("jsr", &self.registries.jsr),
        ] {
            if url.scheme() != "https" && url.scheme() != "http" {
                bail!("unsupported {name} registry scheme {url}");
            }
            if url.host_str().is_none() {
                bail!("{name} registry url {url} has no host");
            }
        }
        if let Some(public_url) = self
            .server
            .public_url
            .as_ref()
            .filter(|url| url.scheme() != "https" && url.scheme() != "http")
        {
            bail!("unsupported public url scheme {public_url}");
        }
        if self.server.workers == 0 {
            bail!("server.workers must be at least 1");
        }
        Ok(())
    }
}
