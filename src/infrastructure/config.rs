use crate::application::live_channel::ChannelSettings;
use anyhow::{Context, bail};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub api: ApiConfig,
    pub channel: ChannelConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// Base address of the template collection service
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    pub endpoint: String,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_liveness_threshold_ms")]
    pub liveness_threshold_ms: u64,
    #[serde(default = "default_max_missed_pongs")]
    pub max_missed_pongs: u32,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_base_reconnect_delay_ms")]
    pub base_reconnect_delay_ms: u64,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_liveness_threshold_ms() -> u64 {
    90_000
}

fn default_max_missed_pongs() -> u32 {
    3
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_base_reconnect_delay_ms() -> u64 {
    1_000
}

impl ChannelConfig {
    pub fn to_settings(&self) -> anyhow::Result<ChannelSettings> {
        let endpoint = Url::parse(&self.endpoint)
            .with_context(|| format!("Invalid live channel endpoint '{}'", self.endpoint))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            bail!("Live channel endpoint must use ws:// or wss://, got '{}'", self.endpoint);
        }
        if self.heartbeat_interval_ms == 0 {
            bail!("channel.heartbeat_interval_ms must be greater than zero");
        }

        Ok(ChannelSettings {
            endpoint: self.endpoint.clone(),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            liveness_threshold: Duration::from_millis(self.liveness_threshold_ms),
            max_missed_pongs: self.max_missed_pongs,
            max_reconnect_attempts: self.max_reconnect_attempts,
            base_reconnect_delay: Duration::from_millis(self.base_reconnect_delay_ms),
        })
    }
}

impl ApiConfig {
    pub fn base_url(&self) -> anyhow::Result<Url> {
        Url::parse(&self.base_url).with_context(|| format!("Invalid API base url '{}'", self.base_url))
    }
}

/// `config/live_tiles.toml` (optional) overridden by `LIVE_TILES__SECTION__KEY` variables
pub fn load_app_config() -> anyhow::Result<AppConfig> {
    build_app_config(
        config::Config::builder()
            .add_source(config::File::with_name("config/live_tiles").required(false))
            .add_source(environment()),
    )
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("LIVE_TILES")
        .separator("__")
        .try_parsing(true)
}

fn build_app_config(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> anyhow::Result<AppConfig> {
    let settings = builder.build()?;
    settings
        .try_deserialize()
        .context("Missing or invalid live-tiles configuration")
}
