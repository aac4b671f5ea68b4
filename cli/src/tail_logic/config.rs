use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lib_realtime::configs::DEFAULT_URL;
use lib_realtime::loggers::LogOptions;
use lib_realtime::{ClientConfig, ConfigError};
use serde::{Deserialize, Serialize};

/// How received messages are printed.
#[derive(ValueEnum, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One human-readable line per message.
    #[default]
    Text,
    /// The message as a JSON line.
    Json,
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(name = "channel_tail", about = "Tail real-time event channels over one WebSocket connection.", version)]
#[serde(rename_all = "camelCase")]
pub struct TailConfig {
    #[clap(long, env = "RT_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "RT_URL", help = "Event server WebSocket URL.")]
    pub url: Option<String>,

    #[clap(short = 'c', long = "channel", env = "RT_CHANNELS", value_delimiter = ',', help = "Channel to tail. Repeat or separate with commas.")]
    pub channels: Option<Vec<String>>,

    #[clap(long, env = "RT_RECONNECT_INTERVAL_MS", help = "Base reconnect delay in milliseconds.")]
    pub reconnect_interval: Option<u64>,

    #[clap(long, env = "RT_MAX_RECONNECT_ATTEMPTS", help = "Reconnect attempts before giving up.")]
    pub max_reconnect_attempts: Option<u32>,

    #[clap(long, env = "RT_HEARTBEAT_INTERVAL_MS", help = "Milliseconds between heartbeat pings.")]
    pub heartbeat_interval: Option<u64>,

    #[clap(long, env = "RT_PONG_TIMEOUT_MS", help = "Milliseconds of silence before the link is considered dead.")]
    pub pong_timeout: Option<u64>,

    #[clap(long, env = "RT_BUFFER_CAPACITY", help = "Messages kept per channel.")]
    pub buffer_capacity: Option<usize>,

    #[clap(long, env = "RT_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error, fatal).")]
    pub log_level: Option<String>,

    #[clap(long, env = "RT_LOG_DIR", help = "Directory for daily log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RT_LOG_JSON", help = "Log to the console as JSON lines (true/false).")]
    pub log_json: Option<bool>,

    #[clap(long, value_enum, env = "RT_OUTPUT", help = "Message output format.")]
    pub output: Option<OutputFormat>,
}

impl TailConfig {
    // Merge two configs, where 'other' overrides 'self' for Some values
    fn merge(self, other: TailConfig) -> TailConfig {
        TailConfig {
            config_path: other.config_path.or(self.config_path),
            url: other.url.or(self.url),
            channels: other.channels.or(self.channels),
            reconnect_interval: other.reconnect_interval.or(self.reconnect_interval),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            heartbeat_interval: other.heartbeat_interval.or(self.heartbeat_interval),
            pong_timeout: other.pong_timeout.or(self.pong_timeout),
            buffer_capacity: other.buffer_capacity.or(self.buffer_capacity),
            log_level: other.log_level.or(self.log_level),
            log_dir: other.log_dir.or(self.log_dir),
            log_json: other.log_json.or(self.log_json),
            output: other.output.or(self.output),
        }
    }

    fn defaults() -> TailConfig {
        let client = ClientConfig::default();
        TailConfig {
            url: Some(DEFAULT_URL.to_string()),
            channels: Some(Vec::new()),
            reconnect_interval: Some(client.reconnect_interval),
            max_reconnect_attempts: Some(client.max_reconnect_attempts),
            heartbeat_interval: Some(client.heartbeat_interval),
            buffer_capacity: Some(client.default_buffer_capacity),
            log_level: Some("info".to_string()),
            log_json: Some(false),
            output: Some(OutputFormat::Text),
            ..Default::default()
        }
    }

    /// Client settings for the resolved configuration.
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let base = ClientConfig::default();
        let config = ClientConfig {
            url: self.url.clone().unwrap_or(base.url),
            auto_connect: true,
            reconnect_interval: self.reconnect_interval.unwrap_or(base.reconnect_interval),
            max_reconnect_attempts: self
                .max_reconnect_attempts
                .unwrap_or(base.max_reconnect_attempts),
            heartbeat_interval: self.heartbeat_interval.unwrap_or(base.heartbeat_interval),
            pong_timeout: self.pong_timeout,
            default_buffer_capacity: self
                .buffer_capacity
                .unwrap_or(base.default_buffer_capacity),
            channel_capacities: base.channel_capacities,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            level: self.log_level.clone().unwrap_or_else(|| "info".to_string()),
            json: self.log_json.unwrap_or(false),
            ansi: true,
            log_dir: self.log_dir.clone(),
            file_prefix: "channel_tail".to_string(),
        }
    }

    pub fn channels(&self) -> &[String] {
        self.channels.as_deref().unwrap_or_default()
    }

    pub fn output(&self) -> OutputFormat {
        self.output.unwrap_or_default()
    }
}

/// `./channel_tail.json` when present, otherwise the per-user config dir.
fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from("channel_tail.json");
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir().map(|dir| dir.join("channel_tail").join("config.json"))
}

/// Layers defaults, the JSON config file and the parsed CLI/env values.
pub fn resolve(cli: TailConfig) -> Result<TailConfig> {
    let mut current = TailConfig::defaults();

    let path = cli.config_path.clone().or_else(default_config_path);
    if let Some(path) = path.filter(|p| p.exists()) {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let file_config: TailConfig = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        current = current.merge(file_config);
        current.config_path = Some(path);
    }

    Ok(current.merge(cli))
}

pub fn load_config() -> Result<TailConfig> {
    resolve(TailConfig::parse())
}
