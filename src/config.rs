//! Relay configuration file support
//!
//! A single JSON document. Every field is optional; command-line flags
//! override whatever the file sets.

use anyhow::{Context, Result};
use rpipe_arq::GbnEngine;
use rpipe_pipe::{Engine, EngineConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Conversation id of the only session a client opens
pub const CLIENT_CONV: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Server bind address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Server a client talks to
    #[serde(default = "default_target")]
    pub target: String,

    /// Default tracing filter
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Router flush period in milliseconds
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// How long a client waits for its echo, in milliseconds
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout: u64,

    /// Per-session engine settings. `mtu` is the link MTU; the session
    /// header is carved out of it.
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_listen() -> String {
    "0.0.0.0:10010".to_string()
}

fn default_target() -> String {
    "127.0.0.1:10010".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_interval() -> u64 {
    10
}

fn default_reply_timeout() -> u64 {
    5_000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            target: default_target(),
            log_level: default_log_level(),
            interval: default_interval(),
            reply_timeout: default_reply_timeout(),
            engine: EngineConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load config from a specific file path
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Invalid config file: {:?}", path))
    }

    /// Parse config from a JSON string
    pub fn parse(content: &str) -> Result<Self> {
        let config: RelayConfig =
            serde_json::from_str(content).context("Failed to parse JSON config")?;

        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked before a socket is opened
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        self.target_addr()?;
        if self.interval == 0 {
            anyhow::bail!("Flush interval must be at least 1ms");
        }

        let engine = self.session_engine()?;
        GbnEngine::create(CLIENT_CONV, &engine).context("Engine settings rejected")?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.listen))
    }

    pub fn target_addr(&self) -> Result<SocketAddr> {
        self.target
            .parse()
            .with_context(|| format!("Invalid target address: {}", self.target))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout)
    }

    /// Engine settings as handed to each session's adapter
    pub fn session_engine(&self) -> Result<EngineConfig> {
        self.engine
            .for_session_layer(self.engine.mtu)
            .context("Link MTU too small")
    }
}
