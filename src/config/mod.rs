//! Configuration management
//!
//! Defaults, optionally overlaid by a TOML file and then by
//! `RENDEZVOUS__<SECTION>__<KEY>` environment variables. Durations are in
//! milliseconds.

use crate::application::session::SessionConfig;
use crate::infrastructure::protocols::relay::ChannelConfig;
use crate::infrastructure::retry::BackoffPolicy;
use config::{ConfigError, Environment, File, Map};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "RENDEZVOUS";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registrar: RegistrarConfig,
    pub signaling: SignalingConfig,
    pub session: SessionTimers,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrarConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub backoff: BackoffPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Used unless the room service hands out its own relay URL
    pub relay_url: String,
    pub queue_depth: usize,
    pub connect_timeout_ms: u64,
    pub reconnect: BackoffPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTimers {
    pub negotiation_timeout_ms: u64,
    pub reconnect_grace_ms: u64,
    pub leave_grace_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set
    pub filter: String,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_ms: 10_000,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        let channel = ChannelConfig::default();
        Self {
            relay_url: "ws://localhost:8089/ws".to_string(),
            queue_depth: channel.queue_depth,
            connect_timeout_ms: channel.connect_timeout_ms,
            reconnect: channel.reconnect,
        }
    }
}

impl Default for SessionTimers {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            negotiation_timeout_ms: session.negotiation_timeout_ms,
            reconnect_grace_ms: session.reconnect_grace_ms,
            leave_grace_ms: session.leave_grace_ms,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,rendezvous=debug".to_string(),
        }
    }
}

impl Config {
    /// Load defaults, the optional file, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`Config::load`], reading overrides from `env` instead of the process environment
    pub fn load_with_env(path: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.registrar.request_timeout_ms)
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            queue_depth: self.signaling.queue_depth,
            connect_timeout_ms: self.signaling.connect_timeout_ms,
            reconnect: self.signaling.reconnect,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            negotiation_timeout_ms: self.session.negotiation_timeout_ms,
            reconnect_grace_ms: self.session.reconnect_grace_ms,
            leave_grace_ms: self.session.leave_grace_ms,
            registrar_retry: self.registrar.backoff,
            channel: self.channel_config(),
        }
    }
}
