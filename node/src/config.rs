// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use idstate_kernel::config::{DEFAULT_MAX_LEVELS, MAX_KEY_BITS};

use crate::did::DidNetworkParams;
use crate::errors::ConfigError;

/// Environment variable naming an optional JSON config file.
pub const CONFIG_ENV: &str = "IDSTATE_CONFIG";

/// How revocation nonces are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoncePolicy {
    /// Counter advances only when the claim lands in the tree.
    Gapless,
    /// Every reservation burns a number, even if issuance later fails.
    GapTolerant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RhsMode {
    Disabled,
    Http { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub mode: RhsMode,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub queue_capacity: usize,
    pub breaker_threshold: u32,
    pub breaker_cooldown_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            mode: RhsMode::Disabled,
            batch_size: 100,
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 30_000,
            queue_capacity: 1024,
            breaker_threshold: 8,
            breaker_cooldown_ms: 60_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl PublisherConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.mode, RhsMode::Disabled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub max_levels: u16,
    pub nonce_policy: NoncePolicy,
    pub nonce_bits: u8,
    /// Keep this many archived revisions in the roots tree. `None` keeps all.
    pub roots_retention: Option<u64>,
    pub confirmation_timeout_secs: u64,
    pub deadline_check_interval_secs: u64,
    /// Extra networks for the `opid` DID method.
    pub did_networks: Vec<DidNetworkParams>,
    pub publisher: PublisherConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            max_levels: DEFAULT_MAX_LEVELS,
            nonce_policy: NoncePolicy::Gapless,
            nonce_bits: 32,
            roots_retention: None,
            confirmation_timeout_secs: 600,
            deadline_check_interval_secs: 15,
            did_networks: Vec::new(),
            publisher: PublisherConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load from the file named by `IDSTATE_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load(&path),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let cfg: NodeConfig = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_levels == 0 || self.max_levels > MAX_KEY_BITS {
            return Err(ConfigError::Invalid(format!(
                "max_levels must be in 1..={}, got {}",
                MAX_KEY_BITS, self.max_levels
            )));
        }
        if self.nonce_bits == 0 || self.nonce_bits > 64 {
            return Err(ConfigError::Invalid(format!("nonce_bits must be in 1..=64, got {}", self.nonce_bits)));
        }
        if self.roots_retention == Some(0) {
            return Err(ConfigError::Invalid("roots_retention must be at least 1".into()));
        }
        let p = &self.publisher;
        if p.batch_size == 0 || p.max_attempts == 0 || p.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "publisher batch_size, max_attempts and queue_capacity must be non-zero".into(),
            ));
        }
        if let RhsMode::Http { url } = &p.mode {
            if url.trim().is_empty() {
                return Err(ConfigError::Invalid("publisher url is empty".into()));
            }
        }
        Ok(())
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn deadline_check_interval(&self) -> Duration {
        Duration::from_secs(self.deadline_check_interval_secs.max(1))
    }
}
