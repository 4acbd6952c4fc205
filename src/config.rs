//! Configuration module for the paydrop server.
//!
//! Configuration is a JSON file (`--config <path>`, `$CONFIG`, or `./config.json`).
//! Any string value may reference an environment variable instead of holding a
//! literal, which keeps wallet addresses and RPC keys out of the file:
//!
//! ```json
//! {
//!   "port": 5000,
//!   "public_url": "https://drop.example.com/",
//!   "receiver": "$PAYMENT_WALLET",
//!   "chain": {
//!     "id": "eip155:84532",
//!     "rpc": [{ "http": "${BASE_SEPOLIA_RPC}", "rate_limit": 20 }]
//!   },
//!   "confirmation": { "poll_interval_secs": 1, "max_attempts": 60 }
//! }
//! ```

use alloy_primitives::Address;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::chain::Eip155ChainReference;

/// CLI arguments for the paydrop server.
#[derive(Parser, Debug)]
#[command(name = "paydrop")]
#[command(about = "Pay-to-unlock file drop HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Server configuration.
///
/// Fields use serde defaults that fall back to environment variables,
/// then to hardcoded defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    /// Base URL share links are built from. Defaults to `http://localhost:{port}/`.
    #[serde(default)]
    public_url: Option<LiteralOrEnv<Url>>,
    chain: ChainConfig,
    /// Address every payment must be sent to.
    receiver: LiteralOrEnv<Address>,
    #[serde(default = "config_defaults::default_storage_dir")]
    storage_dir: PathBuf,
    #[serde(default)]
    confirmation: ConfirmationConfig,
    /// Require the transaction sender to equal the claimed payer.
    #[serde(default = "config_defaults::default_verify_sender")]
    verify_sender: bool,
    #[serde(default = "config_defaults::default_max_upload_bytes")]
    max_upload_bytes: usize,
}

/// The chain payments settle on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// CAIP-2 identifier, e.g. `"eip155:84532"`.
    pub id: Eip155ChainReference,
    /// RPC providers, tried in order with fallback.
    pub rpc: Vec<RpcConfig>,
}

/// RPC provider configuration for a single provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcConfig {
    /// HTTP URL for the RPC endpoint.
    pub http: LiteralOrEnv<Url>,
    /// Rate limit for requests per second (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
}

/// Confirmation polling cadence: one receipt query per interval, at most `max_attempts` queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmationConfig {
    #[serde(default = "config_defaults::default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "config_defaults::default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: config_defaults::default_poll_interval_secs(),
            max_attempts: config_defaults::default_max_attempts(),
        }
    }
}

impl ConfirmationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

pub mod config_defaults {
    use std::env;
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::PathBuf;

    pub const DEFAULT_PORT: u16 = 5000;
    pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    pub const DEFAULT_STORAGE_DIR: &str = "storage";
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;
    pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

    /// Returns the default port value with fallback: $PORT env var -> 5000
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Returns the default host value with fallback: $HOST env var -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HOST)
    }

    pub fn default_storage_dir() -> PathBuf {
        PathBuf::from(DEFAULT_STORAGE_DIR)
    }

    pub fn default_poll_interval_secs() -> u64 {
        DEFAULT_POLL_INTERVAL_SECS
    }

    pub fn default_max_attempts() -> u32 {
        DEFAULT_MAX_ATTEMPTS
    }

    pub fn default_verify_sender() -> bool {
        true
    }

    pub fn default_max_upload_bytes() -> usize {
        DEFAULT_MAX_UPLOAD_BYTES
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(&'static str),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// Base URL share links are built from.
    pub fn public_url(&self) -> Url {
        match &self.public_url {
            Some(url) => url.inner().clone(),
            None => {
                let mut url = Url::from_str("http://localhost/").expect("static url");
                let _ = url.set_port(Some(self.port));
                url
            }
        }
    }

    pub fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    pub fn receiver(&self) -> Address {
        *self.receiver.inner()
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn confirmation(&self) -> ConfirmationConfig {
        self.confirmation
    }

    pub fn verify_sender(&self) -> bool {
        self.verify_sender
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Load configuration from CLI arguments and JSON file.
    ///
    /// The config file path is determined by:
    /// 1. `--config <path>` CLI argument
    /// 2. `$CONFIG`
    /// 3. `./config.json`
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        content.parse()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.chain.rpc.is_empty() {
            return Err(ConfigError::Invalid("chain.rpc must list at least one provider"));
        }
        if self.confirmation.max_attempts == 0 {
            return Err(ConfigError::Invalid("confirmation.max_attempts must be positive"));
        }
        if self.confirmation.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "confirmation.poll_interval_secs must be positive",
            ));
        }
        if self.public_url().cannot_be_a_base() {
            return Err(ConfigError::Invalid("public_url must be an absolute http(s) url"));
        }
        Ok(self)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = serde_json::from_str(s)?;
        config.validate()
    }
}

// ============================================================================
// Environment Variable Resolution
// ============================================================================

/// A transparent wrapper that resolves environment variables during deserialization.
///
/// Supports both literal values and environment variable references:
/// - Literal: `"https://sepolia.base.org"`
/// - Simple env var: `"$BASE_SEPOLIA_RPC"`
/// - Braced env var: `"${BASE_SEPOLIA_RPC}"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn from_literal(value: T) -> Self {
        Self(value)
    }

    pub fn inner(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }

    /// Returns the variable name if the string matches `$VAR` or `${VAR}` syntax.
    fn parse_env_var_syntax(s: &str) -> Option<&str> {
        if let Some(braced) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
            Some(braced)
        } else if let Some(var_name) = s.strip_prefix('$') {
            let is_name =
                !var_name.is_empty() && var_name.chars().all(|c| c.is_alphanumeric() || c == '_');
            is_name.then_some(var_name)
        } else {
            None
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        let value = match Self::parse_env_var_syntax(&s) {
            Some(var_name) => std::env::var(var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{}' not found (referenced as '{}')",
                    var_name, s
                ))
            })?,
            None => s,
        };

        let parsed = value
            .trim()
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value: {}", e)))?;

        Ok(LiteralOrEnv(parsed))
    }
}

impl<T> Serialize for LiteralOrEnv<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}
