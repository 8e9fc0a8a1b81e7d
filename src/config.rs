//! Configuration for the payment gate server.

use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use url::Url;

use crate::chain::Address;
use crate::pricing::ModelPrice;
use crate::util::MoneyAmount;

/// CLI arguments for the payment gate server.
#[derive(Parser, Debug)]
#[command(name = "sol-paygate")]
#[command(about = "Payment-gated HTTP server")]
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
    payment: PaymentConfig,
    /// Per-model price table, keyed by model id.
    #[serde(default)]
    models: HashMap<String, ModelPrice>,
}

/// Payment enforcement settings: the payee, the accepted token, and
/// operational bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfig {
    /// Wallet the recipient token account must be owned by.
    pub recipient: Address,
    /// Token mint accepted for settlement.
    pub asset: Address,
    #[serde(default = "config_defaults::default_rpc_url")]
    pub rpc_url: Url,
    /// How long an issued challenge stays redeemable, in seconds.
    #[serde(default = "config_defaults::default_challenge_window_secs")]
    pub challenge_window_secs: u64,
    /// Hard bound on outstanding challenges.
    #[serde(default = "config_defaults::default_max_challenges")]
    pub max_challenges: usize,
    /// Per-call ledger read timeout, in milliseconds.
    #[serde(default = "config_defaults::default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    /// Display currency on 402 responses.
    #[serde(default = "config_defaults::default_currency")]
    pub currency: String,
    /// Smallest amount ever quoted.
    #[serde(default = "config_defaults::default_minimum_amount")]
    pub minimum_amount: MoneyAmount,
    /// Amount quoted for models missing from the price table.
    #[serde(default = "config_defaults::default_fallback_amount")]
    pub fallback_amount: MoneyAmount,
}

pub mod config_defaults {
    use super::MoneyAmount;
    use crate::challenge::{DEFAULT_MAX_ENTRIES, DEFAULT_WINDOW_SECS};
    use std::env;
    use std::net::IpAddr;
    use std::str::FromStr;
    use url::Url;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
    pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 10_000;
    pub const DEFAULT_CURRENCY: &str = "USDC";
    pub const DEFAULT_MINIMUM_AMOUNT: &str = "0.001";
    pub const DEFAULT_FALLBACK_AMOUNT: &str = "0.01";

    /// Fallback: $PORT env var -> 8080
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Fallback: $HOST env var -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(DEFAULT_HOST.parse().unwrap()))
    }

    /// Fallback: $RPC_URL env var -> Solana mainnet public endpoint
    pub fn default_rpc_url() -> Url {
        env::var("RPC_URL")
            .ok()
            .and_then(|s| Url::parse(&s).ok())
            .unwrap_or_else(|| Url::parse(DEFAULT_RPC_URL).unwrap())
    }

    pub fn default_challenge_window_secs() -> u64 {
        DEFAULT_WINDOW_SECS
    }

    pub fn default_max_challenges() -> usize {
        DEFAULT_MAX_ENTRIES
    }

    pub fn default_rpc_timeout_ms() -> u64 {
        DEFAULT_RPC_TIMEOUT_MS
    }

    pub fn default_currency() -> String {
        DEFAULT_CURRENCY.to_string()
    }

    pub fn default_minimum_amount() -> MoneyAmount {
        MoneyAmount::from_str(DEFAULT_MINIMUM_AMOUNT).unwrap()
    }

    pub fn default_fallback_amount() -> MoneyAmount {
        MoneyAmount::from_str(DEFAULT_FALLBACK_AMOUNT).unwrap()
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn payment(&self) -> &PaymentConfig {
        &self.payment
    }

    pub fn models(&self) -> &HashMap<String, ModelPrice> {
        &self.models
    }

    /// Load configuration from CLI arguments and JSON file.
    ///
    /// The config file path comes from `--config <path>` or the `CONFIG`
    /// env var, defaulting to `./config.json`. Values not present in the
    /// file resolve via environment variables or defaults during
    /// deserialization.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}
