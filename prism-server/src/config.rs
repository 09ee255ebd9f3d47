//! Server Configuration
//!
//! Loaded from an optional `.env` file, an optional `prism.toml`, then
//! environment variables (later sources win).

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::derivation::default_program_id;
use crate::services::ledger::ConfirmPolicy;
use crate::services::{LifecycleConfig, ProverConfig};
use crate::types::Address;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// CORS allowed origins, comma separated in the environment
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Force simulated proofs; never load a circuit
    #[serde(default)]
    pub dev_mode: bool,

    /// Compiled solvency circuit
    #[serde(default = "ProverConfig::default_circuit_path")]
    pub circuit_path: PathBuf,

    /// Hex program address namespacing derived addresses
    pub program_id: Option<String>,

    /// Hex ed25519 secret of the server wallet
    pub wallet_secret_key: Option<String>,

    /// Degrade failed cryptographic calls to simulated proofs
    #[serde(default = "default_true")]
    pub fallback_on_backend_error: bool,

    #[serde(default = "default_confirm_initial_backoff_ms")]
    pub confirm_initial_backoff_ms: u64,

    #[serde(default = "default_confirm_max_backoff_ms")]
    pub confirm_max_backoff_ms: u64,

    #[serde(default = "default_confirm_max_attempts")]
    pub confirm_max_attempts: u32,

    /// Re-reads of the context count after an index conflict
    #[serde(default = "default_context_index_retries")]
    pub context_index_retries: u32,

    /// Funds credited to the wallet on the in-process ledger
    #[serde(default = "default_initial_lamports")]
    pub initial_lamports: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_confirm_initial_backoff_ms() -> u64 {
    200
}

fn default_confirm_max_backoff_ms() -> u64 {
    2_000
}

fn default_confirm_max_attempts() -> u32 {
    10
}

fn default_context_index_retries() -> u32 {
    2
}

fn default_initial_lamports() -> u64 {
    1_000_000_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            json_logs: false,
            cors_origins: default_cors_origins(),
            dev_mode: false,
            circuit_path: ProverConfig::default_circuit_path(),
            program_id: None,
            wallet_secret_key: None,
            fallback_on_backend_error: default_true(),
            confirm_initial_backoff_ms: default_confirm_initial_backoff_ms(),
            confirm_max_backoff_ms: default_confirm_max_backoff_ms(),
            confirm_max_attempts: default_confirm_max_attempts(),
            context_index_retries: default_context_index_retries(),
            initial_lamports: default_initial_lamports(),
        }
    }
}

impl Config {
    /// Load configuration from `.env`, `prism.toml` and the environment
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        config::Config::builder()
            .add_source(config::File::with_name("prism").required(false))
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors_origins"),
            )
            .build()?
            .try_deserialize()
    }

    /// Get socket address for binding
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    /// Configured program id, or the built-in default
    pub fn program_id(&self) -> Result<Address, crate::error::ValidationError> {
        match &self.program_id {
            Some(hex) => hex.parse(),
            None => Ok(default_program_id()),
        }
    }

    pub fn confirm_policy(&self) -> ConfirmPolicy {
        ConfirmPolicy {
            initial_backoff: Duration::from_millis(self.confirm_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.confirm_max_backoff_ms),
            max_attempts: self.confirm_max_attempts,
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            confirm: self.confirm_policy(),
            context_index_retries: self.context_index_retries,
            ..LifecycleConfig::default()
        }
    }

    pub fn prover_config(&self) -> ProverConfig {
        ProverConfig {
            dev_mode: self.dev_mode,
            circuit_path: self.circuit_path.clone(),
            fallback_on_backend_error: self.fallback_on_backend_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert!(config.fallback_on_backend_error);
        assert_eq!(config.program_id().unwrap(), default_program_id());
        assert_eq!(config.socket_addr().unwrap().port(), 3000);
        assert_eq!(config.confirm_policy(), ConfirmPolicy::default());
    }

    #[test]
    fn test_invalid_host_is_an_error() {
        let config = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(config.socket_addr().is_err());
    }

    #[test]
    fn test_program_id_override() {
        let config = Config {
            program_id: Some(hex::encode([9u8; 32])),
            ..Config::default()
        };
        assert_eq!(config.program_id().unwrap(), Address::new([9u8; 32]));

        let bad = Config {
            program_id: Some("zz".to_string()),
            ..Config::default()
        };
        assert!(bad.program_id().is_err());
    }
}
