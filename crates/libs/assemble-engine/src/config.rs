//! Static configuration loading: a `serde::Deserialize` struct loaded from
//! TOML via `from_toml`/`from_path`, with sensible defaults for every
//! tuning knob but the account seed.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::protocol::PublicKey;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("account_seed is not valid hex: {0}")]
    SeedHex(#[from] hex::FromHexError),
    #[error("account_seed must decode to exactly 32 bytes, got {0}")]
    SeedLength(usize),
}

fn default_transport_invoking_interval_ms() -> u64 {
    250
}

fn default_transport_queue_capacity() -> usize {
    64
}

fn default_reget_times_limit() -> u8 {
    3
}

fn default_reput_times_limit() -> u8 {
    1
}

/// Everything the engine needs at `Assembler::start`: the Transporter's
/// dispatch cadence and admission threshold, the local key material, and
/// the two retry budgets (§10.3).
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_transport_invoking_interval_ms")]
    pub transport_invoking_interval_ms: u64,
    pub account_seed: String,
    #[serde(default = "default_transport_queue_capacity")]
    pub transport_queue_capacity: usize,
    #[serde(default = "default_reget_times_limit")]
    pub reget_times_limit: u8,
    #[serde(default = "default_reput_times_limit")]
    pub reput_times_limit: u8,
}

impl EngineConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Hex-decode `account_seed` into the local public key, consumed once at
    /// `Assembler::start`. Key derivation proper (seed → keypair) is a
    /// cryptographic primitive this crate consumes as a pure function and
    /// does not implement; `account_seed` is taken to already be the
    /// 32-byte public key in hex: the configured seed doubles as the node's
    /// identity rather than being fed through a separate derivation step.
    pub fn self_public_key(&self) -> Result<PublicKey, ConfigError> {
        let bytes = hex::decode(&self.account_seed)?;
        if bytes.len() != 32 {
            return Err(ConfigError::SeedLength(bytes.len()));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml_with_defaults() {
        let toml = format!("account_seed = \"{}\"", "ab".repeat(32));
        let config = EngineConfig::from_toml(&toml).unwrap();
        assert_eq!(config.transport_invoking_interval_ms, 250);
        assert_eq!(config.transport_queue_capacity, 64);
        assert_eq!(config.reget_times_limit, 3);
        assert_eq!(config.reput_times_limit, 1);
    }

    #[test]
    fn overrides_are_honored() {
        let toml = format!(
            "account_seed = \"{}\"\ntransport_invoking_interval_ms = 50\nreget_times_limit = 5\n",
            "cd".repeat(32)
        );
        let config = EngineConfig::from_toml(&toml).unwrap();
        assert_eq!(config.transport_invoking_interval_ms, 50);
        assert_eq!(config.reget_times_limit, 5);
    }

    #[test]
    fn self_public_key_requires_32_bytes() {
        let toml = "account_seed = \"abcd\"".to_string();
        let config = EngineConfig::from_toml(&toml).unwrap();
        assert!(matches!(config.self_public_key(), Err(ConfigError::SeedLength(2))));
    }

    #[test]
    fn self_public_key_decodes_valid_seed() {
        let toml = format!("account_seed = \"{}\"", "11".repeat(32));
        let config = EngineConfig::from_toml(&toml).unwrap();
        assert_eq!(config.self_public_key().unwrap(), [0x11u8; 32]);
    }

    #[test]
    fn missing_account_seed_is_a_toml_error() {
        assert!(EngineConfig::from_toml("").is_err());
    }
}
