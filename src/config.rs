//! Harness configuration.
//!
//! # Configuration Sources
//! - Programmatic defaults (`HarnessConfig::default()`)
//! - JSON (`HarnessConfig::from_json_str`); missing fields take their defaults
//! - Environment variables prefixed with `RESTAKE_HARNESS_`, after loading a `.env` file if present
//!   (`HarnessConfig::from_env`)

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use crate::core::shares::SHARE_TOLERANCE;
use crate::error::{HarnessError, Result};

const ENV_PREFIX: &str = "RESTAKE_HARNESS_";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Seed for every random draw in a scenario. Same seed, same run.
    pub seed: u64,
    /// Lower bound of a random fungible token balance.
    pub min_token_balance: u64,
    /// Upper bound of a random fungible token balance.
    pub max_token_balance: u64,
    /// Upper bound of a random validator count for native stake.
    pub max_validators: u64,
    /// Tolerance for share and balance delta checks.
    pub share_tolerance: u128,
    /// Withdrawal delay used by the reference backend for every strategy.
    pub withdrawal_delay_blocks: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            min_token_balance: 1_000_000,
            max_token_balance: 1_000_000_000_000_000_000,
            max_validators: 5,
            share_tolerance: SHARE_TOLERANCE,
            withdrawal_delay_blocks: 10,
        }
    }
}

fn env_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let key = format!("{}{}", ENV_PREFIX, name);
    match std::env::var(&key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| HarnessError::Config(format!("Invalid {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// A missing `.env` file is fine; an unreadable or malformed one is a configuration error.
fn env_file_loaded<T>(loaded: dotenvy::Result<T>) -> Result<()> {
    match loaded {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(HarnessError::Config(format!("Invalid .env file: {}", e))),
    }
}

impl HarnessConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| HarnessError::Config(format!("Invalid JSON config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `RESTAKE_HARNESS_*` variables:
    /// `SEED`, `MIN_TOKEN_BALANCE`, `MAX_TOKEN_BALANCE`, `MAX_VALIDATORS`, `SHARE_TOLERANCE`,
    /// `WITHDRAWAL_DELAY_BLOCKS`.
    pub fn from_env() -> Result<Self> {
        env_file_loaded(dotenvy::dotenv())?;
        let mut config = Self::default();
        if let Some(seed) = env_var("SEED")? {
            config.seed = seed;
        }
        if let Some(min) = env_var("MIN_TOKEN_BALANCE")? {
            config.min_token_balance = min;
        }
        if let Some(max) = env_var("MAX_TOKEN_BALANCE")? {
            config.max_token_balance = max;
        }
        if let Some(max) = env_var("MAX_VALIDATORS")? {
            config.max_validators = max;
        }
        if let Some(tolerance) = env_var("SHARE_TOLERANCE")? {
            config.share_tolerance = tolerance;
        }
        if let Some(delay) = env_var("WITHDRAWAL_DELAY_BLOCKS")? {
            config.withdrawal_delay_blocks = delay;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_token_balance == 0 {
            return Err(HarnessError::Config("min_token_balance must be greater than 0".into()));
        }
        if self.min_token_balance > self.max_token_balance {
            return Err(HarnessError::Config(format!(
                "min_token_balance {} exceeds max_token_balance {}",
                self.min_token_balance, self.max_token_balance
            )));
        }
        if self.max_validators == 0 {
            return Err(HarnessError::Config("max_validators must be at least 1".into()));
        }
        if self.share_tolerance > SHARE_TOLERANCE {
            return Err(HarnessError::Config(format!(
                "share_tolerance must be at most {}",
                SHARE_TOLERANCE
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(HarnessConfig::default().validate().is_ok());
    }

    #[test]
    fn test_json_fills_missing_fields() {
        let config = HarnessConfig::from_json_str(r#"{"seed": 7, "max_validators": 2}"#).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.max_validators, 2);
        assert_eq!(config.withdrawal_delay_blocks, HarnessConfig::default().withdrawal_delay_blocks);
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let config = HarnessConfig {
            min_token_balance: 10,
            max_token_balance: 5,
            ..HarnessConfig::default()
        };
        assert!(matches!(config.validate(), Err(HarnessError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_loose_tolerance() {
        let config = HarnessConfig {
            share_tolerance: 2,
            ..HarnessConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(HarnessConfig::from_json_str(r#"{"max_validators": 0}"#).is_err());
    }

    #[test]
    fn test_malformed_env_file_is_rejected() {
        let dir = std::env::temp_dir().join(format!("restake-harness-env-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let bad = dir.join("bad.env");
        std::fs::write(&bad, "RESTAKE_HARNESS_SEED='unterminated\n").unwrap();

        let err = env_file_loaded(dotenvy::from_path(&bad)).unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
        assert!(env_file_loaded(dotenvy::from_path(dir.join("missing.env"))).is_ok());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("RESTAKE_HARNESS_MAX_VALIDATORS", "3");
        let config = HarnessConfig::from_env().unwrap();
        std::env::remove_var("RESTAKE_HARNESS_MAX_VALIDATORS");
        assert_eq!(config.max_validators, 3);
    }
}
