//! Protocol constants and client tuning, loaded from TOML.
//!
//! ```toml
//! [channel]
//! min_deposit = "1000"
//! challenge_period = 86400
//!
//! [session]
//! proposal_timeout_ms = 5000
//! watch_margin = 600
//! keeper_interval_ms = 1000
//! ```

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::abiencode::types::U256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Constants of the custody ledger. A channel copies them when it is opened,
/// so later changes never affect open channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Smallest non-zero deposit, and the smallest total a channel may hold.
    pub min_deposit: U256,
    /// Length of the challenge window in seconds.
    pub challenge_period: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            min_deposit: U256::from(1),
            challenge_period: 24 * 60 * 60,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_deposit.is_zero() {
            return Err(ConfigError::Invalid("min_deposit must be positive"));
        }
        if self.challenge_period == 0 {
            return Err(ConfigError::Invalid("challenge_period must be positive"));
        }
        Ok(())
    }
}

/// Settings of the off-chain client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// How long a proposer waits for the countersignature before the
    /// proposal is abandoned.
    pub proposal_timeout_ms: u64,
    /// Seconds before a counterparty's challenge expires at which the
    /// channel is reported as due for watching.
    pub watch_margin: u64,
    /// Polling interval of the finalization keeper.
    pub keeper_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            proposal_timeout_ms: 5_000,
            watch_margin: 10 * 60,
            keeper_interval_ms: 1_000,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keeper_interval_ms == 0 {
            return Err(ConfigError::Invalid("keeper_interval_ms must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub channel: ChannelConfig,
    pub session: SessionConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.channel.validate()?;
        config.session.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let config = Config::from_toml_str(
            r#"
            [channel]
            min_deposit = "1000"
            challenge_period = 3600

            [session]
            proposal_timeout_ms = 250
            watch_margin = 60
            keeper_interval_ms = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.channel.min_deposit, U256::from(1000));
        assert_eq!(config.channel.challenge_period, 3600);
        assert_eq!(config.session.proposal_timeout_ms, 250);
        assert_eq!(config.session.watch_margin, 60);
        assert_eq!(config.session.keeper_interval_ms, 10);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config = Config::from_toml_str("[channel]\nmin_deposit = 5\n").unwrap();
        assert_eq!(config.channel.min_deposit, U256::from(5));
        assert_eq!(
            config.channel.challenge_period,
            ChannelConfig::default().challenge_period
        );
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn rejects_zero_challenge_period() {
        let err = Config::from_toml_str("[channel]\nchallenge_period = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = Config::from_toml_str("[channel]\nmin_depsit = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn toml_round_trip() {
        let config = Config {
            channel: ChannelConfig {
                min_deposit: U256::from(u128::MAX) * U256::from(4),
                challenge_period: 7,
            },
            session: SessionConfig::default(),
        };
        let s = config.to_toml_string().unwrap();
        assert_eq!(Config::from_toml_str(&s).unwrap(), config);
    }
}
