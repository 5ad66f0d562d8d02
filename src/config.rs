//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the operator API token) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::engine::sweeper::SweeperConfig;
use crate::engine::HouseConfig;
use crate::pool::RiskParameters;
use crate::types::{Amount, AMOUNT_SCALE};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub house: HouseSection,
    pub risk: RiskConfig,
    pub commission: CommissionConfig,
    pub draws: DrawsConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HouseSection {
    pub name: String,
    pub currency: String,
    #[serde(default)]
    pub state_file: Option<String>,
    pub sweep_interval_secs: u64,
    /// Bankroll deposited on a fresh start, in whole currency units.
    #[serde(default)]
    pub initial_bankroll: u64,
}

/// Risk settings in whole currency units; converted to fixed-point on use.
#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    pub reserve_ratio: Decimal,
    pub risk_factor: Decimal,
    pub absolute_max_payout: u64,
    pub min_bet: u64,
    pub max_bet: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommissionConfig {
    pub rate: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DrawsConfig {
    pub stale_after_secs: u64,
    pub results_sla_secs: u64,
    #[serde(default)]
    pub auto_schedule: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub auto_open: bool,
}

fn default_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
    pub operator_token_env: String,
}

/// Whole units to fixed-point, failing instead of wrapping.
fn units(value: u64, field: &str) -> Result<Amount> {
    Amount::try_from(value)
        .ok()
        .and_then(|v| v.checked_mul(AMOUNT_SCALE))
        .with_context(|| format!("{field} = {value} is out of range"))
}

fn secs(value: u64, field: &str) -> Result<chrono::Duration> {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .with_context(|| format!("{field} = {value} is out of range"))
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    pub fn risk_parameters(&self) -> Result<RiskParameters> {
        Ok(RiskParameters {
            reserve_ratio: self.risk.reserve_ratio,
            risk_factor: self.risk.risk_factor,
            absolute_max_payout: units(self.risk.absolute_max_payout, "risk.absolute_max_payout")?,
            min_bet: units(self.risk.min_bet, "risk.min_bet")?,
            max_bet: units(self.risk.max_bet, "risk.max_bet")?,
        })
    }

    pub fn house_config(&self) -> Result<HouseConfig> {
        let config = HouseConfig {
            risk: self.risk_parameters()?,
            commission_rate: self.commission.rate,
            stale_after: secs(self.draws.stale_after_secs, "draws.stale_after_secs")?,
            results_sla: secs(self.draws.results_sla_secs, "draws.results_sla_secs")?,
        };
        config.validate().context("Invalid house configuration")?;
        Ok(config)
    }

    pub fn sweeper_config(&self) -> Result<SweeperConfig> {
        Ok(SweeperConfig {
            auto_schedule: self.draws.auto_schedule,
            draw_interval: secs(self.draws.interval_secs, "draws.interval_secs")?,
            auto_open: self.draws.auto_open,
        })
    }

    pub fn initial_bankroll(&self) -> Result<Amount> {
        units(self.house.initial_bankroll, "house.initial_bankroll")
    }

    /// Operator bearer token, if its env var is set and non-empty.
    pub fn operator_token(&self) -> Option<SecretString> {
        Self::resolve_env(&self.server.operator_token_env)
            .ok()
            .filter(|token| !token.is_empty())
            .map(SecretString::new)
    }
}
