use crate::error::{OptimizerError, Result as CoreResult};
use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalancerConfig {
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub rebalance: RebalanceConfig,
    #[serde(default)]
    pub inputs: InputConfig,
}

/// Monte Carlo sampling parameters for one optimization run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    #[serde(default = "default_number_of_portfolios")]
    pub number_of_portfolios: usize,
    #[serde(default = "default_trading_days")]
    pub trading_days: f64,
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    /// Maximum annualised standard deviation a candidate may have
    #[serde(default = "default_risk_max")]
    pub risk_max: f64,
    /// Fixed seed for reproducible runs; drawn from entropy when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default)]
    pub parallel: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Smallest tradable share quantity; 1.0 trades whole shares only
    #[serde(default = "default_lot_size")]
    pub lot_size: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_price_history_path")]
    pub price_history_path: String,
    #[serde(default = "default_accounts_path")]
    pub accounts_path: String,
    /// Account to rebalance when the accounts file holds several
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Most recent closes to use per instrument
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookback_periods: Option<usize>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            number_of_portfolios: default_number_of_portfolios(),
            trading_days: default_trading_days(),
            risk_free_rate: default_risk_free_rate(),
            risk_max: default_risk_max(),
            seed: None,
            parallel: false,
        }
    }
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            lot_size: default_lot_size(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            price_history_path: default_price_history_path(),
            accounts_path: default_accounts_path(),
            account: None,
            lookback_periods: Some(default_lookback_periods()),
        }
    }
}

fn default_number_of_portfolios() -> usize {
    10_000
}

fn default_trading_days() -> f64 {
    252.0 // US equity trading days per year
}

fn default_risk_free_rate() -> f64 {
    0.04
}

fn default_risk_max() -> f64 {
    0.15 // 15% annualised standard deviation
}

fn default_lot_size() -> f64 {
    1.0
}

fn default_price_history_path() -> String {
    "prices.json".to_string()
}

fn default_accounts_path() -> String {
    "accounts.json".to_string()
}

fn default_lookback_periods() -> usize {
    252 // one year of daily closes
}

impl SamplerConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.number_of_portfolios == 0 {
            return Err(OptimizerError::InvalidInput(
                "number_of_portfolios must be positive".to_string(),
            ));
        }
        if !(self.trading_days.is_finite() && self.trading_days > 0.0) {
            return Err(OptimizerError::InvalidInput(format!(
                "trading_days must be positive, got {}",
                self.trading_days
            )));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(OptimizerError::InvalidInput(
                "risk_free_rate must be finite".to_string(),
            ));
        }
        if !(self.risk_max.is_finite() && self.risk_max >= 0.0) {
            return Err(OptimizerError::InvalidInput(format!(
                "risk_max must be a non-negative fraction, got {}",
                self.risk_max
            )));
        }
        Ok(())
    }
}

impl RebalanceConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if !(self.lot_size.is_finite() && self.lot_size > 0.0) {
            return Err(OptimizerError::InvalidInput(format!(
                "lot_size must be positive, got {}",
                self.lot_size
            )));
        }
        Ok(())
    }
}

impl RebalancerConfig {
    pub fn load() -> Result<Self> {
        Self::load_from_file("config.json")
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        let config: RebalancerConfig = match fs::read_to_string(path) {
            Ok(config_str) => serde_json::from_str(&config_str)?,
            Err(e) => {
                warn!("Could not read {}: {}. Using default configuration.", path, e);
                Self::default()
            }
        };

        config.validate()?;

        info!(
            "Configuration: {} portfolios, {} trading days, rf {:.2}%, risk ceiling {:.2}%, \
             lot size {}",
            config.sampler.number_of_portfolios,
            config.sampler.trading_days,
            config.sampler.risk_free_rate * 100.0,
            config.sampler.risk_max * 100.0,
            config.rebalance.lot_size
        );

        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.sampler.validate()?;
        self.rebalance.validate()?;
        if self.inputs.lookback_periods == Some(0) {
            return Err(OptimizerError::InvalidInput(
                "lookback_periods must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RebalancerConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::default(),
            rebalance: RebalanceConfig::default(),
            inputs: InputConfig::default(),
        }
    }
}
