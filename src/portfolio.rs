use crate::error::{OptimizerError, Result};
use anyhow::Context;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentHolding {
    pub symbol: String,
    pub shares: f64,
}

/// One row of the accounts file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountPosition {
    pub account: String,
    pub symbol: String,
    pub shares: f64,
}

/// Holdings of a single account plus the capital to allocate across them
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub name: String,
    pub holdings: Vec<CurrentHolding>,
    pub account_value: f64,
}

impl AccountSnapshot {
    pub fn new(
        name: impl Into<String>,
        holdings: Vec<CurrentHolding>,
        account_value: f64,
    ) -> Result<Self> {
        if !(account_value.is_finite() && account_value > 0.0) {
            return Err(OptimizerError::InvalidInput(format!(
                "account value must be positive, got {}",
                account_value
            )));
        }
        if let Some(bad) = holdings.iter().find(|h| !(h.shares.is_finite() && h.shares >= 0.0)) {
            return Err(OptimizerError::InvalidInput(format!(
                "shares for {} must be non-negative, got {}",
                bad.symbol, bad.shares
            )));
        }

        Ok(Self {
            name: name.into(),
            holdings,
            account_value,
        })
    }

    pub fn symbols(&self) -> Vec<String> {
        self.holdings.iter().map(|h| h.symbol.clone()).collect()
    }

    pub fn shares_of(&self, symbol: &str) -> Option<f64> {
        self.holdings
            .iter()
            .find(|h| h.symbol == symbol)
            .map(|h| h.shares)
    }

    /// Sum of shares × latest price over every holding
    pub fn market_value(&self, prices: &HashMap<String, f64>) -> Result<f64> {
        self.holdings
            .iter()
            .map(|h| {
                prices
                    .get(&h.symbol)
                    .map(|price| h.shares * price)
                    .ok_or_else(|| OptimizerError::UnknownSymbol(h.symbol.clone()))
            })
            .sum()
    }
}

/// Every account read from an accounts file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountBook {
    pub positions: Vec<AccountPosition>,
    /// Capital to allocate per account. Accounts without an entry use the
    /// market value of their current holdings.
    #[serde(default)]
    pub account_values: HashMap<String, f64>,
}

impl AccountBook {
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        info!("Loading accounts from: {}", path);
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read accounts file {}", path))?;
        let book: AccountBook = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse accounts file {}", path))?;
        Ok(book)
    }

    /// Distinct account names in file order
    pub fn account_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for position in &self.positions {
            if !names.contains(&position.account) {
                names.push(position.account.clone());
            }
        }
        names
    }

    /// Resolve which account to use. Without a requested name the file
    /// must contain exactly one account.
    pub fn resolve_account(&self, requested: Option<&str>) -> anyhow::Result<String> {
        let names = self.account_names();
        match requested {
            Some(name) if names.iter().any(|n| n == name) => Ok(name.to_string()),
            Some(name) => Err(anyhow::anyhow!(
                "Account {} not found; available accounts: {}",
                name,
                names.join(", ")
            )),
            None if names.len() == 1 => Ok(names[0].clone()),
            None => Err(anyhow::anyhow!(
                "Accounts file holds {} accounts ({}); choose one in the configuration",
                names.len(),
                names.join(", ")
            )),
        }
    }

    /// Holdings of `account`, merging repeated symbols, in file order
    pub fn holdings(&self, account: &str) -> Vec<CurrentHolding> {
        let mut holdings: Vec<CurrentHolding> = Vec::new();
        for position in self.positions.iter().filter(|p| p.account == account) {
            match holdings.iter_mut().find(|h| h.symbol == position.symbol) {
                Some(existing) => existing.shares += position.shares,
                None => holdings.push(CurrentHolding {
                    symbol: position.symbol.clone(),
                    shares: position.shares,
                }),
            }
        }
        holdings
    }

    /// Snapshot of `account` valued with `prices` when no explicit value is configured
    pub fn snapshot(
        &self,
        account: &str,
        prices: &HashMap<String, f64>,
    ) -> Result<AccountSnapshot> {
        let holdings = self.holdings(account);
        let account_value = match self.account_values.get(account) {
            Some(&value) => value,
            None => {
                let priced = AccountSnapshot {
                    name: account.to_string(),
                    holdings: holdings.clone(),
                    account_value: 0.0,
                };
                let value = priced.market_value(prices)?;
                debug!("Account {} valued at market: ${:.2}", account, value);
                value
            }
        };

        AccountSnapshot::new(account, holdings, account_value)
    }
}
