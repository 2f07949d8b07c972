use crate::error::{OptimizerError, Result};
use anyhow::Context;
use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// One closing price for one trading period
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Chronologically sorted closing prices for a single instrument
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    pub symbol: String,
    prices: Vec<PricePoint>,
}

impl PriceSeries {
    /// Build a series, sorting by date. A repeated date keeps the last price given.
    pub fn new(symbol: impl Into<String>, mut prices: Vec<PricePoint>) -> Self {
        prices.sort_by_key(|p| p.date);

        let mut deduped: Vec<PricePoint> = Vec::with_capacity(prices.len());
        for point in prices {
            match deduped.last_mut() {
                Some(last) if last.date == point.date => *last = point,
                _ => deduped.push(point),
            }
        }

        Self {
            symbol: symbol.into(),
            prices: deduped,
        }
    }

    pub fn prices(&self) -> &[PricePoint] {
        &self.prices
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Most recent close, if any
    pub fn latest(&self) -> Option<PricePoint> {
        self.prices.last().copied()
    }

    /// Keep only the most recent `periods` closes
    pub fn most_recent(&self, periods: usize) -> Self {
        let start = self.prices.len().saturating_sub(periods);
        Self {
            symbol: self.symbol.clone(),
            prices: self.prices[start..].to_vec(),
        }
    }
}

/// Price series for every instrument in a run, in instrument order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceHistory {
    series: Vec<PriceSeries>,
}

impl PriceHistory {
    pub fn new(series: Vec<PriceSeries>) -> Self {
        Self { series }
    }

    pub fn series(&self) -> &[PriceSeries] {
        &self.series
    }

    pub fn symbols(&self) -> Vec<String> {
        self.series.iter().map(|s| s.symbol.clone()).collect()
    }

    pub fn get(&self, symbol: &str) -> Option<&PriceSeries> {
        self.series.iter().find(|s| s.symbol == symbol)
    }

    /// Restrict every series to its most recent `periods` closes
    pub fn with_lookback(&self, periods: usize) -> Self {
        Self {
            series: self.series.iter().map(|s| s.most_recent(periods)).collect(),
        }
    }

    /// Reorder and filter to exactly `symbols`. Fails on any symbol without a series.
    pub fn restrict_to(&self, symbols: &[String]) -> Result<Self> {
        let series = symbols
            .iter()
            .map(|symbol| {
                self.get(symbol)
                    .cloned()
                    .ok_or_else(|| OptimizerError::UnknownSymbol(symbol.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { series })
    }

    /// Latest close per instrument. Empty series are left out.
    pub fn latest_prices(&self) -> HashMap<String, f64> {
        self.series
            .iter()
            .filter_map(|s| s.latest().map(|p| (s.symbol.clone(), p.close)))
            .collect()
    }
}

/// Supplies historical closes for a set of instruments
#[cfg_attr(test, mockall::automock)]
pub trait PriceHistorySource {
    fn load(&self, symbols: &[String]) -> anyhow::Result<PriceHistory>;
}

/// Reads a JSON object mapping each symbol to a list of `{date, close}` records
#[derive(Debug, Clone)]
pub struct JsonPriceFile {
    path: PathBuf,
}

impl JsonPriceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PriceHistorySource for JsonPriceFile {
    fn load(&self, symbols: &[String]) -> anyhow::Result<PriceHistory> {
        info!("Loading price history from: {}", self.path.display());
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read price history {}", self.path.display()))?;
        let mut parsed: HashMap<String, Vec<PricePoint>> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse price history {}", self.path.display()))?;

        let mut series = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let points = parsed
                .remove(symbol)
                .ok_or_else(|| OptimizerError::UnknownSymbol(symbol.clone()))?;
            debug!("Loaded {} closes for {}", points.len(), symbol);
            series.push(PriceSeries::new(symbol.clone(), points));
        }

        Ok(PriceHistory::new(series))
    }
}
