use crate::error::{OptimizerError, Result};
use crate::market_data::PriceHistory;
use chrono::NaiveDate;
use log::debug;
use ndarray::{Array1, Array2};
use statrs::statistics::Statistics;
use std::collections::{BTreeSet, HashMap};

/// Period-over-period fractional returns, one row per period and one column
/// per instrument. Only periods where every instrument has a computable
/// change are present, so all columns share the same row alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnMatrix {
    symbols: Vec<String>,
    dates: Vec<NaiveDate>,
    values: Array2<f64>,
}

impl ReturnMatrix {
    /// Align every series by date and compute percentage change.
    ///
    /// A row is kept only if each instrument has a close on both that date and
    /// the preceding date of the combined calendar. The first date never
    /// produces a row.
    pub fn from_history(history: &PriceHistory) -> Result<Self> {
        let series = history.series();
        if series.is_empty() {
            return Err(OptimizerError::InvalidInput(
                "price history contains no instruments".to_string(),
            ));
        }

        if let Some(short) = series.iter().find(|s| s.len() < 2) {
            return Err(OptimizerError::InsufficientHistory {
                symbol: short.symbol.clone(),
                periods: short.len(),
            });
        }

        let closes: Vec<HashMap<NaiveDate, f64>> = series
            .iter()
            .map(|s| s.prices().iter().map(|p| (p.date, p.close)).collect())
            .collect();

        let calendar: Vec<NaiveDate> = series
            .iter()
            .flat_map(|s| s.prices().iter().map(|p| p.date))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut dates = Vec::new();
        let mut flat = Vec::new();
        let mut dropped = 0usize;

        for window in calendar.windows(2) {
            let (prev, cur) = (window[0], window[1]);
            let row: Option<Vec<f64>> = closes
                .iter()
                .map(|by_date| {
                    let before = *by_date.get(&prev)?;
                    let after = *by_date.get(&cur)?;
                    let change = after / before - 1.0;
                    change.is_finite().then_some(change)
                })
                .collect();

            match row {
                Some(row) => {
                    dates.push(cur);
                    flat.extend(row);
                }
                None => dropped += 1,
            }
        }

        if dates.is_empty() {
            let shortest = series
                .iter()
                .min_by_key(|s| s.len())
                .map(|s| s.symbol.clone())
                .unwrap_or_default();
            return Err(OptimizerError::InsufficientHistory {
                symbol: shortest,
                periods: 0,
            });
        }

        debug!(
            "Return matrix: {} periods x {} instruments ({} incomplete periods dropped)",
            dates.len(),
            series.len(),
            dropped
        );

        let values = Array2::from_shape_vec((dates.len(), series.len()), flat)
            .map_err(|e| OptimizerError::InvalidInput(e.to_string()))?;

        Ok(Self {
            symbols: history.symbols(),
            dates,
            values,
        })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn periods(&self) -> usize {
        self.values.nrows()
    }

    pub fn instruments(&self) -> usize {
        self.values.ncols()
    }

    fn column(&self, index: usize) -> Vec<f64> {
        self.values.column(index).to_vec()
    }

    /// Mean per-period return of each instrument
    pub fn mean_returns(&self) -> Array1<f64> {
        (0..self.instruments())
            .map(|j| self.column(j).mean())
            .collect()
    }

    /// Sample covariance (n - 1 denominator) scaled by `annualization`.
    ///
    /// Needs at least two return periods.
    pub fn covariance(&self, annualization: f64) -> Result<Array2<f64>> {
        if self.periods() < 2 {
            return Err(OptimizerError::InsufficientHistory {
                symbol: self.symbols.first().cloned().unwrap_or_default(),
                periods: self.periods(),
            });
        }

        let n = self.instruments();
        let columns: Vec<Vec<f64>> = (0..n).map(|j| self.column(j)).collect();
        let mut cov = Array2::zeros((n, n));

        for i in 0..n {
            for j in i..n {
                let value = columns[i].as_slice().covariance(columns[j].as_slice()) * annualization;
                cov[[i, j]] = value;
                cov[[j, i]] = value;
            }
        }

        Ok(cov)
    }

    /// Pearson correlation between instruments. Pairs involving a
    /// constant-return instrument are reported as 0.
    pub fn correlation(&self) -> Result<Array2<f64>> {
        let cov = self.covariance(1.0)?;
        let n = self.instruments();
        let mut corr = Array2::zeros((n, n));

        for i in 0..n {
            for j in 0..n {
                let denom = (cov[[i, i]] * cov[[j, j]]).sqrt();
                corr[[i, j]] = if denom > 0.0 { cov[[i, j]] / denom } else { 0.0 };
            }
        }

        Ok(corr)
    }
}
