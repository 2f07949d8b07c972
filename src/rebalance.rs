//! Translate a target weight vector into share-level buy/sell actions.
//!
//! The calculation runs as a chain of pure stages, each returning a new
//! value: size targets, plan rounded actions, weigh the post-action
//! portfolio, then filter and order the rows.
//!
//! Rounding is half-to-even throughout. Dollar values are rounded to cents
//! for display only; share targets are computed from unrounded values.
//!
//! Deltas are rounded to the lot size without regard to the shares held, so
//! a holding smaller than one lot can be oversold: 0.6 shares with a zero
//! target rounds to a sale of 1 share and leaves -0.4 shares.

use crate::config::RebalanceConfig;
use crate::error::{OptimizerError, Result};
use crate::portfolio::AccountSnapshot;
use log::{debug, info};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// One instrument's recommended action and its effect on the account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationRow {
    pub symbol: String,
    /// Signed share delta; negative sells, positive buys. A sale may exceed
    /// `current_shares` by up to half a lot.
    pub buy_sell_shares: f64,
    pub current_price: f64,
    pub current_shares: f64,
    pub current_value: f64,
    pub target_value: f64,
    pub value_after_action: f64,
    pub shares_after_action: f64,
    pub target_weight_percent: f64,
    pub actual_weight_after_action_percent: f64,
}

/// Unrounded dollar and share target for one instrument
#[derive(Debug, Clone, PartialEq)]
pub struct TargetPosition {
    pub symbol: String,
    pub weight: f64,
    pub current_shares: f64,
    pub current_price: f64,
    pub target_value: f64,
    pub target_shares: f64,
}

/// Target plus the rounded action that moves towards it
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAction {
    pub target: TargetPosition,
    pub buy_sell_shares: f64,
    pub shares_after_action: f64,
    pub current_value: f64,
    pub value_after_action: f64,
}

/// Round half-to-even at `decimals` places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round_ties_even() / scale
}

pub struct RebalanceCalculator {
    config: RebalanceConfig,
}

impl RebalanceCalculator {
    pub fn new(config: RebalanceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Full pipeline: rows for every instrument that is held or targeted,
    /// sells before buys.
    ///
    /// `symbols` and `weights` are aligned by position. Every held symbol
    /// must be targeted and every targeted symbol must be held (possibly
    /// with zero shares).
    pub fn compute(
        &self,
        account: &AccountSnapshot,
        symbols: &[String],
        weights: &[f64],
        prices: &HashMap<String, f64>,
    ) -> Result<Vec<RecommendationRow>> {
        let targets = size_targets(account, symbols, weights, prices)?;
        let planned = self.plan_actions(&targets);
        let rows = weigh_after_action(&planned)?;
        let total = rows.len();
        let rows = order_sells_first(filter_unchanged(rows));

        info!(
            "Rebalance for {}: {} actions ({} rows without change dropped)",
            account.name,
            rows.len(),
            total - rows.len()
        );

        Ok(rows)
    }

    /// Round each instrument's share gap to the configured lot size
    pub fn plan_actions(&self, targets: &[TargetPosition]) -> Vec<PlannedAction> {
        let lot = self.config.lot_size;

        targets
            .iter()
            .map(|target| {
                let gap = target.target_shares - target.current_shares;
                // + 0.0 folds a rounded -0.0 into 0.0
                let buy_sell_shares = (gap / lot).round_ties_even() * lot + 0.0;
                let shares_after_action = target.current_shares + buy_sell_shares;

                PlannedAction {
                    target: target.clone(),
                    buy_sell_shares,
                    shares_after_action,
                    current_value: round_to(target.current_shares * target.current_price, 2),
                    value_after_action: round_to(shares_after_action * target.current_price, 2),
                }
            })
            .collect()
    }
}

/// Dollar and share targets for each instrument in `symbols` order
pub fn size_targets(
    account: &AccountSnapshot,
    symbols: &[String],
    weights: &[f64],
    prices: &HashMap<String, f64>,
) -> Result<Vec<TargetPosition>> {
    if symbols.len() != weights.len() {
        return Err(OptimizerError::InvalidInput(format!(
            "{} symbols but {} weights",
            symbols.len(),
            weights.len()
        )));
    }

    if let Some(orphan) = account.holdings.iter().find(|h| !symbols.contains(&h.symbol)) {
        return Err(OptimizerError::HoldingMismatch(orphan.symbol.clone()));
    }

    symbols
        .iter()
        .zip(weights)
        .map(|(symbol, &weight)| {
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(OptimizerError::InvalidInput(format!(
                    "weight for {} must be non-negative, got {}",
                    symbol, weight
                )));
            }

            let current_shares = account
                .shares_of(symbol)
                .ok_or_else(|| OptimizerError::HoldingMismatch(symbol.clone()))?;

            let current_price = *prices
                .get(symbol)
                .ok_or_else(|| OptimizerError::UnknownSymbol(symbol.clone()))?;
            if !(current_price.is_finite() && current_price > 0.0) {
                return Err(OptimizerError::InvalidInput(format!(
                    "price for {} must be positive, got {}",
                    symbol, current_price
                )));
            }

            let target_value = weight * account.account_value;

            Ok(TargetPosition {
                symbol: symbol.clone(),
                weight,
                current_shares,
                current_price,
                target_value,
                target_shares: target_value / current_price,
            })
        })
        .collect()
}

/// Attach post-action weights. Fails when nothing is left in the account.
pub fn weigh_after_action(planned: &[PlannedAction]) -> Result<Vec<RecommendationRow>> {
    let total_after: f64 = planned.iter().map(|p| p.value_after_action).sum();
    if total_after == 0.0 || !total_after.is_finite() {
        return Err(OptimizerError::DegenerateValueAfterAction);
    }

    Ok(planned
        .iter()
        .map(|p| RecommendationRow {
            symbol: p.target.symbol.clone(),
            buy_sell_shares: p.buy_sell_shares,
            current_price: p.target.current_price,
            current_shares: p.target.current_shares,
            current_value: p.current_value,
            target_value: round_to(p.target.target_value, 2),
            value_after_action: p.value_after_action,
            shares_after_action: p.shares_after_action,
            target_weight_percent: p.target.weight * 100.0,
            actual_weight_after_action_percent: p.value_after_action / total_after * 100.0,
        })
        .collect())
}

/// Drop rows whose value does not change, unless the position is held on
/// both sides of the action.
pub fn filter_unchanged(rows: Vec<RecommendationRow>) -> Vec<RecommendationRow> {
    rows.into_iter()
        .filter(|row| {
            let keep = row.current_value != row.value_after_action
                || (row.current_value != 0.0 && row.value_after_action != 0.0);
            if !keep {
                debug!("Dropping {}: no position before or after action", row.symbol);
            }
            keep
        })
        .collect()
}

/// Stable ascending sort by share delta so sales settle before purchases
pub fn order_sells_first(mut rows: Vec<RecommendationRow>) -> Vec<RecommendationRow> {
    rows.sort_by(|a, b| {
        a.buy_sell_shares
            .partial_cmp(&b.buy_sell_shares)
            .unwrap_or(Ordering::Equal)
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::CurrentHolding;

    fn holding(symbol: &str, shares: f64) -> CurrentHolding {
        CurrentHolding {
            symbol: symbol.to_string(),
            shares,
        }
    }

    fn symbols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn calculator() -> RebalanceCalculator {
        RebalanceCalculator::new(RebalanceConfig::default()).unwrap()
    }

    #[test]
    fn test_round_to_is_half_even() {
        assert_eq!(round_to(2.5, 0), 2.0);
        assert_eq!(round_to(3.5, 0), 4.0);
        assert_eq!(round_to(-2.5, 0), -2.0);
        assert_eq!(round_to(1.234, 2), 1.23);
    }

    #[test]
    fn test_two_instrument_rebalance() {
        let holdings = vec![holding("A", 10.0), holding("B", 10.0)];
        let account = AccountSnapshot::new("IRA", holdings, 2000.0).unwrap();
        let prices = HashMap::from([("A".to_string(), 100.0), ("B".to_string(), 100.0)]);

        let targets = size_targets(&account, &symbols(&["A", "B"]), &[0.7, 0.3], &prices).unwrap();
        assert!((targets[0].target_value - 1400.0).abs() < 1e-9);
        assert!((targets[1].target_value - 600.0).abs() < 1e-9);
        assert!((targets[0].target_shares - 14.0).abs() < 1e-9);
        assert!((targets[1].target_shares - 6.0).abs() < 1e-9);

        let rows = calculator()
            .compute(&account, &symbols(&["A", "B"]), &[0.7, 0.3], &prices)
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].symbol, "B");
        assert_eq!(rows[0].buy_sell_shares, -4.0);
        assert_eq!(rows[0].shares_after_action, 6.0);
        assert_eq!(rows[0].value_after_action, 600.0);
        assert_eq!(rows[1].symbol, "A");
        assert_eq!(rows[1].buy_sell_shares, 4.0);
        assert_eq!(rows[1].current_value, 1000.0);
        assert_eq!(rows[1].target_value, 1400.0);
        assert!((rows[1].actual_weight_after_action_percent - 70.0).abs() < 1e-9);
        assert!((rows[1].target_weight_percent - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_to_zero_row_is_dropped() {
        let holdings = vec![holding("A", 10.0), holding("Z", 0.0)];
        let account = AccountSnapshot::new("IRA", holdings, 1000.0).unwrap();
        let prices = HashMap::from([("A".to_string(), 100.0), ("Z".to_string(), 25.0)]);

        let rows = calculator()
            .compute(&account, &symbols(&["A", "Z"]), &[1.0, 0.0], &prices)
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "A");
        assert_eq!(rows[0].buy_sell_shares, 0.0);
    }

    #[test]
    fn test_filter_predicate() {
        let row = |current_value: f64, value_after_action: f64| RecommendationRow {
            symbol: "X".to_string(),
            buy_sell_shares: 0.0,
            current_price: 1.0,
            current_shares: current_value,
            current_value,
            target_value: value_after_action,
            value_after_action,
            shares_after_action: value_after_action,
            target_weight_percent: 0.0,
            actual_weight_after_action_percent: 0.0,
        };

        let kept = filter_unchanged(vec![
            row(0.0, 0.0),
            row(100.0, 100.0),
            row(0.0, 50.0),
            row(50.0, 0.0),
        ]);
        let pairs: Vec<(f64, f64)> = kept
            .iter()
            .map(|r| (r.current_value, r.value_after_action))
            .collect();
        assert_eq!(pairs, vec![(100.0, 100.0), (0.0, 50.0), (50.0, 0.0)]);
    }

    #[test]
    fn test_full_liquidation_is_degenerate() {
        let account = AccountSnapshot::new("IRA", vec![holding("A", 3.0)], 300.0).unwrap();
        let prices = HashMap::from([("A".to_string(), 100.0)]);

        let err = calculator()
            .compute(&account, &symbols(&["A"]), &[0.0], &prices)
            .unwrap_err();
        assert_eq!(err, OptimizerError::DegenerateValueAfterAction);
    }

    #[test]
    fn test_holding_outside_targets_is_mismatch() {
        let holdings = vec![holding("A", 1.0), holding("B", 1.0)];
        let account = AccountSnapshot::new("IRA", holdings, 1000.0).unwrap();
        let prices = HashMap::from([("A".to_string(), 10.0), ("B".to_string(), 10.0)]);

        let err = calculator()
            .compute(&account, &symbols(&["A"]), &[1.0], &prices)
            .unwrap_err();
        assert_eq!(err, OptimizerError::HoldingMismatch("B".to_string()));
    }

    #[test]
    fn test_target_without_holding_is_mismatch() {
        let account = AccountSnapshot::new("IRA", vec![holding("A", 1.0)], 1000.0).unwrap();
        let prices = HashMap::from([("A".to_string(), 10.0), ("B".to_string(), 10.0)]);

        let err = calculator()
            .compute(&account, &symbols(&["A", "B"]), &[0.5, 0.5], &prices)
            .unwrap_err();
        assert_eq!(err, OptimizerError::HoldingMismatch("B".to_string()));
    }

    #[test]
    fn test_missing_price_is_unknown_symbol() {
        let account = AccountSnapshot::new("IRA", vec![holding("A", 1.0)], 1000.0).unwrap();
        let err = calculator()
            .compute(&account, &symbols(&["A"]), &[1.0], &HashMap::new())
            .unwrap_err();
        assert_eq!(err, OptimizerError::UnknownSymbol("A".to_string()));
    }

    #[test]
    fn test_fractional_lot_size() {
        let calculator = RebalanceCalculator::new(RebalanceConfig { lot_size: 0.5 }).unwrap();
        let account = AccountSnapshot::new("IRA", vec![holding("A", 0.0)], 130.0).unwrap();
        let prices = HashMap::from([("A".to_string(), 100.0)]);

        let rows = calculator
            .compute(&account, &symbols(&["A"]), &[1.0], &prices)
            .unwrap();
        // 1.3 shares rounds to the nearest half share
        assert_eq!(rows[0].buy_sell_shares, 1.5);
    }

    #[test]
    fn test_sub_lot_holding_can_be_oversold() {
        let holdings = vec![holding("A", 0.6), holding("B", 10.0)];
        let account = AccountSnapshot::new("IRA", holdings, 1060.0).unwrap();
        let prices = HashMap::from([("A".to_string(), 100.0), ("B".to_string(), 100.0)]);

        let rows = calculator()
            .compute(&account, &symbols(&["A", "B"]), &[0.0, 1.0], &prices)
            .unwrap();

        assert_eq!(rows[0].symbol, "A");
        assert_eq!(rows[0].buy_sell_shares, -1.0);
        assert!((rows[0].shares_after_action + 0.4).abs() < 1e-9);
        assert_eq!(rows[0].value_after_action, -40.0);
        assert!(rows[0].actual_weight_after_action_percent < 0.0);
        assert_eq!(rows[1].buy_sell_shares, 1.0);
        assert_eq!(rows[1].value_after_action, 1100.0);
    }

    #[test]
    fn test_sort_is_stable_for_equal_deltas() {
        let account = AccountSnapshot::new(
            "IRA",
            vec![holding("A", 5.0), holding("B", 5.0), holding("C", 5.0)],
            1500.0,
        )
        .unwrap();
        let prices = HashMap::from([
            ("A".to_string(), 100.0),
            ("B".to_string(), 100.0),
            ("C".to_string(), 100.0),
        ]);

        let rows = calculator()
            .compute(&account, &symbols(&["A", "B", "C"]), &[0.2, 0.4, 0.4], &prices)
            .unwrap();
        let order: Vec<&str> = rows.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
        assert_eq!(rows[0].buy_sell_shares, -2.0);
        assert_eq!(rows[1].buy_sell_shares, 1.0);
    }
}
