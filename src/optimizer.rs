use crate::config::{RebalanceConfig, RebalancerConfig, SamplerConfig};
use crate::error::Result;
use crate::market_data::{PriceHistory, PriceHistorySource};
use crate::monte_carlo::{CandidatePortfolio, MonteCarloSampler, Population};
use crate::portfolio::{AccountBook, AccountSnapshot};
use crate::rebalance::{RebalanceCalculator, RecommendationRow};
use crate::returns::ReturnMatrix;
use log::info;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::fmt;

/// Headline figures of one optimization run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationReport {
    pub portfolios_analyzed: usize,
    pub candidates_within_risk: usize,
    pub expected_return: f64,
    pub risk: f64,
    pub sharpe: f64,
    pub account_value: f64,
    pub risk_free_rate: f64,
    pub risk_max: f64,
    pub seed: Option<u64>,
}

impl fmt::Display for OptimizationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Portfolio Metrics for the Highest Sharpe Ratio Portfolio:")?;
        writeln!(f, "Number of portfolios analyzed: {}", self.portfolios_analyzed)?;
        writeln!(f, "Portfolios within risk tolerance: {}", self.candidates_within_risk)?;
        writeln!(f, "Returns: {:.2}%", self.expected_return * 100.0)?;
        writeln!(f, "Risk (Standard Deviation): {:.2}%", self.risk * 100.0)?;
        writeln!(f, "Sharpe Ratio: {:.2}", self.sharpe)?;
        writeln!(f, "Portfolio Value: ${:.2}", self.account_value)?;
        writeln!(f, "Risk Free Rate: {:.2}%", self.risk_free_rate * 100.0)?;
        write!(f, "Selected Risk Tolerance: {:.2}%", self.risk_max * 100.0)?;
        if let Some(seed) = self.seed {
            write!(f, "\nSeed: {}", seed)?;
        }
        Ok(())
    }
}

/// Winning portfolio, the actions that reach it, and the run summary
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub symbols: Vec<String>,
    pub best: CandidatePortfolio,
    pub recommendations: Vec<RecommendationRow>,
    pub report: OptimizationReport,
}

pub struct PortfolioOptimizer {
    sampler: MonteCarloSampler,
    rebalancer: RebalanceCalculator,
    lookback_periods: Option<usize>,
}

impl PortfolioOptimizer {
    pub fn new(sampler: SamplerConfig, rebalance: RebalanceConfig) -> Result<Self> {
        Ok(Self {
            sampler: MonteCarloSampler::new(sampler)?,
            rebalancer: RebalanceCalculator::new(rebalance)?,
            lookback_periods: None,
        })
    }

    pub fn from_config(config: &RebalancerConfig) -> Result<Self> {
        let optimizer = Self::new(config.sampler.clone(), config.rebalance.clone())?;
        Ok(match config.inputs.lookback_periods {
            Some(periods) => optimizer.with_lookback(periods),
            None => optimizer,
        })
    }

    /// Use only the most recent `periods` closes of each instrument
    pub fn with_lookback(mut self, periods: usize) -> Self {
        self.lookback_periods = Some(periods);
        self
    }

    /// Optimize `account` on a single thread drawing from `rng`
    pub fn run<R: Rng + ?Sized>(
        &self,
        history: &PriceHistory,
        account: &AccountSnapshot,
        rng: &mut R,
    ) -> Result<OptimizationOutcome> {
        let returns = self.returns_for(history, account)?;
        let population = self.sampler.sample(&returns, rng)?;
        self.conclude(history, account, population, None)
    }

    /// Optimize `account` from a fixed seed, in parallel when configured
    pub fn run_seeded(
        &self,
        history: &PriceHistory,
        account: &AccountSnapshot,
        seed: u64,
    ) -> Result<OptimizationOutcome> {
        info!("Sampling with seed {}", seed);
        let returns = self.returns_for(history, account)?;
        let population = if self.sampler.config().parallel {
            self.sampler.sample_parallel(&returns, seed)?
        } else {
            self.sampler.sample(&returns, &mut ChaCha8Rng::seed_from_u64(seed))?
        };
        self.conclude(history, account, population, Some(seed))
    }

    fn returns_for(
        &self,
        history: &PriceHistory,
        account: &AccountSnapshot,
    ) -> Result<ReturnMatrix> {
        let history = history.restrict_to(&account.symbols())?;
        let history = match self.lookback_periods {
            Some(periods) => history.with_lookback(periods),
            None => history,
        };
        ReturnMatrix::from_history(&history)
    }

    fn conclude(
        &self,
        history: &PriceHistory,
        account: &AccountSnapshot,
        population: Population,
        seed: Option<u64>,
    ) -> Result<OptimizationOutcome> {
        let best = population.best()?.clone();
        let prices = history.latest_prices();
        let recommendations = self
            .rebalancer
            .compute(account, &population.symbols, &best.weights, &prices)?;

        info!(
            "Best portfolio: return {:.2}%, risk {:.2}%, Sharpe {:.2}",
            best.expected_return * 100.0,
            best.risk * 100.0,
            best.sharpe
        );

        let config = self.sampler.config();
        let report = OptimizationReport {
            portfolios_analyzed: population.trials,
            candidates_within_risk: population.candidates.len(),
            expected_return: best.expected_return,
            risk: best.risk,
            sharpe: best.sharpe,
            account_value: account.account_value,
            risk_free_rate: config.risk_free_rate,
            risk_max: config.risk_max,
            seed,
        };

        Ok(OptimizationOutcome {
            symbols: population.symbols,
            best,
            recommendations,
            report,
        })
    }
}

/// Resolve the configured account, load its prices from `source`, and run
/// a seeded optimization.
pub fn plan_rebalance(
    config: &RebalancerConfig,
    book: &AccountBook,
    source: &dyn PriceHistorySource,
) -> anyhow::Result<OptimizationOutcome> {
    let account = book.resolve_account(config.inputs.account.as_deref())?;
    let symbols: Vec<String> = book.holdings(&account).into_iter().map(|h| h.symbol).collect();
    info!("Selected account {} with {} instruments", account, symbols.len());

    let history = source.load(&symbols)?;
    let snapshot = book.snapshot(&account, &history.latest_prices())?;

    let seed = config.sampler.seed.unwrap_or_else(rand::random);
    let optimizer = PortfolioOptimizer::from_config(config)?;
    Ok(optimizer.run_seeded(&history, &snapshot, seed)?)
}
