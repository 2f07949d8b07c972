//! Monte Carlo sampling of the risk/return frontier.
//!
//! Each trial draws one uniform value per instrument and normalises the
//! draw by its sum. This is an approximation: normalised uniforms are not
//! uniformly distributed over the weight simplex, so coverage of the
//! frontier is biased towards balanced portfolios. Trials are independent
//! and only read the shared return statistics, which is what lets
//! [`MonteCarloSampler::sample_parallel`] split them across threads.

use crate::config::SamplerConfig;
use crate::error::{OptimizerError, Result};
use crate::returns::ReturnMatrix;
use log::{debug, info};
use ndarray::{Array1, Array2};
use rand::distributions::Uniform;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;

/// Trials handled by one parallel work unit. Fixed so that a seeded run
/// produces the same population on any number of threads.
const TRIALS_PER_CHUNK: usize = 1024;

/// One randomly weighted trial allocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidatePortfolio {
    /// One non-negative weight per instrument, summing to 1.0
    pub weights: Vec<f64>,
    /// Annualised mean return net of the risk-free rate
    pub expected_return: f64,
    /// Annualised standard deviation
    pub risk: f64,
    pub sharpe: f64,
}

/// Annualised statistics shared read-only by every trial of a run
#[derive(Debug, Clone)]
pub struct FrontierInputs {
    symbols: Vec<String>,
    mean_returns: Array1<f64>,
    covariance: Array2<f64>,
    trading_days: f64,
}

impl FrontierInputs {
    pub fn from_returns(returns: &ReturnMatrix, trading_days: f64) -> Result<Self> {
        Ok(Self {
            symbols: returns.symbols().to_vec(),
            mean_returns: returns.mean_returns(),
            covariance: returns.covariance(trading_days)?,
            trading_days,
        })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Annualised covariance matrix
    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    /// Score one weight vector.
    ///
    /// Fails with `InvalidSharpe` when the portfolio has zero risk.
    pub fn evaluate(&self, weights: Vec<f64>, risk_free_rate: f64) -> Result<CandidatePortfolio> {
        if weights.len() != self.symbols.len() {
            return Err(OptimizerError::InvalidInput(format!(
                "expected {} weights, got {}",
                self.symbols.len(),
                weights.len()
            )));
        }

        let w = Array1::from(weights);
        let expected_return = self.mean_returns.dot(&w) * self.trading_days - risk_free_rate;

        // Rounding can push a near-singular quadratic form slightly below zero
        let variance = w.dot(&self.covariance.dot(&w)).max(0.0);
        let risk = variance.sqrt();

        if risk == 0.0 {
            return Err(OptimizerError::InvalidSharpe);
        }

        Ok(CandidatePortfolio {
            weights: w.to_vec(),
            expected_return,
            risk,
            sharpe: (expected_return - risk_free_rate) / risk,
        })
    }
}

/// Candidates that survived a sampling run, plus rejection counts
#[derive(Debug, Clone)]
pub struct Population {
    pub symbols: Vec<String>,
    pub candidates: Vec<CandidatePortfolio>,
    pub trials: usize,
    pub zero_risk_trials: usize,
    pub over_risk_trials: usize,
}

#[derive(Debug, Default)]
struct TrialBatch {
    candidates: Vec<CandidatePortfolio>,
    zero_risk: usize,
    over_risk: usize,
}

impl TrialBatch {
    fn merge(mut self, other: TrialBatch) -> Self {
        self.candidates.extend(other.candidates);
        self.zero_risk += other.zero_risk;
        self.over_risk += other.over_risk;
        self
    }
}

/// Draw `n` non-negative weights summing to 1.0. An all-zero draw is redrawn.
/// No weights are drawn for `n == 0`.
pub fn random_weights<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    let unit = Uniform::new(0.0_f64, 1.0);
    loop {
        let draw: Vec<f64> = (0..n).map(|_| rng.sample(unit)).collect();
        let total: f64 = draw.iter().sum();
        if total > 0.0 {
            return draw.into_iter().map(|w| w / total).collect();
        }
    }
}

pub struct MonteCarloSampler {
    config: SamplerConfig,
}

impl MonteCarloSampler {
    pub fn new(config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Run every trial on the calling thread using `rng`
    pub fn sample<R: Rng + ?Sized>(
        &self,
        returns: &ReturnMatrix,
        rng: &mut R,
    ) -> Result<Population> {
        let inputs = FrontierInputs::from_returns(returns, self.config.trading_days)?;
        let batch = self.run_trials(&inputs, self.config.number_of_portfolios, rng);
        self.finish(inputs, batch)
    }

    /// Run the trials on the rayon pool. Each chunk gets its own ChaCha
    /// stream of `seed`, and chunks are concatenated in order.
    pub fn sample_parallel(&self, returns: &ReturnMatrix, seed: u64) -> Result<Population> {
        let inputs = FrontierInputs::from_returns(returns, self.config.trading_days)?;
        let total = self.config.number_of_portfolios;
        let chunks = total.div_ceil(TRIALS_PER_CHUNK);

        debug!("Sampling {} trials in {} chunks", total, chunks);

        let batches: Vec<TrialBatch> = (0..chunks)
            .into_par_iter()
            .map(|chunk| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                rng.set_stream(chunk as u64);
                let start = chunk * TRIALS_PER_CHUNK;
                let count = TRIALS_PER_CHUNK.min(total - start);
                self.run_trials(&inputs, count, &mut rng)
            })
            .collect();

        let batch = batches
            .into_iter()
            .fold(TrialBatch::default(), TrialBatch::merge);
        self.finish(inputs, batch)
    }

    fn run_trials<R: Rng + ?Sized>(
        &self,
        inputs: &FrontierInputs,
        trials: usize,
        rng: &mut R,
    ) -> TrialBatch {
        let mut batch = TrialBatch::default();
        let n = inputs.symbols().len();

        for _ in 0..trials {
            let weights = random_weights(n, rng);
            match inputs.evaluate(weights, self.config.risk_free_rate) {
                Ok(candidate) if candidate.risk <= self.config.risk_max => {
                    batch.candidates.push(candidate);
                }
                Ok(_) => batch.over_risk += 1,
                Err(_) => batch.zero_risk += 1,
            }
        }

        batch
    }

    fn finish(&self, inputs: FrontierInputs, batch: TrialBatch) -> Result<Population> {
        let trials = self.config.number_of_portfolios;

        info!(
            "Sampled {} portfolios: {} within risk ceiling {:.2}%, {} above, {} with zero risk",
            trials,
            batch.candidates.len(),
            self.config.risk_max * 100.0,
            batch.over_risk,
            batch.zero_risk
        );

        if batch.candidates.is_empty() && batch.over_risk == 0 {
            return Err(OptimizerError::AllTrialsZeroRisk { trials });
        }
        if batch.candidates.is_empty() {
            return Err(OptimizerError::NoCandidatesWithinRisk {
                risk_max: self.config.risk_max,
                trials,
            });
        }

        Ok(Population {
            symbols: inputs.symbols,
            candidates: batch.candidates,
            trials,
            zero_risk_trials: batch.zero_risk,
            over_risk_trials: batch.over_risk,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{PriceHistory, PricePoint, PriceSeries};
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn series(symbol: &str, closes: &[f64]) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        PriceSeries::new(
            symbol,
            closes
                .iter()
                .enumerate()
                .map(|(i, &close)| PricePoint {
                    date: start + chrono::Days::new(i as u64),
                    close,
                })
                .collect(),
        )
    }

    fn test_returns() -> ReturnMatrix {
        let history = PriceHistory::new(vec![
            series("AAPL", &[100.0, 101.0, 99.5, 102.0, 103.5, 102.5, 104.0, 106.0]),
            series("MSFT", &[200.0, 199.0, 201.0, 203.0, 202.0, 205.0, 204.0, 207.0]),
            series("BND", &[50.0, 50.1, 50.05, 50.2, 50.15, 50.3, 50.25, 50.4]),
        ]);
        ReturnMatrix::from_history(&history).unwrap()
    }

    fn test_config(risk_max: f64) -> SamplerConfig {
        SamplerConfig {
            number_of_portfolios: 2_000,
            trading_days: 252.0,
            risk_free_rate: 0.04,
            risk_max,
            seed: Some(7),
            parallel: false,
        }
    }

    #[test]
    fn test_weights_are_normalised() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..100 {
            let w = random_weights(5, &mut rng);
            assert_eq!(w.len(), 5);
            assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            assert!(w.iter().all(|&x| x >= 0.0));
        }
    }

    #[test]
    fn test_evaluate_subtracts_risk_free_rate_from_return_and_sharpe() {
        let returns = test_returns();
        let inputs = FrontierInputs::from_returns(&returns, 252.0).unwrap();
        let weights = vec![0.5, 0.3, 0.2];

        let candidate = inputs.evaluate(weights.clone(), 0.04).unwrap();

        let means = returns.mean_returns();
        let gross: f64 = means.iter().zip(&weights).map(|(m, w)| m * w).sum::<f64>() * 252.0;
        assert!((candidate.expected_return - (gross - 0.04)).abs() < 1e-12);
        let sharpe = (candidate.expected_return - 0.04) / candidate.risk;
        assert!((candidate.sharpe - sharpe).abs() < 1e-12);
    }

    #[test]
    fn test_zero_risk_is_invalid_sharpe() {
        let history = PriceHistory::new(vec![series("CASH", &[1.0, 1.0, 1.0, 1.0])]);
        let returns = ReturnMatrix::from_history(&history).unwrap();
        let inputs = FrontierInputs::from_returns(&returns, 252.0).unwrap();

        assert_eq!(inputs.evaluate(vec![1.0], 0.04), Err(OptimizerError::InvalidSharpe));
    }

    #[test]
    fn test_zero_risk_trials_are_excluded() {
        let history = PriceHistory::new(vec![series("CASH", &[1.0, 1.0, 1.0, 1.0])]);
        let returns = ReturnMatrix::from_history(&history).unwrap();
        let sampler = MonteCarloSampler::new(test_config(1.0)).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let err = sampler.sample(&returns, &mut rng).unwrap_err();
        assert_eq!(err, OptimizerError::AllTrialsZeroRisk { trials: 2_000 });
    }

    #[test]
    fn test_zero_risk_under_wide_ceiling_is_not_a_ceiling_failure() {
        let history = PriceHistory::new(vec![series("CASH", &[5.0, 5.0, 5.0, 5.0, 5.0])]);
        let returns = ReturnMatrix::from_history(&history).unwrap();
        let mut config = test_config(10.0);
        config.number_of_portfolios = 10;
        let sampler = MonteCarloSampler::new(config).unwrap();

        let err = sampler.sample(&returns, &mut ChaCha8Rng::seed_from_u64(1)).unwrap_err();
        assert_eq!(err, OptimizerError::AllTrialsZeroRisk { trials: 10 });
        assert!(!matches!(err, OptimizerError::NoCandidatesWithinRisk { .. }));

        let err = sampler.sample_parallel(&returns, 1).unwrap_err();
        assert_eq!(err, OptimizerError::AllTrialsZeroRisk { trials: 10 });
    }

    #[test]
    fn test_no_weights_for_no_instruments() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(random_weights(0, &mut rng).is_empty());
    }

    #[test]
    fn test_risk_ceiling_below_minimum_reports_no_candidates() {
        let sampler = MonteCarloSampler::new(test_config(1e-9)).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        match sampler.sample(&test_returns(), &mut rng) {
            Err(OptimizerError::NoCandidatesWithinRisk { risk_max, trials }) => {
                assert_eq!(risk_max, 1e-9);
                assert_eq!(trials, 2_000);
            }
            other => panic!("expected NoCandidatesWithinRisk, got {:?}", other),
        }
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let sampler = MonteCarloSampler::new(test_config(10.0)).unwrap();
        let returns = test_returns();

        let first = sampler.sample(&returns, &mut ChaCha8Rng::seed_from_u64(42)).unwrap();
        let second = sampler.sample(&returns, &mut ChaCha8Rng::seed_from_u64(42)).unwrap();
        assert_eq!(first.candidates, second.candidates);
        assert_eq!(first.candidates.len(), 2_000);
    }

    #[test]
    fn test_parallel_sampling_is_deterministic() {
        let mut config = test_config(10.0);
        config.number_of_portfolios = 3_000;
        let sampler = MonteCarloSampler::new(config).unwrap();
        let returns = test_returns();

        let first = sampler.sample_parallel(&returns, 99).unwrap();
        let second = sampler.sample_parallel(&returns, 99).unwrap();
        assert_eq!(first.trials, 3_000);
        assert_eq!(first.candidates.len(), 3_000);
        assert_eq!(first.candidates, second.candidates);
    }

    #[test]
    fn test_parallel_sampling_ignores_thread_count() {
        let mut config = test_config(10.0);
        config.number_of_portfolios = 5_000;
        let sampler = MonteCarloSampler::new(config).unwrap();
        let returns = test_returns();

        let run_on = |threads: usize| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap()
                .install(|| sampler.sample_parallel(&returns, 2024).unwrap())
        };

        let single = run_on(1);
        let several = run_on(4);
        assert_eq!(single.trials, 5_000);
        assert_eq!(single.candidates.len(), several.candidates.len());
        assert_eq!(single.candidates, several.candidates);
    }

    #[test]
    fn test_counts_add_up() {
        let returns = test_returns();
        let inputs = FrontierInputs::from_returns(&returns, 252.0).unwrap();
        let risks: Vec<f64> = [vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]]
            .into_iter()
            .map(|w| inputs.evaluate(w, 0.04).unwrap().risk)
            .collect();
        let middle = risks.iter().sum::<f64>() / 3.0;

        let sampler = MonteCarloSampler::new(test_config(middle)).unwrap();
        let population = sampler.sample(&returns, &mut ChaCha8Rng::seed_from_u64(5)).unwrap();
        assert_eq!(
            population.candidates.len() + population.over_risk_trials + population.zero_risk_trials,
            population.trials
        );
        assert_eq!(population.symbols, vec!["AAPL", "MSFT", "BND"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_candidates_lie_on_simplex_and_under_ceiling(
            seed in 0..10_000u64,
            risk_max in 0.01..0.5f64,
        ) {
            let mut config = test_config(risk_max);
            config.number_of_portfolios = 200;
            let sampler = MonteCarloSampler::new(config).unwrap();

            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            if let Ok(population) = sampler.sample(&test_returns(), &mut rng) {
                for candidate in &population.candidates {
                    let total: f64 = candidate.weights.iter().sum();
                    prop_assert!((total - 1.0).abs() < 1e-9);
                    prop_assert!(candidate.weights.iter().all(|&w| w >= 0.0));
                    prop_assert!(candidate.risk >= 0.0);
                    prop_assert!(candidate.risk <= risk_max);
                    prop_assert!(candidate.sharpe.is_finite());
                }
            }
        }
    }
}
