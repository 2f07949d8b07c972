use crate::error::{OptimizerError, Result};
use crate::monte_carlo::{CandidatePortfolio, Population};
use log::debug;

/// Pick the candidate with the highest Sharpe ratio.
///
/// Ties keep the earliest candidate, so a seeded run always selects the
/// same portfolio.
pub fn select_optimal(candidates: &[CandidatePortfolio]) -> Result<&CandidatePortfolio> {
    let (first, rest) = candidates
        .split_first()
        .ok_or(OptimizerError::EmptyCandidateSet)?;

    let mut best = first;
    for candidate in rest {
        if candidate.sharpe > best.sharpe {
            best = candidate;
        }
    }

    debug!(
        "Selected portfolio with Sharpe {:.4} (return {:.4}, risk {:.4}) out of {}",
        best.sharpe,
        best.expected_return,
        best.risk,
        candidates.len()
    );

    Ok(best)
}

impl Population {
    /// Highest-Sharpe candidate of this population
    pub fn best(&self) -> Result<&CandidatePortfolio> {
        select_optimal(&self.candidates)
    }
}
