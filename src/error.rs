use thiserror::Error;

/// Failure conditions raised by the optimization core.
///
/// Every fatal condition propagates to the caller unchanged. `InvalidSharpe`
/// is the only recoverable one: the sampler drops the offending trial.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("Insufficient history for {symbol}: only {periods} usable aligned periods")]
    InsufficientHistory { symbol: String, periods: usize },

    #[error("Sharpe ratio undefined: portfolio risk is zero")]
    InvalidSharpe,

    #[error("No portfolio within the risk ceiling of {risk_max:.4} ({trials} trials sampled)")]
    NoCandidatesWithinRisk { risk_max: f64, trials: usize },

    #[error("Every one of {trials} sampled portfolios has zero risk; Sharpe ratio is undefined")]
    AllTrialsZeroRisk { trials: usize },

    #[error("Cannot select a portfolio from an empty candidate set")]
    EmptyCandidateSet,

    #[error("Total value after action is zero; weights after action are undefined")]
    DegenerateValueAfterAction,

    #[error("No price available for symbol {0}")]
    UnknownSymbol(String),

    #[error("Holdings and target weights disagree on symbol {0}")]
    HoldingMismatch(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, OptimizerError>;
