pub mod config;
pub mod error;
pub mod market_data;
pub mod monte_carlo;
pub mod optimizer;
pub mod portfolio;
pub mod rebalance;
pub mod returns;
pub mod selector;
