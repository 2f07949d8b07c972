use anyhow::Result;
use log::{error, info};
use rebalancer::config::RebalancerConfig;
use rebalancer::market_data::JsonPriceFile;
use rebalancer::optimizer::plan_rebalance;
use rebalancer::portfolio::AccountBook;
use std::env;

fn main() -> Result<()> {
    // Initialize logger with default info level if RUST_LOG not set
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "info"); }
    }
    env_logger::init();
    info!("Starting Monte Carlo portfolio rebalancer");

    // Get config file from command line argument or use default
    let args: Vec<String> = env::args().collect();
    let config_file: &str = if args.len() > 1 {
        &args[1]
    } else {
        "config.json"
    };

    info!("Loading configuration from: {}", config_file);
    let config = RebalancerConfig::load_from_file(config_file)?;

    let book = AccountBook::load_from_file(&config.inputs.accounts_path)?;
    let names = book.account_names();
    info!("Accounts available: {}", names.join(", "));

    let source = JsonPriceFile::new(&config.inputs.price_history_path);
    let outcome = match plan_rebalance(&config, &book, &source) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Rebalance failed: {:#}", e);
            return Err(e);
        }
    };

    for line in outcome.report.to_string().lines() {
        info!("{}", line);
    }

    info!("=== Recommendations (sell first, settle, then buy) ===");
    info!(
        "{:<8} {:>10} {:>10} {:>12} {:>12} {:>12} {:>12} {:>12} {:>8} {:>8}",
        "Symbol",
        "Buy/Sell",
        "Price",
        "CurValue",
        "Shares",
        "Target",
        "ValAfter",
        "SharesAfter",
        "Tgt%",
        "Act%"
    );
    for row in &outcome.recommendations {
        info!(
            "{:<8} {:>10} {:>10.2} {:>12.2} {:>12.4} {:>12.2} {:>12.2} {:>12.4} {:>8.2} {:>8.2}",
            row.symbol,
            row.buy_sell_shares,
            row.current_price,
            row.current_value,
            row.current_shares,
            row.target_value,
            row.value_after_action,
            row.shares_after_action,
            row.target_weight_percent,
            row.actual_weight_after_action_percent
        );
    }

    Ok(())
}
