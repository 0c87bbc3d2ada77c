//! LedgerLab CLI: run, sweep and fee commands.
//!
//! Commands:
//! - `run`: execute a backtest from a TOML config file
//! - `sweep`: rerun a config over a grid of stop-loss / price-band options
//! - `fees`: show buy and sell fills for one lot at a price

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use log::info;
use ledgerlab_core::domain::PriceField;
use ledgerlab_core::engine::{Transaction, DEFAULT_FEE_FLOOR, DEFAULT_FEE_REBATE};
use ledgerlab_runner::data_loader::{load_bars, LoadOptions};
use ledgerlab_runner::runner::run_single_backtest;
use ledgerlab_runner::sweep::{ParamSweep, SweepGrid};
use ledgerlab_runner::{BacktestConfig, BacktestResult};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ledgerlab", about = "LedgerLab CLI: lot-based ledger backtesting")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a backtest from a TOML config file.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Generate synthetic bars for instruments without a CSV file.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// Print the full result as JSON instead of the summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Rerun a config over a grid of options and rank the results.
    Sweep {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Stop-loss fractions to try (comma separated). 0 disables the stop.
        #[arg(long, value_delimiter = ',')]
        stop_loss: Vec<f64>,

        /// Price band highs to try (comma separated). 0 removes the bound.
        #[arg(long, value_delimiter = ',')]
        high: Vec<f64>,

        /// Sell price fields to try: open, high, low, close.
        #[arg(long, value_delimiter = ',', value_parser = parse_price_field)]
        sell_field: Vec<PriceField>,

        /// Run grid points in parallel.
        #[arg(long, default_value_t = false)]
        parallel: bool,

        /// Generate synthetic bars for instruments without a CSV file.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// Number of ranked results to print.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Show the buy and sell fill for one lot at a unit price.
    Fees {
        /// Unit price.
        #[arg(long)]
        price: f64,

        /// Fraction of the broker fee charged.
        #[arg(long, default_value_t = DEFAULT_FEE_REBATE)]
        rebate: f64,

        /// Minimum broker fee per fill.
        #[arg(long, default_value_t = DEFAULT_FEE_FLOOR)]
        floor: f64,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            synthetic,
            json,
        } => run_backtest_cmd(config, synthetic, json),
        Commands::Sweep {
            config,
            stop_loss,
            high,
            sell_field,
            parallel,
            synthetic,
            top,
        } => run_sweep_cmd(config, stop_loss, high, sell_field, parallel, synthetic, top),
        Commands::Fees {
            price,
            rebate,
            floor,
        } => run_fees(price, rebate, floor),
    }
}

fn run_backtest_cmd(config_path: PathBuf, synthetic: bool, json: bool) -> Result<()> {
    let config = BacktestConfig::from_file(&config_path)?;
    info!("running '{}' from {}", config.backtest.name, config_path.display());
    let result = run_single_backtest(&config, synthetic)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }
    Ok(())
}

fn run_sweep_cmd(
    config_path: PathBuf,
    stop_losses: Vec<f64>,
    highs: Vec<f64>,
    sell_fields: Vec<PriceField>,
    parallel: bool,
    synthetic: bool,
    top: usize,
) -> Result<()> {
    let config = BacktestConfig::from_file(&config_path)?;
    let grid = SweepGrid {
        stop_losses: stop_losses.into_iter().map(positive).collect(),
        price_band_highs: highs.into_iter().map(positive).collect(),
        sell_price_fields: sell_fields,
    };
    if grid.generate_options(&config.options).is_empty() {
        bail!("every sweep point has invalid options");
    }
    info!("loading bars from {}", config.backtest.data_dir.display());

    let opts = LoadOptions {
        start: config.backtest.start_date,
        end: config.backtest.end_date,
        synthetic,
    };
    let loaded = load_bars(&config.instruments(), &config.backtest.data_dir, &opts)?;
    let results = ParamSweep::new()
        .with_parallelism(parallel)
        .sweep(&grid, &config, &loaded)?;

    println!();
    println!("=== Sweep Results ({} runs) ===", results.len());
    println!(
        "{:<4} {:>8} {:>10} {:>6} {:>7} {:>12} {:>9} {:>8}",
        "#", "Stop", "High", "Sell", "Trades", "Equity", "Return", "MaxDD"
    );
    println!("{}", "-".repeat(72));
    for (rank, result) in results.top_n(top).into_iter().enumerate() {
        let options = &result.options;
        println!(
            "{:<4} {:>8} {:>10} {:>6} {:>7} {:>12} {:>8.2}% {:>7.2}%",
            rank + 1,
            format_optional(options.stop_loss),
            format_optional(options.price_band.high),
            format!("{:?}", options.sell_price_field).to_lowercase(),
            result.metrics.trade_count,
            result.final_equity,
            result.metrics.total_return * 100.0,
            result.metrics.max_drawdown * 100.0,
        );
    }
    if loaded.has_synthetic {
        println!();
        println!("WARNING: Results based on SYNTHETIC data");
    }
    println!();
    Ok(())
}

fn run_fees(price: f64, rebate: f64, floor: f64) -> Result<()> {
    if !price.is_finite() || price <= 0.0 {
        bail!("price must be a positive number, got {price}");
    }
    let tx = Transaction::new(rebate, floor);
    tx.validate()?;

    let notional = tx.notional(price);
    println!("Lot:            {} shares at {price}", tx.lot_size);
    println!("Notional:       {notional:.0}");
    println!("Broker fee:     {:.2}", tx.handling_fee(notional));
    println!("Buy fill:       {}", tx.buy_fill(price));
    println!("Sell fill:      {}", tx.sell_fill(price));
    Ok(())
}

/// Zero or negative values mean "unset".
fn positive(value: f64) -> Option<f64> {
    (value > 0.0).then_some(value)
}

fn format_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v}"))
}

fn parse_price_field(s: &str) -> Result<PriceField, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "open" => Ok(PriceField::Open),
        "high" => Ok(PriceField::High),
        "low" => Ok(PriceField::Low),
        "close" => Ok(PriceField::Close),
        other => Err(format!("unknown price field '{other}' (open, high, low, close)")),
    }
}

fn print_summary(result: &BacktestResult) {
    println!();
    println!("=== Backtest Result ===");
    println!("Name:           {}", result.name);
    println!("Period:         {} to {}", result.start_date, result.end_date);
    println!("Dates:          {}", result.date_count);
    println!(
        "Trades:         {} ({} won, {} lost)",
        result.metrics.trade_count, result.win, result.lose
    );
    println!("Open:           {}", result.open_positions.len());
    println!();
    println!("--- Ledger ---");
    println!("Start Capital:  {}", result.starting_capital);
    println!("Final Capital:  {}", result.final_capital);
    println!("Realized:       {}", result.realized_profit);
    println!("Unrealized:     {}", result.unrealized_profit);
    println!("Final Equity:   {}", result.final_equity);
    println!();
    println!("--- Performance ---");
    println!("Total Return:   {:.2}%", result.metrics.total_return * 100.0);
    println!("CAGR:           {:.2}%", result.metrics.cagr * 100.0);
    println!("Sharpe:         {:.3}", result.metrics.sharpe);
    println!("Sortino:        {:.3}", result.metrics.sortino);
    println!("Max Drawdown:   {:.2}%", result.metrics.max_drawdown * 100.0);
    println!("Win Rate:       {:.1}%", result.metrics.win_rate * 100.0);
    println!("Profit Factor:  {:.2}", result.metrics.profit_factor);
    println!("Avg Profit:     {:.1}", result.metrics.avg_profit);
    println!("Avg Days Held:  {:.1}", result.metrics.avg_days_held);
    println!("Max Consec Win: {}", result.metrics.max_consecutive_wins);
    println!("Max Consec Loss:{}", result.metrics.max_consecutive_losses);
    println!("Run ID:         {}", result.run_id.get(..16).unwrap_or(&result.run_id));
    if result.has_synthetic {
        println!();
        println!("WARNING: Results based on SYNTHETIC data");
    }
    for failure in &result.failures {
        println!("WARNING: {failure}");
    }
    println!();
}
