//! Option sweeps over synthetic bars.

use ledgerlab_core::domain::{Instrument, PriceField};
use ledgerlab_runner::config::BacktestConfig;
use ledgerlab_runner::data_loader::{load_bars, LoadOptions, LoadedData};
use ledgerlab_runner::runner::run_backtest_from_data;
use ledgerlab_runner::sweep::{ParamSweep, SweepGrid};

const CONFIG: &str = r#"
[backtest]
name = "sweep"

[[instruments]]
id = "2330"

[[instruments]]
id = "2317"

[[buy]]
type = "BREAKOUT"
lookback = 10

[[buy]]
type = "CLOSE_ABOVE_SMA"
period = 20

[[sell]]
type = "CLOSE_BELOW_SMA"
period = 10
"#;

fn setup() -> (BacktestConfig, LoadedData) {
    let config = BacktestConfig::from_toml(CONFIG).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let opts = LoadOptions {
        synthetic: true,
        ..LoadOptions::default()
    };
    let instruments: Vec<Instrument> = config.instruments();
    let loaded = load_bars(&instruments, dir.path(), &opts).unwrap();
    (config, loaded)
}

fn grid() -> SweepGrid {
    SweepGrid {
        stop_losses: vec![None, Some(0.05)],
        price_band_highs: vec![None, Some(1.0)],
        sell_price_fields: vec![PriceField::Low, PriceField::Close],
    }
}

#[test]
fn parallel_and_sequential_sweeps_agree() {
    let (config, loaded) = setup();
    let parallel = ParamSweep::new()
        .with_parallelism(true)
        .sweep(&grid(), &config, &loaded)
        .unwrap();
    let sequential = ParamSweep::new()
        .with_parallelism(false)
        .sweep(&grid(), &config, &loaded)
        .unwrap();

    assert_eq!(parallel.len(), 8);
    assert_eq!(sequential.len(), 8);
    for (p, s) in parallel.all().iter().zip(sequential.all()) {
        assert_eq!(p.run_id, s.run_id);
        assert_eq!(p.final_equity, s.final_equity);
        assert_eq!(p.trades, s.trades);
        assert_eq!(p.timeline, s.timeline);
        assert_eq!(p.equity_curve, s.equity_curve);
    }
}

#[test]
fn sweep_point_matches_a_standalone_run() {
    let (config, loaded) = setup();
    let results = ParamSweep::new()
        .with_parallelism(false)
        .sweep(&grid(), &config, &loaded)
        .unwrap();

    let mut standalone_config = config.clone();
    standalone_config.options = results.all()[3].options.clone();
    let standalone = run_backtest_from_data(&standalone_config, &loaded).unwrap();
    let swept = results.get(&standalone.run_id).unwrap();
    assert_eq!(swept.trades, standalone.trades);
    assert_eq!(swept.final_capital, standalone.final_capital);
}

#[test]
fn tight_price_band_blocks_every_purchase() {
    let (config, loaded) = setup();
    let results = ParamSweep::new()
        .sweep(&grid(), &config, &loaded)
        .unwrap();
    for result in results.all() {
        if result.options.price_band.high == Some(1.0) {
            assert!(result.trades.is_empty());
            assert!(result.open_positions.is_empty());
            assert_eq!(result.final_equity, result.starting_capital);
        }
    }
}

#[test]
fn best_has_the_highest_final_equity() {
    let (config, loaded) = setup();
    let results = ParamSweep::new()
        .sweep(&grid(), &config, &loaded)
        .unwrap();
    let best = results.best().unwrap();
    assert!(results.all().iter().all(|r| r.final_equity <= best.final_equity));
    assert_eq!(results.top_n(3).len(), 3);
    let sorted = results.sorted_by_equity();
    assert!(sorted.windows(2).all(|w| w[0].final_equity >= w[1].final_equity));
}

#[test]
fn empty_grid_runs_base_options_once() {
    let (config, loaded) = setup();
    let results = ParamSweep::new()
        .with_parallelism(false)
        .sweep(&SweepGrid::default(), &config, &loaded)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results.all()[0].options, config.options);
}
