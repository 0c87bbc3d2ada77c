//! Parameter sweep over context options.
//!
//! Each grid point runs the same config and bars with different
//! [`ContextOptions`]. Parallel sweeps build one context per rayon task;
//! sequential sweeps reuse a single context through `reset_with`.

use anyhow::{Context as _, Result};
use log::info;
use rayon::prelude::*;
use std::collections::HashMap;

use ledgerlab_core::domain::PriceField;
use ledgerlab_core::engine::ContextOptions;

use crate::config::BacktestConfig;
use crate::data_loader::LoadedData;
use crate::runner::{build_context, execute, BacktestResult};

/// Option values to sweep. An empty axis keeps the base value.
#[derive(Debug, Clone, Default)]
pub struct SweepGrid {
    pub stop_losses: Vec<Option<f64>>,
    pub price_band_highs: Vec<Option<f64>>,
    pub sell_price_fields: Vec<PriceField>,
}

impl SweepGrid {
    /// Total number of grid points, invalid ones included.
    pub fn size(&self) -> usize {
        self.stop_losses.len().max(1)
            * self.price_band_highs.len().max(1)
            * self.sell_price_fields.len().max(1)
    }

    /// Generates every valid option set in the grid.
    ///
    /// Points that fail validation (e.g. a band high below the base low)
    /// are skipped.
    pub fn generate_options(&self, base: &ContextOptions) -> Vec<ContextOptions> {
        let stop_losses = axis(&self.stop_losses, base.stop_loss);
        let highs = axis(&self.price_band_highs, base.price_band.high);
        let fields = axis(&self.sell_price_fields, base.sell_price_field);

        let mut options = Vec::new();
        for &stop_loss in &stop_losses {
            for &high in &highs {
                for &field in &fields {
                    let mut point = base.clone();
                    point.stop_loss = stop_loss;
                    point.price_band.high = high;
                    point.sell_price_field = field;
                    if point.validate().is_ok() {
                        options.push(point);
                    }
                }
            }
        }
        options
    }
}

fn axis<T: Copy>(values: &[T], base: T) -> Vec<T> {
    if values.is_empty() {
        vec![base]
    } else {
        values.to_vec()
    }
}

/// Parameter sweep executor.
///
/// Runs one backtest per grid point, optionally in parallel.
pub struct ParamSweep {
    parallel: bool,
}

impl Default for ParamSweep {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamSweep {
    pub fn new() -> Self {
        Self { parallel: true }
    }

    /// Enables or disables parallel execution.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Executes a sweep over `grid`, starting from the config's options.
    ///
    /// Results come back in grid order regardless of parallelism.
    pub fn sweep(
        &self,
        grid: &SweepGrid,
        config: &BacktestConfig,
        loaded: &LoadedData,
    ) -> Result<SweepResults> {
        let points = grid.generate_options(&config.options);
        info!(
            "sweeping {} option sets ({} skipped as invalid), parallel={}",
            points.len(),
            grid.size() - points.len(),
            self.parallel
        );

        let results: Vec<BacktestResult> = if self.parallel {
            points
                .par_iter()
                .map(|options| {
                    let mut ctx = build_context(config, loaded, options.clone())?;
                    Ok(execute(&mut ctx, config, loaded))
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            let Some(first) = points.first() else {
                return Ok(SweepResults::new(Vec::new()));
            };
            let mut ctx = build_context(config, loaded, first.clone())?;
            let mut results = Vec::with_capacity(points.len());
            for options in &points {
                ctx.reset_with(options.clone())
                    .with_context(|| format!("invalid sweep point {options:?}"))?;
                results.push(execute(&mut ctx, config, loaded));
            }
            results
        };

        Ok(SweepResults::new(results))
    }
}

/// Results from a parameter sweep.
#[derive(Debug)]
pub struct SweepResults {
    results: Vec<BacktestResult>,
    by_run_id: HashMap<String, usize>,
}

impl SweepResults {
    fn new(results: Vec<BacktestResult>) -> Self {
        let by_run_id = results
            .iter()
            .enumerate()
            .map(|(i, r)| (r.run_id.clone(), i))
            .collect();
        Self { results, by_run_id }
    }

    /// Returns all results in grid order.
    pub fn all(&self) -> &[BacktestResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Gets a result by RunId.
    pub fn get(&self, run_id: &str) -> Option<&BacktestResult> {
        self.by_run_id.get(run_id).map(|&i| &self.results[i])
    }

    /// Returns results sorted by final equity (descending). Ties keep grid
    /// order.
    pub fn sorted_by_equity(&self) -> Vec<&BacktestResult> {
        let mut sorted: Vec<_> = self.results.iter().collect();
        sorted.sort_by(|a, b| b.final_equity.cmp(&a.final_equity));
        sorted
    }

    pub fn top_n(&self, n: usize) -> Vec<&BacktestResult> {
        self.sorted_by_equity().into_iter().take(n).collect()
    }

    /// Returns the best result by final equity.
    pub fn best(&self) -> Option<&BacktestResult> {
        self.sorted_by_equity().into_iter().next()
    }
}
