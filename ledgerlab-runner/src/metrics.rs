//! Performance metrics — pure functions that compute strategy statistics.
//!
//! Every metric is a pure function: equity curve and/or trade history in,
//! scalar out. No dependencies on the runner, the data loader or the context.

use ledgerlab_core::domain::HistoryRecord;
use serde::{Deserialize, Serialize};

/// Aggregate performance metrics for a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub trade_count: usize,
    /// Mean realised profit per trade, in currency units.
    pub avg_profit: f64,
    pub avg_days_held: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
}

impl PerformanceMetrics {
    /// Compute all metrics from a per-date equity curve and the trade history.
    pub fn compute(equity_curve: &[f64], trades: &[HistoryRecord]) -> Self {
        let trading_days = equity_curve.len();
        Self {
            total_return: total_return(equity_curve),
            cagr: cagr(equity_curve, trading_days),
            sharpe: sharpe_ratio(equity_curve, 0.0),
            sortino: sortino_ratio(equity_curve, 0.0),
            max_drawdown: max_drawdown(equity_curve),
            win_rate: win_rate(trades),
            profit_factor: profit_factor(trades),
            trade_count: trades.len(),
            avg_profit: avg_profit(trades),
            avg_days_held: avg_days_held(trades),
            max_consecutive_wins: max_consecutive(trades, true),
            max_consecutive_losses: max_consecutive(trades, false),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Total return as a fraction: (final - initial) / initial.
pub fn total_return(equity_curve: &[f64]) -> f64 {
    match (equity_curve.first(), equity_curve.last()) {
        (Some(&initial), Some(&last)) if equity_curve.len() >= 2 && initial > 0.0 => {
            (last - initial) / initial
        }
        _ => 0.0,
    }
}

/// Compound Annual Growth Rate.
///
/// Assumes 252 trading days per year. Returns 0.0 for single-date or
/// non-positive equity.
pub fn cagr(equity_curve: &[f64], trading_days: usize) -> f64 {
    if trading_days < 2 {
        return 0.0;
    }
    let (Some(&initial), Some(&last)) = (equity_curve.first(), equity_curve.last()) else {
        return 0.0;
    };
    if initial <= 0.0 || last <= 0.0 {
        return 0.0;
    }
    let years = trading_days as f64 / 252.0;
    (last / initial).powf(1.0 / years) - 1.0
}

/// Annualized Sharpe ratio from daily returns.
///
/// Returns 0.0 if variance is zero or there are fewer than 2 returns.
pub fn sharpe_ratio(equity_curve: &[f64], risk_free_rate: f64) -> f64 {
    let returns = daily_returns(equity_curve);
    if returns.len() < 2 {
        return 0.0;
    }
    let daily_rf = risk_free_rate / 252.0;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
    let std = std_dev(&excess);
    if std < 1e-15 {
        return 0.0;
    }
    (mean_f64(&excess) / std) * (252.0_f64).sqrt()
}

/// Annualized Sortino ratio (downside deviation only).
pub fn sortino_ratio(equity_curve: &[f64], risk_free_rate: f64) -> f64 {
    let returns = daily_returns(equity_curve);
    if returns.len() < 2 {
        return 0.0;
    }
    let daily_rf = risk_free_rate / 252.0;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
    let downside_sq: f64 = excess.iter().filter(|&&r| r < 0.0).map(|r| r * r).sum();
    let downside_std = (downside_sq / returns.len() as f64).sqrt();
    if downside_std < 1e-15 {
        return 0.0;
    }
    (mean_f64(&excess) / downside_std) * (252.0_f64).sqrt()
}

/// Maximum drawdown as a negative fraction (e.g., -0.15 = 15% drawdown).
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;
    for &eq in equity_curve {
        peak = peak.max(eq);
        if peak > 0.0 {
            max_dd = max_dd.min((eq - peak) / peak);
        }
    }
    max_dd
}

/// Fraction of trades with a positive profit.
pub fn win_rate(trades: &[HistoryRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().filter(|t| t.is_winner()).count() as f64 / trades.len() as f64
}

/// Gross profits / gross losses, capped at 100.0.
pub fn profit_factor(trades: &[HistoryRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let profits = trades.iter().map(|t| t.profit());
    let gross_profit: i64 = profits.clone().filter(|&p| p > 0).sum();
    let gross_loss: i64 = -profits.filter(|&p| p < 0).sum::<i64>();
    if gross_loss == 0 {
        return if gross_profit > 0 { 100.0 } else { 0.0 };
    }
    (gross_profit as f64 / gross_loss as f64).min(100.0)
}

pub fn avg_profit(trades: &[HistoryRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().map(|t| t.profit()).sum::<i64>() as f64 / trades.len() as f64
}

pub fn avg_days_held(trades: &[HistoryRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().map(|t| t.days_held()).sum::<i64>() as f64 / trades.len() as f64
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Compute daily returns from an equity curve.
pub fn daily_returns(equity_curve: &[f64]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

fn max_consecutive(trades: &[HistoryRecord], winners: bool) -> usize {
    let mut max_streak = 0;
    let mut current = 0;
    for trade in trades {
        if trade.is_winner() == winners {
            current += 1;
            max_streak = max_streak.max(current);
        } else {
            current = 0;
        }
    }
    max_streak
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ledgerlab_core::domain::{InstrumentId, MarketData};

    fn make_trade(buy: i64, sell: i64, days: i64) -> HistoryRecord {
        let buy_date = NaiveDate::from_ymd_opt(2020, 7, 1).unwrap();
        let sell_date = buy_date + chrono::Duration::days(days);
        HistoryRecord {
            instrument_id: InstrumentId::new("2330"),
            name: "TSMC".into(),
            buy_data: MarketData::new(buy_date, 10.0, 10.0, 10.0, 10.0),
            buy_price: buy,
            buy_date,
            sell_data: MarketData::new(sell_date, 10.0, 10.0, 10.0, 10.0),
            sell_price: sell,
            sell_date,
        }
    }

    #[test]
    fn total_return_basic() {
        assert!((total_return(&[100.0, 110.0]) - 0.1).abs() < 1e-12);
        assert_eq!(total_return(&[100.0]), 0.0);
        assert_eq!(total_return(&[]), 0.0);
    }

    #[test]
    fn drawdown_tracks_running_peak() {
        let dd = max_drawdown(&[100.0, 120.0, 90.0, 130.0, 117.0]);
        assert!((dd - (-0.25)).abs() < 1e-12);
        assert_eq!(max_drawdown(&[100.0, 101.0, 102.0]), 0.0);
    }

    #[test]
    fn constant_equity_has_zero_ratios() {
        let flat = vec![300_000.0; 50];
        assert_eq!(sharpe_ratio(&flat, 0.0), 0.0);
        assert_eq!(sortino_ratio(&flat, 0.0), 0.0);
        assert_eq!(cagr(&flat, flat.len()), 0.0);
    }

    #[test]
    fn trade_statistics() {
        let trades = vec![
            make_trade(10_020, 12_056, 3),
            make_trade(10_020, 9_000, 5),
            make_trade(10_020, 9_500, 1),
            make_trade(10_020, 11_000, 7),
        ];
        let m = PerformanceMetrics::compute(&[300_000.0, 301_000.0], &trades);
        assert_eq!(m.trade_count, 4);
        assert!((m.win_rate - 0.5).abs() < 1e-12);
        // gains 2036 + 980, losses 1020 + 520
        assert!((m.profit_factor - 3016.0 / 1540.0).abs() < 1e-12);
        assert!((m.avg_days_held - 4.0).abs() < 1e-12);
        assert_eq!(m.max_consecutive_wins, 1);
        assert_eq!(m.max_consecutive_losses, 2);
        assert!((m.avg_profit - 1476.0 / 4.0).abs() < 1e-12);
    }

    #[test]
    fn break_even_trade_is_a_loss() {
        let trades = vec![make_trade(10_000, 10_000, 1)];
        assert_eq!(win_rate(&trades), 0.0);
        assert_eq!(profit_factor(&trades), 0.0);
        assert_eq!(max_consecutive(&trades, false), 1);
    }
}
