//! Backtesting Engine
//!
//! Replays recorded signals as independent equal-weight positions closed at a
//! fixed horizon and reports portfolio statistics:
//! - Cumulative-return equity curve and max drawdown
//! - Sharpe ratio annualized per horizon
//! - Profit factor, expectancy and win/loss streaks
//! - Per signal-type breakdown

use crate::config::BacktestSettings;
use crate::services::jobs::CancelFlag;
use crate::services::sqlite_store::{HistoryQuery, SqliteStore};
use crate::types::{BacktestReport, BacktestTrade, EquityPoint, Horizon, TypeBreakdown};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Backtesting errors.
#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("Invalid range: start {start} is not before end {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("Database error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("Backtest cancelled")]
    Cancelled,
    #[error("Backtest partition failed: {0}")]
    Partition(String),
}

/// Runs signal backtests over the outcome history.
pub struct BacktestEngine {
    store: Arc<SqliteStore>,
    settings: BacktestSettings,
}

impl BacktestEngine {
    pub fn new(store: Arc<SqliteStore>, settings: BacktestSettings) -> Self {
        Self { store, settings }
    }

    pub fn default_horizon(&self) -> Horizon {
        self.settings.evaluation_horizon_default
    }

    /// Backtest the given signal types over `[start, end)`.
    pub fn simulate(
        &self,
        signal_types: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        horizon: Horizon,
    ) -> Result<BacktestReport, BacktestError> {
        self.simulate_with_cancel(signal_types, start, end, horizon, &CancelFlag::new())
    }

    pub fn simulate_with_cancel(
        &self,
        signal_types: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        horizon: Horizon,
        cancel: &CancelFlag,
    ) -> Result<BacktestReport, BacktestError> {
        if start >= end {
            return Err(BacktestError::InvalidRange { start, end });
        }
        if cancel.is_cancelled() {
            return Err(BacktestError::Cancelled);
        }
        if signal_types.is_empty() {
            debug!("Backtest with no signal types selected");
            return Ok(BacktestReport::empty(Vec::new(), start, end, horizon));
        }

        let history = self.store.resolved_history(&HistoryQuery {
            signal_types: signal_types.to_vec(),
            start: Some(start),
            end: Some(end),
            include_partial: self.settings.include_partial,
            resolved_horizon: Some(horizon),
        })?;

        if cancel.is_cancelled() {
            return Err(BacktestError::Cancelled);
        }

        let trades: Vec<BacktestTrade> = history
            .into_iter()
            .filter_map(|(signal, outcome)| {
                let exit_price = outcome.price(horizon)?;
                let return_pct = outcome.return_pct(horizon)?;
                Some(BacktestTrade {
                    exit_time: signal.target_time(horizon),
                    signal_id: signal.id,
                    symbol: signal.symbol,
                    signal_type: signal.signal_type,
                    entry_time: signal.triggered_at,
                    entry_price: signal.price_at_trigger,
                    exit_price,
                    return_pct,
                    is_winner: return_pct > 0.0,
                })
            })
            .collect();

        let report = build_report(signal_types.to_vec(), start, end, horizon, trades);
        info!(
            "Backtest {:?} {}: {} trades, {:.2}% total return",
            signal_types, horizon, report.total_trades, report.total_return
        );
        Ok(report)
    }

    /// Split `[start, end)` into `partitions` ranges, simulate them on the
    /// blocking pool concurrently and merge the results.
    pub async fn simulate_partitioned(
        self: &Arc<Self>,
        signal_types: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        horizon: Horizon,
        partitions: usize,
        cancel: &CancelFlag,
    ) -> Result<BacktestReport, BacktestError> {
        if start >= end {
            return Err(BacktestError::InvalidRange { start, end });
        }

        let partitions = partitions.max(1) as i32;
        let step = (end - start) / partitions;
        let mut handles = Vec::with_capacity(partitions as usize);

        for i in 0..partitions {
            let part_start = start + step * i;
            let part_end = if i == partitions - 1 {
                end
            } else {
                start + step * (i + 1)
            };
            if part_start >= part_end {
                continue;
            }

            let engine = Arc::clone(self);
            let types = signal_types.to_vec();
            let cancel = cancel.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                engine.simulate_with_cancel(&types, part_start, part_end, horizon, &cancel)
            }));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            let report = handle
                .await
                .map_err(|e| BacktestError::Partition(e.to_string()))??;
            reports.push(report);
        }

        let mut merged = merge(reports)
            .unwrap_or_else(|| BacktestReport::empty(signal_types.to_vec(), start, end, horizon));
        merged.signal_types = signal_types.to_vec();
        merged.start = start;
        merged.end = end;
        Ok(merged)
    }
}

/// Combine partition reports into one, recomputing every statistic from the
/// concatenated trades.
///
/// Reports with a horizon different from the first one are skipped. A trade
/// present in several reports is counted once.
pub fn merge(reports: Vec<BacktestReport>) -> Option<BacktestReport> {
    let horizon = reports.first()?.horizon;
    let start = reports.iter().map(|r| r.start).min()?;
    let end = reports.iter().map(|r| r.end).max()?;

    let mut signal_types: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    let mut trades = Vec::new();

    for report in reports {
        if report.horizon != horizon {
            warn!(
                "Skipping {} report while merging {} reports",
                report.horizon, horizon
            );
            continue;
        }
        for signal_type in report.signal_types {
            if !signal_types.contains(&signal_type) {
                signal_types.push(signal_type);
            }
        }
        for trade in report.trades {
            if seen.insert(trade.signal_id.clone()) {
                trades.push(trade);
            }
        }
    }

    Some(build_report(signal_types, start, end, horizon, trades))
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample standard deviation; undefined below two values.
fn sample_std_dev(values: &[f64], mean: f64) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Compute report statistics from trades in any order.
pub fn build_report(
    signal_types: Vec<String>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    horizon: Horizon,
    mut trades: Vec<BacktestTrade>,
) -> BacktestReport {
    let mut report = BacktestReport::empty(signal_types, start, end, horizon);
    if trades.is_empty() {
        return report;
    }

    // Fixed replay order so results never depend on load order.
    trades.sort_by(|a, b| {
        a.entry_time
            .cmp(&b.entry_time)
            .then_with(|| a.signal_id.cmp(&b.signal_id))
    });

    let returns: Vec<f64> = trades.iter().map(|t| t.return_pct).collect();
    let total_trades = trades.len() as u32;
    let winning_trades = trades.iter().filter(|t| t.is_winner).count() as u32;
    let losing_trades = total_trades - winning_trades;

    let total_return: f64 = returns.iter().sum();
    let avg_return = mean(&returns);
    let stdev_return = avg_return.and_then(|avg| sample_std_dev(&returns, avg));
    let win_rate = winning_trades as f64 / total_trades as f64;

    // Equity curve
    let mut equity = 0.0;
    let mut peak = 0.0f64;
    let mut max_drawdown = 0.0f64;
    let mut equity_curve = Vec::with_capacity(trades.len());
    for trade in &trades {
        equity += trade.return_pct;
        peak = peak.max(equity);
        let drawdown = peak - equity;
        max_drawdown = max_drawdown.max(drawdown);
        equity_curve.push(EquityPoint {
            time: trade.exit_time,
            equity,
            drawdown,
        });
    }

    let sharpe_ratio = match (avg_return, stdev_return) {
        (Some(avg), Some(sd)) if sd > 0.0 => Some(avg / sd * horizon.periods_per_year().sqrt()),
        _ => None,
    };

    let gross_profit: f64 = returns.iter().filter(|r| **r > 0.0).sum();
    let gross_loss: f64 = returns.iter().filter(|r| **r < 0.0).map(|r| r.abs()).sum();
    let profit_factor = if gross_loss > 0.0 {
        Some(gross_profit / gross_loss)
    } else {
        None
    };

    let avg_win = if winning_trades > 0 {
        gross_profit / winning_trades as f64
    } else {
        0.0
    };
    let avg_loss = if losing_trades > 0 {
        gross_loss / losing_trades as f64
    } else {
        0.0
    };
    let expectancy = win_rate * avg_win - (1.0 - win_rate) * avg_loss;

    // Streaks
    let mut max_consecutive_wins = 0u32;
    let mut max_consecutive_losses = 0u32;
    let mut current_wins = 0u32;
    let mut current_losses = 0u32;
    for trade in &trades {
        if trade.is_winner {
            current_wins += 1;
            current_losses = 0;
            max_consecutive_wins = max_consecutive_wins.max(current_wins);
        } else {
            current_losses += 1;
            current_wins = 0;
            max_consecutive_losses = max_consecutive_losses.max(current_losses);
        }
    }

    let mut per_type: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for trade in &trades {
        per_type
            .entry(trade.signal_type.as_str())
            .or_default()
            .push(trade.return_pct);
    }
    let by_type = per_type
        .into_iter()
        .map(|(signal_type, rets)| TypeBreakdown {
            signal_type: signal_type.to_string(),
            trades: rets.len() as u32,
            total_return: rets.iter().sum(),
            win_rate: Some(rets.iter().filter(|r| **r > 0.0).count() as f64 / rets.len() as f64),
            avg_return: mean(&rets),
        })
        .collect();

    report.total_trades = total_trades;
    report.winning_trades = winning_trades;
    report.losing_trades = losing_trades;
    report.total_return = total_return;
    report.win_rate = Some(win_rate);
    report.avg_return = avg_return;
    report.stdev_return = stdev_return;
    report.max_drawdown = max_drawdown;
    report.sharpe_ratio = sharpe_ratio;
    report.profit_factor = profit_factor;
    report.best_trade = returns.iter().copied().reduce(f64::max);
    report.worst_trade = returns.iter().copied().reduce(f64::min);
    report.max_consecutive_wins = max_consecutive_wins;
    report.max_consecutive_losses = max_consecutive_losses;
    report.expectancy = Some(expectancy);
    report.by_type = by_type;
    report.equity_curve = equity_curve;
    report.trades = trades;
    report
}
