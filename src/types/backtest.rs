use super::signal::Horizon;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One signal replayed as an equal-weight position closed at the horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestTrade {
    /// Signal that opened the position.
    pub signal_id: String,
    pub symbol: String,
    pub signal_type: String,
    /// Entry timestamp (signal trigger time)
    pub entry_time: DateTime<Utc>,
    /// Exit timestamp (trigger time + horizon)
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Return in percent
    pub return_pct: f64,
    pub is_winner: bool,
}

/// Point on the cumulative-return equity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    /// Cumulative return in percentage points
    pub equity: f64,
    /// Distance below the running peak
    pub drawdown: f64,
}

/// Per signal type statistics inside a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeBreakdown {
    pub signal_type: String,
    pub trades: u32,
    pub total_return: f64,
    pub win_rate: Option<f64>,
    pub avg_return: Option<f64>,
}

/// Portfolio-level performance of replayed signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestReport {
    pub signal_types: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub horizon: Horizon,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    /// Sum of per-trade returns in percent
    pub total_return: f64,
    pub win_rate: Option<f64>,
    pub avg_return: Option<f64>,
    pub stdev_return: Option<f64>,
    /// Largest peak-to-trough decline of the equity curve, in percentage points
    pub max_drawdown: f64,
    /// Annualized; null when the standard deviation is zero or undefined
    pub sharpe_ratio: Option<f64>,
    /// Gross gains over gross losses; null without losing trades
    pub profit_factor: Option<f64>,
    pub best_trade: Option<f64>,
    pub worst_trade: Option<f64>,
    pub max_consecutive_wins: u32,
    pub max_consecutive_losses: u32,
    /// Expected return per trade from win rate and average win/loss
    pub expectancy: Option<f64>,
    pub by_type: Vec<TypeBreakdown>,
    pub trades: Vec<BacktestTrade>,
    pub equity_curve: Vec<EquityPoint>,
    pub generated_at: DateTime<Utc>,
}

impl BacktestReport {
    /// A report with zero counters and null ratios.
    pub fn empty(
        signal_types: Vec<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        horizon: Horizon,
    ) -> Self {
        Self {
            signal_types,
            start,
            end,
            horizon,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            total_return: 0.0,
            win_rate: None,
            avg_return: None,
            stdev_return: None,
            max_drawdown: 0.0,
            sharpe_ratio: None,
            profit_factor: None,
            best_trade: None,
            worst_trade: None,
            max_consecutive_wins: 0,
            max_consecutive_losses: 0,
            expectancy: None,
            by_type: Vec::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_trades == 0
    }
}
