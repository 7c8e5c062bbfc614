use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64, // unix seconds
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    /// Bybit order side that opens a position on this side.
    pub fn order_side(self) -> &'static str {
        match self {
            Side::Long => "Buy",
            Side::Short => "Sell",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalKind {
    Long,
    Short,
    None,
}

impl SignalKind {
    pub fn side(self) -> Option<Side> {
        match self {
            SignalKind::Long => Some(Side::Long),
            SignalKind::Short => Some(Side::Short),
            SignalKind::None => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    /// Margin committed to the trade, before leverage.
    pub notional: f64,
    pub leverage: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// `None` until price has moved far enough in our favour to arm it.
    pub trailing_stop: Option<f64>,
    /// Highest price seen for a long, lowest for a short.
    pub best_price: f64,
    pub entry_fee: f64,
    pub opened_at: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    Manual,
}

impl ExitReason {
    pub fn label(self) -> &'static str {
        match self {
            ExitReason::StopLoss => "Stop-loss hit",
            ExitReason::TakeProfit => "Take-profit reached",
            ExitReason::TrailingStop => "Trailing stop hit",
            ExitReason::Manual => "Closed manually",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub notional: f64,
    pub leverage: f64,
    /// Leveraged price move in quote currency, before fees.
    pub pnl: f64,
    pub pnl_pct: f64,
    pub entry_fee: f64,
    pub exit_fee: f64,
    pub exit_reason: ExitReason,
    pub opened_at: i64,
    pub closed_at: i64,
}

impl TradeRecord {
    pub fn fees(&self) -> f64 {
        self.entry_fee + self.exit_fee
    }

    pub fn net_pnl(&self) -> f64 {
        self.pnl - self.fees()
    }

    pub fn is_win(&self) -> bool {
        self.net_pnl() > 0.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    DailyLoss,
    MaxDrawdown,
    Manual,
}

impl HaltReason {
    pub fn label(self) -> &'static str {
        match self {
            HaltReason::DailyLoss => "daily loss limit reached",
            HaltReason::MaxDrawdown => "max drawdown reached",
            HaltReason::Manual => "paused by operator",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: f64,
    pub initial_balance: f64,
    pub peak_balance: f64,
    pub day_start_balance: f64,
    pub daily_pnl: f64,
    pub wins: u32,
    pub losses: u32,
    pub total_trades: u32,
    pub total_fees: f64,
    pub trading_day: NaiveDate,
    pub halted: Option<HaltReason>,
}
