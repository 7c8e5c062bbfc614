use std::collections::HashMap;

use thiserror::Error;

use crate::config::{RiskLimits, SymbolParams};
use crate::types::{AccountState, ExitReason, HaltReason, Position, Side, TradeRecord};

#[derive(Debug, Error, PartialEq)]
pub enum OpenRejected {
    #[error("{0} already has an open position")]
    AlreadyOpen(String),
    #[error("max positions reached ({open}/{max})")]
    MaxPositions { open: usize, max: usize },
    #[error("trading halted: {}", .0.label())]
    Halted(HaltReason),
    #[error("invalid entry price {0}")]
    InvalidPrice(f64),
    #[error("balance {0:.2} too small to size a position")]
    InsufficientBalance(f64),
}

/// SL and TP for a fresh entry: `entry × (1 ∓ sl_pct)` and `entry × (1 ± tp_pct)`.
pub fn stop_levels(side: Side, entry: f64, p: &SymbolParams) -> (f64, f64) {
    match side {
        Side::Long => (entry * (1.0 - p.sl_pct), entry * (1.0 + p.tp_pct)),
        Side::Short => (entry * (1.0 + p.sl_pct), entry * (1.0 - p.tp_pct)),
    }
}

/// Taker fee on the leveraged exposure of a fill.
pub fn fill_fee(notional: f64, leverage: f64, taker_fee: f64) -> f64 {
    notional * leverage * taker_fee
}

/// Validate an entry and build the position. The caller charges `entry_fee` to the ledger.
pub fn open_position(
    symbol: &str,
    side: Side,
    price: f64,
    now: i64,
    account: &AccountState,
    positions: &HashMap<String, Position>,
    limits: &RiskLimits,
    p: &SymbolParams,
) -> Result<Position, OpenRejected> {
    if let Some(reason) = account.halted {
        return Err(OpenRejected::Halted(reason));
    }
    if positions.contains_key(symbol) {
        return Err(OpenRejected::AlreadyOpen(symbol.to_string()));
    }
    if positions.len() >= limits.max_positions {
        return Err(OpenRejected::MaxPositions {
            open: positions.len(),
            max: limits.max_positions,
        });
    }
    if !(price > 0.0) || !price.is_finite() {
        return Err(OpenRejected::InvalidPrice(price));
    }

    let notional = account.balance * limits.position_size_pct;
    let entry_fee = fill_fee(notional, p.leverage, limits.taker_fee);
    if !(notional > 0.0) || account.balance <= entry_fee {
        return Err(OpenRejected::InsufficientBalance(account.balance));
    }

    let (stop_loss, take_profit) = stop_levels(side, price, p);
    Ok(Position {
        symbol: symbol.to_string(),
        side,
        entry_price: price,
        notional,
        leverage: p.leverage,
        stop_loss,
        take_profit,
        trailing_stop: None,
        best_price: price,
        entry_fee,
        opened_at: now,
    })
}

/// Ratchet the trailing stop in the position's favour. It never loosens.
pub fn update_trailing_stop(pos: &mut Position, price: f64, p: &SymbolParams) {
    if p.trailing_pct <= 0.0 {
        return;
    }
    match pos.side {
        Side::Long => {
            pos.best_price = pos.best_price.max(price);
            if pos.best_price >= pos.entry_price * (1.0 + p.trail_arm_pct) {
                let candidate = pos.best_price * (1.0 - p.trailing_pct);
                pos.trailing_stop = Some(pos.trailing_stop.map_or(candidate, |t| t.max(candidate)));
            }
        }
        Side::Short => {
            pos.best_price = pos.best_price.min(price);
            if pos.best_price <= pos.entry_price * (1.0 - p.trail_arm_pct) {
                let candidate = pos.best_price * (1.0 + p.trailing_pct);
                pos.trailing_stop = Some(pos.trailing_stop.map_or(candidate, |t| t.min(candidate)));
            }
        }
    }
}

/// One poll of an open position. Returns the exit reason and fill level on a breach.
///
/// Checks run SL, TP, trailing update, trailing breach. Fills happen at the
/// breached level, not at the polled price.
pub fn check_exit(pos: &mut Position, price: f64, p: &SymbolParams) -> Option<(ExitReason, f64)> {
    let (sl_hit, tp_hit) = match pos.side {
        Side::Long => (price <= pos.stop_loss, price >= pos.take_profit),
        Side::Short => (price >= pos.stop_loss, price <= pos.take_profit),
    };
    if sl_hit {
        return Some((ExitReason::StopLoss, pos.stop_loss));
    }
    if tp_hit {
        return Some((ExitReason::TakeProfit, pos.take_profit));
    }

    update_trailing_stop(pos, price, p);
    let trail = pos.trailing_stop?;
    let trail_hit = match pos.side {
        Side::Long => price <= trail,
        Side::Short => price >= trail,
    };
    trail_hit.then_some((ExitReason::TrailingStop, trail))
}

/// `(exit − entry) / entry × notional × leverage`, negated for shorts.
pub fn gross_pnl(side: Side, entry: f64, exit: f64, notional: f64, leverage: f64) -> f64 {
    (exit - entry) / entry * notional * leverage * side.sign()
}

pub fn unrealized_pnl(pos: &Position, price: f64) -> f64 {
    gross_pnl(pos.side, pos.entry_price, price, pos.notional, pos.leverage)
}

pub fn close_position(
    pos: Position,
    exit_price: f64,
    reason: ExitReason,
    now: i64,
    taker_fee: f64,
) -> TradeRecord {
    let pnl = gross_pnl(pos.side, pos.entry_price, exit_price, pos.notional, pos.leverage);
    let pnl_pct = (exit_price - pos.entry_price) / pos.entry_price * pos.leverage * 100.0 * pos.side.sign();
    let exit_fee = fill_fee(pos.notional, pos.leverage, taker_fee);
    TradeRecord {
        symbol: pos.symbol,
        side: pos.side,
        entry_price: pos.entry_price,
        exit_price,
        notional: pos.notional,
        leverage: pos.leverage,
        pnl,
        pnl_pct,
        entry_fee: pos.entry_fee,
        exit_fee,
        exit_reason: reason,
        opened_at: pos.opened_at,
        closed_at: now,
    }
}

/// Contract quantity for mirroring a fill on the exchange, rounded DOWN to the lot step.
pub fn order_qty(notional: f64, leverage: f64, entry_price: f64, p: &SymbolParams) -> f64 {
    if entry_price <= 0.0 || p.qty_step <= 0.0 {
        return 0.0;
    }
    let raw_qty = notional * leverage / entry_price;
    (raw_qty / p.qty_step).floor() * p.qty_step
}
