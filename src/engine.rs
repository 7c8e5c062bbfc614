use std::collections::HashMap;

use chrono::{DateTime, NaiveDate};

use crate::config::{symbol_params, RiskLimits};
use crate::ledger::TradeStats;
use crate::position_manager::{self, OpenRejected};
use crate::state_store::PersistedState;
use crate::types::{AccountState, ExitReason, HaltReason, Position, SignalKind, TradeRecord};

/// UTC calendar day of a unix timestamp (seconds).
pub fn day_of(ts: i64) -> NaiveDate {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}

/// Paper account, open positions and closed-trade history.
///
/// Single owner, driven one price at a time by the poll loop.
pub struct Trader {
    limits: RiskLimits,
    pub account: AccountState,
    pub positions: HashMap<String, Position>,
    pub trades: Vec<TradeRecord>,
}

impl Trader {
    pub fn new(initial_balance: f64, limits: RiskLimits, now: i64) -> Self {
        Trader {
            limits,
            account: AccountState::new(initial_balance, day_of(now)),
            positions: HashMap::new(),
            trades: Vec::new(),
        }
    }

    pub fn from_state(state: PersistedState, limits: RiskLimits) -> Self {
        Trader {
            limits,
            account: state.account,
            positions: state.positions,
            trades: state.trades,
        }
    }

    pub fn to_state(&self) -> PersistedState {
        PersistedState {
            account: self.account.clone(),
            positions: self.positions.clone(),
            trades: self.trades.clone(),
        }
    }

    /// Monitor the open position for `symbol`, if any, at `price`.
    pub fn on_price(&mut self, symbol: &str, price: f64, now: i64) -> Option<TradeRecord> {
        let p = symbol_params(symbol);
        let pos = self.positions.get_mut(symbol)?;
        let (reason, fill) = position_manager::check_exit(pos, price, &p)?;
        self.close(symbol, fill, reason, now)
    }

    /// Act on a signal. `Ok(None)` for `SignalKind::None`.
    pub fn on_signal(
        &mut self,
        symbol: &str,
        kind: SignalKind,
        price: f64,
        now: i64,
    ) -> Result<Option<&Position>, OpenRejected> {
        let Some(side) = kind.side() else {
            return Ok(None);
        };
        let p = symbol_params(symbol);
        let pos = position_manager::open_position(
            symbol,
            side,
            price,
            now,
            &self.account,
            &self.positions,
            &self.limits,
            &p,
        )?;
        self.account.apply_open(pos.entry_fee);
        log::info!(
            "[{}] Opened {} @ {:.4} | notional={:.2} x{:.0} sl={:.4} tp={:.4} fee={:.4}",
            symbol,
            side.label(),
            price,
            pos.notional,
            pos.leverage,
            pos.stop_loss,
            pos.take_profit,
            pos.entry_fee
        );
        self.positions.insert(symbol.to_string(), pos);
        Ok(self.positions.get(symbol))
    }

    /// Close at market on operator request.
    pub fn close_manual(&mut self, symbol: &str, price: f64, now: i64) -> Option<TradeRecord> {
        if !self.positions.contains_key(symbol) {
            return None;
        }
        self.close(symbol, price, ExitReason::Manual, now)
    }

    fn close(&mut self, symbol: &str, exit_price: f64, reason: ExitReason, now: i64) -> Option<TradeRecord> {
        let pos = self.positions.remove(symbol)?;
        let record = position_manager::close_position(pos, exit_price, reason, now, self.limits.taker_fee);
        self.account.apply_close(&record);
        log::info!(
            "[{}] Closed @ {:.4} ({}) | PnL: {:+.2} ({:+.2}%) | Balance: {:.2}",
            symbol,
            exit_price,
            reason.label(),
            record.net_pnl(),
            record.pnl_pct,
            self.account.balance
        );
        self.trades.push(record.clone());
        Some(record)
    }

    /// Roll the ledger over to the UTC day of `now`.
    pub fn roll_day(&mut self, now: i64) -> bool {
        self.account.roll_day(day_of(now))
    }

    pub fn check_risk(&mut self) -> Option<HaltReason> {
        self.account.check_risk(&self.limits)
    }

    /// Unrealized PnL over open positions that have a price in `prices`.
    pub fn unrealized_pnl(&self, prices: &HashMap<String, f64>) -> f64 {
        self.positions
            .values()
            .filter_map(|pos| prices.get(&pos.symbol).map(|px| position_manager::unrealized_pnl(pos, *px)))
            .sum()
    }

    pub fn stats(&self) -> TradeStats {
        TradeStats::compute(&self.trades, self.account.initial_balance)
    }

    /// Drop the closed-trade history. Returns how many records were removed.
    pub fn clear_history(&mut self) -> usize {
        let n = self.trades.len();
        self.trades.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    const T0: i64 = 1_704_067_200; // 2024-01-01 00:00:00 UTC

    fn trader() -> Trader {
        Trader::new(10_000.0, RiskLimits::default(), T0)
    }

    #[test]
    fn day_of_uses_utc() {
        assert_eq!(day_of(T0), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(day_of(T0 + 86_399), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(day_of(T0 + 86_400), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    }

    #[test]
    fn no_signal_opens_nothing() {
        let mut t = trader();
        assert!(t.on_signal("BTCUSDT", SignalKind::None, 100.0, T0).unwrap().is_none());
        assert!(t.positions.is_empty());
        assert_eq!(t.account.balance, 10_000.0);
    }

    #[test]
    fn open_charges_fee_and_second_open_is_rejected() {
        let mut t = trader();
        let fee = t.on_signal("BTCUSDT", SignalKind::Long, 100_000.0, T0).unwrap().unwrap().entry_fee;
        assert!((t.account.balance - (10_000.0 - fee)).abs() < 1e-9);
        assert_eq!(
            t.on_signal("BTCUSDT", SignalKind::Short, 100_000.0, T0).unwrap_err(),
            OpenRejected::AlreadyOpen("BTCUSDT".into())
        );
    }

    #[test]
    fn manual_close_books_trade() {
        let mut t = trader();
        t.on_signal("ETHUSDT", SignalKind::Short, 3_000.0, T0).unwrap();
        assert!(t.close_manual("BTCUSDT", 1.0, T0).is_none());

        let rec = t.close_manual("ETHUSDT", 2_970.0, T0 + 60).unwrap();
        assert_eq!(rec.exit_reason, ExitReason::Manual);
        assert_eq!(rec.side, Side::Short);
        assert!(rec.pnl > 0.0);
        assert_eq!(t.trades.len(), 1);
        assert_eq!(t.clear_history(), 1);
        assert!(t.trades.is_empty());
        assert_eq!(t.account.total_trades, 1);
    }

    #[test]
    fn unrealized_pnl_uses_known_prices_only() {
        let mut t = trader();
        t.on_signal("BTCUSDT", SignalKind::Long, 100_000.0, T0).unwrap();
        t.on_signal("ETHUSDT", SignalKind::Long, 3_000.0, T0).unwrap();
        let mut prices = HashMap::new();
        prices.insert("BTCUSDT".to_string(), 101_000.0);
        // 1 % × 10x on ~1_000 margin
        let u = t.unrealized_pnl(&prices);
        assert!(u > 99.0 && u < 101.0, "u = {u}");
    }

    #[test]
    fn state_round_trips_through_persisted_form() {
        let mut t = trader();
        t.on_signal("SOLUSDT", SignalKind::Long, 150.0, T0).unwrap();
        let restored = Trader::from_state(t.to_state(), RiskLimits::default());
        assert_eq!(restored.positions.len(), 1);
        assert_eq!(restored.account.balance, t.account.balance);
    }
}
