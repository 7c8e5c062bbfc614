use chrono::NaiveDate;

use crate::config::RiskLimits;
use crate::types::{AccountState, HaltReason, TradeRecord};

impl AccountState {
    pub fn new(initial_balance: f64, today: NaiveDate) -> Self {
        AccountState {
            balance: initial_balance,
            initial_balance,
            peak_balance: initial_balance,
            day_start_balance: initial_balance,
            daily_pnl: 0.0,
            wins: 0,
            losses: 0,
            total_trades: 0,
            total_fees: 0.0,
            trading_day: today,
            halted: None,
        }
    }

    /// Charge the taker fee for an entry fill.
    pub fn apply_open(&mut self, entry_fee: f64) {
        self.balance -= entry_fee;
        self.daily_pnl -= entry_fee;
        self.total_fees += entry_fee;
    }

    /// Book a closed trade. The entry fee was already charged by `apply_open`.
    pub fn apply_close(&mut self, trade: &TradeRecord) {
        let realized = trade.pnl - trade.exit_fee;
        self.balance += realized;
        self.daily_pnl += realized;
        self.total_fees += trade.exit_fee;
        self.total_trades += 1;
        if trade.is_win() {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.peak_balance = self.peak_balance.max(self.balance);
    }

    /// Start a new trading day. Returns true when the day actually changed.
    /// A daily-loss halt is lifted; drawdown and manual halts survive the rollover.
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        if today == self.trading_day {
            return false;
        }
        self.trading_day = today;
        self.day_start_balance = self.balance;
        self.daily_pnl = 0.0;
        if self.halted == Some(HaltReason::DailyLoss) {
            self.halted = None;
        }
        true
    }

    pub fn drawdown_pct(&self) -> f64 {
        if self.peak_balance <= 0.0 {
            return 0.0;
        }
        ((self.peak_balance - self.balance) / self.peak_balance * 100.0).max(0.0)
    }

    pub fn daily_loss_pct(&self) -> f64 {
        if self.day_start_balance <= 0.0 {
            return 0.0;
        }
        (-self.daily_pnl / self.day_start_balance * 100.0).max(0.0)
    }

    /// Halt new entries when a risk limit is breached. Returns the reason only
    /// when this call set the halt, so callers alert exactly once.
    pub fn check_risk(&mut self, limits: &RiskLimits) -> Option<HaltReason> {
        if self.halted.is_some() {
            return None;
        }
        let reason = if self.daily_loss_pct() >= limits.max_daily_loss_pct * 100.0 {
            HaltReason::DailyLoss
        } else if self.drawdown_pct() >= limits.max_drawdown_pct * 100.0 {
            HaltReason::MaxDrawdown
        } else {
            return None;
        };
        self.halted = Some(reason);
        Some(reason)
    }

    pub fn pause(&mut self) {
        self.halted = Some(HaltReason::Manual);
    }

    pub fn resume(&mut self) {
        self.halted = None;
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.total_trades as f64 * 100.0
        }
    }
}

/// Aggregate figures over a list of closed trades.
#[derive(Clone, Debug, PartialEq)]
pub struct TradeStats {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub net_pnl: f64,
    pub fees: f64,
    pub profit_factor: f64,
    pub max_drawdown_pct: f64,
    pub best: f64,
    pub worst: f64,
}

impl TradeStats {
    pub fn compute(trades: &[TradeRecord], initial_balance: f64) -> Self {
        if trades.is_empty() {
            return TradeStats {
                trades: 0,
                wins: 0,
                losses: 0,
                win_rate: 0.0,
                net_pnl: 0.0,
                fees: 0.0,
                profit_factor: 0.0,
                max_drawdown_pct: 0.0,
                best: 0.0,
                worst: 0.0,
            };
        }
        let gross_win: f64 = trades.iter().map(|t| t.net_pnl()).filter(|p| *p > 0.0).sum();
        let gross_loss: f64 = trades.iter().map(|t| t.net_pnl()).filter(|p| *p <= 0.0).map(f64::abs).sum();
        let wins = trades.iter().filter(|t| t.is_win()).count();

        let mut bal = initial_balance;
        let mut peak = initial_balance;
        let mut max_dd = 0.0_f64;
        for t in trades {
            bal += t.net_pnl();
            peak = peak.max(bal);
            if peak > 0.0 {
                max_dd = max_dd.max((peak - bal) / peak * 100.0);
            }
        }

        TradeStats {
            trades: trades.len(),
            wins,
            losses: trades.len() - wins,
            win_rate: wins as f64 / trades.len() as f64 * 100.0,
            net_pnl: trades.iter().map(|t| t.net_pnl()).sum(),
            fees: trades.iter().map(|t| t.fees()).sum(),
            profit_factor: if gross_loss == 0.0 { f64::INFINITY } else { gross_win / gross_loss },
            max_drawdown_pct: max_dd,
            best: trades.iter().map(|t| t.net_pnl()).fold(f64::NEG_INFINITY, f64::max),
            worst: trades.iter().map(|t| t.net_pnl()).fold(f64::INFINITY, f64::min),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExitReason, Side};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn trade(pnl: f64, entry_fee: f64, exit_fee: f64) -> TradeRecord {
        TradeRecord {
            symbol: "BTCUSDT".into(),
            side: Side::Long,
            entry_price: 100.0,
            exit_price: 100.0 + pnl,
            notional: 100.0,
            leverage: 1.0,
            pnl,
            pnl_pct: pnl,
            entry_fee,
            exit_fee,
            exit_reason: ExitReason::TakeProfit,
            opened_at: 0,
            closed_at: 1,
        }
    }

    #[test]
    fn balance_equals_initial_plus_pnl_minus_fees() {
        let mut acct = AccountState::new(1_000.0, day(1));
        let trades = [trade(25.0, 0.5, 0.5), trade(-10.0, 0.5, 0.5), trade(4.0, 0.2, 0.3)];
        for t in &trades {
            acct.apply_open(t.entry_fee);
            acct.apply_close(t);
        }
        let pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let fees: f64 = trades.iter().map(|t| t.fees()).sum();
        assert!((acct.balance - (1_000.0 + pnl - fees)).abs() < 1e-9);
        assert!((acct.total_fees - fees).abs() < 1e-9);
        assert_eq!((acct.wins, acct.losses, acct.total_trades), (2, 1, 3));
        assert!((acct.peak_balance - 1_024.0).abs() < 1e-9);
    }

    #[test]
    fn daily_loss_halts_and_rollover_lifts_it() {
        let limits = RiskLimits { max_daily_loss_pct: 0.05, max_drawdown_pct: 0.50, ..RiskLimits::default() };
        let mut acct = AccountState::new(1_000.0, day(1));
        acct.apply_open(0.0);
        acct.apply_close(&trade(-49.0, 0.0, 0.0));
        assert_eq!(acct.check_risk(&limits), None);

        acct.apply_close(&trade(-1.0, 0.0, 0.0));
        assert_eq!(acct.check_risk(&limits), Some(HaltReason::DailyLoss));
        // Already halted: no second alert.
        assert_eq!(acct.check_risk(&limits), None);

        assert!(!acct.roll_day(day(1)));
        assert!(acct.roll_day(day(2)));
        assert_eq!(acct.halted, None);
        assert_eq!(acct.daily_pnl, 0.0);
        assert_eq!(acct.day_start_balance, 950.0);
    }

    #[test]
    fn drawdown_halt_survives_rollover() {
        let limits = RiskLimits { max_daily_loss_pct: 0.50, max_drawdown_pct: 0.10, ..RiskLimits::default() };
        let mut acct = AccountState::new(1_000.0, day(1));
        acct.apply_close(&trade(200.0, 0.0, 0.0));
        acct.roll_day(day(2));
        acct.apply_close(&trade(-130.0, 0.0, 0.0));
        assert_eq!(acct.check_risk(&limits), Some(HaltReason::MaxDrawdown));
        assert!((acct.drawdown_pct() - 130.0 / 1_200.0 * 100.0).abs() < 1e-9);

        acct.roll_day(day(3));
        assert_eq!(acct.halted, Some(HaltReason::MaxDrawdown));
        acct.resume();
        assert_eq!(acct.halted, None);
    }

    #[test]
    fn stats_over_trades() {
        let trades = [trade(30.0, 0.0, 0.0), trade(-10.0, 0.0, 0.0), trade(-10.0, 0.0, 0.0)];
        let s = TradeStats::compute(&trades, 1_000.0);
        assert_eq!(s.trades, 3);
        assert_eq!(s.wins, 1);
        assert!((s.profit_factor - 1.5).abs() < 1e-9);
        assert!((s.net_pnl - 10.0).abs() < 1e-9);
        assert!(s.max_drawdown_pct > 1.9 && s.max_drawdown_pct < 2.0);
        assert_eq!(s.best, 30.0);
        assert_eq!(s.worst, -10.0);

        assert_eq!(TradeStats::compute(&[], 1_000.0).trades, 0);
    }
}
