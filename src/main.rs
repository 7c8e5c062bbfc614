use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;

use paper_trader::bybit_api::BybitClient;
use paper_trader::commands::{Command, HELP_TEXT};
use paper_trader::config::{symbol_params, Config, ExecutionMode};
use paper_trader::engine::Trader;
use paper_trader::indicators;
use paper_trader::position_manager::{self, OpenRejected};
use paper_trader::signal;
use paper_trader::state_store;
use paper_trader::telegram::{self, Notifier, TelegramBot};
use paper_trader::types::{Position, Side, TradeRecord};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cfg = Config::from_env()?;
    let bybit = BybitClient::new(&cfg)?;
    let notifier = Notifier::new(TelegramBot::from_config(&cfg));

    let mut trader = match state_store::load(&cfg.state_file)? {
        Some(state) => {
            log::info!(
                "Resumed from {} — balance {:.2}, {} open, {} trades",
                cfg.state_file.display(),
                state.account.balance,
                state.positions.len(),
                state.trades.len()
            );
            Trader::from_state(state, cfg.risk.clone())
        }
        None => {
            let balance = match cfg.mode {
                ExecutionMode::Paper => cfg.initial_balance,
                ExecutionMode::Live => match bybit.fetch_wallet_balance().await {
                    Ok(equity) => {
                        log::info!("Exchange equity: {:.2} USDT", equity);
                        equity
                    }
                    Err(e) => {
                        log::warn!("Wallet balance unavailable ({}), using {:.2}", e, cfg.initial_balance);
                        cfg.initial_balance
                    }
                },
            };
            Trader::new(balance, cfg.risk.clone(), Utc::now().timestamp())
        }
    };

    notifier.notify_start(&cfg.trading_pairs, &trader.account, cfg.mode).await;
    log::info!(
        "Paper Trader started — {} pairs, {}m candles, mode {:?}",
        cfg.trading_pairs.len(),
        cfg.kline_interval,
        cfg.mode
    );

    let mut bot = Bot {
        cfg: &cfg,
        bybit: &bybit,
        notifier: &notifier,
        last_prices: HashMap::new(),
        update_offset: 0,
    };

    let status_interval = Duration::from_secs(cfg.status_interval_secs);
    let mut last_status = Instant::now().checked_sub(status_interval).unwrap_or_else(Instant::now);

    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.poll_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                log::info!("Ctrl-C received, shutting down");
                break;
            }
        }

        let status_lines = bot.cycle(&mut trader).await;

        if last_status.elapsed() >= status_interval {
            let msg = telegram::format_status(&status_lines, &trader.account, trader.positions.len());
            notifier.send(&msg).await;
            last_status = Instant::now();
        }

        if let Err(e) = state_store::save(&cfg.state_file, &trader.to_state()) {
            log::error!("State save failed: {}", e);
        }
    }

    state_store::save(&cfg.state_file, &trader.to_state())?;
    log::info!(
        "State flushed to {} — balance {:.2}, {} open",
        cfg.state_file.display(),
        trader.account.balance,
        trader.positions.len()
    );
    Ok(())
}

/// Per-run context for the poll loop. The trader itself is passed in so the
/// caller keeps ownership for persistence.
struct Bot<'a> {
    cfg: &'a Config,
    bybit: &'a BybitClient,
    notifier: &'a Notifier,
    last_prices: HashMap<String, f64>,
    update_offset: i64,
}

impl Bot<'_> {
    /// One pass: day rollover, operator commands, every pair, risk check.
    /// Returns one status line per pair.
    async fn cycle(&mut self, trader: &mut Trader) -> Vec<String> {
        let now = Utc::now().timestamp();

        let closing_day = trader.account.clone();
        if trader.roll_day(now) {
            log::info!("New trading day {} — daily PnL reset", trader.account.trading_day);
            self.notifier.notify_daily_summary(&closing_day).await;
        }

        self.poll_commands(trader).await;

        let cfg = self.cfg;
        let mut status_lines = Vec::with_capacity(cfg.trading_pairs.len());
        for symbol in &cfg.trading_pairs {
            if let Some(line) = self.process_symbol(trader, symbol, now).await {
                status_lines.push(line);
            }
        }

        if let Some(reason) = trader.check_risk() {
            log::warn!("Trading halted: {}", reason.label());
            self.notifier
                .notify_risk_alert(&format!(
                    "Trading halted: {}\nBalance: <code>{:.2}</code> | Today: <code>{:+.2}</code> | DD: <code>{:.1}%</code>",
                    reason.label(),
                    trader.account.balance,
                    trader.account.daily_pnl,
                    trader.account.drawdown_pct()
                ))
                .await;
        }

        status_lines
    }

    async fn process_symbol(&mut self, trader: &mut Trader, symbol: &str, now: i64) -> Option<String> {
        let candles = match self
            .bybit
            .fetch_klines(symbol, &self.cfg.kline_interval, self.cfg.kline_limit)
            .await
        {
            Ok(c) if !c.is_empty() => c,
            Ok(_) => {
                log::warn!("[{}] no candles returned", symbol);
                return None;
            }
            Err(e) => {
                log::warn!("[{}] kline fetch failed: {}", symbol, e);
                return None;
            }
        };
        let price = candles.last()?.close;
        self.last_prices.insert(symbol.to_string(), price);

        // ── Manage existing position ─────────────────────────────────────────
        if let Some(record) = trader.on_price(symbol, price, now) {
            self.after_close(&record, trader.account.balance).await;
        }
        if let Some(pos) = trader.positions.get(symbol) {
            return Some(position_line(pos, price));
        }

        // ── Look for a new entry ─────────────────────────────────────────────
        let eval = signal::evaluate(&candles, &self.cfg.signal);
        let Some(snap) = eval.snapshot else {
            return Some(format!(
                "⏳ <b>{symbol}</b> | <code>{price:.4}</code> | {} candles, need {}",
                candles.len(),
                self.cfg.signal.min_candles()
            ));
        };

        match trader.on_signal(symbol, eval.kind, price, now) {
            Ok(Some(pos)) => {
                let pos = pos.clone();
                self.mirror_open(&pos).await;
                self.notifier.notify_trade_open(&pos).await;
                Some(position_line(&pos, price))
            }
            Ok(None) => {
                let why = signal::describe_missing(&snap, &self.cfg.signal).unwrap_or_default();
                let atr = indicators::atr(&candles, self.cfg.signal.adx_period)
                    .map(|a| format!(" | ATR <code>{:.2}%</code>", a / price * 100.0))
                    .unwrap_or_default();
                Some(format!("⚪ <b>{symbol}</b> | <code>{price:.4}</code> | {why}{atr}"))
            }
            Err(OpenRejected::Halted(reason)) => Some(format!(
                "⛔ <b>{symbol}</b> | <code>{price:.4}</code> | halted ({})",
                reason.label()
            )),
            Err(e @ OpenRejected::MaxPositions { .. }) => {
                log::info!("[{}] {:?} signal skipped: {}", symbol, eval.kind, e);
                Some(format!(
                    "⏸ <b>{symbol}</b> | <code>{price:.4}</code> | {}",
                    telegram::escape_html(&e.to_string())
                ))
            }
            Err(e) => {
                log::warn!("[{}] open rejected: {}", symbol, e);
                Some(format!(
                    "⚠️ <b>{symbol}</b> | <code>{price:.4}</code> | {}",
                    telegram::escape_html(&e.to_string())
                ))
            }
        }
    }

    async fn after_close(&self, record: &TradeRecord, balance: f64) {
        self.mirror_close(record).await;
        self.notifier.notify_trade_close(record, balance).await;
    }

    // ── Live mirroring ───────────────────────────────────────────────────────

    async fn mirror_open(&self, pos: &Position) {
        if self.cfg.mode != ExecutionMode::Live {
            return;
        }
        let p = symbol_params(&pos.symbol);
        let qty = position_manager::order_qty(pos.notional, pos.leverage, pos.entry_price, &p);
        if qty <= 0.0 {
            log::warn!("[{}] order qty rounds to zero, not mirrored", pos.symbol);
            return;
        }
        match self.bybit.open_market(&pos.symbol, pos.side, qty).await {
            Ok(order_id) => log::info!("[{}] Live open mirrored: orderId={} qty={}", pos.symbol, order_id, qty),
            Err(e) => {
                log::error!("[{}] Live open failed: {}", pos.symbol, e);
                self.notifier
                    .notify_risk_alert(&telegram::format_order_failure(&pos.symbol, "open", &e))
                    .await;
            }
        }
    }

    async fn mirror_close(&self, t: &TradeRecord) {
        if self.cfg.mode != ExecutionMode::Live {
            return;
        }
        let p = symbol_params(&t.symbol);
        let qty = position_manager::order_qty(t.notional, t.leverage, t.entry_price, &p);
        if qty <= 0.0 {
            return;
        }
        match self.bybit.close_market(&t.symbol, t.side, qty).await {
            Ok(order_id) => log::info!("[{}] Live close mirrored: orderId={}", t.symbol, order_id),
            Err(e) => {
                log::error!("[{}] Live close failed: {}", t.symbol, e);
                self.notifier
                    .notify_risk_alert(&telegram::format_order_failure(&t.symbol, "close", &e))
                    .await;
            }
        }
    }

    // ── Operator commands ────────────────────────────────────────────────────

    async fn poll_commands(&mut self, trader: &mut Trader) {
        let Some(bot) = self.notifier.bot() else {
            return;
        };
        let batch = match bot.get_updates(self.update_offset).await {
            Ok(b) => b,
            Err(e) => {
                log::warn!("Telegram getUpdates failed: {}", e);
                return;
            }
        };
        // Acknowledge filtered updates too, or they are redelivered forever.
        if let Some(next) = batch.next_offset {
            self.update_offset = self.update_offset.max(next);
        }
        for msg in batch.messages {
            if let Some(cmd) = Command::parse(&msg.text) {
                log::info!("Command received: {:?}", cmd);
                self.handle_command(trader, cmd).await;
            }
        }
    }

    async fn handle_command(&mut self, trader: &mut Trader, cmd: Command) {
        let reply = match cmd {
            Command::Start => format!("🤖 <b>Paper Trader</b> is running.\n\n{HELP_TEXT}"),
            Command::Help => HELP_TEXT.to_string(),
            Command::Status => {
                let unrealized = trader.unrealized_pnl(&self.last_prices);
                telegram::format_status_reply(&trader.account, trader.positions.len(), unrealized, &trader.stats())
            }
            Command::Positions => telegram::format_positions(&trader.positions, &self.last_prices),
            Command::Trades => telegram::format_trades(&trader.trades, 10),
            Command::Clear => {
                let n = trader.clear_history();
                format!("🧹 Cleared {n} closed trades. Balance and counters unchanged.")
            }
            Command::Pause => {
                trader.account.pause();
                "⏸ New entries paused. Open positions are still monitored.".to_string()
            }
            Command::Resume => {
                trader.account.resume();
                "▶️ Trading resumed.".to_string()
            }
            Command::Close(symbol) => self.close_on_request(trader, &symbol).await,
            Command::Unknown(text) => format!(
                "Unknown command <code>{}</code>. Try /help.",
                telegram::escape_html(&text)
            ),
        };
        self.notifier.send(&reply).await;
    }

    async fn close_on_request(&mut self, trader: &mut Trader, symbol: &str) -> String {
        let shown = telegram::escape_html(symbol);
        if !trader.positions.contains_key(symbol) {
            return format!("No open position on <b>{shown}</b>.");
        }
        let price = match self.bybit.fetch_ticker(symbol).await {
            Ok(px) => px,
            Err(e) => match self.last_prices.get(symbol) {
                Some(px) => {
                    log::warn!("[{}] ticker failed ({}), closing at last seen {:.4}", symbol, e, px);
                    *px
                }
                None => {
                    return format!(
                        "Could not price <b>{shown}</b>: {}",
                        telegram::escape_html(&e.to_string())
                    )
                }
            },
        };
        match trader.close_manual(symbol, price, Utc::now().timestamp()) {
            Some(record) => {
                self.after_close(&record, trader.account.balance).await;
                format!("Closed <b>{shown}</b> at <code>{price:.4}</code>.")
            }
            None => format!("No open position on <b>{shown}</b>."),
        }
    }
}

fn position_line(pos: &Position, price: f64) -> String {
    let pnl = position_manager::unrealized_pnl(pos, price);
    let pnl_emoji = if pnl >= 0.0 { "📈" } else { "📉" };
    let side_emoji = match pos.side {
        Side::Long => "🟢",
        Side::Short => "🔴",
    };
    let trail = pos
        .trailing_stop
        .map(|t| format!(" | Trail: <code>{t:.4}</code>"))
        .unwrap_or_default();
    format!(
        "{side_emoji} <b>{}</b> {} @ <code>{:.4}</code> → <code>{price:.4}</code>\n\
         SL: <code>{:.4}</code> | TP: <code>{:.4}</code>{trail}\n\
         {pnl_emoji} PnL: <code>{pnl:+.2} USDT</code>",
        pos.symbol,
        pos.side.label(),
        pos.entry_price,
        pos.stop_loss,
        pos.take_profit,
    )
}
