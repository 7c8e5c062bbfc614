use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::{Config, ExecutionMode};
use crate::ledger::TradeStats;
use crate::position_manager::unrealized_pnl;
use crate::types::{AccountState, Position, Side, TradeRecord};

const BASE_URL: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

/// A text message received from the configured chat.
#[derive(Clone, Debug, PartialEq)]
pub struct Incoming {
    pub update_id: i64,
    pub text: String,
}

/// One `getUpdates` batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateBatch {
    /// Text messages from the configured chat.
    pub messages: Vec<Incoming>,
    /// Offset that acknowledges every update in the batch, including the
    /// ones that were filtered out. `None` for an empty batch.
    pub next_offset: Option<i64>,
}

/// Keep text messages from `chat_id`; drop everything else.
fn parse_updates(body: &str, chat_id: &str) -> Result<UpdateBatch, serde_json::Error> {
    let resp: UpdatesResponse = serde_json::from_str(body)?;
    if !resp.ok {
        return Ok(UpdateBatch::default());
    }
    let next_offset = resp.result.iter().map(|u| u.update_id + 1).max();
    let messages = resp
        .result
        .into_iter()
        .filter_map(|u| {
            let msg = u.message?;
            if msg.chat.id.to_string() != chat_id {
                log::warn!("Ignoring Telegram message from chat {}", msg.chat.id);
                return None;
            }
            Some(Incoming { update_id: u.update_id, text: msg.text? })
        })
        .collect();
    Ok(UpdateBatch { messages, next_offset })
}

#[derive(Clone)]
pub struct TelegramBot {
    client: reqwest::Client,
    api: String,
    chat_id: String,
}

impl TelegramBot {
    /// `None` unless both TELEGRAM_TOKEN and TELEGRAM_CHAT_ID are set.
    pub fn from_config(cfg: &Config) -> Option<Self> {
        let token = cfg.telegram_token.as_ref()?;
        let chat_id = cfg.telegram_chat_id.clone()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .ok()?;
        Some(TelegramBot { client, api: format!("{}/bot{}", BASE_URL, token), chat_id })
    }

    pub async fn send(&self, text: &str) {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML"
        });

        match self.client.post(format!("{}/sendMessage", self.api)).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                let preview: String = text.chars().take(80).collect();
                log::info!("Telegram sent: {}", preview.replace('\n', " "));
            }
            Ok(resp) => {
                log::warn!("Telegram error status: {}", resp.status());
            }
            Err(e) => {
                log::warn!("Telegram send failed: {}", e);
            }
        }
    }

    /// Pending updates with `update_id >= offset`. Non-blocking (timeout=0).
    pub async fn get_updates(&self, offset: i64) -> Result<UpdateBatch, reqwest::Error> {
        let body = self
            .client
            .get(format!("{}/getUpdates", self.api))
            .query(&[("offset", offset.to_string()), ("timeout", "0".to_string())])
            .send()
            .await?
            .text()
            .await?;
        match parse_updates(&body, &self.chat_id) {
            Ok(batch) => Ok(batch),
            Err(e) => {
                log::warn!("Telegram getUpdates: unreadable response: {}", e);
                Ok(UpdateBatch::default())
            }
        }
    }
}

/// Sends to Telegram when configured, otherwise only logs.
#[derive(Clone)]
pub struct Notifier {
    bot: Option<TelegramBot>,
}

impl Notifier {
    pub fn new(bot: Option<TelegramBot>) -> Self {
        Notifier { bot }
    }

    pub fn bot(&self) -> Option<&TelegramBot> {
        self.bot.as_ref()
    }

    pub async fn send(&self, text: &str) {
        match &self.bot {
            Some(bot) => bot.send(text).await,
            None => log::info!("[notify] {}", text.replace('\n', " | ")),
        }
    }

    // ── Convenience helpers ──────────────────────────────────────────────────

    pub async fn notify_start(&self, pairs: &[String], account: &AccountState, mode: ExecutionMode) {
        self.send(&format_start(pairs, account, mode)).await;
    }

    pub async fn notify_trade_open(&self, pos: &Position) {
        self.send(&format_trade_open(pos)).await;
    }

    pub async fn notify_trade_close(&self, trade: &TradeRecord, balance: f64) {
        self.send(&format_trade_close(trade, balance)).await;
    }

    pub async fn notify_risk_alert(&self, message: &str) {
        self.send(&format!("⚠️ <b>Risk Alert</b>\n{message}")).await;
    }

    pub async fn notify_daily_summary(&self, account: &AccountState) {
        self.send(&format_daily_summary(account)).await;
    }
}

fn side_emoji(side: Side) -> &'static str {
    match side {
        Side::Long => "🟢",
        Side::Short => "🔴",
    }
}

pub fn format_start(pairs: &[String], account: &AccountState, mode: ExecutionMode) -> String {
    let mode = match mode {
        ExecutionMode::Paper => "paper",
        ExecutionMode::Live => "live (mirrored)",
    };
    format!(
        "🤖 <b>Paper Trader started</b>\nPairs: {} | Mode: {mode} | Balance: <code>${:.2}</code>",
        pairs.join(", "),
        account.balance
    )
}

pub fn format_trade_open(pos: &Position) -> String {
    format!(
        "{} <b>Opened {} {}</b>\n\
         Entry:    <code>{:.4}</code>\n\
         Size:     <code>${:.2} × {:.0}x</code>\n\
         SL:       <code>{:.4}</code>\n\
         TP:       <code>{:.4}</code>\n\
         Fee:      <code>{:.4}</code>",
        side_emoji(pos.side),
        pos.side.label(),
        pos.symbol,
        pos.entry_price,
        pos.notional,
        pos.leverage,
        pos.stop_loss,
        pos.take_profit,
        pos.entry_fee,
    )
}

pub fn format_trade_close(t: &TradeRecord, balance: f64) -> String {
    let emoji = if t.is_win() { "✅" } else { "❌" };
    let held_min = (t.closed_at - t.opened_at).max(0) / 60;
    format!(
        "{emoji} <b>Closed {} {}</b>\n\
         Entry: <code>{:.4}</code>  Exit: <code>{:.4}</code>\n\
         PnL:   <code>{:+.2} USDT</code> (<code>{:+.2}%</code>, fees <code>{:.2}</code>)\n\
         Reason: {} | held {held_min} min\n\
         Balance: <code>{:.2}</code>",
        t.side.label(),
        t.symbol,
        t.entry_price,
        t.exit_price,
        t.net_pnl(),
        t.pnl_pct,
        t.fees(),
        t.exit_reason.label(),
        balance,
    )
}

pub fn format_daily_summary(a: &AccountState) -> String {
    format!(
        "📊 <b>Daily Summary</b> ({})\n\
         PnL:      <code>{:+.2} USDT</code>\n\
         Trades:   <code>{}</code>  Wins: <code>{}</code>  WR: <code>{:.1}%</code>\n\
         Balance:  <code>{:.2} USDT</code>  DD: <code>{:.1}%</code>",
        a.trading_day,
        a.daily_pnl,
        a.total_trades,
        a.wins,
        a.win_rate(),
        a.balance,
        a.drawdown_pct(),
    )
}

pub fn format_status(lines: &[String], a: &AccountState, open: usize) -> String {
    let status_flag = match a.halted {
        None => "✅ active".to_string(),
        Some(r) => format!("⛔ halted ({})", r.label()),
    };
    let pnl_emoji = if a.daily_pnl >= 0.0 { "📈" } else { "📉" };
    let header = format!(
        "📡 <b>Bot status</b> | {status_flag}\n\
         Balance: <code>${:.2}</code> | {pnl_emoji} Today: <code>{:+.2}</code> | Open: <code>{open}</code>\n\
         ─────────────────────",
        a.balance, a.daily_pnl
    );
    if lines.is_empty() {
        header
    } else {
        format!("{header}\n{}", lines.join("\n"))
    }
}

/// Telegram HTML mode rejects stray `<`, `>` and `&`.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// `/positions` reply. Positions without a known price show no PnL.
pub fn format_positions(positions: &HashMap<String, Position>, prices: &HashMap<String, f64>) -> String {
    if positions.is_empty() {
        return "No open positions.".to_string();
    }
    let mut symbols: Vec<&String> = positions.keys().collect();
    symbols.sort();

    let mut lines = vec![format!("📂 <b>Open positions</b> ({})", positions.len())];
    for sym in symbols {
        let pos = &positions[sym];
        let pnl = match prices.get(sym) {
            Some(px) => format!("<code>{:+.2}</code> @ <code>{:.4}</code>", unrealized_pnl(pos, *px), px),
            None => "n/a".to_string(),
        };
        let trail = pos.trailing_stop.map(|t| format!(" trail <code>{t:.4}</code>")).unwrap_or_default();
        lines.push(format!(
            "{} <b>{}</b> {} entry <code>{:.4}</code> SL <code>{:.4}</code> TP <code>{:.4}</code>{trail}\n   PnL {pnl}",
            side_emoji(pos.side),
            sym,
            pos.side.label(),
            pos.entry_price,
            pos.stop_loss,
            pos.take_profit,
        ));
    }
    lines.join("\n")
}

/// `/trades` reply: the most recent `limit` closed trades, newest first.
pub fn format_trades(trades: &[TradeRecord], limit: usize) -> String {
    if trades.is_empty() {
        return "No closed trades yet.".to_string();
    }
    let mut lines = vec![format!("🧾 <b>Last trades</b> ({} total)", trades.len())];
    for t in trades.iter().rev().take(limit) {
        lines.push(format!(
            "{} {} {} <code>{:.4}</code> → <code>{:.4}</code> | <code>{:+.2}</code> | {}",
            if t.is_win() { "✅" } else { "❌" },
            t.symbol,
            t.side.label(),
            t.entry_price,
            t.exit_price,
            t.net_pnl(),
            t.exit_reason.label(),
        ));
    }
    lines.join("\n")
}

/// `/status` reply. Trade count and win rate come from the account counters,
/// which survive `/clear`; profit factor and max drawdown cover the kept history.
pub fn format_status_reply(a: &AccountState, open: usize, unrealized: f64, history: &TradeStats) -> String {
    format!(
        "{}\n\
         Unrealized: <code>{:+.2}</code>\n\
         Trades: <code>{}</code> (W {} / L {}) | WR: <code>{:.1}%</code> | Fees: <code>{:.2}</code>\n\
         History ({} trades): PF <code>{:.2}</code> | Max DD <code>{:.1}%</code>",
        format_status(&[], a, open),
        unrealized,
        a.total_trades,
        a.wins,
        a.losses,
        a.win_rate(),
        a.total_fees,
        history.trades,
        history.profit_factor,
        history.max_drawdown_pct,
    )
}

/// Risk alert for a failed exchange mirror order.
pub fn format_order_failure(symbol: &str, action: &str, err: &dyn std::fmt::Display) -> String {
    format!(
        "[{}] Live {action} failed: {}",
        escape_html(symbol),
        escape_html(&err.to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExitReason;
    use chrono::NaiveDate;

    #[test]
    fn updates_from_other_chats_are_dropped() {
        let body = r#"{"ok":true,"result":[
            {"update_id":10,"message":{"chat":{"id":42},"text":"/status"}},
            {"update_id":11,"message":{"chat":{"id":7},"text":"/pause"}},
            {"update_id":12,"message":{"chat":{"id":42}}},
            {"update_id":13}
        ]}"#;
        let batch = parse_updates(body, "42").unwrap();
        assert_eq!(batch.messages, vec![Incoming { update_id: 10, text: "/status".into() }]);
        assert_eq!(batch.next_offset, Some(14));
    }

    #[test]
    fn fully_filtered_batch_still_advances_offset() {
        let body = r#"{"ok":true,"result":[
            {"update_id":500,"message":{"chat":{"id":7},"text":"/pause"}},
            {"update_id":501,"edited_message":{"chat":{"id":42},"text":"/close BTCUSDT"}}
        ]}"#;
        let batch = parse_updates(body, "42").unwrap();
        assert!(batch.messages.is_empty());
        assert_eq!(batch.next_offset, Some(502));
    }

    #[test]
    fn not_ok_response_is_empty() {
        assert_eq!(parse_updates(r#"{"ok":false}"#, "1").unwrap(), UpdateBatch::default());
        assert_eq!(parse_updates(r#"{"ok":true,"result":[]}"#, "1").unwrap().next_offset, None);
        assert!(parse_updates("<html>", "1").is_err());
    }

    #[test]
    fn close_message_shows_net_pnl_and_reason() {
        let t = TradeRecord {
            symbol: "BTCUSDT".into(),
            side: Side::Long,
            entry_price: 100_000.0,
            exit_price: 105_000.0,
            notional: 1_000.0,
            leverage: 10.0,
            pnl: 500.0,
            pnl_pct: 50.0,
            entry_fee: 5.5,
            exit_fee: 5.5,
            exit_reason: ExitReason::TakeProfit,
            opened_at: 0,
            closed_at: 3_600,
        };
        let msg = format_trade_close(&t, 10_489.0);
        assert!(msg.contains("+489.00 USDT"));
        assert!(msg.contains("Take-profit reached"));
        assert!(msg.contains("held 60 min"));
    }

    #[test]
    fn status_header_reflects_halt() {
        let mut a = AccountState::new(1_000.0, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        a.pause();
        let msg = format_status(&["line".to_string()], &a, 0);
        assert!(msg.contains("halted (paused by operator)"));
        assert!(msg.ends_with("line"));
    }

    #[test]
    fn trades_listed_newest_first() {
        let mk = |sym: &str, exit: f64| TradeRecord {
            symbol: sym.into(),
            side: Side::Long,
            entry_price: 100.0,
            exit_price: exit,
            notional: 100.0,
            leverage: 1.0,
            pnl: exit - 100.0,
            pnl_pct: exit - 100.0,
            entry_fee: 0.0,
            exit_fee: 0.0,
            exit_reason: ExitReason::Manual,
            opened_at: 0,
            closed_at: 60,
        };
        let trades = vec![mk("AAA", 101.0), mk("BBB", 99.0), mk("CCC", 102.0)];
        let msg = format_trades(&trades, 2);
        assert!(msg.contains("3 total"));
        assert!(!msg.contains("AAA"));
        assert!(msg.find("CCC").unwrap() < msg.find("BBB").unwrap());
        assert_eq!(format_trades(&[], 5), "No closed trades yet.");
    }

    #[test]
    fn positions_without_price_show_na() {
        let mut positions = HashMap::new();
        positions.insert(
            "SOLUSDT".to_string(),
            Position {
                symbol: "SOLUSDT".into(),
                side: Side::Short,
                entry_price: 150.0,
                notional: 100.0,
                leverage: 5.0,
                stop_loss: 153.0,
                take_profit: 142.5,
                trailing_stop: None,
                best_price: 150.0,
                entry_fee: 0.275,
                opened_at: 0,
            },
        );
        let msg = format_positions(&positions, &HashMap::new());
        assert!(msg.contains("SOLUSDT") && msg.contains("n/a"));

        let mut prices = HashMap::new();
        prices.insert("SOLUSDT".to_string(), 147.0);
        // 2 % × 5x on 100
        assert!(format_positions(&positions, &prices).contains("+10.00"));
    }

    #[test]
    fn html_is_escaped() {
        assert_eq!(escape_html("/x <b>&"), "/x &lt;b&gt;&amp;");
    }

    #[test]
    fn order_failure_escapes_error_text() {
        let msg = format_order_failure("BTC<USDT>", "close", &"HTTP error: <html>bad gateway</html>");
        assert!(!msg.contains('<'));
        assert!(msg.contains("Live close failed"));
        assert!(msg.contains("&lt;html&gt;"));
    }

    #[test]
    fn status_reply_keeps_counters_after_history_is_cleared() {
        let mut a = AccountState::new(1_000.0, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        a.total_trades = 4;
        a.wins = 3;
        a.losses = 1;
        let cleared = TradeStats::compute(&[], a.initial_balance);
        let msg = format_status_reply(&a, 0, 0.0, &cleared);
        assert!(msg.contains("Trades: <code>4</code> (W 3 / L 1)"));
        assert!(msg.contains("WR: <code>75.0%</code>"));
        assert!(msg.contains("History (0 trades)"));
    }

    #[test]
    fn notifier_without_bot_is_disabled() {
        assert!(Notifier::new(None).bot().is_none());
        assert!(TelegramBot::from_config(&Config::default()).is_none());
    }
}
