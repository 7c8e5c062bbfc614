/// Candle replay — feeds a CSV through the live trading core, candle by candle.
/// Run: cargo run --bin replay --release -- data/BTCUSDT_15.csv BTCUSDT
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use paper_trader::config::Config;
use paper_trader::engine::Trader;
use paper_trader::signal;
use paper_trader::types::{Candle, Side};

/// Parse `timestamp,open,high,low,close,volume`. Millisecond timestamps are
/// converted to seconds. Returns `None` for headers and malformed rows.
fn parse_row(line: &str) -> Option<Candle> {
    let f: Vec<&str> = line.split(',').map(str::trim).collect();
    if f.len() < 6 {
        return None;
    }
    let ts: i64 = f[0].parse().ok()?;
    Some(Candle {
        timestamp: if ts > 10_000_000_000 { ts / 1000 } else { ts },
        open: f[1].parse().ok()?,
        high: f[2].parse().ok()?,
        low: f[3].parse().ok()?,
        close: f[4].parse().ok()?,
        volume: f[5].parse().ok()?,
    })
}

fn load_csv(path: &Path) -> std::io::Result<Vec<Candle>> {
    let mut out = Vec::new();
    for line in BufReader::new(File::open(path)?).lines() {
        if let Some(c) = parse_row(&line?) {
            out.push(c);
        }
    }
    out.sort_by_key(|c| c.timestamp);
    Ok(out)
}

/// Price path inside one candle: adverse extreme first, so a bar that spans
/// both SL and TP is booked as a loss.
fn intrabar_path(c: &Candle, side: Option<Side>) -> [f64; 3] {
    match side {
        Some(Side::Short) => [c.high, c.low, c.close],
        _ => [c.low, c.high, c.close],
    }
}

fn replay(cfg: &Config, symbol: &str, candles: &[Candle]) -> Trader {
    let start = candles.first().map(|c| c.timestamp).unwrap_or(0);
    let mut trader = Trader::new(cfg.initial_balance, cfg.risk.clone(), start);
    let window = cfg.kline_limit.max(cfg.signal.min_candles());

    for (i, c) in candles.iter().enumerate() {
        trader.roll_day(c.timestamp);

        let side = trader.positions.get(symbol).map(|p| p.side);
        for px in intrabar_path(c, side) {
            if trader.on_price(symbol, px, c.timestamp).is_some() {
                break;
            }
        }

        if !trader.positions.contains_key(symbol) {
            let from = (i + 1).saturating_sub(window);
            let eval = signal::evaluate(&candles[from..=i], &cfg.signal);
            if let Err(e) = trader.on_signal(symbol, eval.kind, c.close, c.timestamp) {
                log::debug!("[{}] {} — {}", symbol, c.timestamp, e);
            }
        }

        if let Some(reason) = trader.check_risk() {
            log::info!("[{}] halted at {}: {}", symbol, c.timestamp, reason.label());
        }
    }
    trader
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: {} <candles.csv> <SYMBOL>", args[0]);
        std::process::exit(2);
    }
    let path = Path::new(&args[1]);
    let symbol = args[2].to_ascii_uppercase();

    let cfg = Config::from_env()?;
    let candles = load_csv(path)?;
    println!("\n  {} — {} candles from {}", symbol, candles.len(), path.display());

    let trader = replay(&cfg, &symbol, &candles);
    let s = trader.stats();
    let a = &trader.account;

    println!("  ─────────────────────────────────────────────");
    println!("  Trades        {:>8}   (W {} / L {})", s.trades, s.wins, s.losses);
    println!("  Win rate      {:>7.1}%", s.win_rate);
    println!("  Net PnL       {:>+10.2} USDT", s.net_pnl);
    println!("  Fees          {:>10.2} USDT", s.fees);
    println!("  Profit factor {:>10.2}", s.profit_factor);
    println!("  Max drawdown  {:>7.1}%", s.max_drawdown_pct);
    println!("  Best / worst  {:>+10.2} / {:+.2}", s.best, s.worst);
    println!("  Balance       {:>10.2} → {:.2}", a.initial_balance, a.balance);
    if let Some(pos) = trader.positions.get(&symbol) {
        println!("  Still open    {} @ {:.4}", pos.side.label(), pos.entry_price);
    }
    if let Some(reason) = a.halted {
        println!("  Halted        {}", reason.label());
    }
    println!();
    Ok(())
}
