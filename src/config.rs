use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

// ─── Bybit ────────────────────────────────────────────────────────────────────
pub const BYBIT_REST_URL: &str = "https://api.bybit.com";
// BYBIT_API_KEY, BYBIT_SECRET, TELEGRAM_TOKEN, TELEGRAM_CHAT_ID
// are read from the environment (or .env) at startup.

// ─── Account & risk defaults ──────────────────────────────────────────────────
pub const ACCOUNT_BALANCE: f64 = 10_000.0;
pub const POSITION_SIZE_PCT: f64 = 0.10;     // 10 % of balance as margin per trade
pub const TAKER_FEE: f64 = 0.00055;          // Bybit linear taker
pub const MAX_OPEN_POSITIONS: usize = 3;
pub const MAX_DAILY_LOSS_PCT: f64 = 0.05;    // 5 % of day-start balance
pub const MAX_DRAWDOWN_PCT: f64 = 0.15;      // 15 % from peak

pub const TRADING_PAIRS: &[&str] = &["BTCUSDT", "ETHUSDT", "SOLUSDT", "BNBUSDT", "XRPUSDT"];
pub const KLINE_INTERVAL: &str = "15";
pub const KLINE_LIMIT: usize = 200;
pub const POLL_INTERVAL_SECS: u64 = 60;
pub const STATUS_INTERVAL_SECS: u64 = 30 * 60;
pub const STATE_FILE: &str = "paper_state.json";

// ─── Per-symbol exit parameters ───────────────────────────────────────────────
//
//            Symbol   SL%   TP%  Trail%  Arm%  Lev
//           BTCUSDT   1.2   5.0    1.0    1.5   10
//           ETHUSDT   1.5   5.0    1.2    2.0   10
//           SOLUSDT   2.0   6.0    1.5    2.5    5
//           BNBUSDT   1.5   4.0    1.2    2.0    5
//           XRPUSDT   2.0   6.0    1.5    2.5    5

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SymbolParams {
    pub sl_pct:         f64, // stop-loss distance as fraction of entry
    pub tp_pct:         f64, // take-profit distance as fraction of entry
    pub trailing_pct:   f64, // trailing distance from best price; 0 disables
    pub trail_arm_pct:  f64, // favourable move needed before the trail arms
    pub leverage:       f64,
    pub qty_step:       f64, // exchange lot step, live orders only
}

pub const fn params(
    sl_pct: f64, tp_pct: f64, trailing_pct: f64, trail_arm_pct: f64, leverage: f64, qty_step: f64,
) -> SymbolParams {
    SymbolParams { sl_pct, tp_pct, trailing_pct, trail_arm_pct, leverage, qty_step }
}

pub fn symbol_params(symbol: &str) -> SymbolParams {
    match symbol {
        "BTCUSDT" => params(0.012, 0.05, 0.010, 0.015, 10.0, 0.001),
        "ETHUSDT" => params(0.015, 0.05, 0.012, 0.020, 10.0, 0.01),
        "SOLUSDT" => params(0.020, 0.06, 0.015, 0.025,  5.0, 0.1),
        "BNBUSDT" => params(0.015, 0.04, 0.012, 0.020,  5.0, 0.01),
        "XRPUSDT" => params(0.020, 0.06, 0.015, 0.025,  5.0, 1.0),
        _         => params(0.020, 0.05, 0.015, 0.025,  5.0, 1.0), // fallback
    }
}

// ─── Signal thresholds ────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct SignalParams {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub adx_period: usize,
    pub adx_min: f64,
    pub rsi_long_min: f64,
    pub rsi_long_max: f64,
    pub rsi_short_min: f64,
    pub rsi_short_max: f64,
}

impl Default for SignalParams {
    fn default() -> Self {
        SignalParams {
            ema_fast: 9,
            ema_slow: 21,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            adx_period: 14,
            adx_min: 30.0,
            rsi_long_min: 45.0,
            rsi_long_max: 70.0,
            rsi_short_min: 30.0,
            rsi_short_max: 55.0,
        }
    }
}

impl SignalParams {
    /// Candles needed before every indicator has a value.
    pub fn min_candles(&self) -> usize {
        let macd = self.macd_slow + self.macd_signal;
        let adx = self.adx_period * 2 + 1;
        macd.max(adx).max(self.ema_slow).max(self.rsi_period + 1)
    }
}

// ─── Runtime configuration ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("live mode requires BYBIT_API_KEY and BYBIT_SECRET")]
    MissingCredentials,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Fills are simulated locally.
    Paper,
    /// Fills are simulated locally and mirrored to the exchange as market orders.
    Live,
}

impl FromStr for ExecutionMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paper" => Ok(ExecutionMode::Paper),
            "live" => Ok(ExecutionMode::Live),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RiskLimits {
    pub position_size_pct: f64,
    pub taker_fee: f64,
    pub max_positions: usize,
    pub max_daily_loss_pct: f64,
    pub max_drawdown_pct: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        RiskLimits {
            position_size_pct: POSITION_SIZE_PCT,
            taker_fee: TAKER_FEE,
            max_positions: MAX_OPEN_POSITIONS,
            max_daily_loss_pct: MAX_DAILY_LOSS_PCT,
            max_drawdown_pct: MAX_DRAWDOWN_PCT,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub trading_pairs: Vec<String>,
    pub kline_interval: String,
    pub kline_limit: usize,
    pub poll_interval_secs: u64,
    pub status_interval_secs: u64,
    pub initial_balance: f64,
    pub risk: RiskLimits,
    pub signal: SignalParams,
    pub state_file: PathBuf,
    pub mode: ExecutionMode,
    pub rest_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            trading_pairs: TRADING_PAIRS.iter().map(|s| s.to_string()).collect(),
            kline_interval: KLINE_INTERVAL.to_string(),
            kline_limit: KLINE_LIMIT,
            poll_interval_secs: POLL_INTERVAL_SECS,
            status_interval_secs: STATUS_INTERVAL_SECS,
            initial_balance: ACCOUNT_BALANCE,
            risk: RiskLimits::default(),
            signal: SignalParams::default(),
            state_file: PathBuf::from(STATE_FILE),
            mode: ExecutionMode::Paper,
            rest_url: BYBIT_REST_URL.to_string(),
            api_key: None,
            api_secret: None,
            telegram_token: None,
            telegram_chat_id: None,
        }
    }
}

impl Config {
    /// Load `.env` (if present) and overlay environment variables on the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Config::default();

        if let Some(pairs) = get("TRADING_PAIRS") {
            cfg.trading_pairs = pairs
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(iv) = get("KLINE_INTERVAL") {
            cfg.kline_interval = iv;
        }
        cfg.kline_limit = parse_or(&get, "KLINE_LIMIT", cfg.kline_limit)?;
        cfg.poll_interval_secs = parse_or(&get, "POLL_INTERVAL_SECS", cfg.poll_interval_secs)?;
        cfg.status_interval_secs = parse_or(&get, "STATUS_INTERVAL_SECS", cfg.status_interval_secs)?;
        cfg.initial_balance = parse_or(&get, "INITIAL_BALANCE", cfg.initial_balance)?;

        cfg.risk.position_size_pct = parse_or(&get, "POSITION_SIZE_PCT", cfg.risk.position_size_pct)?;
        cfg.risk.taker_fee = parse_or(&get, "TAKER_FEE", cfg.risk.taker_fee)?;
        cfg.risk.max_positions = parse_or(&get, "MAX_POSITIONS", cfg.risk.max_positions)?;
        cfg.risk.max_daily_loss_pct = parse_or(&get, "MAX_DAILY_LOSS_PCT", cfg.risk.max_daily_loss_pct)?;
        cfg.risk.max_drawdown_pct = parse_or(&get, "MAX_DRAWDOWN_PCT", cfg.risk.max_drawdown_pct)?;

        cfg.signal.adx_min = parse_or(&get, "ADX_MIN", cfg.signal.adx_min)?;

        if let Some(path) = get("STATE_FILE") {
            cfg.state_file = PathBuf::from(path);
        }
        if let Some(mode) = get("EXECUTION_MODE") {
            cfg.mode = mode
                .parse()
                .map_err(|_| ConfigError::Invalid { key: "EXECUTION_MODE", value: mode.clone() })?;
        }
        if let Some(url) = get("BYBIT_REST_URL") {
            cfg.rest_url = url.trim_end_matches('/').to_string();
        }
        cfg.api_key = get("BYBIT_API_KEY");
        cfg.api_secret = get("BYBIT_SECRET");
        cfg.telegram_token = get("TELEGRAM_TOKEN");
        cfg.telegram_chat_id = get("TELEGRAM_CHAT_ID");

        if cfg.trading_pairs.is_empty() {
            return Err(ConfigError::Invalid { key: "TRADING_PAIRS", value: String::new() });
        }
        if !(cfg.initial_balance > 0.0) {
            return Err(ConfigError::Invalid {
                key: "INITIAL_BALANCE",
                value: cfg.initial_balance.to_string(),
            });
        }
        if cfg.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid { key: "POLL_INTERVAL_SECS", value: "0".into() });
        }
        if cfg.risk.max_positions == 0 {
            return Err(ConfigError::Invalid { key: "MAX_POSITIONS", value: "0".into() });
        }
        let size = cfg.risk.position_size_pct;
        if !(size > 0.0 && size <= 1.0) {
            return Err(ConfigError::Invalid { key: "POSITION_SIZE_PCT", value: size.to_string() });
        }
        if cfg.mode == ExecutionMode::Live && (cfg.api_key.is_none() || cfg.api_secret.is_none()) {
            return Err(ConfigError::MissingCredentials);
        }
        Ok(cfg)
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}
