use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::config::Config;
use crate::types::{Candle, Side};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: &str = "5000";

// ── Error types ───────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Rate limited (retCode=10006 or HTTP 429). retry_after in seconds.
    #[error("rate limited (retry after {retry_after}s)")]
    RateLimit { retry_after: u64 },
    /// Network, timeout, HTTP 5xx, server overload (retCode=10016).
    #[error("transient error: {0}")]
    Transient(String),
    /// Invalid params, insufficient balance, HTTP 4xx.
    #[error("permanent error: {0}")]
    Permanent(String),
}

/// Classify a Bybit retCode + HTTP status.
fn classify_error(ret_code: i64, http_status: u16, msg: &str) -> ExchangeError {
    match (ret_code, http_status) {
        (10006, _) | (_, 429) => ExchangeError::RateLimit { retry_after: 10 },
        (10016, _) | (_, 500..=599) => ExchangeError::Transient(msg.to_string()),
        _ => ExchangeError::Permanent(format!("retCode={} msg={}", ret_code, msg)),
    }
}

/// Retry rate limits and transient failures with exponential backoff.
async fn with_retry<F, Fut, T>(operation: F, max_retries: u32) -> Result<T, ExchangeError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
{
    let mut retries = 0;
    let mut delay: u64 = 1;
    loop {
        match operation().await {
            Ok(r) => return Ok(r),
            Err(ExchangeError::RateLimit { retry_after }) => {
                if retries >= max_retries {
                    return Err(ExchangeError::RateLimit { retry_after });
                }
                log::warn!("Rate limited — sleeping {}s (attempt {}/{})", retry_after, retries + 1, max_retries);
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                retries += 1;
            }
            Err(ExchangeError::Transient(msg)) => {
                if retries >= max_retries {
                    return Err(ExchangeError::Transient(msg));
                }
                log::warn!("Transient error: {} — retry in {}s ({}/{})", msg, delay, retries + 1, max_retries);
                tokio::time::sleep(Duration::from_secs(delay)).await;
                delay = (delay * 2).min(60);
                retries += 1;
            }
            Err(e @ ExchangeError::Permanent(_)) => return Err(e),
        }
    }
}

// ── Response parsing ──────────────────────────────────────────────────────────

/// Check the v5 envelope and hand back the body on retCode=0.
fn check_envelope(json: serde_json::Value, http_status: u16) -> Result<serde_json::Value, ExchangeError> {
    let ret_code = json["retCode"].as_i64().unwrap_or(-1);
    if ret_code == 0 {
        Ok(json)
    } else {
        let msg = json["retMsg"].as_str().unwrap_or("unknown");
        Err(classify_error(ret_code, http_status, msg))
    }
}

fn parse_num(v: &serde_json::Value) -> Option<f64> {
    v.as_str()?.parse().ok()
}

/// `result.list` rows are `[start_ms, open, high, low, close, volume, turnover]`, newest first.
/// Returned oldest-first with timestamps in seconds.
pub fn parse_klines(json: &serde_json::Value) -> Result<Vec<Candle>, ExchangeError> {
    let list = json["result"]["list"]
        .as_array()
        .ok_or_else(|| ExchangeError::Transient("missing result.list".into()))?;

    let mut candles: Vec<Candle> = list
        .iter()
        .filter_map(|row| {
            let arr = row.as_array()?;
            if arr.len() < 6 {
                return None;
            }
            Some(Candle {
                timestamp: arr[0].as_str()?.parse::<i64>().ok()? / 1000,
                open: parse_num(&arr[1])?,
                high: parse_num(&arr[2])?,
                low: parse_num(&arr[3])?,
                close: parse_num(&arr[4])?,
                volume: parse_num(&arr[5])?,
            })
        })
        .collect();
    candles.reverse();
    Ok(candles)
}

pub fn parse_last_price(json: &serde_json::Value) -> Result<f64, ExchangeError> {
    json["result"]["list"]
        .as_array()
        .and_then(|a| a.first())
        .and_then(|t| parse_num(&t["lastPrice"]))
        .ok_or_else(|| ExchangeError::Transient("ticker without lastPrice".into()))
}

pub fn parse_wallet_equity(json: &serde_json::Value) -> Result<f64, ExchangeError> {
    json["result"]["list"]
        .as_array()
        .and_then(|a| a.first())
        .and_then(|acct| parse_num(&acct["totalEquity"]))
        .ok_or_else(|| ExchangeError::Permanent("wallet-balance without totalEquity".into()))
}

// ── Client ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct BybitClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl BybitClient {
    pub fn new(cfg: &Config) -> Result<Self, ExchangeError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ExchangeError::Permanent(format!("HTTP client build failed: {}", e)))?;

        let credentials = match (&cfg.api_key, &cfg.api_secret) {
            (Some(k), Some(s)) => Some((k.clone(), s.clone())),
            _ => None,
        };
        Ok(BybitClient { client, base_url: cfg.rest_url.clone(), credentials })
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Headers for a signed v5 request. `payload` is the query string (GET) or body (POST).
    fn signed_headers(&self, payload: &str) -> Result<Vec<(&'static str, String)>, ExchangeError> {
        let (api_key, api_secret) = self
            .credentials
            .as_ref()
            .ok_or_else(|| ExchangeError::Permanent("no API credentials configured".into()))?;

        let ts = Self::timestamp_ms().to_string();
        let to_sign = format!("{}{}{}{}", ts, api_key, RECV_WINDOW, payload);
        let mut mac = HmacSha256::new_from_slice(api_secret.as_bytes())
            .map_err(|e| ExchangeError::Permanent(format!("HMAC init failed: {}", e)))?;
        mac.update(to_sign.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(vec![
            ("X-BAPI-API-KEY", api_key.clone()),
            ("X-BAPI-TIMESTAMP", ts),
            ("X-BAPI-SIGN", signature),
            ("X-BAPI-RECV-WINDOW", RECV_WINDOW.to_string()),
        ])
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<serde_json::Value, ExchangeError> {
        let resp = req
            .send()
            .await
            .map_err(|e| ExchangeError::Transient(format!("HTTP error: {}", e)))?;

        let http_status = resp.status().as_u16();
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Transient(format!("Parse error: {}", e)))?;
        check_envelope(json, http_status)
    }

    // ── Internal raw methods (no retry) ──────────────────────────────────────

    async fn fetch_klines_raw(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        let url = format!(
            "{}/v5/market/kline?category=linear&symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );
        let json = self.send(self.client.get(&url)).await?;
        parse_klines(&json)
    }

    async fn fetch_ticker_raw(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let url = format!("{}/v5/market/tickers?category=linear&symbol={}", self.base_url, symbol);
        let json = self.send(self.client.get(&url)).await?;
        parse_last_price(&json)
    }

    async fn wallet_balance_raw(&self) -> Result<f64, ExchangeError> {
        let query = "accountType=UNIFIED";
        let url = format!("{}/v5/account/wallet-balance?{}", self.base_url, query);
        let mut req = self.client.get(&url);
        for (k, v) in self.signed_headers(query)? {
            req = req.header(k, v);
        }
        let json = self.send(req).await?;
        parse_wallet_equity(&json)
    }

    async fn market_order_raw(
        &self,
        symbol: &str,
        side: &str,
        qty: f64,
        reduce_only: bool,
    ) -> Result<String, ExchangeError> {
        let body = serde_json::json!({
            "category":    "linear",
            "symbol":      symbol,
            "side":        side,
            "orderType":   "Market",
            "qty":         format!("{}", qty),
            "reduceOnly":  reduce_only,
            "timeInForce": "IOC"
        })
        .to_string();

        let url = format!("{}/v5/order/create", self.base_url);
        let mut req = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (k, v) in self.signed_headers(&body)? {
            req = req.header(k, v);
        }
        let json = self.send(req.body(body)).await?;
        let order_id = json["result"]["orderId"].as_str().unwrap_or("unknown").to_string();
        log::info!("Order placed: {} {} qty={} orderId={}", side, symbol, qty, order_id);
        Ok(order_id)
    }

    // ── Public methods with retry ─────────────────────────────────────────────

    /// Last `limit` klines for a symbol, oldest-first (public endpoint).
    pub async fn fetch_klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        with_retry(|| self.fetch_klines_raw(symbol, interval, limit), 3).await
    }

    pub async fn fetch_ticker(&self, symbol: &str) -> Result<f64, ExchangeError> {
        with_retry(|| self.fetch_ticker_raw(symbol), 3).await
    }

    /// Unified-account total equity in USD (signed).
    pub async fn fetch_wallet_balance(&self) -> Result<f64, ExchangeError> {
        with_retry(|| self.wallet_balance_raw(), 3).await
    }

    /// Mirror a paper entry with a market order.
    pub async fn open_market(&self, symbol: &str, side: Side, qty: f64) -> Result<String, ExchangeError> {
        with_retry(|| self.market_order_raw(symbol, side.order_side(), qty, false), 3).await
    }

    /// Flatten a position with a reduce-only market order on the opposite side.
    pub async fn close_market(&self, symbol: &str, side: Side, qty: f64) -> Result<String, ExchangeError> {
        let close_side = match side {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        };
        with_retry(|| self.market_order_raw(symbol, close_side.order_side(), qty, true), 3).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn klines_are_reversed_to_oldest_first() {
        let body = json!({
            "retCode": 0,
            "result": { "list": [
                ["1700000120000", "102", "103", "101", "102.5", "10", "0"],
                ["1700000060000", "101", "102", "100", "102", "12", "0"],
                ["bad"]
            ]}
        });
        let candles = parse_klines(&body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp, 1_700_000_060);
        assert_eq!(candles[1].close, 102.5);
    }

    #[test]
    fn envelope_errors_are_classified() {
        let rate = check_envelope(json!({"retCode": 10006, "retMsg": "slow down"}), 200);
        assert!(matches!(rate, Err(ExchangeError::RateLimit { .. })));

        let busy = check_envelope(json!({"retCode": 10016, "retMsg": "busy"}), 200);
        assert!(matches!(busy, Err(ExchangeError::Transient(_))));

        let bad = check_envelope(json!({"retCode": 10001, "retMsg": "params"}), 200);
        assert!(matches!(bad, Err(ExchangeError::Permanent(_))));

        assert!(check_envelope(json!({"retCode": 0}), 200).is_ok());
    }

    #[test]
    fn ticker_and_wallet_parsing() {
        let ticker = json!({"result": {"list": [{"symbol": "BTCUSDT", "lastPrice": "64123.5"}]}});
        assert_eq!(parse_last_price(&ticker).unwrap(), 64_123.5);
        assert!(parse_last_price(&json!({"result": {"list": []}})).is_err());

        let wallet = json!({"result": {"list": [{"totalEquity": "10500.25"}]}});
        assert_eq!(parse_wallet_equity(&wallet).unwrap(), 10_500.25);
    }

    #[tokio::test]
    async fn retry_gives_up_on_permanent_errors() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let res: Result<(), _> = with_retry(
            || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err(ExchangeError::Permanent("nope".into())) }
            },
            3,
        )
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn signed_calls_need_credentials() {
        let client = BybitClient::new(&Config::default()).unwrap();
        assert!(matches!(client.signed_headers("x"), Err(ExchangeError::Permanent(_))));
    }
}
