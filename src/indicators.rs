use crate::types::Candle;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Exponential moving average series, seeded with the SMA of the first `period` values.
///
/// The result is aligned to the end of `values`: `out.last()` belongs to `values.last()`.
/// Empty when there is not enough history.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for v in &values[period..] {
        prev = v * k + prev * (1.0 - k);
        out.push(prev);
    }
    out
}

/// Relative Strength Index with Wilder smoothing.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for w in closes[..=period].windows(2) {
        let change = w[1] - w[0];
        if change > 0.0 { avg_gain += change } else { avg_loss -= change }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    let p = period as f64;
    for w in closes[period..].windows(2) {
        let change = w[1] - w[0];
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
    }

    if avg_loss == 0.0 {
        // Flat series has no direction at all.
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD line, signal line and histogram for the latest bar.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || fast >= slow {
        return None;
    }
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    if slow_ema.is_empty() {
        return None;
    }
    let offset = fast_ema.len() - slow_ema.len();
    let line: Vec<f64> = slow_ema
        .iter()
        .enumerate()
        .map(|(i, s)| fast_ema[i + offset] - s)
        .collect();

    let signal_series = ema(&line, signal);
    let sig = *signal_series.last()?;
    let last = *line.last()?;
    Some(Macd { line: last, signal: sig, histogram: last - sig })
}

/// Average Directional Index (Wilder). Needs at least `2 * period + 1` candles.
pub fn adx(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period * 2 + 1 {
        return None;
    }

    let mut trs = Vec::with_capacity(candles.len() - 1);
    let mut plus_dm = Vec::with_capacity(candles.len() - 1);
    let mut minus_dm = Vec::with_capacity(candles.len() - 1);
    for w in candles.windows(2) {
        let (prev, curr) = (&w[0], &w[1]);
        let up = curr.high - prev.high;
        let down = prev.low - curr.low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
        trs.push(true_range(curr, prev));
    }

    let p = period as f64;
    let mut s_tr: f64 = trs[..period].iter().sum();
    let mut s_plus: f64 = plus_dm[..period].iter().sum();
    let mut s_minus: f64 = minus_dm[..period].iter().sum();

    let mut dxs = Vec::with_capacity(trs.len() - period + 1);
    dxs.push(directional_index(s_tr, s_plus, s_minus));
    for i in period..trs.len() {
        s_tr = s_tr - s_tr / p + trs[i];
        s_plus = s_plus - s_plus / p + plus_dm[i];
        s_minus = s_minus - s_minus / p + minus_dm[i];
        dxs.push(directional_index(s_tr, s_plus, s_minus));
    }

    let mut adx = dxs[..period].iter().sum::<f64>() / p;
    for dx in &dxs[period..] {
        adx = (adx * (p - 1.0) + dx) / p;
    }
    Some(adx)
}

fn directional_index(tr: f64, plus: f64, minus: f64) -> f64 {
    if tr <= 0.0 {
        return 0.0;
    }
    let di_plus = 100.0 * plus / tr;
    let di_minus = 100.0 * minus / tr;
    let sum = di_plus + di_minus;
    if sum == 0.0 { 0.0 } else { 100.0 * (di_plus - di_minus).abs() / sum }
}

fn true_range(curr: &Candle, prev: &Candle) -> f64 {
    (curr.high - curr.low)
        .max((curr.high - prev.close).abs())
        .max((curr.low - prev.close).abs())
}

/// Simple average true range over the last `period` bars.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let start = candles.len() - period - 1;
    let sum: f64 = candles[start..]
        .windows(2)
        .map(|w| true_range(&w[1], &w[0]))
        .sum();
    Some(sum / period as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle { timestamp: 0, open: close, high, low, close, volume: 1.0 }
    }

    #[test]
    fn ema_of_constant_series_is_constant() {
        let out = ema(&[5.0; 30], 9);
        assert_eq!(out.len(), 22);
        assert!(out.iter().all(|v| (v - 5.0).abs() < 1e-12));
    }

    #[test]
    fn ema_needs_full_period() {
        assert!(ema(&[1.0, 2.0], 3).is_empty());
        assert_eq!(ema(&[1.0, 2.0, 3.0], 3), vec![2.0]);
    }

    #[test]
    fn rsi_extremes() {
        let up: Vec<f64> = (1..=30).map(|i| i as f64).collect();
        let down: Vec<f64> = up.iter().rev().copied().collect();
        assert_eq!(rsi(&up, 14), Some(100.0));
        assert!(rsi(&down, 14).unwrap() < 1e-9);
        assert_eq!(rsi(&[10.0; 20], 14), Some(50.0));
        assert_eq!(rsi(&up[..14], 14), None);
    }

    #[test]
    fn rsi_stays_in_range_on_mixed_series() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + ((i * 7) % 11) as f64 - 5.0).collect();
        let v = rsi(&closes, 14).unwrap();
        assert!((0.0..=100.0).contains(&v));
    }

    #[test]
    fn macd_follows_trend() {
        let up: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.5).collect();
        let m = macd(&up, 12, 26, 9).unwrap();
        assert!(m.line > 0.0);

        let flat = macd(&[100.0; 60], 12, 26, 9).unwrap();
        assert!(flat.histogram.abs() < 1e-9);

        assert!(macd(&up[..30], 12, 26, 9).is_none());
    }

    #[test]
    fn adx_is_high_for_steady_trend_and_needs_history() {
        let trend: Vec<Candle> = (0..40)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                candle(base + 1.0, base - 1.0, base + 0.5)
            })
            .collect();
        let v = adx(&trend, 14).unwrap();
        assert!(v > 50.0, "adx = {v}");

        assert!(adx(&trend[..28], 14).is_none());
        assert!(adx(&trend[..29], 14).is_some());
    }

    #[test]
    fn atr_of_fixed_range_candles() {
        let candles: Vec<Candle> = (0..20).map(|_| candle(101.0, 99.0, 100.0)).collect();
        assert_eq!(atr(&candles, 14), Some(2.0));
        assert_eq!(atr(&candles[..14], 14), None);
    }
}
