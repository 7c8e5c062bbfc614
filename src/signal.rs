use crate::config::SignalParams;
use crate::indicators;
use crate::types::{Candle, SignalKind};

/// Indicator values for the latest candle.
#[derive(Clone, Debug, PartialEq)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub rsi: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub macd_hist: f64,
    pub adx: f64,
}

#[derive(Clone, Debug)]
pub struct Evaluation {
    pub kind: SignalKind,
    /// `None` when there were not enough candles to compute every indicator.
    pub snapshot: Option<IndicatorSnapshot>,
}

pub fn snapshot(candles: &[Candle], p: &SignalParams) -> Option<IndicatorSnapshot> {
    if candles.len() < p.min_candles() {
        return None;
    }
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    Some(IndicatorSnapshot {
        close: *closes.last()?,
        rsi: indicators::rsi(&closes, p.rsi_period)?,
        ema_fast: *indicators::ema(&closes, p.ema_fast).last()?,
        ema_slow: *indicators::ema(&closes, p.ema_slow).last()?,
        macd_hist: indicators::macd(&closes, p.macd_fast, p.macd_slow, p.macd_signal)?.histogram,
        adx: indicators::adx(candles, p.adx_period)?,
    })
}

/// Trend-following entry rule:
/// LONG  when ADX > min, EMA fast > slow, MACD hist > 0 and RSI inside the long band.
/// SHORT is the mirror image with its own RSI band.
pub fn classify(s: &IndicatorSnapshot, p: &SignalParams) -> SignalKind {
    if s.adx <= p.adx_min {
        return SignalKind::None;
    }
    if s.ema_fast > s.ema_slow
        && s.macd_hist > 0.0
        && s.rsi > p.rsi_long_min
        && s.rsi < p.rsi_long_max
    {
        return SignalKind::Long;
    }
    if s.ema_fast < s.ema_slow
        && s.macd_hist < 0.0
        && s.rsi > p.rsi_short_min
        && s.rsi < p.rsi_short_max
    {
        return SignalKind::Short;
    }
    SignalKind::None
}

pub fn evaluate(candles: &[Candle], p: &SignalParams) -> Evaluation {
    match snapshot(candles, p) {
        Some(s) => Evaluation { kind: classify(&s, p), snapshot: Some(s) },
        None => Evaluation { kind: SignalKind::None, snapshot: None },
    }
}

/// First condition that keeps the snapshot from firing, for status reports.
/// Uses the trend direction from the EMAs to pick which rule to explain.
pub fn describe_missing(s: &IndicatorSnapshot, p: &SignalParams) -> Option<String> {
    if classify(s, p) != SignalKind::None {
        return None;
    }
    if s.adx <= p.adx_min {
        return Some(format!("ADX {:.1} ≤ {:.0} (no trend)", s.adx, p.adx_min));
    }
    let bullish = s.ema_fast >= s.ema_slow;
    let msg = if bullish {
        if s.macd_hist <= 0.0 {
            format!("EMA↑ but MACD hist {:+.4} ≤ 0", s.macd_hist)
        } else {
            format!(
                "EMA↑ but RSI {:.1} outside {:.0}–{:.0}",
                s.rsi, p.rsi_long_min, p.rsi_long_max
            )
        }
    } else if s.macd_hist >= 0.0 {
        format!("EMA↓ but MACD hist {:+.4} ≥ 0", s.macd_hist)
    } else {
        format!(
            "EMA↓ but RSI {:.1} outside {:.0}–{:.0}",
            s.rsi, p.rsi_short_min, p.rsi_short_max
        )
    };
    Some(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(rsi: f64, ema_fast: f64, ema_slow: f64, macd_hist: f64, adx: f64) -> IndicatorSnapshot {
        IndicatorSnapshot { close: 100.0, rsi, ema_fast, ema_slow, macd_hist, adx }
    }

    #[test]
    fn long_rule() {
        let p = SignalParams::default();
        assert_eq!(classify(&snap(55.0, 101.0, 100.0, 0.2, 35.0), &p), SignalKind::Long);
        // Each failing leg kills the signal.
        assert_eq!(classify(&snap(55.0, 101.0, 100.0, 0.2, 30.0), &p), SignalKind::None);
        assert_eq!(classify(&snap(72.0, 101.0, 100.0, 0.2, 35.0), &p), SignalKind::None);
        assert_eq!(classify(&snap(45.0, 101.0, 100.0, 0.2, 35.0), &p), SignalKind::None);
        assert_eq!(classify(&snap(55.0, 101.0, 100.0, -0.1, 35.0), &p), SignalKind::None);
    }

    #[test]
    fn short_rule() {
        let p = SignalParams::default();
        assert_eq!(classify(&snap(40.0, 99.0, 100.0, -0.2, 35.0), &p), SignalKind::Short);
        assert_eq!(classify(&snap(25.0, 99.0, 100.0, -0.2, 35.0), &p), SignalKind::None);
        assert_eq!(classify(&snap(40.0, 99.0, 100.0, 0.2, 35.0), &p), SignalKind::None);
    }

    #[test]
    fn too_few_candles_is_no_signal() {
        let p = SignalParams::default();
        let candles: Vec<Candle> = (0..10)
            .map(|i| Candle {
                timestamp: i,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 1.0,
            })
            .collect();
        let ev = evaluate(&candles, &p);
        assert_eq!(ev.kind, SignalKind::None);
        assert!(ev.snapshot.is_none());
    }

    #[test]
    fn trending_series_produces_a_snapshot() {
        let p = SignalParams::default();
        let candles: Vec<Candle> = (0..80)
            .map(|i| {
                let c = 100.0 + i as f64;
                Candle { timestamp: i, open: c - 0.5, high: c + 1.0, low: c - 1.0, close: c, volume: 1.0 }
            })
            .collect();
        let s = snapshot(&candles, &p).unwrap();
        assert!(s.ema_fast > s.ema_slow);
        assert!(s.adx > p.adx_min);
        // Straight line up: RSI pinned at 100, above the long band.
        assert_eq!(s.rsi, 100.0);
        assert_eq!(classify(&s, &p), SignalKind::None);
        assert!(describe_missing(&s, &p).is_some());
    }

    #[test]
    fn describe_missing_reports_weak_trend() {
        let p = SignalParams::default();
        let msg = describe_missing(&snap(55.0, 101.0, 100.0, 0.2, 12.0), &p).unwrap();
        assert!(msg.starts_with("ADX"));
        assert!(describe_missing(&snap(55.0, 101.0, 100.0, 0.2, 35.0), &p).is_none());
    }
}
