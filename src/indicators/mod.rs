//! Indicator library - stateless functions over candle series
//!
//! Provides the small set of indicators the analyzers share:
//! - ATR (EMA-smoothed true range) and ATR%
//! - Simple moving average
//! - Trend-up test
//! - Volatility-level classifier
//!
//! Every function returns `Option` on insufficient data; none of them
//! panic or allocate per-call state.

use crate::types::{StandardCandle, VolatilityLevel};

/// Mean of a value slice, `None` when empty
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// True range per bar: max(high-low, |high-prev_close|, |low-prev_close|)
///
/// The first bar uses its own close as the previous close, which collapses
/// to high-low.
pub fn true_ranges(candles: &[StandardCandle]) -> Vec<f64> {
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let prev_close = if i == 0 { c.close } else { candles[i - 1].close };
            let tr1 = c.high - c.low;
            let tr2 = (c.high - prev_close).abs();
            let tr3 = (c.low - prev_close).abs();
            tr1.max(tr2).max(tr3)
        })
        .collect()
}

/// Average True Range with EMA smoothing (alpha = 2 / (period + 1))
///
/// Requires at least `period + 1` candles so the smoothing has a full seed
/// window.
pub fn atr(candles: &[StandardCandle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let trs = true_ranges(candles);
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut ema = trs[0];
    for tr in &trs[1..] {
        ema = alpha * tr + (1.0 - alpha) * ema;
    }
    Some(ema)
}

/// ATR as a percentage of the last close, used for volatility grading
pub fn atr_percent(candles: &[StandardCandle], period: usize) -> Option<f64> {
    let atr = atr(candles, period)?;
    let current = candles.last()?.close;
    if current <= 0.0 {
        return None;
    }
    Some(atr / current * 100.0)
}

/// Simple moving average of the close over the trailing `period` bars
pub fn sma(candles: &[StandardCandle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let closes: Vec<f64> = candles[candles.len() - period..]
        .iter()
        .map(|c| c.close)
        .collect();
    mean(&closes)
}

/// Uptrend test: last close above the mean of the preceding `lookback` closes
pub fn is_trend_up(candles: &[StandardCandle], lookback: usize) -> bool {
    if lookback == 0 || candles.len() < lookback + 1 {
        return false;
    }
    let current = candles[candles.len() - 1].close;
    let window = &candles[candles.len() - 1 - lookback..candles.len() - 1];
    let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
    match mean(&closes) {
        Some(avg) => current > avg,
        None => false,
    }
}

/// Classify ATR% into a volatility level
///
/// Unknown ATR% grades as NORMAL so adaptive thresholds fall back to their
/// middle setting instead of blocking.
pub fn volatility_level(
    atr_pct: Option<f64>,
    low_threshold: f64,
    high_threshold: f64,
) -> VolatilityLevel {
    match atr_pct {
        None => VolatilityLevel::Normal,
        Some(pct) if pct < low_threshold => VolatilityLevel::Low,
        Some(pct) if pct >= high_threshold => VolatilityLevel::High,
        Some(_) => VolatilityLevel::Normal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Platform, VolumeUnit};

    fn make_candle(ts: i64, open: f64, high: f64, low: f64, close: f64) -> StandardCandle {
        StandardCandle {
            timestamp_ms: ts,
            open,
            high,
            low,
            close,
            volume: 100.0,
            taker_buy_volume: None,
            taker_sell_volume: None,
            quote_volume: None,
            volume_unit: VolumeUnit::Base,
            taker_split_approximate: false,
            source: Platform::Binance,
        }
    }

    fn flat_series(n: usize, price: f64, range: f64) -> Vec<StandardCandle> {
        (0..n)
            .map(|i| {
                make_candle(
                    i as i64 * 60_000,
                    price,
                    price + range / 2.0,
                    price - range / 2.0,
                    price,
                )
            })
            .collect()
    }

    #[test]
    fn test_atr_constant_range() {
        // Every bar has the same high-low range and no gaps, so the
        // smoothed ATR equals that range exactly.
        let candles = flat_series(30, 100.0, 2.0);
        let atr = atr(&candles, 14).unwrap();
        assert!((atr - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_insufficient_data() {
        let candles = flat_series(10, 100.0, 2.0);
        assert!(atr(&candles, 14).is_none());
    }

    #[test]
    fn test_atr_percent() {
        let candles = flat_series(30, 200.0, 2.0);
        let pct = atr_percent(&candles, 14).unwrap();
        assert!((pct - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_sma() {
        let mut candles = Vec::new();
        for i in 0..10 {
            let px = 100.0 + i as f64;
            candles.push(make_candle(i * 60_000, px, px, px, px));
        }
        // Last 5 closes: 105..109
        let ma = sma(&candles, 5).unwrap();
        assert!((ma - 107.0).abs() < 1e-9);
        assert!(sma(&candles, 11).is_none());
    }

    #[test]
    fn test_trend_up() {
        let mut rising = Vec::new();
        for i in 0..10 {
            let px = 100.0 + i as f64;
            rising.push(make_candle(i * 60_000, px, px, px, px));
        }
        assert!(is_trend_up(&rising, 3));

        let mut falling = Vec::new();
        for i in 0..10 {
            let px = 100.0 - i as f64;
            falling.push(make_candle(i * 60_000, px, px, px, px));
        }
        assert!(!is_trend_up(&falling, 3));
    }

    #[test]
    fn test_volatility_level() {
        assert_eq!(volatility_level(None, 3.0, 8.0), VolatilityLevel::Normal);
        assert_eq!(volatility_level(Some(1.0), 3.0, 8.0), VolatilityLevel::Low);
        assert_eq!(
            volatility_level(Some(5.0), 3.0, 8.0),
            VolatilityLevel::Normal
        );
        assert_eq!(volatility_level(Some(8.0), 3.0, 8.0), VolatilityLevel::High);
    }
}
