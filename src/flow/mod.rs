//! Flow Analyzer - per-platform taker-flow metrics
//!
//! Standardizes connector candles into USD-denominated taker flows and
//! derives the per-platform metrics consumed every cycle:
//! - Cumulative net taker flow over a trailing window
//! - Buy/sell ratio
//! - Current price and rolling support/resistance
//! - ATR (mean true range over the window)
//!
//! Bars without a known taker split are dropped from the sums, never
//! zero-filled.

use serde::{Deserialize, Serialize};

use crate::types::{StandardCandle, VolumeUnit};

/// Default trailing window for flow aggregation
pub const DEFAULT_FLOW_WINDOW: usize = 50;

/// Candle enriched with USD-denominated taker flows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowCandle {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Total volume in the source's unit
    pub volume: f64,
    /// Taker-buy value in USD, `None` when the source had no split
    pub taker_buy_usd: Option<f64>,
    /// Taker-sell value in USD, `None` when the source had no split
    pub taker_sell_usd: Option<f64>,
    /// Buy minus sell, `None` unless both sides are known
    pub net_flow_usd: Option<f64>,
    /// Carried over from the source candle
    pub taker_split_approximate: bool,
}

impl FlowCandle {
    /// True when this bar contributes to flow sums
    pub fn has_flow(&self) -> bool {
        self.net_flow_usd.is_some()
    }
}

/// Convert connector candles into USD flow bars
///
/// Quote-denominated taker volumes pass through unchanged; base-denominated
/// volumes are converted at the bar close, an approximation for sources
/// that provide no per-trade quote value.
pub fn standardize(candles: &[StandardCandle]) -> Vec<FlowCandle> {
    candles
        .iter()
        .map(|c| {
            let to_usd = |vol: Option<f64>| {
                vol.map(|v| match c.volume_unit {
                    VolumeUnit::Quote => v,
                    VolumeUnit::Base => v * c.close,
                })
            };
            let taker_buy_usd = to_usd(c.taker_buy_volume);
            let taker_sell_usd = to_usd(c.taker_sell_volume);
            let net_flow_usd = match (taker_buy_usd, taker_sell_usd) {
                (Some(b), Some(s)) => Some(b - s),
                _ => None,
            };
            FlowCandle {
                timestamp_ms: c.timestamp_ms,
                open: c.open,
                high: c.high,
                low: c.low,
                close: c.close,
                volume: c.volume,
                taker_buy_usd,
                taker_sell_usd,
                net_flow_usd,
                taker_split_approximate: c.taker_split_approximate,
            }
        })
        .collect()
}

/// Per-platform metrics recomputed every evaluation cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformMetrics {
    /// Trailing-window taker buy minus sell, USD
    pub cumulative_net_flow: f64,
    /// Trailing-window taker buy / sell; `f64::INFINITY` when sells are
    /// zero and buys positive, `0.0` when both are zero
    pub buy_sell_ratio: f64,
    pub current_price: f64,
    /// Lowest low in the window
    pub support_low: f64,
    /// Highest high in the window
    pub resistance_high: f64,
    /// Mean true range over the window
    pub atr: f64,
}

/// Per-bar rolling flow for the batch/backtest path
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RollingFlow {
    /// Trailing-window net flow, `None` until the window is fully known
    pub cumulative_net_flow: Option<f64>,
    /// Trailing-window buy/sell ratio, `None` until the window is fully known
    pub buy_sell_ratio: Option<f64>,
}

/// Computes trailing-window flow metrics from a standardized candle series
#[derive(Debug, Clone)]
pub struct FlowAnalyzer {
    window: usize,
}

impl Default for FlowAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_FLOW_WINDOW)
    }
}

impl FlowAnalyzer {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    /// Analyze the latest state of a series
    ///
    /// Returns `None` when the series is empty or no bar in the trailing
    /// window carries a known taker split — callers treat that as "no
    /// opinion", not an error.
    pub fn analyze(&self, series: &[FlowCandle]) -> Option<PlatformMetrics> {
        if series.is_empty() {
            return None;
        }

        let start = series.len().saturating_sub(self.window);
        let valid: Vec<&FlowCandle> = series[start..].iter().filter(|c| c.has_flow()).collect();
        if valid.is_empty() {
            return None;
        }

        let total_buy: f64 = valid.iter().filter_map(|c| c.taker_buy_usd).sum();
        let total_sell: f64 = valid.iter().filter_map(|c| c.taker_sell_usd).sum();
        let cumulative_net_flow = total_buy - total_sell;

        let buy_sell_ratio = if total_sell > 0.0 {
            total_buy / total_sell
        } else if total_buy > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let current_price = valid.last().map(|c| c.close)?;
        let support_low = valid.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let resistance_high = valid
            .iter()
            .map(|c| c.high)
            .fold(f64::NEG_INFINITY, f64::max);

        // Mean true range over the retained rows; the first row has no
        // previous close and contributes its plain high-low range.
        let mut tr_sum = 0.0;
        for (i, c) in valid.iter().enumerate() {
            let tr = if i == 0 {
                c.high - c.low
            } else {
                let prev_close = valid[i - 1].close;
                (c.high - c.low)
                    .max((c.high - prev_close).abs())
                    .max((c.low - prev_close).abs())
            };
            tr_sum += tr;
        }
        let atr = tr_sum / valid.len() as f64;

        Some(PlatformMetrics {
            cumulative_net_flow,
            buy_sell_ratio,
            current_price,
            support_low,
            resistance_high,
            atr,
        })
    }

    /// Batch variant for the backtester: rolling trailing-window flow at
    /// every bar
    ///
    /// A bar's value is `None` until `window` consecutive bars with a known
    /// taker split precede it (inclusive).
    pub fn analyze_series(&self, series: &[FlowCandle]) -> Vec<RollingFlow> {
        let mut out = vec![RollingFlow::default(); series.len()];
        if series.len() < self.window {
            return out;
        }

        for i in (self.window - 1)..series.len() {
            let window = &series[i + 1 - self.window..=i];
            if !window.iter().all(|c| c.has_flow()) {
                continue;
            }
            let buy: f64 = window.iter().filter_map(|c| c.taker_buy_usd).sum();
            let sell: f64 = window.iter().filter_map(|c| c.taker_sell_usd).sum();
            let ratio = if sell > 0.0 {
                buy / sell
            } else if buy > 0.0 {
                f64::INFINITY
            } else {
                0.0
            };
            out[i] = RollingFlow {
                cumulative_net_flow: Some(buy - sell),
                buy_sell_ratio: Some(ratio),
            };
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Platform;

    fn make_candle(ts: i64, buy: Option<f64>, sell: Option<f64>) -> StandardCandle {
        StandardCandle {
            timestamp_ms: ts,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.0,
            volume: 1000.0,
            taker_buy_volume: buy,
            taker_sell_volume: sell,
            quote_volume: None,
            volume_unit: VolumeUnit::Quote,
            taker_split_approximate: false,
            source: Platform::Binance,
        }
    }

    #[test]
    fn test_net_flow_identity() {
        // 100 bars, flat 600 buy / 400 sell, window 50:
        // net flow = 50 * (600 - 400) = 10_000, ratio = 1.5
        let candles: Vec<StandardCandle> = (0..100)
            .map(|i| make_candle(i * 60_000, Some(600.0), Some(400.0)))
            .collect();
        let series = standardize(&candles);
        let metrics = FlowAnalyzer::new(50).analyze(&series).unwrap();

        assert!((metrics.cumulative_net_flow - 10_000.0).abs() < 1e-9);
        assert!((metrics.buy_sell_ratio - 1.5).abs() < 1e-9);
        assert_eq!(metrics.current_price, 100.0);
        assert_eq!(metrics.support_low, 99.0);
        assert_eq!(metrics.resistance_high, 101.0);
    }

    #[test]
    fn test_unknown_split_dropped_not_zeroed() {
        // 10 known bars plus 40 unknown bars inside the window: only the
        // known bars may contribute.
        let mut candles = Vec::new();
        for i in 0..40 {
            candles.push(make_candle(i * 60_000, None, None));
        }
        for i in 40..50 {
            candles.push(make_candle(i * 60_000, Some(600.0), Some(400.0)));
        }
        let series = standardize(&candles);
        let metrics = FlowAnalyzer::new(50).analyze(&series).unwrap();
        assert!((metrics.cumulative_net_flow - 2_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_and_flowless_series() {
        let analyzer = FlowAnalyzer::default();
        assert!(analyzer.analyze(&[]).is_none());

        let candles: Vec<StandardCandle> =
            (0..60).map(|i| make_candle(i * 60_000, None, None)).collect();
        let series = standardize(&candles);
        assert!(analyzer.analyze(&series).is_none());
    }

    #[test]
    fn test_ratio_sentinels() {
        let candles: Vec<StandardCandle> = (0..50)
            .map(|i| make_candle(i * 60_000, Some(500.0), Some(0.0)))
            .collect();
        let series = standardize(&candles);
        let metrics = FlowAnalyzer::new(50).analyze(&series).unwrap();
        assert!(metrics.buy_sell_ratio.is_infinite());

        let candles: Vec<StandardCandle> = (0..50)
            .map(|i| make_candle(i * 60_000, Some(0.0), Some(0.0)))
            .collect();
        let series = standardize(&candles);
        let metrics = FlowAnalyzer::new(50).analyze(&series).unwrap();
        assert_eq!(metrics.buy_sell_ratio, 0.0);
    }

    #[test]
    fn test_base_volume_converted_at_close() {
        let mut candle = make_candle(0, Some(6.0), Some(4.0));
        candle.volume_unit = VolumeUnit::Base;
        candle.close = 100.0;
        let series = standardize(&[candle]);
        assert_eq!(series[0].taker_buy_usd, Some(600.0));
        assert_eq!(series[0].taker_sell_usd, Some(400.0));
        assert_eq!(series[0].net_flow_usd, Some(200.0));
    }

    #[test]
    fn test_analyze_series_rolling_window() {
        let candles: Vec<StandardCandle> = (0..10)
            .map(|i| make_candle(i * 60_000, Some(600.0), Some(400.0)))
            .collect();
        let series = standardize(&candles);
        let rolling = FlowAnalyzer::new(5).analyze_series(&series);

        assert!(rolling[3].cumulative_net_flow.is_none());
        assert_eq!(rolling[4].cumulative_net_flow, Some(1_000.0));
        assert_eq!(rolling[9].cumulative_net_flow, Some(1_000.0));
        assert!((rolling[9].buy_sell_ratio.unwrap() - 1.5).abs() < 1e-9);
    }
}
