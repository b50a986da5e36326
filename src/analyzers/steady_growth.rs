//! Steady-Growth Analyzer
//!
//! Detects sustained, low-volatility uptrends on a slower timeframe:
//! bullish MA alignment held over several bars, a rising MA20 slope and a
//! volume-acceleration check, with a pump filter that rejects any bar
//! moving hard enough to look like a pump-and-dump instead.

use tracing::debug;

use crate::analyzers::CooldownTracker;
use crate::indicators::mean;
use crate::types::{Grade, Signal, SignalDetails, SignalKind, StandardCandle, TradePlan};

/// Steady-growth detection settings
#[derive(Debug, Clone)]
pub struct SteadyGrowthConfig {
    /// Cooldown between signals for the same symbol, seconds
    pub cooldown_secs: i64,
    /// Minimum MA20 slope over the alignment window (fractional)
    pub min_ma_slope: f64,
    /// Bars that must all hold close > MA20 > MA60
    pub alignment_bars: usize,
    /// Pump filter: max single-bar move, percent
    pub max_candle_change_pct: f64,
    /// Fast/slow MA periods
    pub fast_ma_period: usize,
    pub slow_ma_period: usize,
    /// Stop distance below the slow MA, in ATR multiples
    pub stop_atr_mult: f64,
}

impl Default for SteadyGrowthConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 3600,
            min_ma_slope: 0.0005,
            alignment_bars: 5,
            max_candle_change_pct: 3.0,
            fast_ma_period: 20,
            slow_ma_period: 60,
            stop_atr_mult: 2.0,
        }
    }
}

/// Detects steady, MA-aligned growth on the resonance timeframe
pub struct SteadyGrowthAnalyzer {
    config: SteadyGrowthConfig,
    cooldowns: CooldownTracker,
}

impl SteadyGrowthAnalyzer {
    pub fn new(config: SteadyGrowthConfig) -> Self {
        let cooldowns = CooldownTracker::new(config.cooldown_secs * 1000);
        Self { config, cooldowns }
    }

    /// Evaluate a slow-timeframe series
    pub fn analyze(
        &mut self,
        candles: &[StandardCandle],
        symbol: &str,
        now_ms: i64,
    ) -> Option<Signal> {
        // Needs a full slow MA plus the alignment window.
        if candles.len() < self.config.slow_ma_period + self.config.alignment_bars {
            return None;
        }
        if !self.cooldowns.ready(symbol, now_ms) {
            return None;
        }

        let len = candles.len();
        let k = self.config.alignment_bars;
        let recent = &candles[len - k..];

        // Bullish alignment on every bar of the window: close > MA20 > MA60
        // where the MAs are taken at that bar.
        let ma_at = |period: usize, idx: usize| -> Option<f64> {
            if idx + 1 < period {
                return None;
            }
            let closes: Vec<f64> = candles[idx + 1 - period..=idx].iter().map(|c| c.close).collect();
            mean(&closes)
        };
        let mut fast_first = 0.0;
        let mut fast_last = 0.0;
        let mut slow_last = 0.0;
        for (offset, bar) in recent.iter().enumerate() {
            let idx = len - k + offset;
            let fast = ma_at(self.config.fast_ma_period, idx)?;
            let slow = ma_at(self.config.slow_ma_period, idx)?;
            if !(bar.close > fast && fast > slow) {
                return None;
            }
            if offset == 0 {
                fast_first = fast;
            }
            fast_last = fast;
            slow_last = slow;
        }

        // Pump filter: a single violent bar disqualifies the whole window.
        for bar in recent {
            if bar.open <= 0.0 {
                return None;
            }
            let change_pct = ((bar.close - bar.open) / bar.open * 100.0).abs();
            if change_pct > self.config.max_candle_change_pct {
                return None;
            }
        }

        // MA20 slope over the window.
        if fast_first <= 0.0 {
            return None;
        }
        let slope = (fast_last - fast_first) / fast_first;
        if slope < self.config.min_ma_slope {
            return None;
        }

        // Volume acceleration: last 3 bars vs the 10 before them.
        if len < 13 {
            return None;
        }
        let recent_3: Vec<f64> = candles[len - 3..].iter().map(|c| c.volume).collect();
        let past_10: Vec<f64> = candles[len - 13..len - 3].iter().map(|c| c.volume).collect();
        match (mean(&recent_3), mean(&past_10)) {
            (Some(r), Some(p)) if r > p * 1.3 => {}
            _ => return None,
        }

        // ATR over the alignment window (simple mean true range).
        let mut tr_sum = 0.0;
        for (offset, bar) in recent.iter().enumerate() {
            let prev_close = if offset == 0 {
                bar.close
            } else {
                recent[offset - 1].close
            };
            tr_sum += (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs());
        }
        let atr = tr_sum / k as f64;

        let entry = recent.last()?.close;
        let stop_loss = slow_last - atr * self.config.stop_atr_mult;
        let risk = entry - stop_loss;
        if risk <= 0.0 {
            return None;
        }
        // Let stronger trends run further.
        let risk_reward = if slope > 0.002 {
            4.0
        } else if slope > 0.001 {
            3.5
        } else {
            3.0
        };
        let plan = TradePlan {
            entry,
            stop_loss,
            take_profit: entry + risk * risk_reward,
            risk_reward,
        };

        self.cooldowns.arm(symbol, now_ms);
        debug!(symbol, slope, "steady growth confirmed");

        Some(Signal::new(
            SignalKind::SteadyGrowth,
            Grade::A,
            symbol,
            now_ms,
            format!(
                "Steady uptrend confirmed (bullish MA stack, slope {:+.2}%)",
                slope * 100.0
            ),
            SignalDetails::SteadyGrowth { slope, plan },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::types::{Platform, VolumeUnit};

    fn make_candle(ts: i64, open: f64, close: f64, volume: f64) -> StandardCandle {
        StandardCandle {
            timestamp_ms: ts,
            open,
            high: open.max(close) + 0.05,
            low: open.min(close) - 0.05,
            close,
            volume,
            taker_buy_volume: None,
            taker_sell_volume: None,
            quote_volume: None,
            volume_unit: VolumeUnit::Base,
            taker_split_approximate: false,
            source: Platform::Binance,
        }
    }

    /// Gently rising 15m series with volume acceleration at the end.
    fn growth_series(step: f64) -> Vec<StandardCandle> {
        let n = 70;
        (0..n)
            .map(|i| {
                let open = 100.0 + step * i as f64;
                let close = open + step;
                let volume = if i >= n - 3 { 20.0 } else { 10.0 };
                make_candle(i as i64 * 900_000, open, close, volume)
            })
            .collect()
    }

    #[test]
    fn test_steady_growth_fires() {
        let candles = growth_series(0.1);
        let mut analyzer = SteadyGrowthAnalyzer::new(SteadyGrowthConfig::default());
        let signal = analyzer.analyze(&candles, "ETH/USDT", 0).unwrap();

        assert_eq!(signal.grade, Grade::A);
        match signal.details {
            SignalDetails::SteadyGrowth { slope, plan } => {
                assert!(slope > 0.0005);
                assert!(plan.stop_loss < plan.entry);
                assert!(plan.take_profit > plan.entry);
            }
            _ => panic!("wrong detail variant"),
        }
    }

    #[test]
    fn test_single_pump_bar_disqualifies() {
        // One 4% bar inside the alignment window trips the pump filter
        // regardless of MA alignment.
        let mut candles = growth_series(0.1);
        let idx = candles.len() - 2;
        let open = candles[idx].open;
        candles[idx].close = open * 1.04;
        candles[idx].high = open * 1.04 + 0.05;
        // Keep the following bar continuous so alignment still holds.
        candles[idx + 1].open = open * 1.04;
        candles[idx + 1].close = open * 1.04 + 0.1;
        candles[idx + 1].high = open * 1.04 + 0.15;

        let mut analyzer = SteadyGrowthAnalyzer::new(SteadyGrowthConfig::default());
        assert!(analyzer.analyze(&candles, "ETH/USDT", 0).is_none());
    }

    #[test]
    fn test_flat_slope_rejected() {
        // Rising by a hair: alignment may hold but the slope check fails.
        let candles = growth_series(0.001);
        let mut analyzer = SteadyGrowthAnalyzer::new(SteadyGrowthConfig::default());
        assert!(analyzer.analyze(&candles, "ETH/USDT", 0).is_none());
    }

    #[test]
    fn test_no_volume_acceleration_rejected() {
        let mut candles = growth_series(0.1);
        for c in candles.iter_mut() {
            c.volume = 10.0;
        }
        let mut analyzer = SteadyGrowthAnalyzer::new(SteadyGrowthConfig::default());
        assert!(analyzer.analyze(&candles, "ETH/USDT", 0).is_none());
    }

    #[test]
    fn test_cooldown() {
        let candles = growth_series(0.1);
        let mut analyzer = SteadyGrowthAnalyzer::new(SteadyGrowthConfig::default());
        assert!(analyzer.analyze(&candles, "ETH/USDT", 0).is_some());
        assert!(analyzer.analyze(&candles, "ETH/USDT", 900_000).is_none());
        assert!(analyzer.analyze(&candles, "ETH/USDT", 3_600_000).is_some());
    }
}
