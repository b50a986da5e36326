//! Panic-Dump Analyzer
//!
//! Downside mirror of the early-pump detector: a violent red bar with a
//! volume spike and taker-sell dominance, optionally confirmed by a
//! downtrend on the mid timeframe and price below the slow-timeframe MA.

use tracing::debug;

use crate::analyzers::{AdaptiveThresholds, CooldownTracker};
use crate::indicators::{atr_percent, mean, sma, volatility_level};
use crate::types::{
    Grade, Signal, SignalDetails, SignalKind, StandardCandle, VolatilityLevel,
};

/// Panic-dump detection settings
#[derive(Debug, Clone)]
pub struct PanicDumpConfig {
    /// Cooldown between signals for the same symbol, seconds
    pub cooldown_secs: i64,
    /// Bar volume must exceed this multiple of the trailing average
    pub volume_factor: f64,
    /// Trailing average length in bars
    pub volume_lookback: usize,
    /// Minimum taker-sell share of bar volume
    pub sell_ratio_threshold: f64,
    /// Volatility-scaled drop thresholds (shared shape with the pump side)
    pub adaptive: AdaptiveThresholds,
    /// Multi-timeframe confirmation toggle
    pub multi_timeframe: bool,
    /// MA period for the mid-timeframe downtrend check
    pub mid_ma_period: usize,
    /// MA period for the slow-timeframe ceiling check
    pub slow_ma_period: usize,
}

impl Default for PanicDumpConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 10 * 60,
            volume_factor: 5.0,
            volume_lookback: 60,
            sell_ratio_threshold: 0.6,
            adaptive: AdaptiveThresholds::default(),
            multi_timeframe: true,
            mid_ma_period: 20,
            slow_ma_period: 20,
        }
    }
}

/// Detects panic dumps / institutional distribution
pub struct PanicDumpAnalyzer {
    config: PanicDumpConfig,
    cooldowns: CooldownTracker,
}

impl PanicDumpAnalyzer {
    pub fn new(config: PanicDumpConfig) -> Self {
        let cooldowns = CooldownTracker::new(config.cooldown_secs * 1000);
        Self { config, cooldowns }
    }

    /// Evaluate the latest closed bar
    ///
    /// `mid_tf`/`slow_tf` are the confirmation series; missing data passes
    /// the check rather than blocking the cycle.
    pub fn analyze(
        &mut self,
        candles: &[StandardCandle],
        symbol: &str,
        now_ms: i64,
        mid_tf: Option<&[StandardCandle]>,
        slow_tf: Option<&[StandardCandle]>,
    ) -> Option<Signal> {
        if candles.len() < self.config.volume_lookback + 2 {
            return None;
        }
        if !self.cooldowns.ready(symbol, now_ms) {
            return None;
        }

        let current = candles.last()?;
        if current.open <= 0.0 || current.close >= current.open {
            return None;
        }
        let drop_pct = (current.open - current.close) / current.open * 100.0;

        let (threshold, level) = self.adaptive_threshold(candles);
        if drop_pct < threshold {
            return None;
        }

        let len = candles.len();
        let history = &candles[len - 1 - self.config.volume_lookback..len - 1];
        let volumes: Vec<f64> = history.iter().map(|c| c.volume).collect();
        let avg_vol = mean(&volumes).filter(|v| *v > 0.0).unwrap_or(1.0);
        let vol_ratio = current.volume / avg_vol;
        if vol_ratio < self.config.volume_factor {
            return None;
        }

        // Taker-sell dominance. Unknown split yields no signal: assuming
        // 100% sells on missing data would invent panic where none exists.
        let taker_buy = current.taker_buy_volume?;
        if current.volume <= 0.0 {
            return None;
        }
        let sell_ratio = 1.0 - taker_buy / current.volume;
        if sell_ratio < self.config.sell_ratio_threshold {
            return None;
        }

        if !self.confirm_multi_timeframe(current.close, mid_tf, slow_tf) {
            return None;
        }

        self.cooldowns.arm(symbol, now_ms);
        debug!(symbol, drop_pct, vol_ratio, sell_ratio, "panic dump triggered");

        let grade = if drop_pct > 2.0 && vol_ratio > 10.0 {
            Grade::APlus
        } else {
            Grade::A
        };
        Some(Signal::new(
            SignalKind::PanicDump,
            grade,
            symbol,
            now_ms,
            format!(
                "Distribution dump: -{:.2}% bar, volume {:.1}x, taker sells {:.0}% [{}]",
                drop_pct,
                vol_ratio,
                sell_ratio * 100.0,
                level
            ),
            SignalDetails::PanicDump {
                drop_pct,
                vol_ratio,
                sell_ratio,
                volatility: level,
            },
        ))
    }

    fn adaptive_threshold(&self, candles: &[StandardCandle]) -> (f64, VolatilityLevel) {
        let adaptive = &self.config.adaptive;
        if !adaptive.enabled {
            return (adaptive.threshold_normal_vol, VolatilityLevel::Normal);
        }
        let atr_pct = atr_percent(candles, adaptive.atr_period);
        let level = volatility_level(
            atr_pct,
            adaptive.volatility_low_pct,
            adaptive.volatility_high_pct,
        );
        (adaptive.threshold_for(level), level)
    }

    /// Mid-timeframe downtrend plus price below the slow-timeframe MA.
    /// Either series missing counts as confirmed.
    fn confirm_multi_timeframe(
        &self,
        price: f64,
        mid_tf: Option<&[StandardCandle]>,
        slow_tf: Option<&[StandardCandle]>,
    ) -> bool {
        if !self.config.multi_timeframe {
            return true;
        }
        let (mid, slow) = match (mid_tf, slow_tf) {
            (Some(m), Some(s)) => (m, s),
            _ => return true,
        };

        let mid_down = match (mid.last(), sma(mid, self.config.mid_ma_period)) {
            (Some(last), Some(ma)) => last.close < ma,
            _ => true,
        };
        let below_slow_ma = match sma(slow, self.config.slow_ma_period) {
            Some(ma) => price < ma,
            None => true,
        };
        mid_down && below_slow_ma
    }
}
