//! Early-Pump Analyzer
//!
//! Detects the ignition stage of a pump on the latest closed bar:
//! - Price acceleration beyond an adaptive, volatility-scaled threshold
//! - Volume explosion vs the trailing average
//! - Taker-buy dominance
//!
//! Optional confirmations (higher-timeframe resonance, spot/futures
//! strength, recent whale buy) add to a weighted score that maps to the
//! A+/A/B+ grade. Each confirmation is additive; none blocks unless
//! explicitly required by configuration.

use tracing::debug;

use crate::analyzers::spot_futures::CorrelationStrength;
use crate::analyzers::{AdaptiveThresholds, CooldownTracker};
use crate::indicators::{atr_percent, mean, sma, volatility_level};
use crate::types::{
    Grade, Signal, SignalDetails, SignalKind, StandardCandle, TradePlan, TradeRecord, TradeSide,
    VolatilityLevel,
};

/// Early-pump detection settings
#[derive(Debug, Clone)]
pub struct EarlyPumpConfig {
    /// Cooldown between signals for the same symbol, seconds
    pub cooldown_secs: i64,
    /// Bar volume must exceed this multiple of the trailing average
    pub volume_factor: f64,
    /// Trailing average length in bars (60 on 1m data, 20 on slower bases)
    pub volume_lookback: usize,
    /// Minimum taker-buy share of bar volume
    pub buy_ratio_threshold: f64,
    /// Volatility-scaled price-change thresholds
    pub adaptive: AdaptiveThresholds,
    /// MA period for the higher-timeframe resonance check
    pub resonance_ma_period: usize,
    /// When set, a failed (or missing) resonance check blocks the signal
    /// instead of just skipping the bonus
    pub require_resonance: bool,
    /// Whale-buy confirmation lookback, milliseconds
    pub whale_lookback_ms: i64,
    /// Stop distance: ATR% x this multiple, clamped below
    pub stop_atr_mult: f64,
    /// Stop distance clamp, percent of entry
    pub stop_min_pct: f64,
    pub stop_max_pct: f64,
}

impl Default for EarlyPumpConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 10 * 60,
            volume_factor: 5.0,
            volume_lookback: 60,
            buy_ratio_threshold: 0.6,
            adaptive: AdaptiveThresholds::default(),
            resonance_ma_period: 20,
            require_resonance: false,
            whale_lookback_ms: 5 * 60 * 1000,
            stop_atr_mult: 1.5,
            stop_min_pct: 1.0,
            stop_max_pct: 3.0,
        }
    }
}

/// Context inputs that feed the confirmation score
#[derive(Debug, Clone, Copy, Default)]
pub struct PumpConfirmations<'a> {
    /// Higher-timeframe (resonance) series, if fetched
    pub resonance: Option<&'a [StandardCandle]>,
    /// Spot/futures correlation strength, if paired data existed
    pub sf_strength: Option<CorrelationStrength>,
    /// Whale trades already filtered by the watcher
    pub whales: &'a [TradeRecord],
}

impl<'a> PumpConfirmations<'a> {
    pub fn none() -> Self {
        Self {
            resonance: None,
            sf_strength: None,
            whales: &[],
        }
    }
}

/// Detects early pump ignition with adaptive thresholds
pub struct EarlyPumpAnalyzer {
    config: EarlyPumpConfig,
    cooldowns: CooldownTracker,
}

impl EarlyPumpAnalyzer {
    pub fn new(config: EarlyPumpConfig) -> Self {
        let cooldowns = CooldownTracker::new(config.cooldown_secs * 1000);
        Self { config, cooldowns }
    }

    /// Evaluate the latest closed bar
    pub fn analyze(
        &mut self,
        candles: &[StandardCandle],
        symbol: &str,
        now_ms: i64,
        confirmations: PumpConfirmations<'_>,
    ) -> Option<Signal> {
        if candles.len() < self.config.volume_lookback + 2 {
            return None;
        }
        if !self.cooldowns.ready(symbol, now_ms) {
            return None;
        }

        let current = candles.last()?;
        if current.open <= 0.0 {
            return None;
        }
        let pct_change = (current.close - current.open) / current.open * 100.0;

        // Adaptive threshold: ATR% -> volatility level -> configured tier.
        let (threshold, level, atr_pct) = self.adaptive_threshold(candles);
        if pct_change < threshold {
            return None;
        }

        // Volume explosion vs trailing average (excluding the current bar).
        let len = candles.len();
        let history = &candles[len - 1 - self.config.volume_lookback..len - 1];
        let volumes: Vec<f64> = history.iter().map(|c| c.volume).collect();
        let avg_vol = mean(&volumes).filter(|v| *v > 0.0).unwrap_or(1.0);
        let vol_ratio = current.volume / avg_vol;
        if vol_ratio < self.config.volume_factor {
            return None;
        }

        // Taker-buy dominance. An unknown split cannot confirm dominance,
        // so it yields no signal rather than a fabricated ratio.
        let taker_buy = current.taker_buy_volume?;
        if current.volume <= 0.0 {
            return None;
        }
        let buy_ratio = taker_buy / current.volume;
        if buy_ratio < self.config.buy_ratio_threshold {
            return None;
        }

        // Resonance: price above the slow-timeframe MA.
        let resonant = confirmations
            .resonance
            .and_then(|res| sma(res, self.config.resonance_ma_period))
            .map(|ma| current.close > ma);
        if self.config.require_resonance && resonant != Some(true) {
            return None;
        }

        let whale_confirmed = confirmations.whales.iter().any(|t| {
            t.side == TradeSide::Buy && now_ms - t.timestamp_ms <= self.config.whale_lookback_ms
        });

        let score = self.score(
            pct_change,
            threshold,
            vol_ratio,
            buy_ratio,
            level,
            resonant == Some(true),
            confirmations.sf_strength,
            whale_confirmed,
        );
        let grade = if score >= 9 {
            Grade::APlus
        } else if score >= 7 {
            Grade::A
        } else {
            Grade::BPlus
        };

        let plan = self.build_plan(current.close, atr_pct, level);

        self.cooldowns.arm(symbol, now_ms);
        debug!(
            symbol,
            pct_change, vol_ratio, buy_ratio, score, "early pump triggered"
        );

        Some(Signal::new(
            SignalKind::EarlyPump,
            grade,
            symbol,
            now_ms,
            format!(
                "Pump ignition: {:+.2}% bar, volume {:.1}x, taker buys {:.0}% [{}]",
                pct_change,
                vol_ratio,
                buy_ratio * 100.0,
                level
            ),
            SignalDetails::EarlyPump {
                pct_change,
                vol_ratio,
                buy_ratio,
                score,
                volatility: level,
                plan,
            },
        ))
    }

    fn adaptive_threshold(&self, candles: &[StandardCandle]) -> (f64, VolatilityLevel, Option<f64>) {
        let adaptive = &self.config.adaptive;
        if !adaptive.enabled {
            return (adaptive.threshold_normal_vol, VolatilityLevel::Normal, None);
        }
        let atr_pct = atr_percent(candles, adaptive.atr_period);
        let level = volatility_level(
            atr_pct,
            adaptive.volatility_low_pct,
            adaptive.volatility_high_pct,
        );
        (adaptive.threshold_for(level), level, atr_pct)
    }

    /// Weighted score. Every component is monotone in its input so a
    /// stronger bar can never grade lower.
    #[allow(clippy::too_many_arguments)]
    fn score(
        &self,
        pct_change: f64,
        threshold: f64,
        vol_ratio: f64,
        buy_ratio: f64,
        level: VolatilityLevel,
        resonant: bool,
        sf_strength: Option<CorrelationStrength>,
        whale_confirmed: bool,
    ) -> i32 {
        let mut score = 0;

        // Price tier relative to the adaptive threshold: 1-3 points.
        score += if pct_change >= threshold * 2.0 {
            3
        } else if pct_change >= threshold * 1.5 {
            2
        } else {
            1
        };

        // Volume tier: 0-2 points.
        score += if vol_ratio >= 10.0 {
            2
        } else if vol_ratio >= 7.0 {
            1
        } else {
            0
        };

        // Buy-ratio tier: 0-2 points.
        score += if buy_ratio >= 0.75 {
            2
        } else if buy_ratio >= 0.68 {
            1
        } else {
            0
        };

        if resonant {
            score += 2;
        }
        match sf_strength {
            Some(CorrelationStrength::High) => score += 2,
            Some(CorrelationStrength::Medium) => score += 1,
            _ => {}
        }
        if whale_confirmed {
            score += 2;
        }
        if level == VolatilityLevel::High {
            score -= 1;
        }
        score
    }

    fn build_plan(&self, entry: f64, atr_pct: Option<f64>, level: VolatilityLevel) -> TradePlan {
        // Stop distance from ATR, clamped so thin-ATR bars still leave room
        // and wild ones don't blow the risk budget.
        let raw = atr_pct.unwrap_or(self.config.stop_min_pct) / 100.0 * self.config.stop_atr_mult;
        let dist = raw.clamp(
            self.config.stop_min_pct / 100.0,
            self.config.stop_max_pct / 100.0,
        );
        let stop_loss = entry * (1.0 - dist);
        let risk = entry - stop_loss;
        let risk_reward = match level {
            VolatilityLevel::Low => 3.0,
            VolatilityLevel::Normal => 2.5,
            VolatilityLevel::High => 2.0,
        };
        TradePlan {
            entry,
            stop_loss,
            take_profit: entry + risk * risk_reward,
            risk_reward,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Platform, VolumeUnit};

    fn make_candle(
        ts: i64,
        open: f64,
        close: f64,
        range: f64,
        volume: f64,
        buy_share: Option<f64>,
    ) -> StandardCandle {
        StandardCandle {
            timestamp_ms: ts,
            open,
            high: open.max(close) + range / 2.0,
            low: open.min(close) - range / 2.0,
            close,
            volume,
            taker_buy_volume: buy_share.map(|s| volume * s),
            taker_sell_volume: buy_share.map(|s| volume * (1.0 - s)),
            quote_volume: None,
            volume_unit: VolumeUnit::Base,
            taker_split_approximate: false,
            source: Platform::Binance,
        }
    }

    /// History with the given bar range (drives ATR%) plus one hot bar.
    fn pump_series(range: f64, last_change_pct: f64, buy_share: f64) -> Vec<StandardCandle> {
        let mut candles = Vec::new();
        for i in 0..62 {
            candles.push(make_candle(i * 60_000, 100.0, 100.0, range, 10.0, Some(0.5)));
        }
        let close = 100.0 * (1.0 + last_change_pct / 100.0);
        candles.push(make_candle(
            62 * 60_000,
            100.0,
            close,
            range,
            80.0,
            Some(buy_share),
        ));
        candles
    }

    #[test]
    fn test_low_volatility_pump_fires() {
        // Range 0.5 -> ATR% ~0.5 -> LOW -> threshold 1.5%. A +2% bar with
        // 8x volume and 72% buys triggers.
        let candles = pump_series(0.5, 2.0, 0.72);
        let mut analyzer = EarlyPumpAnalyzer::new(EarlyPumpConfig::default());
        let signal = analyzer
            .analyze(&candles, "ETH/USDT", 0, PumpConfirmations::none())
            .unwrap();
        assert_eq!(signal.kind, SignalKind::EarlyPump);
    }

    #[test]
    fn test_high_volatility_raises_threshold() {
        // Range 10 -> ATR% ~10 -> HIGH -> threshold 3.0%. The same +2% bar
        // must NOT trigger even though it clears the LOW threshold.
        let candles = pump_series(10.0, 2.0, 0.72);
        let mut analyzer = EarlyPumpAnalyzer::new(EarlyPumpConfig::default());
        assert!(analyzer
            .analyze(&candles, "ETH/USDT", 0, PumpConfirmations::none())
            .is_none());
    }

    #[test]
    fn test_unknown_taker_split_yields_no_signal() {
        let mut candles = pump_series(0.5, 2.0, 0.72);
        let last = candles.last_mut().unwrap();
        last.taker_buy_volume = None;
        last.taker_sell_volume = None;

        let mut analyzer = EarlyPumpAnalyzer::new(EarlyPumpConfig::default());
        assert!(analyzer
            .analyze(&candles, "ETH/USDT", 0, PumpConfirmations::none())
            .is_none());
    }

    #[test]
    fn test_weak_buy_ratio_rejected() {
        let candles = pump_series(0.5, 2.0, 0.55);
        let mut analyzer = EarlyPumpAnalyzer::new(EarlyPumpConfig::default());
        assert!(analyzer
            .analyze(&candles, "ETH/USDT", 0, PumpConfirmations::none())
            .is_none());
    }

    #[test]
    fn test_grade_monotone_in_buy_ratio() {
        let score_for = |buy_ratio: f64| {
            let mut analyzer = EarlyPumpAnalyzer::new(EarlyPumpConfig::default());
            let candles = pump_series(0.5, 2.0, buy_ratio);
            let signal = analyzer
                .analyze(&candles, "ETH/USDT", 0, PumpConfirmations::none())
                .unwrap();
            match signal.details {
                SignalDetails::EarlyPump { score, .. } => score,
                _ => panic!("wrong detail variant"),
            }
        };
        assert!(score_for(0.62) <= score_for(0.70));
        assert!(score_for(0.70) <= score_for(0.80));
    }

    #[test]
    fn test_whale_and_sf_confirmations_add_score() {
        let candles = pump_series(0.5, 2.0, 0.72);
        let base = {
            let mut analyzer = EarlyPumpAnalyzer::new(EarlyPumpConfig::default());
            let s = analyzer
                .analyze(&candles, "ETH/USDT", 0, PumpConfirmations::none())
                .unwrap();
            match s.details {
                SignalDetails::EarlyPump { score, .. } => score,
                _ => unreachable!(),
            }
        };

        let whale = TradeRecord {
            timestamp_ms: 0,
            side: TradeSide::Buy,
            amount: 10.0,
            price: 100.0,
            cost: 500_000.0,
            symbol: "ETH/USDT".to_string(),
        };
        let whales = vec![whale];
        let confirmed = {
            let mut analyzer = EarlyPumpAnalyzer::new(EarlyPumpConfig::default());
            let s = analyzer
                .analyze(
                    &candles,
                    "ETH/USDT",
                    0,
                    PumpConfirmations {
                        resonance: None,
                        sf_strength: Some(CorrelationStrength::High),
                        whales: &whales,
                    },
                )
                .unwrap();
            match s.details {
                SignalDetails::EarlyPump { score, .. } => score,
                _ => unreachable!(),
            }
        };
        assert_eq!(confirmed, base + 4);
    }

    #[test]
    fn test_plan_stop_clamped() {
        let candles = pump_series(0.5, 2.0, 0.72);
        let mut analyzer = EarlyPumpAnalyzer::new(EarlyPumpConfig::default());
        let signal = analyzer
            .analyze(&candles, "ETH/USDT", 0, PumpConfirmations::none())
            .unwrap();
        match signal.details {
            SignalDetails::EarlyPump { plan, .. } => {
                let dist = (plan.entry - plan.stop_loss) / plan.entry;
                assert!(dist >= 0.01 - 1e-9 && dist <= 0.03 + 1e-9);
                assert!(plan.take_profit > plan.entry);
            }
            _ => panic!("wrong detail variant"),
        }
    }

    #[test]
    fn test_cooldown() {
        let candles = pump_series(0.5, 2.0, 0.72);
        let mut analyzer = EarlyPumpAnalyzer::new(EarlyPumpConfig::default());
        assert!(analyzer
            .analyze(&candles, "ETH/USDT", 0, PumpConfirmations::none())
            .is_some());
        assert!(analyzer
            .analyze(&candles, "ETH/USDT", 60_000, PumpConfirmations::none())
            .is_none());
    }
}
