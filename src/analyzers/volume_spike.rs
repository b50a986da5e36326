//! Volume Spike Analyzer
//!
//! Compares the most recent 3-bar block volume against the mean block
//! volume of a 60-bar trailing history. On 5-minute candles that is a
//! 15-minute block measured against five hours of baseline.

use tracing::debug;

use crate::analyzers::CooldownTracker;
use crate::indicators::mean;
use crate::types::{Grade, Signal, SignalDetails, SignalKind, StandardCandle};

/// Volume-spike detection settings
#[derive(Debug, Clone)]
pub struct VolumeSpikeConfig {
    /// Block volume must exceed this multiple of the baseline
    pub factor: f64,
    /// Minimum price change over the block, percent
    pub min_price_change_pct: f64,
    /// Cooldown between signals for the same symbol, seconds
    pub cooldown_secs: i64,
    /// Trailing baseline length in bars
    pub history_window: usize,
    /// Block length in bars
    pub spike_window: usize,
}

impl Default for VolumeSpikeConfig {
    fn default() -> Self {
        Self {
            factor: 3.0,
            min_price_change_pct: 0.5,
            cooldown_secs: 30 * 60,
            history_window: 60,
            spike_window: 3,
        }
    }
}

/// Detects volume spikes with price confirmation
pub struct VolumeSpikeAnalyzer {
    config: VolumeSpikeConfig,
    cooldowns: CooldownTracker,
}

impl VolumeSpikeAnalyzer {
    pub fn new(config: VolumeSpikeConfig) -> Self {
        let cooldowns = CooldownTracker::new(config.cooldown_secs * 1000);
        Self { config, cooldowns }
    }

    /// Evaluate the latest bars of a series
    ///
    /// Returns `None` when history is insufficient, the symbol is cooling
    /// down, or any trigger condition fails.
    pub fn analyze(
        &mut self,
        candles: &[StandardCandle],
        symbol: &str,
        now_ms: i64,
    ) -> Option<Signal> {
        let needed = self.config.history_window + self.config.spike_window;
        if candles.len() < needed {
            return None;
        }
        if !self.cooldowns.ready(symbol, now_ms) {
            return None;
        }

        let len = candles.len();
        let block = &candles[len - self.config.spike_window..];
        let block_volume: f64 = block.iter().map(|c| c.volume).sum();

        // Baseline: mean per-bar volume over the preceding history, scaled
        // to block length.
        let history = &candles[len - needed..len - self.config.spike_window];
        let volumes: Vec<f64> = history.iter().map(|c| c.volume).collect();
        let baseline_volume = mean(&volumes)? * self.config.spike_window as f64;
        if baseline_volume <= 0.0 {
            return None;
        }
        let ratio = block_volume / baseline_volume;

        // Price change over the block: last close vs block open.
        let block_open = block.first()?.open;
        let block_close = block.last()?.close;
        let price_change_pct = if block_open > 0.0 {
            (block_close - block_open) / block_open * 100.0
        } else {
            0.0
        };

        // Secondary acceleration check: mean volume of the last 3 bars must
        // exceed 1.3x the mean of the 10 bars before them.
        if len < 13 {
            return None;
        }
        let recent_3: Vec<f64> = candles[len - 3..].iter().map(|c| c.volume).collect();
        let past_10: Vec<f64> = candles[len - 13..len - 3].iter().map(|c| c.volume).collect();
        let accelerating = match (mean(&recent_3), mean(&past_10)) {
            (Some(recent), Some(past)) => recent > past * 1.3,
            _ => false,
        };

        let triggered = ratio >= self.config.factor
            && price_change_pct >= self.config.min_price_change_pct
            && accelerating;
        if !triggered {
            return None;
        }

        self.cooldowns.arm(symbol, now_ms);
        debug!(symbol, ratio, price_change_pct, "volume spike triggered");

        let grade = if ratio > 5.0 { Grade::A } else { Grade::B };
        Some(Signal::new(
            SignalKind::VolumeSpike,
            grade,
            symbol,
            now_ms,
            format!(
                "Block volume surge {:.1}x (price {:+.2}%)",
                ratio, price_change_pct
            ),
            SignalDetails::VolumeSpike {
                ratio,
                price_change_pct,
                block_volume,
                baseline_volume,
                price: block_close,
            },
        ))
    }
}
