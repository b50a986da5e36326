//! Pattern analyzers
//!
//! Five stateful, cooldown-gated detectors plus the whale-trade filter:
//! - Volume spike (block volume vs trailing baseline)
//! - Early pump (adaptive threshold + multi-timeframe confirmations)
//! - Panic dump (downside mirror of early pump)
//! - Steady growth (slow-timeframe MA alignment)
//! - Spot/futures correlation (stateless, advisory)
//!
//! Analyzers never raise on thin data: insufficient history, missing taker
//! splits and unmet conditions all return `None`. Every stateful analyzer
//! takes the evaluation timestamp explicitly so the backtester drives the
//! identical code path.

pub mod early_pump;
pub mod panic_dump;
pub mod spot_futures;
pub mod steady_growth;
pub mod volume_spike;
pub mod whale;

pub use early_pump::{EarlyPumpAnalyzer, EarlyPumpConfig};
pub use panic_dump::{PanicDumpAnalyzer, PanicDumpConfig};
pub use spot_futures::{CorrelationStrength, SpotFuturesAnalyzer, SpotFuturesCorrelation};
pub use steady_growth::{SteadyGrowthAnalyzer, SteadyGrowthConfig};
pub use volume_spike::{VolumeSpikeAnalyzer, VolumeSpikeConfig};
pub use whale::WhaleWatcher;

use std::collections::HashMap;

/// Adaptive-threshold settings shared by the pump and dump analyzers
///
/// ATR% of the base series maps through the LOW/NORMAL/HIGH classifier into
/// one of three price-change thresholds.
#[derive(Debug, Clone)]
pub struct AdaptiveThresholds {
    pub enabled: bool,
    pub atr_period: usize,
    /// ATR% below this is LOW volatility
    pub volatility_low_pct: f64,
    /// ATR% at or above this is HIGH volatility
    pub volatility_high_pct: f64,
    /// Price-change threshold (%) per volatility level
    pub threshold_low_vol: f64,
    pub threshold_normal_vol: f64,
    pub threshold_high_vol: f64,
}

impl Default for AdaptiveThresholds {
    fn default() -> Self {
        Self {
            enabled: true,
            atr_period: 14,
            volatility_low_pct: 3.0,
            volatility_high_pct: 8.0,
            threshold_low_vol: 1.5,
            threshold_normal_vol: 2.0,
            threshold_high_vol: 3.0,
        }
    }
}

impl AdaptiveThresholds {
    /// Threshold for a volatility level
    pub fn threshold_for(&self, level: crate::types::VolatilityLevel) -> f64 {
        match level {
            crate::types::VolatilityLevel::Low => self.threshold_low_vol,
            crate::types::VolatilityLevel::Normal => self.threshold_normal_vol,
            crate::types::VolatilityLevel::High => self.threshold_high_vol,
        }
    }
}

/// Keyed cooldown store: per-symbol last-trigger timestamp
///
/// A signal of the same analyzer+symbol cannot re-fire until the cooldown
/// window has elapsed. Entries are created on first trigger and updated on
/// every subsequent one; the map is bounded by the symbol universe. Each
/// analyzer owns its own tracker — this is a single-writer structure by
/// contract, not by lock (the cycle loop never evaluates one symbol
/// concurrently).
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    window_ms: i64,
    last_fire: HashMap<String, i64>,
}

impl CooldownTracker {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            last_fire: HashMap::new(),
        }
    }

    /// True when the symbol may fire at `now_ms`
    pub fn ready(&self, symbol: &str, now_ms: i64) -> bool {
        match self.last_fire.get(symbol) {
            Some(last) => now_ms - last >= self.window_ms,
            None => true,
        }
    }

    /// Record a trigger at `now_ms`
    pub fn arm(&mut self, symbol: &str, now_ms: i64) {
        self.last_fire.insert(symbol.to_string(), now_ms);
    }
}
