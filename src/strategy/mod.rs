//! Entry/Exit Strategy Engine
//!
//! Per-symbol state machine turning (consensus, signals, regime, metrics,
//! trend) into an ENTRY/EXIT recommendation with ATR-derived stops. The
//! gates, in order:
//! - consensus-streak counter (damps single-cycle noise)
//! - minimum inter-action interval per symbol
//! - mid-band position gate (don't chase into the wrong half of the range)
//! - regime gate for shorts
//!
//! Exits are independent of the entry gates: a support break always exits
//! a long, a resistance break exits a short while consensus is not
//! bullish. The no-action path mutates nothing except the streak counter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::consensus::ConsensusLabel;
use crate::flow::PlatformMetrics;
use crate::regime::MarketRegime;
use crate::types::{
    Action, Grade, Platform, Recommendation, RecommendationReason, Side, Signal,
};

/// Strategy engine settings
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    /// Aggregate flow (USD) required for a flow-driven entry
    pub min_total_flow: f64,
    /// Mean buy/sell ratio required for a flow-driven long
    pub min_ratio: f64,
    /// Minimum seconds between actions for one symbol
    pub min_action_interval_secs: i64,
    /// Stop distance in ATR multiples
    pub atr_sl_mult: f64,
    /// Target distance in ATR multiples
    pub atr_tp_mult: f64,
    /// Added to the TP multiple when the fast-timeframe trend agrees
    pub trend_tp_bonus: f64,
    /// Longs only below / shorts only above the support-resistance midpoint
    pub require_midband: bool,
    /// Consecutive same-direction consensus cycles required before acting
    pub min_consensus_bars: u32,
    /// Master switch for the short side
    pub allow_short: bool,
    /// Shorts additionally require a bear-leaning market regime
    pub short_only_in_bear: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_total_flow: 10_000_000.0,
            min_ratio: 1.1,
            min_action_interval_secs: 900,
            atr_sl_mult: 1.5,
            atr_tp_mult: 2.0,
            trend_tp_bonus: 1.0,
            require_midband: true,
            min_consensus_bars: 2,
            allow_short: true,
            short_only_in_bear: true,
        }
    }
}

/// Direction a consensus streak is counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreakDirection {
    Bullish,
    Bearish,
    Neutral,
}

/// Consecutive same-direction consensus cycles for one symbol
///
/// Resets to neutral/0 the instant the direction changes or consensus
/// disappears.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConsensusStreak {
    pub direction: StreakDirection,
    pub count: u32,
}

impl Default for ConsensusStreak {
    fn default() -> Self {
        Self {
            direction: StreakDirection::Neutral,
            count: 0,
        }
    }
}

/// Cross-platform aggregates the strategy decides on
#[derive(Debug, Clone, Copy)]
struct Aggregates {
    total_flow: f64,
    avg_ratio: f64,
    price: f64,
    support: f64,
    resistance: f64,
    atr: f64,
}

/// Per-symbol entry/exit state machine
pub struct EntryExitStrategy {
    config: StrategyConfig,
    /// Last action timestamp per symbol (ms)
    last_action: HashMap<String, i64>,
    /// Consensus streak per symbol
    streaks: HashMap<String, ConsensusStreak>,
}

impl EntryExitStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            last_action: HashMap::new(),
            streaks: HashMap::new(),
        }
    }

    /// Current streak for a symbol (diagnostics)
    pub fn streak(&self, symbol: &str) -> ConsensusStreak {
        self.streaks.get(symbol).copied().unwrap_or_default()
    }

    /// Evaluate one cycle for a symbol
    ///
    /// `fast_trend_up` is the fast-timeframe trend test, `None` when the
    /// series was unavailable.
    pub fn evaluate(
        &mut self,
        symbol: &str,
        metrics: &HashMap<Platform, PlatformMetrics>,
        consensus: &ConsensusLabel,
        signals: &[Signal],
        regime: MarketRegime,
        fast_trend_up: Option<bool>,
        now_ms: i64,
    ) -> Option<Recommendation> {
        // Streak bookkeeping happens every cycle, rejected or not — it is
        // counting cycles, and it is the only mutation the no-action path
        // is allowed.
        let streak = self.update_streak(symbol, consensus);

        // Rate limit: one action per symbol per interval.
        if let Some(last) = self.last_action.get(symbol) {
            if now_ms - last < self.config.min_action_interval_secs * 1000 {
                return None;
            }
        }

        let agg = Self::aggregate(metrics)?;
        if agg.price <= 0.0 {
            return None;
        }

        let has_strong_signal = signals.iter().any(|s| s.grade >= Grade::A);
        let bullish = consensus.is_bullish();
        let bearish = consensus.is_bearish();
        let streak_met = streak.count >= self.config.min_consensus_bars;

        // Entry: long side.
        if bullish
            && streak_met
            && (has_strong_signal
                || (agg.total_flow >= self.config.min_total_flow
                    && agg.avg_ratio >= self.config.min_ratio))
            && self.midband_ok(Side::Long, &agg)
        {
            let (stop_loss, take_profit) = self.stops(Side::Long, &agg, fast_trend_up);
            info!(symbol, price = agg.price, "long entry recommended");
            self.last_action.insert(symbol.to_string(), now_ms);
            return Some(Recommendation {
                action: Action::Entry,
                side: Side::Long,
                price: agg.price,
                stop_loss,
                take_profit,
                reason: RecommendationReason::BullishConsensus,
                symbol: symbol.to_string(),
            });
        }

        // Entry: short side, regime-gated.
        let short_allowed = self.config.allow_short
            && (!self.config.short_only_in_bear || regime.allows_short());
        if bearish
            && short_allowed
            && streak_met
            && agg.total_flow <= -self.config.min_total_flow
            && self.midband_ok(Side::Short, &agg)
        {
            let (stop_loss, take_profit) = self.stops(Side::Short, &agg, fast_trend_up);
            info!(symbol, price = agg.price, "short entry recommended");
            self.last_action.insert(symbol.to_string(), now_ms);
            return Some(Recommendation {
                action: Action::Entry,
                side: Side::Short,
                price: agg.price,
                stop_loss,
                take_profit,
                reason: RecommendationReason::BearishConsensus,
                symbol: symbol.to_string(),
            });
        }

        // Exits bypass the entry gates entirely.
        if agg.support > 0.0 && agg.price < agg.support {
            debug!(symbol, price = agg.price, support = agg.support, "support broken");
            self.last_action.insert(symbol.to_string(), now_ms);
            return Some(Recommendation {
                action: Action::Exit,
                side: Side::Long,
                price: agg.price,
                stop_loss: None,
                take_profit: None,
                reason: RecommendationReason::BreakSupport,
                symbol: symbol.to_string(),
            });
        }
        if agg.resistance > 0.0 && agg.price > agg.resistance && !bullish {
            debug!(symbol, price = agg.price, resistance = agg.resistance, "resistance broken");
            self.last_action.insert(symbol.to_string(), now_ms);
            return Some(Recommendation {
                action: Action::Exit,
                side: Side::Short,
                price: agg.price,
                stop_loss: None,
                take_profit: None,
                reason: RecommendationReason::BreakResistance,
                symbol: symbol.to_string(),
            });
        }

        None
    }

    fn update_streak(&mut self, symbol: &str, consensus: &ConsensusLabel) -> ConsensusStreak {
        let direction = if consensus.is_bullish() {
            StreakDirection::Bullish
        } else if consensus.is_bearish() {
            StreakDirection::Bearish
        } else {
            StreakDirection::Neutral
        };

        let entry = self
            .streaks
            .entry(symbol.to_string())
            .or_insert_with(ConsensusStreak::default);
        if direction == StreakDirection::Neutral {
            *entry = ConsensusStreak::default();
        } else if entry.direction == direction {
            entry.count += 1;
        } else {
            *entry = ConsensusStreak {
                direction,
                count: 1,
            };
        }
        *entry
    }

    /// Median-based aggregation across platforms; the flow is summed, the
    /// ratio averaged.
    fn aggregate(metrics: &HashMap<Platform, PlatformMetrics>) -> Option<Aggregates> {
        if metrics.is_empty() {
            return None;
        }
        let total_flow = metrics.values().map(|m| m.cumulative_net_flow).sum();
        let ratios: Vec<f64> = metrics.values().map(|m| m.buy_sell_ratio).collect();
        let avg_ratio = ratios.iter().sum::<f64>() / ratios.len() as f64;

        let median = |mut values: Vec<f64>| -> f64 {
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let mid = values.len() / 2;
            if values.len() % 2 == 0 {
                (values[mid - 1] + values[mid]) / 2.0
            } else {
                values[mid]
            }
        };

        Some(Aggregates {
            total_flow,
            avg_ratio,
            price: median(metrics.values().map(|m| m.current_price).collect()),
            support: median(metrics.values().map(|m| m.support_low).collect()),
            resistance: median(metrics.values().map(|m| m.resistance_high).collect()),
            atr: median(metrics.values().map(|m| m.atr).collect()),
        })
    }

    /// Mid-band gate: longs below the midpoint, shorts above. Skipped when
    /// the range is unknown.
    fn midband_ok(&self, side: Side, agg: &Aggregates) -> bool {
        if !self.config.require_midband {
            return true;
        }
        if agg.support <= 0.0 || agg.resistance <= 0.0 || agg.resistance <= agg.support {
            return true;
        }
        let midpoint = (agg.support + agg.resistance) / 2.0;
        match side {
            Side::Long => agg.price <= midpoint,
            Side::Short => agg.price >= midpoint,
        }
    }

    /// ATR-derived stops with support/resistance fallback
    fn stops(
        &self,
        side: Side,
        agg: &Aggregates,
        fast_trend_up: Option<bool>,
    ) -> (Option<f64>, Option<f64>) {
        let trend_agrees = match side {
            Side::Long => fast_trend_up == Some(true),
            Side::Short => fast_trend_up == Some(false),
        };
        let tp_mult = self.config.atr_tp_mult
            + if trend_agrees {
                self.config.trend_tp_bonus
            } else {
                0.0
            };

        if agg.atr > 0.0 {
            return match side {
                Side::Long => (
                    Some(agg.price - agg.atr * self.config.atr_sl_mult),
                    Some(agg.price + agg.atr * tp_mult),
                ),
                Side::Short => (
                    Some(agg.price + agg.atr * self.config.atr_sl_mult),
                    Some(agg.price - agg.atr * tp_mult),
                ),
            };
        }

        match side {
            Side::Long => (
                (agg.support > 0.0).then(|| agg.support * 0.99),
                (agg.resistance > 0.0).then_some(agg.resistance),
            ),
            Side::Short => (
                (agg.resistance > 0.0).then(|| agg.resistance * 1.01),
                (agg.support > 0.0).then_some(agg.support),
            ),
        }
    }
}
