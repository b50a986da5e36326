//! Multi-Platform Consensus Aggregator
//!
//! Combines per-platform flow metrics for one symbol into:
//! - a consensus label (strong/leaning/mixed by flow direction counts and
//!   aggregate magnitude)
//! - discrete cross-platform signals: global sync, institutional
//!   accumulation and the single-platform trap warning

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use crate::flow::PlatformMetrics;
use crate::indicators::sma;
use crate::types::{Grade, Platform, Side, Signal, SignalDetails, SignalKind, StandardCandle};

/// Consensus aggregation settings
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Minimum platforms required for any consensus at all
    pub min_platforms: usize,
    /// Flow inside ±this band (USD) counts as neutral
    pub flow_deadband: f64,
    /// Aggregate flow beyond ±this (USD) leans the label
    pub strong_flow_threshold: f64,
    /// Every platform's buy/sell ratio must clear this for a sync signal
    pub sync_ratio_threshold: f64,
    /// Suppress sync signals that fight the higher-timeframe trend
    pub require_htf_alignment: bool,
    /// MA period for the higher-timeframe trend test
    pub htf_ma_period: usize,
    /// The symmetric bearish sync rule, kept independently toggleable
    pub enable_bearish_sync: bool,
    /// Platform whose flow marks institutional accumulation when it leads
    pub institutional_platform: Platform,
    /// Designated platform must exceed this multiple of the peer average
    pub institutional_lead_mult: f64,
    /// ...and this absolute flow floor (USD)
    pub institutional_floor: f64,
    /// Trap detection: primary buying while reference is selling
    pub enable_trap_detection: bool,
    pub trap_primary: Platform,
    pub trap_reference: Platform,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_platforms: 2,
            flow_deadband: 1_000.0,
            strong_flow_threshold: 50_000_000.0,
            sync_ratio_threshold: 1.15,
            require_htf_alignment: true,
            htf_ma_period: 20,
            enable_bearish_sync: false,
            institutional_platform: Platform::Coinbase,
            institutional_lead_mult: 1.5,
            institutional_floor: 1_000_000.0,
            enable_trap_detection: true,
            trap_primary: Platform::Binance,
            trap_reference: Platform::Coinbase,
        }
    }
}

/// Cross-platform agreement summary for one symbol
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConsensusLabel {
    /// Every platform shows net inflow beyond the deadband
    StrongBullish,
    /// Every platform shows net outflow beyond the deadband
    StrongBearish,
    /// Aggregate inflow beyond the strong-flow threshold
    LeanBullish { total_flow: f64 },
    /// Aggregate outflow beyond the strong-flow threshold
    LeanBearish { total_flow: f64 },
    /// No clear direction, or too few platforms
    Mixed,
}

impl ConsensusLabel {
    pub fn is_bullish(&self) -> bool {
        matches!(
            self,
            ConsensusLabel::StrongBullish | ConsensusLabel::LeanBullish { .. }
        )
    }

    pub fn is_bearish(&self) -> bool {
        matches!(
            self,
            ConsensusLabel::StrongBearish | ConsensusLabel::LeanBearish { .. }
        )
    }
}

impl fmt::Display for ConsensusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusLabel::StrongBullish => write!(f, "STRONG BULLISH (all platforms inflow)"),
            ConsensusLabel::StrongBearish => write!(f, "STRONG BEARISH (all platforms outflow)"),
            ConsensusLabel::LeanBullish { total_flow } => {
                write!(f, "LEAN BULLISH (net +${:.1}M)", total_flow / 1_000_000.0)
            }
            ConsensusLabel::LeanBearish { total_flow } => {
                write!(f, "LEAN BEARISH (net -${:.1}M)", total_flow.abs() / 1_000_000.0)
            }
            ConsensusLabel::Mixed => write!(f, "MIXED (no clear direction)"),
        }
    }
}

/// Aggregates per-platform metrics into consensus and signals
#[derive(Debug, Clone)]
pub struct ConsensusAnalyzer {
    config: ConsensusConfig,
}

impl Default for ConsensusAnalyzer {
    fn default() -> Self {
        Self::new(ConsensusConfig::default())
    }
}

impl ConsensusAnalyzer {
    pub fn new(config: ConsensusConfig) -> Self {
        Self { config }
    }

    /// Human-readable consensus from flow direction counts and magnitude
    pub fn consensus(&self, metrics: &HashMap<Platform, PlatformMetrics>) -> ConsensusLabel {
        if metrics.len() < self.config.min_platforms {
            return ConsensusLabel::Mixed;
        }

        let mut positive = 0usize;
        let mut negative = 0usize;
        let mut total_flow = 0.0;
        for m in metrics.values() {
            total_flow += m.cumulative_net_flow;
            if m.cumulative_net_flow > self.config.flow_deadband {
                positive += 1;
            } else if m.cumulative_net_flow < -self.config.flow_deadband {
                negative += 1;
            }
        }

        if positive == metrics.len() {
            ConsensusLabel::StrongBullish
        } else if negative == metrics.len() {
            ConsensusLabel::StrongBearish
        } else if total_flow > self.config.strong_flow_threshold {
            ConsensusLabel::LeanBullish { total_flow }
        } else if total_flow < -self.config.strong_flow_threshold {
            ConsensusLabel::LeanBearish { total_flow }
        } else {
            ConsensusLabel::Mixed
        }
    }

    /// Discrete cross-platform signals
    ///
    /// `connected_platforms` is how many platforms the cycle attempted:
    /// global sync requires all of them to have delivered metrics.
    pub fn signals(
        &self,
        metrics: &HashMap<Platform, PlatformMetrics>,
        symbol: &str,
        connected_platforms: usize,
        htf: Option<&[StandardCandle]>,
        now_ms: i64,
    ) -> Vec<Signal> {
        let mut signals = Vec::new();
        if metrics.len() < self.config.min_platforms {
            return signals;
        }

        let total_flow: f64 = metrics.values().map(|m| m.cumulative_net_flow).sum();
        let all_present = metrics.len() == connected_platforms;

        // Global Sync Bullish: every connected platform accumulating.
        let all_inflow = metrics.values().all(|m| m.cumulative_net_flow > 0.0);
        let all_strong_buy = metrics
            .values()
            .all(|m| m.buy_sell_ratio > self.config.sync_ratio_threshold);
        if all_present && all_inflow && all_strong_buy && self.htf_allows(Side::Long, htf) {
            debug!(symbol, total_flow, "global sync bullish");
            signals.push(Signal::new(
                SignalKind::GlobalSyncBullish,
                Grade::APlus,
                symbol,
                now_ms,
                "All platforms accumulating with strong taker buying".to_string(),
                SignalDetails::GlobalSync {
                    side: Side::Long,
                    total_flow,
                },
            ));
        }

        // Symmetric bearish rule, off by default but preserved.
        if self.config.enable_bearish_sync {
            let all_outflow = metrics.values().all(|m| m.cumulative_net_flow < 0.0);
            let all_strong_sell = metrics
                .values()
                .all(|m| m.buy_sell_ratio < 1.0 / self.config.sync_ratio_threshold);
            if all_present && all_outflow && all_strong_sell && self.htf_allows(Side::Short, htf) {
                signals.push(Signal::new(
                    SignalKind::GlobalSyncBearish,
                    Grade::APlus,
                    symbol,
                    now_ms,
                    "All platforms distributing with strong taker selling".to_string(),
                    SignalDetails::GlobalSync {
                        side: Side::Short,
                        total_flow,
                    },
                ));
            }
        }

        // Institutional accumulation: the designated platform leads the rest.
        if let Some(lead) = metrics.get(&self.config.institutional_platform) {
            let peers: Vec<f64> = metrics
                .iter()
                .filter(|(p, _)| **p != self.config.institutional_platform)
                .map(|(_, m)| m.cumulative_net_flow)
                .collect();
            if !peers.is_empty() {
                let peer_average = peers.iter().sum::<f64>() / peers.len() as f64;
                if lead.cumulative_net_flow > peer_average * self.config.institutional_lead_mult
                    && lead.cumulative_net_flow > self.config.institutional_floor
                {
                    signals.push(Signal::new(
                        SignalKind::InstitutionalAccumulation,
                        Grade::A,
                        symbol,
                        now_ms,
                        format!(
                            "{} inflow leading the market",
                            self.config.institutional_platform
                        ),
                        SignalDetails::Institutional {
                            platform: self.config.institutional_platform,
                            flow: lead.cumulative_net_flow,
                            peer_average,
                        },
                    ));
                }
            }
        }

        // Single-platform trap: primary buying while the reference sells.
        if self.config.enable_trap_detection {
            let primary = metrics.get(&self.config.trap_primary);
            let reference = metrics.get(&self.config.trap_reference);
            if let (Some(p), Some(r)) = (primary, reference) {
                if p.cumulative_net_flow > self.config.flow_deadband
                    && r.cumulative_net_flow < -self.config.flow_deadband
                {
                    signals.push(Signal::new(
                        SignalKind::SinglePlatformTrap,
                        Grade::C,
                        symbol,
                        now_ms,
                        format!(
                            "{} buying while {} sells - divergence warning",
                            self.config.trap_primary, self.config.trap_reference
                        ),
                        SignalDetails::PlatformTrap {
                            buying: self.config.trap_primary,
                            selling: self.config.trap_reference,
                        },
                    ));
                }
            }
        }

        signals
    }

    /// Higher-timeframe gate for sync signals: never fire a long sync into
    /// a bearish HTF trend (and mirrored for shorts). Missing data allows.
    fn htf_allows(&self, side: Side, htf: Option<&[StandardCandle]>) -> bool {
        if !self.config.require_htf_alignment {
            return true;
        }
        let candles = match htf {
            Some(c) => c,
            None => return true,
        };
        let (last, ma) = match (candles.last(), sma(candles, self.config.htf_ma_period)) {
            (Some(last), Some(ma)) => (last.close, ma),
            _ => return true,
        };
        match side {
            Side::Long => last >= ma,
            Side::Short => last <= ma,
        }
    }
}
