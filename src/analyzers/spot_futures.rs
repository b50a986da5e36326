//! Spot-Futures Correlation Analyzer
//!
//! Compares the latest bar-over-bar change of paired spot and futures
//! series. A futures market leading the spot market signals leveraged
//! inflow; divergence signals hedging. The strength tag is advisory only —
//! it feeds the pump/dump grading and never blocks on its own.

use serde::{Deserialize, Serialize};

use crate::types::StandardCandle;

/// Correlation strength between spot and futures markets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationStrength {
    /// Futures leading the move (leveraged inflow)
    High,
    /// Spot and futures moving together
    Medium,
    /// Weak or diverging (includes the spot-down/futures-up hedge case)
    Low,
}

/// Correlation analysis for one evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotFuturesCorrelation {
    pub spot_change_pct: f64,
    pub futures_change_pct: f64,
    /// Futures change minus spot change
    pub divergence: f64,
    pub strength: CorrelationStrength,
    pub spot_price: f64,
    pub futures_price: f64,
}

/// Stateless spot/futures correlation classifier
#[derive(Debug, Clone)]
pub struct SpotFuturesAnalyzer {
    /// Futures must lead by at least this much (%) to rank HIGH
    divergence_threshold: f64,
    /// Moves within this band (%) count as correlated
    correlation_threshold: f64,
}

impl Default for SpotFuturesAnalyzer {
    fn default() -> Self {
        Self {
            divergence_threshold: 0.5,
            correlation_threshold: 0.3,
        }
    }
}

impl SpotFuturesAnalyzer {
    pub fn new(divergence_threshold: f64, correlation_threshold: f64) -> Self {
        Self {
            divergence_threshold,
            correlation_threshold,
        }
    }

    /// Analyze paired series; `None` when either side lacks two bars.
    /// Absence of paired data disables the bonus, it is not an error.
    pub fn analyze(
        &self,
        spot: &[StandardCandle],
        futures: &[StandardCandle],
    ) -> Option<SpotFuturesCorrelation> {
        if spot.len() < 2 || futures.len() < 2 {
            return None;
        }

        let spot_prev = spot[spot.len() - 2].close;
        let spot_close = spot[spot.len() - 1].close;
        let fut_prev = futures[futures.len() - 2].close;
        let fut_close = futures[futures.len() - 1].close;
        if spot_prev <= 0.0 || fut_prev <= 0.0 {
            return None;
        }

        let spot_change_pct = (spot_close - spot_prev) / spot_prev * 100.0;
        let futures_change_pct = (fut_close - fut_prev) / fut_prev * 100.0;
        let divergence = futures_change_pct - spot_change_pct;
        let strength = self.strength(spot_change_pct, futures_change_pct, divergence);

        Some(SpotFuturesCorrelation {
            spot_change_pct,
            futures_change_pct,
            divergence,
            strength,
            spot_price: spot_close,
            futures_price: fut_close,
        })
    }

    fn strength(&self, spot: f64, futures: f64, divergence: f64) -> CorrelationStrength {
        // Futures leading strongly.
        if divergence >= self.divergence_threshold && futures > 0.0 {
            return CorrelationStrength::High;
        }
        // Moving together in the same upward direction.
        if divergence.abs() <= self.correlation_threshold && spot > 0.0 && futures > 0.0 {
            return CorrelationStrength::Medium;
        }
        // Spot leading a rise is less bullish than futures leading, but
        // still correlated.
        if divergence < -self.divergence_threshold && spot > 0.0 {
            return CorrelationStrength::Medium;
        }
        CorrelationStrength::Low
    }
}
