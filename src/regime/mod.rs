//! Market Regime Classifier
//!
//! Classifies the reference asset (e.g. BTC) into bull/bear/neutral from
//! its MA20/MA60 stack. The result is cached with a TTL; a failed data
//! fetch falls back to the last cached value — even a stale one — so a
//! flaky reference feed degrades the cycle instead of blocking it.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::indicators::sma;
use crate::types::StandardCandle;

/// Market regime of the reference asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    /// Price > MA20 > MA60
    Bull,
    /// Price < MA20 < MA60
    Bear,
    /// Ranging above the slow MA
    NeutralBull,
    /// Ranging below the slow MA
    NeutralBear,
    Neutral,
}

impl Default for MarketRegime {
    fn default() -> Self {
        MarketRegime::Neutral
    }
}

impl MarketRegime {
    /// Whether short-side logic is permitted in this regime
    pub fn allows_short(&self) -> bool {
        matches!(self, MarketRegime::Bear | MarketRegime::NeutralBear)
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketRegime::Bull => write!(f, "BULL"),
            MarketRegime::Bear => write!(f, "BEAR"),
            MarketRegime::NeutralBull => write!(f, "NEUTRAL_BULL"),
            MarketRegime::NeutralBear => write!(f, "NEUTRAL_BEAR"),
            MarketRegime::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// TTL-cached regime classifier
#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    ttl_ms: i64,
    fast_ma_period: usize,
    slow_ma_period: usize,
    cache: Option<(i64, MarketRegime)>,
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::new(5 * 60 * 1000)
    }
}

impl RegimeClassifier {
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            ttl_ms,
            fast_ma_period: 20,
            slow_ma_period: 60,
            cache: None,
        }
    }

    /// Classify with caching
    ///
    /// `candles` is `None` when the reference-asset fetch failed this
    /// cycle. A fresh cache short-circuits; a stale cache beats a hard
    /// failure; `Neutral` only when nothing was ever classified.
    pub fn classify(&mut self, now_ms: i64, candles: Option<&[StandardCandle]>) -> MarketRegime {
        if let Some((cached_at, regime)) = self.cache {
            if now_ms - cached_at < self.ttl_ms {
                return regime;
            }
        }

        match candles {
            Some(series) => {
                let regime = self.compute(series);
                self.cache = Some((now_ms, regime));
                debug!(%regime, "market regime refreshed");
                regime
            }
            None => match self.cache {
                Some((_, stale)) => {
                    warn!(%stale, "regime fetch failed, using stale classification");
                    stale
                }
                None => MarketRegime::Neutral,
            },
        }
    }

    /// Pure classification from the reference series
    pub fn compute(&self, candles: &[StandardCandle]) -> MarketRegime {
        if candles.len() < self.slow_ma_period + self.config_margin() {
            return MarketRegime::Neutral;
        }
        let price = match candles.last() {
            Some(c) => c.close,
            None => return MarketRegime::Neutral,
        };
        let (fast, slow) = match (
            sma(candles, self.fast_ma_period),
            sma(candles, self.slow_ma_period),
        ) {
            (Some(f), Some(s)) => (f, s),
            _ => return MarketRegime::Neutral,
        };

        if price > fast && fast > slow {
            MarketRegime::Bull
        } else if price < fast && fast < slow {
            MarketRegime::Bear
        } else if price > slow {
            MarketRegime::NeutralBull
        } else if price < slow {
            MarketRegime::NeutralBear
        } else {
            MarketRegime::Neutral
        }
    }

    // Extra bars beyond the slow MA so the stack is meaningful.
    fn config_margin(&self) -> usize {
        5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Platform, VolumeUnit};

    fn series_from_closes(closes: &[f64]) -> Vec<StandardCandle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, px)| StandardCandle {
                timestamp_ms: i as i64 * 3_600_000,
                open: *px,
                high: *px + 1.0,
                low: *px - 1.0,
                close: *px,
                volume: 10.0,
                taker_buy_volume: None,
                taker_sell_volume: None,
                quote_volume: None,
                volume_unit: VolumeUnit::Base,
                taker_split_approximate: false,
                source: Platform::Binance,
            })
            .collect()
    }

    fn rising(n: usize) -> Vec<StandardCandle> {
        series_from_closes(&(0..n).map(|i| 100.0 + i as f64).collect::<Vec<_>>())
    }

    fn falling(n: usize) -> Vec<StandardCandle> {
        series_from_closes(&(0..n).map(|i| 500.0 - i as f64).collect::<Vec<_>>())
    }

    #[test]
    fn test_bull_and_bear_classification() {
        let classifier = RegimeClassifier::default();
        assert_eq!(classifier.compute(&rising(70)), MarketRegime::Bull);
        assert_eq!(classifier.compute(&falling(70)), MarketRegime::Bear);
    }

    #[test]
    fn test_short_data_is_neutral() {
        let classifier = RegimeClassifier::default();
        assert_eq!(classifier.compute(&rising(30)), MarketRegime::Neutral);
    }

    #[test]
    fn test_cache_hit_short_circuits() {
        let mut classifier = RegimeClassifier::default();
        assert_eq!(classifier.classify(0, Some(&rising(70))), MarketRegime::Bull);
        // Within the TTL the cached value wins even over fresh bear data.
        assert_eq!(
            classifier.classify(60_000, Some(&falling(70))),
            MarketRegime::Bull
        );
        // Past the TTL the new data is classified.
        assert_eq!(
            classifier.classify(600_000, Some(&falling(70))),
            MarketRegime::Bear
        );
    }

    #[test]
    fn test_stale_cache_beats_fetch_failure() {
        let mut classifier = RegimeClassifier::default();
        classifier.classify(0, Some(&rising(70)));
        // Long past the TTL, fetch fails: stale bull beats Neutral.
        assert_eq!(classifier.classify(10_000_000, None), MarketRegime::Bull);
    }

    #[test]
    fn test_no_cache_and_no_data_is_neutral() {
        let mut classifier = RegimeClassifier::default();
        assert_eq!(classifier.classify(0, None), MarketRegime::Neutral);
    }

    #[test]
    fn test_neutral_refinement() {
        let classifier = RegimeClassifier::default();
        // A V-shaped recovery: price back above the slow MA while still
        // below the fast MA, so neither full stack holds.
        let mut closes = vec![90.0; 60];
        closes.extend(vec![110.0; 9]);
        closes.push(96.0);
        let series = series_from_closes(&closes);
        assert_eq!(classifier.compute(&series), MarketRegime::NeutralBull);
    }
}
