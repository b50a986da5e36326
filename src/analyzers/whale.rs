//! Whale Watcher - large-trade filter
//!
//! Filters trade records whose notional value exceeds a threshold. The
//! early-pump analyzer uses a recent whale buy as an additive confirmation.

use crate::types::{TradeRecord, TradeSide};

/// Monitors large transactions
#[derive(Debug, Clone)]
pub struct WhaleWatcher {
    /// Minimum notional (USD) to count as a whale trade
    threshold: f64,
}

impl Default for WhaleWatcher {
    fn default() -> Self {
        Self::new(200_000.0)
    }
}

impl WhaleWatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Trades at or above the notional threshold
    pub fn check_trades<'a>(&self, trades: &'a [TradeRecord]) -> Vec<&'a TradeRecord> {
        trades.iter().filter(|t| t.cost >= self.threshold).collect()
    }

    /// Any whale buy within `lookback_ms` of `now_ms`?
    pub fn recent_buy(&self, trades: &[TradeRecord], now_ms: i64, lookback_ms: i64) -> bool {
        trades.iter().any(|t| {
            t.side == TradeSide::Buy
                && t.cost >= self.threshold
                && now_ms - t.timestamp_ms <= lookback_ms
        })
    }
}
