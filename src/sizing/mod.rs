//! Position Sizing - risk-based size with volatility scaling and caps
//!
//! Sizes a position from the account balance and a per-trade risk
//! fraction, scales it by the volatility regime, clamps the notional to a
//! hard cap (shrinking proportionally, never to zero) and rejects outright
//! when the open-position limit is reached.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::types::{Side, VolatilityLevel};

/// Sizing configuration
#[derive(Debug, Clone)]
pub struct SizingConfig {
    /// Account balance in USD
    pub account_balance: f64,
    /// Fraction of the balance risked per trade
    pub risk_fraction: f64,
    /// Maximum simultaneous open positions
    pub max_positions: usize,
    /// Hard cap on a single position's notional value (USD)
    pub max_notional: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            account_balance: 10_000.0,
            risk_fraction: 0.02,
            max_positions: 5,
            max_notional: 2_000.0,
        }
    }
}

/// Typed sizing rejections — explicit refusals, not silent zero sizes
#[derive(Debug, Error, PartialEq)]
pub enum SizingError {
    #[error("stop distance is zero or negative")]
    InvalidStopDistance,
    #[error("maximum open positions reached ({max})")]
    MaxPositionsReached { max: usize },
}

/// Computed position size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSize {
    pub symbol: String,
    /// Size in base units (coins)
    pub size: f64,
    /// Notional value in USD
    pub notional: f64,
    /// Actual risk at the stop, USD
    pub risk_amount: f64,
    /// Notional as a percentage of the account
    pub pct_of_account: f64,
    /// Reward/risk multiple when a target was provided
    pub risk_reward: Option<f64>,
    pub volatility_level: VolatilityLevel,
    pub volatility_multiplier: f64,
}

/// An open position tracked for exposure and count limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub notional: f64,
    pub risk_amount: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: Option<f64>,
    pub opened_at_ms: i64,
}

/// Risk-based position sizer with open-position bookkeeping
pub struct PositionSizer {
    config: SizingConfig,
    positions: HashMap<String, OpenPosition>,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self {
            config,
            positions: HashMap::new(),
        }
    }

    /// Refresh the balance after fills or settlement
    pub fn update_balance(&mut self, balance: f64) {
        self.config.account_balance = balance;
    }

    pub fn balance(&self) -> f64 {
        self.config.account_balance
    }

    /// Compute a position size for an entry
    pub fn compute(
        &self,
        symbol: &str,
        entry_price: f64,
        stop_loss: f64,
        volatility: VolatilityLevel,
        take_profit: Option<f64>,
    ) -> Result<PositionSize, SizingError> {
        // A full book rejects new symbols; an existing position may be
        // re-sized.
        if self.positions.len() >= self.config.max_positions
            && !self.positions.contains_key(symbol)
        {
            return Err(SizingError::MaxPositionsReached {
                max: self.config.max_positions,
            });
        }

        let risk_per_unit = (entry_price - stop_loss).abs();
        if risk_per_unit <= 0.0 {
            return Err(SizingError::InvalidStopDistance);
        }

        let risk_amount = self.config.account_balance * self.config.risk_fraction;
        let base_size = risk_amount / risk_per_unit;

        let volatility_multiplier = volatility.size_multiplier();
        let mut size = base_size * volatility_multiplier;
        let mut notional = size * entry_price;

        // Notional cap shrinks the size proportionally.
        if notional > self.config.max_notional {
            size = self.config.max_notional / entry_price;
            notional = self.config.max_notional;
            debug!(symbol, notional, "position capped by max notional");
        }

        let actual_risk = size * risk_per_unit;
        let pct_of_account = notional / self.config.account_balance * 100.0;
        let risk_reward = take_profit.map(|tp| (tp - entry_price).abs() / risk_per_unit);

        Ok(PositionSize {
            symbol: symbol.to_string(),
            size,
            notional,
            risk_amount: actual_risk,
            pct_of_account,
            risk_reward,
            volatility_level: volatility,
            volatility_multiplier,
        })
    }

    /// Record an opened position
    pub fn open_position(&mut self, position: OpenPosition) {
        self.positions.insert(position.symbol.clone(), position);
    }

    /// Remove and return a closed position
    pub fn close_position(&mut self, symbol: &str) -> Option<OpenPosition> {
        self.positions.remove(symbol)
    }

    pub fn get_position(&self, symbol: &str) -> Option<&OpenPosition> {
        self.positions.get(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// Sum of open notionals
    pub fn total_exposure(&self) -> f64 {
        self.positions.values().map(|p| p.notional).sum()
    }

    /// Sum of open risk amounts
    pub fn total_risk(&self) -> f64 {
        self.positions.values().map(|p| p.risk_amount).sum()
    }
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self::new(SizingConfig::default())
    }
}
