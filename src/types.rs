//! Core types used throughout FlowPulse
//!
//! Defines common data structures for candles, trades, signals and trade
//! recommendations shared by the analyzers, the strategy engine and the
//! backtester.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported exchange platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Binance,
    Okx,
    Bybit,
    Coinbase,
}

impl Platform {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "binance" => Some(Platform::Binance),
            "okx" => Some(Platform::Okx),
            "bybit" => Some(Platform::Bybit),
            "coinbase" => Some(Platform::Coinbase),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Binance => write!(f, "Binance"),
            Platform::Okx => write!(f, "OKX"),
            Platform::Bybit => write!(f, "Bybit"),
            Platform::Coinbase => write!(f, "Coinbase"),
        }
    }
}

/// Supported candle timeframes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    Min1,
    Min5,
    Min15,
    Hour1,
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::Min5
    }
}

impl Timeframe {
    /// Get duration in seconds
    pub fn duration_secs(&self) -> u64 {
        match self {
            Timeframe::Min1 => 60,
            Timeframe::Min5 => 5 * 60,
            Timeframe::Min15 => 15 * 60,
            Timeframe::Hour1 => 60 * 60,
        }
    }

    /// Get duration in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.duration_secs() as i64 * 1000
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "1m" | "1min" => Some(Timeframe::Min1),
            "5m" | "5min" => Some(Timeframe::Min5),
            "15m" | "15min" => Some(Timeframe::Min15),
            "1h" | "1hour" => Some(Timeframe::Hour1),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::Min1 => write!(f, "1m"),
            Timeframe::Min5 => write!(f, "5m"),
            Timeframe::Min15 => write!(f, "15m"),
            Timeframe::Hour1 => write!(f, "1h"),
        }
    }
}

/// Unit of the volume fields on a candle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeUnit {
    /// Volume denominated in the base asset (coins)
    Base,
    /// Volume denominated in the quote asset (USD/USDT)
    Quote,
}

impl Default for VolumeUnit {
    fn default() -> Self {
        VolumeUnit::Base
    }
}

/// Normalized candle delivered by an exchange connector
///
/// `taker_buy_volume`/`taker_sell_volume` are `None` when the source cannot
/// supply a taker split. Unknown stays unknown: downstream code must not
/// substitute zero, or it manufactures false flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardCandle {
    /// Open time in milliseconds
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Total traded volume in `volume_unit`
    pub volume: f64,
    /// Taker-buy portion of `volume`, if the source provides it
    pub taker_buy_volume: Option<f64>,
    /// Taker-sell portion of `volume`, if the source provides it
    pub taker_sell_volume: Option<f64>,
    /// Total quote-denominated volume, if the source provides it
    pub quote_volume: Option<f64>,
    pub volume_unit: VolumeUnit,
    /// Set when the connector derives the taker split from an aggregate
    /// field (e.g. maps total quote volume onto taker buys) rather than a
    /// real split
    #[serde(default)]
    pub taker_split_approximate: bool,
    /// Platform that produced this candle
    pub source: Platform,
}

/// Trade side from the taker's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Single trade record used for whale/taker analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Trade timestamp in milliseconds
    pub timestamp_ms: i64,
    pub side: TradeSide,
    /// Amount in base asset
    pub amount: f64,
    pub price: f64,
    /// Notional value (amount × price)
    pub cost: f64,
    pub symbol: String,
}

/// Direction of a trade recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Recommendation action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Entry,
    Exit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Entry => write!(f, "ENTRY"),
            Action::Exit => write!(f, "EXIT"),
        }
    }
}

/// Signal quality tier, driving downstream notification routing
///
/// Variants are declared worst-to-best so the derived ordering ranks
/// `APlus` highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    C,
    B,
    BPlus,
    A,
    APlus,
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::C => write!(f, "C"),
            Grade::B => write!(f, "B"),
            Grade::BPlus => write!(f, "B+"),
            Grade::A => write!(f, "A"),
            Grade::APlus => write!(f, "A+"),
        }
    }
}

/// Volatility regime from the ATR% classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityLevel {
    Low,
    Normal,
    High,
}

impl Default for VolatilityLevel {
    fn default() -> Self {
        VolatilityLevel::Normal
    }
}

impl VolatilityLevel {
    /// Position-size multiplier for this regime
    pub fn size_multiplier(&self) -> f64 {
        match self {
            VolatilityLevel::Low => 1.2,
            VolatilityLevel::Normal => 1.0,
            VolatilityLevel::High => 0.5,
        }
    }
}

impl fmt::Display for VolatilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolatilityLevel::Low => write!(f, "LOW"),
            VolatilityLevel::Normal => write!(f, "NORMAL"),
            VolatilityLevel::High => write!(f, "HIGH"),
        }
    }
}

/// Kind of signal, one per analyzer/aggregator rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    VolumeSpike,
    EarlyPump,
    PanicDump,
    SteadyGrowth,
    GlobalSyncBullish,
    GlobalSyncBearish,
    InstitutionalAccumulation,
    SinglePlatformTrap,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::VolumeSpike => write!(f, "VOLUME_SPIKE"),
            SignalKind::EarlyPump => write!(f, "EARLY_PUMP"),
            SignalKind::PanicDump => write!(f, "PANIC_DUMP"),
            SignalKind::SteadyGrowth => write!(f, "STEADY_GROWTH"),
            SignalKind::GlobalSyncBullish => write!(f, "GLOBAL_SYNC_BULLISH"),
            SignalKind::GlobalSyncBearish => write!(f, "GLOBAL_SYNC_BEARISH"),
            SignalKind::InstitutionalAccumulation => write!(f, "INSTITUTIONAL_ACCUMULATION"),
            SignalKind::SinglePlatformTrap => write!(f, "SINGLE_PLATFORM_TRAP"),
        }
    }
}

/// Suggested entry/stop/target attached to a pattern signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TradePlan {
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward: f64,
}

/// Numeric payload of a signal, one variant per producer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SignalDetails {
    VolumeSpike {
        /// Block volume vs trailing baseline
        ratio: f64,
        price_change_pct: f64,
        block_volume: f64,
        baseline_volume: f64,
        price: f64,
    },
    EarlyPump {
        pct_change: f64,
        vol_ratio: f64,
        buy_ratio: f64,
        score: i32,
        volatility: VolatilityLevel,
        plan: TradePlan,
    },
    PanicDump {
        drop_pct: f64,
        vol_ratio: f64,
        sell_ratio: f64,
        volatility: VolatilityLevel,
    },
    SteadyGrowth {
        /// MA20 slope over the alignment window
        slope: f64,
        plan: TradePlan,
    },
    GlobalSync {
        side: Side,
        total_flow: f64,
    },
    Institutional {
        platform: Platform,
        flow: f64,
        peer_average: f64,
    },
    PlatformTrap {
        buying: Platform,
        selling: Platform,
    },
}

/// Graded trading signal produced by exactly one analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Unique signal ID
    pub id: String,
    pub kind: SignalKind,
    pub grade: Grade,
    pub symbol: String,
    /// Evaluation timestamp in milliseconds
    pub timestamp_ms: i64,
    /// Human-readable description for notification collaborators
    pub description: String,
    pub details: SignalDetails,
}

impl Signal {
    pub fn new(
        kind: SignalKind,
        grade: Grade,
        symbol: &str,
        timestamp_ms: i64,
        description: String,
        details: SignalDetails,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            grade,
            symbol: symbol.to_string(),
            timestamp_ms,
            description,
            details,
        }
    }
}

/// Why the strategy engine recommended an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendationReason {
    BullishConsensus,
    BearishConsensus,
    BreakSupport,
    BreakResistance,
}

impl fmt::Display for RecommendationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecommendationReason::BullishConsensus => write!(f, "bullish_consensus"),
            RecommendationReason::BearishConsensus => write!(f, "bearish_consensus"),
            RecommendationReason::BreakSupport => write!(f, "break_support"),
            RecommendationReason::BreakResistance => write!(f, "break_resistance"),
        }
    }
}

/// Executable trade recommendation from the strategy engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: Action,
    pub side: Side,
    pub price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub reason: RecommendationReason,
    pub symbol: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_ordering() {
        assert!(Grade::APlus > Grade::A);
        assert!(Grade::A > Grade::BPlus);
        assert!(Grade::BPlus > Grade::B);
        assert!(Grade::B > Grade::C);
        assert_eq!(Grade::APlus.to_string(), "A+");
        assert_eq!(Grade::BPlus.to_string(), "B+");
    }

    #[test]
    fn test_timeframe_parsing() {
        assert_eq!(Timeframe::from_str("5m"), Some(Timeframe::Min5));
        assert_eq!(Timeframe::from_str("1H"), Some(Timeframe::Hour1));
        assert_eq!(Timeframe::from_str("2d"), None);
        assert_eq!(Timeframe::Min15.duration_ms(), 900_000);
    }

    #[test]
    fn test_platform_parsing() {
        assert_eq!(Platform::from_str("Binance"), Some(Platform::Binance));
        assert_eq!(Platform::from_str("OKX"), Some(Platform::Okx));
        assert_eq!(Platform::from_str("kraken"), None);
    }

    #[test]
    fn test_volatility_multipliers() {
        assert_eq!(VolatilityLevel::Low.size_multiplier(), 1.2);
        assert_eq!(VolatilityLevel::Normal.size_multiplier(), 1.0);
        assert_eq!(VolatilityLevel::High.size_multiplier(), 0.5);
    }

    #[test]
    fn test_signal_round_trips_through_json() {
        let signal = Signal::new(
            SignalKind::VolumeSpike,
            Grade::A,
            "ETH/USDT",
            1_700_000_000_000,
            "Block volume surge 6.0x".to_string(),
            SignalDetails::VolumeSpike {
                ratio: 6.0,
                price_change_pct: 1.0,
                block_volume: 300.0,
                baseline_volume: 50.0,
                price: 101.0,
            },
        );

        let json = serde_json::to_string(&signal).unwrap();
        let back: Signal = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, SignalKind::VolumeSpike);
        assert_eq!(back.grade, Grade::A);
        assert_eq!(back.id, signal.id);
    }

    #[test]
    fn test_candle_unknown_taker_split_survives_serde() {
        let candle = StandardCandle {
            timestamp_ms: 0,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.0,
            volume: 10.0,
            taker_buy_volume: None,
            taker_sell_volume: None,
            quote_volume: None,
            volume_unit: VolumeUnit::Base,
            taker_split_approximate: false,
            source: Platform::Coinbase,
        };
        let json = serde_json::to_string(&candle).unwrap();
        let back: StandardCandle = serde_json::from_str(&json).unwrap();
        // Unknown stays unknown, it never becomes zero.
        assert_eq!(back.taker_buy_volume, None);
        assert_eq!(back.taker_sell_volume, None);
    }
}
