//! Configuration management for FlowPulse
//!
//! Loads from config files + environment variables via .env into one
//! immutable `AppConfig` value object. The config is constructed once at
//! startup and passed by reference into every component constructor —
//! nothing reads global configuration state at runtime.

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::analyzers::{
    AdaptiveThresholds, EarlyPumpConfig, PanicDumpConfig, SteadyGrowthConfig, VolumeSpikeConfig,
};
use crate::backtesting::BacktestConfig;
use crate::consensus::ConsensusConfig;
use crate::engine::EngineConfig;
use crate::sizing::SizingConfig;
use crate::strategy::StrategyConfig;
use crate::types::{Platform, Timeframe};

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    pub monitor: MonitorSection,
    pub flow: FlowSection,
    pub spike: SpikeSection,
    pub pump: PumpSection,
    pub dump: DumpSection,
    pub steady: SteadySection,
    pub spot_futures: SpotFuturesSection,
    pub whale: WhaleSection,
    pub volatility: VolatilitySection,
    pub consensus: ConsensusSection,
    pub regime: RegimeSection,
    pub strategy: StrategySection,
    pub sizing: SizingSection,
    pub backtest: BacktestSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    /// Symbols to evaluate each cycle
    pub symbols: Vec<String>,
    /// Enabled exchange platforms
    pub platforms: Vec<String>,
    /// Main analysis timeframe
    pub base_timeframe: String,
    /// Resonance (confirmation) timeframe
    pub resonance_timeframe: String,
    /// Slow timeframe for regime and HTF gating
    pub slow_timeframe: String,
    pub candle_limit: usize,
    pub trade_limit: usize,
    /// Reference asset for the market-regime classifier
    pub reference_symbol: String,
    pub fetch_concurrency: usize,
    pub fetch_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            symbols: vec!["ETH/USDT".to_string()],
            platforms: vec!["binance".to_string(), "okx".to_string()],
            base_timeframe: "5m".to_string(),
            resonance_timeframe: "15m".to_string(),
            slow_timeframe: "1h".to_string(),
            candle_limit: 300,
            trade_limit: 100,
            reference_symbol: "BTC/USDT".to_string(),
            fetch_concurrency: 4,
            fetch_timeout_ms: 10_000,
            max_retries: 3,
            retry_base_delay_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowSection {
    /// Trailing window for flow aggregation, bars
    pub window: usize,
}

impl Default for FlowSection {
    fn default() -> Self {
        Self { window: 50 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpikeSection {
    pub factor: f64,
    pub min_price_change_pct: f64,
    pub cooldown_minutes: i64,
    pub history_window: usize,
    pub spike_window: usize,
}

impl Default for SpikeSection {
    fn default() -> Self {
        Self {
            factor: 3.0,
            min_price_change_pct: 0.5,
            cooldown_minutes: 30,
            history_window: 60,
            spike_window: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PumpSection {
    pub cooldown_minutes: i64,
    pub volume_factor: f64,
    pub volume_lookback: usize,
    pub buy_ratio: f64,
    pub require_resonance: bool,
    pub resonance_ma_period: usize,
    pub whale_lookback_secs: i64,
    pub stop_atr_mult: f64,
    pub stop_min_pct: f64,
    pub stop_max_pct: f64,
}

impl Default for PumpSection {
    fn default() -> Self {
        Self {
            cooldown_minutes: 10,
            volume_factor: 5.0,
            volume_lookback: 60,
            buy_ratio: 0.6,
            require_resonance: false,
            resonance_ma_period: 20,
            whale_lookback_secs: 300,
            stop_atr_mult: 1.5,
            stop_min_pct: 1.0,
            stop_max_pct: 3.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DumpSection {
    pub cooldown_minutes: i64,
    pub volume_factor: f64,
    pub volume_lookback: usize,
    pub sell_ratio: f64,
    pub multi_timeframe: bool,
    pub mid_ma_period: usize,
    pub slow_ma_period: usize,
}

impl Default for DumpSection {
    fn default() -> Self {
        Self {
            cooldown_minutes: 10,
            volume_factor: 5.0,
            volume_lookback: 60,
            sell_ratio: 0.6,
            multi_timeframe: true,
            mid_ma_period: 20,
            slow_ma_period: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SteadySection {
    pub cooldown_minutes: i64,
    pub min_ma_slope: f64,
    pub alignment_bars: usize,
    pub max_candle_change_pct: f64,
    pub fast_ma_period: usize,
    pub slow_ma_period: usize,
    pub stop_atr_mult: f64,
}

impl Default for SteadySection {
    fn default() -> Self {
        Self {
            cooldown_minutes: 60,
            min_ma_slope: 0.0005,
            alignment_bars: 5,
            max_candle_change_pct: 3.0,
            fast_ma_period: 20,
            slow_ma_period: 60,
            stop_atr_mult: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotFuturesSection {
    pub enabled: bool,
    /// Futures-leads divergence threshold, %
    pub divergence_threshold: f64,
    /// Correlated-move band, %
    pub correlation_threshold: f64,
}

impl Default for SpotFuturesSection {
    fn default() -> Self {
        Self {
            enabled: true,
            divergence_threshold: 0.5,
            correlation_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhaleSection {
    /// Minimum trade notional (USD) to track
    pub threshold: f64,
}

impl Default for WhaleSection {
    fn default() -> Self {
        Self { threshold: 200_000.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolatilitySection {
    pub adaptive_enabled: bool,
    pub atr_period: usize,
    /// ATR% below this is LOW volatility
    pub low_threshold_pct: f64,
    /// ATR% at or above this is HIGH volatility
    pub high_threshold_pct: f64,
    /// Price-move thresholds per volatility level, %
    pub move_threshold_low: f64,
    pub move_threshold_normal: f64,
    pub move_threshold_high: f64,
}

impl Default for VolatilitySection {
    fn default() -> Self {
        Self {
            adaptive_enabled: true,
            atr_period: 14,
            low_threshold_pct: 3.0,
            high_threshold_pct: 8.0,
            move_threshold_low: 1.5,
            move_threshold_normal: 2.0,
            move_threshold_high: 3.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusSection {
    pub min_platforms: usize,
    pub flow_deadband: f64,
    pub strong_flow_threshold: f64,
    pub sync_ratio_threshold: f64,
    pub require_htf_alignment: bool,
    pub htf_ma_period: usize,
    pub enable_bearish_sync: bool,
    pub institutional_platform: String,
    pub institutional_lead_mult: f64,
    pub institutional_floor: f64,
    pub enable_trap_detection: bool,
    pub trap_primary: String,
    pub trap_reference: String,
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            min_platforms: 2,
            flow_deadband: 1_000.0,
            strong_flow_threshold: 50_000_000.0,
            sync_ratio_threshold: 1.15,
            require_htf_alignment: true,
            htf_ma_period: 20,
            enable_bearish_sync: false,
            institutional_platform: "coinbase".to_string(),
            institutional_lead_mult: 1.5,
            institutional_floor: 1_000_000.0,
            enable_trap_detection: true,
            trap_primary: "binance".to_string(),
            trap_reference: "coinbase".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegimeSection {
    /// Classification cache TTL, seconds
    pub ttl_secs: i64,
}

impl Default for RegimeSection {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategySection {
    pub min_total_flow: f64,
    pub min_ratio: f64,
    pub min_action_interval_secs: i64,
    pub atr_sl_mult: f64,
    pub atr_tp_mult: f64,
    pub trend_tp_bonus: f64,
    pub require_midband: bool,
    pub min_consensus_bars: u32,
    pub allow_short: bool,
    pub short_only_in_bear: bool,
}

impl Default for StrategySection {
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

#[derive(Debug, Clone, Deserialize)]
pub struct SizingSection {
    pub account_balance: f64,
    /// Per-trade risk, percent of the account
    pub risk_pct: f64,
    pub max_positions: usize,
    pub max_notional: f64,
}

impl Default for SizingSection {
    fn default() -> Self {
        Self {
            account_balance: 10_000.0,
            risk_pct: 2.0,
            max_positions: 5,
            max_notional: 2_000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BacktestSection {
    pub initial_balance: f64,
    pub warmup_bars: usize,
    pub fee_rate: f64,
    pub flow_window: usize,
    pub atr_window: usize,
    pub risk_pct: f64,
    pub max_notional: f64,
    /// Grid-search combination cap
    pub max_grid_combinations: usize,
}

impl Default for BacktestSection {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            warmup_bars: 50,
            fee_rate: 0.001,
            flow_window: 50,
            atr_window: 14,
            risk_pct: 2.0,
            max_notional: 10_000.0,
            max_grid_combinations: 500,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self> {
        // Load .env first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Monitor defaults
            .set_default("monitor.symbols", vec!["ETH/USDT"])?
            .set_default("monitor.platforms", vec!["binance", "okx"])?
            .set_default("monitor.base_timeframe", "5m")?
            .set_default("monitor.resonance_timeframe", "15m")?
            .set_default("monitor.slow_timeframe", "1h")?
            .set_default("monitor.candle_limit", 300)?
            .set_default("monitor.trade_limit", 100)?
            .set_default("monitor.reference_symbol", "BTC/USDT")?
            .set_default("monitor.fetch_concurrency", 4)?
            .set_default("monitor.fetch_timeout_ms", 10_000)?
            .set_default("monitor.max_retries", 3)?
            .set_default("monitor.retry_base_delay_ms", 250)?
            // Flow defaults
            .set_default("flow.window", 50)?
            // Volume spike defaults
            .set_default("spike.factor", 3.0)?
            .set_default("spike.min_price_change_pct", 0.5)?
            .set_default("spike.cooldown_minutes", 30)?
            .set_default("spike.history_window", 60)?
            .set_default("spike.spike_window", 3)?
            // Early pump defaults
            .set_default("pump.cooldown_minutes", 10)?
            .set_default("pump.volume_factor", 5.0)?
            .set_default("pump.volume_lookback", 60)?
            .set_default("pump.buy_ratio", 0.6)?
            .set_default("pump.require_resonance", false)?
            .set_default("pump.resonance_ma_period", 20)?
            .set_default("pump.whale_lookback_secs", 300)?
            .set_default("pump.stop_atr_mult", 1.5)?
            .set_default("pump.stop_min_pct", 1.0)?
            .set_default("pump.stop_max_pct", 3.0)?
            // Panic dump defaults
            .set_default("dump.cooldown_minutes", 10)?
            .set_default("dump.volume_factor", 5.0)?
            .set_default("dump.volume_lookback", 60)?
            .set_default("dump.sell_ratio", 0.6)?
            .set_default("dump.multi_timeframe", true)?
            .set_default("dump.mid_ma_period", 20)?
            .set_default("dump.slow_ma_period", 20)?
            // Steady growth defaults
            .set_default("steady.cooldown_minutes", 60)?
            .set_default("steady.min_ma_slope", 0.0005)?
            .set_default("steady.alignment_bars", 5)?
            .set_default("steady.max_candle_change_pct", 3.0)?
            .set_default("steady.fast_ma_period", 20)?
            .set_default("steady.slow_ma_period", 60)?
            .set_default("steady.stop_atr_mult", 2.0)?
            // Spot/futures defaults
            .set_default("spot_futures.enabled", true)?
            .set_default("spot_futures.divergence_threshold", 0.5)?
            .set_default("spot_futures.correlation_threshold", 0.3)?
            // Whale defaults
            .set_default("whale.threshold", 200_000.0)?
            // Volatility defaults
            .set_default("volatility.adaptive_enabled", true)?
            .set_default("volatility.atr_period", 14)?
            .set_default("volatility.low_threshold_pct", 3.0)?
            .set_default("volatility.high_threshold_pct", 8.0)?
            .set_default("volatility.move_threshold_low", 1.5)?
            .set_default("volatility.move_threshold_normal", 2.0)?
            .set_default("volatility.move_threshold_high", 3.0)?
            // Consensus defaults
            .set_default("consensus.min_platforms", 2)?
            .set_default("consensus.flow_deadband", 1_000.0)?
            .set_default("consensus.strong_flow_threshold", 50_000_000.0)?
            .set_default("consensus.sync_ratio_threshold", 1.15)?
            .set_default("consensus.require_htf_alignment", true)?
            .set_default("consensus.htf_ma_period", 20)?
            .set_default("consensus.enable_bearish_sync", false)?
            .set_default("consensus.institutional_platform", "coinbase")?
            .set_default("consensus.institutional_lead_mult", 1.5)?
            .set_default("consensus.institutional_floor", 1_000_000.0)?
            .set_default("consensus.enable_trap_detection", true)?
            .set_default("consensus.trap_primary", "binance")?
            .set_default("consensus.trap_reference", "coinbase")?
            // Regime defaults
            .set_default("regime.ttl_secs", 300)?
            // Strategy defaults
            .set_default("strategy.min_total_flow", 10_000_000.0)?
            .set_default("strategy.min_ratio", 1.1)?
            .set_default("strategy.min_action_interval_secs", 900)?
            .set_default("strategy.atr_sl_mult", 1.5)?
            .set_default("strategy.atr_tp_mult", 2.0)?
            .set_default("strategy.trend_tp_bonus", 1.0)?
            .set_default("strategy.require_midband", true)?
            .set_default("strategy.min_consensus_bars", 2)?
            .set_default("strategy.allow_short", true)?
            .set_default("strategy.short_only_in_bear", true)?
            // Sizing defaults
            .set_default("sizing.account_balance", 10_000.0)?
            .set_default("sizing.risk_pct", 2.0)?
            .set_default("sizing.max_positions", 5)?
            .set_default("sizing.max_notional", 2_000.0)?
            // Backtest defaults
            .set_default("backtest.initial_balance", 10_000.0)?
            .set_default("backtest.warmup_bars", 50)?
            .set_default("backtest.fee_rate", 0.001)?
            .set_default("backtest.flow_window", 50)?
            .set_default("backtest.atr_window", 14)?
            .set_default("backtest.risk_pct", 2.0)?
            .set_default("backtest.max_notional", 10_000.0)?
            .set_default("backtest.max_grid_combinations", 500)?
            // Load config files if present
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (FLOWPULSE_*)
            .add_source(Environment::with_prefix("FLOWPULSE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;

        Ok(app_config)
    }

    /// Sanity checks that would otherwise surface deep inside a cycle
    pub fn validate(&self) -> Result<()> {
        if self.monitor.symbols.is_empty() {
            bail!("monitor.symbols must not be empty");
        }
        if self.platforms().is_empty() {
            bail!("monitor.platforms contains no recognized platform");
        }
        if !(0.0..=100.0).contains(&self.sizing.risk_pct) {
            bail!("sizing.risk_pct must be between 0 and 100");
        }
        if self.consensus.min_platforms < 2 {
            bail!("consensus.min_platforms must be at least 2");
        }
        Ok(())
    }

    /// Parsed platform list, unknown names dropped
    pub fn platforms(&self) -> Vec<Platform> {
        self.monitor
            .platforms
            .iter()
            .filter_map(|p| Platform::from_str(p))
            .collect()
    }

    fn timeframe(raw: &str, fallback: Timeframe) -> Timeframe {
        Timeframe::from_str(raw).unwrap_or(fallback)
    }

    fn adaptive_thresholds(&self) -> AdaptiveThresholds {
        AdaptiveThresholds {
            enabled: self.volatility.adaptive_enabled,
            atr_period: self.volatility.atr_period,
            volatility_low_pct: self.volatility.low_threshold_pct,
            volatility_high_pct: self.volatility.high_threshold_pct,
            threshold_low_vol: self.volatility.move_threshold_low,
            threshold_normal_vol: self.volatility.move_threshold_normal,
            threshold_high_vol: self.volatility.move_threshold_high,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            platforms: self.platforms(),
            base_timeframe: Self::timeframe(&self.monitor.base_timeframe, Timeframe::Min5),
            resonance_timeframe: Self::timeframe(
                &self.monitor.resonance_timeframe,
                Timeframe::Min15,
            ),
            slow_timeframe: Self::timeframe(&self.monitor.slow_timeframe, Timeframe::Hour1),
            candle_limit: self.monitor.candle_limit,
            trade_limit: self.monitor.trade_limit,
            reference_symbol: self.monitor.reference_symbol.clone(),
            fetch_concurrency: self.monitor.fetch_concurrency,
            fetch_timeout_ms: self.monitor.fetch_timeout_ms,
            max_retries: self.monitor.max_retries,
            retry_base_delay_ms: self.monitor.retry_base_delay_ms,
            gate_dumps_by_regime: self.strategy.short_only_in_bear,
            spot_futures_enabled: self.spot_futures.enabled,
        }
    }

    pub fn volume_spike_config(&self) -> VolumeSpikeConfig {
        VolumeSpikeConfig {
            factor: self.spike.factor,
            min_price_change_pct: self.spike.min_price_change_pct,
            cooldown_secs: self.spike.cooldown_minutes * 60,
            history_window: self.spike.history_window,
            spike_window: self.spike.spike_window,
        }
    }

    pub fn early_pump_config(&self) -> EarlyPumpConfig {
        EarlyPumpConfig {
            cooldown_secs: self.pump.cooldown_minutes * 60,
            volume_factor: self.pump.volume_factor,
            volume_lookback: self.pump.volume_lookback,
            buy_ratio_threshold: self.pump.buy_ratio,
            adaptive: self.adaptive_thresholds(),
            resonance_ma_period: self.pump.resonance_ma_period,
            require_resonance: self.pump.require_resonance,
            whale_lookback_ms: self.pump.whale_lookback_secs * 1000,
            stop_atr_mult: self.pump.stop_atr_mult,
            stop_min_pct: self.pump.stop_min_pct,
            stop_max_pct: self.pump.stop_max_pct,
        }
    }

    pub fn panic_dump_config(&self) -> PanicDumpConfig {
        PanicDumpConfig {
            cooldown_secs: self.dump.cooldown_minutes * 60,
            volume_factor: self.dump.volume_factor,
            volume_lookback: self.dump.volume_lookback,
            sell_ratio_threshold: self.dump.sell_ratio,
            adaptive: self.adaptive_thresholds(),
            multi_timeframe: self.dump.multi_timeframe,
            mid_ma_period: self.dump.mid_ma_period,
            slow_ma_period: self.dump.slow_ma_period,
        }
    }

    pub fn steady_growth_config(&self) -> SteadyGrowthConfig {
        SteadyGrowthConfig {
            cooldown_secs: self.steady.cooldown_minutes * 60,
            min_ma_slope: self.steady.min_ma_slope,
            alignment_bars: self.steady.alignment_bars,
            max_candle_change_pct: self.steady.max_candle_change_pct,
            fast_ma_period: self.steady.fast_ma_period,
            slow_ma_period: self.steady.slow_ma_period,
            stop_atr_mult: self.steady.stop_atr_mult,
        }
    }

    pub fn consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            min_platforms: self.consensus.min_platforms,
            flow_deadband: self.consensus.flow_deadband,
            strong_flow_threshold: self.consensus.strong_flow_threshold,
            sync_ratio_threshold: self.consensus.sync_ratio_threshold,
            require_htf_alignment: self.consensus.require_htf_alignment,
            htf_ma_period: self.consensus.htf_ma_period,
            enable_bearish_sync: self.consensus.enable_bearish_sync,
            institutional_platform: Platform::from_str(&self.consensus.institutional_platform)
                .unwrap_or(Platform::Coinbase),
            institutional_lead_mult: self.consensus.institutional_lead_mult,
            institutional_floor: self.consensus.institutional_floor,
            enable_trap_detection: self.consensus.enable_trap_detection,
            trap_primary: Platform::from_str(&self.consensus.trap_primary)
                .unwrap_or(Platform::Binance),
            trap_reference: Platform::from_str(&self.consensus.trap_reference)
                .unwrap_or(Platform::Coinbase),
        }
    }

    pub fn strategy_config(&self) -> StrategyConfig {
        StrategyConfig {
            min_total_flow: self.strategy.min_total_flow,
            min_ratio: self.strategy.min_ratio,
            min_action_interval_secs: self.strategy.min_action_interval_secs,
            atr_sl_mult: self.strategy.atr_sl_mult,
            atr_tp_mult: self.strategy.atr_tp_mult,
            trend_tp_bonus: self.strategy.trend_tp_bonus,
            require_midband: self.strategy.require_midband,
            min_consensus_bars: self.strategy.min_consensus_bars,
            allow_short: self.strategy.allow_short,
            short_only_in_bear: self.strategy.short_only_in_bear,
        }
    }

    pub fn sizing_config(&self) -> SizingConfig {
        SizingConfig {
            account_balance: self.sizing.account_balance,
            risk_fraction: self.sizing.risk_pct / 100.0,
            max_positions: self.sizing.max_positions,
            max_notional: self.sizing.max_notional,
        }
    }

    pub fn backtest_config(&self) -> BacktestConfig {
        BacktestConfig {
            initial_balance: self.backtest.initial_balance,
            warmup_bars: self.backtest.warmup_bars,
            fee_rate: self.backtest.fee_rate,
            flow_window: self.backtest.flow_window,
            atr_window: self.backtest.atr_window,
            risk_fraction: self.backtest.risk_pct / 100.0,
            max_notional: self.backtest.max_notional,
        }
    }

    /// Config digest (no secrets) for startup logging
    pub fn digest(&self) -> String {
        format!(
            "symbols={:?} platforms={:?} base_tf={} min_flow={:.0} risk={:.1}%",
            self.monitor.symbols,
            self.monitor.platforms,
            self.monitor.base_timeframe,
            self.strategy.min_total_flow,
            self.sizing.risk_pct
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
