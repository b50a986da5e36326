//! Evaluation-Cycle Engine
//!
//! Orchestrates one cycle over a batch of symbols: data fetch fans out
//! with bounded concurrency, analysis runs sequentially per symbol so all
//! cooldown/streak state stays single-writer. Fetch failures retry with
//! exponential backoff and jitter at the fetch boundary only; a symbol
//! whose data cannot be fetched is skipped for the cycle, never fatal.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::analyzers::{
    CorrelationStrength, EarlyPumpAnalyzer, PanicDumpAnalyzer, SpotFuturesAnalyzer,
    SteadyGrowthAnalyzer, VolumeSpikeAnalyzer, WhaleWatcher,
};
use crate::analyzers::early_pump::PumpConfirmations;
use crate::config::AppConfig;
use crate::consensus::{ConsensusAnalyzer, ConsensusLabel};
use crate::flow::{standardize, FlowAnalyzer, PlatformMetrics};
use crate::indicators::{atr_percent, is_trend_up, volatility_level};
use crate::regime::{MarketRegime, RegimeClassifier};
use crate::sizing::{PositionSize, PositionSizer};
use crate::strategy::EntryExitStrategy;
use crate::types::{
    Action, Platform, Recommendation, Signal, StandardCandle, Timeframe, TradeRecord,
};

/// Data-fetch seam implemented by the exchange-connector collaborators
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Candle series for a symbol on one platform, ascending time
    async fn candles(
        &self,
        platform: Platform,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<StandardCandle>>;

    /// Recent trades for whale analysis
    async fn trades(
        &self,
        platform: Platform,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<TradeRecord>>;

    /// Paired spot/futures series when the venue carries both markets.
    /// `None` simply disables the correlation bonus.
    async fn spot_futures_pair(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Option<(Vec<StandardCandle>, Vec<StandardCandle>)>> {
        let _ = (symbol, timeframe, limit);
        Ok(None)
    }
}

/// Engine scheduling and fetch settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub platforms: Vec<Platform>,
    /// Main analysis timeframe
    pub base_timeframe: Timeframe,
    /// Resonance timeframe for confirmations and steady growth
    pub resonance_timeframe: Timeframe,
    /// Slow timeframe for regime/HTF gating
    pub slow_timeframe: Timeframe,
    pub candle_limit: usize,
    pub trade_limit: usize,
    /// Symbol whose slow series classifies the market regime
    pub reference_symbol: String,
    /// Concurrent fetches across symbols/platforms
    pub fetch_concurrency: usize,
    pub fetch_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    /// Skip panic-dump analysis outside bear-leaning regimes
    pub gate_dumps_by_regime: bool,
    /// Fetch and score spot/futures correlation
    pub spot_futures_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            platforms: vec![Platform::Binance, Platform::Okx],
            base_timeframe: Timeframe::Min5,
            resonance_timeframe: Timeframe::Min15,
            slow_timeframe: Timeframe::Hour1,
            candle_limit: 300,
            trade_limit: 100,
            reference_symbol: "BTC/USDT".to_string(),
            fetch_concurrency: 4,
            fetch_timeout_ms: 10_000,
            max_retries: 3,
            retry_base_delay_ms: 250,
            gate_dumps_by_regime: true,
            spot_futures_enabled: true,
        }
    }
}

/// Everything fetched for one symbol in one cycle
struct SymbolData {
    symbol: String,
    /// (platform, base-timeframe candles, recent trades)
    per_platform: Vec<(Platform, Vec<StandardCandle>, Vec<TradeRecord>)>,
    resonance: Option<Vec<StandardCandle>>,
    slow: Option<Vec<StandardCandle>>,
    spot_futures: Option<(Vec<StandardCandle>, Vec<StandardCandle>)>,
}

/// Per-symbol cycle output for notification/persistence collaborators
#[derive(Debug, Clone)]
pub struct SymbolReport {
    pub symbol: String,
    pub consensus: ConsensusLabel,
    pub regime: MarketRegime,
    pub signals: Vec<Signal>,
    pub recommendation: Option<Recommendation>,
    pub position: Option<PositionSize>,
}

/// The live signal-fusion engine
pub struct CycleEngine {
    config: EngineConfig,
    provider: Arc<dyn MarketDataProvider>,
    flow: FlowAnalyzer,
    spike: VolumeSpikeAnalyzer,
    pump: EarlyPumpAnalyzer,
    dump: PanicDumpAnalyzer,
    steady: SteadyGrowthAnalyzer,
    spot_futures: SpotFuturesAnalyzer,
    whale: WhaleWatcher,
    consensus: ConsensusAnalyzer,
    regime: RegimeClassifier,
    strategy: EntryExitStrategy,
    sizer: PositionSizer,
    volatility_low_pct: f64,
    volatility_high_pct: f64,
    atr_period: usize,
}

impl CycleEngine {
    /// Build the engine from the application config; every component gets
    /// its settings from the one immutable config object.
    pub fn new(config: &AppConfig, provider: Arc<dyn MarketDataProvider>) -> Self {
        Self {
            config: config.engine_config(),
            provider,
            flow: FlowAnalyzer::new(config.flow.window),
            spike: VolumeSpikeAnalyzer::new(config.volume_spike_config()),
            pump: EarlyPumpAnalyzer::new(config.early_pump_config()),
            dump: PanicDumpAnalyzer::new(config.panic_dump_config()),
            steady: SteadyGrowthAnalyzer::new(config.steady_growth_config()),
            spot_futures: SpotFuturesAnalyzer::new(
                config.spot_futures.divergence_threshold,
                config.spot_futures.correlation_threshold,
            ),
            whale: WhaleWatcher::new(config.whale.threshold),
            consensus: ConsensusAnalyzer::new(config.consensus_config()),
            regime: RegimeClassifier::new(config.regime.ttl_secs * 1000),
            strategy: EntryExitStrategy::new(config.strategy_config()),
            sizer: PositionSizer::new(config.sizing_config()),
            volatility_low_pct: config.volatility.low_threshold_pct,
            volatility_high_pct: config.volatility.high_threshold_pct,
            atr_period: config.volatility.atr_period,
        }
    }

    /// Refresh the sizing balance (from the account collaborator)
    pub fn update_balance(&mut self, balance: f64) {
        self.sizer.update_balance(balance);
    }

    /// Run one evaluation cycle at the current wall-clock time
    pub async fn run_cycle(&mut self, symbols: &[String]) -> Vec<SymbolReport> {
        let now_ms = Utc::now().timestamp_millis();
        self.run_cycle_at(symbols, now_ms).await
    }

    /// Run one evaluation cycle at an explicit timestamp
    pub async fn run_cycle_at(&mut self, symbols: &[String], now_ms: i64) -> Vec<SymbolReport> {
        if self.config.platforms.is_empty() {
            warn!("no platforms configured, skipping cycle");
            return Vec::new();
        }

        // Regime first: one fetch for the reference asset, cached with TTL
        // and degrading to the stale value on failure.
        let reference = self
            .fetch_candles_with_retry(
                self.config.platforms[0],
                &self.config.reference_symbol,
                self.config.slow_timeframe,
            )
            .await;
        let regime = self.regime.classify(now_ms, reference.as_deref());
        debug!(%regime, "cycle regime");

        // Fetch phase: I/O-bound, concurrent across symbols.
        let concurrency = self.config.fetch_concurrency.max(1);
        let fetched: Vec<SymbolData> = stream::iter(symbols.iter().cloned())
            .map(|symbol| self.fetch_symbol_data(symbol))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        // Analysis phase: CPU-bound, sequential — per-symbol state is
        // single-writer by construction of this loop.
        let mut reports = Vec::with_capacity(fetched.len());
        for data in fetched {
            reports.push(self.analyze_symbol(data, regime, now_ms));
        }
        reports
    }

    /// Fetch all inputs for one symbol; failed platforms drop out
    async fn fetch_symbol_data(&self, symbol: String) -> SymbolData {
        let mut per_platform = Vec::new();
        for &platform in &self.config.platforms {
            let candles = self
                .fetch_candles_with_retry(platform, &symbol, self.config.base_timeframe)
                .await;
            let candles = match candles {
                Some(c) if !c.is_empty() => c,
                _ => {
                    debug!(%platform, %symbol, "platform skipped this cycle");
                    continue;
                }
            };
            let trades = self
                .fetch_with_retry("trades", || {
                    self.provider
                        .trades(platform, &symbol, self.config.trade_limit)
                })
                .await
                .unwrap_or_default();
            per_platform.push((platform, candles, trades));
        }

        let resonance = self
            .fetch_candles_with_retry(
                self.config.platforms[0],
                &symbol,
                self.config.resonance_timeframe,
            )
            .await;
        let slow = self
            .fetch_candles_with_retry(self.config.platforms[0], &symbol, self.config.slow_timeframe)
            .await;
        let spot_futures = if self.config.spot_futures_enabled {
            self.fetch_with_retry("spot_futures", || {
                self.provider.spot_futures_pair(
                    &symbol,
                    self.config.base_timeframe,
                    self.config.candle_limit,
                )
            })
            .await
            .flatten()
        } else {
            None
        };

        SymbolData {
            symbol,
            per_platform,
            resonance,
            slow,
            spot_futures,
        }
    }

    /// Analyze one symbol from fetched data; pure CPU, takes `now_ms`
    fn analyze_symbol(&mut self, data: SymbolData, regime: MarketRegime, now_ms: i64) -> SymbolReport {
        let symbol = data.symbol.as_str();

        // Per-platform flow metrics.
        let mut metrics: HashMap<Platform, PlatformMetrics> = HashMap::new();
        for (platform, candles, _) in &data.per_platform {
            let series = standardize(candles);
            if let Some(m) = self.flow.analyze(&series) {
                metrics.insert(*platform, m);
            }
        }

        let mut signals: Vec<Signal> = Vec::new();

        // Pattern analyzers run on the primary platform's series; their
        // cooldowns are keyed by symbol, so one platform is enough.
        let primary = data
            .per_platform
            .iter()
            .find(|(p, _, _)| *p == self.config.platforms[0])
            .or_else(|| data.per_platform.first());

        let sf_correlation = data
            .spot_futures
            .as_ref()
            .and_then(|(spot, futures)| self.spot_futures.analyze(spot, futures));
        let sf_strength: Option<CorrelationStrength> = sf_correlation.map(|c| c.strength);

        if let Some((_, candles, trades)) = primary {
            if let Some(spike) = self.spike.analyze(candles, symbol, now_ms) {
                info!(symbol, %spike.grade, "volume spike");
                signals.push(spike);
            }

            let whales: Vec<TradeRecord> = self
                .whale
                .check_trades(trades)
                .into_iter()
                .cloned()
                .collect();
            let confirmations = PumpConfirmations {
                resonance: data.resonance.as_deref(),
                sf_strength,
                whales: &whales,
            };
            if let Some(pump) = self.pump.analyze(candles, symbol, now_ms, confirmations) {
                info!(symbol, %pump.grade, "early pump");
                signals.push(pump);
            }

            // Panic dumps only matter when shorting is on the table.
            let dumps_allowed = !self.config.gate_dumps_by_regime || regime.allows_short();
            if dumps_allowed {
                if let Some(dump) = self.dump.analyze(
                    candles,
                    symbol,
                    now_ms,
                    data.resonance.as_deref(),
                    data.slow.as_deref(),
                ) {
                    info!(symbol, %dump.grade, "panic dump");
                    signals.push(dump);
                }
            }
        }

        if let Some(resonance) = data.resonance.as_deref() {
            if let Some(steady) = self.steady.analyze(resonance, symbol, now_ms) {
                info!(symbol, "steady growth");
                signals.push(steady);
            }
        }

        // Cross-platform consensus.
        let consensus = self.consensus.consensus(&metrics);
        let cross_signals = self.consensus.signals(
            &metrics,
            symbol,
            self.config.platforms.len(),
            data.slow.as_deref(),
            now_ms,
        );
        signals.extend(cross_signals);

        // Strategy evaluation and sizing.
        let fast_trend_up = primary.and_then(|(_, candles, _)| {
            (candles.len() >= 4).then(|| is_trend_up(candles, 3))
        });
        let recommendation = self.strategy.evaluate(
            symbol,
            &metrics,
            &consensus,
            &signals,
            regime,
            fast_trend_up,
            now_ms,
        );

        let position = recommendation.as_ref().and_then(|rec| {
            if rec.action != Action::Entry {
                return None;
            }
            let stop_loss = rec.stop_loss?;
            let level = primary
                .map(|(_, candles, _)| {
                    volatility_level(
                        atr_percent(candles, self.atr_period),
                        self.volatility_low_pct,
                        self.volatility_high_pct,
                    )
                })
                .unwrap_or_default();
            match self
                .sizer
                .compute(symbol, rec.price, stop_loss, level, rec.take_profit)
            {
                Ok(size) => Some(size),
                Err(err) => {
                    warn!(symbol, %err, "entry rejected by sizing");
                    None
                }
            }
        });

        SymbolReport {
            symbol: data.symbol,
            consensus,
            regime,
            signals,
            recommendation,
            position,
        }
    }

    async fn fetch_candles_with_retry(
        &self,
        platform: Platform,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Option<Vec<StandardCandle>> {
        self.fetch_with_retry("candles", || {
            self.provider
                .candles(platform, symbol, timeframe, self.config.candle_limit)
        })
        .await
    }

    /// Retry with exponential backoff and jitter; retries only exist at
    /// this boundary — analyzer logic is pure and never retried.
    async fn fetch_with_retry<T, F, Fut>(&self, what: &str, op: F) -> Option<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.config.max_retries.max(1);
        for attempt in 0..attempts {
            match timeout(Duration::from_millis(self.config.fetch_timeout_ms), op()).await {
                Ok(Ok(value)) => return Some(value),
                Ok(Err(err)) => {
                    warn!(what, attempt, %err, "fetch failed");
                }
                Err(_) => {
                    warn!(what, attempt, "fetch timed out");
                }
            }
            if attempt + 1 < attempts {
                let base = self.config.retry_base_delay_ms.max(1);
                let backoff = base * 2u64.saturating_pow(attempt as u32);
                let jitter = rand::thread_rng().gen_range(0..base);
                tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VolumeUnit;

    fn make_candle(ts: i64, close: f64, buy: f64, sell: f64) -> StandardCandle {
        StandardCandle {
            timestamp_ms: ts,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: buy + sell,
            taker_buy_volume: Some(buy),
            taker_sell_volume: Some(sell),
            quote_volume: Some(buy + sell),
            volume_unit: VolumeUnit::Quote,
            taker_split_approximate: false,
            source: Platform::Binance,
        }
    }

    fn bullish_series(n: usize) -> Vec<StandardCandle> {
        (0..n)
            .map(|i| make_candle(i as i64 * 300_000, 100.0, 400_000.0, 100_000.0))
            .collect()
    }

    fn engine_with_provider(provider: MockMarketDataProvider) -> CycleEngine {
        let config = AppConfig::default();
        CycleEngine::new(&config, Arc::new(provider))
    }

    #[tokio::test]
    async fn test_cycle_produces_consensus_and_sync_signal() {
        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_candles()
            .returning(|_, _, _, _| Ok(bullish_series(80)));
        provider.expect_trades().returning(|_, _, _| Ok(Vec::new()));
        provider
            .expect_spot_futures_pair()
            .returning(|_, _, _| Ok(None));

        let mut engine = engine_with_provider(provider);
        let reports = engine
            .run_cycle_at(&["ETH/USDT".to_string()], 100_000_000)
            .await;

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.symbol, "ETH/USDT");
        // Both platforms report strong inflow: 50 * 300k = 15M each.
        assert_eq!(report.consensus, ConsensusLabel::StrongBullish);
        assert!(report
            .signals
            .iter()
            .any(|s| s.kind == crate::types::SignalKind::GlobalSyncBullish));
    }

    #[tokio::test]
    async fn test_fetch_failure_degrades_to_skip() {
        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_candles()
            .returning(|_, _, _, _| Err(anyhow::anyhow!("connection reset")));
        provider.expect_trades().returning(|_, _, _| Ok(Vec::new()));
        provider
            .expect_spot_futures_pair()
            .returning(|_, _, _| Ok(None));

        let mut engine = engine_with_provider(provider);
        let reports = engine
            .run_cycle_at(&["ETH/USDT".to_string()], 100_000_000)
            .await;

        // The symbol is reported with no data rather than failing the cycle.
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].consensus, ConsensusLabel::Mixed);
        assert!(reports[0].signals.is_empty());
        assert!(reports[0].recommendation.is_none());
    }

    #[tokio::test]
    async fn test_second_cycle_can_recommend_entry() {
        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_candles()
            .returning(|_, _, _, _| Ok(bullish_series(80)));
        provider.expect_trades().returning(|_, _, _| Ok(Vec::new()));
        provider
            .expect_spot_futures_pair()
            .returning(|_, _, _| Ok(None));

        let mut engine = engine_with_provider(provider);
        let symbols = vec!["ETH/USDT".to_string()];

        // First cycle builds the consensus streak.
        let first = engine.run_cycle_at(&symbols, 100_000_000).await;
        assert!(first[0].recommendation.is_none());

        // Second cycle meets the 2-bar streak and recommends a long with a
        // sized position.
        let second = engine.run_cycle_at(&symbols, 100_300_000).await;
        let rec = second[0].recommendation.as_ref().expect("entry expected");
        assert_eq!(rec.action, Action::Entry);
        assert!(second[0].position.is_some());
    }
}
