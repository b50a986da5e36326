//! Backtesting Module
//!
//! Replays the flow analyzer + strategy engine + position sizing stack
//! bar-by-bar over historical 1-minute candles, resampled into the same
//! timeframes the live path uses:
//! - Exits are checked first on each bar using only that bar's high/low;
//!   a bar touching both stop and target closes at the stop (conservative)
//! - Entries only evaluate when flat, on data up to and including the
//!   current bar; higher-timeframe slices are filtered to ts <= now
//! - A flat fee applies per round trip
//!
//! The grid-search optimizer enumerates a bounded Cartesian product of
//! strategy hyperparameters and keeps the best run by win rate, breaking
//! ties by trade count and then enumeration order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

use crate::consensus::ConsensusLabel;
use crate::flow::{standardize, FlowAnalyzer};
use crate::indicators::volatility_level;
use crate::regime::RegimeClassifier;
use crate::sizing::{OpenPosition, PositionSizer, SizingConfig};
use crate::strategy::{EntryExitStrategy, StrategyConfig};
use crate::types::{Action, Side, StandardCandle, Timeframe};

/// Exit reason for a simulated trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeExit {
    StopLoss,
    TakeProfit,
}

impl fmt::Display for TradeExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeExit::StopLoss => write!(f, "SL"),
            TradeExit::TakeProfit => write!(f, "TP"),
        }
    }
}

/// One simulated round trip, immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub entry_time_ms: i64,
    pub exit_time_ms: i64,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Net PnL in USD after the round-trip fee
    pub pnl: f64,
    /// Net PnL as a percentage of the position notional
    pub pnl_pct: f64,
    pub reason: TradeExit,
}

/// Backtest run summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestReport {
    pub trades: Vec<BacktestTrade>,
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub max_drawdown: f64,
    pub final_balance: f64,
}

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    /// Starting balance, USD
    pub initial_balance: f64,
    /// Bars skipped so indicators are fully seeded
    pub warmup_bars: usize,
    /// Flat fee per round trip, as a fraction of notional
    pub fee_rate: f64,
    /// Trailing window for the rolling flow metrics
    pub flow_window: usize,
    /// Window for ATR/support/resistance at the decision point
    pub atr_window: usize,
    /// Risk fraction handed to the position sizer
    pub risk_fraction: f64,
    /// Notional cap handed to the position sizer
    pub max_notional: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            warmup_bars: 50,
            fee_rate: 0.001,
            flow_window: 50,
            atr_window: 14,
            risk_fraction: 0.02,
            max_notional: 10_000.0,
        }
    }
}

/// Strategy hyperparameters a run is evaluated under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestParams {
    pub min_total_flow: f64,
    pub min_ratio: f64,
    pub atr_sl_mult: f64,
    pub atr_tp_mult: f64,
    pub min_consensus_bars: u32,
}

impl Default for BacktestParams {
    fn default() -> Self {
        // Flow thresholds sized for a 50-bar window of 1m data, not the
        // live multi-platform aggregates.
        Self {
            min_total_flow: 50_000.0,
            min_ratio: 1.2,
            atr_sl_mult: 1.5,
            atr_tp_mult: 2.0,
            min_consensus_bars: 2,
        }
    }
}

/// Axis values for the grid search
#[derive(Debug, Clone)]
pub struct ParamGrid {
    pub min_total_flow: Vec<f64>,
    pub min_ratio: Vec<f64>,
    pub atr_sl_mult: Vec<f64>,
    pub atr_tp_mult: Vec<f64>,
    pub min_consensus_bars: Vec<u32>,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            min_total_flow: vec![10_000.0, 50_000.0, 100_000.0],
            min_ratio: vec![1.2, 1.5, 2.0],
            atr_sl_mult: vec![1.0, 1.5, 2.0],
            atr_tp_mult: vec![1.5, 2.0, 2.5],
            min_consensus_bars: vec![1, 2],
        }
    }
}

/// Grid-search outcome
#[derive(Debug, Clone)]
pub struct GridSearchResult {
    pub best_params: Option<BacktestParams>,
    pub best_report: Option<BacktestReport>,
    /// Combinations actually evaluated (after the cap)
    pub evaluated: usize,
}

/// Open simulated position
#[derive(Debug, Clone)]
struct SimPosition {
    side: Side,
    entry_price: f64,
    size: f64,
    notional: f64,
    stop_loss: f64,
    take_profit: f64,
    entry_time_ms: i64,
}

impl SimPosition {
    /// Exit price and reason for a bar, if the bar touches either level.
    /// When both levels are touched inside one bar the stop wins —
    /// intrabar ordering is unknowable, so the simulator takes the loss.
    fn exit_on(&self, bar: &StandardCandle) -> Option<(f64, TradeExit)> {
        match self.side {
            Side::Long => {
                if bar.low <= self.stop_loss {
                    Some((self.stop_loss, TradeExit::StopLoss))
                } else if bar.high >= self.take_profit {
                    Some((self.take_profit, TradeExit::TakeProfit))
                } else {
                    None
                }
            }
            Side::Short => {
                if bar.high >= self.stop_loss {
                    Some((self.stop_loss, TradeExit::StopLoss))
                } else if bar.low <= self.take_profit {
                    Some((self.take_profit, TradeExit::TakeProfit))
                } else {
                    None
                }
            }
        }
    }
}

/// Resample 1-minute candles into a slower timeframe (left-labeled)
///
/// Taker and quote volumes sum only when every bar in the bucket knows
/// them; one unknown bar makes the bucket unknown.
pub fn resample(candles: &[StandardCandle], timeframe: Timeframe) -> Vec<StandardCandle> {
    let duration = timeframe.duration_ms();
    let mut out: Vec<StandardCandle> = Vec::new();
    let mut bucket: Vec<&StandardCandle> = Vec::new();
    let mut bucket_start: Option<i64> = None;

    let mut sorted: Vec<&StandardCandle> = candles.iter().collect();
    sorted.sort_by_key(|c| c.timestamp_ms);

    let flush = |bucket: &[&StandardCandle], start: i64, out: &mut Vec<StandardCandle>| {
        if bucket.is_empty() {
            return;
        }
        let sum_known = |extract: fn(&StandardCandle) -> Option<f64>| -> Option<f64> {
            bucket
                .iter()
                .map(|c| extract(c))
                .collect::<Option<Vec<f64>>>()
                .map(|v| v.iter().sum())
        };
        out.push(StandardCandle {
            timestamp_ms: start,
            open: bucket[0].open,
            high: bucket.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max),
            low: bucket.iter().map(|c| c.low).fold(f64::INFINITY, f64::min),
            close: bucket[bucket.len() - 1].close,
            volume: bucket.iter().map(|c| c.volume).sum(),
            taker_buy_volume: sum_known(|c| c.taker_buy_volume),
            taker_sell_volume: sum_known(|c| c.taker_sell_volume),
            quote_volume: sum_known(|c| c.quote_volume),
            volume_unit: bucket[0].volume_unit,
            taker_split_approximate: bucket.iter().any(|c| c.taker_split_approximate),
            source: bucket[0].source,
        });
    };

    for candle in sorted {
        let start = candle.timestamp_ms - candle.timestamp_ms.rem_euclid(duration);
        if bucket_start != Some(start) {
            if let Some(prev) = bucket_start {
                flush(&bucket, prev, &mut out);
            }
            bucket.clear();
            bucket_start = Some(start);
        }
        bucket.push(candle);
    }
    if let Some(prev) = bucket_start {
        flush(&bucket, prev, &mut out);
    }
    out
}

/// Deterministic bar-by-bar simulator
///
/// Every `run` constructs fresh analyzer, strategy and sizing instances —
/// cooldown and streak state is never shared with the live engine or
/// between runs.
pub struct Backtester {
    symbol: String,
    config: BacktestConfig,
    candles_1m: Vec<StandardCandle>,
}

impl Backtester {
    pub fn new(symbol: &str, mut candles_1m: Vec<StandardCandle>, config: BacktestConfig) -> Self {
        candles_1m.sort_by_key(|c| c.timestamp_ms);
        Self {
            symbol: symbol.to_string(),
            config,
            candles_1m,
        }
    }

    /// Run one simulation under the given hyperparameters
    pub fn run(&self, params: &BacktestParams) -> BacktestReport {
        let candles = &self.candles_1m;
        if candles.len() <= self.config.warmup_bars {
            return BacktestReport {
                final_balance: self.config.initial_balance,
                ..Default::default()
            };
        }

        // Pre-compute the rolling flow (batch path) and the HTF resamples.
        let flow_series = standardize(candles);
        let flow_analyzer = FlowAnalyzer::new(self.config.flow_window);
        let rolling = flow_analyzer.analyze_series(&flow_series);
        let df_5m = resample(candles, Timeframe::Min5);
        let df_1h = resample(candles, Timeframe::Hour1);

        // Fresh, isolated instances per run.
        let mut strategy = EntryExitStrategy::new(StrategyConfig {
            min_total_flow: params.min_total_flow,
            min_ratio: params.min_ratio,
            atr_sl_mult: params.atr_sl_mult,
            atr_tp_mult: params.atr_tp_mult,
            min_consensus_bars: params.min_consensus_bars,
            ..Default::default()
        });
        let mut sizer = PositionSizer::new(SizingConfig {
            account_balance: self.config.initial_balance,
            risk_fraction: self.config.risk_fraction,
            max_notional: self.config.max_notional,
            ..Default::default()
        });
        let mut regime_classifier = RegimeClassifier::default();

        let mut balance = self.config.initial_balance;
        let mut trades: Vec<BacktestTrade> = Vec::new();
        let mut equity_curve: Vec<f64> = Vec::new();
        let mut position: Option<SimPosition> = None;

        for i in self.config.warmup_bars..candles.len() {
            let bar = &candles[i];
            let now_ms = bar.timestamp_ms;

            // 1. Exits first, on this bar's high/low only.
            if let Some(pos) = &position {
                if let Some((exit_price, reason)) = pos.exit_on(bar) {
                    let gross = match pos.side {
                        Side::Long => (exit_price - pos.entry_price) * pos.size,
                        Side::Short => (pos.entry_price - exit_price) * pos.size,
                    };
                    let fee = pos.notional * self.config.fee_rate;
                    let pnl = gross - fee;
                    balance += pnl;
                    trades.push(BacktestTrade {
                        entry_time_ms: pos.entry_time_ms,
                        exit_time_ms: now_ms,
                        side: pos.side,
                        entry_price: pos.entry_price,
                        exit_price,
                        pnl,
                        pnl_pct: pnl / pos.notional * 100.0,
                        reason,
                    });
                    equity_curve.push(balance);
                    sizer.close_position(&self.symbol);
                    position = None;
                }
            }

            // 2. Entries only when flat, no look-ahead past this bar.
            if position.is_none() {
                position = self.try_entry(
                    i,
                    now_ms,
                    &rolling,
                    &df_5m,
                    &df_1h,
                    params,
                    &mut strategy,
                    &mut sizer,
                    &mut regime_classifier,
                    balance,
                );
            }
        }

        Self::report(trades, equity_curve, balance, self.config.initial_balance)
    }

    #[allow(clippy::too_many_arguments)]
    fn try_entry(
        &self,
        i: usize,
        now_ms: i64,
        rolling: &[crate::flow::RollingFlow],
        df_5m: &[StandardCandle],
        df_1h: &[StandardCandle],
        params: &BacktestParams,
        strategy: &mut EntryExitStrategy,
        sizer: &mut PositionSizer,
        regime_classifier: &mut RegimeClassifier,
        balance: f64,
    ) -> Option<SimPosition> {
        let candles = &self.candles_1m;
        let bar = &candles[i];

        let flow = rolling[i].cumulative_net_flow.unwrap_or(0.0);
        let ratio = rolling[i].buy_sell_ratio.unwrap_or(1.0);

        // Decision-point structure over the trailing ATR window.
        let (support, resistance, atr) = if i >= self.config.atr_window {
            let window = &candles[i + 1 - self.config.atr_window..=i];
            let support = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
            let resistance = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
            let atr = window.iter().map(|c| c.high - c.low).sum::<f64>()
                / self.config.atr_window as f64;
            (support, resistance, atr)
        } else {
            (bar.close * 0.98, bar.close * 1.02, bar.close * 0.01)
        };

        let metrics = crate::flow::PlatformMetrics {
            cumulative_net_flow: flow,
            buy_sell_ratio: ratio,
            current_price: bar.close,
            support_low: support,
            resistance_high: resistance,
            atr,
        };
        let mut platform_metrics = HashMap::new();
        platform_metrics.insert(bar.source, metrics);

        // Single-platform consensus straight from the flow threshold.
        let consensus = if flow > params.min_total_flow {
            ConsensusLabel::StrongBullish
        } else if flow < -params.min_total_flow {
            ConsensusLabel::StrongBearish
        } else {
            ConsensusLabel::Mixed
        };

        // Higher-timeframe slices, filtered to ts <= now.
        let slice_5m = &df_5m[..df_5m.partition_point(|c| c.timestamp_ms <= now_ms)];
        let slice_1h = &df_1h[..df_1h.partition_point(|c| c.timestamp_ms <= now_ms)];
        let fast_trend_up = if slice_5m.len() >= 4 {
            Some(crate::indicators::is_trend_up(slice_5m, 3))
        } else {
            None
        };
        let regime = regime_classifier.classify(
            now_ms,
            if slice_1h.is_empty() {
                None
            } else {
                Some(slice_1h)
            },
        );

        let rec = strategy.evaluate(
            &self.symbol,
            &platform_metrics,
            &consensus,
            &[],
            regime,
            fast_trend_up,
            now_ms,
        )?;
        if rec.action != Action::Entry {
            return None;
        }
        let (stop_loss, take_profit) = (rec.stop_loss?, rec.take_profit?);

        // Size it the way the live path would.
        sizer.update_balance(balance);
        let atr_pct = if bar.close > 0.0 {
            Some(atr / bar.close * 100.0)
        } else {
            None
        };
        let level = volatility_level(atr_pct, 3.0, 8.0);
        let sized = sizer
            .compute(&self.symbol, rec.price, stop_loss, level, Some(take_profit))
            .ok()?;
        if sized.size <= 0.0 {
            return None;
        }
        sizer.open_position(OpenPosition {
            symbol: self.symbol.clone(),
            side: rec.side,
            size: sized.size,
            notional: sized.notional,
            risk_amount: sized.risk_amount,
            entry_price: rec.price,
            stop_loss,
            take_profit: Some(take_profit),
            opened_at_ms: now_ms,
        });
        debug!(
            symbol = %self.symbol,
            side = %rec.side,
            price = rec.price,
            "backtest entry"
        );

        Some(SimPosition {
            side: rec.side,
            entry_price: rec.price,
            size: sized.size,
            notional: sized.notional,
            stop_loss,
            take_profit,
            entry_time_ms: now_ms,
        })
    }

    fn report(
        trades: Vec<BacktestTrade>,
        equity_curve: Vec<f64>,
        final_balance: f64,
        initial_balance: f64,
    ) -> BacktestReport {
        let total_trades = trades.len();
        let wins = trades.iter().filter(|t| t.pnl > 0.0).count();
        let losses = total_trades - wins;
        let win_rate = if total_trades > 0 {
            wins as f64 / total_trades as f64
        } else {
            0.0
        };
        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();

        let mut peak = initial_balance;
        let mut max_drawdown: f64 = 0.0;
        for &equity in &equity_curve {
            peak = peak.max(equity);
            if peak > 0.0 {
                max_drawdown = max_drawdown.max((peak - equity) / peak);
            }
        }

        BacktestReport {
            trades,
            total_trades,
            wins,
            losses,
            win_rate,
            total_pnl,
            max_drawdown,
            final_balance,
        }
    }

    /// Bounded grid search over strategy hyperparameters
    ///
    /// Selects the run with the highest win rate among runs that produced
    /// at least one trade. Ties break deterministically: more trades wins,
    /// then the earlier combination in enumeration order.
    pub fn grid_search(&self, grid: &ParamGrid, max_combinations: usize) -> GridSearchResult {
        let mut best: Option<(BacktestParams, BacktestReport)> = None;
        let mut evaluated = 0usize;

        'outer: for &min_total_flow in &grid.min_total_flow {
            for &min_ratio in &grid.min_ratio {
                for &atr_sl_mult in &grid.atr_sl_mult {
                    for &atr_tp_mult in &grid.atr_tp_mult {
                        for &min_consensus_bars in &grid.min_consensus_bars {
                            if evaluated >= max_combinations {
                                break 'outer;
                            }
                            let params = BacktestParams {
                                min_total_flow,
                                min_ratio,
                                atr_sl_mult,
                                atr_tp_mult,
                                min_consensus_bars,
                            };
                            let report = self.run(&params);
                            evaluated += 1;

                            if report.total_trades == 0 {
                                continue;
                            }
                            let better = match &best {
                                None => true,
                                Some((_, b)) => {
                                    report.win_rate > b.win_rate
                                        || (report.win_rate == b.win_rate
                                            && report.total_trades > b.total_trades)
                                }
                            };
                            if better {
                                best = Some((params, report));
                            }
                        }
                    }
                }
            }
        }

        if let Some((params, report)) = &best {
            info!(
                win_rate = report.win_rate,
                trades = report.total_trades,
                ?params,
                "grid search best"
            );
        }
        let (best_params, best_report) = match best {
            Some((p, r)) => (Some(p), Some(r)),
            None => (None, None),
        };
        GridSearchResult {
            best_params,
            best_report,
            evaluated,
        }
    }
}
