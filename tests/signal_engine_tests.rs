//! Integration tests for the signal fusion and decision engine

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use flowpulse::analyzers::early_pump::PumpConfirmations;
    use flowpulse::analyzers::{
        EarlyPumpAnalyzer, EarlyPumpConfig, VolumeSpikeAnalyzer, VolumeSpikeConfig,
    };
    use flowpulse::backtesting::{
        resample, BacktestConfig, BacktestParams, Backtester, ParamGrid, TradeExit,
    };
    use flowpulse::consensus::{ConsensusAnalyzer, ConsensusLabel};
    use flowpulse::flow::{standardize, FlowAnalyzer, PlatformMetrics};
    use flowpulse::regime::MarketRegime;
    use flowpulse::sizing::{PositionSizer, SizingConfig};
    use flowpulse::strategy::{EntryExitStrategy, StrategyConfig};
    use flowpulse::types::{
        Action, Grade, Platform, Side, SignalKind, StandardCandle, Timeframe, VolatilityLevel,
        VolumeUnit,
    };

    fn make_candle(
        ts: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        buy_share: Option<f64>,
    ) -> StandardCandle {
        StandardCandle {
            timestamp_ms: ts,
            open,
            high,
            low,
            close,
            volume,
            taker_buy_volume: buy_share.map(|s| volume * s),
            taker_sell_volume: buy_share.map(|s| volume * (1.0 - s)),
            quote_volume: Some(volume),
            volume_unit: VolumeUnit::Quote,
            taker_split_approximate: false,
            source: Platform::Binance,
        }
    }

    // ============================================================================
    // Flow pipeline
    // ============================================================================

    #[test]
    fn test_flow_pipeline_from_connector_candles() {
        // 100 flat bars, 600 USD taker buys / 400 USD taker sells per bar.
        let candles: Vec<StandardCandle> = (0..100)
            .map(|i| {
                let mut c = make_candle(i * 60_000, 100.0, 101.0, 99.0, 100.0, 1_000.0, None);
                c.taker_buy_volume = Some(600.0);
                c.taker_sell_volume = Some(400.0);
                c
            })
            .collect();

        let series = standardize(&candles);
        let metrics = FlowAnalyzer::new(50).analyze(&series).unwrap();
        assert!((metrics.cumulative_net_flow - 10_000.0).abs() < 1e-9);
        assert!((metrics.buy_sell_ratio - 1.5).abs() < 1e-9);
    }

    // ============================================================================
    // Analyzer properties
    // ============================================================================

    #[test]
    fn test_cooldown_only_first_eligible_bar_fires() {
        let mut candles = Vec::new();
        for i in 0..60 {
            candles.push(make_candle(
                i * 300_000,
                100.0,
                100.1,
                99.9,
                100.0,
                50.0 / 3.0,
                None,
            ));
        }
        for i in 60..63 {
            candles.push(make_candle(i * 300_000, 100.0, 101.2, 99.9, 101.0, 100.0, None));
        }

        let mut analyzer = VolumeSpikeAnalyzer::new(VolumeSpikeConfig::default());
        let first = analyzer.analyze(&candles, "ETH/USDT", 0);
        let second = analyzer.analyze(&candles, "ETH/USDT", 60_000);
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[test]
    fn test_early_pump_grade_monotonicity() {
        // Holding everything else fixed, a larger price change never
        // produces a lower grade tier.
        let run = |change_pct: f64| -> Grade {
            let mut candles = Vec::new();
            for i in 0..62 {
                candles.push(make_candle(i * 60_000, 100.0, 100.25, 99.75, 100.0, 10.0, Some(0.5)));
            }
            let close = 100.0 * (1.0 + change_pct / 100.0);
            candles.push(make_candle(62 * 60_000, 100.0, close + 0.25, 99.75, close, 120.0, Some(0.8)));

            let mut analyzer = EarlyPumpAnalyzer::new(EarlyPumpConfig::default());
            analyzer
                .analyze(&candles, "ETH/USDT", 0, PumpConfirmations::none())
                .map(|s| s.grade)
                .unwrap_or(Grade::C)
        };

        let grades = [run(1.6), run(2.5), run(3.5)];
        assert!(grades[0] <= grades[1]);
        assert!(grades[1] <= grades[2]);
        assert!(grades[0] >= Grade::BPlus);
    }

    // ============================================================================
    // Consensus -> strategy -> sizing pipeline
    // ============================================================================

    #[test]
    fn test_full_decision_pipeline() {
        let metrics_for = |flow: f64| PlatformMetrics {
            cumulative_net_flow: flow,
            buy_sell_ratio: 1.3,
            current_price: 100.0,
            support_low: 92.0,
            resistance_high: 112.0,
            atr: 2.0,
        };
        let mut metrics = HashMap::new();
        metrics.insert(Platform::Binance, metrics_for(8_000_000.0));
        metrics.insert(Platform::Okx, metrics_for(6_000_000.0));
        metrics.insert(Platform::Bybit, metrics_for(4_000_000.0));
        metrics.insert(Platform::Coinbase, metrics_for(30_000_000.0));

        let consensus_analyzer = ConsensusAnalyzer::default();
        let consensus = consensus_analyzer.consensus(&metrics);
        assert_eq!(consensus, ConsensusLabel::StrongBullish);

        let signals = consensus_analyzer.signals(&metrics, "ETH/USDT", 4, None, 0);
        assert!(signals.iter().any(|s| s.kind == SignalKind::GlobalSyncBullish));
        assert!(signals
            .iter()
            .any(|s| s.kind == SignalKind::InstitutionalAccumulation));

        // Two cycles build the streak, then the entry fires with stops.
        let mut strategy = EntryExitStrategy::new(StrategyConfig::default());
        assert!(strategy
            .evaluate("ETH/USDT", &metrics, &consensus, &signals, MarketRegime::Bull, None, 0)
            .is_none());
        let rec = strategy
            .evaluate(
                "ETH/USDT",
                &metrics,
                &consensus,
                &signals,
                MarketRegime::Bull,
                Some(true),
                300_000,
            )
            .expect("entry after streak");
        assert_eq!(rec.action, Action::Entry);
        assert_eq!(rec.side, Side::Long);
        let stop = rec.stop_loss.unwrap();

        // Size the recommendation and check the caps hold.
        let sizer = PositionSizer::new(SizingConfig::default());
        let position = sizer
            .compute("ETH/USDT", rec.price, stop, VolatilityLevel::Normal, rec.take_profit)
            .unwrap();
        assert!(position.notional <= 2_000.0 + 1e-9);
        assert!(position.size > 0.0);
        assert!((position.size * rec.price - position.notional).abs() < 1e-6);
    }

    // ============================================================================
    // Backtester
    // ============================================================================

    /// Accumulation then a ramp: long entries that hit their targets.
    fn trending_tape() -> Vec<StandardCandle> {
        let mut candles = Vec::new();
        for i in 0..120i64 {
            candles.push(make_candle(i * 60_000, 100.0, 101.0, 99.0, 100.0, 2_500.0, Some(0.8)));
        }
        for i in 0..60i64 {
            let px = 100.0 + i as f64 * 0.4;
            candles.push(make_candle(
                (120 + i) * 60_000,
                px,
                px + 0.9,
                px - 0.2,
                px + 0.4,
                2_500.0,
                Some(0.8),
            ));
        }
        candles
    }

    #[test]
    fn test_backtest_produces_trades_and_report() {
        let bt = Backtester::new("ETH/USDT", trending_tape(), BacktestConfig::default());
        let report = bt.run(&BacktestParams::default());

        assert!(report.total_trades >= 1);
        assert_eq!(report.wins + report.losses, report.total_trades);
        assert!(report.win_rate >= 0.0 && report.win_rate <= 1.0);
        let expected_balance = 10_000.0 + report.total_pnl;
        assert!((report.final_balance - expected_balance).abs() < 1e-6);
        for trade in &report.trades {
            assert!(trade.exit_time_ms >= trade.entry_time_ms);
            assert!(matches!(trade.reason, TradeExit::StopLoss | TradeExit::TakeProfit));
        }
    }

    #[test]
    fn test_backtest_is_reproducible() {
        let tape = trending_tape();
        let a = Backtester::new("ETH/USDT", tape.clone(), BacktestConfig::default())
            .run(&BacktestParams::default());
        let b = Backtester::new("ETH/USDT", tape, BacktestConfig::default())
            .run(&BacktestParams::default());
        assert_eq!(a.total_trades, b.total_trades);
        assert_eq!(a.total_pnl, b.total_pnl);
    }

    #[test]
    fn test_resample_feeds_higher_timeframes() {
        let tape = trending_tape();
        let df_5m = resample(&tape, Timeframe::Min5);
        let df_1h = resample(&tape, Timeframe::Hour1);

        assert_eq!(df_5m.len(), 36);
        assert_eq!(df_1h.len(), 3);
        // Left-labeled buckets on exact boundaries.
        assert_eq!(df_5m[1].timestamp_ms, 300_000);
        assert_eq!(df_1h[1].timestamp_ms, 3_600_000);
        // Volume is conserved.
        let total_1m: f64 = tape.iter().map(|c| c.volume).sum();
        let total_1h: f64 = df_1h.iter().map(|c| c.volume).sum();
        assert!((total_1m - total_1h).abs() < 1e-6);
    }

    #[test]
    fn test_grid_search_selects_deterministically() {
        let bt = Backtester::new("ETH/USDT", trending_tape(), BacktestConfig::default());
        let grid = ParamGrid {
            min_total_flow: vec![50_000.0, 100_000.0],
            min_ratio: vec![1.2],
            atr_sl_mult: vec![1.0, 1.5],
            atr_tp_mult: vec![2.0],
            min_consensus_bars: vec![1, 2],
        };

        let first = bt.grid_search(&grid, 100);
        let second = bt.grid_search(&grid, 100);
        assert_eq!(first.evaluated, 8);
        assert_eq!(first.best_params, second.best_params);

        let best = first.best_report.expect("at least one run traded");
        assert!(best.total_trades >= 1);
    }
}
