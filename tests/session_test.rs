use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;

use trendbot::backtest::{MarketScenario, ReplayFeed, SyntheticKlineGenerator};
use trendbot::config::StrategyConfig;
use trendbot::execution::{
    run_session, OrderExecutor, PaperExecutor, PriceCache, PriceFeed, PriceFeedManager, RunOutcome,
};
use trendbot::indicators::EnvelopeCalculator;
use trendbot::strategy::{Decision, PositionState, StrategySession, TickOutcome};
use trendbot::{Error, Kline, OrderAck, OrderSide, Result};

fn kline(hour: i64, close: f64) -> Kline {
    Kline {
        open_time: DateTime::from_timestamp(hour * 3600, 0).unwrap(),
        high: close,
        low: close,
        close,
    }
}

/// Five flat hourly klines at 100 (hours 0..=4)
fn flat_history() -> Vec<Kline> {
    (0..5).map(|h| kline(h, 100.0)).collect()
}

fn create_test_config(period: usize, multiplier: f64) -> StrategyConfig {
    StrategyConfig {
        atr_period: period,
        atr_multiplier: multiplier,
        stop_loss_pct: 0.02,
        take_profit_pct: 0.02,
        ..StrategyConfig::default()
    }
}

/// History requests return a fixed series; latest-kline requests follow a script
struct MockFeed {
    history: Vec<Kline>,
    history_failures: Mutex<VecDeque<Error>>,
    latest: Mutex<VecDeque<Result<Kline>>>,
    calls: AtomicUsize,
}

impl MockFeed {
    fn new(history: Vec<Kline>, latest: Vec<Result<Kline>>) -> Arc<Self> {
        Arc::new(Self {
            history,
            history_failures: Mutex::new(VecDeque::new()),
            latest: Mutex::new(latest.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn fail_history_with(&self, error: Error) {
        self.history_failures.lock().unwrap().push_back(error);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceFeed for MockFeed {
    async fn fetch_klines(&self, _symbol: &str, _interval: &str, limit: u32) -> Result<Vec<Kline>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if limit > 1 {
            if let Some(e) = self.history_failures.lock().unwrap().pop_front() {
                return Err(e);
            }
            return Ok(self.history.clone());
        }

        self.latest
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::InvalidState("script exhausted".into())))
            .map(|k| vec![k])
    }
}

/// Rejects every order, counting attempts
#[derive(Default)]
struct FailingExecutor {
    attempts: AtomicUsize,
}

#[async_trait]
impl OrderExecutor for FailingExecutor {
    async fn submit_market_order(
        &self,
        _symbol: &str,
        _side: OrderSide,
        _quantity: f64,
    ) -> Result<OrderAck> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::OrderFailure("insufficient balance".into()))
    }
}

fn create_test_session(
    config: StrategyConfig,
    feed: Arc<MockFeed>,
    executor: Arc<dyn OrderExecutor>,
) -> StrategySession {
    let feeds = PriceFeedManager::new(feed, PriceCache::new());
    StrategySession::new(config, feeds, executor).unwrap()
}

#[tokio::test]
async fn test_hold_then_stop_loss_exit() {
    let _ = tracing_subscriber::fmt::try_init();

    let feed = MockFeed::new(
        flat_history(),
        vec![
            Ok(kline(4, 100.0)), // same candle as history end
            Ok(kline(5, 100.5)),
            Ok(kline(6, 97.0)),
        ],
    );
    let executor = PaperExecutor::new();
    let mut session = create_test_session(
        create_test_config(3, 2.0),
        feed.clone(),
        Arc::new(executor.clone()),
    );
    assert_eq!(session.position_state(), PositionState::PositionOpen);

    // Flat history: ATR 0, both bands at 100
    let outcome = session.tick().await.unwrap();
    match outcome {
        TickOutcome::Hold { price, envelope } => {
            assert_eq!(price, 100.0);
            assert_eq!(envelope.upper, 100.0);
            assert_eq!(envelope.trend, 100.0);
        }
        other => panic!("expected Hold, got {:?}", other),
    }
    assert_eq!(session.series().unwrap().len(), 5);
    assert!(session.signals().upper_bounds().is_empty());

    // TR 0.5 -> ATR 1/6, trend = upper ~ 100.583
    let outcome = session.tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Hold { .. }));
    assert_eq!(session.signals().upper_bounds().len(), 1);

    // TR 3.5 -> ATR 4/3, trend ~ 101.417; 97 is below 98% of it
    let outcome = session.tick().await.unwrap();
    match outcome {
        TickOutcome::Exited {
            decision,
            price,
            trend,
            kline_time,
            ack,
        } => {
            assert_eq!(decision, Decision::StopLossExit);
            assert_eq!(price, 97.0);
            assert!((trend - (98.75 + 8.0 / 3.0)).abs() < 1e-9);
            assert_eq!(kline_time, kline(6, 97.0).open_time);
            assert_eq!(ack.side, OrderSide::Sell);
            assert_eq!(ack.symbol, "BTCUSDT");
        }
        other => panic!("expected Exited, got {:?}", other),
    }

    assert_eq!(session.position_state(), PositionState::Closed);
    assert!(session.is_finished());
    assert_eq!(executor.orders().len(), 1);
    assert_eq!(session.signals().upper_bounds().len(), 2);
    assert_eq!(session.signals().lower_bounds().len(), 2);

    // Terminal: no further fetches or orders
    let calls = feed.calls();
    assert_eq!(session.tick().await.unwrap(), TickOutcome::Finished);
    assert_eq!(feed.calls(), calls);
    assert_eq!(executor.orders().len(), 1);
}

#[tokio::test]
async fn test_take_profit_on_breakout() {
    let feed = MockFeed::new(flat_history(), vec![Ok(kline(5, 110.0))]);
    let executor = PaperExecutor::new();
    let mut session = create_test_session(
        create_test_config(3, 0.5),
        feed,
        Arc::new(executor.clone()),
    );

    // TR 10 -> ATR 10/3; 110 breaks the upper band so trend follows the lower one
    let outcome = session.tick().await.unwrap();
    match outcome {
        TickOutcome::Exited {
            decision, trend, ..
        } => {
            assert_eq!(decision, Decision::TakeProfitExit);
            assert!((trend - (105.0 - 5.0 / 3.0)).abs() < 1e-9);
        }
        other => panic!("expected Exited, got {:?}", other),
    }
    assert_eq!(executor.orders().len(), 1);
}

#[tokio::test]
async fn test_warm_up_records_nothing() {
    let history = vec![kline(0, 100.0), kline(1, 100.0)];
    let feed = MockFeed::new(
        history,
        vec![
            Ok(kline(2, 100.0)),
            Ok(kline(3, 100.0)),
            Ok(kline(4, 100.0)),
        ],
    );
    let executor = PaperExecutor::new();
    let mut session = create_test_session(
        create_test_config(5, 3.0),
        feed,
        Arc::new(executor.clone()),
    );

    assert_eq!(
        session.tick().await.unwrap(),
        TickOutcome::WarmingUp { price: 100.0 }
    );
    assert_eq!(
        session.tick().await.unwrap(),
        TickOutcome::WarmingUp { price: 100.0 }
    );
    assert!(session.signals().latest_upper().is_err());
    assert!(session.latest_envelope().is_none());

    // Fifth sample completes the ATR window
    let outcome = session.tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Hold { .. }));
    assert_eq!(session.signals().upper_bounds(), &[100.0]);
    assert_eq!(session.signals().lower_bounds(), &[100.0]);
    assert!(executor.orders().is_empty());
}

#[tokio::test]
async fn test_record_flags_limit_history() {
    let feed = MockFeed::new(
        flat_history(),
        vec![Ok(kline(5, 100.0)), Ok(kline(6, 100.0))],
    );
    let config = StrategyConfig {
        record_lower: false,
        ..create_test_config(3, 2.0)
    };
    let mut session = create_test_session(config, feed, Arc::new(PaperExecutor::new()));

    session.tick().await.unwrap();
    session.tick().await.unwrap();

    assert_eq!(session.signals().upper_bounds().len(), 2);
    assert!(session.signals().lower_bounds().is_empty());
    assert!(matches!(
        session.signals().latest_lower(),
        Err(Error::EmptyHistory(_))
    ));
}

#[tokio::test]
async fn test_order_failure_halts_session() {
    let feed = MockFeed::new(flat_history(), vec![Ok(kline(5, 97.0)), Ok(kline(6, 96.0))]);
    let executor = Arc::new(FailingExecutor::default());
    let mut session = create_test_session(create_test_config(3, 2.0), feed, executor.clone());

    let err = session.tick().await.unwrap_err();
    assert!(matches!(err, Error::OrderFailure(ref reason) if reason == "insufficient balance"));
    assert_eq!(session.halted_reason(), Some("insufficient balance"));

    // No second attempt
    let err = session.tick().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert_eq!(executor.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retryable_feed_errors_skip_the_cycle() {
    let feed = MockFeed::new(
        flat_history(),
        vec![
            Err(Error::Network("connection reset".into())),
            Ok(kline(5, 100.0)),
        ],
    );
    feed.fail_history_with(Error::RateLimited("429".into()));
    let mut session = create_test_session(
        create_test_config(3, 2.0),
        feed.clone(),
        Arc::new(PaperExecutor::new()),
    );

    // History fetch rate limited: nothing loaded yet
    assert!(matches!(
        session.tick().await.unwrap(),
        TickOutcome::Skipped { .. }
    ));
    assert!(session.series().is_none());

    // History loads, latest kline fails
    assert!(matches!(
        session.tick().await.unwrap(),
        TickOutcome::Skipped { .. }
    ));
    assert_eq!(session.series().unwrap().len(), 5);

    assert!(matches!(
        session.tick().await.unwrap(),
        TickOutcome::Hold { .. }
    ));
    assert_eq!(session.series().unwrap().len(), 6);
    assert_eq!(feed.calls(), 4);
}

#[tokio::test]
async fn test_non_retryable_feed_error_aborts() {
    let feed = MockFeed::new(flat_history(), vec![]);
    feed.fail_history_with(Error::Api("400: Invalid symbol".into()));
    let mut session = create_test_session(
        create_test_config(3, 2.0),
        feed,
        Arc::new(PaperExecutor::new()),
    );

    assert!(matches!(session.tick().await, Err(Error::Api(_))));
    assert_eq!(session.position_state(), PositionState::PositionOpen);
}

#[tokio::test]
async fn test_stale_kline_is_rejected() {
    let feed = MockFeed::new(flat_history(), vec![Ok(kline(3, 100.0))]);
    let mut session = create_test_session(
        create_test_config(3, 2.0),
        feed,
        Arc::new(PaperExecutor::new()),
    );

    assert!(matches!(session.tick().await, Err(Error::InvalidInput(_))));
    assert_eq!(session.series().unwrap().len(), 5);
    assert_eq!(session.position_state(), PositionState::PositionOpen);
}

#[tokio::test]
async fn test_forming_kline_close_tracks_latest_poll() {
    // Hour 4 is still forming when history is fetched and moves twice before hour 5 opens
    let feed = MockFeed::new(
        flat_history(),
        vec![
            Ok(kline(4, 95.0)),
            Ok(kline(4, 90.0)),
            Ok(kline(5, 100.0)),
        ],
    );
    let config = StrategyConfig {
        assume_position_open: false,
        ..create_test_config(3, 2.0)
    };
    let mut session = create_test_session(config, feed, Arc::new(PaperExecutor::new()));

    match session.tick().await.unwrap() {
        TickOutcome::Idle { price, envelope } => {
            assert_eq!(price, 95.0);
            assert!((envelope.upper - (97.5 + 10.0 / 3.0)).abs() < 1e-9);
        }
        other => panic!("expected Idle, got {:?}", other),
    }

    // Second poll rebuilds from the closed klines, not on top of 95
    match session.tick().await.unwrap() {
        TickOutcome::Idle { envelope, .. } => {
            assert!((envelope.upper - (95.0 + 20.0 / 3.0)).abs() < 1e-9);
        }
        other => panic!("expected Idle, got {:?}", other),
    }
    assert_eq!(session.series().unwrap().len(), 5);
    assert!(session.signals().upper_bounds().is_empty());

    session.tick().await.unwrap();

    let closes = vec![100.0, 100.0, 100.0, 100.0, 90.0, 100.0];
    assert_eq!(session.series().unwrap().closes(), closes);

    let expected = EnvelopeCalculator::new(3, 2.0)
        .unwrap()
        .compute_batch(&closes)
        .unwrap()
        .latest()
        .unwrap();
    let streamed = session.latest_envelope().unwrap();
    assert!((streamed.upper - expected.upper).abs() < 1e-9);
    assert!((streamed.lower - expected.lower).abs() < 1e-9);
    assert!((streamed.trend - expected.trend).abs() < 1e-9);
    assert!((streamed.upper - (95.0 + 40.0 / 3.0)).abs() < 1e-9);
    assert!((streamed.lower - (95.0 - 40.0 / 3.0)).abs() < 1e-9);
    assert_eq!(session.signals().upper_bounds().len(), 1);
}

#[tokio::test]
async fn test_idle_session_tracks_without_trading() {
    let feed = MockFeed::new(flat_history(), vec![Ok(kline(5, 50.0))]);
    let executor = PaperExecutor::new();
    let config = StrategyConfig {
        assume_position_open: false,
        ..create_test_config(3, 2.0)
    };
    let mut session = create_test_session(config, feed, Arc::new(executor.clone()));
    assert_eq!(session.position_state(), PositionState::Idle);

    let outcome = session.tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Idle { price, .. } if price == 50.0));
    assert!(executor.orders().is_empty());
    assert_eq!(session.signals().upper_bounds().len(), 1);

    session.open_position().unwrap();
    assert_eq!(session.position_state(), PositionState::PositionOpen);
    assert!(matches!(session.open_position(), Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let feed = MockFeed::new(flat_history(), vec![]);
    let feeds = PriceFeedManager::new(feed, PriceCache::new());
    let config = StrategyConfig {
        stop_loss_pct: 1.5,
        ..StrategyConfig::default()
    };

    let result = StrategySession::new(config, feeds, Arc::new(PaperExecutor::new()));
    assert!(matches!(result, Err(Error::InvalidParameter(_))));
}

#[tokio::test]
async fn test_streamed_envelope_matches_batch() {
    let data = SyntheticKlineGenerator::new(3).generate(MarketScenario::Volatile, 80, 60);
    let feed = Arc::new(ReplayFeed::new("BTCUSDT", data.clone(), 50));
    let config = StrategyConfig {
        assume_position_open: false,
        history_limit: 50,
        ..StrategyConfig::default()
    };
    let feeds = PriceFeedManager::new(feed, PriceCache::new());
    let mut session = StrategySession::new(config, feeds, Arc::new(PaperExecutor::new())).unwrap();

    for _ in 0..30 {
        assert!(matches!(
            session.tick().await.unwrap(),
            TickOutcome::Idle { .. }
        ));
    }

    let closes: Vec<f64> = data.iter().map(|k| k.close).collect();
    assert_eq!(session.series().unwrap().closes(), closes);

    let batch = EnvelopeCalculator::new(10, 3.0)
        .unwrap()
        .compute_batch(&closes)
        .unwrap();
    let streamed = session.latest_envelope().unwrap();
    let expected = batch.latest().unwrap();
    assert!((streamed.upper - expected.upper).abs() < 1e-9);
    assert!((streamed.lower - expected.lower).abs() < 1e-9);
    assert!((streamed.trend - expected.trend).abs() < 1e-9);

    let batch_upper: Vec<f64> = batch.upper_band()[50..].iter().map(|v| v.unwrap()).collect();
    let recorded = session.signals().upper_bounds();
    assert_eq!(recorded.len(), batch_upper.len());
    for (a, b) in recorded.iter().zip(&batch_upper) {
        assert!((a - b).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_runner_completes_on_exit() {
    let feed = MockFeed::new(
        flat_history(),
        vec![Ok(kline(5, 100.5)), Ok(kline(6, 97.0))],
    );
    let executor = PaperExecutor::new();
    let mut session = create_test_session(
        create_test_config(3, 2.0),
        feed,
        Arc::new(executor.clone()),
    );

    let outcome = run_session(
        &mut session,
        Duration::from_millis(1),
        std::future::pending::<()>(),
    )
    .await
    .unwrap();

    assert!(matches!(
        outcome,
        RunOutcome::Completed(TickOutcome::Exited {
            decision: Decision::StopLossExit,
            ..
        })
    ));
    assert_eq!(executor.orders().len(), 1);
}

#[tokio::test]
async fn test_runner_cancelled_before_first_tick() {
    let feed = MockFeed::new(flat_history(), vec![Ok(kline(5, 97.0))]);
    let mut session = create_test_session(
        create_test_config(3, 2.0),
        feed.clone(),
        Arc::new(PaperExecutor::new()),
    );

    let outcome = run_session(&mut session, Duration::from_millis(1), async {})
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(feed.calls(), 0);
    assert_eq!(session.position_state(), PositionState::PositionOpen);
}

#[tokio::test]
async fn test_runner_propagates_order_failure() {
    let feed = MockFeed::new(flat_history(), vec![Ok(kline(5, 97.0))]);
    let mut session = create_test_session(
        create_test_config(3, 2.0),
        feed,
        Arc::new(FailingExecutor::default()),
    );

    let result = run_session(
        &mut session,
        Duration::from_millis(1),
        std::future::pending::<()>(),
    )
    .await;

    assert!(matches!(result, Err(Error::OrderFailure(_))));
    assert!(session.halted_reason().is_some());
}

#[tokio::test]
async fn test_runner_keeps_polling_after_bad_sample() {
    let feed = MockFeed::new(
        flat_history(),
        vec![Ok(kline(5, f64::NAN)), Ok(kline(6, 97.0))],
    );
    let executor = PaperExecutor::new();
    let mut session = create_test_session(
        create_test_config(3, 2.0),
        feed,
        Arc::new(executor.clone()),
    );

    let outcome = run_session(
        &mut session,
        Duration::from_millis(1),
        std::future::pending::<()>(),
    )
    .await
    .unwrap();

    match outcome {
        RunOutcome::Completed(TickOutcome::Exited {
            decision, price, ..
        }) => {
            assert_eq!(decision, Decision::StopLossExit);
            assert_eq!(price, 97.0);
        }
        other => panic!("expected a stop-loss exit, got {:?}", other),
    }
    assert_eq!(executor.orders().len(), 1);
    // The NaN kline was never stored
    assert_eq!(session.series().unwrap().len(), 6);
}

#[tokio::test]
async fn test_runner_keeps_polling_after_stale_kline() {
    let feed = MockFeed::new(
        flat_history(),
        vec![Ok(kline(2, 100.0)), Ok(kline(5, 97.0))],
    );
    let executor = PaperExecutor::new();
    let mut session = create_test_session(
        create_test_config(3, 2.0),
        feed,
        Arc::new(executor.clone()),
    );

    let outcome = run_session(
        &mut session,
        Duration::from_millis(1),
        std::future::pending::<()>(),
    )
    .await
    .unwrap();

    assert!(matches!(
        outcome,
        RunOutcome::Completed(TickOutcome::Exited {
            decision: Decision::StopLossExit,
            ..
        })
    ));
    assert_eq!(executor.orders().len(), 1);
}

#[tokio::test]
async fn test_crash_replay_stops_out() {
    let data = SyntheticKlineGenerator::new(7)
        .with_base_price(100.0)
        .generate(MarketScenario::Crash, 200, 60);
    let feed = Arc::new(ReplayFeed::new("BTCUSDT", data, 100));
    let executor = PaperExecutor::new();
    let feeds = PriceFeedManager::new(feed.clone(), PriceCache::new());
    let mut session =
        StrategySession::new(StrategyConfig::default(), feeds, Arc::new(executor.clone())).unwrap();

    let outcome = run_session(
        &mut session,
        Duration::from_millis(1),
        std::future::pending::<()>(),
    )
    .await
    .unwrap();

    match outcome {
        RunOutcome::Completed(TickOutcome::Exited { decision, .. }) => {
            assert_eq!(decision, Decision::StopLossExit);
        }
        other => panic!("expected a stop-loss exit, got {:?}", other),
    }
    assert_eq!(executor.orders().len(), 1);
    assert!(feed.remaining() > 0);
}
