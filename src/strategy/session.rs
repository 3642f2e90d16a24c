use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::StrategyConfig;
use crate::execution::{OrderExecutor, PriceFeedManager};
use crate::indicators::{calculate_atr, EnvelopeCalculator, EnvelopePoint, EnvelopeState};
use crate::models::{Kline, OrderAck, OrderSide, PriceSeries};
use crate::strategy::decision::{Decision, DecisionEngine, PositionState};
use crate::strategy::signals::SignalAccumulator;
use crate::{Error, Result};

/// What one `tick()` did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Feed failed with a retryable error; try again next tick
    Skipped { reason: String },
    /// Not enough history for a trend value yet
    WarmingUp { price: f64 },
    /// Envelope tracked but no position to manage
    Idle { price: f64, envelope: EnvelopePoint },
    Hold { price: f64, envelope: EnvelopePoint },
    /// Terminal decision with its (single) sell order acknowledged
    Exited {
        decision: Decision,
        price: f64,
        trend: f64,
        kline_time: DateTime<Utc>,
        ack: OrderAck,
    },
    /// The session already exited; nothing left to do
    Finished,
}

impl TickOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TickOutcome::Exited { .. } | TickOutcome::Finished)
    }
}

/// Streaming state, present once history has been loaded
///
/// The newest kline in `series` may still be forming, so its close can change
/// between polls. `closed` covers every kline before it; `envelope` is `closed`
/// extended with the newest close and is rebuilt whenever that close moves.
struct StreamState {
    series: PriceSeries,
    closed: EnvelopeState,
    envelope: EnvelopeState,
}

impl StreamState {
    /// A newer kline arrived: the previous newest one is final
    fn advance(&mut self, kline: Kline) -> Result<Option<EnvelopePoint>> {
        let mut envelope = self.envelope.clone();
        let point = envelope.extend_one(kline.close)?;
        self.series.push(kline)?;
        self.closed = std::mem::replace(&mut self.envelope, envelope);
        Ok(point)
    }

    /// Another poll of the forming kline
    fn refresh(&mut self, kline: Kline) -> Result<Option<EnvelopePoint>> {
        let mut envelope = self.closed.clone();
        let point = envelope.extend_one(kline.close)?;
        self.series.update_last(kline)?;
        self.envelope = envelope;
        Ok(point)
    }
}

/// One symbol's trading session
///
/// Owns its envelope state, decision engine and bound history outright, so
/// sessions for different symbols share nothing but the feed and executor.
/// An external scheduler calls `tick()` once per polling interval.
pub struct StrategySession {
    config: StrategyConfig,
    feeds: PriceFeedManager,
    executor: Arc<dyn OrderExecutor>,
    calculator: EnvelopeCalculator,
    engine: DecisionEngine,
    signals: SignalAccumulator,
    stream: Option<StreamState>,
    halted: Option<String>,
}

impl StrategySession {
    pub fn new(
        config: StrategyConfig,
        feeds: PriceFeedManager,
        executor: Arc<dyn OrderExecutor>,
    ) -> Result<Self> {
        config.validate()?;

        let calculator = EnvelopeCalculator::new(config.atr_period, config.atr_multiplier)?;
        let mut engine = DecisionEngine::new(config.stop_loss_pct, config.take_profit_pct)?;
        if config.assume_position_open {
            engine.open_position()?;
        }

        Ok(Self {
            config,
            feeds,
            executor,
            calculator,
            engine,
            signals: SignalAccumulator::new(),
            stream: None,
            halted: None,
        })
    }

    /// External entry decision for a session that started Idle
    pub fn open_position(&mut self) -> Result<()> {
        self.engine.open_position()?;
        tracing::info!(symbol = %self.config.symbol, "Position opened externally");
        Ok(())
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn position_state(&self) -> PositionState {
        self.engine.state()
    }

    pub fn signals(&self) -> &SignalAccumulator {
        &self.signals
    }

    /// Session-local price history (cache snapshot plus streamed klines)
    pub fn series(&self) -> Option<&PriceSeries> {
        self.stream.as_ref().map(|s| &s.series)
    }

    pub fn latest_envelope(&self) -> Option<EnvelopePoint> {
        self.stream.as_ref().and_then(|s| s.envelope.latest())
    }

    pub fn is_finished(&self) -> bool {
        self.engine.is_closed()
    }

    /// Set after an order failure on an exit; position state is unknown
    pub fn halted_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// Run one fetch-compute-decide cycle
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        if let Some(reason) = &self.halted {
            return Err(Error::InvalidState(format!(
                "session for {} halted after order failure: {}",
                self.config.symbol, reason
            )));
        }
        if self.engine.is_closed() {
            return Ok(TickOutcome::Finished);
        }

        if self.stream.is_none() {
            if let Err(e) = self.bootstrap().await {
                return self.feed_failure(e);
            }
        }

        let kline = match self
            .feeds
            .latest(&self.config.symbol, &self.config.interval)
            .await
        {
            Ok(kline) => kline,
            Err(e) => return self.feed_failure(e),
        };

        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::InvalidState("price history not loaded".to_string()));
        };

        let last_time = stream.series.last().open_time;
        if kline.open_time > last_time {
            if let Some(point) = stream.advance(kline)? {
                self.signals.record_point(&point, self.config.record_flags());
            }
        } else if kline.open_time == last_time {
            stream.refresh(kline)?;
        } else {
            return self.feed_failure(Error::InvalidInput(format!(
                "latest kline {} is older than history end {}",
                kline.open_time, last_time
            )));
        }

        let price = kline.close;
        let Some(envelope) = stream.envelope.latest() else {
            tracing::info!(
                symbol = %self.config.symbol,
                price = %price,
                samples = stream.envelope.samples(),
                needed = self.calculator.period(),
                "Envelope warming up"
            );
            return Ok(TickOutcome::WarmingUp { price });
        };

        tracing::info!(
            symbol = %self.config.symbol,
            price = %price,
            upper = %envelope.upper,
            lower = %envelope.lower,
            trend = %envelope.trend,
            "Current price and trend envelope"
        );

        if self.engine.state() == PositionState::Idle {
            return Ok(TickOutcome::Idle { price, envelope });
        }

        match self.engine.evaluate(price, envelope.trend)? {
            Decision::Hold => Ok(TickOutcome::Hold { price, envelope }),
            decision => {
                self.dispatch_exit(decision, price, envelope.trend, kline.open_time)
                    .await
            }
        }
    }

    async fn bootstrap(&mut self) -> Result<()> {
        let history = self
            .feeds
            .historical(
                &self.config.symbol,
                &self.config.interval,
                self.config.history_limit,
            )
            .await?;

        let series = PriceSeries::clone(&history);
        let closes = series.closes();

        // The newest history kline may still be forming
        let (settled, forming) = closes.split_at(closes.len() - 1);
        let closed = if settled.is_empty() {
            self.calculator.state()
        } else {
            self.calculator.state_from(settled)?
        };
        let mut envelope = closed.clone();
        envelope.extend_one(forming[0])?;

        tracing::info!(
            symbol = %self.config.symbol,
            interval = %self.config.interval,
            klines = series.len(),
            period = self.calculator.period(),
            multiplier = self.calculator.multiplier(),
            atr = ?calculate_atr(&closes, self.calculator.period()),
            "Trend envelope seeded from history"
        );

        self.stream = Some(StreamState {
            series,
            closed,
            envelope,
        });
        Ok(())
    }

    /// Retryable feed errors skip the cycle; anything else aborts it
    fn feed_failure(&self, e: Error) -> Result<TickOutcome> {
        if e.is_retryable() {
            tracing::warn!(
                symbol = %self.config.symbol,
                error = %e,
                "Price feed unavailable, retrying next tick"
            );
            Ok(TickOutcome::Skipped {
                reason: e.to_string(),
            })
        } else {
            tracing::error!(symbol = %self.config.symbol, error = %e, "Cycle aborted");
            Err(e)
        }
    }

    async fn dispatch_exit(
        &mut self,
        decision: Decision,
        price: f64,
        trend: f64,
        kline_time: DateTime<Utc>,
    ) -> Result<TickOutcome> {
        let label = match decision {
            Decision::StopLossExit => "Stop loss",
            Decision::TakeProfitExit => "Take profit",
            Decision::Hold => "Hold",
        };

        match self
            .executor
            .submit_market_order(&self.config.symbol, OrderSide::Sell, self.config.quantity)
            .await
        {
            Ok(ack) => {
                tracing::info!(
                    symbol = %self.config.symbol,
                    price = %price,
                    trend = %trend,
                    time = %kline_time,
                    order_id = %ack.order_id,
                    "{} triggered",
                    label
                );
                Ok(TickOutcome::Exited {
                    decision,
                    price,
                    trend,
                    kline_time,
                    ack,
                })
            }
            Err(e) => {
                let reason = match e {
                    Error::OrderFailure(reason) => reason,
                    other => other.to_string(),
                };
                tracing::error!(
                    symbol = %self.config.symbol,
                    price = %price,
                    error = %reason,
                    "{} order failed, halting session",
                    label
                );
                self.halted = Some(reason.clone());
                Err(Error::OrderFailure(reason))
            }
        }
    }
}
