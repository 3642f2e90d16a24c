use std::future::Future;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};

use crate::strategy::{StrategySession, TickOutcome};
use crate::{Error, Result};

/// Why `run_session` returned
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The session reached a terminal decision
    Completed(TickOutcome),
    /// The shutdown signal fired between ticks
    Cancelled,
}

/// Drive a session once per `poll_every` until it exits, halts, or is cancelled
///
/// A cycle that fails on a bad sample or a rejected request is logged and the
/// next tick runs as usual. Only an order failure, an invalid session state or a
/// configuration error ends the run with `Err`.
///
/// The first tick fires immediately. A slow cycle never overlaps the next one;
/// missed ticks are skipped rather than bunched up. Cancellation is only observed
/// between cycles, so an in-flight order is never abandoned halfway.
pub async fn run_session<S>(
    session: &mut StrategySession,
    poll_every: Duration,
    shutdown: S,
) -> Result<RunOutcome>
where
    S: Future<Output = ()>,
{
    let mut ticker = interval(poll_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    let mut tick_count = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!(
                    symbol = %session.config().symbol,
                    ticks = tick_count,
                    "Shutdown requested, stopping session"
                );
                return Ok(RunOutcome::Cancelled);
            }
            _ = ticker.tick() => {}
        }

        tick_count += 1;
        let outcome = match session.tick().await {
            Ok(outcome) => outcome,
            Err(e) if ends_run(session, &e) => return Err(e),
            Err(e) => {
                tracing::error!(
                    symbol = %session.config().symbol,
                    tick = tick_count,
                    error = %e,
                    "Cycle failed, polling continues"
                );
                continue;
            }
        };

        if outcome.is_terminal() {
            tracing::info!(
                symbol = %session.config().symbol,
                ticks = tick_count,
                "Session finished"
            );
            return Ok(RunOutcome::Completed(outcome));
        }
    }
}

/// Errors after which further ticks cannot do anything useful
fn ends_run(session: &StrategySession, error: &Error) -> bool {
    session.halted_reason().is_some()
        || matches!(
            error,
            Error::OrderFailure(_) | Error::InvalidState(_) | Error::Config(_)
        )
}
