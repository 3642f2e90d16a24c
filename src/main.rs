use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use trendbot::api::BinanceClient;
use trendbot::backtest::{MarketScenario, ReplayFeed, SyntheticKlineGenerator};
use trendbot::config::Settings;
use trendbot::execution::{
    run_session, OrderExecutor, PaperExecutor, PriceCache, PriceFeedManager, RunOutcome,
};
use trendbot::strategy::{StrategySession, TickOutcome};
use trendbot::Error;

#[derive(Parser)]
#[command(name = "trendbot", version, about = "Trend-envelope stop-loss / take-profit bot")]
struct Cli {
    /// Settings file (TOML); environment variables TRENDBOT__* override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the configured position against live exchange prices
    Run {
        /// Fill exit orders locally instead of sending them to the exchange
        #[arg(long)]
        paper: bool,
    },
    /// Run the session over synthetic klines with paper execution
    Replay {
        /// uptrend, downtrend, sideways, volatile or crash
        #[arg(long, default_value = "crash")]
        scenario: MarketScenario,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Total klines generated (history plus streamed)
        #[arg(long, default_value_t = 300)]
        klines: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings =
        Settings::load(cli.config.as_deref()).context("Failed to load trendbot settings")?;

    match cli.command {
        Commands::Run { paper } => run_live(settings, paper).await,
        Commands::Replay {
            scenario,
            seed,
            klines,
        } => run_replay(settings, scenario, seed, klines).await,
    }
}

fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trendbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_live(settings: Settings, paper: bool) -> anyhow::Result<()> {
    let strategy = settings.strategy.clone();
    let client = Arc::new(BinanceClient::new(&settings.binance)?);

    let executor: Arc<dyn OrderExecutor> = if paper {
        Arc::new(PaperExecutor::new())
    } else {
        if settings.binance.api_key.is_none() || settings.binance.api_secret.is_none() {
            anyhow::bail!(
                "TRENDBOT__BINANCE__API_KEY and TRENDBOT__BINANCE__API_SECRET are required (or pass --paper)"
            );
        }
        client.clone()
    };

    let feeds = PriceFeedManager::new(client, PriceCache::new());
    let mut session = StrategySession::new(strategy.clone(), feeds, executor)?;

    tracing::info!("🚀 trendbot starting");
    tracing::info!("  Symbol: {} ({})", strategy.symbol, strategy.interval);
    tracing::info!("  Quantity: {}", strategy.quantity);
    tracing::info!(
        "  Stop loss: {}%  Take profit: {}%",
        strategy.stop_loss_pct * 100.0,
        strategy.take_profit_pct * 100.0
    );
    tracing::info!(
        "  ATR period: {}  multiplier: {}",
        strategy.atr_period,
        strategy.atr_multiplier
    );
    tracing::info!("  Poll every: {}s", strategy.poll_interval_secs);
    tracing::info!("  Execution: {}", if paper { "paper" } else { "live" });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let outcome = run_session(&mut session, strategy.poll_interval(), shutdown).await;
    report(&session, outcome)
}

async fn run_replay(
    settings: Settings,
    scenario: MarketScenario,
    seed: u64,
    klines: usize,
) -> anyhow::Result<()> {
    let strategy = settings.strategy;
    let history_len = strategy.history_limit as usize;
    if klines <= history_len {
        anyhow::bail!(
            "--klines ({}) must exceed the history limit ({})",
            klines,
            history_len
        );
    }

    let data = SyntheticKlineGenerator::new(seed).generate(scenario, klines, 60);
    let feed = Arc::new(ReplayFeed::new(strategy.symbol.clone(), data, history_len));
    let executor = PaperExecutor::new();

    let feeds = PriceFeedManager::new(feed, PriceCache::new());
    let mut session = StrategySession::new(strategy, feeds, Arc::new(executor.clone()))?;

    tracing::info!(?scenario, seed, klines, "Replaying synthetic market");

    let outcome = run_session(
        &mut session,
        Duration::from_millis(1),
        std::future::pending::<()>(),
    )
    .await;

    tracing::info!(
        "Recorded {} upper / {} lower bounds, {} paper orders",
        session.signals().upper_bounds().len(),
        session.signals().lower_bounds().len(),
        executor.orders().len()
    );

    if let Err(Error::InvalidState(reason)) = &outcome {
        if session.halted_reason().is_none() && reason == "replay exhausted" {
            tracing::info!(
                "Replay exhausted without an exit, position state {:?}",
                session.position_state()
            );
            return Ok(());
        }
    }

    report(&session, outcome)
}

fn report(
    session: &StrategySession,
    outcome: trendbot::Result<RunOutcome>,
) -> anyhow::Result<()> {
    match outcome {
        Ok(RunOutcome::Completed(TickOutcome::Exited {
            decision,
            price,
            trend,
            ack,
            ..
        })) => {
            tracing::info!(
                "✅ {:?} at {:.2} (trend {:.2}), order {}",
                decision,
                price,
                trend,
                ack.order_id
            );
            Ok(())
        }
        Ok(RunOutcome::Completed(other)) => {
            tracing::info!("Session ended: {:?}", other);
            Ok(())
        }
        Ok(RunOutcome::Cancelled) => {
            tracing::info!(
                "👋 Stopped by operator, position state {:?}",
                session.position_state()
            );
            Ok(())
        }
        Err(e) => {
            if let Some(reason) = session.halted_reason() {
                tracing::error!("❌ Session halted, check the position manually: {}", reason);
            }
            Err(e).context(format!("Session for {} failed", session.config().symbol))
        }
    }
}
