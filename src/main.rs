//! Coin Rotator - Main Entry Point
//!
//! `run` trades live on Binance, `backtest` replays the engine over historical candles.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use coin_rotator::common::clock::{Clock, SteppedClock, SystemClock};
use coin_rotator::config::load_config;
use coin_rotator::engine::{
    initialize_pairs, load_coins, BalanceSaver, Cleaner, FeeGetter, GainThreshold, JumpFinder,
    PriceGetter, SymbolBlacklist, Trader,
};
use coin_rotator::{
    AppConfig, BacktestRunner, EventBus, Exchange, FeeCache, LiveExchange, MemoryRepository,
    Repository, SimulatedExchange, SqliteRepository, TracingNotifier,
};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trade live until interrupted
    Run,
    /// Replay the engine over a past time window
    Backtest {
        /// Replay start (RFC 3339)
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        /// Replay end (RFC 3339)
        #[arg(long)]
        end: Option<DateTime<Utc>>,
        /// Simulated minutes between two ticks
        #[arg(long)]
        step_minutes: Option<u32>,
        /// Bridge balance the replay starts with
        #[arg(long)]
        balance: Option<Decimal>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // RUST_LOG wins over --log-level when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(level).into()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Coin Rotator");
    info!("Configuration file: {}", args.config);

    let mut config = load_config(Some(&args.config)).context("failed to load configuration")?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, cleaning up...");
            shutdown.cancel();
        }
    });

    match args.command {
        Command::Run => run_live(&config, cancel).await,
        Command::Backtest {
            start,
            end,
            step_minutes,
            balance,
        } => {
            let Some(backtest) = config.backtest.as_mut() else {
                bail!("the [backtest] section is required to run a backtest");
            };
            if let Some(start) = start {
                backtest.start = start;
            }
            if let Some(end) = end {
                backtest.end = end;
            }
            if let Some(step) = step_minutes {
                backtest.step_minutes = step;
            }
            if let Some(balance) = balance {
                backtest.initial_balance = balance;
            }
            config.validate()?;
            run_backtest(&config, cancel).await
        }
    }
}

async fn open_repository(config: &AppConfig) -> Result<Arc<dyn Repository>> {
    let repository: Arc<dyn Repository> = match &config.database {
        Some(database) => Arc::new(SqliteRepository::connect(database).await?),
        None => {
            warn!("No database configured, state is kept in memory only");
            Arc::new(MemoryRepository::new())
        }
    };
    Ok(repository)
}

async fn run_live(config: &AppConfig, cancel: CancellationToken) -> Result<()> {
    let trading = &config.trading;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let repository = open_repository(config).await?;
    let bus = Arc::new(EventBus::default());
    let fees = Arc::new(FeeCache::new());
    let exchange: Arc<dyn Exchange> =
        Arc::new(LiveExchange::new(config, fees, bus.clone(), cancel.child_token())?);

    let blacklist = Arc::new(SymbolBlacklist::new(repository.clone(), clock.clone()));
    let mut tasks = vec![blacklist.clone().start(&bus, cancel.child_token())];

    load_coins(repository.as_ref(), &trading.coins, clock.now()).await?;
    let fee_getter = Arc::new(FeeGetter::new(exchange.clone()));
    tasks.push(
        fee_getter
            .start(config.schedule.fee_refresh_interval(), cancel.child_token())
            .await,
    );
    initialize_pairs(
        repository.as_ref(),
        exchange.as_ref(),
        &blacklist,
        &trading.bridge,
        clock.now(),
    )
    .await
    .context("failed to initialize pairs")?;

    let trader = Arc::new(Trader::new(
        exchange.clone(),
        repository.clone(),
        bus.clone(),
        clock.clone(),
        Arc::new(TracingNotifier::new(trading.notification_levels.clone())),
        trading.bridge.clone(),
        cancel.child_token(),
    ));
    let jump_finder = Arc::new(JumpFinder::new(
        repository.clone(),
        exchange.clone(),
        trader,
        GainThreshold::from_config(&config.jump),
        trading.start_coin.clone(),
        clock.now(),
    ));
    tasks.push(jump_finder.start(&bus, cancel.child_token()));

    let balance_saver = Arc::new(BalanceSaver::new(
        exchange.clone(),
        repository.clone(),
        clock.clone(),
        trading.bridge.clone(),
        trading.balance_currencies.clone(),
    ));
    tasks.push(balance_saver.start(&bus, cancel.child_token()));

    let cleaner = Arc::new(Cleaner::new(repository.clone(), clock.clone()));
    tasks.push(cleaner.start(config.schedule.cleaner_interval(), cancel.child_token()));

    let price_getter = Arc::new(PriceGetter::new(
        exchange,
        repository,
        bus,
        blacklist,
        clock,
        trading.bridge.clone(),
    ));
    tasks.push(price_getter.start(config.schedule.price_fetch_interval(), cancel.child_token()));

    info!(coins = ?trading.coins, bridge = %trading.bridge, "Engine running");
    cancel.cancelled().await;

    for task in tasks {
        if let Err(e) = task.await {
            warn!("Task ended abnormally: {}", e);
        }
    }
    info!("Engine stopped");
    Ok(())
}

async fn run_backtest(config: &AppConfig, cancel: CancellationToken) -> Result<()> {
    let Some(backtest) = &config.backtest else {
        bail!("the [backtest] section is required to run a backtest");
    };
    let trading = &config.trading;
    let clock = Arc::new(SteppedClock::new(backtest.start, backtest.end, backtest.step()));
    // replays never touch the live store
    let repository: Arc<dyn Repository> = match &backtest.database {
        Some(database) => {
            let repository = SqliteRepository::connect(database).await?;
            repository.reset().await?;
            Arc::new(repository)
        }
        None => Arc::new(MemoryRepository::new()),
    };

    // only symbol rules and candles come from the real exchange
    let bus = Arc::new(EventBus::default());
    let live = LiveExchange::new(config, Arc::new(FeeCache::new()), bus, cancel.child_token())?;
    let exchange = Arc::new(SimulatedExchange::new(
        live,
        clock.clone(),
        trading.bridge.clone(),
        backtest,
    ));
    info!(
        "Starting with {} {}",
        backtest.initial_balance, trading.bridge
    );
    if let Some(start_coin) = &trading.start_coin {
        warn!(%start_coin, "Backtests start from the bridge, ignoring start coin");
    }

    let runner = BacktestRunner::new(config, exchange, repository, clock, None, cancel.child_token());
    let report = runner.run(&cancel).await?;
    info!(
        "Backtest done: {} jumps in {} steps, ending on {:?} worth {} {}",
        report.jumps, report.steps, report.current_coin, report.value_in_bridge, trading.bridge
    );
    Ok(())
}
