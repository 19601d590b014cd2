//! Survivor Engine Binary
//!
//! Runs one Survivor session, live or as a backtest.
//!
//! # Usage
//!
//! ```bash
//! survivor-engine [--config config.yaml] [--show-config] [--yes]
//! ```
//!
//! - `--config PATH`: configuration file (default: config.yaml; engine
//!   defaults are used when the default file is absent)
//! - `--show-config`: print the effective configuration and exit
//! - `--yes`: skip the default-parameter confirmation prompt
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: log level (default: info)
//!
//! The binary wires the in-repo paper broker session; a real brokerage is
//! plugged in by implementing `broker::BrokerSession` and swapping the
//! constructor here.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use survivor_engine::backtest::{load_bars, run_backtest};
use survivor_engine::broker::{BrokerSession, PaperBroker};
use survivor_engine::config::{Config, Mode, StrategyConfig, load_config, render_config};
use survivor_engine::error::EngineError;
use survivor_engine::feed::Dispatcher;
use survivor_engine::strategy::{SessionSummary, SurvivorEngine};
use survivor_engine::telemetry;
use survivor_engine::tracker::OrderTracker;

/// Parsed command-line flags.
struct CliArgs {
    config_path: Option<String>,
    show_config: bool,
    assume_yes: bool,
}

fn parse_args() -> Result<CliArgs, String> {
    let mut args = CliArgs {
        config_path: None,
        show_config: false,
        assume_yes: false,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                args.config_path = Some(
                    iter.next()
                        .ok_or_else(|| "--config requires a path".to_string())?,
                );
            }
            "--show-config" => args.show_config = true,
            "--yes" | "-y" => args.assume_yes = true,
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(args)
}

/// Pre-flight gate: refuse to trade on fully-default parameters without an
/// explicit operator confirmation. Runs before the dispatcher starts; it is
/// not part of the engine's state machine.
fn confirm_parameters(config: &Config, assume_yes: bool) -> anyhow::Result<()> {
    if config.strategy != StrategyConfig::default() {
        return Ok(());
    }
    if assume_yes {
        warn!("Running with default strategy parameters (--yes)");
        return Ok(());
    }

    print!(
        "All strategy parameters are at their defaults (series {}). Proceed? (yes/no): ",
        config.strategy.symbol_initials
    );
    std::io::stdout().flush().ok();

    let mut response = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut response)
        .context("reading confirmation")?;
    match response.trim().to_lowercase().as_str() {
        "yes" | "y" => Ok(()),
        _ => bail!("cancelled: update the configuration or pass --yes"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            eprintln!("usage: survivor-engine [--config PATH] [--show-config] [--yes]");
            std::process::exit(2);
        }
    };

    let config = match &args.config_path {
        Some(path) => load_config(Some(path))?,
        None => {
            if std::path::Path::new("config.yaml").exists() {
                load_config(None)?
            } else {
                info!("No config.yaml found, using engine defaults");
                Config::default()
            }
        }
    };

    if args.show_config {
        println!("{}", render_config(&config)?);
        return Ok(());
    }

    confirm_parameters(&config, args.assume_yes)?;

    match config.mode {
        Mode::Backtest { .. } => {
            let bars_file = config
                .backtest
                .bars_file
                .clone()
                .context("backtest mode requires backtest.bars_file")?;
            let bars = load_bars(&bars_file)?;
            let report = run_backtest(&config, bars).await?;
            println!("{report}");
        }
        Mode::Live => run_live(&config).await?,
    }
    Ok(())
}

/// Wire and run a live session.
async fn run_live(config: &Config) -> anyhow::Result<()> {
    let broker = Arc::new(PaperBroker::authenticate());
    let tracker = Arc::new(OrderTracker::open(
        Arc::clone(&broker),
        &config.persistence.data_dir,
        config.retry.clone(),
    )?);

    // Reconciliation is mandatory before a prior session may resume.
    let report = tracker.reconcile().await?;
    if !report.passed() && !config.execution.acknowledge_orphans {
        return Err(EngineError::UnacknowledgedOrphans(report.orphans.len()).into());
    }

    let (dispatcher, mut rx) = Dispatcher::new(config.dispatcher.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // Operator stop signal.
    let operator_stop = Arc::clone(&shutdown_tx);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Stop signal received");
            let _ = operator_stop.send(true);
        }
    });

    let source = broker
        .subscribe_ticks(std::slice::from_ref(&config.strategy.index_symbol))
        .await?;
    let feed_task = dispatcher.start(source, shutdown_rx.clone());

    let mut engine = match tracker.resumable_session().await {
        Some(state) => {
            info!(session_id = %state.session_id, "Resuming prior session");
            SurvivorEngine::resume(
                state,
                Arc::clone(&broker),
                Arc::clone(&tracker),
                dispatcher.clone(),
                config.execution.clone(),
                config.retry.clone(),
            )
            .await?
        }
        None => {
            SurvivorEngine::create(
                Arc::clone(&broker),
                Arc::clone(&tracker),
                dispatcher.clone(),
                config.strategy.clone(),
                config.execution.clone(),
                config.retry.clone(),
            )
            .await?
        }
    };

    engine.run(&mut rx, shutdown_rx).await?;
    // The session may have closed on its own; stop the feed either way.
    let _ = shutdown_tx.send(true);
    let _ = feed_task.await;

    let summary = SessionSummary::from_trades(engine.closed_trades());
    println!("{summary}");
    Ok(())
}
