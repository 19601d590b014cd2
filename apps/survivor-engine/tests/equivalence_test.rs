//! Live/backtest equivalence: the identical tick sequence fed through the
//! live-shaped channel source and through the backtest replay source must
//! produce identical state transitions and identical final P&L.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;

use survivor_engine::broker::PaperBroker;
use survivor_engine::config::Config;
use survivor_engine::feed::{ChannelTickSource, Dispatcher, ReplayTickSource, TickSource};
use survivor_engine::models::{ClosedTrade, StrategyPhase, Tick};
use survivor_engine::strategy::SurvivorEngine;
use survivor_engine::tracker::OrderTracker;

use common::{CE_SYM, PE_SYM, index_tick, leg_tick};

/// Everything observable about a finished run, minus per-run identifiers.
#[derive(Debug, PartialEq)]
struct RunOutcome {
    phase: StrategyPhase,
    realized_pnl: Decimal,
    closed_trades: Vec<ClosedTrade>,
    last_seq: BTreeMap<String, u64>,
}

fn scenario_ticks() -> Vec<Tick> {
    vec![
        index_tick(1, dec!(24510)),
        leg_tick(CE_SYM, 1, dec!(39)),
        leg_tick(PE_SYM, 1, dec!(14)),
        index_tick(2, dec!(24515)),
    ]
}

async fn run_pipeline<S>(source: S) -> RunOutcome
where
    S: TickSource + 'static,
{
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default();

    let broker = Arc::new(PaperBroker::authenticate());
    broker.set_quote(CE_SYM, dec!(40));
    broker.set_quote(PE_SYM, dec!(42));

    let tracker = Arc::new(
        OrderTracker::open(Arc::clone(&broker), dir.path(), config.retry.clone()).unwrap(),
    );
    let (dispatcher, mut rx) = Dispatcher::new(config.dispatcher.clone());

    let mut engine = SurvivorEngine::create(
        Arc::clone(&broker),
        tracker,
        dispatcher.clone(),
        config.strategy.clone(),
        config.execution.clone(),
        config.retry.clone(),
    )
    .await
    .unwrap();

    // Leg instruments are registered up front so replayed leg ticks cannot
    // race the engine's own entry-time subscription.
    dispatcher
        .subscribe(&[CE_SYM.to_string(), PE_SYM.to_string()])
        .unwrap();

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let feed_task = dispatcher.start(source, shutdown_rx.clone());

    engine.run(&mut rx, shutdown_rx).await.unwrap();
    feed_task.await.unwrap();

    let state = engine.state();
    RunOutcome {
        phase: state.phase,
        realized_pnl: state.realized_pnl,
        closed_trades: state.closed_trades.clone(),
        last_seq: state.last_seq.clone(),
    }
}

#[tokio::test]
async fn test_live_and_replay_sources_produce_identical_runs() {
    // Live-shaped: a producer task pushes ticks into a channel.
    let (tx, channel_source) = ChannelTickSource::pair(16);
    let producer = tokio::spawn(async move {
        for tick in scenario_ticks() {
            tx.send(tick).await.unwrap();
        }
        // Dropping the sender ends the stream.
    });
    let live_outcome = run_pipeline(channel_source).await;
    producer.await.unwrap();

    // Backtest-shaped: the same sequence replayed from storage.
    let replay_outcome = run_pipeline(ReplayTickSource::from_ticks(scenario_ticks())).await;

    assert_eq!(live_outcome, replay_outcome);

    // The scenario itself did what it should: entry on the first index
    // tick, PE exited at the decayed premium, CE still active.
    assert_eq!(replay_outcome.phase, StrategyPhase::ExitPe);
    assert_eq!(replay_outcome.closed_trades.len(), 1);
    assert_eq!(replay_outcome.last_seq.get(common::INDEX), Some(&2));
}
