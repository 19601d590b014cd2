//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use survivor_engine::broker::PaperBroker;
use survivor_engine::config::Config;
use survivor_engine::feed::{Dispatcher, TickReceiver};
use survivor_engine::models::Tick;
use survivor_engine::strategy::SurvivorEngine;
use survivor_engine::tracker::OrderTracker;

/// Underlying index symbol of the default configuration.
pub const INDEX: &str = "NIFTY 50";
/// CE leg at ATM + 200 for spot near 24500.
pub const CE_SYM: &str = "NIFTY2580724700CE";
/// PE leg at ATM - 200 for spot near 24500.
pub const PE_SYM: &str = "NIFTY2580724300PE";

/// Timestamp inside the default session window, on 2025-08-05.
pub fn session_ts(hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 8, 5, hour, min, 0).unwrap()
}

/// Arbitrary timestamp.
pub fn ts(year: i32, month: u32, day: u32, hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, min, 0).unwrap()
}

/// Index tick within the trading window.
pub fn index_tick(seq: u64, price: Decimal) -> Tick {
    Tick::new(INDEX, price, session_ts(10, 0), seq)
}

/// Leg premium tick within the trading window.
pub fn leg_tick(instrument_id: &str, seq: u64, price: Decimal) -> Tick {
    Tick::new(instrument_id, price, session_ts(10, 5), seq)
}

/// One fully wired engine over a paper broker and temp stores.
pub struct Harness {
    pub broker: Arc<PaperBroker>,
    pub tracker: Arc<OrderTracker<PaperBroker>>,
    pub dispatcher: Dispatcher,
    pub rx: TickReceiver,
    pub engine: SurvivorEngine<PaperBroker>,
    pub dir: TempDir,
}

/// Build a harness with the default configuration and liquid quotes on both
/// default strikes (CE 40, PE 42).
pub async fn harness() -> Harness {
    harness_with(Config::default()).await
}

/// Build a harness with a caller-tuned configuration.
pub async fn harness_with(config: Config) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let broker = Arc::new(PaperBroker::authenticate());
    broker.set_quote(CE_SYM, dec!(40));
    broker.set_quote(PE_SYM, dec!(42));

    let tracker = Arc::new(
        OrderTracker::open(Arc::clone(&broker), dir.path(), config.retry.clone())
            .expect("tracker"),
    );
    let (dispatcher, rx) = Dispatcher::new(config.dispatcher.clone());
    let engine = SurvivorEngine::create(
        Arc::clone(&broker),
        Arc::clone(&tracker),
        dispatcher.clone(),
        config.strategy.clone(),
        config.execution.clone(),
        config.retry.clone(),
    )
    .await
    .expect("engine");

    Harness {
        broker,
        tracker,
        dispatcher,
        rx,
        engine,
        dir,
    }
}

/// Harness with both legs already entered (one index tick processed).
pub async fn entered_harness() -> Harness {
    let mut harness = harness().await;
    harness
        .engine
        .on_tick(index_tick(1, dec!(24510)))
        .await
        .expect("entry tick");
    harness
}
