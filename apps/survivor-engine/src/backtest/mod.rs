//! Replay-driven backtesting.
//!
//! A backtest substitutes a tick source that replays stored historical bars
//! as synthetic ticks; the dispatcher and strategy engine are unaware of the
//! substitution. Option premiums are synthesized with a deterministic
//! distance/time-decay model so entry, decay exits, and stop-losses all
//! exercise the same code paths as a live session.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tracing::info;

use crate::broker::PaperBroker;
use crate::config::{BacktestParams, Config, Mode};
use crate::error::EngineError;
use crate::feed::{ChannelTickSource, Dispatcher};
use crate::models::{Bar, Instrument, LegSide, OptionKind, StrategyPhase, Tick};
use crate::strategy::{SessionSummary, SurvivorEngine};
use crate::tracker::{OrderTracker, StoreError};

/// Channel capacity for the synthetic feed.
const FEED_CAPACITY: usize = 1024;

/// Premium floor so synthetic options never quote at zero.
const PREMIUM_FLOOR: Decimal = dec!(0.05);

/// Deterministic synthetic option premium model.
///
/// Premium falls linearly with out-of-the-money distance and with elapsed
/// bars, and rises as spot moves toward (or through) the strike.
#[derive(Debug, Clone)]
pub struct PremiumModel {
    params: BacktestParams,
}

impl PremiumModel {
    /// Build the model from configuration.
    #[must_use]
    pub const fn new(params: BacktestParams) -> Self {
        Self { params }
    }

    /// Premium of a strike given the current spot and bars elapsed since
    /// session start.
    #[must_use]
    pub fn premium(&self, spot: Decimal, strike: Decimal, kind: OptionKind, elapsed: u64) -> Decimal {
        let otm_distance = match kind {
            OptionKind::Call => strike - spot,
            OptionKind::Put => spot - strike,
        };
        let premium = self.params.base_premium
            - otm_distance * self.params.distance_decay
            - self.params.time_decay * Decimal::from(elapsed);
        premium.max(PREMIUM_FLOOR)
    }
}

/// Result of one backtest run.
#[derive(Debug, Clone)]
pub struct BacktestReport {
    /// Session identifier of the replayed session.
    pub session_id: String,
    /// Phase the session ended in.
    pub final_phase: StrategyPhase,
    /// Aggregate trade statistics.
    pub summary: SessionSummary,
}

impl std::fmt::Display for BacktestReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "session:  {}", self.session_id)?;
        writeln!(f, "phase:    {:?}", self.final_phase)?;
        write!(f, "{}", self.summary)
    }
}

/// Load historical bars from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_bars(path: &Path) -> Result<Vec<Bar>, StoreError> {
    let contents = std::fs::read_to_string(path).map_err(|e| StoreError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(serde_json::from_str(&contents)?)
}

/// Run a full backtest over the given underlying bars.
///
/// Bars are served back through the broker capability interface
/// (`get_historical`), restricted to the configured date range, then
/// replayed as synthetic ticks. The replay is synchronized: each bar's
/// ticks are fully processed by the engine before the next bar is
/// generated, so runs are deterministic.
///
/// # Errors
///
/// Returns an error if wiring fails or the engine hits a persistence error.
pub async fn run_backtest(config: &Config, bars: Vec<Bar>) -> Result<BacktestReport, EngineError> {
    let broker = Arc::new(PaperBroker::authenticate());
    broker.load_bars(&config.strategy.index_symbol, bars);

    let (from, to) = mode_range(config.mode);
    let bars = {
        use crate::broker::BrokerSession;
        broker
            .get_historical(&config.strategy.index_symbol, from, to)
            .await?
    };
    info!(bars = bars.len(), "Backtest starting");

    let tracker = Arc::new(OrderTracker::open(
        Arc::clone(&broker),
        &config.persistence.data_dir,
        config.retry.clone(),
    )?);
    let (dispatcher, mut rx) = Dispatcher::new(config.dispatcher.clone());

    let (feed_tx, feed_source) = ChannelTickSource::pair(FEED_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let feed_task = dispatcher.start(feed_source, shutdown_rx);

    let mut engine = SurvivorEngine::create(
        Arc::clone(&broker),
        Arc::clone(&tracker),
        dispatcher.clone(),
        config.strategy.clone(),
        config.execution.clone(),
        config.retry.clone(),
    )
    .await?;

    let model = PremiumModel::new(config.backtest.clone());
    let index_symbol = config.strategy.index_symbol.clone();
    let mut sequences: HashMap<String, u64> = HashMap::new();

    for (elapsed, bar) in bars.iter().enumerate() {
        let spot = bar.close;
        let elapsed = elapsed as u64;

        // Quotes first so entry-time strike selection sees the full grid.
        refresh_option_quotes(&broker, config, &engine, &model, spot, elapsed);
        broker.set_quote(&index_symbol, spot);

        // One tick per subscribed instrument per bar, index first.
        let mut batch = vec![make_tick(&mut sequences, &index_symbol, spot, bar)];
        for instrument_id in engine.active_instruments() {
            if let Some(premium) = quote_for(&broker, &instrument_id).await {
                batch.push(make_tick(&mut sequences, &instrument_id, premium, bar));
            }
        }

        let sent = batch.len();
        for tick in batch {
            // Receiver half lives in the dispatcher task.
            let _ = feed_tx.send(tick).await;
        }
        // Synchronize: drain exactly what was sent before the next bar.
        for _ in 0..sent {
            match rx.recv().await {
                Some(tick) => engine.on_tick(tick).await?,
                None => break,
            }
        }

        if engine.phase().is_terminal() {
            break;
        }
    }

    drop(feed_tx);
    let _ = shutdown_tx.send(true);
    let _ = feed_task.await;

    let report = BacktestReport {
        session_id: engine.state().session_id.clone(),
        final_phase: engine.phase(),
        summary: SessionSummary::from_trades(engine.closed_trades()),
    };
    info!(
        phase = ?report.final_phase,
        total_pnl = %report.summary.total_pnl,
        trades = report.summary.trade_count,
        "Backtest finished"
    );
    Ok(report)
}

/// Historical range implied by the run mode.
fn mode_range(mode: Mode) -> (DateTime<Utc>, DateTime<Utc>) {
    match mode {
        Mode::Backtest { start, end } => (
            start.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc(),
            end.and_hms_opt(23, 59, 59).unwrap_or_default().and_utc(),
        ),
        Mode::Live => (DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC),
    }
}

/// Build a tick with the next dense per-instrument sequence number.
fn make_tick(
    sequences: &mut HashMap<String, u64>,
    instrument_id: &str,
    price: Decimal,
    bar: &Bar,
) -> Tick {
    let seq = sequences.entry(instrument_id.to_string()).or_insert(0);
    *seq += 1;
    Tick::new(instrument_id, price, bar.timestamp, *seq)
}

/// Current quote for an instrument, if the broker has one.
async fn quote_for(broker: &PaperBroker, instrument_id: &str) -> Option<Decimal> {
    use crate::broker::BrokerSession;
    broker.get_quote(instrument_id).await.ok()
}

/// Recompute quotes for the candidate strike grid around ATM (entry-time
/// selection) and for any already-selected leg instruments.
fn refresh_option_quotes<B>(
    broker: &PaperBroker,
    config: &Config,
    engine: &SurvivorEngine<B>,
    model: &PremiumModel,
    spot: Decimal,
    elapsed: u64,
) where
    B: crate::broker::BrokerSession,
{
    let strategy = &config.strategy;
    let step = strategy.strike_step;
    let atm = (spot / step).round() * step;

    for (kind, gap) in [
        (OptionKind::Call, strategy.ce_gap),
        (OptionKind::Put, strategy.pe_gap),
    ] {
        let mut offset = gap;
        loop {
            let strike = match kind {
                OptionKind::Call => atm + offset,
                OptionKind::Put => atm - offset,
            };
            let instrument = Instrument {
                underlying: strategy.index_symbol.clone(),
                symbol_initials: strategy.symbol_initials.clone(),
                expiry: strategy.expiry,
                strike,
                kind,
            };
            broker.set_quote(
                &instrument.trading_symbol(),
                model.premium(spot, strike, kind, elapsed),
            );
            if offset < step {
                break;
            }
            offset -= step;
        }
    }

    for side in [LegSide::Ce, LegSide::Pe] {
        if let Some(instrument) = engine.state().leg(side).instrument.clone() {
            broker.set_quote(
                &instrument.trading_symbol(),
                model.premium(spot, instrument.strike, instrument.kind, elapsed),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn test_premium_model_decays_with_distance_and_time() {
        let model = PremiumModel::new(BacktestParams::default());
        let spot = dec!(24500);

        let near = model.premium(spot, dec!(24600), OptionKind::Call, 0);
        let far = model.premium(spot, dec!(24800), OptionKind::Call, 0);
        assert!(near > far);

        let fresh = model.premium(spot, dec!(24700), OptionKind::Call, 0);
        let aged = model.premium(spot, dec!(24700), OptionKind::Call, 50);
        assert!(fresh > aged);
    }

    #[test]
    fn test_premium_model_floors_at_minimum() {
        let model = PremiumModel::new(BacktestParams::default());
        let premium = model.premium(dec!(24500), dec!(30000), OptionKind::Call, 10_000);
        assert_eq!(premium, PREMIUM_FLOOR);
    }

    #[test]
    fn test_premium_rises_when_spot_approaches_strike() {
        let model = PremiumModel::new(BacktestParams::default());
        let strike = dec!(24700);
        let before = model.premium(dec!(24500), strike, OptionKind::Call, 0);
        let after = model.premium(dec!(24650), strike, OptionKind::Call, 0);
        assert!(after > before);
    }

    #[test]
    fn test_mode_range_covers_whole_days() {
        let mode = Mode::Backtest {
            start: NaiveDate::from_ymd_opt(2025, 8, 2).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 8, 3).unwrap(),
        };
        let (from, to) = mode_range(mode);

        assert_eq!(from, Utc.with_ymd_and_hms(2025, 8, 2, 0, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2025, 8, 3, 23, 59, 59).unwrap());

        let (from, to) = mode_range(Mode::Live);
        assert!(from < to);
    }
}
