//! End-to-end session tests: the strategy state machine driven through the
//! public tick path, backed by real stores and the paper broker.

mod common;

use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use test_case::test_case;

use survivor_engine::config::Config;
use survivor_engine::models::{ExitReason, LegStatus, OrderStatus, StrategyPhase};

use common::{CE_SYM, PE_SYM, entered_harness, harness, index_tick, leg_tick};

#[tokio::test]
async fn test_entry_fixes_strikes_and_activates_legs() {
    let h = entered_harness().await;
    let state = h.engine.state();

    assert_eq!(state.phase, StrategyPhase::LegsActive);
    assert_eq!(state.ce.status, LegStatus::Entered);
    assert_eq!(state.pe.status, LegStatus::Entered);
    assert_eq!(state.ce.instrument_id().as_deref(), Some(CE_SYM));
    assert_eq!(state.pe.instrument_id().as_deref(), Some(PE_SYM));
    assert_eq!(state.ce.entry_premium, Some(dec!(40)));
    assert_eq!(state.pe.entry_premium, Some(dec!(42)));

    // Both entry sell orders are tracked and filled at the quoted premium.
    let orders = h.tracker.session_orders(&state.session_id).await;
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().all(|o| o.status == OrderStatus::Filled));
}

#[tokio::test]
async fn test_entry_steps_strike_closer_when_premium_below_floor() {
    let h = harness().await;
    // The configured CE strike quotes below min_price_to_sell; one step
    // closer to spot clears the floor.
    h.broker.set_quote(CE_SYM, dec!(9));
    h.broker.set_quote("NIFTY2580724650CE", dec!(22));

    let mut engine = h.engine;
    engine.on_tick(index_tick(1, dec!(24510))).await.unwrap();

    let state = engine.state();
    assert_eq!(state.ce.status, LegStatus::Entered);
    assert_eq!(
        state.ce.instrument_id().as_deref(),
        Some("NIFTY2580724650CE")
    );
    assert_eq!(state.ce.entry_premium, Some(dec!(22)));
}

#[test_case("15.01", false; "just above the floor holds")]
#[test_case("15.00", true; "at the floor exits")]
#[test_case("14.75", true; "below the floor exits")]
#[tokio::test]
async fn test_exit_boundary(premium: &str, exits: bool) {
    let premium = Decimal::from_str(premium).unwrap();
    let mut h = entered_harness().await;

    h.broker.set_quote(PE_SYM, premium);
    h.engine
        .on_tick(leg_tick(PE_SYM, 1, premium))
        .await
        .unwrap();

    let state = h.engine.state();
    if exits {
        assert_eq!(state.pe.status, LegStatus::Exited);
        assert_eq!(state.phase, StrategyPhase::ExitPe);
        assert_eq!(state.closed_trades.len(), 1);
        assert_eq!(state.closed_trades[0].exit_reason, ExitReason::PriceDecay);
        // Sold at 42, bought back at the decayed premium.
        assert_eq!(
            state.closed_trades[0].pnl,
            (dec!(42) - premium) * dec!(75)
        );
    } else {
        assert_eq!(state.pe.status, LegStatus::Entered);
        assert_eq!(state.phase, StrategyPhase::LegsActive);
        assert!(state.closed_trades.is_empty());
    }
}

#[tokio::test]
async fn test_stop_loss_exit() {
    let mut h = entered_harness().await;

    // CE entered at 40; premium doubling breaches the default 2x stop.
    h.broker.set_quote(CE_SYM, dec!(80));
    h.engine
        .on_tick(leg_tick(CE_SYM, 1, dec!(80)))
        .await
        .unwrap();

    let state = h.engine.state();
    assert_eq!(state.ce.status, LegStatus::Exited);
    assert_eq!(state.phase, StrategyPhase::ExitCe);
    assert_eq!(state.closed_trades[0].exit_reason, ExitReason::StopLoss);
    assert_eq!(state.closed_trades[0].pnl, (dec!(40) - dec!(80)) * dec!(75));
    assert!(state.realized_pnl < Decimal::ZERO);
}

#[tokio::test]
async fn test_both_legs_exit_closes_session() {
    let mut h = entered_harness().await;

    h.broker.set_quote(PE_SYM, dec!(10));
    h.engine
        .on_tick(leg_tick(PE_SYM, 1, dec!(10)))
        .await
        .unwrap();
    h.broker.set_quote(CE_SYM, dec!(12));
    h.engine
        .on_tick(leg_tick(CE_SYM, 1, dec!(12)))
        .await
        .unwrap();

    let state = h.engine.state();
    assert_eq!(state.phase, StrategyPhase::Closed);
    assert_eq!(state.closed_trades.len(), 2);
    let expected = (dec!(42) - dec!(10)) * dec!(75) + (dec!(40) - dec!(12)) * dec!(75);
    assert_eq!(state.realized_pnl, expected);
}

#[tokio::test]
async fn test_no_reentry_after_exit() {
    let mut h = entered_harness().await;

    h.broker.set_quote(PE_SYM, dec!(15));
    h.engine
        .on_tick(leg_tick(PE_SYM, 1, dec!(15)))
        .await
        .unwrap();
    assert_eq!(h.engine.state().pe.status, LegStatus::Exited);
    let orders_after_exit = h
        .tracker
        .session_orders(&h.engine.state().session_id)
        .await
        .len();

    // Premium recovering and further index movement must not re-enter the
    // exited leg.
    h.broker.set_quote(PE_SYM, dec!(42));
    h.engine
        .on_tick(leg_tick(PE_SYM, 2, dec!(42)))
        .await
        .unwrap();
    h.engine.on_tick(index_tick(2, dec!(24560))).await.unwrap();

    assert_eq!(h.engine.state().pe.status, LegStatus::Exited);
    let orders_after_ticks = h
        .tracker
        .session_orders(&h.engine.state().session_id)
        .await
        .len();
    assert_eq!(orders_after_exit, orders_after_ticks);
}

#[tokio::test]
async fn test_failed_ce_leg_leaves_pe_independent() {
    let h = harness().await;
    h.broker.reject_instrument(CE_SYM);
    // Every CE strike candidate is rejected at placement.
    let mut engine = h.engine;

    engine.on_tick(index_tick(1, dec!(24510))).await.unwrap();

    let state = engine.state();
    assert_eq!(state.ce.status, LegStatus::Failed);
    assert_eq!(state.pe.status, LegStatus::Entered);
    assert_eq!(state.phase, StrategyPhase::LegsActive);
    assert!(!state.alerts.is_empty());

    // The PE leg still transitions normally on its own ticks.
    h.broker.set_quote(PE_SYM, dec!(14));
    engine
        .on_tick(leg_tick(PE_SYM, 1, dec!(14)))
        .await
        .unwrap();
    assert_eq!(engine.state().pe.status, LegStatus::Exited);
    assert_eq!(engine.state().phase, StrategyPhase::Closed);
    assert_eq!(engine.state().closed_trades.len(), 1);
}

#[tokio::test]
async fn test_rejected_entry_retries_then_fails() {
    let config = Config::default();
    let h = common::harness_with(config).await;
    h.broker.reject_instrument(CE_SYM);

    let mut engine = h.engine;
    engine.on_tick(index_tick(1, dec!(24510))).await.unwrap();

    assert_eq!(engine.state().ce.status, LegStatus::Failed);
    // Default entry_retry_limit 2: initial attempt plus two retries.
    assert_eq!(engine.state().ce.entry_attempts, 3);

    let rejected = h
        .tracker
        .session_orders(&engine.state().session_id)
        .await
        .into_iter()
        .filter(|o| o.status == OrderStatus::Rejected)
        .count();
    assert_eq!(rejected, 3);
}

#[tokio::test]
async fn test_square_off_exits_open_legs() {
    let mut h = entered_harness().await;

    let late = survivor_engine::models::Tick::new(
        common::INDEX,
        dec!(24500),
        common::session_ts(15, 30),
        2,
    );
    h.engine.on_tick(late).await.unwrap();

    let state = h.engine.state();
    assert_eq!(state.phase, StrategyPhase::Closed);
    assert_eq!(state.closed_trades.len(), 2);
    assert!(
        state
            .closed_trades
            .iter()
            .all(|t| t.exit_reason == ExitReason::SquareOff)
    );
}

#[tokio::test]
async fn test_expiry_realizes_full_premium() {
    let mut h = entered_harness().await;

    // First tick after the expiry date lapses both positions.
    let post_expiry = survivor_engine::models::Tick::new(
        common::INDEX,
        dec!(24500),
        common::ts(2025, 8, 8, 9, 30),
        2,
    );
    h.engine.on_tick(post_expiry).await.unwrap();

    let state = h.engine.state();
    assert_eq!(state.phase, StrategyPhase::Closed);
    assert_eq!(state.ce.status, LegStatus::Expired);
    assert_eq!(state.pe.status, LegStatus::Expired);
    // Entire collected premium is realized.
    let expected = dec!(40) * dec!(75) + dec!(42) * dec!(75);
    assert_eq!(state.realized_pnl, expected);
    assert!(
        state
            .closed_trades
            .iter()
            .all(|t| t.exit_reason == ExitReason::Expiry && t.exit_price == Decimal::ZERO)
    );
}

#[tokio::test]
async fn test_engine_state_persists_on_every_tick() {
    let mut h = entered_harness().await;

    h.broker.set_quote(PE_SYM, dec!(15));
    h.engine
        .on_tick(leg_tick(PE_SYM, 1, dec!(15)))
        .await
        .unwrap();

    // The persisted snapshot matches the in-memory state exactly.
    let stored = h
        .tracker
        .load_session(&h.engine.state().session_id)
        .await
        .unwrap();
    assert_eq!(&stored, h.engine.state());
}
