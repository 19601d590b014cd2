//! Survivor strategy engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::broker::{BackoffCalculator, BrokerSession, RetryPolicy};
use crate::config::{ExecutionConfig, StrategyConfig};
use crate::error::EngineError;
use crate::feed::{Dispatcher, TickReceiver};
use crate::models::{
    ClosedTrade, ExitReason, Instrument, LegSide, LegStatus, OptionKind, OrderIntent, OrderSide,
    OrderStatus, StrategyPhase, StrategyState, Tick,
};
use crate::tracker::OrderTracker;

/// The Survivor decision engine.
///
/// Owns [`StrategyState`] exclusively and runs as a single consumer task;
/// every mutation is persisted through the order tracker's session store so
/// a crash mid-session resumes without re-entering already-placed legs.
pub struct SurvivorEngine<B: BrokerSession> {
    broker: Arc<B>,
    tracker: Arc<OrderTracker<B>>,
    dispatcher: Dispatcher,
    execution: ExecutionConfig,
    retry: RetryPolicy,
    state: StrategyState,
}

impl<B: BrokerSession> SurvivorEngine<B> {
    /// Create a fresh session in `Idle` and subscribe the underlying index.
    ///
    /// # Errors
    ///
    /// Returns an error if the index subscription or the initial session
    /// persist fails.
    pub async fn create(
        broker: Arc<B>,
        tracker: Arc<OrderTracker<B>>,
        dispatcher: Dispatcher,
        strategy: StrategyConfig,
        execution: ExecutionConfig,
        retry: RetryPolicy,
    ) -> Result<Self, EngineError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let state = StrategyState::new(session_id, strategy, Utc::now());

        dispatcher.subscribe(std::slice::from_ref(&state.config.index_symbol))?;
        tracker.save_session(&state).await?;

        info!(
            session_id = %state.session_id,
            series = %state.config.symbol_initials,
            "Survivor session created"
        );

        Ok(Self {
            broker,
            tracker,
            dispatcher,
            execution,
            retry,
            state,
        })
    }

    /// Resume a persisted session after reconciliation.
    ///
    /// Re-subscribes the index and any selected leg instruments, then folds
    /// the broker-confirmed order outcomes into legs that were interrupted
    /// mid-placement.
    ///
    /// # Errors
    ///
    /// Returns an error if a subscription, broker query, or persist fails.
    pub async fn resume(
        state: StrategyState,
        broker: Arc<B>,
        tracker: Arc<OrderTracker<B>>,
        dispatcher: Dispatcher,
        execution: ExecutionConfig,
        retry: RetryPolicy,
    ) -> Result<Self, EngineError> {
        dispatcher.subscribe(std::slice::from_ref(&state.config.index_symbol))?;

        let mut engine = Self {
            broker,
            tracker,
            dispatcher,
            execution,
            retry,
            state,
        };

        for side in [LegSide::Ce, LegSide::Pe] {
            if let Some(instrument_id) = engine.state.leg(side).instrument_id()
                && !engine.state.leg(side).status.is_terminal()
            {
                engine.dispatcher.subscribe(&[instrument_id])?;
            }
            engine.recover_leg(side).await?;
        }
        engine.recompute_phase();
        engine.persist().await?;

        info!(
            session_id = %engine.state.session_id,
            phase = ?engine.state.phase,
            "Survivor session resumed"
        );
        Ok(engine)
    }

    /// Fold reconciled order state into a leg interrupted mid-placement.
    async fn recover_leg(&mut self, side: LegSide) -> Result<(), EngineError> {
        let leg = self.state.leg(side);
        match leg.status {
            LegStatus::Entering => {
                let entry_order_id = leg.entry_order_id.clone();
                match entry_order_id {
                    None => self.state.leg_mut(side).status = LegStatus::Pending,
                    Some(order_id) => {
                        let order = self.tracker.refresh(&order_id).await?;
                        let leg = self.state.leg_mut(side);
                        match order.status {
                            OrderStatus::Acknowledged
                            | OrderStatus::PartiallyFilled
                            | OrderStatus::Filled => {
                                leg.status = LegStatus::Entered;
                                if leg.entry_premium.is_none() {
                                    leg.entry_premium = order.fill_price;
                                }
                                if leg.opened_at.is_none() {
                                    leg.opened_at = Some(order.submitted_at);
                                }
                            }
                            _ => leg.status = LegStatus::Pending,
                        }
                    }
                }
            }
            LegStatus::Exiting => {
                let exit_order_id = self.state.leg(side).exit_order_id.clone();
                if let Some(order_id) = exit_order_id {
                    let order = self.tracker.refresh(&order_id).await?;
                    match order.status {
                        OrderStatus::Filled => {
                            let price = order.fill_price.unwrap_or(Decimal::ZERO);
                            self.finalize_exit(side, price, order.last_update_at);
                        }
                        OrderStatus::Rejected | OrderStatus::Cancelled => {
                            let leg = self.state.leg_mut(side);
                            leg.status = LegStatus::Entered;
                            leg.exit_order_id = None;
                        }
                        _ => {}
                    }
                } else {
                    self.state.leg_mut(side).status = LegStatus::Entered;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Current session snapshot.
    #[must_use]
    pub const fn state(&self) -> &StrategyState {
        &self.state
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> StrategyPhase {
        self.state.phase
    }

    /// Completed round trips so far.
    #[must_use]
    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.state.closed_trades
    }

    /// Realized P&L so far.
    #[must_use]
    pub const fn realized_pnl(&self) -> Decimal {
        self.state.realized_pnl
    }

    /// Leg instruments with a live position or in-flight order.
    #[must_use]
    pub fn active_instruments(&self) -> Vec<String> {
        [LegSide::Ce, LegSide::Pe]
            .into_iter()
            .filter_map(|side| {
                let leg = self.state.leg(side);
                if leg.status.is_terminal() {
                    None
                } else {
                    leg.instrument_id()
                }
            })
            .collect()
    }

    /// Consume ticks until the session reaches a terminal phase, the feed
    /// ends, or the shutdown signal fires.
    ///
    /// # Errors
    ///
    /// Returns an error only for persistence failures; tick-local and
    /// leg-local failures are absorbed per the error policy.
    pub async fn run(
        &mut self,
        rx: &mut TickReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        info!(session_id = %self.state.session_id, "Strategy engine running");

        let mut shutdown_live = true;
        loop {
            if shutdown_live {
                tokio::select! {
                    maybe_tick = rx.recv() => match maybe_tick {
                        Some(tick) => self.on_tick(tick).await?,
                        None => break,
                    },
                    changed = shutdown.changed() => match changed {
                        Ok(()) => {
                            if *shutdown.borrow() {
                                self.graceful_shutdown().await?;
                                break;
                            }
                        }
                        // Sender dropped; keep consuming the feed.
                        Err(_) => shutdown_live = false,
                    },
                }
            } else {
                match rx.recv().await {
                    Some(tick) => self.on_tick(tick).await?,
                    None => break,
                }
            }
            if self.state.phase.is_terminal() {
                break;
            }
        }

        self.persist().await?;
        info!(
            session_id = %self.state.session_id,
            phase = ?self.state.phase,
            realized_pnl = %self.state.realized_pnl,
            trades = self.state.closed_trades.len(),
            "Strategy engine stopped"
        );
        Ok(())
    }

    /// Process one dispatched tick.
    ///
    /// Index ticks drive entry, square-off and expiry; a leg tick re-evaluates
    /// exit conditions for that leg only (O(1) per tick).
    ///
    /// # Errors
    ///
    /// Returns an error only for persistence failures.
    pub async fn on_tick(&mut self, tick: Tick) -> Result<(), EngineError> {
        if self.state.phase.is_terminal() {
            return Ok(());
        }

        let seq = self.state.last_seq.entry(tick.instrument_id.clone()).or_insert(0);
        *seq = (*seq).max(tick.sequence);

        if tick.instrument_id == self.state.config.index_symbol {
            self.on_index_tick(&tick).await?;
        } else if let Some(side) = self.leg_for_instrument(&tick.instrument_id) {
            self.on_leg_tick(side, &tick).await?;
        } else {
            debug!(instrument = %tick.instrument_id, "Tick for unknown instrument ignored");
        }

        self.persist().await
    }

    /// Handle a tick of the underlying index.
    async fn on_index_tick(&mut self, tick: &Tick) -> Result<(), EngineError> {
        self.state.last_underlying_price = Some(tick.last_price);
        let time_of_day = tick.timestamp.time();
        let config = &self.state.config;

        if tick.timestamp.date_naive() > config.expiry {
            self.expire_open_legs(tick.timestamp);
            if matches!(
                self.state.phase,
                StrategyPhase::Idle | StrategyPhase::AwaitingEntry
            ) {
                info!("Contract expiry passed before entry, closing session");
                self.state.phase = StrategyPhase::Closed;
            }
            return Ok(());
        }

        if time_of_day >= config.square_off_time {
            self.square_off_legs(ExitReason::SquareOff, tick.timestamp)
                .await;
            if matches!(
                self.state.phase,
                StrategyPhase::Idle | StrategyPhase::AwaitingEntry
            ) {
                info!("Square-off time reached before entry, closing session");
                self.state.phase = StrategyPhase::Closed;
            }
            return Ok(());
        }

        if self.state.phase == StrategyPhase::Idle && time_of_day >= config.entry_time {
            info!(
                underlying = %tick.last_price,
                "Entry window open, awaiting entry"
            );
            self.state.phase = StrategyPhase::AwaitingEntry;
        }

        if self.state.phase == StrategyPhase::AwaitingEntry {
            self.try_enter(tick.last_price, tick.timestamp).await;
        }

        Ok(())
    }

    /// Handle a tick of a leg instrument.
    async fn on_leg_tick(&mut self, side: LegSide, tick: &Tick) -> Result<(), EngineError> {
        match self.state.leg(side).status {
            LegStatus::Entered => {
                let config = &self.state.config;
                let premium = tick.last_price;

                if premium <= config.min_price_to_sell {
                    info!(
                        leg = side.label(),
                        premium = %premium,
                        floor = %config.min_price_to_sell,
                        "Premium decayed to floor, exiting leg"
                    );
                    self.trigger_exit(side, ExitReason::PriceDecay, tick.timestamp)
                        .await;
                } else if let Some(entry_premium) = self.state.leg(side).entry_premium
                    && premium >= entry_premium * config.stop_loss_multiple
                {
                    warn!(
                        leg = side.label(),
                        premium = %premium,
                        entry_premium = %entry_premium,
                        "Stop-loss level reached, exiting leg"
                    );
                    self.trigger_exit(side, ExitReason::StopLoss, tick.timestamp)
                        .await;
                }
            }
            // Exit order in flight: poll its outcome.
            LegStatus::Exiting => {
                self.settle_exit(side, tick.timestamp).await;
            }
            _ => {}
        }
        Ok(())
    }

    /// Map an instrument id to the leg trading it.
    fn leg_for_instrument(&self, instrument_id: &str) -> Option<LegSide> {
        [LegSide::Ce, LegSide::Pe].into_iter().find(|&side| {
            self.state
                .leg(side)
                .instrument_id()
                .is_some_and(|id| id == instrument_id)
        })
    }

    // ========================================================================
    // Entry
    // ========================================================================

    /// Select strikes at ATM ± gap and place both entry sell orders.
    ///
    /// Legs are resolved independently: one leg failing never blocks the
    /// other. Once both legs are resolved the phase advances.
    async fn try_enter(&mut self, spot: Decimal, now: DateTime<Utc>) {
        for side in [LegSide::Ce, LegSide::Pe] {
            if self.state.leg(side).status == LegStatus::Pending {
                self.enter_leg(side, spot, now).await;
            }
        }

        let resolved = [LegSide::Ce, LegSide::Pe].into_iter().all(|side| {
            matches!(
                self.state.leg(side).status,
                LegStatus::Entered | LegStatus::Failed
            )
        });
        if resolved {
            let any_entered = self.state.ce.status == LegStatus::Entered
                || self.state.pe.status == LegStatus::Entered;
            if any_entered {
                self.state.phase = StrategyPhase::LegsActive;
                info!(
                    ce = ?self.state.ce.status,
                    pe = ?self.state.pe.status,
                    "Legs active"
                );
            } else {
                self.state.phase = StrategyPhase::Closed;
                warn!("Both legs failed to enter, closing session");
            }
        }
    }

    /// Enter one leg: pick the strike, then place the sell order with a
    /// bounded rejected-retry loop.
    async fn enter_leg(&mut self, side: LegSide, spot: Decimal, now: DateTime<Utc>) {
        let selection = match self.select_strike(side, spot).await {
            Ok(Some(selection)) => selection,
            Ok(None) => {
                self.fail_leg(side, "no strike clears the entry premium floor");
                return;
            }
            Err(e) => {
                self.fail_leg(side, &format!("strike selection failed: {e}"));
                return;
            }
        };
        let (instrument, quoted_premium) = selection;
        let instrument_id = instrument.trading_symbol();

        info!(
            leg = side.label(),
            instrument = %instrument_id,
            strike = %instrument.strike,
            premium = %quoted_premium,
            "Entry strike selected"
        );
        self.state.leg_mut(side).instrument = Some(instrument);

        let mut backoff = BackoffCalculator::new(&self.retry);
        loop {
            let leg = self.state.leg_mut(side);
            leg.status = LegStatus::Entering;
            leg.entry_attempts += 1;
            let attempts = leg.entry_attempts;
            let quantity = leg.quantity;

            let intent = OrderIntent {
                instrument_id: instrument_id.clone(),
                side: OrderSide::Sell,
                quantity,
                limit_price: None,
                session_id: self.state.session_id.clone(),
                tag: format!("survivor-entry-{}", side.label()),
            };

            match self.tracker.submit(intent).await {
                Ok(order) if order.status == OrderStatus::Rejected => {
                    if attempts > self.execution.entry_retry_limit {
                        self.fail_leg(
                            side,
                            &format!(
                                "entry rejected {attempts} time(s): {}",
                                order.status_message
                            ),
                        );
                        return;
                    }
                    warn!(
                        leg = side.label(),
                        attempt = attempts,
                        reason = %order.status_message,
                        "Entry rejected, retrying"
                    );
                    if let Some(delay) = backoff.next_backoff() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Ok(order) => {
                    let order = match self.tracker.refresh(&order.client_order_id).await {
                        Ok(refreshed) => refreshed,
                        Err(e) => {
                            debug!(leg = side.label(), error = %e, "Entry refresh failed, using ack state");
                            order
                        }
                    };
                    let leg = self.state.leg_mut(side);
                    leg.entry_order_id = Some(order.client_order_id.clone());
                    leg.entry_premium = order.fill_price.or(Some(quoted_premium));
                    leg.opened_at = Some(now);
                    leg.status = LegStatus::Entered;

                    if let Err(e) = self.dispatcher.subscribe(&[instrument_id.clone()]) {
                        // Already subscribed from a prior resume; harmless.
                        debug!(leg = side.label(), error = %e, "Leg already subscribed");
                    }

                    info!(
                        leg = side.label(),
                        instrument = %instrument_id,
                        order = %order.client_order_id,
                        entry_premium = %self.state.leg(side).entry_premium.unwrap_or_default(),
                        "Leg entered"
                    );
                    return;
                }
                Err(e) => {
                    self.fail_leg(side, &format!("entry placement failed: {e}"));
                    return;
                }
            }
        }
    }

    /// Find the closest strike at the configured gap whose premium clears
    /// the entry floor, stepping one grid step closer to spot until the
    /// grid is exhausted.
    async fn select_strike(
        &self,
        side: LegSide,
        spot: Decimal,
    ) -> Result<Option<(Instrument, Decimal)>, EngineError> {
        let config = &self.state.config;
        let step = config.strike_step;
        let atm = (spot / step).round() * step;
        let mut offset = match side {
            LegSide::Ce => config.ce_gap,
            LegSide::Pe => config.pe_gap,
        };

        loop {
            let strike = match side {
                LegSide::Ce => atm + offset,
                LegSide::Pe => atm - offset,
            };
            let instrument = Instrument {
                underlying: config.index_symbol.clone(),
                symbol_initials: config.symbol_initials.clone(),
                expiry: config.expiry,
                strike,
                kind: match side {
                    LegSide::Ce => OptionKind::Call,
                    LegSide::Pe => OptionKind::Put,
                },
            };

            match self.broker.get_quote(&instrument.trading_symbol()).await {
                Ok(premium) if premium > config.min_price_to_sell => {
                    return Ok(Some((instrument, premium)));
                }
                Ok(premium) => {
                    info!(
                        leg = side.label(),
                        strike = %strike,
                        premium = %premium,
                        floor = %config.min_price_to_sell,
                        "Premium below entry floor, stepping strike closer"
                    );
                }
                Err(e) if e.is_transient() => return Err(EngineError::Broker(e)),
                Err(e) => {
                    debug!(
                        leg = side.label(),
                        strike = %strike,
                        error = %e,
                        "Strike unavailable, stepping closer"
                    );
                }
            }

            if offset < step {
                return Ok(None);
            }
            offset -= step;
        }
    }

    /// Halt automation for one leg and raise an operator-visible alert.
    /// The sibling leg continues independently.
    fn fail_leg(&mut self, side: LegSide, reason: &str) {
        let alert = format!("{} leg failed: {reason}", side.label().to_uppercase());
        error!(leg = side.label(), reason = %reason, "Leg failed, automation halted");
        self.state.alerts.push(alert);
        self.state.leg_mut(side).status = LegStatus::Failed;
        self.recompute_phase();
    }

    // ========================================================================
    // Exit
    // ========================================================================

    /// Place the buy-back order for one leg.
    ///
    /// A placement failure reverts the leg to `Entered` so the next tick
    /// satisfying the exit condition tries again; closing an open position
    /// is never abandoned.
    async fn trigger_exit(&mut self, side: LegSide, reason: ExitReason, now: DateTime<Utc>) {
        let (instrument_id, quantity) = {
            let leg = self.state.leg_mut(side);
            let Some(instrument_id) = leg.instrument_id() else {
                return;
            };
            leg.status = LegStatus::Exiting;
            leg.exit_reason = Some(reason);
            (instrument_id, leg.quantity)
        };

        let intent = OrderIntent {
            instrument_id,
            side: OrderSide::Buy,
            quantity,
            limit_price: None,
            session_id: self.state.session_id.clone(),
            tag: format!("survivor-exit-{}", side.label()),
        };

        match self.tracker.submit(intent).await {
            Ok(order) if order.status == OrderStatus::Rejected => {
                warn!(
                    leg = side.label(),
                    reason = %order.status_message,
                    "Exit rejected, will retry on next tick"
                );
                let leg = self.state.leg_mut(side);
                leg.status = LegStatus::Entered;
                leg.exit_reason = None;
            }
            Ok(order) => {
                self.state.leg_mut(side).exit_order_id = Some(order.client_order_id.clone());
                self.settle_exit(side, now).await;
                // An exit order in flight already counts toward the exit
                // phases.
                self.recompute_phase();
            }
            Err(e) => {
                error!(
                    leg = side.label(),
                    error = %e,
                    "Exit placement failed, will retry on next tick"
                );
                self.state
                    .alerts
                    .push(format!("{} leg exit placement failed: {e}", side.label()));
                let leg = self.state.leg_mut(side);
                leg.status = LegStatus::Entered;
                leg.exit_reason = None;
            }
        }
    }

    /// Poll the in-flight exit order and finalize the leg once it fills.
    async fn settle_exit(&mut self, side: LegSide, now: DateTime<Utc>) {
        let Some(order_id) = self.state.leg(side).exit_order_id.clone() else {
            return;
        };
        match self.tracker.refresh(&order_id).await {
            Ok(order) => match order.status {
                OrderStatus::Filled => {
                    let price = order.fill_price.unwrap_or(Decimal::ZERO);
                    self.finalize_exit(side, price, now);
                }
                OrderStatus::Rejected | OrderStatus::Cancelled => {
                    warn!(
                        leg = side.label(),
                        order = %order_id,
                        status = ?order.status,
                        "Exit order did not execute, re-arming leg"
                    );
                    let leg = self.state.leg_mut(side);
                    leg.status = LegStatus::Entered;
                    leg.exit_order_id = None;
                    leg.exit_reason = None;
                }
                _ => {}
            },
            Err(e) => {
                debug!(leg = side.label(), error = %e, "Exit status poll failed");
            }
        }
    }

    /// Book the round trip and advance the phase.
    fn finalize_exit(&mut self, side: LegSide, exit_price: Decimal, now: DateTime<Utc>) {
        let trade = {
            let leg = self.state.leg_mut(side);
            let entry_premium = leg.entry_premium.unwrap_or(Decimal::ZERO);
            let pnl = (entry_premium - exit_price) * Decimal::from(leg.quantity);
            leg.status = LegStatus::Exited;
            ClosedTrade {
                side,
                instrument_id: leg.instrument_id().unwrap_or_default(),
                quantity: leg.quantity,
                entry_premium,
                exit_price,
                pnl,
                exit_reason: leg.exit_reason.unwrap_or(ExitReason::PriceDecay),
                opened_at: leg.opened_at.unwrap_or(now),
                closed_at: now,
            }
        };

        info!(
            leg = side.label(),
            instrument = %trade.instrument_id,
            entry_premium = %trade.entry_premium,
            exit_price = %trade.exit_price,
            pnl = %trade.pnl,
            reason = ?trade.exit_reason,
            "Leg exited"
        );

        self.state.realized_pnl += trade.pnl;
        self.state.closed_trades.push(trade);
        self.recompute_phase();
    }

    /// Mark still-open legs expired, realizing the full premium.
    fn expire_open_legs(&mut self, now: DateTime<Utc>) {
        for side in [LegSide::Ce, LegSide::Pe] {
            let leg = self.state.leg(side);
            if leg.status.is_open() {
                info!(leg = side.label(), "Contract expired, position lapses");
                self.state.leg_mut(side).exit_reason = Some(ExitReason::Expiry);
                self.finalize_exit(side, Decimal::ZERO, now);
                self.state.leg_mut(side).status = LegStatus::Expired;
            }
        }
        self.recompute_phase();
    }

    /// Submit exits for all open legs in tie-break order.
    async fn square_off_legs(&mut self, reason: ExitReason, now: DateTime<Utc>) {
        for side in self.state.config.exit_tie_break.order() {
            match self.state.leg(side).status {
                LegStatus::Entered => self.trigger_exit(side, reason, now).await,
                LegStatus::Exiting => self.settle_exit(side, now).await,
                _ => {}
            }
        }
    }

    /// Recompute the phase from the two leg projections.
    fn recompute_phase(&mut self) {
        if !matches!(
            self.state.phase,
            StrategyPhase::LegsActive
                | StrategyPhase::ExitCe
                | StrategyPhase::ExitPe
                | StrategyPhase::ExitBoth
        ) {
            return;
        }

        let exit_underway =
            |status: LegStatus| status.is_terminal() || status == LegStatus::Exiting;
        let ce = self.state.ce.status;
        let pe = self.state.pe.status;

        self.state.phase = if ce.is_terminal() && pe.is_terminal() {
            StrategyPhase::Closed
        } else if exit_underway(ce) && exit_underway(pe) {
            StrategyPhase::ExitBoth
        } else if exit_underway(ce) {
            StrategyPhase::ExitCe
        } else if exit_underway(pe) {
            StrategyPhase::ExitPe
        } else {
            StrategyPhase::LegsActive
        };
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Operator-initiated stop: no new entries, graceful square-off under a
    /// deadline, then persist.
    async fn graceful_shutdown(&mut self) -> Result<(), EngineError> {
        info!(session_id = %self.state.session_id, "Shutdown requested");

        if matches!(
            self.state.phase,
            StrategyPhase::Idle | StrategyPhase::AwaitingEntry
        ) {
            self.state.phase = StrategyPhase::Closed;
            return self.persist().await;
        }

        let grace = std::time::Duration::from_millis(self.execution.shutdown_grace_ms);
        let deadline = tokio::time::timeout(grace, async {
            self.square_off_legs(ExitReason::Shutdown, Utc::now()).await;
        })
        .await;

        if deadline.is_err() {
            let unresolved: Vec<&str> = [LegSide::Ce, LegSide::Pe]
                .iter()
                .filter(|&&side| self.state.leg(side).status.is_open())
                .map(|side| side.label())
                .collect();
            warn!(
                unresolved = ?unresolved,
                grace_ms = self.execution.shutdown_grace_ms,
                "Graceful shutdown timed out, forcing stop with unresolved legs"
            );
        }

        self.persist().await
    }

    /// Persist the session snapshot through the tracker's session store.
    async fn persist(&self) -> Result<(), EngineError> {
        self.tracker.save_session(&self.state).await?;
        Ok(())
    }
}
