//! Paper broker: deterministic simulated execution.
//!
//! Implements the full [`BrokerSession`] capability surface without real
//! broker calls. Backtests run against it, and tests use its failure
//! injection to exercise retry, rejection, and crash-recovery paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::feed::ChannelTickSource;
use crate::models::{Bar, OrderStatus, Tick};

use super::{BrokerError, BrokerOrderRef, BrokerOrderStatus, BrokerSession, OrderSpec};

/// Capacity of the simulated tick stream.
const TICK_CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
struct PaperOrder {
    spec: OrderSpec,
    status: OrderStatus,
    fill_price: Option<Decimal>,
    filled_quantity: u32,
}

/// Simulated broker session.
///
/// Market orders fill immediately at the current quote unless fills are held
/// via [`PaperBroker::hold_fills`], which keeps them `Acknowledged` until
/// [`PaperBroker::fill_open_orders`] runs (used to simulate slow brokers and
/// crash windows).
#[derive(Debug, Default)]
pub struct PaperBroker {
    quotes: RwLock<HashMap<String, Decimal>>,
    bars: RwLock<HashMap<String, Vec<Bar>>>,
    orders: RwLock<HashMap<String, PaperOrder>>,
    order_counter: AtomicU64,
    tick_tx: Mutex<Option<mpsc::Sender<Tick>>>,
    sequences: Mutex<HashMap<String, u64>>,
    transient_failures: AtomicU32,
    rejected_instruments: RwLock<HashSet<String>>,
    hold: AtomicBool,
}

impl PaperBroker {
    /// Authenticate a paper session. Paper trading needs no credentials, so
    /// this never fails; the signature mirrors real broker constructors.
    #[must_use]
    pub fn authenticate() -> Self {
        info!("Paper broker session opened");
        Self::default()
    }

    /// Set the current quote for an instrument.
    pub fn set_quote(&self, instrument_id: &str, price: Decimal) {
        if let Ok(mut quotes) = self.quotes.write() {
            quotes.insert(instrument_id.to_string(), price);
        }
    }

    /// Load historical bars served by `get_historical`.
    pub fn load_bars(&self, instrument_id: &str, bars: Vec<Bar>) {
        if let Ok(mut map) = self.bars.write() {
            map.insert(instrument_id.to_string(), bars);
        }
    }

    /// Update the quote and emit a tick on the subscribed stream with the
    /// next dense per-instrument sequence number.
    pub async fn push_tick(&self, instrument_id: &str, price: Decimal, timestamp: DateTime<Utc>) {
        self.set_quote(instrument_id, price);

        let sequence = {
            let mut sequences = match self.sequences.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let seq = sequences.entry(instrument_id.to_string()).or_insert(0);
            *seq += 1;
            *seq
        };

        let tx = {
            let guard = match self.tick_tx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.clone()
        };
        if let Some(tx) = tx {
            let tick = Tick::new(instrument_id, price, timestamp, sequence);
            // Receiver dropped means the session is shutting down.
            let _ = tx.send(tick).await;
        }
    }

    /// Fail the next `count` `place_order` calls with a transport error.
    pub fn inject_transient_failures(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Reject every order for the given instrument.
    pub fn reject_instrument(&self, instrument_id: &str) {
        if let Ok(mut set) = self.rejected_instruments.write() {
            set.insert(instrument_id.to_string());
        }
    }

    /// Stop rejecting orders for the given instrument.
    pub fn accept_instrument(&self, instrument_id: &str) {
        if let Ok(mut set) = self.rejected_instruments.write() {
            set.remove(instrument_id);
        }
    }

    /// Hold placed orders at `Acknowledged` instead of filling immediately.
    pub fn hold_fills(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    /// Fill all currently `Acknowledged` orders at their instruments'
    /// current quotes.
    pub fn fill_open_orders(&self) {
        let Ok(mut orders) = self.orders.write() else {
            return;
        };
        let quotes = self.quotes.read().map(|q| q.clone()).unwrap_or_default();

        for (order_ref, order) in orders.iter_mut() {
            if order.status == OrderStatus::Acknowledged {
                let price = quotes
                    .get(&order.spec.instrument_id)
                    .copied()
                    .or(order.spec.limit_price)
                    .unwrap_or(Decimal::ZERO);
                order.status = OrderStatus::Filled;
                order.fill_price = Some(price);
                order.filled_quantity = order.spec.quantity;
                debug!(order_ref = %order_ref, price = %price, "Paper order filled");
            }
        }
    }

    /// Number of orders placed so far.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.orders.read().map(|o| o.len()).unwrap_or(0)
    }
}

#[async_trait]
impl BrokerSession for PaperBroker {
    fn broker_name(&self) -> &'static str {
        "paper"
    }

    async fn subscribe_ticks(
        &self,
        instrument_ids: &[String],
    ) -> Result<ChannelTickSource, BrokerError> {
        let (tx, source) = ChannelTickSource::pair(TICK_CHANNEL_CAPACITY);
        {
            let mut guard = match self.tick_tx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = Some(tx);
        }
        info!(instruments = ?instrument_ids, "Paper tick stream opened");
        Ok(source)
    }

    async fn get_historical(
        &self,
        instrument_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, BrokerError> {
        let bars = self
            .bars
            .read()
            .map(|map| map.get(instrument_id).cloned())
            .unwrap_or_default()
            .ok_or_else(|| BrokerError::UnknownInstrument(instrument_id.to_string()))?;

        Ok(bars
            .into_iter()
            .filter(|bar| bar.timestamp >= from && bar.timestamp <= to)
            .collect())
    }

    async fn get_quote(&self, instrument_id: &str) -> Result<Decimal, BrokerError> {
        self.quotes
            .read()
            .ok()
            .and_then(|quotes| quotes.get(instrument_id).copied())
            .ok_or_else(|| BrokerError::UnknownInstrument(instrument_id.to_string()))
    }

    async fn place_order(&self, spec: &OrderSpec) -> Result<BrokerOrderRef, BrokerError> {
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BrokerError::Transport(
                "injected transient failure".to_string(),
            ));
        }

        let rejected = self
            .rejected_instruments
            .read()
            .map(|set| set.contains(&spec.instrument_id))
            .unwrap_or(false);
        if rejected {
            return Err(BrokerError::Rejected(format!(
                "orders for {} are rejected",
                spec.instrument_id
            )));
        }

        let id = self.order_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let order_ref = BrokerOrderRef(format!("paper-{id}"));

        let quote = self
            .quotes
            .read()
            .ok()
            .and_then(|quotes| quotes.get(&spec.instrument_id).copied());

        let order = if self.hold.load(Ordering::SeqCst) {
            PaperOrder {
                spec: spec.clone(),
                status: OrderStatus::Acknowledged,
                fill_price: None,
                filled_quantity: 0,
            }
        } else {
            let price = quote.or(spec.limit_price).unwrap_or(Decimal::ZERO);
            PaperOrder {
                spec: spec.clone(),
                status: OrderStatus::Filled,
                fill_price: Some(price),
                filled_quantity: spec.quantity,
            }
        };

        debug!(
            order_ref = %order_ref,
            instrument = %spec.instrument_id,
            side = ?spec.side,
            quantity = spec.quantity,
            status = ?order.status,
            "Paper order placed"
        );

        if let Ok(mut orders) = self.orders.write() {
            orders.insert(order_ref.0.clone(), order);
        }
        Ok(order_ref)
    }

    async fn modify_order(
        &self,
        order_ref: &BrokerOrderRef,
        spec: &OrderSpec,
    ) -> Result<(), BrokerError> {
        let mut orders = self
            .orders
            .write()
            .map_err(|_| BrokerError::Transport("order store poisoned".to_string()))?;
        let order = orders
            .get_mut(&order_ref.0)
            .ok_or_else(|| BrokerError::OrderNotFound(order_ref.0.clone()))?;
        if order.status.is_terminal() {
            return Err(BrokerError::Rejected(format!(
                "order {order_ref} is terminal and cannot be modified"
            )));
        }
        order.spec = spec.clone();
        Ok(())
    }

    async fn cancel_order(&self, order_ref: &BrokerOrderRef) -> Result<(), BrokerError> {
        let mut orders = self
            .orders
            .write()
            .map_err(|_| BrokerError::Transport("order store poisoned".to_string()))?;
        let order = orders
            .get_mut(&order_ref.0)
            .ok_or_else(|| BrokerError::OrderNotFound(order_ref.0.clone()))?;
        if order.status.is_terminal() {
            return Err(BrokerError::Rejected(format!(
                "order {order_ref} is terminal and cannot be cancelled"
            )));
        }
        order.status = OrderStatus::Cancelled;
        Ok(())
    }

    async fn get_order_status(
        &self,
        order_ref: &BrokerOrderRef,
    ) -> Result<BrokerOrderStatus, BrokerError> {
        self.orders
            .read()
            .ok()
            .and_then(|orders| orders.get(&order_ref.0).cloned())
            .map(|order| BrokerOrderStatus {
                status: order.status,
                fill_price: order.fill_price,
                filled_quantity: order.filled_quantity,
                message: String::new(),
            })
            .ok_or_else(|| BrokerError::OrderNotFound(order_ref.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderSide;
    use rust_decimal_macros::dec;

    fn sell_spec(instrument_id: &str, quantity: u32) -> OrderSpec {
        OrderSpec {
            instrument_id: instrument_id.to_string(),
            side: OrderSide::Sell,
            quantity,
            limit_price: None,
        }
    }

    #[tokio::test]
    async fn test_market_order_fills_at_quote() {
        let broker = PaperBroker::authenticate();
        broker.set_quote("NIFTY2580724300PE", dec!(42.5));

        let order_ref = broker
            .place_order(&sell_spec("NIFTY2580724300PE", 75))
            .await
            .unwrap();
        let status = broker.get_order_status(&order_ref).await.unwrap();

        assert_eq!(status.status, OrderStatus::Filled);
        assert_eq!(status.fill_price, Some(dec!(42.5)));
        assert_eq!(status.filled_quantity, 75);
    }

    #[tokio::test]
    async fn test_held_order_stays_acknowledged_until_filled() {
        let broker = PaperBroker::authenticate();
        broker.set_quote("NIFTY2580724700CE", dec!(38));
        broker.hold_fills(true);

        let order_ref = broker
            .place_order(&sell_spec("NIFTY2580724700CE", 75))
            .await
            .unwrap();
        let status = broker.get_order_status(&order_ref).await.unwrap();
        assert_eq!(status.status, OrderStatus::Acknowledged);

        broker.fill_open_orders();
        let status = broker.get_order_status(&order_ref).await.unwrap();
        assert_eq!(status.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_transient_failure_injection() {
        let broker = PaperBroker::authenticate();
        broker.set_quote("X", dec!(10));
        broker.inject_transient_failures(1);

        let first = broker.place_order(&sell_spec("X", 1)).await;
        assert!(matches!(first, Err(BrokerError::Transport(_))));

        let second = broker.place_order(&sell_spec("X", 1)).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_rejected_instrument() {
        let broker = PaperBroker::authenticate();
        broker.set_quote("X", dec!(10));
        broker.reject_instrument("X");

        let result = broker.place_order(&sell_spec("X", 1)).await;
        assert!(matches!(result, Err(BrokerError::Rejected(_))));

        broker.accept_instrument("X");
        assert!(broker.place_order(&sell_spec("X", 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_modify_active_order() {
        let broker = PaperBroker::authenticate();
        broker.set_quote("X", dec!(10));
        broker.hold_fills(true);

        let order_ref = broker.place_order(&sell_spec("X", 75)).await.unwrap();
        let mut spec = sell_spec("X", 150);
        spec.limit_price = Some(dec!(9.5));
        broker.modify_order(&order_ref, &spec).await.unwrap();

        broker.fill_open_orders();
        let status = broker.get_order_status(&order_ref).await.unwrap();
        assert_eq!(status.filled_quantity, 150);
    }

    #[tokio::test]
    async fn test_cancel_terminal_order_fails() {
        let broker = PaperBroker::authenticate();
        broker.set_quote("X", dec!(10));

        let order_ref = broker.place_order(&sell_spec("X", 1)).await.unwrap();
        let result = broker.cancel_order(&order_ref).await;
        assert!(matches!(result, Err(BrokerError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_tick_stream_sequences_are_dense() {
        let broker = PaperBroker::authenticate();
        let mut source = broker
            .subscribe_ticks(&["NIFTY 50".to_string()])
            .await
            .unwrap();

        broker.push_tick("NIFTY 50", dec!(24500), Utc::now()).await;
        broker.push_tick("NIFTY 50", dec!(24510), Utc::now()).await;

        use crate::feed::TickSource;
        let first = source.next_tick().await.unwrap();
        let second = source.next_tick().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
    }
}
