//! Order tracker: the single source of truth for order state.
//!
//! All writes between the strategy engine and the broker go through this
//! layer. The tracker persists a `Pending` record BEFORE every broker call,
//! so a crash between send and acknowledgment leaves a recoverable record
//! rather than an untracked order, and it owns the durable stores outright:
//! the engine never writes them directly.

mod reconcile;
mod store;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{
    BackoffCalculator, BrokerError, BrokerOrderRef, BrokerSession, OrderSpec, RetryPolicy,
};
use crate::models::{Fill, Order, OrderIntent, OrderStatus, StrategyState};

pub use reconcile::{OrphanKind, OrphanedOrder, ReconcileReport};
pub use store::{JsonStore, StoreError};

/// File name of the order store inside the data directory.
const ORDERS_FILE: &str = "orders.json";
/// File name of the session store inside the data directory.
const SESSIONS_FILE: &str = "sessions.json";

/// Status message marking an orphan for operator review.
const ORPHAN_MESSAGE: &str = "LOCAL_ONLY_ORPHAN";

/// Errors from tracker operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Durable store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Broker call failed after retries.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// No order with the given client id exists.
    #[error("Unknown order: {0}")]
    UnknownOrder(String),
}

/// Order tracker over a broker session.
///
/// Mutations are serialized through internal async mutexes (single-writer
/// discipline); reads return cloned snapshots so concurrent observers never
/// see a partial update.
pub struct OrderTracker<B: BrokerSession> {
    broker: Arc<B>,
    orders: Mutex<JsonStore<Order>>,
    sessions: Mutex<JsonStore<StrategyState>>,
    retry: RetryPolicy,
}

impl<B: BrokerSession> OrderTracker<B> {
    /// Open (or create) the stores under `data_dir` and wrap the broker.
    ///
    /// # Errors
    ///
    /// Returns an error if either store cannot be opened.
    pub fn open(broker: Arc<B>, data_dir: &Path, retry: RetryPolicy) -> Result<Self, TrackerError> {
        let orders = JsonStore::open(data_dir.join(ORDERS_FILE))?;
        let sessions = JsonStore::open(data_dir.join(SESSIONS_FILE))?;
        Ok(Self {
            broker,
            orders: Mutex::new(orders),
            sessions: Mutex::new(sessions),
            retry,
        })
    }

    /// Submit an order intent to the broker.
    ///
    /// Persists a `Pending` record before the broker call, retries transient
    /// failures with bounded backoff, and records the outcome. A terminal
    /// broker rejection is returned as an order in `Rejected` status, not an
    /// error; the caller decides whether to retry the placement.
    ///
    /// # Errors
    ///
    /// Returns an error when persistence fails, or when transient retries
    /// are exhausted; in that case the record stays `Pending` because the
    /// broker-side outcome is unknown, and startup reconciliation resolves
    /// it.
    pub async fn submit(&self, intent: OrderIntent) -> Result<Order, TrackerError> {
        let client_order_id = Uuid::new_v4().to_string();
        let mut order = Order::from_intent(&intent, client_order_id, Utc::now());

        // Persist-before-send.
        {
            let mut orders = self.orders.lock().await;
            orders.upsert(&order.client_order_id, order.clone())?;
        }
        info!(
            client_order_id = %order.client_order_id,
            instrument = %order.instrument_id,
            side = ?order.side,
            quantity = order.quantity,
            "Order persisted, sending to broker"
        );

        let spec = OrderSpec {
            instrument_id: intent.instrument_id.clone(),
            side: intent.side,
            quantity: intent.quantity,
            limit_price: intent.limit_price,
        };

        match self.place_with_retry(&spec, &order.client_order_id).await {
            Ok(order_ref) => {
                order.broker_order_id = Some(order_ref.0);
                order.status = OrderStatus::Acknowledged;
                order.last_update_at = Utc::now();
            }
            Err(BrokerError::Rejected(reason)) => {
                warn!(
                    client_order_id = %order.client_order_id,
                    reason = %reason,
                    "Order rejected by broker"
                );
                order.status = OrderStatus::Rejected;
                order.status_message = reason;
                order.last_update_at = Utc::now();
            }
            Err(e) => {
                // Transient retries exhausted: the broker may or may not
                // have the order, so the record stays Pending for
                // reconciliation to resolve.
                error!(
                    client_order_id = %order.client_order_id,
                    error = %e,
                    "Order submission failed after retries, record left Pending"
                );
                return Err(TrackerError::Broker(e));
            }
        }

        {
            let mut orders = self.orders.lock().await;
            orders.upsert(&order.client_order_id, order.clone())?;
        }
        Ok(order)
    }

    /// Place the order, retrying transient failures per the retry policy.
    async fn place_with_retry(
        &self,
        spec: &OrderSpec,
        client_order_id: &str,
    ) -> Result<BrokerOrderRef, BrokerError> {
        let mut backoff = BackoffCalculator::new(&self.retry);
        loop {
            match self.broker.place_order(spec).await {
                Ok(order_ref) => return Ok(order_ref),
                Err(e) if e.is_transient() => match backoff.next_backoff() {
                    Some(delay) => {
                        warn!(
                            client_order_id = %client_order_id,
                            attempt = backoff.current_attempt(),
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Transient broker error, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Apply a status update to an order. Idempotent: re-applying the same
    /// terminal update is a no-op and the store file is untouched, and a
    /// non-terminal update never overwrites a terminal status.
    ///
    /// # Errors
    ///
    /// Returns `UnknownOrder` for an unknown client id, or a store error if
    /// the flush fails.
    pub async fn update(
        &self,
        client_order_id: &str,
        status: OrderStatus,
        fill: Option<Fill>,
    ) -> Result<Order, TrackerError> {
        let mut orders = self.orders.lock().await;
        let mut order = orders
            .get(client_order_id)
            .cloned()
            .ok_or_else(|| TrackerError::UnknownOrder(client_order_id.to_string()))?;

        if order.status == status
            && fill.is_none_or(|f| {
                order.fill_price == Some(f.price) && order.filled_quantity == f.quantity
            })
        {
            debug!(client_order_id = %client_order_id, status = ?status, "Duplicate update ignored");
            return Ok(order);
        }
        if order.status.is_terminal() {
            warn!(
                client_order_id = %client_order_id,
                current = ?order.status,
                attempted = ?status,
                "Ignoring update to terminal order"
            );
            return Ok(order);
        }

        order.status = status;
        if let Some(fill) = fill {
            order.fill_price = Some(fill.price);
            order.filled_quantity = fill.quantity;
        }
        order.last_update_at = Utc::now();
        orders.upsert(client_order_id, order.clone())?;

        info!(
            client_order_id = %client_order_id,
            status = ?order.status,
            fill_price = ?order.fill_price,
            "Order updated"
        );
        Ok(order)
    }

    /// Query the broker for an order's current status and fold it into the
    /// local record.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown orders, failed broker calls, or a
    /// failed flush.
    pub async fn refresh(&self, client_order_id: &str) -> Result<Order, TrackerError> {
        let (order, broker_order_id) = {
            let orders = self.orders.lock().await;
            let order = orders
                .get(client_order_id)
                .cloned()
                .ok_or_else(|| TrackerError::UnknownOrder(client_order_id.to_string()))?;
            let broker_order_id = order.broker_order_id.clone();
            (order, broker_order_id)
        };

        let Some(broker_order_id) = broker_order_id else {
            // Never acknowledged; nothing to refresh from.
            return Ok(order);
        };

        let status = self
            .status_with_retry(&BrokerOrderRef(broker_order_id))
            .await?;
        let fill = status.fill_price.map(|price| Fill {
            price,
            quantity: status.filled_quantity,
        });
        self.update(client_order_id, status.status, fill).await
    }

    /// Query order status, retrying transient failures.
    async fn status_with_retry(
        &self,
        order_ref: &BrokerOrderRef,
    ) -> Result<crate::broker::BrokerOrderStatus, BrokerError> {
        let mut backoff = BackoffCalculator::new(&self.retry);
        loop {
            match self.broker.get_order_status(order_ref).await {
                Ok(status) => return Ok(status),
                Err(e) if e.is_transient() => match backoff.next_backoff() {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Align persisted non-terminal orders with the broker's records.
    ///
    /// Mandatory before a prior session resumes. Broker-side truth wins for
    /// orders the broker knows; orders the broker has no record of are
    /// marked as orphans for operator review and never auto-resolved.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker cannot be reached after retries; a
    /// session must not resume on a failed reconciliation.
    pub async fn reconcile(&self) -> Result<ReconcileReport, TrackerError> {
        let open_orders: Vec<Order> = {
            let orders = self.orders.lock().await;
            orders
                .values()
                .into_iter()
                .filter(|o| o.status.is_active())
                .collect()
        };

        let mut report = ReconcileReport {
            checked: open_orders.len(),
            ..Default::default()
        };

        for order in open_orders {
            match &order.broker_order_id {
                None => {
                    self.mark_orphan(&order, OrphanKind::NeverSent, &mut report)
                        .await?;
                }
                Some(broker_order_id) => {
                    match self
                        .status_with_retry(&BrokerOrderRef(broker_order_id.clone()))
                        .await
                    {
                        Ok(status) => {
                            if status.status != order.status {
                                let fill = status.fill_price.map(|price| Fill {
                                    price,
                                    quantity: status.filled_quantity,
                                });
                                self.update(&order.client_order_id, status.status, fill)
                                    .await?;
                                report.updated += 1;
                            }
                        }
                        Err(BrokerError::OrderNotFound(_)) => {
                            self.mark_orphan(&order, OrphanKind::MissingAtBroker, &mut report)
                                .await?;
                        }
                        Err(e) => return Err(TrackerError::Broker(e)),
                    }
                }
            }
        }

        info!(
            checked = report.checked,
            updated = report.updated,
            orphans = report.orphans.len(),
            "Reconciliation complete"
        );
        Ok(report)
    }

    /// Record an orphan in the report and stamp the stored order for
    /// operator review.
    async fn mark_orphan(
        &self,
        order: &Order,
        kind: OrphanKind,
        report: &mut ReconcileReport,
    ) -> Result<(), TrackerError> {
        error!(
            client_order_id = %order.client_order_id,
            instrument = %order.instrument_id,
            kind = %kind,
            "Orphaned order requires operator review"
        );

        let mut orders = self.orders.lock().await;
        if let Some(stored) = orders.get(&order.client_order_id) {
            let mut stored = stored.clone();
            if stored.status_message != ORPHAN_MESSAGE {
                stored.status_message = ORPHAN_MESSAGE.to_string();
                stored.last_update_at = Utc::now();
                orders.upsert(&order.client_order_id, stored)?;
            }
        }

        report.orphans.push(OrphanedOrder {
            kind,
            client_order_id: order.client_order_id.clone(),
            broker_order_id: order.broker_order_id.clone(),
            instrument_id: order.instrument_id.clone(),
            local_status: order.status,
        });
        Ok(())
    }

    /// Snapshot one order.
    pub async fn order(&self, client_order_id: &str) -> Option<Order> {
        self.orders.lock().await.get(client_order_id).cloned()
    }

    /// Snapshot all orders of a session.
    pub async fn session_orders(&self, session_id: &str) -> Vec<Order> {
        self.orders
            .lock()
            .await
            .values()
            .into_iter()
            .filter(|o| o.session_id == session_id)
            .collect()
    }

    /// Persist a session state snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub async fn save_session(&self, state: &StrategyState) -> Result<(), TrackerError> {
        let mut sessions = self.sessions.lock().await;
        sessions.upsert(&state.session_id, state.clone())?;
        Ok(())
    }

    /// Load a persisted session by id.
    pub async fn load_session(&self, session_id: &str) -> Option<StrategyState> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    /// The most recently created non-terminal session, if any.
    pub async fn resumable_session(&self) -> Option<StrategyState> {
        self.sessions
            .lock()
            .await
            .values()
            .into_iter()
            .filter(|s| !s.phase.is_terminal())
            .max_by_key(|s| s.created_at)
    }

    /// Broker this tracker routes through.
    #[must_use]
    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }
}
