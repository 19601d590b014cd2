//! Broker capability interface.
//!
//! [`BrokerSession`] is the fixed capability surface every brokerage
//! integration must satisfy: tick subscription, historical data, and order
//! placement/modification/cancellation with the exact semantics the strategy
//! engine and order tracker rely on. Strategy and dispatcher code depend only
//! on this trait, never on a concrete brokerage type.
//!
//! Authentication is per-implementation: each broker exposes its own
//! `authenticate(config) -> Session` constructor (TOTP flows, OAuth redirects
//! and session capture live behind it and are out of scope here).
//! [`PaperBroker`] is the in-repo implementation used by backtests and tests.

mod paper;
mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::feed::ChannelTickSource;
use crate::models::{Bar, OrderSide, OrderStatus};

pub use paper::PaperBroker;
pub use retry::{BackoffCalculator, RetryPolicy};

/// Errors from broker calls.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Network/transport failure; retryable.
    #[error("Broker transport error: {0}")]
    Transport(String),

    /// Rate limited by the broker; retryable.
    #[error("Broker rate limited: {0}")]
    RateLimited(String),

    /// Order explicitly rejected by the broker; not retryable here.
    #[error("Order rejected: {0}")]
    Rejected(String),

    /// Broker has no record of the referenced order.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Instrument is unknown to the broker.
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    /// The session is not (or no longer) authenticated.
    #[error("Broker session not authenticated")]
    NotAuthenticated,
}

impl BrokerError {
    /// Returns true if the error is transient and worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited(_))
    }
}

/// Parameters of one order placement or modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSpec {
    /// Instrument identifier (trading symbol).
    pub instrument_id: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Quantity in units.
    pub quantity: u32,
    /// Optional limit price; market order when absent.
    pub limit_price: Option<Decimal>,
}

/// Broker-side order reference returned by `place_order`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerOrderRef(pub String);

impl std::fmt::Display for BrokerOrderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broker-reported order status snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerOrderStatus {
    /// Current order status.
    pub status: OrderStatus,
    /// Average fill price once (partially) filled.
    pub fill_price: Option<Decimal>,
    /// Filled quantity.
    pub filled_quantity: u32,
    /// Broker status message, if any.
    pub message: String,
}

/// Capability surface of an authenticated broker session.
///
/// Implementations resolve each call to the same result shape whether the
/// underlying transport is synchronous or callback-driven.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Broker name for logging.
    fn broker_name(&self) -> &'static str;

    /// Open the live tick stream for a set of instruments.
    ///
    /// The returned source satisfies the same `TickSource` contract the
    /// backtest replay does; the dispatcher never learns which is behind it.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be established.
    async fn subscribe_ticks(
        &self,
        instrument_ids: &[String],
    ) -> Result<ChannelTickSource, BrokerError>;

    /// Retrieve historical bars for an instrument over a time range.
    ///
    /// # Errors
    ///
    /// Returns an error if the instrument is unknown or the call fails.
    async fn get_historical(
        &self,
        instrument_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, BrokerError>;

    /// Get the last traded price of an instrument.
    ///
    /// # Errors
    ///
    /// Returns an error if the instrument has no quote.
    async fn get_quote(&self, instrument_id: &str) -> Result<Decimal, BrokerError>;

    /// Place an order.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` for terminal broker rejections and `Transport`/
    /// `RateLimited` for transient failures the caller may retry.
    async fn place_order(&self, spec: &OrderSpec) -> Result<BrokerOrderRef, BrokerError>;

    /// Modify an active order.
    ///
    /// # Errors
    ///
    /// Returns an error if the order is unknown or already terminal.
    async fn modify_order(
        &self,
        order_ref: &BrokerOrderRef,
        spec: &OrderSpec,
    ) -> Result<(), BrokerError>;

    /// Cancel an active order.
    ///
    /// # Errors
    ///
    /// Returns an error if the order is unknown or already terminal.
    async fn cancel_order(&self, order_ref: &BrokerOrderRef) -> Result<(), BrokerError>;

    /// Query the current status of an order.
    ///
    /// # Errors
    ///
    /// Returns `OrderNotFound` when the broker has no record of the order.
    async fn get_order_status(
        &self,
        order_ref: &BrokerOrderRef,
    ) -> Result<BrokerOrderStatus, BrokerError>;
}
