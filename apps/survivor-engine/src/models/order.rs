//! Order lifecycle types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

/// Order status in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Persisted locally, not yet acknowledged by the broker.
    Pending,
    /// Broker acknowledged the order.
    Acknowledged,
    /// Order partially filled.
    PartiallyFilled,
    /// Order completely filled.
    Filled,
    /// Order cancelled.
    Cancelled,
    /// Order rejected by the broker.
    Rejected,
    /// Contract expired while the order/position was still open.
    Expired,
}

impl OrderStatus {
    /// Returns true if the order is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired
        )
    }

    /// Returns true if the order is still active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Acknowledged | Self::PartiallyFilled)
    }
}

/// Fill details attached to a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// Average fill price.
    pub price: Decimal,
    /// Filled quantity.
    pub quantity: u32,
}

/// An order the strategy engine wants placed.
///
/// The order tracker turns intents into tracked [`Order`] records; the engine
/// never talks to the broker directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Instrument identifier (trading symbol).
    pub instrument_id: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Quantity in units.
    pub quantity: u32,
    /// Optional limit price; market order when absent.
    pub limit_price: Option<Decimal>,
    /// Session this intent belongs to.
    pub session_id: String,
    /// Free-form tag recorded on the order (e.g. "survivor-entry-ce").
    pub tag: String,
}

/// Authoritative record of one order's lifecycle.
///
/// Identity fields are immutable; only status and fill fields mutate, and
/// only through the order tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Client-generated identifier (assigned before the broker call).
    pub client_order_id: String,
    /// Broker order identifier; `None` until acknowledged.
    pub broker_order_id: Option<String>,
    /// Instrument identifier.
    pub instrument_id: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Quantity in units.
    pub quantity: u32,
    /// Current status.
    pub status: OrderStatus,
    /// Submission timestamp.
    pub submitted_at: DateTime<Utc>,
    /// Last update timestamp.
    pub last_update_at: DateTime<Utc>,
    /// Average fill price once (partially) filled.
    pub fill_price: Option<Decimal>,
    /// Filled quantity.
    pub filled_quantity: u32,
    /// Session this order belongs to.
    pub session_id: String,
    /// Broker status message, if any.
    pub status_message: String,
    /// Free-form tag carried from the intent.
    pub tag: String,
}

impl Order {
    /// Build a fresh `Pending` record from an intent.
    #[must_use]
    pub fn from_intent(intent: &OrderIntent, client_order_id: String, now: DateTime<Utc>) -> Self {
        Self {
            client_order_id,
            broker_order_id: None,
            instrument_id: intent.instrument_id.clone(),
            side: intent.side,
            quantity: intent.quantity,
            status: OrderStatus::Pending,
            submitted_at: now,
            last_update_at: now,
            fill_price: None,
            filled_quantity: 0,
            session_id: intent.session_id.clone(),
            status_message: String::new(),
            tag: intent.tag.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_terminal() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Acknowledged.is_terminal());
    }

    #[test]
    fn test_order_status_active() {
        assert!(OrderStatus::Pending.is_active());
        assert!(OrderStatus::Acknowledged.is_active());
        assert!(OrderStatus::PartiallyFilled.is_active());
        assert!(!OrderStatus::Filled.is_active());
    }

    #[test]
    fn test_order_from_intent() {
        let intent = OrderIntent {
            instrument_id: "NIFTY2580724300PE".to_string(),
            side: OrderSide::Sell,
            quantity: 75,
            limit_price: None,
            session_id: "sess-1".to_string(),
            tag: "survivor-entry-pe".to_string(),
        };
        let order = Order::from_intent(&intent, "cli-1".to_string(), Utc::now());
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.broker_order_id.is_none());
        assert_eq!(order.quantity, 75);
        assert_eq!(order.tag, "survivor-entry-pe");
    }
}
