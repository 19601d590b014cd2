//! Reconciliation report types.
//!
//! Startup reconciliation aligns locally persisted order state with the
//! broker's authoritative record. Divergences that cannot be resolved from
//! the broker side become orphans requiring operator review; they are never
//! auto-resolved silently.

use serde::Serialize;

use crate::models::OrderStatus;

/// Why an order is orphaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrphanKind {
    /// Persisted `Pending` before the broker call; no broker id exists, so
    /// the broker-side outcome is unknown.
    NeverSent,
    /// A broker id exists but the broker has no record of the order.
    MissingAtBroker,
}

impl std::fmt::Display for OrphanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NeverSent => write!(f, "NEVER_SENT"),
            Self::MissingAtBroker => write!(f, "MISSING_AT_BROKER"),
        }
    }
}

/// An orphaned order detected during reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct OrphanedOrder {
    /// Orphan classification.
    pub kind: OrphanKind,
    /// Client order id.
    pub client_order_id: String,
    /// Broker order id if one was ever assigned.
    pub broker_order_id: Option<String>,
    /// Instrument the order targets.
    pub instrument_id: String,
    /// Local status at detection time.
    pub local_status: OrderStatus,
}

/// Result of a startup reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Non-terminal orders examined.
    pub checked: usize,
    /// Orders whose local state was updated from the broker.
    pub updated: usize,
    /// Orders requiring operator review.
    pub orphans: Vec<OrphanedOrder>,
}

impl ReconcileReport {
    /// True when no orphans need operator acknowledgment.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.orphans.is_empty()
    }
}
