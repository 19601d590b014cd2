//! Engine-level error taxonomy.
//!
//! Five classes of failure, each with its own handling policy:
//! data-quality problems are dropped and logged inside the dispatcher
//! (never surfaced as errors), transient broker failures are retried at the
//! tracker layer, terminal broker rejections become leg-level failures,
//! reconciliation divergence requires operator acknowledgment, and
//! configuration errors fail fast at startup.

use thiserror::Error;

use crate::broker::BrokerError;
use crate::config::ConfigError;
use crate::feed::DispatchError;
use crate::tracker::TrackerError;

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration; raised before any subscription or order
    /// activity.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Dispatcher misuse (e.g. duplicate subscription).
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Order tracker failure (persistence or exhausted broker retries).
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// Direct broker capability failure.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Reconciliation found orphans that have not been acknowledged.
    #[error(
        "{0} orphaned order(s) require operator review; \
         set execution.acknowledge_orphans once resolved"
    )]
    UnacknowledgedOrphans(usize),
}
