//! Strategy session state.
//!
//! [`StrategyState`] is owned exclusively by the strategy engine and persisted
//! through the order tracker's session store, so a crash mid-session can
//! resume without re-entering already-placed legs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::StrategyConfig;

use super::Instrument;

/// Strategy phase. `Closed` is terminal, `Idle` is initial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyPhase {
    /// Session created, entry condition not yet met.
    Idle,
    /// Entry condition met, waiting for both legs to be placed.
    AwaitingEntry,
    /// Both legs resolved (entered or failed) with at least one entered.
    LegsActive,
    /// CE leg has exited, PE still active.
    ExitCe,
    /// PE leg has exited, CE still active.
    ExitPe,
    /// Both legs have exited.
    ExitBoth,
    /// All legs terminal; session finished.
    Closed,
}

impl StrategyPhase {
    /// Returns true when the session can take no further action.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// One side of the two-sided position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegSide {
    /// Call leg.
    Ce,
    /// Put leg.
    Pe,
}

impl LegSide {
    /// Short lowercase label for tags and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Ce => "ce",
            Self::Pe => "pe",
        }
    }
}

/// Independent per-leg state projection.
///
/// Each leg progresses through its own lifecycle; a sibling leg's exit or
/// failure never feeds back into this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegStatus {
    /// No entry attempted yet.
    Pending,
    /// Entry order placed, awaiting acknowledgment/fill.
    Entering,
    /// Short position open.
    Entered,
    /// Exit order placed, awaiting fill.
    Exiting,
    /// Position closed by an exit order.
    Exited,
    /// Held to contract expiry without an exit order.
    Expired,
    /// Automation halted for this leg after exhausted retries.
    Failed,
}

impl LegStatus {
    /// Returns true once the leg can never trade again this session.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited | Self::Expired | Self::Failed)
    }

    /// Returns true while the leg holds an open short position.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Entered | Self::Exiting)
    }
}

/// Why a leg exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    /// Premium decayed to or below `min_price_to_sell`.
    PriceDecay,
    /// Premium rose to the hard stop-loss level.
    StopLoss,
    /// Session square-off time reached.
    SquareOff,
    /// Contract expired.
    Expiry,
    /// Operator-initiated shutdown.
    Shutdown,
}

/// State of one leg of the position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegState {
    /// Which side this leg is.
    pub side: LegSide,
    /// Current leg status.
    pub status: LegStatus,
    /// Instrument fixed at entry; `None` until strikes are selected.
    pub instrument: Option<Instrument>,
    /// Client order id of the entry (sell) order.
    pub entry_order_id: Option<String>,
    /// Client order id of the exit (buy) order.
    pub exit_order_id: Option<String>,
    /// Premium collected at entry.
    pub entry_premium: Option<Decimal>,
    /// Entry fill/acknowledgment time.
    pub opened_at: Option<DateTime<Utc>>,
    /// Quantity sold.
    pub quantity: u32,
    /// Exit reason once terminal (set when the exit is triggered).
    pub exit_reason: Option<ExitReason>,
    /// Entry placement attempts so far (rejected-retry bound).
    pub entry_attempts: u32,
}

impl LegState {
    /// Fresh leg with nothing placed.
    #[must_use]
    pub const fn new(side: LegSide, quantity: u32) -> Self {
        Self {
            side,
            status: LegStatus::Pending,
            instrument: None,
            entry_order_id: None,
            exit_order_id: None,
            entry_premium: None,
            opened_at: None,
            quantity,
            exit_reason: None,
            entry_attempts: 0,
        }
    }

    /// Trading symbol of the leg instrument, if selected.
    #[must_use]
    pub fn instrument_id(&self) -> Option<String> {
        self.instrument.as_ref().map(Instrument::trading_symbol)
    }
}

/// A completed round trip on one leg, feeding the session report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedTrade {
    /// Which leg.
    pub side: LegSide,
    /// Instrument traded.
    pub instrument_id: String,
    /// Quantity.
    pub quantity: u32,
    /// Premium collected per unit at entry.
    pub entry_premium: Decimal,
    /// Buy-back price per unit (zero when expired worthless).
    pub exit_price: Decimal,
    /// Realized profit and loss for the trade.
    pub pnl: Decimal,
    /// Why the trade closed.
    pub exit_reason: ExitReason,
    /// Entry timestamp.
    pub opened_at: DateTime<Utc>,
    /// Exit timestamp.
    pub closed_at: DateTime<Utc>,
}

/// Full session state owned by the strategy engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyState {
    /// Session identifier.
    pub session_id: String,
    /// Session creation time.
    pub created_at: DateTime<Utc>,
    /// Snapshot of the parameters the session runs with.
    pub config: StrategyConfig,
    /// Current phase.
    pub phase: StrategyPhase,
    /// Call leg projection.
    pub ce: LegState,
    /// Put leg projection.
    pub pe: LegState,
    /// Realized P&L accumulator.
    pub realized_pnl: Decimal,
    /// Last processed tick sequence per instrument.
    pub last_seq: BTreeMap<String, u64>,
    /// Most recent underlying price seen.
    pub last_underlying_price: Option<Decimal>,
    /// Completed round trips.
    pub closed_trades: Vec<ClosedTrade>,
    /// Operator-visible alerts raised during the session.
    pub alerts: Vec<String>,
}

impl StrategyState {
    /// Create a fresh session in `Idle`.
    #[must_use]
    pub fn new(session_id: String, config: StrategyConfig, now: DateTime<Utc>) -> Self {
        let ce_quantity = config.ce_quantity;
        let pe_quantity = config.pe_quantity;
        Self {
            session_id,
            created_at: now,
            config,
            phase: StrategyPhase::Idle,
            ce: LegState::new(LegSide::Ce, ce_quantity),
            pe: LegState::new(LegSide::Pe, pe_quantity),
            realized_pnl: Decimal::ZERO,
            last_seq: BTreeMap::new(),
            last_underlying_price: None,
            closed_trades: Vec::new(),
            alerts: Vec::new(),
        }
    }

    /// Borrow the leg projection for a side.
    #[must_use]
    pub const fn leg(&self, side: LegSide) -> &LegState {
        match side {
            LegSide::Ce => &self.ce,
            LegSide::Pe => &self.pe,
        }
    }

    /// Mutably borrow the leg projection for a side.
    pub const fn leg_mut(&mut self, side: LegSide) -> &mut LegState {
        match side {
            LegSide::Ce => &mut self.ce,
            LegSide::Pe => &mut self.pe,
        }
    }
}
