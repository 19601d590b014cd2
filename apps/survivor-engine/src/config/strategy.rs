//! Survivor strategy parameters.

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Which leg is evaluated first when both breach an exit condition on the
/// same tick batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitTieBreak {
    /// Evaluate the call leg first.
    CeFirst,
    /// Evaluate the put leg first.
    PeFirst,
}

impl ExitTieBreak {
    /// Leg evaluation order implied by the tie-break.
    #[must_use]
    pub const fn order(&self) -> [crate::models::LegSide; 2] {
        use crate::models::LegSide;
        match self {
            Self::CeFirst => [LegSide::Ce, LegSide::Pe],
            Self::PeFirst => [LegSide::Pe, LegSide::Ce],
        }
    }
}

/// Parameters of one Survivor session.
///
/// The session persists a snapshot of this struct, so renames here are
/// breaking changes for stored sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Option series identifier (e.g. "NIFTY25807").
    pub symbol_initials: String,
    /// Underlying index symbol whose ticks drive entries (e.g. "NIFTY 50").
    pub index_symbol: String,
    /// Contract expiry for the series.
    pub expiry: NaiveDate,
    /// Distance between consecutive strikes in the series.
    pub strike_step: Decimal,
    /// Strike offset above ATM for the call leg.
    pub ce_gap: Decimal,
    /// Strike offset below ATM for the put leg.
    pub pe_gap: Decimal,
    /// Quantity sold on the call leg.
    pub ce_quantity: u32,
    /// Quantity sold on the put leg.
    pub pe_quantity: u32,
    /// Exit threshold: a leg exits when its premium trades at or below this.
    /// Also the entry floor: strikes whose premium starts below it are
    /// stepped closer to spot.
    pub min_price_to_sell: Decimal,
    /// Hard stop-loss: a leg exits when its premium reaches
    /// `entry_premium * stop_loss_multiple`.
    pub stop_loss_multiple: Decimal,
    /// Time of day the session may enter.
    pub entry_time: NaiveTime,
    /// Time of day open legs are squared off.
    pub square_off_time: NaiveTime,
    /// Leg evaluation order when both breach on one tick batch.
    pub exit_tie_break: ExitTieBreak,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            symbol_initials: "NIFTY25807".to_string(),
            index_symbol: "NIFTY 50".to_string(),
            expiry: NaiveDate::from_ymd_opt(2025, 8, 7).unwrap_or_default(),
            strike_step: dec!(50),
            ce_gap: dec!(200),
            pe_gap: dec!(200),
            ce_quantity: 75,
            pe_quantity: 75,
            min_price_to_sell: dec!(15),
            stop_loss_multiple: dec!(2),
            entry_time: NaiveTime::from_hms_opt(9, 20, 0).unwrap_or_default(),
            square_off_time: NaiveTime::from_hms_opt(15, 20, 0).unwrap_or_default(),
            exit_tie_break: ExitTieBreak::CeFirst,
        }
    }
}

impl StrategyConfig {
    /// Validate parameter combinations, failing fast before any subscription
    /// or order activity.
    ///
    /// # Errors
    ///
    /// Returns a human-readable description of the first invalid parameter.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol_initials.is_empty() {
            return Err("symbol_initials must not be empty".to_string());
        }
        if self.index_symbol.is_empty() {
            return Err("index_symbol must not be empty".to_string());
        }
        if self.strike_step <= Decimal::ZERO {
            return Err(format!("strike_step must be positive, got {}", self.strike_step));
        }
        if self.ce_gap < Decimal::ZERO || self.pe_gap < Decimal::ZERO {
            return Err(format!(
                "strike gaps must be non-negative, got ce_gap={} pe_gap={}",
                self.ce_gap, self.pe_gap
            ));
        }
        if self.ce_quantity == 0 || self.pe_quantity == 0 {
            return Err(format!(
                "leg quantities must be positive, got ce_quantity={} pe_quantity={}",
                self.ce_quantity, self.pe_quantity
            ));
        }
        if self.min_price_to_sell <= Decimal::ZERO {
            return Err(format!(
                "min_price_to_sell must be positive, got {}",
                self.min_price_to_sell
            ));
        }
        if self.stop_loss_multiple <= Decimal::ONE {
            return Err(format!(
                "stop_loss_multiple must exceed 1, got {}",
                self.stop_loss_multiple
            ));
        }
        if self.entry_time >= self.square_off_time {
            return Err(format!(
                "entry_time {} must precede square_off_time {}",
                self.entry_time, self.square_off_time
            ));
        }
        Ok(())
    }
}
