//! Session summary reporting.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::ClosedTrade;

/// Aggregate result of one session (live or backtest).
///
/// Computed from the engine's closed-trade query API; presentation beyond
/// the simple `Display` here is the caller's concern.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    /// Total realized P&L across closed trades.
    pub total_pnl: Decimal,
    /// Number of closed trades.
    pub trade_count: usize,
    /// Trades closed with positive P&L.
    pub win_count: usize,
    /// Fraction of winning trades, 0 when no trades closed.
    pub win_rate: f64,
}

impl SessionSummary {
    /// Aggregate a set of closed trades.
    #[must_use]
    pub fn from_trades(trades: &[ClosedTrade]) -> Self {
        let total_pnl = trades.iter().map(|t| t.pnl).sum();
        let win_count = trades.iter().filter(|t| t.pnl > Decimal::ZERO).count();
        let trade_count = trades.len();
        let win_rate = if trade_count == 0 {
            0.0
        } else {
            win_count as f64 / trade_count as f64
        };
        Self {
            total_pnl,
            trade_count,
            win_count,
            win_rate,
        }
    }
}

impl std::fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "trades:   {}", self.trade_count)?;
        writeln!(f, "wins:     {}", self.win_count)?;
        writeln!(f, "win rate: {:.1}%", self.win_rate * 100.0)?;
        write!(f, "total pnl: {}", self.total_pnl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, LegSide};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn trade(pnl: Decimal) -> ClosedTrade {
        ClosedTrade {
            side: LegSide::Pe,
            instrument_id: "NIFTY2580724300PE".to_string(),
            quantity: 75,
            entry_premium: dec!(40),
            exit_price: dec!(15),
            pnl,
            exit_reason: ExitReason::PriceDecay,
            opened_at: Utc::now(),
            closed_at: Utc::now(),
        }
    }

    #[test]
    fn test_summary_from_trades() {
        let trades = vec![trade(dec!(1875)), trade(dec!(-300)), trade(dec!(450))];
        let summary = SessionSummary::from_trades(&trades);

        assert_eq!(summary.total_pnl, dec!(2025));
        assert_eq!(summary.trade_count, 3);
        assert_eq!(summary.win_count, 2);
        assert!((summary.win_rate - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_summary() {
        let summary = SessionSummary::from_trades(&[]);
        assert_eq!(summary.total_pnl, Decimal::ZERO);
        assert_eq!(summary.trade_count, 0);
        assert!(summary.win_rate.abs() < f64::EPSILON);
    }
}
