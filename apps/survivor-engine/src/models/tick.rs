//! Market data units: live ticks and historical bars.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single market-data price update for one instrument.
///
/// Sequence numbers are assigned per instrument by the tick source and are
/// monotonically non-decreasing within one session. The dispatcher relies on
/// them for duplicate detection and reordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Instrument identifier (trading symbol).
    pub instrument_id: String,
    /// Last traded price.
    pub last_price: Decimal,
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
    /// Per-instrument sequence number.
    pub sequence: u64,
}

impl Tick {
    /// Create a new tick.
    #[must_use]
    pub fn new(
        instrument_id: impl Into<String>,
        last_price: Decimal,
        timestamp: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            last_price,
            timestamp,
            sequence,
        }
    }
}

/// One historical bar, as returned by `get_historical`.
///
/// The backtest tick source replays bars as synthetic ticks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open timestamp.
    pub timestamp: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tick_roundtrip() {
        let tick = Tick::new("NIFTY 50", dec!(24512.35), Utc::now(), 7);
        let json = serde_json::to_string(&tick).unwrap();
        let back: Tick = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tick);
    }
}
