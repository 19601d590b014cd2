//! Option instrument identity.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Option contract kind. CE is a call, PE is a put (exchange convention).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionKind {
    /// Call option (CE).
    Call,
    /// Put option (PE).
    Put,
}

impl OptionKind {
    /// Exchange suffix for the trading symbol.
    #[must_use]
    pub const fn suffix(&self) -> &'static str {
        match self {
            Self::Call => "CE",
            Self::Put => "PE",
        }
    }
}

/// A concrete option contract selected for one session.
///
/// Derived deterministically from configuration (symbol initials, expiry
/// series, strike gap) at the moment of entry and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Underlying symbol (e.g. "NIFTY 50").
    pub underlying: String,
    /// Option series identifier the strikes belong to (e.g. "NIFTY25807").
    pub symbol_initials: String,
    /// Contract expiry date.
    pub expiry: NaiveDate,
    /// Strike price.
    pub strike: Decimal,
    /// Call or put.
    pub kind: OptionKind,
}

impl Instrument {
    /// Render the exchange trading symbol, e.g. `NIFTY2580724300PE`.
    ///
    /// This string is the instrument identifier used on ticks and orders.
    #[must_use]
    pub fn trading_symbol(&self) -> String {
        format!(
            "{}{}{}",
            self.symbol_initials,
            self.strike.normalize(),
            self.kind.suffix()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_instrument(strike: Decimal, kind: OptionKind) -> Instrument {
        Instrument {
            underlying: "NIFTY 50".to_string(),
            symbol_initials: "NIFTY25807".to_string(),
            expiry: NaiveDate::from_ymd_opt(2025, 8, 7).unwrap(),
            strike,
            kind,
        }
    }

    #[test]
    fn test_trading_symbol_put() {
        let inst = make_instrument(dec!(24300), OptionKind::Put);
        assert_eq!(inst.trading_symbol(), "NIFTY2580724300PE");
    }

    #[test]
    fn test_trading_symbol_strips_trailing_zeros() {
        let inst = make_instrument(dec!(24300.00), OptionKind::Call);
        assert_eq!(inst.trading_symbol(), "NIFTY2580724300CE");
    }
}
