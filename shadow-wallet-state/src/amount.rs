//! Fixed-precision token amounts.
//!
//! Balances and transaction amounts travel as decimal strings with exactly
//! three fractional digits (`"0.000"`, `"1.500"`). Arithmetic is done on
//! [`Decimal`] and rounded half away from zero back to that precision after
//! every operation, so a value never carries more than three digits.

use std::{fmt, str::FromStr};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::WalletError;

/// Number of fractional digits carried by every amount.
pub const AMOUNT_SCALE: u32 = 3;

/// A token amount rounded to [`AMOUNT_SCALE`] fractional digits.
///
/// The value may be negative when used as a delta or drift; balances
/// themselves are kept non-negative by the operations that write them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Rounds `value` to [`AMOUNT_SCALE`] digits. Returns `None` when the
    /// integer part is too wide to keep three fractional digits.
    fn round(value: Decimal) -> Option<Self> {
        let mut rounded =
            value.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero);
        if rounded.is_zero() {
            // drop the sign of a negative zero
            rounded = Decimal::ZERO;
        }
        // rescale silently caps the scale when the mantissa would overflow
        rounded.rescale(AMOUNT_SCALE);
        (rounded.scale() == AMOUNT_SCALE).then_some(Self(rounded))
    }

    /// Builds an amount from an integer count of thousandths.
    pub fn from_milli(milli: i64) -> Self {
        Self(Decimal::new(milli, AMOUNT_SCALE))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).and_then(Amount::round)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).and_then(Amount::round)
    }
}

impl std::ops::Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        if self.is_zero() {
            self
        } else {
            Amount(-self.0)
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut value = self.0;
        value.rescale(AMOUNT_SCALE);
        fmt::Display::fmt(&value, f)
    }
}

impl FromStr for Amount {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(WalletError::validation("amount must not be empty"));
        }
        let value = Decimal::from_str(trimmed)
            .map_err(|err| WalletError::validation(format!("invalid amount '{trimmed}': {err}")))?;
        Amount::round(value).ok_or_else(|| {
            WalletError::validation(format!(
                "amount '{trimmed}' is too large to carry {AMOUNT_SCALE} decimal places"
            ))
        })
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
