use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when building an [`Amount`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("'{0}' is not a numeric amount")]
    Malformed(String),
    #[error("amount cannot be negative: {0}")]
    Negative(Decimal),
}

/// Non-negative money value with 2 decimal places.
///
/// Values are rounded half away from zero to cents on construction, so every
/// balance and ledger amount compares and prints with the same precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    const SCALE: u32 = 2;

    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AmountError::Negative(value));
        }
        let mut value =
            value.round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointAwayFromZero);
        value.rescale(Self::SCALE);
        // -0.001 rounds to a signed zero
        value.set_sign_positive(true);
        Ok(Amount(value))
    }

    pub fn from_cents(cents: u64) -> Self {
        Amount(Decimal::from_i128_with_scale(cents as i128, Self::SCALE))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    /// `None` when the result would be negative.
    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        if rhs.0 > self.0 {
            return None;
        }
        self.0.checked_sub(rhs.0).map(Amount)
    }
}

impl Default for Amount {
    fn default() -> Self {
        Amount::from_cents(0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value = Decimal::from_str(trimmed)
            .map_err(|_| AmountError::Malformed(trimmed.to_string()))?;
        Amount::new(value)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::default(), |acc, amount| acc + amount)
    }
}
