//! Exact energy quantities.
//!
//! [`Kwh`] wraps a [`rust_decimal::Decimal`] so that adding a cascade offset
//! and later subtracting it restores the original value bit for bit. Values
//! serialize as JSON strings.
//!
//! Addition and subtraction are checked: a value that parses can still be
//! large enough that adding a balance to it leaves the range of `Decimal`.

use std::fmt;
use std::ops::Neg;
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Error returned when a raw value cannot be turned into a [`Kwh`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a finite number: {0}")]
pub struct KwhParseError(pub String);

/// Error returned when kWh arithmetic leaves the representable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{lhs} {op} {rhs} kWh is out of range")]
pub struct KwhOverflow {
    lhs: Kwh,
    op: char,
    rhs: Kwh,
}

impl From<KwhOverflow> for LedgerError {
    fn from(e: KwhOverflow) -> Self {
        Self::InvalidValue(e.to_string())
    }
}

/// An amount of energy in kilowatt-hours. May be negative when used as an
/// offset; balances are validated to be non-negative by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kwh(Decimal);

impl Kwh {
    /// Zero kilowatt-hours.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Wraps a decimal value.
    #[must_use]
    pub const fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Builds a value from an integer mantissa and a decimal scale, e.g.
    /// `Kwh::from_parts(455, 1)` is `45.5`.
    #[must_use]
    pub fn from_parts(mantissa: i64, scale: u32) -> Self {
        Self(Decimal::new(mantissa, scale))
    }

    /// Converts a float, rejecting `NaN` and infinities.
    ///
    /// # Errors
    ///
    /// Returns [`KwhParseError`] when `value` is not finite.
    pub fn try_from_f64(value: f64) -> Result<Self, KwhParseError> {
        if !value.is_finite() {
            return Err(KwhParseError(value.to_string()));
        }
        Decimal::from_f64(value)
            .map(|d| Self(d.normalize()))
            .ok_or_else(|| KwhParseError(value.to_string()))
    }

    /// Returns the inner decimal.
    #[must_use]
    pub const fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Returns `true` if the value is below zero.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Returns `true` if the value is exactly zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Absolute value.
    #[must_use]
    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// `self + rhs`, or `None` on overflow.
    #[must_use]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// `self - rhs`, or `None` on overflow.
    #[must_use]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// `self + rhs`.
    ///
    /// # Errors
    ///
    /// Returns [`KwhOverflow`] if the sum is not representable.
    pub fn try_add(self, rhs: Self) -> Result<Self, KwhOverflow> {
        self.checked_add(rhs).ok_or(KwhOverflow {
            lhs: self,
            op: '+',
            rhs,
        })
    }

    /// `self - rhs`.
    ///
    /// # Errors
    ///
    /// Returns [`KwhOverflow`] if the difference is not representable.
    pub fn try_sub(self, rhs: Self) -> Result<Self, KwhOverflow> {
        self.checked_sub(rhs).ok_or(KwhOverflow {
            lhs: self,
            op: '-',
            rhs,
        })
    }
}

impl FromStr for Kwh {
    type Err = KwhParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Decimal::from_str(trimmed)
            .map(Self)
            .map_err(|_| KwhParseError(trimmed.to_string()))
    }
}

impl fmt::Display for Kwh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Decimal> for Kwh {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<i64> for Kwh {
    fn from(value: i64) -> Self {
        Self(Decimal::from(value))
    }
}

impl Neg for Kwh {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}
