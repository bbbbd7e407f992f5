//! Precision-safe decimal prices.
//!
//! Uses `rust_decimal` for exact decimal arithmetic. Prices only become
//! integers at the oracle boundary, where pythd expects a fixed-point value
//! scaled by the price account's exponent.

use crate::error::{CoreError, CoreResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Sub};
use std::str::FromStr;

/// Price with exact decimal precision.
///
/// Wraps `Decimal` so prices cannot be mixed up with the scaled integers
/// sent to the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Arithmetic mean of a set of prices.
    ///
    /// Returns `None` for an empty slice.
    pub fn mean(prices: &[Price]) -> Option<Price> {
        if prices.is_empty() {
            return None;
        }
        let total = prices
            .iter()
            .fold(Decimal::ZERO, |acc, p| acc + p.0);
        Some(Self(total / Decimal::from(prices.len())))
    }

    /// Convert to the oracle's fixed-point integer for an account exponent.
    ///
    /// The decimal point moves by `-exponent` places and the result is
    /// truncated toward zero: exponent `-5` turns `1900.10` into `190010000`.
    pub fn to_fixed_point(&self, exponent: i32) -> CoreResult<i64> {
        let overflow = || CoreError::ScaleOverflow {
            value: self.0.to_string(),
            exponent,
        };

        if self.0.is_zero() {
            return Ok(0);
        }

        // value = mantissa * 10^-scale, so the result is mantissa * 10^(places - scale).
        let places = -i64::from(exponent);
        let digits = places - i64::from(self.0.scale());
        let mantissa = self.0.mantissa();

        let scaled = if digits >= 0 {
            u32::try_from(digits)
                .ok()
                .and_then(|d| 10i128.checked_pow(d))
                .and_then(|factor| mantissa.checked_mul(factor))
                .ok_or_else(overflow)?
        } else {
            // |mantissa| < 10^29, so a divisor beyond i128 leaves nothing.
            match u32::try_from(-digits).ok().and_then(|d| 10i128.checked_pow(d)) {
                Some(divisor) => mantissa / divisor,
                None => 0,
            }
        };
        i64::try_from(scaled).map_err(|_| overflow())
    }

    /// Rebuild a price from an oracle fixed-point integer.
    ///
    /// Inverse of [`Price::to_fixed_point`] up to the truncated digits.
    pub fn from_fixed_point(value: i64, exponent: i32) -> CoreResult<Self> {
        let overflow = || CoreError::ScaleOverflow {
            value: value.to_string(),
            exponent,
        };

        let (mantissa, scale) = if exponent >= 0 {
            let factor = 10i128.checked_pow(exponent.unsigned_abs()).ok_or_else(overflow)?;
            (i128::from(value).checked_mul(factor).ok_or_else(overflow)?, 0)
        } else {
            (i128::from(value), exponent.unsigned_abs())
        };
        Decimal::try_from_i128_with_scale(mantissa, scale)
            .map(Self)
            .map_err(|_| overflow())
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| CoreError::InvalidPrice(format!("{s:?}: {e}")))?;
        Ok(Self(value))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Div<Decimal> for Price {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}
