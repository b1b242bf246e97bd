//! Fixed-point decimal for fares and price multipliers, backed by rust_decimal.
//!
//! Fares are rounded half-up to cents; multipliers are rounded to two places the
//! same way. Floating-point inputs (distances, signal factors) enter through
//! [`Decimal::from_f64_lossy`] and are rounded before they are compared.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal as RustDecimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Decimal amount used for money and multipliers.
///
/// Serializes to a JSON number.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

impl Decimal {
    pub const ZERO: Decimal = Decimal(RustDecimal::ZERO);
    pub const ONE: Decimal = Decimal(RustDecimal::ONE);

    pub fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Build from an integer mantissa and scale, e.g. `from_parts(250, 2) == 2.50`.
    ///
    /// The mantissa must fit in 64 bits and `scale` must not exceed 28.
    pub const fn from_parts(mantissa: i64, scale: u32) -> Self {
        let magnitude = mantissa.unsigned_abs();
        Decimal(RustDecimal::from_parts(
            magnitude as u32,
            (magnitude >> 32) as u32,
            0,
            mantissa < 0,
            scale,
        ))
    }

    /// Parse from a decimal string.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s).map(Decimal)
    }

    /// Convert a float, falling back to zero for NaN or infinities.
    pub fn from_f64_lossy(value: f64) -> Self {
        RustDecimal::from_f64(value).map(Decimal).unwrap_or_default()
    }

    pub fn from_i64(value: i64) -> Self {
        Decimal(RustDecimal::from(value))
    }

    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }

    /// Format without trailing zeros or exponent notation.
    pub fn to_canonical_string(&self) -> String {
        format!("{}", self.0.normalize())
    }

    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    /// Round half-up (away from zero at the midpoint) to two decimal places.
    pub fn round2(&self) -> Self {
        Decimal(
            self.0
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn abs(&self) -> Self {
        Decimal(self.0.abs())
    }

    pub fn max(self, other: Decimal) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }

    pub fn min(self, other: Decimal) -> Self {
        if other < self {
            other
        } else {
            self
        }
    }

    pub fn clamp_to(self, lower: Decimal, upper: Decimal) -> Self {
        self.max(lower).min(upper)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<Decimal> for RustDecimal {
    fn from(value: Decimal) -> Self {
        value.0
    }
}

impl std::ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 * rhs.0)
    }
}

impl std::ops::Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal(-self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_from_parts() {
        assert_eq!(Decimal::from_parts(250, 2), d("2.50"));
        assert_eq!(Decimal::from_parts(8, 0), d("8"));
        assert_eq!(Decimal::from_parts(5, 1), d("0.5"));
        assert_eq!(Decimal::from_parts(-1850, 2), d("-18.50"));
        assert_eq!(Decimal::from_parts(12_345_678_901, 3), d("12345678.901"));
    }

    #[test]
    fn test_from_parts_in_const_context() {
        const RATE: Decimal = Decimal::from_parts(250, 2);
        const FLOOR: Decimal = Decimal::from_parts(-4, 1);
        assert_eq!(RATE, d("2.50"));
        assert_eq!(FLOOR, d("-0.4"));
    }

    #[test]
    fn test_round2_is_half_up() {
        assert_eq!(d("18.505").round2(), d("18.51"));
        assert_eq!(d("18.504").round2(), d("18.50"));
        assert_eq!(d("1.125").round2(), d("1.13"));
        assert_eq!(d("-1.125").round2(), d("-1.13"));
    }

    #[test]
    fn test_clamp_to_bounds() {
        let lo = d("1.0");
        let hi = d("5.0");
        assert_eq!(d("0.4").clamp_to(lo, hi), lo);
        assert_eq!(d("7.25").clamp_to(lo, hi), hi);
        assert_eq!(d("2.2").clamp_to(lo, hi), d("2.2"));
    }

    #[test]
    fn test_from_f64_lossy() {
        assert_eq!(Decimal::from_f64_lossy(0.1).round2(), d("0.10"));
        assert_eq!(Decimal::from_f64_lossy(f64::NAN), Decimal::ZERO);
    }

    #[test]
    fn test_json_is_number() {
        let json = serde_json::to_value(d("18.50")).unwrap();
        assert!(json.is_number());
        assert_eq!(json.to_string(), "18.5");
    }

    #[test]
    fn test_is_negative_ignores_zero() {
        assert!(d("-0.01").is_negative());
        assert!(!d("0").is_negative());
        assert!(!d("-0").is_negative());
    }
}
