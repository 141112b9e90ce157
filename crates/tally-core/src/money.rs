//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  OUR SOLUTION: Integer minor units (cents)                              │
//! │    Every derived amount (line discount, line tax, percent discount)     │
//! │    is rounded half-away-from-zero to the cent where it is computed,     │
//! │    so stored figures always add up exactly.                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tally_core::money::Money;
//!
//! let price = Money::from_cents(10000); // 100.00
//! let line = price * 2i64;              // 200.00
//! assert_eq!(line.percent(1000).cents(), 2000); // 10% of 200.00
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use ts_rs::TS;

use crate::types::TaxRate;
use crate::BPS_SCALE;

// =============================================================================
// Rounding
// =============================================================================

/// Integer division rounding half away from zero.
///
/// `denominator` must be positive.
fn div_round_half_away(numerator: i128, denominator: i128) -> i64 {
    let half = denominator / 2;
    let rounded = if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        (numerator - half) / denominator
    };
    rounded as i64
}

// =============================================================================
// Money Type
// =============================================================================

/// Represents a monetary value in the smallest currency unit (cents).
///
/// ## Design Decisions
/// - **i64 (signed)**: ledger deltas and adjustments are negative
/// - **Single field tuple struct**: Zero-cost abstraction over i64
///
/// ## Where Money Flows
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  unit_price × quantity ─► line discount ─► line_total ─► line tax      │
/// │                                               │                         │
/// │                              subtotal = Σ line_total                    │
/// │                                               │                         │
/// │   total = subtotal − discount − points value − credit used              │
/// │                                               │                         │
/// │                       Σ tenders ≥ total ─► change                       │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// For negative amounts only the major unit carries the sign:
    /// `from_major_minor(-5, 50)` is -5.50.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in cents (smallest currency unit).
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Returns `self`, or zero when negative.
    #[inline]
    pub const fn floor_zero(&self) -> Self {
        if self.0 < 0 {
            Money(0)
        } else {
            *self
        }
    }

    /// Returns the given share of this amount, in basis points.
    ///
    /// Rounded half away from zero to the cent.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// let subtotal = Money::from_cents(25000);
    /// assert_eq!(subtotal.percent(1000).cents(), 2500); // 10%
    /// assert_eq!(Money::from_cents(5).percent(5000).cents(), 3); // 2.5 → 3
    /// ```
    pub fn percent(&self, bps: u32) -> Money {
        Money(div_round_half_away(
            self.0 as i128 * bps as i128,
            BPS_SCALE as i128,
        ))
    }

    /// Calculates tax charged on top of this amount (tax-exclusive price).
    ///
    /// `tax = amount × rate`, rounded half away from zero.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    /// use tally_core::types::TaxRate;
    ///
    /// let line = Money::from_cents(5000); // 50.00
    /// let tax = line.calculate_tax(TaxRate::from_bps(2100));
    /// assert_eq!(tax.cents(), 1050); // 10.50
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        self.percent(rate.bps())
    }

    /// Extracts the tax already contained in this amount (tax-inclusive price).
    ///
    /// `tax = amount × rate / (1 + rate)`, rounded half away from zero.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    /// use tally_core::types::TaxRate;
    ///
    /// let line = Money::from_cents(20000); // 200.00 including 21% VAT
    /// let tax = line.calculate_included_tax(TaxRate::from_bps(2100));
    /// assert_eq!(tax.cents(), 3471); // 34.71
    /// ```
    pub fn calculate_included_tax(&self, rate: TaxRate) -> Money {
        if rate.is_zero() {
            return Money::zero();
        }
        Money(div_round_half_away(
            self.0 as i128 * rate.bps() as i128,
            BPS_SCALE as i128 + rate.bps() as i128,
        ))
    }

    /// Multiplies money by a quantity.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Multiplies money by a quantity, `None` on overflow.
    #[inline]
    pub const fn checked_multiply_quantity(&self, qty: i64) -> Option<Self> {
        match self.0.checked_mul(qty) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// Adds two amounts, `None` on overflow.
    #[inline]
    pub const fn checked_add(&self, other: Money) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display implementation shows money in a human-readable format.
///
/// ## Note
/// This is for logs and error messages. Front-ends do their own localized
/// formatting.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}${}.{:02}", sign, self.major().abs(), self.minor())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        let money = Money::from_cents(1099);
        assert_eq!(money.cents(), 1099);
        assert_eq!(money.major(), 10);
        assert_eq!(money.minor(), 99);
    }

    #[test]
    fn test_from_major_minor() {
        assert_eq!(Money::from_major_minor(10, 99).cents(), 1099);
        assert_eq!(Money::from_major_minor(-5, 50).cents(), -550);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Money::from_cents(1099)), "$10.99");
        assert_eq!(format!("{}", Money::from_cents(-550)), "-$5.50");
        assert_eq!(format!("{}", Money::from_cents(0)), "$0.00");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);

        assert_eq!((a + b).cents(), 1500);
        assert_eq!((a - b).cents(), 500);
        assert_eq!((-a).cents(), -1000);
        assert_eq!((a * 3i64).cents(), 3000);

        let total: Money = vec![a, b, b].into_iter().sum();
        assert_eq!(total.cents(), 2000);
    }

    #[test]
    fn test_exclusive_tax() {
        let tax = Money::from_cents(5000).calculate_tax(TaxRate::from_bps(2100));
        assert_eq!(tax.cents(), 1050);

        // 10.00 at 8.25% = 0.825 → 0.83
        let tax = Money::from_cents(1000).calculate_tax(TaxRate::from_bps(825));
        assert_eq!(tax.cents(), 83);
    }

    #[test]
    fn test_included_tax() {
        // 200.00 × 21 / 121 = 34.7107… → 34.71
        let tax = Money::from_cents(20000).calculate_included_tax(TaxRate::from_bps(2100));
        assert_eq!(tax.cents(), 3471);

        // 121.00 including 21% holds exactly 21.00
        let tax = Money::from_cents(12100).calculate_included_tax(TaxRate::from_bps(2100));
        assert_eq!(tax.cents(), 2100);

        assert!(Money::from_cents(999)
            .calculate_included_tax(TaxRate::zero())
            .is_zero());
    }

    #[test]
    fn test_rounding_is_half_away_from_zero() {
        // 0.05 × 50% = 0.025 → 0.03
        assert_eq!(Money::from_cents(5).percent(5000).cents(), 3);
        // and symmetric for negatives
        assert_eq!(Money::from_cents(-5).percent(5000).cents(), -3);
        // 0.04 × 50% = 0.02 exactly
        assert_eq!(Money::from_cents(4).percent(5000).cents(), 2);
    }

    #[test]
    fn test_floor_zero() {
        assert_eq!(Money::from_cents(-1).floor_zero(), Money::zero());
        assert_eq!(Money::from_cents(7).floor_zero().cents(), 7);
    }
}
