//! # Pricing & Discount Calculator
//!
//! Turns a basket into priced lines and sale totals. Pure and deterministic:
//! the same input always yields the same figures, to the cent.
//!
//! ## Calculation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  per line                                                               │
//! │    gross         = unit_price × quantity                                │
//! │    line_discount = gross × discount%            (rounded)               │
//! │    line_total    = gross − line_discount                                │
//! │    tax           = line_total × r / (1 + r)     tax-included price      │
//! │                  = line_total × r               tax-excluded price      │
//! │                                                                         │
//! │  per sale                                                               │
//! │    subtotal      = Σ line_total                                         │
//! │    discount      = FIXED value | PERCENT of subtotal | legacy fields    │
//! │    points_value  = points_redeemed × redemption rate                    │
//! │    total         = subtotal − discount − points_value − credit_used     │
//! │    tax_amount    = Σ line tax                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A negative total is rejected: discounts, points and credit together may
//! bring a sale to zero but never below.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::TaxRate;
use crate::validation::{
    validate_amount, validate_percent_bps, validate_points_redeemed, validate_price_cents,
    validate_quantity,
};
use crate::{BPS_SCALE, MAX_AMOUNT_CENTS, MAX_SALE_LINES};

// =============================================================================
// Discount Inputs
// =============================================================================

/// Sale-level discount.
///
/// Serialized as `{"type": "FIXED", "value": 2500}` or
/// `{"type": "PERCENT", "value": 1000}` (basis points).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleDiscount {
    Fixed(Money),
    Percent(u32),
}

/// The older flat discount fields some clients still send.
///
/// A non-zero percentage wins over the fixed amount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LegacyDiscount {
    #[serde(default)]
    pub discount_percent_bps: u32,
    #[serde(default)]
    pub discount_amount_cents: i64,
}

impl LegacyDiscount {
    pub fn to_sale_discount(self) -> Option<SaleDiscount> {
        if self.discount_percent_bps > 0 {
            Some(SaleDiscount::Percent(self.discount_percent_bps))
        } else if self.discount_amount_cents != 0 {
            Some(SaleDiscount::Fixed(Money::from_cents(self.discount_amount_cents)))
        } else {
            None
        }
    }
}

// =============================================================================
// Pricing Input / Output
// =============================================================================

/// One basket line, with the product facts pricing needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInput {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: Money,
    /// Line discount in basis points.
    pub discount_bps: u32,
    pub tax_rate: TaxRate,
    pub tax_included: bool,
}

/// A priced line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub discount_bps: u32,
    pub discount: Money,
    pub line_total: Money,
    pub tax_rate: TaxRate,
    pub tax_included: bool,
    pub tax: Money,
}

/// Everything needed to price a sale.
#[derive(Debug, Clone)]
pub struct PricingInput {
    pub lines: Vec<LineInput>,
    pub discount: Option<SaleDiscount>,
    pub legacy_discount: Option<LegacyDiscount>,
    pub points_redeemed: i64,
    pub credit_used: Money,
    /// Value of one loyalty point.
    pub redemption_rate: Money,
}

/// Sale aggregates, as stored on the sale header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaleTotals {
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub points_redeemed: i64,
    pub points_value: Money,
    pub credit_used: Money,
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedSale {
    pub lines: Vec<PricedLine>,
    pub totals: SaleTotals,
}

// =============================================================================
// Calculations
// =============================================================================

/// Prices a single line.
pub fn price_line(line: &LineInput) -> CoreResult<PricedLine> {
    validate_quantity(line.quantity)?;
    validate_price_cents(line.unit_price.cents())?;
    validate_percent_bps("discount_percent", line.discount_bps)?;

    let gross = line.unit_price.multiply_quantity(line.quantity);
    let discount = gross.percent(line.discount_bps);
    let line_total = gross - discount;
    let tax = if line.tax_included {
        line_total.calculate_included_tax(line.tax_rate)
    } else {
        line_total.calculate_tax(line.tax_rate)
    };

    Ok(PricedLine {
        product_id: line.product_id.clone(),
        quantity: line.quantity,
        unit_price: line.unit_price,
        discount_bps: line.discount_bps,
        discount,
        line_total,
        tax_rate: line.tax_rate,
        tax_included: line.tax_included,
        tax,
    })
}

/// Resolves the sale-level discount amount against the subtotal.
pub fn sale_discount_amount(
    discount: Option<SaleDiscount>,
    legacy: Option<LegacyDiscount>,
    subtotal: Money,
) -> CoreResult<Money> {
    let resolved = discount.or_else(|| legacy.and_then(LegacyDiscount::to_sale_discount));
    match resolved {
        None => Ok(Money::zero()),
        Some(SaleDiscount::Fixed(amount)) => {
            validate_amount("discount", amount)?;
            Ok(amount)
        }
        Some(SaleDiscount::Percent(bps)) => {
            validate_percent_bps("discount", bps)?;
            Ok(subtotal.percent(bps))
        }
    }
}

/// Prices a whole sale.
///
/// ## Errors
/// - [`CoreError::TooManyLines`] above [`MAX_SALE_LINES`]
/// - [`CoreError::Validation`] for malformed lines or amounts
/// - [`CoreError::NegativeTotal`] when deductions exceed the subtotal
pub fn price_sale(input: &PricingInput) -> CoreResult<PricedSale> {
    if input.lines.len() > MAX_SALE_LINES {
        return Err(CoreError::TooManyLines {
            max: MAX_SALE_LINES,
        });
    }
    validate_points_redeemed(input.points_redeemed)?;
    validate_amount("credit_used", input.credit_used)?;
    validate_amount("redemption_rate", input.redemption_rate)?;

    let lines = input
        .lines
        .iter()
        .map(price_line)
        .collect::<CoreResult<Vec<_>>>()?;

    let subtotal: Money = lines.iter().map(|l| l.line_total).sum();
    let tax: Money = lines.iter().map(|l| l.tax).sum();
    let discount = sale_discount_amount(input.discount, input.legacy_discount, subtotal)?;
    let points_value = input
        .redemption_rate
        .checked_multiply_quantity(input.points_redeemed)
        .filter(|value| value.cents() <= MAX_AMOUNT_CENTS)
        .ok_or_else(|| ValidationError::OutOfRange {
            field: "points_redeemed".to_string(),
            min: 0,
            max: MAX_AMOUNT_CENTS / input.redemption_rate.cents().max(1),
        })?;
    let total = subtotal - discount - points_value - input.credit_used;

    if total.is_negative() {
        return Err(CoreError::NegativeTotal { total });
    }

    Ok(PricedSale {
        lines,
        totals: SaleTotals {
            subtotal,
            discount,
            tax,
            points_redeemed: input.points_redeemed,
            points_value,
            credit_used: input.credit_used,
            total,
        },
    })
}

/// Points a customer earns on a sale total.
///
/// `earn_rate_bps` is points per currency unit in basis points, so 100 bps
/// earns one point per 100.00 spent. Fractions are dropped; a non-positive
/// total earns nothing.
///
/// ## Example
/// ```rust
/// use tally_core::money::Money;
/// use tally_core::pricing::points_earned;
///
/// assert_eq!(points_earned(Money::from_cents(22500), 100), 2);
/// assert_eq!(points_earned(Money::from_cents(9999), 100), 0);
/// ```
pub fn points_earned(total: Money, earn_rate_bps: u32) -> i64 {
    if !total.is_positive() {
        return 0;
    }
    let scaled = total.cents() as i128 * earn_rate_bps as i128;
    (scaled / (100 * BPS_SCALE as i128)) as i64
}

// =============================================================================
// Unit Tests
// =============================================================================
