//! # Validation Module
//!
//! Input validation for sale and void requests.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Request shape (serde)                                        │
//! │  └── Types, required fields                                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  └── Ranges, ids, non-blank text, percentages                          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK / NOT NULL / UNIQUE constraints                             │
//! │  └── Foreign keys                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::{
    BPS_SCALE, MAX_AMOUNT_CENTS, MAX_ITEM_QUANTITY, MAX_POINTS_REDEEMED, MAX_VOID_REASON_LEN,
};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed [`MAX_ITEM_QUANTITY`]
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a price in cents. Zero is allowed (free items).
///
/// ## Example
/// ```rust
/// use tally_core::validation::validate_price_cents;
///
/// assert!(validate_price_cents(1099).is_ok());
/// assert!(validate_price_cents(0).is_ok());
/// assert!(validate_price_cents(-100).is_err());
/// assert!(validate_price_cents(i64::MAX).is_err());
/// ```
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    validate_amount("unit_price", Money::from_cents(cents))
}

/// Validates an amount between zero and [`MAX_AMOUNT_CENTS`].
pub fn validate_amount(field: &str, amount: Money) -> ValidationResult<()> {
    validate_money_not_negative(field, amount)?;

    if amount.cents() > MAX_AMOUNT_CENTS {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_AMOUNT_CENTS,
        });
    }

    Ok(())
}

/// Validates the number of points a sale redeems.
pub fn validate_points_redeemed(points: i64) -> ValidationResult<()> {
    if points < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "points_redeemed".to_string(),
        });
    }

    if points > MAX_POINTS_REDEEMED {
        return Err(ValidationError::OutOfRange {
            field: "points_redeemed".to_string(),
            min: 0,
            max: MAX_POINTS_REDEEMED,
        });
    }

    Ok(())
}

/// Validates that an amount is zero or more.
pub fn validate_money_not_negative(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }

    Ok(())
}

/// Validates a percentage expressed in basis points (0% to 100%).
pub fn validate_percent_bps(field: &str, bps: u32) -> ValidationResult<()> {
    if bps > BPS_SCALE {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: BPS_SCALE as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Text Validators
// =============================================================================

/// Validates an identifier field as a UUID.
///
/// ## Example
/// ```rust
/// use tally_core::validation::validate_id;
///
/// assert!(validate_id("sale_id", "550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_id("sale_id", "not-a-uuid").is_err());
/// ```
pub fn validate_id(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

/// Validates a void reason and returns it trimmed.
///
/// ## Rules
/// - Must not be blank
/// - At most [`MAX_VOID_REASON_LEN`] characters
pub fn validate_void_reason(reason: &str) -> ValidationResult<String> {
    let reason = reason.trim();

    if reason.is_empty() {
        return Err(ValidationError::Required {
            field: "reason".to_string(),
        });
    }

    if reason.chars().count() > MAX_VOID_REASON_LEN {
        return Err(ValidationError::TooLong {
            field: "reason".to_string(),
            max: MAX_VOID_REASON_LEN,
        });
    }

    Ok(reason.to_string())
}

/// Validates an offline client id (non-blank, at most 64 characters).
pub fn validate_local_id(local_id: &str) -> ValidationResult<()> {
    let local_id = local_id.trim();

    if local_id.is_empty() {
        return Err(ValidationError::Required {
            field: "local_id".to_string(),
        });
    }

    if local_id.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "local_id".to_string(),
            max: 64,
        });
    }

    Ok(())
}

/// Validates the last four digits of a card, when given.
pub fn validate_card_last_four(digits: &str) -> ValidationResult<()> {
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "card_last_four".to_string(),
            reason: "must be exactly 4 digits".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
