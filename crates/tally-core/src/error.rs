//! # Error Types
//!
//! Domain-specific error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tally-db errors (separate crate)                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  tally-engine errors                                                   │
//! │  └── EngineError      - Code + message handed to callers               │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError { code, message }     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::money::Money;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// Raised by the pure calculators in this crate and by the engine when a
/// ledger refuses a write. Each variant maps to exactly one domain error code.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A tender references a payment method that is unknown or inactive.
    #[error("Payment method not found: {0}")]
    PaymentMethodNotFound(String),

    /// A tender was made with a method that needs a reference and none was given.
    ///
    /// ## When This Occurs
    /// - Card or transfer tenders without an authorization / transfer number
    #[error("Payment method {method} requires a reference")]
    MissingReference { method: String },

    /// Tenders do not cover the sale total.
    ///
    /// ## User Workflow
    /// ```text
    /// Total: 225.00
    ///      │
    ///      ▼
    /// Tenders: CASH 200.00
    ///      │
    ///      ▼
    /// InsufficientPayment { required: 225.00, tendered: 200.00 }
    ///      │
    ///      ▼
    /// Nothing is written; the cashier collects the difference
    /// ```
    #[error("Insufficient payment: required {required}, tendered {tendered}")]
    InsufficientPayment { required: Money, tendered: Money },

    /// Discounts, redemptions and credit exceed the subtotal.
    #[error("Sale total cannot be negative (computed {total})")]
    NegativeTotal { total: Money },

    /// Insufficient stock to complete sale.
    ///
    /// ## When This Occurs
    /// - Selling more than the branch holds of a product whose
    ///   `allow_negative_stock` flag is off
    #[error("Insufficient stock for {sku}: available {available}, requested {requested}")]
    InsufficientStock {
        sku: String,
        available: i64,
        requested: i64,
    },

    /// Customer does not hold enough loyalty points for the redemption.
    #[error("Insufficient loyalty points: available {available}, requested {requested}")]
    InsufficientPoints { available: i64, requested: i64 },

    /// Customer store credit does not cover the amount applied to the sale.
    #[error("Insufficient store credit: available {available}, requested {requested}")]
    InsufficientCredit { available: Money, requested: Money },

    /// Sale has more lines than allowed.
    #[error("Sale cannot have more than {max} lines")]
    TooManyLines { max: usize },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when a request doesn't meet shape requirements.
/// Used for early validation before any database access.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID, invalid date).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// A combination of fields is not allowed.
    #[error("{0}")]
    Inconsistent(String),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            sku: "YERBA-1KG".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for YERBA-1KG: available 3, requested 5"
        );

        let err = CoreError::InsufficientPayment {
            required: Money::from_cents(22500),
            tendered: Money::from_cents(20000),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient payment: required $225.00, tendered $200.00"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "reason".to_string(),
        };
        assert_eq!(err.to_string(), "reason is required");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::MustBePositive {
            field: "quantity".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
