//! # Engine Error Type
//!
//! Unified error type for every engine entry point.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Flow in Tally POS                              │
//! │                                                                         │
//! │  tally-core                tally-db                 tally-engine        │
//! │  ──────────                ────────                 ────────────        │
//! │  ValidationError ─┐                                                     │
//! │                   ▼                                                     │
//! │  CoreError ─────────────────────────────────────► EngineError          │
//! │                            DbError ─────────────►   { code, message }  │
//! │                                                          │              │
//! │  Workflow guards (session closed, wrong day, PIN) ───────┘              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callers branch on [`ErrorCode`]; the message is for display. Internal and
//! database failures are logged here with the real cause and surfaced with a
//! generic message.

use serde::Serialize;
use std::fmt;
use tally_core::CoreError;
use tally_db::DbError;
use ts_rs::TS;

/// Error returned by engine operations.
///
/// ## Serialization
/// ```json
/// {
///   "code": "SESSION_NOT_OPEN",
///   "message": "Register session is not open: 5f0c…"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct EngineError {
    /// Machine-readable error code for programmatic handling
    pub code: ErrorCode,

    /// Human-readable error message for display
    pub message: String,
}

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Referenced record does not exist
    NotFound,

    /// Malformed input
    ValidationError,

    /// The register session is missing or closed
    SessionNotOpen,

    /// Tenders do not cover the total
    InsufficientPayment,

    /// A payment method needs a reference that was not supplied
    MissingReference,

    /// Not enough stock for a product that cannot go negative
    InsufficientStock,

    /// Customer lacks the loyalty points to redeem
    InsufficientLoyaltyPoints,

    /// Customer lacks the store credit to spend
    InsufficientStoreCredit,

    /// The sale's register session is already closed
    ShiftAlreadyClosed,

    /// The sale belongs to an earlier business day
    PreviousBusinessDayVoidForbidden,

    /// Voiding needs a manager PIN
    ManagerAuthorizationRequired,

    /// The manager PIN did not resolve to an authorized user
    ManagerAuthorizationInvalid,

    /// The actor lacks a required capability
    PermissionDenied,

    /// The sale is already voided
    AlreadyVoided,

    /// The invoice is already issued
    InvoiceAlreadyIssued,

    /// The invoice type needs a customer tax id
    MissingTaxId,

    /// Any other business rule violation
    BusinessRule,

    /// Configuration could not be loaded or is invalid
    InvalidConfig,

    /// Database operation failed
    DatabaseError,

    /// Unexpected failure
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::SessionNotOpen => "SESSION_NOT_OPEN",
            ErrorCode::InsufficientPayment => "INSUFFICIENT_PAYMENT",
            ErrorCode::MissingReference => "MISSING_REFERENCE",
            ErrorCode::InsufficientStock => "INSUFFICIENT_STOCK",
            ErrorCode::InsufficientLoyaltyPoints => "INSUFFICIENT_LOYALTY_POINTS",
            ErrorCode::InsufficientStoreCredit => "INSUFFICIENT_STORE_CREDIT",
            ErrorCode::ShiftAlreadyClosed => "SHIFT_ALREADY_CLOSED",
            ErrorCode::PreviousBusinessDayVoidForbidden => "PREVIOUS_BUSINESS_DAY_VOID_FORBIDDEN",
            ErrorCode::ManagerAuthorizationRequired => "MANAGER_AUTHORIZATION_REQUIRED",
            ErrorCode::ManagerAuthorizationInvalid => "MANAGER_AUTHORIZATION_INVALID",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::AlreadyVoided => "ALREADY_VOIDED",
            ErrorCode::InvoiceAlreadyIssued => "INVOICE_ALREADY_ISSUED",
            ErrorCode::MissingTaxId => "MISSING_TAX_ID",
            ErrorCode::BusinessRule => "BUSINESS_RULE",
            ErrorCode::InvalidConfig => "INVALID_CONFIG",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EngineError {
    /// Creates a new engine error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        EngineError {
            code,
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(resource: &str, id: &str) -> Self {
        EngineError::new(ErrorCode::NotFound, format!("{} not found: {}", resource, id))
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::new(ErrorCode::ValidationError, message)
    }

    /// Creates a business rule error.
    pub fn business(message: impl Into<String>) -> Self {
        EngineError::new(ErrorCode::BusinessRule, message)
    }

    /// Creates a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        EngineError::new(ErrorCode::InvalidConfig, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        EngineError::new(ErrorCode::Internal, message)
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for EngineError {}

/// Converts database errors to engine errors.
impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => EngineError::not_found(&entity, &id),
            DbError::UniqueViolation { field, value } => EngineError::new(
                ErrorCode::ValidationError,
                format!("{} '{}' already exists", field, value),
            ),
            DbError::ForeignKeyViolation { message } => {
                tracing::error!("Foreign key violation: {}", message);
                EngineError::new(ErrorCode::ValidationError, "Invalid reference")
            }
            DbError::CheckViolation(e) => {
                tracing::error!("Check constraint violated: {}", e);
                EngineError::new(ErrorCode::DatabaseError, "Database constraint violated")
            }
            DbError::ConnectionFailed(_) => {
                EngineError::new(ErrorCode::DatabaseError, "Database connection failed")
            }
            DbError::MigrationFailed(_) => {
                EngineError::new(ErrorCode::DatabaseError, "Database migration failed")
            }
            DbError::QueryFailed(e) => {
                // Log the actual error but return a generic message
                tracing::error!("Database query failed: {}", e);
                EngineError::new(ErrorCode::DatabaseError, "Database operation failed")
            }
            DbError::PoolExhausted => {
                EngineError::new(ErrorCode::DatabaseError, "Database pool exhausted")
            }
            DbError::Internal(e) => {
                tracing::error!("Internal database error: {}", e);
                EngineError::new(ErrorCode::DatabaseError, "Database operation failed")
            }
        }
    }
}

/// Raw sqlx errors, such as a failed `commit()`, go through `DbError`.
impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        DbError::from(err).into()
    }
}

/// Converts core errors to engine errors.
impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        let code = match err {
            CoreError::PaymentMethodNotFound(_) => ErrorCode::NotFound,
            CoreError::MissingReference { .. } => ErrorCode::MissingReference,
            CoreError::InsufficientPayment { .. } => ErrorCode::InsufficientPayment,
            CoreError::NegativeTotal { .. } => ErrorCode::BusinessRule,
            CoreError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
            CoreError::InsufficientPoints { .. } => ErrorCode::InsufficientLoyaltyPoints,
            CoreError::InsufficientCredit { .. } => ErrorCode::InsufficientStoreCredit,
            CoreError::TooManyLines { .. } => ErrorCode::ValidationError,
            CoreError::Validation(_) => ErrorCode::ValidationError,
        };
        EngineError::new(code, message)
    }
}

impl From<tally_core::ValidationError> for EngineError {
    fn from(err: tally_core::ValidationError) -> Self {
        EngineError::validation(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::invalid_config(format!("Failed to access config file: {}", err))
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::invalid_config(format!("Failed to parse config: {}", err))
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::invalid_config(format!("Failed to serialize config: {}", err))
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::Money;

    #[test]
    fn test_core_errors_keep_their_domain_code() {
        let err: EngineError = CoreError::InsufficientPayment {
            required: Money::from_cents(22500),
            tendered: Money::from_cents(20000),
        }
        .into();
        assert_eq!(err.code, ErrorCode::InsufficientPayment);

        let err: EngineError = CoreError::MissingReference {
            method: "CARD".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::MissingReference);
        assert!(err.message.contains("CARD"));
    }

    #[test]
    fn test_internal_db_errors_are_generic() {
        let err: EngineError = DbError::QueryFailed("no such column: secret".to_string()).into();
        assert_eq!(err.code, ErrorCode::DatabaseError);
        assert!(!err.message.contains("secret"));
    }

    #[test]
    fn test_sqlx_errors_map_through_db_error() {
        let err: EngineError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.code, ErrorCode::DatabaseError);

        let err: EngineError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[test]
    fn test_serializes_screaming_code() {
        let err = EngineError::new(ErrorCode::PreviousBusinessDayVoidForbidden, "nope");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "PREVIOUS_BUSINESS_DAY_VOID_FORBIDDEN");
        assert_eq!(err.to_string(), "[PREVIOUS_BUSINESS_DAY_VOID_FORBIDDEN] nope");
    }
}
