//! # tally-core: Pure Business Logic for the Tally sale engine
//!
//! Everything in this crate is a pure function or a plain data type. The
//! database layer (`tally-db`) and the services (`tally-engine`) build on it.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally POS Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    tally-engine (services)                      │   │
//! │  │   create_sale ──► void_sale ──► InvoiceTrigger ──► receipt      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐  │   │
//! │  │   │  money  │ │ pricing │ │ payment │ │ fiscal  │ │business │  │   │
//! │  │   │  Money  │ │ totals  │ │ tenders │ │ A/B/C   │ │  _day   │  │   │
//! │  │   └─────────┘ └─────────┘ └─────────┘ └─────────┘ └─────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    tally-db (Database Layer)                    │   │
//! │  │         SQLite ledgers, migrations, repositories                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Sale, SaleItem, ledger entries, reference data)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`pricing`] - Line and sale totals, discounts, point redemption
//! - [`payment`] - Tender validation against the sale total
//! - [`capability`] - Role capability bitmask
//! - [`fiscal`] - Invoice types, tax conditions, invoice records
//! - [`business_day`] - Business date derivation from a cutoff time
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use tally_core::money::Money;
//! use tally_core::types::TaxRate;
//!
//! let line_total = Money::from_cents(20000); // 200.00, tax included
//! let tax = line_total.calculate_included_tax(TaxRate::from_bps(2100));
//! assert_eq!(tax.cents(), 3471);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod business_day;
pub mod capability;
pub mod error;
pub mod fiscal;
pub mod money;
pub mod payment;
pub mod pricing;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use capability::{Capabilities, Capability};
pub use error::{CoreError, CoreResult, ValidationError};
pub use fiscal::{InvoiceType, TaxCondition};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum number of lines in a single sale.
pub const MAX_SALE_LINES: usize = 200;

/// Maximum quantity of a single line.
///
/// ## Business Reason
/// Prevents accidental over-ordering (e.g., typing 10000 instead of 10).
pub const MAX_ITEM_QUANTITY: i64 = 9_999;

/// Largest amount accepted for a single price, tender or deduction, in cents.
pub const MAX_AMOUNT_CENTS: i64 = 100_000_000_000;

/// Largest number of loyalty points a sale may redeem.
pub const MAX_POINTS_REDEEMED: i64 = 1_000_000_000;

/// Maximum length of a void reason.
pub const MAX_VOID_REASON_LEN: usize = 500;

/// Basis points in 100%.
pub const BPS_SCALE: u32 = 10_000;
