//! # Fiscal Types & Classification
//!
//! Tax conditions, invoice types and the invoice / invoice-job records the
//! engine keeps about each sale's electronic invoice.
//!
//! ## Classification
//! ```text
//! ┌──────────────────────────┬───────────────────────────┬──────────┐
//! │ Branch condition         │ Customer condition        │ Invoice  │
//! ├──────────────────────────┼───────────────────────────┼──────────┤
//! │ REGISTERED_TAXPAYER      │ REGISTERED_TAXPAYER       │ A        │
//! │ REGISTERED_TAXPAYER      │ anything else / none      │ B        │
//! │ MONOTRIBUTO / EXEMPT     │ any                       │ C        │
//! │ FINAL_CONSUMER (invalid) │ any                       │ C        │
//! └──────────────────────────┴───────────────────────────┴──────────┘
//! ```
//! Type A invoices identify the buyer and need the customer's tax id.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Tax Condition
// =============================================================================

/// VAT registration status of a branch or customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaxCondition {
    RegisteredTaxpayer,
    Monotributo,
    Exempt,
    FinalConsumer,
}

// =============================================================================
// Invoice Type
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[ts(export)]
pub enum InvoiceType {
    A,
    B,
    C,
}

impl InvoiceType {
    /// Whether this invoice type must carry the buyer's tax id.
    #[inline]
    pub const fn requires_customer_tax_id(&self) -> bool {
        matches!(self, InvoiceType::A)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::A => "A",
            InvoiceType::B => "B",
            InvoiceType::C => "C",
        }
    }
}

impl fmt::Display for InvoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(InvoiceType::A),
            "B" => Ok(InvoiceType::B),
            "C" => Ok(InvoiceType::C),
            other => Err(format!("Unknown invoice type: {}", other)),
        }
    }
}

/// Picks the invoice type for a sale from the issuer's and buyer's tax
/// conditions. A sale without a customer is a sale to a final consumer.
pub fn classify_invoice_type(branch: TaxCondition, customer: Option<TaxCondition>) -> InvoiceType {
    match (branch, customer) {
        (TaxCondition::RegisteredTaxpayer, Some(TaxCondition::RegisteredTaxpayer)) => InvoiceType::A,
        (TaxCondition::RegisteredTaxpayer, _) => InvoiceType::B,
        _ => InvoiceType::C,
    }
}

// =============================================================================
// Invoice
// =============================================================================

/// Fiscal state of a sale's invoice.
///
/// ```text
///            clearance ok
///  PENDING ───────────────► ISSUED ──(void)──► CANCELLED + credit note due
///     │  ▲
///     │  └── retryable rejection (retry_count += 1)
///     │
///     └── permanent rejection ──► FAILED ──(manual retry)──► PENDING …
///
///  PENDING / FAILED ──(void)──► CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Pending,
    Issued,
    Failed,
    Cancelled,
}

/// The electronic invoice of one sale (at most one per sale).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Invoice {
    pub id: String,
    pub sale_id: String,
    pub branch_id: String,
    pub invoice_type: InvoiceType,
    pub point_of_sale: i64,
    /// Sequential number; absent when the invoice failed before numbering.
    pub invoice_number: Option<i64>,
    pub status: InvoiceStatus,
    /// Authorization code granted by the tax authority.
    pub cae: Option<String>,
    #[ts(as = "Option<String>")]
    pub cae_expiration: Option<NaiveDate>,
    pub customer_tax_id: Option<String>,
    pub net_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub retry_count: i64,
    pub last_error: Option<String>,
    /// Set when an issued invoice's sale was voided.
    pub credit_note_required: bool,
    #[ts(as = "Option<String>")]
    pub issued_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    #[inline]
    pub fn is_issued(&self) -> bool {
        self.status == InvoiceStatus::Issued
    }
}

// =============================================================================
// Invoice Job
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceJobStatus {
    Queued,
    Done,
    Failed,
}

/// Queue entry asking the invoice worker to invoice one sale.
///
/// Written in the same transaction as the sale (outbox pattern), so a
/// committed sale always has a job and a rolled-back sale never has one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InvoiceJob {
    pub id: String,
    pub sale_id: String,
    /// Explicit invoice type requested at sale time.
    pub invoice_type: Option<InvoiceType>,
    pub status: InvoiceJobStatus,
    pub attempts: i64,
    #[ts(as = "String")]
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_table() {
        use TaxCondition::*;

        assert_eq!(
            classify_invoice_type(RegisteredTaxpayer, Some(RegisteredTaxpayer)),
            InvoiceType::A
        );
        assert_eq!(
            classify_invoice_type(RegisteredTaxpayer, Some(Monotributo)),
            InvoiceType::B
        );
        assert_eq!(classify_invoice_type(RegisteredTaxpayer, None), InvoiceType::B);
        assert_eq!(
            classify_invoice_type(Monotributo, Some(RegisteredTaxpayer)),
            InvoiceType::C
        );
        assert_eq!(classify_invoice_type(Exempt, None), InvoiceType::C);
    }

    #[test]
    fn test_only_type_a_needs_tax_id() {
        assert!(InvoiceType::A.requires_customer_tax_id());
        assert!(!InvoiceType::B.requires_customer_tax_id());
        assert!(!InvoiceType::C.requires_customer_tax_id());
    }

    #[test]
    fn test_invoice_type_parse() {
        assert_eq!("a".parse::<InvoiceType>().unwrap(), InvoiceType::A);
        assert_eq!(" C ".parse::<InvoiceType>().unwrap(), InvoiceType::C);
        assert!("E".parse::<InvoiceType>().is_err());
    }
}
