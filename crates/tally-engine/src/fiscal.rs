//! # Fiscal Authority Seams
//!
//! The engine never talks to the tax authority itself. It calls an injected
//! [`FiscalClient`] and asks injected [`FiscalRules`] which invoice type a
//! sale needs.
//!
//! ```text
//! InvoiceTrigger ──► FiscalRules::classify(branch, customer) ──► A | B | C
//!       │
//!       └──────────► FiscalClient::create_invoice(request)
//!                        ├── Ok(FiscalClearance { cae, cae_expiration, invoice_number })
//!                        └── Err(FiscalRejection { message, retryable })
//! ```

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tally_core::fiscal::classify_invoice_type;
use tally_core::{InvoiceType, Money, TaxCondition};
use thiserror::Error;

/// What the authority is asked to clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalInvoiceRequest {
    pub invoice_id: String,
    pub sale_id: String,
    pub invoice_type: InvoiceType,
    pub point_of_sale: i64,
    pub invoice_number: i64,
    pub issuer_tax_id: Option<String>,
    pub customer_tax_id: Option<String>,
    pub net: Money,
    pub tax: Money,
    pub total: Money,
    pub issue_date: NaiveDate,
}

/// A successful clearance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalClearance {
    /// Authorization code (CAE).
    pub cae: String,
    pub cae_expiration: NaiveDate,
    /// Number the authority recorded; normally the one requested.
    pub invoice_number: i64,
}

/// A refused or failed clearance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FiscalRejection {
    pub message: String,
    /// Transport failures and authority outages are retryable; a rejected
    /// document is not.
    pub retryable: bool,
}

impl FiscalRejection {
    pub fn retryable(message: impl Into<String>) -> Self {
        FiscalRejection {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        FiscalRejection {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Client for the tax authority's invoicing API.
#[async_trait]
pub trait FiscalClient: Send + Sync {
    async fn create_invoice(
        &self,
        request: &FiscalInvoiceRequest,
    ) -> Result<FiscalClearance, FiscalRejection>;
}

/// Picks the invoice type for a sale.
pub trait FiscalRules: Send + Sync {
    fn classify(&self, branch: TaxCondition, customer: Option<TaxCondition>) -> InvoiceType;
}

/// The standard issuer/receiver matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardFiscalRules;

impl FiscalRules for StandardFiscalRules {
    fn classify(&self, branch: TaxCondition, customer: Option<TaxCondition>) -> InvoiceType {
        classify_invoice_type(branch, customer)
    }
}

/// Stand-in used until a real client is wired. Every request is refused as
/// retryable, so queued jobs back off and are picked up once a client exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredFiscalClient;

#[async_trait]
impl FiscalClient for UnconfiguredFiscalClient {
    async fn create_invoice(
        &self,
        _request: &FiscalInvoiceRequest,
    ) -> Result<FiscalClearance, FiscalRejection> {
        Err(FiscalRejection::retryable("Fiscal client is not configured"))
    }
}
