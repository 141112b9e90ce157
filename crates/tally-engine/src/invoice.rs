//! # Invoice Trigger
//!
//! Issues the electronic invoice of a committed sale. Runs out-of-band:
//! the invoice worker calls it for queued jobs and managers call
//! [`InvoiceTrigger::retry`] by hand. Nothing here can fail a sale.
//!
//! ## Trigger Flow
//! ```text
//! trigger(sale_id, override)
//!    │
//!    ├── invoice exists? ─────────────────────────────► Existing (no-op)
//!    ├── sale voided? ────────────────────────────────► SaleVoided
//!    │
//!    ├── type = override or FiscalRules::classify(branch, customer)
//!    ├── type needs tax id, customer has none ────────► FAILED row, no number
//!    │
//!    ├── tx: next_number(pos, type) + INSERT PENDING
//!    │        unique violation on sale_id ────────────► Existing (lost a race)
//!    │
//!    └── FiscalClient::create_invoice
//!           ├── clearance ─────────► ISSUED (+ CAE, expiry, number)
//!           ├── retryable rejection ► PENDING, retry_count + 1
//!           └── permanent rejection ► FAILED
//! ```

use chrono::NaiveDate;
use std::sync::Arc;
use tally_core::fiscal::{Invoice, InvoiceStatus};
use tally_core::{Actor, Branch, Capability, Customer, InvoiceType, Money, Sale};
use tally_db::{Database, InvoiceRepository, NewInvoice};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult, ErrorCode};
use crate::fiscal::{FiscalClient, FiscalInvoiceRequest, FiscalRules};
use crate::Engine;

const MISSING_TAX_ID_ERROR: &str = "MISSING_TAX_ID: invoice type requires a customer tax id";

/// What a trigger or retry did.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// The authority cleared the invoice.
    Issued(Invoice),
    /// The sale already had an invoice; nothing was done.
    Existing(Invoice),
    /// Retryable rejection; the invoice stays PENDING.
    Pending(Invoice),
    /// Permanent rejection or missing tax id; the invoice is FAILED.
    Failed(Invoice),
    /// The sale was voided before it could be invoiced.
    SaleVoided,
}

impl TriggerOutcome {
    pub fn invoice(&self) -> Option<&Invoice> {
        match self {
            TriggerOutcome::Issued(i)
            | TriggerOutcome::Existing(i)
            | TriggerOutcome::Pending(i)
            | TriggerOutcome::Failed(i) => Some(i),
            TriggerOutcome::SaleVoided => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TriggerOutcome::Issued(_) => "issued",
            TriggerOutcome::Existing(_) => "existing",
            TriggerOutcome::Pending(_) => "pending",
            TriggerOutcome::Failed(_) => "failed",
            TriggerOutcome::SaleVoided => "sale_voided",
        }
    }
}

fn customer_tax_id(customer: Option<&Customer>) -> Option<String> {
    customer
        .filter(|c| c.has_tax_id())
        .and_then(|c| c.tax_id.clone())
}

/// Idempotent caller of the fiscal authority.
#[derive(Clone)]
pub struct InvoiceTrigger {
    db: Database,
    fiscal: Arc<dyn FiscalClient>,
    rules: Arc<dyn FiscalRules>,
    clock: Arc<dyn Clock>,
}

impl InvoiceTrigger {
    pub fn new(
        db: Database,
        fiscal: Arc<dyn FiscalClient>,
        rules: Arc<dyn FiscalRules>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        InvoiceTrigger {
            db,
            fiscal,
            rules,
            clock,
        }
    }

    /// Invoices a sale unless it already has an invoice.
    pub async fn trigger(
        &self,
        sale_id: &str,
        invoice_type: Option<InvoiceType>,
    ) -> EngineResult<TriggerOutcome> {
        if let Some(existing) = self.db.invoices().find_by_sale(sale_id).await? {
            debug!(sale_id = %sale_id, invoice_id = %existing.id, "Sale already has an invoice");
            return Ok(TriggerOutcome::Existing(existing));
        }

        let sale = self.load_sale(sale_id).await?;
        if sale.is_voided() {
            info!(sale_id = %sale_id, "Sale voided before invoicing; skipping");
            return Ok(TriggerOutcome::SaleVoided);
        }

        let branch = self.load_branch(&sale.branch_id).await?;
        let customer = self.load_customer(&sale).await?;

        let invoice_type = invoice_type.unwrap_or_else(|| {
            self.rules
                .classify(branch.tax_condition, customer.as_ref().map(|c| c.tax_condition))
        });
        let tax_id = customer_tax_id(customer.as_ref());
        let missing_tax_id = invoice_type.requires_customer_tax_id() && tax_id.is_none();

        let mut new = NewInvoice {
            sale_id,
            branch_id: &sale.branch_id,
            invoice_type,
            point_of_sale: branch.point_of_sale,
            invoice_number: None,
            status: InvoiceStatus::Pending,
            customer_tax_id: tax_id.as_deref(),
            tax: sale.tax(),
            total: sale.total(),
            last_error: None,
            at: self.clock.now(),
        };

        let mut tx = self.db.begin().await?;
        if missing_tax_id {
            new.status = InvoiceStatus::Failed;
            new.last_error = Some(MISSING_TAX_ID_ERROR);
        } else {
            let number =
                InvoiceRepository::next_number(&mut tx, branch.point_of_sale, invoice_type).await?;
            new.invoice_number = Some(number);
        }

        let inserted = InvoiceRepository::insert(&mut tx, &new).await;
        let invoice = match inserted {
            Ok(invoice) => invoice,
            Err(e) if e.is_unique_violation_on("invoices.sale_id") => {
                // Rolls back, so the allocated number is not consumed.
                drop(tx);
                debug!(sale_id = %sale_id, "Concurrent trigger created the invoice first");
                return self.existing(sale_id).await;
            }
            Err(e) => return Err(e.into()),
        };
        tx.commit().await?;

        if missing_tax_id {
            warn!(
                sale_id = %sale_id,
                invoice_type = %invoice_type,
                "Invoice type requires a customer tax id; invoice marked FAILED"
            );
            return Ok(TriggerOutcome::Failed(invoice));
        }

        info!(
            sale_id = %sale_id,
            invoice_id = %invoice.id,
            invoice_type = %invoice_type,
            number = ?invoice.invoice_number,
            "Invoice created"
        );

        self.submit(invoice, &branch, sale.business_date).await
    }

    /// Manual retry of a sale's PENDING or FAILED invoice.
    pub async fn retry(&self, actor: &Actor, sale_id: &str) -> EngineResult<TriggerOutcome> {
        if !actor.capabilities.contains(Capability::RetryInvoice) {
            return Err(EngineError::new(
                ErrorCode::PermissionDenied,
                format!("{} is required to retry invoices", Capability::RetryInvoice),
            ));
        }

        let invoice = self
            .db
            .invoices()
            .find_by_sale(sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Invoice for sale", sale_id))?;

        match invoice.status {
            InvoiceStatus::Issued => Err(EngineError::new(
                ErrorCode::InvoiceAlreadyIssued,
                format!("Invoice {} is already issued", invoice.id),
            )),
            InvoiceStatus::Cancelled => Err(EngineError::business(format!(
                "Invoice {} is cancelled",
                invoice.id
            ))),
            InvoiceStatus::Pending | InvoiceStatus::Failed => {
                info!(
                    sale_id = %sale_id,
                    invoice_id = %invoice.id,
                    user_id = %actor.user_id,
                    "Manual invoice retry"
                );
                self.resubmit(invoice).await
            }
        }
    }

    /// Worker entry: creates the invoice, or resubmits one left PENDING by a
    /// retryable rejection. Anything else is already settled.
    pub async fn process(
        &self,
        sale_id: &str,
        invoice_type: Option<InvoiceType>,
    ) -> EngineResult<TriggerOutcome> {
        match self.db.invoices().find_by_sale(sale_id).await? {
            None => self.trigger(sale_id, invoice_type).await,
            Some(invoice) if invoice.status == InvoiceStatus::Pending => {
                self.resubmit(invoice).await
            }
            Some(invoice) => Ok(TriggerOutcome::Existing(invoice)),
        }
    }

    async fn resubmit(&self, invoice: Invoice) -> EngineResult<TriggerOutcome> {
        let sale = self.load_sale(&invoice.sale_id).await?;
        if sale.is_voided() {
            return Ok(TriggerOutcome::SaleVoided);
        }
        let branch = self.load_branch(&sale.branch_id).await?;

        // A FAILED invoice may be missing the tax id that failed it.
        let mut tax_id = None;
        if invoice.invoice_type.requires_customer_tax_id() && invoice.customer_tax_id.is_none() {
            let customer = self.load_customer(&sale).await?;
            tax_id = customer_tax_id(customer.as_ref());
            if tax_id.is_none() {
                return Err(EngineError::new(
                    ErrorCode::MissingTaxId,
                    format!(
                        "Invoice type {} requires a customer tax id",
                        invoice.invoice_type
                    ),
                ));
            }
        }

        let needs_reopen = invoice.status == InvoiceStatus::Failed
            || invoice.invoice_number.is_none()
            || tax_id.is_some();

        let invoice = if needs_reopen {
            let mut tx = self.db.begin().await?;
            let number = match invoice.invoice_number {
                Some(_) => None,
                None => Some(
                    InvoiceRepository::next_number(
                        &mut tx,
                        invoice.point_of_sale,
                        invoice.invoice_type,
                    )
                    .await?,
                ),
            };
            let reopened = InvoiceRepository::reopen(
                &mut tx,
                &invoice.id,
                number,
                tax_id.as_deref(),
                self.clock.now(),
            )
            .await?;
            if !reopened {
                drop(tx);
                return self.existing(&invoice.sale_id).await;
            }
            tx.commit().await?;
            self.reload(&invoice.id).await?
        } else {
            invoice
        };

        self.submit(invoice, &branch, sale.business_date).await
    }

    /// Sends a PENDING invoice to the authority and records the answer.
    async fn submit(
        &self,
        invoice: Invoice,
        branch: &Branch,
        issue_date: NaiveDate,
    ) -> EngineResult<TriggerOutcome> {
        let invoice_number = invoice.invoice_number.ok_or_else(|| {
            EngineError::internal(format!("Invoice {} has no number", invoice.id))
        })?;

        let request = FiscalInvoiceRequest {
            invoice_id: invoice.id.clone(),
            sale_id: invoice.sale_id.clone(),
            invoice_type: invoice.invoice_type,
            point_of_sale: invoice.point_of_sale,
            invoice_number,
            issuer_tax_id: branch.tax_id.clone(),
            customer_tax_id: invoice.customer_tax_id.clone(),
            net: Money::from_cents(invoice.net_cents),
            tax: Money::from_cents(invoice.tax_cents),
            total: Money::from_cents(invoice.total_cents),
            issue_date,
        };

        let invoices = self.db.invoices();
        match self.fiscal.create_invoice(&request).await {
            Ok(clearance) => {
                let now = self.clock.now();
                let issued = invoices
                    .mark_issued(
                        &invoice.id,
                        clearance.invoice_number,
                        &clearance.cae,
                        clearance.cae_expiration,
                        now,
                    )
                    .await?;

                if issued {
                    info!(
                        sale_id = %invoice.sale_id,
                        invoice_id = %invoice.id,
                        number = clearance.invoice_number,
                        cae = %clearance.cae,
                        "Invoice issued"
                    );
                    return Ok(TriggerOutcome::Issued(self.reload(&invoice.id).await?));
                }

                let late = invoices
                    .record_late_clearance(
                        &invoice.id,
                        clearance.invoice_number,
                        &clearance.cae,
                        clearance.cae_expiration,
                        now,
                    )
                    .await?;
                if late {
                    warn!(
                        sale_id = %invoice.sale_id,
                        invoice_id = %invoice.id,
                        cae = %clearance.cae,
                        "Clearance arrived after the sale was voided; credit note required"
                    );
                    return Ok(TriggerOutcome::SaleVoided);
                }

                self.existing(&invoice.sale_id).await
            }
            Err(rejection) if rejection.retryable => {
                invoices
                    .mark_retryable(&invoice.id, &rejection.message, self.clock.now())
                    .await?;
                warn!(
                    sale_id = %invoice.sale_id,
                    invoice_id = %invoice.id,
                    error = %rejection.message,
                    "Fiscal authority unavailable; invoice stays pending"
                );
                Ok(TriggerOutcome::Pending(self.reload(&invoice.id).await?))
            }
            Err(rejection) => {
                invoices
                    .mark_failed(&invoice.id, &rejection.message, self.clock.now())
                    .await?;
                error!(
                    sale_id = %invoice.sale_id,
                    invoice_id = %invoice.id,
                    error = %rejection.message,
                    "Invoice rejected by fiscal authority"
                );
                Ok(TriggerOutcome::Failed(self.reload(&invoice.id).await?))
            }
        }
    }

    // =========================================================================
    // Loaders
    // =========================================================================

    async fn existing(&self, sale_id: &str) -> EngineResult<TriggerOutcome> {
        let invoice = self.db.invoices().find_by_sale(sale_id).await?.ok_or_else(|| {
            EngineError::internal(format!("Invoice for sale {} disappeared", sale_id))
        })?;
        Ok(TriggerOutcome::Existing(invoice))
    }

    async fn reload(&self, invoice_id: &str) -> EngineResult<Invoice> {
        self.db
            .invoices()
            .get_by_id(invoice_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Invoice", invoice_id))
    }

    async fn load_sale(&self, sale_id: &str) -> EngineResult<Sale> {
        self.db
            .sales()
            .get_by_id(sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", sale_id))
    }

    async fn load_branch(&self, branch_id: &str) -> EngineResult<Branch> {
        self.db
            .catalog()
            .get_branch(branch_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Branch", branch_id))
    }

    async fn load_customer(&self, sale: &Sale) -> EngineResult<Option<Customer>> {
        match sale.customer_id.as_deref() {
            Some(id) => Ok(self.db.customers().get_by_id(id).await?),
            None => Ok(None),
        }
    }
}

impl Engine {
    /// Manual retry of a sale's invoice. Requires `RETRY_INVOICE`.
    pub async fn retry_invoice(&self, actor: &Actor, sale_id: &str) -> EngineResult<TriggerOutcome> {
        self.invoices.retry(actor, sale_id).await
    }
}
