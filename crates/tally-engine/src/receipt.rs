//! Read-only receipt projection of a sale.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tally_core::fiscal::{Invoice, InvoiceStatus};
use tally_core::{InvoiceType, Money, SaleItem, SalePayment, SaleStatus};
use ts_rs::TS;

use crate::error::{EngineError, EngineResult};
use crate::Engine;

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct ReceiptLine {
    pub sku: String,
    pub name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub discount: Money,
    pub tax: Money,
    pub line_total: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct ReceiptPayment {
    pub method_code: String,
    pub amount: Money,
    pub reference: Option<String>,
    pub card_last_four: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct ReceiptInvoice {
    pub invoice_type: InvoiceType,
    pub point_of_sale: i64,
    pub invoice_number: Option<i64>,
    pub status: InvoiceStatus,
    pub cae: Option<String>,
    #[ts(as = "Option<String>")]
    pub cae_expiration: Option<NaiveDate>,
}

/// What gets printed or re-printed for a sale.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct Receipt {
    pub sale_id: String,
    pub status: SaleStatus,
    #[ts(as = "String")]
    pub business_date: NaiveDate,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub customer_id: Option<String>,
    pub lines: Vec<ReceiptLine>,
    pub payments: Vec<ReceiptPayment>,
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub points_value: Money,
    pub credit_used: Money,
    pub total: Money,
    pub tendered: Money,
    /// `tendered − total`, never below zero.
    pub change: Money,
    pub change_as_credit: Money,
    pub points_redeemed: i64,
    pub points_earned: i64,
    pub invoice: Option<ReceiptInvoice>,
    pub void_reason: Option<String>,
}

impl From<&SaleItem> for ReceiptLine {
    fn from(item: &SaleItem) -> Self {
        ReceiptLine {
            sku: item.sku_snapshot.clone(),
            name: item.name_snapshot.clone(),
            quantity: item.quantity,
            unit_price: Money::from_cents(item.unit_price_cents),
            discount: Money::from_cents(item.discount_cents),
            tax: Money::from_cents(item.tax_cents),
            line_total: Money::from_cents(item.line_total_cents),
        }
    }
}

impl From<&SalePayment> for ReceiptPayment {
    fn from(payment: &SalePayment) -> Self {
        ReceiptPayment {
            method_code: payment.method_code.clone(),
            amount: payment.amount(),
            reference: payment.reference.clone(),
            card_last_four: payment.card_last_four.clone(),
        }
    }
}

impl From<Invoice> for ReceiptInvoice {
    fn from(invoice: Invoice) -> Self {
        ReceiptInvoice {
            invoice_type: invoice.invoice_type,
            point_of_sale: invoice.point_of_sale,
            invoice_number: invoice.invoice_number,
            status: invoice.status,
            cae: invoice.cae,
            cae_expiration: invoice.cae_expiration,
        }
    }
}

impl Engine {
    /// Builds the receipt of a sale. Writes nothing.
    pub async fn receipt(&self, sale_id: &str) -> EngineResult<Receipt> {
        let sales = self.db.sales();
        let sale = sales
            .get_by_id(sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", sale_id))?;
        let items = sales.get_items(sale_id).await?;
        let payments = sales.get_payments(sale_id).await?;
        let invoice = self.db.invoices().find_by_sale(sale_id).await?;

        let tendered: Money = payments.iter().map(SalePayment::amount).sum();

        Ok(Receipt {
            sale_id: sale.id.clone(),
            status: sale.status,
            business_date: sale.business_date,
            created_at: sale.created_at,
            customer_id: sale.customer_id.clone(),
            lines: items.iter().map(ReceiptLine::from).collect(),
            payments: payments.iter().map(ReceiptPayment::from).collect(),
            subtotal: sale.subtotal(),
            discount: sale.discount(),
            tax: sale.tax(),
            points_value: sale.points_redemption_value(),
            credit_used: sale.credit_used(),
            total: sale.total(),
            tendered,
            change: (tendered - sale.total()).floor_zero(),
            change_as_credit: sale.change_as_credit(),
            points_redeemed: sale.points_redeemed,
            points_earned: sale.points_earned,
            invoice: invoice.map(ReceiptInvoice::from),
            void_reason: sale.void_reason,
        })
    }
}
