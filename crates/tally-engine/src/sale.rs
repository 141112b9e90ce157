//! # Sale Creation
//!
//! Prices a basket, validates its tenders and commits every effect of the
//! sale in one SQLite transaction.
//!
//! ## Flow
//! ```text
//! create_sale(actor, request)
//!    │
//!    │  no writes yet
//!    ├── validate request shape
//!    ├── local_id already synced? ───────────────► existing sale (replayed)
//!    ├── session OPEN? ──────────────────────────► SESSION_NOT_OPEN
//!    ├── load products, payment methods, customer
//!    ├── points / credit within balance? ────────► INSUFFICIENT_LOYALTY_POINTS / _STORE_CREDIT
//!    ├── price_sale ─► validate_tenders ─────────► INSUFFICIENT_PAYMENT / MISSING_REFERENCE
//!    ├── invoice override needs tax id? ─────────► MISSING_TAX_ID
//!    │
//!    │  BEGIN
//!    ├── INSERT sale (COMPLETED)
//!    ├── per item: INSERT item, stock −qty (SALE) ► INSUFFICIENT_STOCK
//!    ├── INSERT payments
//!    ├── customer: REDEEM, EARN, DEBIT, CREDIT ──► INSUFFICIENT_LOYALTY_POINTS / _STORE_CREDIT
//!    ├── INSERT invoice_jobs row
//!    │  COMMIT
//!    │
//!    └── nudge invoice worker, publish SaleCreated
//! ```
//! Any error before COMMIT drops the transaction, which rolls it back: a
//! rejected sale leaves no sale, item, payment, movement or ledger rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::collections::HashMap;
use tally_core::payment::{validate_tenders, Tender};
use tally_core::pricing::{
    points_earned, price_sale, LegacyDiscount, LineInput, PricingInput, SaleDiscount,
};
use tally_core::validation::{
    validate_amount, validate_card_last_four, validate_id, validate_local_id,
    validate_percent_bps, validate_points_redeemed, validate_price_cents, validate_quantity,
};
use tally_core::{
    Actor, CoreError, CreditTransactionType, Customer, InvoiceType, LoyaltyTransactionType,
    Money, PaymentMethod, Product, RegisterSession, Sale, SaleItem, SalePayment, SaleStatus,
    StockMovementType, ValidationError,
};
use tally_db::repository::new_id;
use tally_db::{
    CreditChange, CreditLedger, InvoiceJobRepository, LoyaltyLedger, PointsChange,
    SaleRepository, StockChange, StockLedger,
};
use tracing::{debug, info};
use ts_rs::TS;

use crate::error::{EngineError, EngineResult, ErrorCode};
use crate::events::SaleEvent;
use crate::Engine;

/// `reference_type` of stock movements written by a sale.
pub const SALE_REFERENCE: &str = "SALE";

// =============================================================================
// Request / Response
// =============================================================================

/// One basket line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleLineRequest {
    pub product_id: String,
    pub quantity: i64,
    /// Defaults to the catalog price.
    #[serde(default)]
    pub unit_price: Option<Money>,
    /// Line discount in basis points.
    #[serde(default)]
    pub discount_bps: u32,
}

/// A sale as rung up at the register.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CreateSaleRequest {
    pub session_id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub seller_id: Option<String>,
    pub items: Vec<SaleLineRequest>,
    #[serde(default)]
    pub payments: Vec<Tender>,
    /// Sale-level discount. Wins over `legacy_discount`.
    #[serde(default)]
    pub discount: Option<SaleDiscount>,
    #[serde(default)]
    pub legacy_discount: Option<LegacyDiscount>,
    #[serde(default)]
    pub points_redeemed: i64,
    #[serde(default)]
    pub credit_used: Money,
    /// Part of the change kept as store credit instead of cash.
    #[serde(default)]
    pub change_as_credit: Money,
    /// Forces the invoice type instead of classifying it.
    #[serde(default)]
    pub invoice_type: Option<InvoiceType>,
    /// Client-side id of a sale rung up offline.
    #[serde(default)]
    pub local_id: Option<String>,
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub client_created_at: Option<DateTime<Utc>>,
}

/// A committed sale.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct CreatedSale {
    pub sale: Sale,
    pub items: Vec<SaleItem>,
    pub payments: Vec<SalePayment>,
    /// `Σ tenders − total`.
    pub change: Money,
    /// The request's `local_id` had already been synced; nothing was written.
    pub replayed: bool,
}

// =============================================================================
// Create
// =============================================================================

impl Engine {
    /// Creates a sale: `none → COMPLETED`.
    pub async fn create_sale(
        &self,
        actor: &Actor,
        request: CreateSaleRequest,
    ) -> EngineResult<CreatedSale> {
        validate_request(&request)?;

        if let Some(local_id) = request.local_id.as_deref() {
            if let Some(existing) = self.db.sales().get_by_local_id(local_id).await? {
                info!(sale_id = %existing.id, local_id = %local_id, "Sale already synced; replaying");
                return self.replayed(existing).await;
            }
        }

        let session = self.load_open_session(&request.session_id).await?;
        let products = self.load_products(&request.items).await?;
        let methods = self.load_payment_methods(&request.payments).await?;
        let customer = self.load_customer(request.customer_id.as_deref()).await?;
        if let Some(customer) = &customer {
            check_customer_balances(customer, &request)?;
        }

        // ---------------------------------------------------------------------
        // Price and tender
        // ---------------------------------------------------------------------
        let lines = request
            .items
            .iter()
            .map(|line| {
                let product = product_for(&products, &line.product_id)?;
                Ok(LineInput {
                    product_id: product.id.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price.unwrap_or_else(|| product.price()),
                    discount_bps: line.discount_bps,
                    tax_rate: product.tax_rate(),
                    tax_included: product.is_tax_included,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let priced = price_sale(&PricingInput {
            lines,
            discount: request.discount,
            legacy_discount: request.legacy_discount,
            points_redeemed: request.points_redeemed,
            credit_used: request.credit_used,
            redemption_rate: self.config.pricing.redemption_rate(),
        })?;
        let totals = priced.totals;

        let tenders = validate_tenders(&request.payments, &methods, totals.total)?;
        let change = tenders.change;
        if request.change_as_credit > change {
            return Err(EngineError::validation(format!(
                "change_as_credit {} exceeds the change due {}",
                request.change_as_credit, change
            )));
        }

        if let Some(invoice_type) = request.invoice_type {
            let has_tax_id = customer.as_ref().is_some_and(|c| c.has_tax_id());
            if invoice_type.requires_customer_tax_id() && !has_tax_id {
                return Err(EngineError::new(
                    ErrorCode::MissingTaxId,
                    format!("Invoice type {} requires a customer with a tax id", invoice_type),
                ));
            }
        }

        // ---------------------------------------------------------------------
        // Build rows
        // ---------------------------------------------------------------------
        let now = self.clock.now();
        let earned = match customer {
            Some(_) => points_earned(totals.total, self.config.pricing.earn_rate_bps),
            None => 0,
        };

        let sale = Sale {
            id: new_id(),
            branch_id: session.branch_id.clone(),
            register_id: session.register_id.clone(),
            session_id: session.id.clone(),
            customer_id: request.customer_id.clone(),
            seller_id: request.seller_id.clone(),
            created_by: actor.user_id.clone(),
            status: SaleStatus::Completed,
            business_date: session.business_date,
            subtotal_cents: totals.subtotal.cents(),
            discount_cents: totals.discount.cents(),
            tax_cents: totals.tax.cents(),
            total_cents: totals.total.cents(),
            points_redeemed: totals.points_redeemed,
            points_redemption_value_cents: totals.points_value.cents(),
            points_earned: earned,
            credit_used_cents: totals.credit_used.cents(),
            change_as_credit_cents: request.change_as_credit.cents(),
            voided_by: None,
            voided_at: None,
            void_reason: None,
            void_approved_by: None,
            void_authorization: None,
            local_id: request.local_id.clone(),
            client_created_at: request.client_created_at,
            created_at: now,
            updated_at: now,
        };

        let mut lines = Vec::with_capacity(priced.lines.len());
        for line in &priced.lines {
            let product = product_for(&products, &line.product_id)?;
            let item = SaleItem {
                id: new_id(),
                sale_id: sale.id.clone(),
                product_id: product.id.clone(),
                sku_snapshot: product.sku.clone(),
                name_snapshot: product.name.clone(),
                quantity: line.quantity,
                unit_price_cents: line.unit_price.cents(),
                discount_bps: line.discount_bps,
                discount_cents: line.discount.cents(),
                tax_rate_bps: line.tax_rate.bps(),
                tax_included: line.tax_included,
                tax_cents: line.tax.cents(),
                cost_price_cents: product.cost_price_cents,
                line_total_cents: line.line_total.cents(),
                created_at: now,
            };
            lines.push((item, product.allow_negative_stock));
        }

        let payments: Vec<SalePayment> = tenders
            .tenders
            .iter()
            .map(|t| SalePayment {
                id: new_id(),
                sale_id: sale.id.clone(),
                payment_method_id: t.method.id.clone(),
                method_code: t.method.code.clone(),
                amount_cents: t.tender.amount.cents(),
                reference: t.tender.reference.clone(),
                card_last_four: t.tender.card_last_four.clone(),
                authorization_code: t.tender.authorization_code.clone(),
                created_at: now,
            })
            .collect();

        // ---------------------------------------------------------------------
        // Commit
        // ---------------------------------------------------------------------
        let mut tx = self.db.begin().await?;

        let inserted = SaleRepository::insert_sale(&mut tx, &sale).await;
        if let Err(e) = inserted {
            if !e.is_unique_violation_on("sales.local_id") {
                return Err(e.into());
            }
            drop(tx);
            // A concurrent upload of the same offline sale won.
            let local_id = sale.local_id.as_deref().unwrap_or_default();
            let existing = self
                .db
                .sales()
                .get_by_local_id(local_id)
                .await?
                .ok_or_else(|| EngineError::internal("Duplicate local_id without a sale"))?;
            return self.replayed(existing).await;
        }

        for (item, allow_negative) in &lines {
            SaleRepository::insert_item(&mut tx, item).await?;
            decrement_stock(&mut tx, &sale, item, *allow_negative, &actor.user_id).await?;
        }

        for payment in &payments {
            SaleRepository::insert_payment(&mut tx, payment).await?;
        }

        if let Some(customer) = &customer {
            record_customer_effects(&mut tx, &sale, &customer.id, &actor.user_id).await?;
        }

        if self.config.fiscal.enabled {
            InvoiceJobRepository::enqueue(&mut tx, &sale.id, request.invoice_type, now).await?;
        }

        tx.commit().await?;

        info!(
            sale_id = %sale.id,
            session_id = %sale.session_id,
            total = %sale.total(),
            items = lines.len(),
            points_earned = sale.points_earned,
            "Sale created"
        );

        if self.config.fiscal.enabled {
            self.nudge_invoice_worker();
        }

        self.publish(SaleEvent::SaleCreated {
            sale_id: sale.id.clone(),
            branch_id: sale.branch_id.clone(),
            created_by: sale.created_by.clone(),
            customer_id: sale.customer_id.clone(),
            total: sale.total(),
            business_date: sale.business_date,
            at: now,
        })
        .await;

        Ok(CreatedSale {
            sale,
            items: lines.into_iter().map(|(item, _)| item).collect(),
            payments,
            change,
            replayed: false,
        })
    }

    async fn replayed(&self, sale: Sale) -> EngineResult<CreatedSale> {
        let items = self.db.sales().get_items(&sale.id).await?;
        let payments = self.db.sales().get_payments(&sale.id).await?;
        let tendered: Money = payments.iter().map(|p| p.amount()).sum();

        Ok(CreatedSale {
            change: (tendered - sale.total()).floor_zero(),
            sale,
            items,
            payments,
            replayed: true,
        })
    }

    // =========================================================================
    // Loaders
    // =========================================================================

    async fn load_open_session(&self, session_id: &str) -> EngineResult<RegisterSession> {
        self.db
            .sessions()
            .get_by_id(session_id)
            .await?
            .filter(RegisterSession::is_open)
            .ok_or_else(|| {
                EngineError::new(
                    ErrorCode::SessionNotOpen,
                    format!("Register session is not open: {}", session_id),
                )
            })
    }

    async fn load_products(
        &self,
        items: &[SaleLineRequest],
    ) -> EngineResult<HashMap<String, Product>> {
        let mut ids: Vec<&str> = items.iter().map(|l| l.product_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();

        let products: HashMap<String, Product> = self
            .db
            .catalog()
            .get_products(&ids)
            .await?
            .into_iter()
            .filter(|p| p.is_active)
            .map(|p| (p.id.clone(), p))
            .collect();

        if let Some(missing) = ids.iter().find(|id| !products.contains_key(**id)) {
            return Err(EngineError::not_found("Product", missing));
        }

        Ok(products)
    }

    async fn load_payment_methods(&self, tenders: &[Tender]) -> EngineResult<Vec<PaymentMethod>> {
        let mut ids: Vec<&str> = tenders.iter().map(|t| t.payment_method_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();

        Ok(self.db.catalog().get_payment_methods(&ids).await?)
    }

    async fn load_customer(&self, customer_id: Option<&str>) -> EngineResult<Option<Customer>> {
        let Some(id) = customer_id else {
            return Ok(None);
        };

        match self.db.customers().get_by_id(id).await? {
            Some(customer) if customer.is_active => Ok(Some(customer)),
            _ => Err(EngineError::not_found("Customer", id)),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn validate_request(request: &CreateSaleRequest) -> EngineResult<()> {
    validate_id("session_id", &request.session_id)?;

    if request.items.is_empty() {
        return Err(ValidationError::Required {
            field: "items".to_string(),
        }
        .into());
    }

    for line in &request.items {
        validate_id("product_id", &line.product_id)?;
        validate_quantity(line.quantity)?;
        validate_percent_bps("discount_bps", line.discount_bps)?;
        if let Some(price) = line.unit_price {
            validate_price_cents(price.cents())?;
        }
    }

    for tender in &request.payments {
        if let Some(digits) = tender.card_last_four.as_deref() {
            validate_card_last_four(digits)?;
        }
    }

    if let Some(id) = request.customer_id.as_deref() {
        validate_id("customer_id", id)?;
    }
    if let Some(id) = request.seller_id.as_deref() {
        validate_id("seller_id", id)?;
    }
    if let Some(local_id) = request.local_id.as_deref() {
        validate_local_id(local_id)?;
    }
    validate_points_redeemed(request.points_redeemed)?;
    validate_amount("credit_used", request.credit_used)?;
    validate_amount("change_as_credit", request.change_as_credit)?;

    let needs_customer = request.points_redeemed != 0
        || !request.credit_used.is_zero()
        || !request.change_as_credit.is_zero();
    if needs_customer && request.customer_id.is_none() {
        return Err(EngineError::validation(
            "customer_id is required to redeem points, spend store credit or keep change as credit",
        ));
    }

    Ok(())
}

fn product_for<'a>(products: &'a HashMap<String, Product>, id: &str) -> EngineResult<&'a Product> {
    products
        .get(id)
        .ok_or_else(|| EngineError::not_found("Product", id))
}

/// Early, friendlier rejection; the ledgers re-check atomically.
fn check_customer_balances(customer: &Customer, request: &CreateSaleRequest) -> EngineResult<()> {
    if request.points_redeemed > customer.loyalty_points {
        return Err(CoreError::InsufficientPoints {
            available: customer.loyalty_points,
            requested: request.points_redeemed,
        }
        .into());
    }

    if request.credit_used > customer.credit_balance() {
        return Err(CoreError::InsufficientCredit {
            available: customer.credit_balance(),
            requested: request.credit_used,
        }
        .into());
    }

    Ok(())
}

async fn decrement_stock(
    conn: &mut SqliteConnection,
    sale: &Sale,
    item: &SaleItem,
    allow_negative: bool,
    created_by: &str,
) -> EngineResult<()> {
    let change = StockChange {
        branch_id: &sale.branch_id,
        product_id: &item.product_id,
        movement_type: StockMovementType::Sale,
        quantity: -item.quantity,
        allow_negative,
        reference_type: Some(SALE_REFERENCE),
        reference_id: Some(&sale.id),
        note: None,
        created_by,
        at: sale.created_at,
    };

    if StockLedger::apply(&mut *conn, &change).await?.is_none() {
        let available = StockLedger::quantity_in(&mut *conn, &sale.branch_id, &item.product_id).await?;
        return Err(CoreError::InsufficientStock {
            sku: item.sku_snapshot.clone(),
            available,
            requested: item.quantity,
        }
        .into());
    }

    Ok(())
}

/// REDEEM, EARN, DEBIT and CREDIT entries of a sale with a customer.
async fn record_customer_effects(
    conn: &mut SqliteConnection,
    sale: &Sale,
    customer_id: &str,
    created_by: &str,
) -> EngineResult<()> {
    let at = sale.created_at;

    if sale.points_redeemed > 0 {
        let redeem = PointsChange {
            customer_id,
            kind: LoyaltyTransactionType::Redeem,
            points: -sale.points_redeemed,
            sale_id: Some(&sale.id),
            description: Some("Points redeemed on sale"),
            created_by,
            allow_negative: false,
            at,
        };
        if LoyaltyLedger::record(&mut *conn, &redeem).await?.is_none() {
            let available = LoyaltyLedger::balance_in(&mut *conn, customer_id)
                .await?
                .unwrap_or(0);
            return Err(CoreError::InsufficientPoints {
                available,
                requested: sale.points_redeemed,
            }
            .into());
        }
    }

    if sale.points_earned > 0 {
        let earn = PointsChange {
            customer_id,
            kind: LoyaltyTransactionType::Earn,
            points: sale.points_earned,
            sale_id: Some(&sale.id),
            description: Some("Points earned on sale"),
            created_by,
            allow_negative: true,
            at,
        };
        LoyaltyLedger::record(&mut *conn, &earn)
            .await?
            .ok_or_else(|| EngineError::not_found("Customer", customer_id))?;
    }

    if sale.credit_used().is_positive() {
        let debit = CreditChange {
            customer_id,
            kind: CreditTransactionType::Debit,
            amount: -sale.credit_used(),
            sale_id: Some(&sale.id),
            description: Some("Store credit spent on sale"),
            created_by,
            allow_negative: false,
            at,
        };
        if CreditLedger::record(&mut *conn, &debit).await?.is_none() {
            let available = CreditLedger::balance_in(&mut *conn, customer_id)
                .await?
                .unwrap_or_default();
            return Err(CoreError::InsufficientCredit {
                available,
                requested: sale.credit_used(),
            }
            .into());
        }
    }

    if sale.change_as_credit().is_positive() {
        let credit = CreditChange {
            customer_id,
            kind: CreditTransactionType::Credit,
            amount: sale.change_as_credit(),
            sale_id: Some(&sale.id),
            description: Some("Change kept as store credit"),
            created_by,
            allow_negative: true,
            at,
        };
        CreditLedger::record(&mut *conn, &credit)
            .await?
            .ok_or_else(|| EngineError::not_found("Customer", customer_id))?;
    }

    debug!(sale_id = %sale.id, customer_id = %customer_id, "Customer ledgers updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateSaleRequest {
        CreateSaleRequest {
            session_id: new_id(),
            items: vec![SaleLineRequest {
                product_id: new_id(),
                quantity: 1,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_basket_is_rejected() {
        let mut req = request();
        req.items.clear();
        let err = validate_request(&req).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[test]
    fn test_customer_values_need_a_customer() {
        let mut req = request();
        req.points_redeemed = 5;
        let err = validate_request(&req).unwrap_err();
        assert!(err.message.contains("customer_id"));

        let mut req = request();
        req.change_as_credit = Money::from_cents(100);
        assert!(validate_request(&req).is_err());

        let mut req = request();
        req.credit_used = Money::from_cents(100);
        req.customer_id = Some(new_id());
        assert!(validate_request(&req).is_ok());
    }

    #[test]
    fn test_zero_quantity_is_rejected() {
        let mut req = request();
        req.items[0].quantity = 0;
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn test_oversized_amounts_are_rejected() {
        let mut req = request();
        req.items[0].unit_price = Some(Money::from_cents(i64::MAX / 2 + 1));
        let err = validate_request(&req).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);

        let mut req = request();
        req.customer_id = Some(new_id());
        req.points_redeemed = i64::MAX / 10;
        let err = validate_request(&req).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert!(err.message.contains("points_redeemed"));

        let mut req = request();
        req.customer_id = Some(new_id());
        req.credit_used = Money::from_cents(i64::MAX);
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let json = r#"{
            "session_id": "5b1f8c1e-7a51-4c43-9d43-1c1f7d4f9a10",
            "items": [{ "product_id": "0d7e1a0c-49c1-4c1e-8d0e-3d2f0a9b8c71", "quantity": 2 }],
            "payments": [{ "payment_method_id": "m1", "amount": 20000 }],
            "discount": { "type": "PERCENT", "value": 1000 }
        }"#;
        let req: CreateSaleRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.items[0].unit_price, None);
        assert_eq!(req.discount, Some(SaleDiscount::Percent(1000)));
        assert_eq!(req.points_redeemed, 0);
        assert!(req.credit_used.is_zero());
        assert!(validate_request(&req).is_ok());
    }
}
