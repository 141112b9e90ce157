//! Shared fixture for the engine integration tests.
//!
//! Every test gets its own in-memory database seeded with one branch, a
//! cashier and a manager, CASH and CARD methods, three products with stock,
//! two customers and an open register session.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tally_core::pricing::SaleDiscount;
use tally_core::payment::Tender;
use tally_core::{
    Actor, Branch, Capabilities, Capability, CreditTransactionType, Customer,
    LoyaltyTransactionType, Money, PaymentMethod, Product, RegisterSession, StockMovementType,
    TaxCondition, VoidAuthorization,
};
use tally_db::repository::new_id;
use tally_db::{
    CreditChange, CreditLedger, Database, DbConfig, InvoiceRepository, LoyaltyLedger,
    PointsChange, SaleRepository, StockChange, StockLedger, VoidStamp,
};
use tally_engine::events::Envelope;
use tally_engine::{
    BroadcastPublisher, CreateSaleRequest, Engine, EngineConfig, FiscalClearance, FiscalClient,
    FiscalInvoiceRequest, FiscalRejection, FixedClock, SaleLineRequest,
};
use tokio::sync::broadcast;

pub const MANAGER_PIN: &str = "2468";
pub const COMPANY_TAX_ID: &str = "30-71234567-9";

pub const INCL_STOCK: i64 = 10;
pub const EXCL_STOCK: i64 = 5;
pub const SCARCE_STOCK: i64 = 1;

pub const MEMBER_POINTS: i64 = 500;
pub const MEMBER_CREDIT_CENTS: i64 = 10_000;

/// 2026-03-10 15:00 UTC; business date 2026-03-10 with the default cutoff.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap()
}

pub fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
}

// =============================================================================
// Fake fiscal client
// =============================================================================

/// Answers with scripted outcomes, then clears everything.
#[derive(Default)]
pub struct FakeFiscal {
    script: Mutex<VecDeque<Result<(), FiscalRejection>>>,
    requests: Mutex<Vec<FiscalInvoiceRequest>>,
    calls: AtomicUsize,
    void_in_flight: Mutex<Option<(Database, String)>>,
}

impl FakeFiscal {
    pub fn push_rejection(&self, rejection: FiscalRejection) {
        self.script.lock().unwrap().push_back(Err(rejection));
    }

    pub fn push_success(&self) {
        self.script.lock().unwrap().push_back(Ok(()));
    }

    /// The next call voids its sale and cancels its invoice before answering,
    /// as a void committed while the request was in flight would.
    pub fn void_during_next_call(&self, db: Database, voided_by: &str) {
        *self.void_in_flight.lock().unwrap() = Some((db, voided_by.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<FiscalInvoiceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FiscalClient for FakeFiscal {
    async fn create_invoice(
        &self,
        request: &FiscalInvoiceRequest,
    ) -> Result<FiscalClearance, FiscalRejection> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());

        let void = self.void_in_flight.lock().unwrap().take();
        if let Some((db, voided_by)) = void {
            let at = start_time();
            let stamp = VoidStamp {
                voided_by: &voided_by,
                voided_at: at,
                reason: "Voided while invoicing",
                approved_by: None,
                authorization: VoidAuthorization::Direct,
            };
            let mut tx = db.begin().await.unwrap();
            assert!(SaleRepository::mark_voided(&mut tx, &request.sale_id, &stamp)
                .await
                .unwrap());
            InvoiceRepository::cancel_for_sale(&mut tx, &request.sale_id, at)
                .await
                .unwrap()
                .unwrap();
            tx.commit().await.unwrap();
        }

        let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        next.map(|()| FiscalClearance {
            cae: format!("7400{:010}", n),
            cae_expiration: request.issue_date + Duration::days(10),
            invoice_number: request.invoice_number,
        })
    }
}

// =============================================================================
// Fixture
// =============================================================================

pub struct Fixture {
    pub engine: Engine,
    pub db: Database,
    pub clock: Arc<FixedClock>,
    pub fiscal: Arc<FakeFiscal>,
    pub events: broadcast::Receiver<Envelope>,
    pub branch: Branch,
    pub cashier: Actor,
    pub manager: Actor,
    pub cash: PaymentMethod,
    pub card: PaymentMethod,
    /// 100.00, 21% included.
    pub incl: Product,
    /// 50.00, 21% added on top.
    pub excl: Product,
    /// 10.00, no tax, one unit, never negative.
    pub scarce: Product,
    /// Final consumer with points and store credit.
    pub member: Customer,
    /// Registered taxpayer with a tax id.
    pub company: Customer,
    /// Registered taxpayer without a tax id.
    pub company_no_id: Customer,
    pub session: RegisterSession,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(EngineConfig::default()).await
    }

    pub async fn with_config(config: EngineConfig) -> Self {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = start_time();

        let branch = Branch {
            id: new_id(),
            name: "Test Branch".to_string(),
            point_of_sale: 3,
            tax_condition: TaxCondition::RegisteredTaxpayer,
            tax_id: Some("30-70000000-1".to_string()),
            is_active: true,
            created_at: now,
        };
        db.catalog().insert_branch(&branch).await.unwrap();

        let staff = db.staff();
        let cashier_role = staff.insert_role("Cashier", Capabilities::NONE).await.unwrap();
        let manager_caps = Capability::VoidSale | Capability::RetryInvoice;
        let manager_role = staff.insert_role("Manager", manager_caps).await.unwrap();
        let cashier_user = staff
            .insert_user(Some(&branch.id), &cashier_role.id, "Cashier", now)
            .await
            .unwrap();
        let manager_user = staff
            .insert_user(Some(&branch.id), &manager_role.id, "Manager", now)
            .await
            .unwrap();
        staff.set_manager_pin(&manager_user.id, MANAGER_PIN).await.unwrap();

        let cash = payment_method("CASH", false);
        let card = payment_method("CARD", true);
        db.catalog().insert_payment_method(&cash).await.unwrap();
        db.catalog().insert_payment_method(&card).await.unwrap();

        let incl = product("INCL-100", 10_000, 2100, true, false);
        let excl = product("EXCL-50", 5_000, 2100, false, false);
        let scarce = product("SCARCE-10", 1_000, 0, true, false);
        for p in [&incl, &excl, &scarce] {
            db.catalog().insert_product(p).await.unwrap();
        }

        let customers = db.customers();
        let member = customers
            .insert("Member", TaxCondition::FinalConsumer, None, now)
            .await
            .unwrap();
        let company = customers
            .insert("Company", TaxCondition::RegisteredTaxpayer, Some(COMPANY_TAX_ID), now)
            .await
            .unwrap();
        let company_no_id = customers
            .insert("Company Without Id", TaxCondition::RegisteredTaxpayer, None, now)
            .await
            .unwrap();

        let mut tx = db.begin().await.unwrap();
        for (p, qty) in [(&incl, INCL_STOCK), (&excl, EXCL_STOCK), (&scarce, SCARCE_STOCK)] {
            let change = StockChange {
                branch_id: &branch.id,
                product_id: &p.id,
                movement_type: StockMovementType::Adjustment,
                quantity: qty,
                allow_negative: false,
                reference_type: None,
                reference_id: None,
                note: Some("Opening stock"),
                created_by: &manager_user.id,
                at: now,
            };
            StockLedger::apply(&mut tx, &change).await.unwrap().unwrap();
        }
        let points = PointsChange {
            customer_id: &member.id,
            kind: LoyaltyTransactionType::Adjust,
            points: MEMBER_POINTS,
            sale_id: None,
            description: Some("Opening balance"),
            created_by: &manager_user.id,
            allow_negative: false,
            at: now,
        };
        LoyaltyLedger::record(&mut tx, &points).await.unwrap().unwrap();
        let credit = CreditChange {
            customer_id: &member.id,
            kind: CreditTransactionType::Adjust,
            amount: Money::from_cents(MEMBER_CREDIT_CENTS),
            sale_id: None,
            description: Some("Opening balance"),
            created_by: &manager_user.id,
            allow_negative: false,
            at: now,
        };
        CreditLedger::record(&mut tx, &credit).await.unwrap().unwrap();
        tx.commit().await.unwrap();

        let member = customers.get_by_id(&member.id).await.unwrap().unwrap();

        let session = db
            .sessions()
            .open(&branch.id, "REG-01", &cashier_user.id, start_date(), now)
            .await
            .unwrap();

        let clock = Arc::new(FixedClock::new(now));
        let fiscal = Arc::new(FakeFiscal::default());
        let publisher = Arc::new(BroadcastPublisher::new(64));
        let events = publisher.subscribe();

        let engine = Engine::builder(db.clone())
            .config(config)
            .clock(clock.clone())
            .publisher(publisher)
            .fiscal_client(fiscal.clone())
            .build()
            .unwrap();

        Fixture {
            engine,
            db,
            clock,
            fiscal,
            events,
            branch,
            cashier: Actor::new(cashier_user.id, Capabilities::NONE),
            manager: Actor::new(manager_user.id, manager_caps),
            cash,
            card,
            incl,
            excl,
            scarce,
            member,
            company,
            company_no_id,
            session,
        }
    }

    pub fn line(&self, product: &Product, quantity: i64) -> SaleLineRequest {
        SaleLineRequest {
            product_id: product.id.clone(),
            quantity,
            ..Default::default()
        }
    }

    pub fn cash(&self, cents: i64) -> Tender {
        Tender {
            payment_method_id: self.cash.id.clone(),
            amount: Money::from_cents(cents),
            reference: None,
            card_last_four: None,
            authorization_code: None,
        }
    }

    /// 2 × INCL-100 and 1 × EXCL-50 with 10% off, paid with `cash_cents`.
    /// Totals 225.00.
    pub fn scenario(&self, cash_cents: i64) -> CreateSaleRequest {
        CreateSaleRequest {
            session_id: self.session.id.clone(),
            items: vec![self.line(&self.incl, 2), self.line(&self.excl, 1)],
            payments: vec![self.cash(cash_cents)],
            discount: Some(SaleDiscount::Percent(1000)),
            ..Default::default()
        }
    }

    /// One INCL-100 paid exactly in cash.
    pub fn simple(&self) -> CreateSaleRequest {
        CreateSaleRequest {
            session_id: self.session.id.clone(),
            items: vec![self.line(&self.incl, 1)],
            payments: vec![self.cash(10_000)],
            ..Default::default()
        }
    }

    pub async fn stock(&self, product: &Product) -> i64 {
        self.db.stock().quantity(&self.branch.id, &product.id).await.unwrap()
    }

    pub async fn points(&self, customer: &Customer) -> i64 {
        self.db.loyalty().balance(&customer.id).await.unwrap().unwrap()
    }

    pub async fn credit(&self, customer: &Customer) -> Money {
        self.db.credit().balance(&customer.id).await.unwrap().unwrap()
    }

    /// Drains every event published so far.
    pub fn drain_events(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(envelope) = self.events.try_recv() {
            out.push(envelope);
        }
        out
    }
}

fn payment_method(code: &str, requires_reference: bool) -> PaymentMethod {
    PaymentMethod {
        id: new_id(),
        code: code.to_string(),
        name: code.to_string(),
        requires_reference,
        is_active: true,
    }
}

fn product(
    sku: &str,
    price_cents: i64,
    tax_rate_bps: u32,
    is_tax_included: bool,
    allow_negative_stock: bool,
) -> Product {
    let now = start_time();
    Product {
        id: new_id(),
        sku: sku.to_string(),
        name: sku.to_string(),
        price_cents,
        cost_price_cents: price_cents / 2,
        tax_rate_bps,
        is_tax_included,
        allow_negative_stock,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}
