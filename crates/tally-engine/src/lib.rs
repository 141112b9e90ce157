//! # tally-engine: Sale Transaction & Voiding Engine
//!
//! Turns a basket and its tenders into one atomic commit across the stock,
//! loyalty and store-credit ledgers, reverses that commit on void, and
//! invoices sales out-of-band through the fiscal authority.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Engine                                         │
//! │                                                                         │
//! │  create_sale(actor, request)                                           │
//! │     validate ─► session ─► price ─► tenders ─► ┌──────── one tx ──────┐ │
//! │                                                │ sale, items, payments│ │
//! │                                                │ stock  SALE          │ │
//! │                                                │ points REDEEM / EARN │ │
//! │                                                │ credit DEBIT / CREDIT│ │
//! │                                                │ invoice_jobs row     │ │
//! │                                                └──────────┬───────────┘ │
//! │                               nudge worker, SaleCreated ◄─┘             │
//! │                                                                         │
//! │  void_sale(actor, request)                                             │
//! │     guards ─► authorize_void ─► ┌──────── one tx ──────────────────┐   │
//! │                                 │ COMPLETED → VOIDED               │   │
//! │                                 │ stock RETURN, points ADJUST      │   │
//! │                                 │ invoice CANCELLED, job FAILED    │   │
//! │                                 └──────────┬───────────────────────┘   │
//! │                                SaleVoided ◄┘                            │
//! │                                                                         │
//! │  InvoiceWorker ── polls invoice_jobs ──► InvoiceTrigger ──► FiscalClient│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - TOML/env configuration
//! - [`error`] - [`EngineError`] and its [`ErrorCode`]s
//! - [`sale`] - Sale creation
//! - [`void`] - Void workflow and authorization
//! - [`invoice`] - Idempotent invoice trigger and manual retry
//! - [`worker`] - Background invoice worker
//! - [`receipt`] - Read-only receipt projection
//! - [`events`] - Domain events and publishers
//! - [`fiscal`] - Fiscal client and rules seams
//! - [`clock`] - Injectable time source
//! - [`telemetry`] - Tracing subscriber setup

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod fiscal;
pub mod invoice;
pub mod receipt;
pub mod sale;
pub mod telemetry;
pub mod void;
pub mod worker;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, ErrorCode};
pub use events::{BroadcastPublisher, EventPublisher, NoopPublisher, SaleEvent};
pub use fiscal::{
    FiscalClearance, FiscalClient, FiscalInvoiceRequest, FiscalRejection, FiscalRules,
    StandardFiscalRules,
};
pub use invoice::{InvoiceTrigger, TriggerOutcome};
pub use receipt::Receipt;
pub use sale::{CreateSaleRequest, CreatedSale, SaleLineRequest};
pub use void::{VoidApproval, VoidSaleRequest, VoidedSale};
pub use worker::{InvoiceWorker, InvoiceWorkerHandle};

use chrono::NaiveDate;
use std::sync::Arc;
use tally_core::business_day::BusinessDayRule;
use tally_db::Database;
use tokio::sync::Notify;
use tracing::{info, warn};

use fiscal::UnconfiguredFiscalClient;

/// The sale engine.
///
/// Cheap to clone; clones share the database pool, collaborators and the
/// invoice worker's wake-up signal.
#[derive(Clone)]
pub struct Engine {
    pub(crate) db: Database,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) business_day: BusinessDayRule,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) publisher: Arc<dyn EventPublisher>,
    pub(crate) invoices: InvoiceTrigger,
    pub(crate) worker_wake: Arc<Notify>,
}

impl Engine {
    pub fn builder(db: Database) -> EngineBuilder {
        EngineBuilder::new(db)
    }

    /// Opens the configured database and builds an engine with the default
    /// collaborators (system clock, no event sink, unconfigured fiscal client).
    pub async fn open(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let db = Database::new(config.database.db_config()).await?;
        Engine::builder(db).config(config).build()
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The current business date.
    pub fn business_date_now(&self) -> NaiveDate {
        self.business_day.business_date(self.clock.now())
    }

    pub fn invoice_trigger(&self) -> &InvoiceTrigger {
        &self.invoices
    }

    /// Builds the invoice worker without starting it.
    pub fn invoice_worker(&self) -> (InvoiceWorker, InvoiceWorkerHandle) {
        InvoiceWorker::new(
            self.invoices.clone(),
            self.db.clone(),
            Arc::clone(&self.clock),
            self.config.fiscal.clone(),
            Arc::clone(&self.worker_wake),
        )
    }

    /// Starts the invoice worker on the current tokio runtime.
    pub fn spawn_invoice_worker(&self) -> InvoiceWorkerHandle {
        let (worker, handle) = self.invoice_worker();
        tokio::spawn(worker.run());
        info!("Invoice worker spawned");
        handle
    }

    pub(crate) fn nudge_invoice_worker(&self) {
        self.worker_wake.notify_one();
    }

    /// Publishes an event on each of its channels. Failures are logged only.
    pub(crate) async fn publish(&self, event: SaleEvent) {
        for channel in event.channels() {
            if let Err(e) = self.publisher.publish(&channel, &event).await {
                warn!(?e, channel = %channel, event = event.name(), "Failed to publish event");
            }
        }
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    db: Database,
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    fiscal_client: Option<Arc<dyn FiscalClient>>,
    fiscal_rules: Option<Arc<dyn FiscalRules>>,
}

impl EngineBuilder {
    pub fn new(db: Database) -> Self {
        EngineBuilder {
            db,
            config: EngineConfig::default(),
            clock: None,
            publisher: None,
            fiscal_client: None,
            fiscal_rules: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn fiscal_client(mut self, client: Arc<dyn FiscalClient>) -> Self {
        self.fiscal_client = Some(client);
        self
    }

    pub fn fiscal_rules(mut self, rules: Arc<dyn FiscalRules>) -> Self {
        self.fiscal_rules = Some(rules);
        self
    }

    pub fn build(self) -> EngineResult<Engine> {
        self.config.validate()?;
        let business_day = self.config.business_day_rule()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let fiscal_client = self
            .fiscal_client
            .unwrap_or_else(|| Arc::new(UnconfiguredFiscalClient));
        let fiscal_rules = self
            .fiscal_rules
            .unwrap_or_else(|| Arc::new(StandardFiscalRules));

        let invoices = InvoiceTrigger::new(
            self.db.clone(),
            fiscal_client,
            fiscal_rules,
            Arc::clone(&clock),
        );

        Ok(Engine {
            db: self.db,
            config: Arc::new(self.config),
            business_day,
            clock,
            publisher: self.publisher.unwrap_or_else(|| Arc::new(NoopPublisher)),
            invoices,
            worker_wake: Arc::new(Notify::new()),
        })
    }
}
