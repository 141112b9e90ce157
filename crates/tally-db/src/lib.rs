//! # tally-db: Database Layer for the Tally sale engine
//!
//! SQLite storage for sales and the ledgers a sale touches.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sale Engine Data Flow                            │
//! │                                                                         │
//! │  tally-engine (create_sale / void_sale / InvoiceTrigger)               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tally-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ SaleRepo      │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ StockLedger   │    │ 001..004.sql │  │   │
//! │  │   │ begin() → Tx  │    │ LoyaltyLedger │    │              │  │   │
//! │  │   │               │    │ CreditLedger  │    │              │  │   │
//! │  │   │               │    │ InvoiceRepo   │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Kinds of Repository Method
//!
//! - `&self` methods run on the pool and are used for reads and for writes
//!   that stand alone (invoice status updates, job bookkeeping).
//! - Associated functions taking `&mut SqliteConnection` run inside a caller's
//!   transaction. Every write belonging to a sale or a void goes through these,
//!   so the caller's single commit (or rollback) covers all of them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_db::{Database, DbConfig, SaleRepository};
//!
//! let db = Database::new(DbConfig::new("./tally.db")).await?;
//! let mut tx = db.begin().await?;
//! SaleRepository::insert_sale(&mut tx, &sale).await?;
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::catalog::CatalogRepository;
pub use repository::credit::{CreditChange, CreditLedger};
pub use repository::customer::CustomerRepository;
pub use repository::invoice::{InvoiceRepository, NewInvoice};
pub use repository::invoice_job::InvoiceJobRepository;
pub use repository::loyalty::{LoyaltyLedger, PointsChange};
pub use repository::sale::{SaleRepository, VoidStamp};
pub use repository::session::SessionRepository;
pub use repository::staff::{PinHolder, StaffRepository};
pub use repository::stock::{StockChange, StockLedger};
