//! # Repository Module
//!
//! Database repository implementations.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Engine service                                                         │
//! │       │                                                                 │
//! │       │  db.sales().get_by_id(id)          (pool read)                  │
//! │       │  SaleRepository::insert_sale(&mut tx, &sale)   (in a unit of    │
//! │       │  StockLedger::apply(&mut tx, &change)           work)           │
//! │       ▼                                                                 │
//! │  Repository ──► SQL ──► SQLite                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`sale::SaleRepository`] - Sale headers, items, payments, void stamp
//! - [`stock::StockLedger`] - Branch stock balances + movements
//! - [`loyalty::LoyaltyLedger`] - Customer points + loyalty transactions
//! - [`credit::CreditLedger`] - Customer store credit + credit transactions
//! - [`invoice::InvoiceRepository`] - Invoices and number sequences
//! - [`invoice_job::InvoiceJobRepository`] - Invoice worker queue
//! - [`session::SessionRepository`] - Register sessions
//! - [`catalog::CatalogRepository`] - Branches, products, payment methods
//! - [`customer::CustomerRepository`] - Customers
//! - [`staff::StaffRepository`] - Roles, users, manager PINs

pub mod catalog;
pub mod credit;
pub mod customer;
pub mod invoice;
pub mod invoice_job;
pub mod loyalty;
pub mod sale;
pub mod session;
pub mod staff;
pub mod stock;

/// Generates a new entity ID (UUID v4).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
