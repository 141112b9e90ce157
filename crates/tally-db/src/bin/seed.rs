//! # Seed Data Generator
//!
//! Populates a database with the reference data the sale engine reads, so
//! sales can be rung up and voided during development.
//!
//! ## Usage
//! ```bash
//! cargo run -p tally-db --bin seed
//!
//! # Specify database path and the manager PIN
//! cargo run -p tally-db --bin seed -- --db ./data/tally.db --pin 2468
//! ```
//!
//! ## Generated Data
//! - One branch (registered taxpayer, point of sale 1)
//! - Roles: Cashier (no capabilities), Manager (VOID_SALE | RETRY_INVOICE)
//! - Users: one cashier, one manager holding the manager PIN
//! - Payment methods: CASH, CARD (card requires a reference)
//! - Products with opening stock (ADJUSTMENT movements)
//! - Customers: a final consumer and a registered taxpayer
//! - An open session on register `REG-01`

use chrono::Utc;
use std::env;
use tally_core::{
    Branch, Capabilities, Capability, PaymentMethod, Product, StockMovementType, TaxCondition,
};
use tally_db::repository::new_id;
use tally_db::{Database, DbConfig, StockChange, StockLedger};

/// (sku, name, price cents, cost cents, tax bps, tax included, opening stock)
const PRODUCTS: &[(&str, &str, i64, i64, u32, bool, i64)] = &[
    ("YERBA-1KG", "Yerba Mate 1kg", 10000, 6200, 2100, true, 40),
    ("COFFEE-500", "Coffee Beans 500g", 5000, 3100, 2100, false, 25),
    ("MILK-1L", "Whole Milk 1L", 1200, 800, 1050, true, 60),
    ("BREAD-LOAF", "Sourdough Loaf", 2500, 1100, 1050, true, 15),
    ("WATER-2L", "Mineral Water 2L", 900, 400, 2100, true, 120),
    ("GIFT-WRAP", "Gift Wrapping", 500, 0, 0, true, 0),
];

const REGISTER_ID: &str = "REG-01";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./tally_dev.db");
    let mut pin = String::from("1234");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--pin" | "-p" => {
                if i + 1 < args.len() {
                    pin = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tally POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./tally_dev.db)");
                println!("  -p, --pin <PIN>    Manager PIN to set (default: 1234)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Tally POS Seed Data Generator");
    println!("================================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.catalog().count_products().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let now = Utc::now();

    // Branch
    let branch = Branch {
        id: new_id(),
        name: "Main Street".to_string(),
        point_of_sale: 1,
        tax_condition: TaxCondition::RegisteredTaxpayer,
        tax_id: Some("30-71234567-9".to_string()),
        is_active: true,
        created_at: now,
    };
    db.catalog().insert_branch(&branch).await?;
    println!("✓ Branch: {} ({})", branch.name, branch.id);

    // Roles & users
    let staff = db.staff();
    let cashier_role = staff.insert_role("Cashier", Capabilities::NONE).await?;
    let manager_role = staff
        .insert_role("Manager", Capability::VoidSale | Capability::RetryInvoice)
        .await?;

    let cashier = staff
        .insert_user(Some(&branch.id), &cashier_role.id, "Carla Cashier", now)
        .await?;
    let manager = staff
        .insert_user(Some(&branch.id), &manager_role.id, "Martin Manager", now)
        .await?;
    staff.set_manager_pin(&manager.id, &pin).await?;
    println!("✓ Users: cashier {} / manager {} (PIN set)", cashier.id, manager.id);

    // Payment methods
    for (code, name, requires_reference) in [("CASH", "Cash", false), ("CARD", "Card", true)] {
        let method = PaymentMethod {
            id: new_id(),
            code: code.to_string(),
            name: name.to_string(),
            requires_reference,
            is_active: true,
        };
        db.catalog().insert_payment_method(&method).await?;
        println!("✓ Payment method {}: {}", code, method.id);
    }

    // Products with opening stock
    println!();
    println!("Generating products...");
    let mut products = Vec::with_capacity(PRODUCTS.len());
    for (sku, name, price, cost, tax_bps, included, stock) in PRODUCTS.iter().copied() {
        products.push((
            Product {
                id: new_id(),
                sku: sku.to_string(),
                name: name.to_string(),
                price_cents: price,
                cost_price_cents: cost,
                tax_rate_bps: tax_bps,
                is_tax_included: included,
                allow_negative_stock: stock == 0,
                is_active: true,
                created_at: now,
                updated_at: now,
            },
            stock,
        ));
    }
    for (product, _) in &products {
        db.catalog().insert_product(product).await?;
    }

    let mut tx = db.begin().await?;
    for (product, stock) in &products {
        if *stock == 0 {
            continue;
        }
        let change = StockChange {
            branch_id: &branch.id,
            product_id: &product.id,
            movement_type: StockMovementType::Adjustment,
            quantity: *stock,
            allow_negative: false,
            reference_type: None,
            reference_id: None,
            note: Some("Opening stock"),
            created_by: &manager.id,
            at: now,
        };
        StockLedger::apply(&mut tx, &change).await?;
        println!("  {} × {} ({})", stock, product.name, product.sku);
    }
    tx.commit().await?;

    // Customers
    let walk_in = db
        .customers()
        .insert("Walk-in Loyalty Member", TaxCondition::FinalConsumer, None, now)
        .await?;
    let company = db
        .customers()
        .insert(
            "Acme SA",
            TaxCondition::RegisteredTaxpayer,
            Some("30-70000001-5"),
            now,
        )
        .await?;
    println!();
    println!("✓ Customers: {} / {}", walk_in.id, company.id);

    // Session
    let session = db
        .sessions()
        .open(&branch.id, REGISTER_ID, &cashier.id, now.date_naive(), now)
        .await?;
    println!("✓ Session {} open on {}", session.id, REGISTER_ID);

    println!();
    println!("✓ Seed complete!");

    Ok(())
}
