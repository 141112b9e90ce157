//! # Sale Repository
//!
//! Database operations for sales, sale items and sale payments.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. CREATE (inside the sale transaction)                               │
//! │     └── insert_sale()    → Sale { status: COMPLETED }                  │
//! │     └── insert_item()    × n                                           │
//! │     └── insert_payment() × m                                           │
//! │                                                                         │
//! │  2. (OPTIONAL) VOID (inside the void transaction)                      │
//! │     └── mark_voided()    → Sale { status: VOIDED }                     │
//! │         only matches while status is still COMPLETED                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use tally_core::{Sale, SaleItem, SalePayment, SaleStatus, VoidAuthorization};

const SALE_COLUMNS: &str = r#"
    id, branch_id, register_id, session_id, customer_id, seller_id, created_by,
    status, business_date,
    subtotal_cents, discount_cents, tax_cents, total_cents,
    points_redeemed, points_redemption_value_cents, points_earned,
    credit_used_cents, change_as_credit_cents,
    voided_by, voided_at, void_reason, void_approved_by, void_authorization,
    local_id, client_created_at, created_at, updated_at
"#;

const ITEM_COLUMNS: &str = r#"
    id, sale_id, product_id, sku_snapshot, name_snapshot, quantity,
    unit_price_cents, discount_bps, discount_cents, tax_rate_bps, tax_included,
    tax_cents, cost_price_cents, line_total_cents, created_at
"#;

const PAYMENT_COLUMNS: &str = r#"
    id, sale_id, payment_method_id, method_code, amount_cents, reference,
    card_last_four, authorization_code, created_at
"#;

/// Void metadata stamped on a sale.
#[derive(Debug, Clone)]
pub struct VoidStamp<'a> {
    pub voided_by: &'a str,
    pub voided_at: DateTime<Utc>,
    pub reason: &'a str,
    pub approved_by: Option<&'a str>,
    pub authorization: VoidAuthorization,
}

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets a sale by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1");
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sale)
    }

    /// Gets a sale by its offline client id.
    pub async fn get_by_local_id(&self, local_id: &str) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE local_id = ?1");
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sale)
    }

    /// Gets all items for a sale, in insertion order.
    pub async fn get_items(&self, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM sale_items WHERE sale_id = ?1 ORDER BY rowid ASC"
        );
        let items = sqlx::query_as::<_, SaleItem>(&sql)
            .bind(sale_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(items)
    }

    /// Gets all payments for a sale, in insertion order.
    pub async fn get_payments(&self, sale_id: &str) -> DbResult<Vec<SalePayment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM sale_payments WHERE sale_id = ?1 ORDER BY rowid ASC"
        );
        let payments = sqlx::query_as::<_, SalePayment>(&sql)
            .bind(sale_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(payments)
    }

    /// Counts sales.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Writes (inside a caller's transaction)
    // =========================================================================

    /// Inserts a sale header.
    pub async fn insert_sale(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
        debug!(sale_id = %sale.id, total_cents = sale.total_cents, "Inserting sale");

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, branch_id, register_id, session_id, customer_id, seller_id, created_by,
                status, business_date,
                subtotal_cents, discount_cents, tax_cents, total_cents,
                points_redeemed, points_redemption_value_cents, points_earned,
                credit_used_cents, change_as_credit_cents,
                voided_by, voided_at, void_reason, void_approved_by, void_authorization,
                local_id, client_created_at, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9,
                ?10, ?11, ?12, ?13,
                ?14, ?15, ?16,
                ?17, ?18,
                ?19, ?20, ?21, ?22, ?23,
                ?24, ?25, ?26, ?27
            )
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.branch_id)
        .bind(&sale.register_id)
        .bind(&sale.session_id)
        .bind(&sale.customer_id)
        .bind(&sale.seller_id)
        .bind(&sale.created_by)
        .bind(sale.status)
        .bind(sale.business_date)
        .bind(sale.subtotal_cents)
        .bind(sale.discount_cents)
        .bind(sale.tax_cents)
        .bind(sale.total_cents)
        .bind(sale.points_redeemed)
        .bind(sale.points_redemption_value_cents)
        .bind(sale.points_earned)
        .bind(sale.credit_used_cents)
        .bind(sale.change_as_credit_cents)
        .bind(&sale.voided_by)
        .bind(sale.voided_at)
        .bind(&sale.void_reason)
        .bind(&sale.void_approved_by)
        .bind(sale.void_authorization)
        .bind(&sale.local_id)
        .bind(sale.client_created_at)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Inserts one sale item.
    pub async fn insert_item(conn: &mut SqliteConnection, item: &SaleItem) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sale_items (
                id, sale_id, product_id, sku_snapshot, name_snapshot, quantity,
                unit_price_cents, discount_bps, discount_cents, tax_rate_bps, tax_included,
                tax_cents, cost_price_cents, line_total_cents, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&item.id)
        .bind(&item.sale_id)
        .bind(&item.product_id)
        .bind(&item.sku_snapshot)
        .bind(&item.name_snapshot)
        .bind(item.quantity)
        .bind(item.unit_price_cents)
        .bind(item.discount_bps)
        .bind(item.discount_cents)
        .bind(item.tax_rate_bps)
        .bind(item.tax_included)
        .bind(item.tax_cents)
        .bind(item.cost_price_cents)
        .bind(item.line_total_cents)
        .bind(item.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Inserts one payment.
    pub async fn insert_payment(conn: &mut SqliteConnection, payment: &SalePayment) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sale_payments (
                id, sale_id, payment_method_id, method_code, amount_cents, reference,
                card_last_four, authorization_code, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.sale_id)
        .bind(&payment.payment_method_id)
        .bind(&payment.method_code)
        .bind(payment.amount_cents)
        .bind(&payment.reference)
        .bind(&payment.card_last_four)
        .bind(&payment.authorization_code)
        .bind(payment.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Flips a COMPLETED sale to VOIDED and stamps the void metadata.
    ///
    /// ## Returns
    /// `false` when the sale was no longer COMPLETED (a concurrent void won),
    /// in which case nothing changed.
    pub async fn mark_voided(
        conn: &mut SqliteConnection,
        sale_id: &str,
        stamp: &VoidStamp<'_>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sales SET
                status = ?2,
                voided_by = ?3,
                voided_at = ?4,
                void_reason = ?5,
                void_approved_by = ?6,
                void_authorization = ?7,
                updated_at = ?4
            WHERE id = ?1 AND status = ?8
            "#,
        )
        .bind(sale_id)
        .bind(SaleStatus::Voided)
        .bind(stamp.voided_by)
        .bind(stamp.voided_at)
        .bind(stamp.reason)
        .bind(stamp.approved_by)
        .bind(stamp.authorization)
        .bind(SaleStatus::Completed)
        .execute(&mut *conn)
        .await?;

        debug!(
            sale_id = %sale_id,
            flipped = result.rows_affected() == 1,
            "Marked sale voided"
        );

        Ok(result.rows_affected() == 1)
    }
}
