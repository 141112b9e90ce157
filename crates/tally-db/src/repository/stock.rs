//! # Stock Ledger
//!
//! Branch stock balances and their append-only movement history.
//!
//! ## Mutate-and-Record
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  apply(change)                         (inside caller's transaction)    │
//! │                                                                         │
//! │  1. ensure branch_stock row exists (quantity 0)                         │
//! │                                                                         │
//! │  2. UPDATE branch_stock                                                 │
//! │        SET quantity = quantity + Δ                                      │
//! │      WHERE branch/product                                               │
//! │        AND (allow_negative OR quantity + Δ >= 0)                        │
//! │      RETURNING quantity                  ← atomic, no lost update       │
//! │           │                                                             │
//! │           ├── no row → refused (None), nothing written                  │
//! │           ▼                                                             │
//! │  3. INSERT stock_movements (before = after − Δ, after)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use super::new_id;
use crate::error::DbResult;
use tally_core::{StockMovement, StockMovementType};

const MOVEMENT_COLUMNS: &str = r#"
    id, branch_id, product_id, movement_type, quantity, quantity_before,
    quantity_after, reference_type, reference_id, note, created_by, created_at
"#;

/// A requested change to one branch/product balance.
#[derive(Debug, Clone)]
pub struct StockChange<'a> {
    pub branch_id: &'a str,
    pub product_id: &'a str,
    pub movement_type: StockMovementType,
    /// Signed delta.
    pub quantity: i64,
    /// Let the balance go below zero.
    pub allow_negative: bool,
    pub reference_type: Option<&'a str>,
    pub reference_id: Option<&'a str>,
    pub note: Option<&'a str>,
    pub created_by: &'a str,
    pub at: DateTime<Utc>,
}

/// Repository for branch stock and stock movements.
#[derive(Debug, Clone)]
pub struct StockLedger {
    pool: SqlitePool,
}

impl StockLedger {
    pub fn new(pool: SqlitePool) -> Self {
        StockLedger { pool }
    }

    /// Applies a balance change and records the movement.
    ///
    /// ## Returns
    /// - `Some(movement)` when applied
    /// - `None` when the decrement would take a non-negative product below
    ///   zero; nothing is written in that case
    pub async fn apply(
        conn: &mut SqliteConnection,
        change: &StockChange<'_>,
    ) -> DbResult<Option<StockMovement>> {
        sqlx::query(
            r#"
            INSERT INTO branch_stock (branch_id, product_id, quantity, updated_at)
            VALUES (?1, ?2, 0, ?3)
            ON CONFLICT (branch_id, product_id) DO NOTHING
            "#,
        )
        .bind(change.branch_id)
        .bind(change.product_id)
        .bind(change.at)
        .execute(&mut *conn)
        .await?;

        let after: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE branch_stock SET
                quantity = quantity + ?3,
                updated_at = ?4
            WHERE branch_id = ?1 AND product_id = ?2
              AND (?5 OR quantity + ?3 >= 0)
            RETURNING quantity
            "#,
        )
        .bind(change.branch_id)
        .bind(change.product_id)
        .bind(change.quantity)
        .bind(change.at)
        .bind(change.allow_negative)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(after) = after else {
            debug!(
                branch_id = %change.branch_id,
                product_id = %change.product_id,
                delta = change.quantity,
                "Stock change refused"
            );
            return Ok(None);
        };

        let movement = StockMovement {
            id: new_id(),
            branch_id: change.branch_id.to_string(),
            product_id: change.product_id.to_string(),
            movement_type: change.movement_type,
            quantity: change.quantity,
            quantity_before: after - change.quantity,
            quantity_after: after,
            reference_type: change.reference_type.map(str::to_string),
            reference_id: change.reference_id.map(str::to_string),
            note: change.note.map(str::to_string),
            created_by: change.created_by.to_string(),
            created_at: change.at,
        };

        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, branch_id, product_id, movement_type, quantity, quantity_before,
                quantity_after, reference_type, reference_id, note, created_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&movement.id)
        .bind(&movement.branch_id)
        .bind(&movement.product_id)
        .bind(movement.movement_type)
        .bind(movement.quantity)
        .bind(movement.quantity_before)
        .bind(movement.quantity_after)
        .bind(&movement.reference_type)
        .bind(&movement.reference_id)
        .bind(&movement.note)
        .bind(&movement.created_by)
        .bind(movement.created_at)
        .execute(&mut *conn)
        .await?;

        debug!(
            product_id = %movement.product_id,
            before = movement.quantity_before,
            after = movement.quantity_after,
            "Stock movement recorded"
        );

        Ok(Some(movement))
    }

    /// Current balance, read inside a transaction. Zero when never stocked.
    pub async fn quantity_in(
        conn: &mut SqliteConnection,
        branch_id: &str,
        product_id: &str,
    ) -> DbResult<i64> {
        let qty: Option<i64> = sqlx::query_scalar(
            "SELECT quantity FROM branch_stock WHERE branch_id = ?1 AND product_id = ?2",
        )
        .bind(branch_id)
        .bind(product_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(qty.unwrap_or(0))
    }

    /// Current balance. Zero when never stocked.
    pub async fn quantity(&self, branch_id: &str, product_id: &str) -> DbResult<i64> {
        let qty: Option<i64> = sqlx::query_scalar(
            "SELECT quantity FROM branch_stock WHERE branch_id = ?1 AND product_id = ?2",
        )
        .bind(branch_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(qty.unwrap_or(0))
    }

    /// Movement history of one branch/product, oldest first.
    pub async fn movements(&self, branch_id: &str, product_id: &str) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE branch_id = ?1 AND product_id = ?2 ORDER BY rowid ASC"
        );
        let rows = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(branch_id)
            .bind(product_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Movements caused by one document (a sale or a void).
    pub async fn movements_for_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE reference_type = ?1 AND reference_id = ?2 ORDER BY rowid ASC"
        );
        let rows = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(reference_type)
            .bind(reference_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Sum of all movements of one branch/product. Equals [`Self::quantity`].
    pub async fn movement_sum(&self, branch_id: &str, product_id: &str) -> DbResult<i64> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(quantity), 0) FROM stock_movements \
             WHERE branch_id = ?1 AND product_id = ?2",
        )
        .bind(branch_id)
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    async fn setup() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO branches (id, name, point_of_sale, tax_condition, created_at) \
             VALUES ('b1', 'Main', 1, 'MONOTRIBUTO', ?1)",
        )
        .bind(now)
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO products (id, sku, name, price_cents, created_at, updated_at) \
             VALUES ('p1', 'SKU-1', 'Widget', 1000, ?1, ?1)",
        )
        .bind(now)
        .execute(db.pool())
        .await
        .unwrap();
        db
    }

    fn change(quantity: i64, allow_negative: bool) -> StockChange<'static> {
        StockChange {
            branch_id: "b1",
            product_id: "p1",
            movement_type: if quantity < 0 {
                StockMovementType::Sale
            } else {
                StockMovementType::Adjustment
            },
            quantity,
            allow_negative,
            reference_type: None,
            reference_id: None,
            note: None,
            created_by: "u1",
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_apply_records_before_and_after() {
        let db = setup().await;

        let mut tx = db.begin().await.unwrap();
        StockLedger::apply(&mut tx, &change(10, false)).await.unwrap().unwrap();
        let movement = StockLedger::apply(&mut tx, &change(-3, false))
            .await
            .unwrap()
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(movement.quantity_before, 10);
        assert_eq!(movement.quantity_after, 7);
        assert_eq!(db.stock().quantity("b1", "p1").await.unwrap(), 7);
        assert_eq!(db.stock().movement_sum("b1", "p1").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_decrement_below_zero_is_refused() {
        let db = setup().await;

        let mut tx = db.begin().await.unwrap();
        StockLedger::apply(&mut tx, &change(2, false)).await.unwrap();
        let refused = StockLedger::apply(&mut tx, &change(-5, false)).await.unwrap();
        assert!(refused.is_none());
        assert_eq!(StockLedger::quantity_in(&mut tx, "b1", "p1").await.unwrap(), 2);

        let allowed = StockLedger::apply(&mut tx, &change(-5, true)).await.unwrap().unwrap();
        assert_eq!(allowed.quantity_after, -3);
        tx.commit().await.unwrap();

        assert_eq!(db.stock().movements("b1", "p1").await.unwrap().len(), 2);
    }
}
