//! # Loyalty Ledger
//!
//! Customer point balances (`customers.loyalty_points`) and the
//! `loyalty_transactions` rows that explain them.
//!
//! The balance moves by a signed delta with a single conditional UPDATE;
//! the ledger row carries the resulting balance so history can be audited
//! without replaying it.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use super::new_id;
use crate::error::DbResult;
use tally_core::{LoyaltyTransaction, LoyaltyTransactionType};

const TRANSACTION_COLUMNS: &str = r#"
    id, customer_id, transaction_type, points, balance_after,
    sale_id, description, created_by, created_at
"#;

/// A requested change to a customer's point balance.
#[derive(Debug, Clone)]
pub struct PointsChange<'a> {
    pub customer_id: &'a str,
    pub kind: LoyaltyTransactionType,
    /// Signed delta; negative for redemptions and reversals of earnings.
    pub points: i64,
    pub sale_id: Option<&'a str>,
    pub description: Option<&'a str>,
    pub created_by: &'a str,
    /// Let the balance go below zero (reversals of already-spent points).
    pub allow_negative: bool,
    pub at: DateTime<Utc>,
}

/// Repository for loyalty balances and transactions.
#[derive(Debug, Clone)]
pub struct LoyaltyLedger {
    pool: SqlitePool,
}

impl LoyaltyLedger {
    pub fn new(pool: SqlitePool) -> Self {
        LoyaltyLedger { pool }
    }

    /// Moves the balance and appends the transaction.
    ///
    /// Returns `None` (writing nothing) when the change would overdraw a
    /// balance that must stay non-negative, or the customer doesn't exist.
    pub async fn record(
        conn: &mut SqliteConnection,
        change: &PointsChange<'_>,
    ) -> DbResult<Option<LoyaltyTransaction>> {
        let balance_after: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE customers SET
                loyalty_points = loyalty_points + ?2,
                updated_at = ?3
            WHERE id = ?1
              AND (?4 OR loyalty_points + ?2 >= 0)
            RETURNING loyalty_points
            "#,
        )
        .bind(change.customer_id)
        .bind(change.points)
        .bind(change.at)
        .bind(change.allow_negative)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(balance_after) = balance_after else {
            debug!(
                customer_id = %change.customer_id,
                points = change.points,
                "Points change refused"
            );
            return Ok(None);
        };

        let entry = LoyaltyTransaction {
            id: new_id(),
            customer_id: change.customer_id.to_string(),
            transaction_type: change.kind,
            points: change.points,
            balance_after,
            sale_id: change.sale_id.map(str::to_string),
            description: change.description.map(str::to_string),
            created_by: change.created_by.to_string(),
            created_at: change.at,
        };

        sqlx::query(
            r#"
            INSERT INTO loyalty_transactions (
                id, customer_id, transaction_type, points, balance_after,
                sale_id, description, created_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.customer_id)
        .bind(entry.transaction_type)
        .bind(entry.points)
        .bind(entry.balance_after)
        .bind(&entry.sale_id)
        .bind(&entry.description)
        .bind(&entry.created_by)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;

        debug!(
            customer_id = %entry.customer_id,
            points = entry.points,
            balance_after = entry.balance_after,
            "Loyalty transaction recorded"
        );

        Ok(Some(entry))
    }

    /// Current balance inside a transaction, `None` for an unknown customer.
    pub async fn balance_in(conn: &mut SqliteConnection, customer_id: &str) -> DbResult<Option<i64>> {
        let balance = sqlx::query_scalar("SELECT loyalty_points FROM customers WHERE id = ?1")
            .bind(customer_id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(balance)
    }

    /// Current balance, `None` for an unknown customer.
    pub async fn balance(&self, customer_id: &str) -> DbResult<Option<i64>> {
        let balance = sqlx::query_scalar("SELECT loyalty_points FROM customers WHERE id = ?1")
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(balance)
    }

    /// Transactions of a customer, oldest first.
    pub async fn history(&self, customer_id: &str) -> DbResult<Vec<LoyaltyTransaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM loyalty_transactions \
             WHERE customer_id = ?1 ORDER BY rowid ASC"
        );
        let rows = sqlx::query_as::<_, LoyaltyTransaction>(&sql)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Transactions tied to a sale (earn, redeem and their reversals).
    pub async fn for_sale(&self, sale_id: &str) -> DbResult<Vec<LoyaltyTransaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM loyalty_transactions \
             WHERE sale_id = ?1 ORDER BY rowid ASC"
        );
        let rows = sqlx::query_as::<_, LoyaltyTransaction>(&sql)
            .bind(sale_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Sum of all point deltas of a customer.
    pub async fn ledger_sum(&self, customer_id: &str) -> DbResult<i64> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(points), 0) FROM loyalty_transactions WHERE customer_id = ?1",
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(sum)
    }
}
