//! # Store Credit Ledger
//!
//! Customer store-credit balances (`customers.credit_balance_cents`) and
//! the `credit_transactions` rows behind them.
//!
//! ```text
//! CREDIT  +amount   change left as credit, refunds, manual top-ups
//! DEBIT   −amount   credit spent on a sale (never below zero)
//! ADJUST  ±amount   corrections, void reversals; may go negative
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use super::new_id;
use crate::error::DbResult;
use tally_core::{CreditTransaction, CreditTransactionType, Money};

const TRANSACTION_COLUMNS: &str = r#"
    id, customer_id, transaction_type, amount_cents, balance_after_cents,
    sale_id, description, created_by, created_at
"#;

/// A requested change to a customer's store credit.
#[derive(Debug, Clone)]
pub struct CreditChange<'a> {
    pub customer_id: &'a str,
    pub kind: CreditTransactionType,
    /// Signed delta.
    pub amount: Money,
    pub sale_id: Option<&'a str>,
    pub description: Option<&'a str>,
    pub created_by: &'a str,
    pub allow_negative: bool,
    pub at: DateTime<Utc>,
}

/// Repository for store credit balances and transactions.
#[derive(Debug, Clone)]
pub struct CreditLedger {
    pool: SqlitePool,
}

impl CreditLedger {
    pub fn new(pool: SqlitePool) -> Self {
        CreditLedger { pool }
    }

    /// Moves the balance and appends the transaction.
    ///
    /// Returns `None` (writing nothing) when the change would overdraw a
    /// balance that must stay non-negative, or the customer doesn't exist.
    pub async fn record(
        conn: &mut SqliteConnection,
        change: &CreditChange<'_>,
    ) -> DbResult<Option<CreditTransaction>> {
        let balance_after: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE customers SET
                credit_balance_cents = credit_balance_cents + ?2,
                updated_at = ?3
            WHERE id = ?1
              AND (?4 OR credit_balance_cents + ?2 >= 0)
            RETURNING credit_balance_cents
            "#,
        )
        .bind(change.customer_id)
        .bind(change.amount.cents())
        .bind(change.at)
        .bind(change.allow_negative)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(balance_after_cents) = balance_after else {
            debug!(
                customer_id = %change.customer_id,
                amount = %change.amount,
                "Credit change refused"
            );
            return Ok(None);
        };

        let entry = CreditTransaction {
            id: new_id(),
            customer_id: change.customer_id.to_string(),
            transaction_type: change.kind,
            amount_cents: change.amount.cents(),
            balance_after_cents,
            sale_id: change.sale_id.map(str::to_string),
            description: change.description.map(str::to_string),
            created_by: change.created_by.to_string(),
            created_at: change.at,
        };

        sqlx::query(
            r#"
            INSERT INTO credit_transactions (
                id, customer_id, transaction_type, amount_cents, balance_after_cents,
                sale_id, description, created_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.customer_id)
        .bind(entry.transaction_type)
        .bind(entry.amount_cents)
        .bind(entry.balance_after_cents)
        .bind(&entry.sale_id)
        .bind(&entry.description)
        .bind(&entry.created_by)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;

        debug!(
            customer_id = %entry.customer_id,
            amount_cents = entry.amount_cents,
            balance_after_cents = entry.balance_after_cents,
            "Credit transaction recorded"
        );

        Ok(Some(entry))
    }

    /// Current balance inside a transaction, `None` for an unknown customer.
    pub async fn balance_in(conn: &mut SqliteConnection, customer_id: &str) -> DbResult<Option<Money>> {
        let cents: Option<i64> =
            sqlx::query_scalar("SELECT credit_balance_cents FROM customers WHERE id = ?1")
                .bind(customer_id)
                .fetch_optional(&mut *conn)
                .await?;

        Ok(cents.map(Money::from_cents))
    }

    /// Current balance, `None` for an unknown customer.
    pub async fn balance(&self, customer_id: &str) -> DbResult<Option<Money>> {
        let cents: Option<i64> =
            sqlx::query_scalar("SELECT credit_balance_cents FROM customers WHERE id = ?1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(cents.map(Money::from_cents))
    }

    /// Transactions of a customer, oldest first.
    pub async fn history(&self, customer_id: &str) -> DbResult<Vec<CreditTransaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM credit_transactions \
             WHERE customer_id = ?1 ORDER BY rowid ASC"
        );
        let rows = sqlx::query_as::<_, CreditTransaction>(&sql)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Transactions tied to a sale.
    pub async fn for_sale(&self, sale_id: &str) -> DbResult<Vec<CreditTransaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM credit_transactions \
             WHERE sale_id = ?1 ORDER BY rowid ASC"
        );
        let rows = sqlx::query_as::<_, CreditTransaction>(&sql)
            .bind(sale_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Sum of all deltas of a customer.
    pub async fn ledger_sum(&self, customer_id: &str) -> DbResult<Money> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM credit_transactions WHERE customer_id = ?1",
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Money::from_cents(sum))
    }
}
