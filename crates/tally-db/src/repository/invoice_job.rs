//! # Invoice Job Queue
//!
//! Outbox rows telling the invoice worker which sales still need a fiscal
//! invoice.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create_sale                                                            │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │  INSERT sales / sale_items / sale_payments / ledgers …          │   │
//! │  │  INSERT invoice_jobs (sale_id, status QUEUED, next_attempt_at)  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │  COMMIT ← the job exists iff the sale exists                   │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  INVOICE WORKER (background)                                    │   │
//! │  │  1. get_due(now)  → QUEUED jobs with next_attempt_at <= now     │   │
//! │  │  2. trigger(sale_id)                                            │   │
//! │  │     ├── settled       → mark_done                               │   │
//! │  │     ├── retryable     → reschedule (attempts + 1, backoff)      │   │
//! │  │     └── out of tries  → mark_failed                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  void_sale flips a still-QUEUED job to FAILED in the void transaction. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use super::new_id;
use crate::error::DbResult;
use tally_core::fiscal::{InvoiceJob, InvoiceJobStatus};
use tally_core::InvoiceType;

const JOB_COLUMNS: &str = r#"
    id, sale_id, invoice_type, status, attempts, next_attempt_at, last_error,
    created_at, updated_at
"#;

/// Repository for invoice jobs.
#[derive(Debug, Clone)]
pub struct InvoiceJobRepository {
    pool: SqlitePool,
}

impl InvoiceJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        InvoiceJobRepository { pool }
    }

    /// Queues a sale for invoicing, due immediately.
    ///
    /// Idempotent per sale: returns `false` if a job already exists.
    pub async fn enqueue(
        conn: &mut SqliteConnection,
        sale_id: &str,
        invoice_type: Option<InvoiceType>,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO invoice_jobs (
                id, sale_id, invoice_type, status, attempts, next_attempt_at,
                last_error, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 0, ?5, NULL, ?5, ?5)
            ON CONFLICT (sale_id) DO NOTHING
            "#,
        )
        .bind(new_id())
        .bind(sale_id)
        .bind(invoice_type)
        .bind(InvoiceJobStatus::Queued)
        .bind(at)
        .execute(&mut *conn)
        .await?;

        debug!(sale_id = %sale_id, "Queued invoice job");

        Ok(result.rows_affected() == 1)
    }

    /// Gets QUEUED jobs whose `next_attempt_at` has passed, oldest due first.
    pub async fn get_due(&self, now: DateTime<Utc>, limit: u32) -> DbResult<Vec<InvoiceJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM invoice_jobs \
             WHERE status = ?1 AND next_attempt_at <= ?2 \
             ORDER BY next_attempt_at ASC, rowid ASC LIMIT ?3"
        );
        let jobs = sqlx::query_as::<_, InvoiceJob>(&sql)
            .bind(InvoiceJobStatus::Queued)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(jobs)
    }

    /// Gets the job of a sale.
    pub async fn get_by_sale(&self, sale_id: &str) -> DbResult<Option<InvoiceJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM invoice_jobs WHERE sale_id = ?1");
        let job = sqlx::query_as::<_, InvoiceJob>(&sql)
            .bind(sale_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    /// Marks a job as done.
    pub async fn mark_done(&self, id: &str, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE invoice_jobs SET
                status = ?2,
                attempts = attempts + 1,
                last_error = NULL,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(InvoiceJobStatus::Done)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records a failed attempt and pushes the job back to `next_attempt_at`.
    pub async fn reschedule(
        &self,
        id: &str,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE invoice_jobs SET
                attempts = attempts + 1,
                last_error = ?2,
                next_attempt_at = ?3,
                updated_at = ?4
            WHERE id = ?1 AND status = ?5
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .bind(at)
        .bind(InvoiceJobStatus::Queued)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gives up on a job.
    pub async fn mark_failed(&self, id: &str, error: &str, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE invoice_jobs SET
                status = ?2,
                attempts = attempts + 1,
                last_error = ?3,
                updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(InvoiceJobStatus::Failed)
        .bind(error)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fails a still-QUEUED job of a sale without counting an attempt.
    /// Returns `true` when a job was flipped.
    pub async fn fail_for_sale(
        conn: &mut SqliteConnection,
        sale_id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE invoice_jobs SET
                status = ?2,
                last_error = ?3,
                updated_at = ?4
            WHERE sale_id = ?1 AND status = ?5
            "#,
        )
        .bind(sale_id)
        .bind(InvoiceJobStatus::Failed)
        .bind(reason)
        .bind(at)
        .bind(InvoiceJobStatus::Queued)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Counts QUEUED jobs.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoice_jobs WHERE status = ?1")
            .bind(InvoiceJobStatus::Queued)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
