//! # Invoice Repository
//!
//! Electronic invoices and their per-(point of sale, type) number sequence.
//!
//! ## Numbering
//! ```text
//! INSERT INTO invoice_sequences (pos, type, last_number) VALUES (?, ?, 1)
//! ON CONFLICT (pos, type) DO UPDATE SET last_number = last_number + 1
//! RETURNING last_number
//! ```
//! One statement, so two concurrent triggers can never read the same number.
//! The partial UNIQUE index on `(point_of_sale, invoice_type, invoice_number)`
//! backs this up.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use super::new_id;
use crate::error::DbResult;
use tally_core::fiscal::{Invoice, InvoiceStatus};
use tally_core::{InvoiceType, Money};

const INVOICE_COLUMNS: &str = r#"
    id, sale_id, branch_id, invoice_type, point_of_sale, invoice_number, status,
    cae, cae_expiration, customer_tax_id, net_cents, tax_cents, total_cents,
    retry_count, last_error, credit_note_required, issued_at, cancelled_at,
    created_at, updated_at
"#;

/// Data for a new invoice row.
#[derive(Debug, Clone)]
pub struct NewInvoice<'a> {
    pub sale_id: &'a str,
    pub branch_id: &'a str,
    pub invoice_type: InvoiceType,
    pub point_of_sale: i64,
    pub invoice_number: Option<i64>,
    pub status: InvoiceStatus,
    pub customer_tax_id: Option<&'a str>,
    pub tax: Money,
    pub total: Money,
    pub last_error: Option<&'a str>,
    pub at: DateTime<Utc>,
}

/// Repository for invoices.
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
}

impl InvoiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        InvoiceRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Invoice>> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1");
        let invoice = sqlx::query_as::<_, Invoice>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(invoice)
    }

    /// The invoice of a sale, if any.
    pub async fn find_by_sale(&self, sale_id: &str) -> DbResult<Option<Invoice>> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE sale_id = ?1");
        let invoice = sqlx::query_as::<_, Invoice>(&sql)
            .bind(sale_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(invoice)
    }

    /// Number of invoice rows for a sale (0 or 1).
    pub async fn count_for_sale(&self, sale_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoices WHERE sale_id = ?1")
            .bind(sale_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Highest number handed out for a (point of sale, type), 0 if none.
    pub async fn last_number(&self, point_of_sale: i64, invoice_type: InvoiceType) -> DbResult<i64> {
        let last: Option<i64> = sqlx::query_scalar(
            "SELECT last_number FROM invoice_sequences WHERE point_of_sale = ?1 AND invoice_type = ?2",
        )
        .bind(point_of_sale)
        .bind(invoice_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(last.unwrap_or(0))
    }

    // =========================================================================
    // Writes (inside a caller's transaction)
    // =========================================================================

    /// Allocates the next invoice number for a (point of sale, type).
    pub async fn next_number(
        conn: &mut SqliteConnection,
        point_of_sale: i64,
        invoice_type: InvoiceType,
    ) -> DbResult<i64> {
        let number: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_sequences (point_of_sale, invoice_type, last_number)
            VALUES (?1, ?2, 1)
            ON CONFLICT (point_of_sale, invoice_type)
                DO UPDATE SET last_number = last_number + 1
            RETURNING last_number
            "#,
        )
        .bind(point_of_sale)
        .bind(invoice_type)
        .fetch_one(&mut *conn)
        .await?;

        debug!(point_of_sale, invoice_type = %invoice_type, number, "Allocated invoice number");

        Ok(number)
    }

    /// Inserts an invoice.
    ///
    /// A second invoice for the same sale fails with a unique violation on
    /// `invoices.sale_id`.
    pub async fn insert(conn: &mut SqliteConnection, new: &NewInvoice<'_>) -> DbResult<Invoice> {
        let invoice = Invoice {
            id: new_id(),
            sale_id: new.sale_id.to_string(),
            branch_id: new.branch_id.to_string(),
            invoice_type: new.invoice_type,
            point_of_sale: new.point_of_sale,
            invoice_number: new.invoice_number,
            status: new.status,
            cae: None,
            cae_expiration: None,
            customer_tax_id: new.customer_tax_id.map(str::to_string),
            net_cents: (new.total - new.tax).cents(),
            tax_cents: new.tax.cents(),
            total_cents: new.total.cents(),
            retry_count: 0,
            last_error: new.last_error.map(str::to_string),
            credit_note_required: false,
            issued_at: None,
            cancelled_at: None,
            created_at: new.at,
            updated_at: new.at,
        };

        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, sale_id, branch_id, invoice_type, point_of_sale, invoice_number, status,
                cae, cae_expiration, customer_tax_id, net_cents, tax_cents, total_cents,
                retry_count, last_error, credit_note_required, issued_at, cancelled_at,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12, ?13,
                ?14, ?15, ?16, ?17, ?18,
                ?19, ?20
            )
            "#,
        )
        .bind(&invoice.id)
        .bind(&invoice.sale_id)
        .bind(&invoice.branch_id)
        .bind(invoice.invoice_type)
        .bind(invoice.point_of_sale)
        .bind(invoice.invoice_number)
        .bind(invoice.status)
        .bind(&invoice.cae)
        .bind(invoice.cae_expiration)
        .bind(&invoice.customer_tax_id)
        .bind(invoice.net_cents)
        .bind(invoice.tax_cents)
        .bind(invoice.total_cents)
        .bind(invoice.retry_count)
        .bind(&invoice.last_error)
        .bind(invoice.credit_note_required)
        .bind(invoice.issued_at)
        .bind(invoice.cancelled_at)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&mut *conn)
        .await?;

        debug!(
            invoice_id = %invoice.id,
            sale_id = %invoice.sale_id,
            status = ?invoice.status,
            "Invoice inserted"
        );

        Ok(invoice)
    }

    /// Puts a PENDING or FAILED invoice back to PENDING for resubmission,
    /// filling in `number` and `customer_tax_id` where the row has none yet.
    ///
    /// Returns `false` when the invoice is ISSUED or CANCELLED.
    pub async fn reopen(
        conn: &mut SqliteConnection,
        id: &str,
        number: Option<i64>,
        customer_tax_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE invoices SET
                status = ?2,
                invoice_number = COALESCE(invoice_number, ?3),
                customer_tax_id = COALESCE(customer_tax_id, ?4),
                updated_at = ?5
            WHERE id = ?1 AND status IN (?2, ?6)
            "#,
        )
        .bind(id)
        .bind(InvoiceStatus::Pending)
        .bind(number)
        .bind(customer_tax_id)
        .bind(at)
        .bind(InvoiceStatus::Failed)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Cancels the invoice of a voided sale.
    ///
    /// ```text
    /// ISSUED           → CANCELLED, credit_note_required = 1
    /// PENDING / FAILED → CANCELLED
    /// CANCELLED / none → untouched (None)
    /// ```
    pub async fn cancel_for_sale(
        conn: &mut SqliteConnection,
        sale_id: &str,
        at: DateTime<Utc>,
    ) -> DbResult<Option<Invoice>> {
        // SET expressions see the pre-update row, so `status = ?3` tests the old status.
        let sql = format!(
            r#"
            UPDATE invoices SET
                credit_note_required = (status = ?3),
                status = ?2,
                cancelled_at = ?4,
                updated_at = ?4
            WHERE sale_id = ?1 AND status <> ?2
            RETURNING {INVOICE_COLUMNS}
            "#
        );
        let invoice = sqlx::query_as::<_, Invoice>(&sql)
            .bind(sale_id)
            .bind(InvoiceStatus::Cancelled)
            .bind(InvoiceStatus::Issued)
            .bind(at)
            .fetch_optional(&mut *conn)
            .await?;

        if let Some(invoice) = &invoice {
            debug!(
                invoice_id = %invoice.id,
                credit_note_required = invoice.credit_note_required,
                "Invoice cancelled"
            );
        }

        Ok(invoice)
    }

    // =========================================================================
    // Fiscal outcomes (standalone writes)
    // =========================================================================

    /// Records a clearance. Only a PENDING invoice can become ISSUED; returns
    /// `false` when the invoice was cancelled (or issued) in the meantime.
    pub async fn mark_issued(
        &self,
        id: &str,
        invoice_number: i64,
        cae: &str,
        cae_expiration: NaiveDate,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE invoices SET
                status = ?2,
                invoice_number = ?3,
                cae = ?4,
                cae_expiration = ?5,
                last_error = NULL,
                issued_at = ?6,
                updated_at = ?6
            WHERE id = ?1 AND status = ?7
            "#,
        )
        .bind(id)
        .bind(InvoiceStatus::Issued)
        .bind(invoice_number)
        .bind(cae)
        .bind(cae_expiration)
        .bind(at)
        .bind(InvoiceStatus::Pending)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Stores a clearance that arrived after the sale was voided. The invoice
    /// stays CANCELLED but now needs a credit note.
    pub async fn record_late_clearance(
        &self,
        id: &str,
        invoice_number: i64,
        cae: &str,
        cae_expiration: NaiveDate,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE invoices SET
                invoice_number = ?2,
                cae = ?3,
                cae_expiration = ?4,
                credit_note_required = 1,
                issued_at = ?5,
                updated_at = ?5
            WHERE id = ?1 AND status = ?6 AND cae IS NULL
            "#,
        )
        .bind(id)
        .bind(invoice_number)
        .bind(cae)
        .bind(cae_expiration)
        .bind(at)
        .bind(InvoiceStatus::Cancelled)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Records a retryable rejection: stays PENDING, `retry_count + 1`.
    pub async fn mark_retryable(&self, id: &str, error: &str, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE invoices SET
                retry_count = retry_count + 1,
                last_error = ?2,
                updated_at = ?3
            WHERE id = ?1 AND status = ?4
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(at)
        .bind(InvoiceStatus::Pending)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records a permanent rejection: PENDING → FAILED.
    pub async fn mark_failed(&self, id: &str, error: &str, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE invoices SET
                status = ?2,
                retry_count = retry_count + 1,
                last_error = ?3,
                updated_at = ?4
            WHERE id = ?1 AND status = ?5
            "#,
        )
        .bind(id)
        .bind(InvoiceStatus::Failed)
        .bind(error)
        .bind(at)
        .bind(InvoiceStatus::Pending)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_numbers_are_sequential_per_type() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let b1 = InvoiceRepository::next_number(&mut tx, 1, InvoiceType::B).await.unwrap();
        let b2 = InvoiceRepository::next_number(&mut tx, 1, InvoiceType::B).await.unwrap();
        let a1 = InvoiceRepository::next_number(&mut tx, 1, InvoiceType::A).await.unwrap();
        let other_pos = InvoiceRepository::next_number(&mut tx, 2, InvoiceType::B).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!((b1, b2, a1, other_pos), (1, 2, 1, 1));
        assert_eq!(db.invoices().last_number(1, InvoiceType::B).await.unwrap(), 2);
        assert_eq!(db.invoices().last_number(3, InvoiceType::C).await.unwrap(), 0);
    }
}
