//! # Customer Repository
//!
//! Read side of customers. Balances are only moved through
//! [`LoyaltyLedger`](super::loyalty::LoyaltyLedger) and
//! [`CreditLedger`](super::credit::CreditLedger).

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use super::new_id;
use crate::error::DbResult;
use tally_core::{Customer, TaxCondition};

const CUSTOMER_COLUMNS: &str = r#"
    id, name, tax_condition, tax_id, loyalty_points, credit_balance_cents,
    is_active, created_at, updated_at
"#;

/// Repository for customers.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Customer>> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?1");
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(customer)
    }

    /// Creates a customer with zero balances. Opening balances are ledger
    /// entries, not part of the row.
    pub async fn insert(
        &self,
        name: &str,
        tax_condition: TaxCondition,
        tax_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> DbResult<Customer> {
        let customer = Customer {
            id: new_id(),
            name: name.to_string(),
            tax_condition,
            tax_id: tax_id.map(str::to_string),
            loyalty_points: 0,
            credit_balance_cents: 0,
            is_active: true,
            created_at: at,
            updated_at: at,
        };

        sqlx::query(
            r#"
            INSERT INTO customers (
                id, name, tax_condition, tax_id, loyalty_points, credit_balance_cents,
                is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, ?6, ?7)
            "#,
        )
        .bind(&customer.id)
        .bind(&customer.name)
        .bind(customer.tax_condition)
        .bind(&customer.tax_id)
        .bind(customer.is_active)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(customer_id = %customer.id, "Customer inserted");

        Ok(customer)
    }
}
