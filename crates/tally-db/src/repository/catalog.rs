//! # Catalog Repository
//!
//! Branches, products and payment methods: reference data the sale engine
//! reads. Inserts exist for seeding and tests; curation happens elsewhere.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use tally_core::{Branch, PaymentMethod, Product};

const BRANCH_COLUMNS: &str =
    "id, name, point_of_sale, tax_condition, tax_id, is_active, created_at";

const PRODUCT_COLUMNS: &str = r#"
    id, sku, name, price_cents, cost_price_cents, tax_rate_bps, is_tax_included,
    allow_negative_stock, is_active, created_at, updated_at
"#;

const METHOD_COLUMNS: &str = "id, code, name, requires_reference, is_active";

/// `?1, ?2, …, ?n`
fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
}

/// Repository for catalog reference data.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // =========================================================================
    // Branches
    // =========================================================================

    pub async fn get_branch(&self, id: &str) -> DbResult<Option<Branch>> {
        let sql = format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE id = ?1");
        let branch = sqlx::query_as::<_, Branch>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(branch)
    }

    pub async fn insert_branch(&self, branch: &Branch) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO branches (id, name, point_of_sale, tax_condition, tax_id, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&branch.id)
        .bind(&branch.name)
        .bind(branch.point_of_sale)
        .bind(branch.tax_condition)
        .bind(&branch.tax_id)
        .bind(branch.is_active)
        .bind(branch.created_at)
        .execute(&self.pool)
        .await?;

        debug!(branch_id = %branch.id, "Branch inserted");
        Ok(())
    }

    // =========================================================================
    // Products
    // =========================================================================

    pub async fn get_product(&self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(product)
    }

    pub async fn count_products(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Loads the products with the given ids. Unknown ids are skipped, so
    /// callers compare lengths to detect them.
    pub async fn get_products(&self, ids: &[&str]) -> DbResult<Vec<Product>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query_as::<_, Product>(&sql);
        for id in ids {
            query = query.bind(*id);
        }

        Ok(query.fetch_all(&self.pool).await?)
    }

    pub async fn insert_product(&self, product: &Product) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, price_cents, cost_price_cents, tax_rate_bps, is_tax_included,
                allow_negative_stock, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(product.cost_price_cents)
        .bind(product.tax_rate_bps)
        .bind(product.is_tax_included)
        .bind(product.allow_negative_stock)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(product_id = %product.id, sku = %product.sku, "Product inserted");
        Ok(())
    }

    // =========================================================================
    // Payment Methods
    // =========================================================================

    /// Loads the payment methods with the given ids, active or not.
    pub async fn get_payment_methods(&self, ids: &[&str]) -> DbResult<Vec<PaymentMethod>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {METHOD_COLUMNS} FROM payment_methods WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query_as::<_, PaymentMethod>(&sql);
        for id in ids {
            query = query.bind(*id);
        }

        Ok(query.fetch_all(&self.pool).await?)
    }

    pub async fn list_active_payment_methods(&self) -> DbResult<Vec<PaymentMethod>> {
        let sql = format!("SELECT {METHOD_COLUMNS} FROM payment_methods WHERE is_active = 1 ORDER BY code");
        let methods = sqlx::query_as::<_, PaymentMethod>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(methods)
    }

    pub async fn insert_payment_method(&self, method: &PaymentMethod) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_methods (id, code, name, requires_reference, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&method.id)
        .bind(&method.code)
        .bind(&method.name)
        .bind(method.requires_reference)
        .bind(method.is_active)
        .execute(&self.pool)
        .await?;

        debug!(code = %method.code, "Payment method inserted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::placeholders;

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?1");
        assert_eq!(placeholders(3), "?1, ?2, ?3");
    }
}
