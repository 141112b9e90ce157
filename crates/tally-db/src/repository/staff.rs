//! # Staff Repository
//!
//! Roles, users and manager PINs.
//!
//! ## Manager PIN Lookup
//! ```text
//! find_by_manager_pin("4321")
//!      │
//!      ▼
//! SELECT active users with a PIN hash, joined with their role's capabilities
//!      │
//!      ▼
//! argon2 verify each hash (spawn_blocking, hashing is CPU-bound)
//!      │
//!      ├── match    → Some(PinHolder { user_id, name, capabilities })
//!      └── no match → None
//! ```
//! PINs are never stored or logged in clear text; the column holds an argon2
//! PHC string.

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, warn};

use super::new_id;
use crate::error::{DbError, DbResult};
use tally_core::{Capabilities, Role, User};

const USER_COLUMNS: &str =
    "id, branch_id, role_id, name, manager_pin_hash, is_active, created_at";

/// A user whose manager PIN matched.
#[derive(Debug, Clone, PartialEq)]
pub struct PinHolder {
    pub user_id: String,
    pub name: String,
    pub capabilities: Capabilities,
}

#[derive(Debug, FromRow)]
struct PinCandidate {
    id: String,
    name: String,
    manager_pin_hash: String,
    capabilities: Capabilities,
}

/// Hashes a PIN into an argon2 PHC string.
pub fn hash_pin(pin: &str) -> DbResult<String> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map_err(|e| DbError::Internal(format!("Failed to hash PIN: {}", e)))?;

    Ok(hash.to_string())
}

/// Checks a PIN against a stored hash. A malformed hash never matches.
pub fn verify_pin(pin: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(pin.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Repository for roles and users.
#[derive(Debug, Clone)]
pub struct StaffRepository {
    pool: SqlitePool,
}

impl StaffRepository {
    pub fn new(pool: SqlitePool) -> Self {
        StaffRepository { pool }
    }

    // =========================================================================
    // Roles
    // =========================================================================

    pub async fn insert_role(&self, name: &str, capabilities: Capabilities) -> DbResult<Role> {
        let role = Role {
            id: new_id(),
            name: name.to_string(),
            capabilities,
        };

        sqlx::query("INSERT INTO roles (id, name, capabilities) VALUES (?1, ?2, ?3)")
            .bind(&role.id)
            .bind(&role.name)
            .bind(role.capabilities)
            .execute(&self.pool)
            .await?;

        debug!(role = %role.name, capabilities = role.capabilities.bits(), "Role inserted");
        Ok(role)
    }

    pub async fn get_role(&self, id: &str) -> DbResult<Option<Role>> {
        let role = sqlx::query_as::<_, Role>("SELECT id, name, capabilities FROM roles WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(role)
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub async fn insert_user(
        &self,
        branch_id: Option<&str>,
        role_id: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> DbResult<User> {
        let user = User {
            id: new_id(),
            branch_id: branch_id.map(str::to_string),
            role_id: role_id.to_string(),
            name: name.to_string(),
            manager_pin_hash: None,
            is_active: true,
            created_at: at,
        };

        sqlx::query(
            r#"
            INSERT INTO users (id, branch_id, role_id, name, manager_pin_hash, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)
            "#,
        )
        .bind(&user.id)
        .bind(&user.branch_id)
        .bind(&user.role_id)
        .bind(&user.name)
        .bind(user.is_active)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        debug!(user_id = %user.id, "User inserted");
        Ok(user)
    }

    pub async fn get_user(&self, id: &str) -> DbResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Capabilities granted to an active user through their role.
    pub async fn get_user_capabilities(&self, user_id: &str) -> DbResult<Option<Capabilities>> {
        let caps = sqlx::query_scalar::<_, Capabilities>(
            r#"
            SELECT r.capabilities
            FROM users u JOIN roles r ON r.id = u.role_id
            WHERE u.id = ?1 AND u.is_active = 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(caps)
    }

    pub async fn set_active(&self, user_id: &str, active: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE users SET is_active = ?2 WHERE id = ?1")
            .bind(user_id)
            .bind(active)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("User", user_id));
        }
        Ok(())
    }

    // =========================================================================
    // Manager PINs
    // =========================================================================

    /// Stores a user's manager PIN (hashed).
    pub async fn set_manager_pin(&self, user_id: &str, pin: &str) -> DbResult<()> {
        let pin = pin.to_string();
        let hash = tokio::task::spawn_blocking(move || hash_pin(&pin))
            .await
            .map_err(|e| DbError::Internal(format!("PIN hashing task failed: {}", e)))??;

        let result = sqlx::query("UPDATE users SET manager_pin_hash = ?2 WHERE id = ?1")
            .bind(user_id)
            .bind(&hash)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("User", user_id));
        }

        debug!(user_id = %user_id, "Manager PIN set");
        Ok(())
    }

    /// Resolves a manager PIN to the active user holding it.
    pub async fn find_by_manager_pin(&self, pin: &str) -> DbResult<Option<PinHolder>> {
        let candidates = sqlx::query_as::<_, PinCandidate>(
            r#"
            SELECT u.id, u.name, u.manager_pin_hash, r.capabilities
            FROM users u JOIN roles r ON r.id = u.role_id
            WHERE u.is_active = 1 AND u.manager_pin_hash IS NOT NULL
            ORDER BY u.created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        if candidates.is_empty() {
            return Ok(None);
        }

        let pin = pin.to_string();
        let matched = tokio::task::spawn_blocking(move || {
            candidates
                .into_iter()
                .find(|c| verify_pin(&pin, &c.manager_pin_hash))
        })
        .await
        .map_err(|e| DbError::Internal(format!("PIN verification task failed: {}", e)))?;

        match matched {
            Some(c) => Ok(Some(PinHolder {
                user_id: c.id,
                name: c.name,
                capabilities: c.capabilities,
            })),
            None => {
                warn!("Manager PIN did not match any active user");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_hash_roundtrip() {
        let hash = hash_pin("4321").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_pin("4321", &hash));
        assert!(!verify_pin("1234", &hash));
    }

    #[test]
    fn test_malformed_hash_never_matches() {
        assert!(!verify_pin("4321", "not-a-phc-string"));
    }
}
