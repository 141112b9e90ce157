//! # Register Session Repository
//!
//! Register sessions (shifts). A register has at most one OPEN session;
//! sales are only accepted while it is open, and a sale can only be voided
//! while its session has not been closed.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::new_id;
use crate::error::DbResult;
use tally_core::{RegisterSession, SessionStatus};

const SESSION_COLUMNS: &str = r#"
    id, branch_id, register_id, opened_by, status, business_date, opened_at, closed_at
"#;

/// Repository for register sessions.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SessionRepository { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<RegisterSession>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM register_sessions WHERE id = ?1");
        let session = sqlx::query_as::<_, RegisterSession>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    /// The open session of a register, if any.
    pub async fn get_open_for_register(&self, register_id: &str) -> DbResult<Option<RegisterSession>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM register_sessions WHERE register_id = ?1 AND status = ?2"
        );
        let session = sqlx::query_as::<_, RegisterSession>(&sql)
            .bind(register_id)
            .bind(SessionStatus::Open)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    /// Opens a session on a register.
    ///
    /// Fails with a unique violation if the register already has an open one.
    pub async fn open(
        &self,
        branch_id: &str,
        register_id: &str,
        opened_by: &str,
        business_date: NaiveDate,
        at: DateTime<Utc>,
    ) -> DbResult<RegisterSession> {
        let session = RegisterSession {
            id: new_id(),
            branch_id: branch_id.to_string(),
            register_id: register_id.to_string(),
            opened_by: opened_by.to_string(),
            status: SessionStatus::Open,
            business_date,
            opened_at: at,
            closed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO register_sessions (
                id, branch_id, register_id, opened_by, status, business_date, opened_at, closed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&session.id)
        .bind(&session.branch_id)
        .bind(&session.register_id)
        .bind(&session.opened_by)
        .bind(session.status)
        .bind(session.business_date)
        .bind(session.opened_at)
        .bind(session.closed_at)
        .execute(&self.pool)
        .await?;

        info!(
            session_id = %session.id,
            register_id = %register_id,
            business_date = %business_date,
            "Register session opened"
        );

        Ok(session)
    }

    /// Closes an open session. Returns `false` if it was not open.
    pub async fn close(&self, id: &str, at: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE register_sessions SET status = ?2, closed_at = ?3 WHERE id = ?1 AND status = ?4",
        )
        .bind(id)
        .bind(SessionStatus::Closed)
        .bind(at)
        .bind(SessionStatus::Open)
        .execute(&self.pool)
        .await?;

        debug!(session_id = %id, closed = result.rows_affected() == 1, "Close session");

        Ok(result.rows_affected() == 1)
    }
}
