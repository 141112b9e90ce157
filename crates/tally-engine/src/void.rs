//! # Void Workflow
//!
//! Reverses a completed sale: `COMPLETED → VOIDED`.
//!
//! ## Guards
//! Checked in order before anything is written; the first failure wins.
//! ```text
//! reason blank? ─────────────────────────────► VALIDATION_ERROR
//! sale missing? ─────────────────────────────► NOT_FOUND
//! sale VOIDED? ──────────────────────────────► ALREADY_VOIDED
//! sale not COMPLETED? ───────────────────────► BUSINESS_RULE
//! session CLOSED? ───────────────────────────► SHIFT_ALREADY_CLOSED
//! business date ≠ today's? ──────────────────► PREVIOUS_BUSINESS_DAY_VOID_FORBIDDEN
//! authorize_void(actor, pin)
//!    ├── actor has VOID_SALE ────────────────► DIRECT
//!    ├── no PIN ─────────────────────────────► MANAGER_AUTHORIZATION_REQUIRED
//!    ├── PIN → active user with VOID_SALE ───► MANAGER_PIN
//!    └── otherwise ──────────────────────────► MANAGER_AUTHORIZATION_INVALID
//! ```
//!
//! ## Compensation (one transaction)
//! ```text
//! UPDATE sales ... WHERE status = 'COMPLETED'   (lost race → ALREADY_VOIDED)
//! per item      stock +qty, RETURN movement
//! customer      points ADJUST −earned, ADJUST +redeemed
//!               store credit back (only with void.reverse_store_credit)
//! invoice       → CANCELLED (credit note flagged when it was ISSUED)
//! invoice job   → FAILED "Sale voided"
//! ```

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tally_core::fiscal::Invoice;
use tally_core::validation::validate_void_reason;
use tally_core::{
    Actor, Capability, CreditTransactionType, LoyaltyTransactionType, Sale, SaleStatus,
    SessionStatus, StockMovementType, VoidAuthorization,
};
use tally_db::{
    CreditChange, CreditLedger, InvoiceJobRepository, InvoiceRepository, LoyaltyLedger,
    PointsChange, SaleRepository, StockChange, StockLedger, VoidStamp,
};
use tracing::{debug, info, warn};
use ts_rs::TS;

use crate::error::{EngineError, EngineResult, ErrorCode};
use crate::events::SaleEvent;
use crate::Engine;

/// `reference_type` of stock movements written by a void.
pub const VOID_REFERENCE: &str = "SALE_VOID";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct VoidSaleRequest {
    pub sale_id: String,
    pub reason: String,
    /// Needed when the actor cannot void on their own.
    #[serde(default)]
    pub manager_pin: Option<String>,
}

/// Who allowed a void and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct VoidApproval {
    pub authorization: VoidAuthorization,
    /// The manager whose PIN was used.
    pub approved_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct VoidedSale {
    pub sale: Sale,
    pub authorization: VoidAuthorization,
    pub approved_by: Option<String>,
    /// The invoice as cancelled by this void, if there was one.
    pub invoice: Option<Invoice>,
    /// The cancelled invoice had been cleared and needs a credit note.
    pub credit_note_required: bool,
}

impl Engine {
    /// Voids a same-day completed sale.
    pub async fn void_sale(
        &self,
        actor: &Actor,
        request: VoidSaleRequest,
    ) -> EngineResult<VoidedSale> {
        let reason = validate_void_reason(&request.reason)?;

        let sale = self
            .db
            .sales()
            .get_by_id(&request.sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", &request.sale_id))?;

        match sale.status {
            SaleStatus::Completed => {}
            SaleStatus::Voided => return Err(already_voided(&sale.id)),
            other => {
                return Err(EngineError::business(format!(
                    "Only completed sales can be voided; sale {} is {:?}",
                    sale.id, other
                )))
            }
        }

        let session = self
            .db
            .sessions()
            .get_by_id(&sale.session_id)
            .await?
            .ok_or_else(|| EngineError::not_found("RegisterSession", &sale.session_id))?;
        if session.status == SessionStatus::Closed {
            return Err(EngineError::new(
                ErrorCode::ShiftAlreadyClosed,
                format!("Register session {} is already closed", session.id),
            ));
        }

        let today = self.business_date_now();
        if sale.business_date != today {
            return Err(EngineError::new(
                ErrorCode::PreviousBusinessDayVoidForbidden,
                format!(
                    "Sale belongs to business day {}; only sales from {} can be voided",
                    sale.business_date, today
                ),
            ));
        }

        let approval = self
            .authorize_void(actor, request.manager_pin.as_deref())
            .await?;

        let items = self.db.sales().get_items(&sale.id).await?;
        let now = self.clock.now();

        // ---------------------------------------------------------------------
        // Compensate
        // ---------------------------------------------------------------------
        let mut tx = self.db.begin().await?;

        let stamp = VoidStamp {
            voided_by: &actor.user_id,
            voided_at: now,
            reason: &reason,
            approved_by: approval.approved_by.as_deref(),
            authorization: approval.authorization,
        };
        if !SaleRepository::mark_voided(&mut tx, &sale.id, &stamp).await? {
            return Err(already_voided(&sale.id));
        }

        for item in &items {
            let change = StockChange {
                branch_id: &sale.branch_id,
                product_id: &item.product_id,
                movement_type: StockMovementType::Return,
                quantity: item.quantity,
                allow_negative: true,
                reference_type: Some(VOID_REFERENCE),
                reference_id: Some(&sale.id),
                note: Some(&reason),
                created_by: &actor.user_id,
                at: now,
            };
            StockLedger::apply(&mut tx, &change)
                .await?
                .ok_or_else(|| EngineError::internal("Stock return was refused"))?;
        }

        if let Some(customer_id) = sale.customer_id.as_deref() {
            reverse_customer_effects(
                &mut tx,
                &sale,
                customer_id,
                &actor.user_id,
                self.config.void.reverse_store_credit,
                now,
            )
            .await?;
        }

        let invoice = InvoiceRepository::cancel_for_sale(&mut tx, &sale.id, now).await?;
        InvoiceJobRepository::fail_for_sale(&mut tx, &sale.id, "Sale voided", now).await?;

        tx.commit().await?;

        let credit_note_required = invoice.as_ref().is_some_and(|i| i.credit_note_required);

        info!(
            sale_id = %sale.id,
            voided_by = %actor.user_id,
            authorization = ?approval.authorization,
            approved_by = ?approval.approved_by,
            total = %sale.total(),
            "Sale voided"
        );
        if credit_note_required {
            warn!(sale_id = %sale.id, "Voided sale had an issued invoice; a credit note is required");
        }

        let voided = self
            .db
            .sales()
            .get_by_id(&sale.id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", &sale.id))?;

        self.publish(SaleEvent::SaleVoided {
            sale_id: voided.id.clone(),
            branch_id: voided.branch_id.clone(),
            created_by: voided.created_by.clone(),
            voided_by: actor.user_id.clone(),
            approved_by: approval.approved_by.clone(),
            authorization: approval.authorization,
            reason,
            amount: voided.total(),
            credit_note_required,
            at: now,
        })
        .await;

        Ok(VoidedSale {
            sale: voided,
            authorization: approval.authorization,
            approved_by: approval.approved_by,
            invoice,
            credit_note_required,
        })
    }

    /// Decides whether `actor` may void, on their own or with a manager PIN.
    pub async fn authorize_void(
        &self,
        actor: &Actor,
        manager_pin: Option<&str>,
    ) -> EngineResult<VoidApproval> {
        if actor.capabilities.contains(Capability::VoidSale) {
            return Ok(VoidApproval {
                authorization: VoidAuthorization::Direct,
                approved_by: None,
            });
        }

        let Some(pin) = manager_pin.map(str::trim).filter(|p| !p.is_empty()) else {
            return Err(EngineError::new(
                ErrorCode::ManagerAuthorizationRequired,
                format!("{} requires a manager PIN", Capability::VoidSale),
            ));
        };

        match self.db.staff().find_by_manager_pin(pin).await? {
            Some(holder) if holder.capabilities.contains(Capability::VoidSale) => {
                debug!(actor = %actor.user_id, manager = %holder.user_id, "Void approved by manager PIN");
                Ok(VoidApproval {
                    authorization: VoidAuthorization::ManagerPin,
                    approved_by: Some(holder.user_id),
                })
            }
            _ => {
                warn!(actor = %actor.user_id, "Manager PIN rejected for void");
                Err(EngineError::new(
                    ErrorCode::ManagerAuthorizationInvalid,
                    "Manager PIN is invalid",
                ))
            }
        }
    }
}

fn already_voided(sale_id: &str) -> EngineError {
    EngineError::new(
        ErrorCode::AlreadyVoided,
        format!("Sale {} is already voided", sale_id),
    )
}

async fn reverse_customer_effects(
    conn: &mut SqliteConnection,
    sale: &Sale,
    customer_id: &str,
    created_by: &str,
    reverse_store_credit: bool,
    at: chrono::DateTime<chrono::Utc>,
) -> EngineResult<()> {
    let adjust_points = |points: i64, description: &'static str| PointsChange {
        customer_id,
        kind: LoyaltyTransactionType::Adjust,
        points,
        sale_id: Some(&sale.id),
        description: Some(description),
        created_by,
        allow_negative: true,
        at,
    };

    if sale.points_earned > 0 {
        let change = adjust_points(-sale.points_earned, "Points earned on voided sale reversed");
        LoyaltyLedger::record(&mut *conn, &change)
            .await?
            .ok_or_else(|| EngineError::not_found("Customer", customer_id))?;
    }

    if sale.points_redeemed > 0 {
        let change = adjust_points(sale.points_redeemed, "Points redeemed on voided sale returned");
        LoyaltyLedger::record(&mut *conn, &change)
            .await?
            .ok_or_else(|| EngineError::not_found("Customer", customer_id))?;
    }

    if !reverse_store_credit {
        return Ok(());
    }

    let net_credit = sale.credit_used() - sale.change_as_credit();
    if net_credit.is_zero() {
        return Ok(());
    }

    let change = CreditChange {
        customer_id,
        kind: CreditTransactionType::Adjust,
        amount: net_credit,
        sale_id: Some(&sale.id),
        description: Some("Store credit of voided sale reversed"),
        created_by,
        allow_negative: true,
        at,
    };
    CreditLedger::record(&mut *conn, &change)
        .await?
        .ok_or_else(|| EngineError::not_found("Customer", customer_id))?;

    Ok(())
}
