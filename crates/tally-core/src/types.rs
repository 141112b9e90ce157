//! # Domain Types
//!
//! Core domain types used throughout the sale engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Sale       │──►│    SaleItem     │   │   SalePayment   │       │
//! │  │  status         │   │  qty, price     │   │  method, amount │       │
//! │  │  totals         │   │  tax, snapshots │   │  reference      │       │
//! │  │  void metadata  │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! │  Ledgers (append-only)                                                  │
//! │  ┌─────────────────┐   ┌──────────────────┐  ┌──────────────────┐      │
//! │  │  StockMovement  │   │LoyaltyTransaction│  │CreditTransaction │      │
//! │  │ before / after  │   │ EARN/REDEEM/ADJ  │  │ CREDIT/DEBIT/ADJ │      │
//! │  └─────────────────┘   └──────────────────┘  └──────────────────┘      │
//! │                                                                         │
//! │  Reference data (read by the engine, curated elsewhere)                │
//! │  Branch • RegisterSession • PaymentMethod • Product • Customer         │
//! │  Role • User                                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Monetary columns are stored as `*_cents` integers and exposed as [`Money`]
//! through accessor methods.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::capability::Capabilities;
use crate::fiscal::TaxCondition;
use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// 1 basis point = 0.01%, so 2100 bps = 21% VAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    /// Checks if tax rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Sale Status
// =============================================================================

/// The status of a sale.
///
/// ```text
///   create_sale            void_sale
///  ───────────► COMPLETED ───────────► VOIDED   (terminal)
/// ```
/// `PENDING` and `RETURNED` exist for records written by other
/// workflows; the engine never creates them and refuses to void them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleStatus {
    Pending,
    Completed,
    Voided,
    Returned,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Pending => "PENDING",
            SaleStatus::Completed => "COMPLETED",
            SaleStatus::Voided => "VOIDED",
            SaleStatus::Returned => "RETURNED",
        }
    }
}

/// How a void was authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoidAuthorization {
    /// The acting user holds `VOID_SALE` themselves.
    Direct,
    /// A manager's PIN was supplied and resolved to a user holding `VOID_SALE`.
    ManagerPin,
}

// =============================================================================
// Sale
// =============================================================================

/// A sale header.
///
/// `total_cents = subtotal_cents − discount_cents − points_redemption_value_cents − credit_used_cents`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: String,
    pub branch_id: String,
    pub register_id: String,
    pub session_id: String,
    pub customer_id: Option<String>,
    pub seller_id: Option<String>,
    pub created_by: String,
    pub status: SaleStatus,
    /// Business date of the register session the sale was rung on.
    #[ts(as = "String")]
    pub business_date: NaiveDate,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub points_redeemed: i64,
    pub points_redemption_value_cents: i64,
    pub points_earned: i64,
    pub credit_used_cents: i64,
    pub change_as_credit_cents: i64,
    pub voided_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub voided_at: Option<DateTime<Utc>>,
    pub void_reason: Option<String>,
    pub void_approved_by: Option<String>,
    pub void_authorization: Option<VoidAuthorization>,
    /// Client-generated id of an offline sale, unique once synced.
    pub local_id: Option<String>,
    #[ts(as = "Option<String>")]
    pub client_created_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    #[inline]
    pub fn subtotal(&self) -> Money {
        Money::from_cents(self.subtotal_cents)
    }

    #[inline]
    pub fn discount(&self) -> Money {
        Money::from_cents(self.discount_cents)
    }

    #[inline]
    pub fn tax(&self) -> Money {
        Money::from_cents(self.tax_cents)
    }

    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    #[inline]
    pub fn points_redemption_value(&self) -> Money {
        Money::from_cents(self.points_redemption_value_cents)
    }

    #[inline]
    pub fn credit_used(&self) -> Money {
        Money::from_cents(self.credit_used_cents)
    }

    #[inline]
    pub fn change_as_credit(&self) -> Money {
        Money::from_cents(self.change_as_credit_cents)
    }

    #[inline]
    pub fn is_voided(&self) -> bool {
        self.status == SaleStatus::Voided
    }
}

// =============================================================================
// Sale Item
// =============================================================================

/// A line of a sale.
/// Uses the snapshot pattern to freeze product data at time of sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    /// SKU at time of sale (frozen).
    pub sku_snapshot: String,
    /// Product name at time of sale (frozen).
    pub name_snapshot: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    /// Line discount in basis points (1000 = 10%).
    pub discount_bps: u32,
    pub discount_cents: i64,
    pub tax_rate_bps: u32,
    pub tax_included: bool,
    pub tax_cents: i64,
    /// Unit cost at time of sale (frozen, for margin reporting).
    pub cost_price_cents: i64,
    /// `unit_price × quantity − discount`.
    pub line_total_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl SaleItem {
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }

    #[inline]
    pub fn tax(&self) -> Money {
        Money::from_cents(self.tax_cents)
    }
}

// =============================================================================
// Sale Payment
// =============================================================================

/// One tender towards a sale. A sale can be split across several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SalePayment {
    pub id: String,
    pub sale_id: String,
    pub payment_method_id: String,
    /// Method code at time of sale ("CASH", "CARD", ...).
    pub method_code: String,
    pub amount_cents: i64,
    pub reference: Option<String>,
    pub card_last_four: Option<String>,
    pub authorization_code: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl SalePayment {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

// =============================================================================
// Stock Ledger
// =============================================================================

/// Why a stock balance moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockMovementType {
    Sale,
    Return,
    Adjustment,
    TransferIn,
    TransferOut,
    Shrinkage,
}

/// One append-only entry of the stock ledger.
///
/// `quantity_after = quantity_before + quantity`, and the live branch balance
/// equals the `quantity_after` of the latest movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockMovement {
    pub id: String,
    pub branch_id: String,
    pub product_id: String,
    pub movement_type: StockMovementType,
    /// Signed delta: negative for sales, positive for returns.
    pub quantity: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    /// Kind of document that caused the movement ("SALE", "SALE_VOID", ...).
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub note: Option<String>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Loyalty Ledger
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoyaltyTransactionType {
    Earn,
    Redeem,
    Adjust,
}

/// One append-only entry of a customer's points ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct LoyaltyTransaction {
    pub id: String,
    pub customer_id: String,
    pub transaction_type: LoyaltyTransactionType,
    /// Signed delta in points.
    pub points: i64,
    pub balance_after: i64,
    pub sale_id: Option<String>,
    pub description: Option<String>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Store Credit Ledger
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditTransactionType {
    Credit,
    Debit,
    Adjust,
}

/// One append-only entry of a customer's store-credit ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CreditTransaction {
    pub id: String,
    pub customer_id: String,
    pub transaction_type: CreditTransactionType,
    /// Signed delta in cents.
    pub amount_cents: i64,
    pub balance_after_cents: i64,
    pub sale_id: Option<String>,
    pub description: Option<String>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

// =============================================================================
// Reference Data
// =============================================================================

/// A store location. Each branch invoices from its own point of sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Branch {
    pub id: String,
    pub name: String,
    /// Fiscal point-of-sale number used for invoice numbering.
    pub point_of_sale: i64,
    pub tax_condition: TaxCondition,
    pub tax_id: Option<String>,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Open,
    Closed,
}

/// A cashier shift on one register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct RegisterSession {
    pub id: String,
    pub branch_id: String,
    pub register_id: String,
    pub opened_by: String,
    pub status: SessionStatus,
    #[ts(as = "String")]
    pub business_date: NaiveDate,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl RegisterSession {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }
}

/// A tender type accepted at the register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PaymentMethod {
    pub id: String,
    pub code: String,
    pub name: String,
    /// Tenders of this method must carry a non-blank reference.
    pub requires_reference: bool,
    pub is_active: bool,
}

/// A product available for sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    pub cost_price_cents: i64,
    pub tax_rate_bps: u32,
    /// Whether `price_cents` already contains the tax.
    pub is_tax_included: bool,
    /// Allow selling below zero stock.
    pub allow_negative_stock: bool,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    #[inline]
    pub fn cost_price(&self) -> Money {
        Money::from_cents(self.cost_price_cents)
    }

    #[inline]
    pub fn tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.tax_rate_bps)
    }
}

/// A customer with loyalty and store-credit balances.
///
/// Balances are denormalized running totals of the loyalty and credit
/// ledgers; only the ledger adapters change them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub tax_condition: TaxCondition,
    pub tax_id: Option<String>,
    pub loyalty_points: i64,
    pub credit_balance_cents: i64,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    #[inline]
    pub fn credit_balance(&self) -> Money {
        Money::from_cents(self.credit_balance_cents)
    }

    /// Whether a usable tax id is on file.
    pub fn has_tax_id(&self) -> bool {
        self.tax_id.as_deref().is_some_and(|id| !id.trim().is_empty())
    }
}

/// A named set of capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub capabilities: Capabilities,
}

/// A staff member. `manager_pin_hash` is an argon2 PHC string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct User {
    pub id: String,
    pub branch_id: Option<String>,
    pub role_id: String,
    pub name: String,
    #[serde(skip_serializing)]
    #[ts(skip)]
    pub manager_pin_hash: Option<String>,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// The authenticated user performing an operation, as resolved by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Actor {
    pub user_id: String,
    pub capabilities: Capabilities,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            user_id: user_id.into(),
            capabilities,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tax_rate_from_bps() {
        let rate = TaxRate::from_bps(2100);
        assert_eq!(rate.bps(), 2100);
        assert!(!rate.is_zero());
        assert!(TaxRate::default().is_zero());
    }

    #[test]
    fn test_sale_status_wire_format() {
        let json = serde_json::to_string(&SaleStatus::Voided).unwrap();
        assert_eq!(json, "\"VOIDED\"");
        assert_eq!(SaleStatus::Completed.as_str(), "COMPLETED");

        let auth: VoidAuthorization = serde_json::from_str("\"MANAGER_PIN\"").unwrap();
        assert_eq!(auth, VoidAuthorization::ManagerPin);
    }

    #[test]
    fn test_customer_tax_id_presence() {
        let now = Utc::now();
        let mut customer = Customer {
            id: "c1".into(),
            name: "Acme SA".into(),
            tax_condition: TaxCondition::RegisteredTaxpayer,
            tax_id: Some("   ".into()),
            loyalty_points: 0,
            credit_balance_cents: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        assert!(!customer.has_tax_id());

        customer.tax_id = Some("30-71234567-9".into());
        assert!(customer.has_tax_id());
    }
}
