//! # Payment Validator
//!
//! Checks a sale's tenders against the configured payment methods and the
//! sale total before anything is written.
//!
//! ```text
//! tenders ──► resolve method ──► reference present? ──► Σ amount ≥ total?
//!               │ unknown/inactive     │ no                  │ no
//!               ▼                      ▼                     ▼
//!       PaymentMethodNotFound   MissingReference     InsufficientPayment
//! ```
//! Overpayment is fine; the difference is reported as change.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::PaymentMethod;
use crate::validation::validate_amount;

/// A tender as presented at the register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Tender {
    pub payment_method_id: String,
    pub amount: Money,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub card_last_four: Option<String>,
    #[serde(default)]
    pub authorization_code: Option<String>,
}

impl Tender {
    fn has_reference(&self) -> bool {
        self.reference
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty())
    }
}

/// A tender matched to its method definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTender<'a> {
    pub tender: &'a Tender,
    pub method: &'a PaymentMethod,
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenderSummary<'a> {
    pub tenders: Vec<ValidatedTender<'a>>,
    pub tendered: Money,
    pub change: Money,
}

/// Validates tenders against the active methods and the sale total.
///
/// `methods` is the set of known payment methods; inactive ones are treated
/// as unknown.
pub fn validate_tenders<'a>(
    tenders: &'a [Tender],
    methods: &'a [PaymentMethod],
    total: Money,
) -> CoreResult<TenderSummary<'a>> {
    let mut validated = Vec::with_capacity(tenders.len());

    for tender in tenders {
        validate_amount("payment amount", tender.amount)?;

        let method = methods
            .iter()
            .find(|m| m.id == tender.payment_method_id && m.is_active)
            .ok_or_else(|| CoreError::PaymentMethodNotFound(tender.payment_method_id.clone()))?;

        if method.requires_reference && !tender.has_reference() {
            return Err(CoreError::MissingReference {
                method: method.code.clone(),
            });
        }

        validated.push(ValidatedTender { tender, method });
    }

    let tendered = tenders
        .iter()
        .try_fold(Money::zero(), |sum, t| sum.checked_add(t.amount))
        .ok_or_else(|| ValidationError::OutOfRange {
            field: "payments".to_string(),
            min: 0,
            max: i64::MAX,
        })?;
    if tendered < total {
        return Err(CoreError::InsufficientPayment {
            required: total,
            tendered,
        });
    }

    Ok(TenderSummary {
        tenders: validated,
        tendered,
        change: tendered - total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(id: &str, code: &str, requires_reference: bool) -> PaymentMethod {
        PaymentMethod {
            id: id.to_string(),
            code: code.to_string(),
            name: code.to_string(),
            requires_reference,
            is_active: true,
        }
    }

    fn tender(method_id: &str, cents: i64, reference: Option<&str>) -> Tender {
        Tender {
            payment_method_id: method_id.to_string(),
            amount: Money::from_cents(cents),
            reference: reference.map(str::to_string),
            card_last_four: None,
            authorization_code: None,
        }
    }

    #[test]
    fn test_single_cash_short_of_total() {
        let methods = vec![method("cash", "CASH", false)];
        let tenders = vec![tender("cash", 20000, None)];

        let err = validate_tenders(&tenders, &methods, Money::from_cents(22500)).unwrap_err();
        match err {
            CoreError::InsufficientPayment { required, tendered } => {
                assert_eq!(required.cents(), 22500);
                assert_eq!(tendered.cents(), 20000);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_split_tender_with_change() {
        let methods = vec![method("cash", "CASH", false), method("card", "CARD", true)];
        let tenders = vec![
            tender("card", 20000, Some("AUTH-991")),
            tender("cash", 3000, None),
        ];

        let summary = validate_tenders(&tenders, &methods, Money::from_cents(22500)).unwrap();
        assert_eq!(summary.tendered.cents(), 23000);
        assert_eq!(summary.change.cents(), 500);
        assert_eq!(summary.tenders[0].method.code, "CARD");
        assert_eq!(
            summary.tenders[1],
            ValidatedTender {
                tender: &tenders[1],
                method: &methods[0],
            }
        );
    }

    #[test]
    fn test_reference_required() {
        let methods = vec![method("card", "CARD", true)];

        let missing = vec![tender("card", 100, None)];
        assert!(matches!(
            validate_tenders(&missing, &methods, Money::from_cents(100)),
            Err(CoreError::MissingReference { method }) if method == "CARD"
        ));

        let blank = vec![tender("card", 100, Some("   "))];
        assert!(matches!(
            validate_tenders(&blank, &methods, Money::from_cents(100)),
            Err(CoreError::MissingReference { .. })
        ));
    }

    #[test]
    fn test_unknown_and_inactive_methods() {
        let mut inactive = method("old", "CHEQUE", false);
        inactive.is_active = false;
        let methods = vec![inactive];

        assert!(matches!(
            validate_tenders(&[tender("old", 100, None)], &methods, Money::zero()),
            Err(CoreError::PaymentMethodNotFound(id)) if id == "old"
        ));
        assert!(matches!(
            validate_tenders(&[tender("nope", 100, None)], &methods, Money::zero()),
            Err(CoreError::PaymentMethodNotFound(_))
        ));
    }

    #[test]
    fn test_negative_tender_rejected() {
        let methods = vec![method("cash", "CASH", false)];
        assert!(matches!(
            validate_tenders(&[tender("cash", -1, None)], &methods, Money::zero()),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_oversized_tender_rejected() {
        let methods = vec![method("cash", "CASH", false)];
        let tenders = vec![tender("cash", i64::MAX, None), tender("cash", i64::MAX, None)];
        assert!(matches!(
            validate_tenders(&tenders, &methods, Money::zero()),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_zero_total_needs_no_tender() {
        let summary = validate_tenders(&[], &[], Money::zero()).unwrap();
        assert!(summary.change.is_zero());
    }
}
