//! Sale creation against a seeded in-memory database.

mod common;

use common::*;
use tally_core::fiscal::InvoiceJobStatus;
use tally_core::payment::Tender;
use tally_core::{
    CreditTransactionType, InvoiceType, LoyaltyTransactionType, Money, SaleStatus,
    StockMovementType,
};
use tally_engine::sale::SALE_REFERENCE;
use tally_engine::{CreateSaleRequest, EngineConfig, ErrorCode, SaleEvent};

#[tokio::test]
async fn test_scenario_sale_commits_every_row() {
    let mut fx = Fixture::new().await;

    let created = fx
        .engine
        .create_sale(&fx.cashier, fx.scenario(22_500))
        .await
        .unwrap();
    let sale = &created.sale;

    assert_eq!(sale.status, SaleStatus::Completed);
    assert_eq!(sale.subtotal_cents, 25_000);
    assert_eq!(sale.tax_cents, 4_521);
    assert_eq!(sale.discount_cents, 2_500);
    assert_eq!(sale.total_cents, 22_500);
    assert_eq!(sale.business_date, start_date());
    assert_eq!(sale.points_earned, 0, "no customer, no points");
    assert_eq!(created.change, Money::zero());
    assert!(!created.replayed);

    // total = subtotal − discount − points value − credit used
    assert_eq!(
        sale.total(),
        sale.subtotal() - sale.discount() - sale.points_redemption_value() - sale.credit_used()
    );

    let items = fx.db.sales().get_items(&sale.id).await.unwrap();
    let line_sum: i64 = items.iter().map(|i| i.line_total_cents).sum();
    assert_eq!(items.len(), 2);
    assert_eq!(line_sum, sale.subtotal_cents);

    let payments = fx.db.sales().get_payments(&sale.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].method_code, "CASH");
    assert_eq!(payments[0].amount_cents, 22_500);

    let movements = fx
        .db
        .stock()
        .movements_for_reference(SALE_REFERENCE, &sale.id)
        .await
        .unwrap();
    assert_eq!(movements.len(), 2, "one movement per item");
    for movement in &movements {
        let item = items
            .iter()
            .find(|i| i.product_id == movement.product_id)
            .unwrap();
        assert_eq!(movement.movement_type, StockMovementType::Sale);
        assert_eq!(movement.quantity, -item.quantity);
        assert_eq!(movement.quantity_after, movement.quantity_before - item.quantity);

        let live = fx
            .db
            .stock()
            .quantity(&fx.branch.id, &movement.product_id)
            .await
            .unwrap();
        assert_eq!(live, movement.quantity_after);
    }
    assert_eq!(fx.stock(&fx.incl).await, INCL_STOCK - 2);
    assert_eq!(fx.stock(&fx.excl).await, EXCL_STOCK - 1);

    let job = fx.db.invoice_jobs().get_by_sale(&sale.id).await.unwrap().unwrap();
    assert_eq!(job.status, InvoiceJobStatus::Queued);

    let events = fx.drain_events();
    let channels: Vec<&str> = events.iter().map(|e| e.channel.as_str()).collect();
    assert!(channels.contains(&format!("branch:{}", fx.branch.id).as_str()));
    assert!(channels.contains(&format!("user:{}", fx.cashier.user_id).as_str()));
    assert!(events
        .iter()
        .all(|e| matches!(&e.event, SaleEvent::SaleCreated { sale_id, .. } if *sale_id == sale.id)));
}

#[tokio::test]
async fn test_insufficient_payment_writes_nothing() {
    let mut fx = Fixture::new().await;

    let err = fx
        .engine
        .create_sale(&fx.cashier, fx.scenario(20_000))
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::InsufficientPayment);
    assert_eq!(fx.db.sales().count().await.unwrap(), 0);
    assert_eq!(fx.stock(&fx.incl).await, INCL_STOCK);
    assert_eq!(fx.stock(&fx.excl).await, EXCL_STOCK);
    assert_eq!(fx.db.stock().movements(&fx.branch.id, &fx.incl.id).await.unwrap().len(), 1);
    assert_eq!(fx.db.invoice_jobs().count_pending().await.unwrap(), 0);
    assert!(fx.drain_events().is_empty());
}

#[tokio::test]
async fn test_overpayment_returns_change() {
    let fx = Fixture::new().await;

    let created = fx
        .engine
        .create_sale(&fx.cashier, fx.scenario(30_000))
        .await
        .unwrap();

    assert_eq!(created.change, Money::from_cents(7_500));
}

#[tokio::test]
async fn test_split_tender_with_card_reference() {
    let fx = Fixture::new().await;
    let mut request = fx.scenario(10_000);
    request.payments.push(Tender {
        payment_method_id: fx.card.id.clone(),
        amount: Money::from_cents(12_500),
        reference: Some("POS-889231".to_string()),
        card_last_four: Some("4242".to_string()),
        authorization_code: Some("A1B2C3".to_string()),
    });

    let created = fx.engine.create_sale(&fx.cashier, request).await.unwrap();

    assert_eq!(created.payments.len(), 2);
    assert_eq!(created.change, Money::zero());
    let card = created.payments.iter().find(|p| p.method_code == "CARD").unwrap();
    assert_eq!(card.card_last_four.as_deref(), Some("4242"));
}

#[tokio::test]
async fn test_card_without_reference_is_rejected() {
    let fx = Fixture::new().await;
    let mut request = fx.scenario(0);
    request.payments = vec![Tender {
        payment_method_id: fx.card.id.clone(),
        amount: Money::from_cents(22_500),
        reference: Some("   ".to_string()),
        card_last_four: None,
        authorization_code: None,
    }];

    let err = fx.engine.create_sale(&fx.cashier, request).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::MissingReference);
    assert_eq!(fx.db.sales().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_closed_session_is_rejected() {
    let fx = Fixture::new().await;
    fx.db.sessions().close(&fx.session.id, start_time()).await.unwrap();

    let err = fx.engine.create_sale(&fx.cashier, fx.simple()).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::SessionNotOpen);
}

#[tokio::test]
async fn test_insufficient_stock_rolls_back_earlier_lines() {
    let fx = Fixture::new().await;
    let request = CreateSaleRequest {
        session_id: fx.session.id.clone(),
        items: vec![fx.line(&fx.incl, 1), fx.line(&fx.scarce, 2)],
        payments: vec![fx.cash(12_000)],
        ..Default::default()
    };

    let err = fx.engine.create_sale(&fx.cashier, request).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::InsufficientStock);
    assert!(err.message.contains("SCARCE-10"));
    assert_eq!(fx.stock(&fx.incl).await, INCL_STOCK);
    assert_eq!(fx.stock(&fx.scarce).await, SCARCE_STOCK);
    assert_eq!(fx.db.sales().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_customer_points_and_credit_are_ledgered() {
    let fx = Fixture::new().await;
    let mut request = fx.scenario(11_000);
    request.customer_id = Some(fx.member.id.clone());
    request.points_redeemed = 100;
    request.credit_used = Money::from_cents(2_000);
    request.change_as_credit = Money::from_cents(500);

    let created = fx.engine.create_sale(&fx.cashier, request).await.unwrap();
    let sale = &created.sale;

    // 225.00 − 100 points × 1.00 − 20.00 credit
    assert_eq!(sale.points_redemption_value_cents, 10_000);
    assert_eq!(sale.total_cents, 10_500);
    assert_eq!(sale.points_earned, 1);
    assert_eq!(created.change, Money::from_cents(500));

    assert_eq!(fx.points(&fx.member).await, MEMBER_POINTS - 100 + 1);
    assert_eq!(
        fx.credit(&fx.member).await,
        Money::from_cents(MEMBER_CREDIT_CENTS - 2_000 + 500)
    );

    let points = fx.db.loyalty().for_sale(&sale.id).await.unwrap();
    let kinds: Vec<_> = points.iter().map(|t| t.transaction_type).collect();
    assert_eq!(kinds, vec![LoyaltyTransactionType::Redeem, LoyaltyTransactionType::Earn]);

    let credit = fx.db.credit().for_sale(&sale.id).await.unwrap();
    let kinds: Vec<_> = credit.iter().map(|t| t.transaction_type).collect();
    assert_eq!(kinds, vec![CreditTransactionType::Debit, CreditTransactionType::Credit]);

    assert_eq!(
        fx.db.loyalty().ledger_sum(&fx.member.id).await.unwrap(),
        fx.points(&fx.member).await
    );
    assert_eq!(
        fx.db.credit().ledger_sum(&fx.member.id).await.unwrap(),
        fx.credit(&fx.member).await
    );
}

#[tokio::test]
async fn test_redeeming_more_points_than_held_is_rejected() {
    let fx = Fixture::new().await;
    let mut request = fx.scenario(22_500);
    request.customer_id = Some(fx.member.id.clone());
    request.points_redeemed = MEMBER_POINTS + 1;

    let err = fx.engine.create_sale(&fx.cashier, request).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::InsufficientLoyaltyPoints);
    assert_eq!(fx.points(&fx.member).await, MEMBER_POINTS);
}

#[tokio::test]
async fn test_spending_more_credit_than_held_is_rejected() {
    let fx = Fixture::new().await;
    let mut request = fx.simple();
    request.customer_id = Some(fx.member.id.clone());
    // More than both the balance and the 100.00 total.
    request.credit_used = Money::from_cents(MEMBER_CREDIT_CENTS + 1);

    let err = fx.engine.create_sale(&fx.cashier, request).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::InsufficientStoreCredit);
    assert_eq!(fx.credit(&fx.member).await, Money::from_cents(MEMBER_CREDIT_CENTS));
}

#[tokio::test]
async fn test_oversized_unit_price_is_a_validation_error() {
    let fx = Fixture::new().await;
    let mut request = fx.simple();
    request.items[0].quantity = 2;
    request.items[0].unit_price = Some(Money::from_cents(i64::MAX / 2 + 1));

    let err = fx.engine.create_sale(&fx.cashier, request).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::ValidationError);
    assert_eq!(fx.stock(&fx.incl).await, INCL_STOCK);
}

#[tokio::test]
async fn test_points_need_a_customer() {
    let fx = Fixture::new().await;
    let mut request = fx.scenario(22_500);
    request.points_redeemed = 10;

    let err = fx.engine.create_sale(&fx.cashier, request).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::ValidationError);
}

#[tokio::test]
async fn test_change_as_credit_cannot_exceed_change() {
    let fx = Fixture::new().await;
    let mut request = fx.scenario(23_000);
    request.customer_id = Some(fx.member.id.clone());
    request.change_as_credit = Money::from_cents(1_000);

    let err = fx.engine.create_sale(&fx.cashier, request).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::ValidationError);
}

#[tokio::test]
async fn test_unknown_product_is_not_found() {
    let fx = Fixture::new().await;
    let mut request = fx.simple();
    request.items[0].product_id = tally_db::repository::new_id();

    let err = fx.engine.create_sale(&fx.cashier, request).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn test_offline_sale_is_replayed_once() {
    let fx = Fixture::new().await;
    let mut request = fx.simple();
    request.local_id = Some("REG-01-000042".to_string());
    request.payments = vec![fx.cash(12_000)];

    let first = fx.engine.create_sale(&fx.cashier, request.clone()).await.unwrap();
    let second = fx.engine.create_sale(&fx.cashier, request).await.unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.sale.id, second.sale.id);
    assert_eq!(second.change, Money::from_cents(2_000));
    assert_eq!(second.items.len(), 1);
    assert_eq!(fx.db.sales().count().await.unwrap(), 1);
    assert_eq!(fx.stock(&fx.incl).await, INCL_STOCK - 1);
}

#[tokio::test]
async fn test_forced_invoice_a_needs_a_tax_id() {
    let fx = Fixture::new().await;
    let mut request = fx.simple();
    request.customer_id = Some(fx.member.id.clone());
    request.invoice_type = Some(InvoiceType::A);

    let err = fx.engine.create_sale(&fx.cashier, request).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::MissingTaxId);
    assert_eq!(fx.db.sales().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_no_invoice_job_when_fiscal_is_disabled() {
    let mut config = EngineConfig::default();
    config.fiscal.enabled = false;
    let fx = Fixture::with_config(config).await;

    let created = fx.engine.create_sale(&fx.cashier, fx.simple()).await.unwrap();

    assert!(fx
        .db
        .invoice_jobs()
        .get_by_sale(&created.sale.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_receipt_reflects_the_sale() {
    let fx = Fixture::new().await;
    let created = fx
        .engine
        .create_sale(&fx.cashier, fx.scenario(25_000))
        .await
        .unwrap();

    let receipt = fx.engine.receipt(&created.sale.id).await.unwrap();

    assert_eq!(receipt.status, SaleStatus::Completed);
    assert_eq!(receipt.lines.len(), 2);
    assert_eq!(receipt.lines[0].sku, "INCL-100");
    assert_eq!(receipt.subtotal, Money::from_cents(25_000));
    assert_eq!(receipt.tax, Money::from_cents(4_521));
    assert_eq!(receipt.total, Money::from_cents(22_500));
    assert_eq!(receipt.tendered, Money::from_cents(25_000));
    assert_eq!(receipt.change, Money::from_cents(2_500));
    assert!(receipt.invoice.is_none());
}
