//! Invoice trigger, manual retry and the background worker.

mod common;

use chrono::Duration;
use common::*;
use tally_core::fiscal::{InvoiceJobStatus, InvoiceStatus};
use tally_core::{InvoiceType, SaleStatus};
use tally_engine::{
    CreateSaleRequest, EngineConfig, ErrorCode, FiscalRejection, TriggerOutcome, VoidSaleRequest,
};

fn with_customer(fx: &Fixture, customer_id: &str) -> CreateSaleRequest {
    let mut request = fx.simple();
    request.customer_id = Some(customer_id.to_string());
    request
}

#[tokio::test]
async fn test_trigger_twice_creates_one_invoice() {
    let fx = Fixture::new().await;
    let sale = fx.engine.create_sale(&fx.cashier, fx.simple()).await.unwrap();
    let trigger = fx.engine.invoice_trigger();

    let first = trigger.trigger(&sale.sale.id, None).await.unwrap();
    let second = trigger.trigger(&sale.sale.id, None).await.unwrap();

    let TriggerOutcome::Issued(invoice) = first else {
        panic!("expected an issued invoice, got {:?}", first);
    };
    assert!(matches!(second, TriggerOutcome::Existing(ref i) if i.id == invoice.id));
    assert_eq!(fx.db.invoices().count_for_sale(&sale.sale.id).await.unwrap(), 1);
    assert_eq!(fx.fiscal.calls(), 1);

    assert_eq!(invoice.invoice_type, InvoiceType::B);
    assert_eq!(invoice.point_of_sale, 3);
    assert_eq!(invoice.invoice_number, Some(1));
    assert!(invoice.cae.is_some());
    assert_eq!(invoice.cae_expiration, Some(start_date() + Duration::days(10)));
    assert_eq!(invoice.total_cents, sale.sale.total_cents);
}

#[tokio::test]
async fn test_numbers_are_sequential_per_type() {
    let fx = Fixture::new().await;
    let trigger = fx.engine.invoice_trigger();

    let mut numbers = Vec::new();
    for _ in 0..3 {
        let sale = fx.engine.create_sale(&fx.cashier, fx.simple()).await.unwrap();
        let outcome = trigger.trigger(&sale.sale.id, None).await.unwrap();
        numbers.push(outcome.invoice().unwrap().invoice_number.unwrap());
    }

    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(fx.db.invoices().last_number(3, InvoiceType::B).await.unwrap(), 3);
    assert_eq!(fx.db.invoices().last_number(3, InvoiceType::A).await.unwrap(), 0);
}

#[tokio::test]
async fn test_registered_customer_gets_invoice_a() {
    let fx = Fixture::new().await;
    let sale = fx
        .engine
        .create_sale(&fx.cashier, with_customer(&fx, &fx.company.id))
        .await
        .unwrap();

    let outcome = fx
        .engine
        .invoice_trigger()
        .trigger(&sale.sale.id, None)
        .await
        .unwrap();

    let invoice = outcome.invoice().unwrap();
    assert_eq!(invoice.invoice_type, InvoiceType::A);
    assert_eq!(invoice.customer_tax_id.as_deref(), Some(COMPANY_TAX_ID));
    let request = &fx.fiscal.requests()[0];
    assert_eq!(request.customer_tax_id.as_deref(), Some(COMPANY_TAX_ID));
    assert_eq!(request.issuer_tax_id.as_deref(), fx.branch.tax_id.as_deref());
}

#[tokio::test]
async fn test_missing_tax_id_fails_without_calling_the_authority() {
    let fx = Fixture::new().await;
    let sale = fx
        .engine
        .create_sale(&fx.cashier, with_customer(&fx, &fx.company_no_id.id))
        .await
        .unwrap();

    let outcome = fx
        .engine
        .invoice_trigger()
        .trigger(&sale.sale.id, None)
        .await
        .unwrap();

    let TriggerOutcome::Failed(invoice) = outcome else {
        panic!("expected a failed invoice, got {:?}", outcome);
    };
    assert_eq!(invoice.status, InvoiceStatus::Failed);
    assert_eq!(invoice.invoice_number, None);
    assert!(invoice.last_error.is_some());
    assert_eq!(fx.fiscal.calls(), 0);
    assert_eq!(fx.db.invoices().last_number(3, InvoiceType::A).await.unwrap(), 0);

    let err = fx
        .engine
        .retry_invoice(&fx.manager, &sale.sale.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingTaxId);
}

#[tokio::test]
async fn test_retryable_rejection_keeps_invoice_pending() {
    let fx = Fixture::new().await;
    let sale = fx.engine.create_sale(&fx.cashier, fx.simple()).await.unwrap();
    fx.fiscal.push_rejection(FiscalRejection::retryable("Service unavailable"));

    let outcome = fx
        .engine
        .invoice_trigger()
        .trigger(&sale.sale.id, None)
        .await
        .unwrap();

    let TriggerOutcome::Pending(invoice) = outcome else {
        panic!("expected a pending invoice, got {:?}", outcome);
    };
    assert_eq!(invoice.retry_count, 1);
    assert_eq!(invoice.last_error.as_deref(), Some("Service unavailable"));

    // The sale itself is untouched by invoicing problems.
    let stored = fx.db.sales().get_by_id(&sale.sale.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SaleStatus::Completed);
}

#[tokio::test]
async fn test_manual_retry_of_rejected_invoice() {
    let fx = Fixture::new().await;
    let sale = fx.engine.create_sale(&fx.cashier, fx.simple()).await.unwrap();
    fx.fiscal.push_rejection(FiscalRejection::permanent("Invalid document"));

    let outcome = fx
        .engine
        .invoice_trigger()
        .trigger(&sale.sale.id, None)
        .await
        .unwrap();
    assert_eq!(outcome.invoice().unwrap().status, InvoiceStatus::Failed);

    let err = fx
        .engine
        .retry_invoice(&fx.cashier, &sale.sale.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PermissionDenied);

    let retried = fx
        .engine
        .retry_invoice(&fx.manager, &sale.sale.id)
        .await
        .unwrap();
    let TriggerOutcome::Issued(invoice) = retried else {
        panic!("expected an issued invoice, got {:?}", retried);
    };
    assert_eq!(invoice.invoice_number, Some(1), "the reserved number is kept");

    let err = fx
        .engine
        .retry_invoice(&fx.manager, &sale.sale.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvoiceAlreadyIssued);
}

#[tokio::test]
async fn test_retry_without_invoice_is_not_found() {
    let fx = Fixture::new().await;
    let sale = fx.engine.create_sale(&fx.cashier, fx.simple()).await.unwrap();

    let err = fx
        .engine
        .retry_invoice(&fx.manager, &sale.sale.id)
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn test_voided_sale_is_not_invoiced() {
    let fx = Fixture::new().await;
    let sale = fx.engine.create_sale(&fx.cashier, fx.simple()).await.unwrap();
    fx.engine
        .void_sale(
            &fx.manager,
            VoidSaleRequest {
                sale_id: sale.sale.id.clone(),
                reason: "Wrong register".to_string(),
                manager_pin: None,
            },
        )
        .await
        .unwrap();

    let outcome = fx
        .engine
        .invoice_trigger()
        .trigger(&sale.sale.id, None)
        .await
        .unwrap();

    assert_eq!(outcome, TriggerOutcome::SaleVoided);
    assert_eq!(fx.fiscal.calls(), 0);

    let (worker, _handle) = fx.engine.invoice_worker();
    assert_eq!(worker.process_due().await.unwrap(), 0);
}

#[tokio::test]
async fn test_clearance_after_void_is_stored_and_needs_credit_note() {
    let fx = Fixture::new().await;
    let sale = fx.engine.create_sale(&fx.cashier, fx.simple()).await.unwrap();
    fx.fiscal.void_during_next_call(fx.db.clone(), &fx.manager.user_id);

    let outcome = fx
        .engine
        .invoice_trigger()
        .trigger(&sale.sale.id, None)
        .await
        .unwrap();

    assert_eq!(outcome, TriggerOutcome::SaleVoided);
    let invoice = fx.db.invoices().find_by_sale(&sale.sale.id).await.unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Cancelled);
    assert_eq!(invoice.cae.as_deref(), Some("74000000000001"));
    assert_eq!(invoice.invoice_number, Some(1));
    assert!(invoice.credit_note_required);

    let stored = fx.db.sales().get_by_id(&sale.sale.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SaleStatus::Voided);
}

#[tokio::test]
async fn test_worker_backs_off_then_issues() {
    let fx = Fixture::new().await;
    let sale = fx.engine.create_sale(&fx.cashier, fx.simple()).await.unwrap();
    fx.fiscal.push_rejection(FiscalRejection::retryable("Timeout"));
    let (worker, _handle) = fx.engine.invoice_worker();

    assert_eq!(worker.process_due().await.unwrap(), 1);
    let job = fx.db.invoice_jobs().get_by_sale(&sale.sale.id).await.unwrap().unwrap();
    assert_eq!(job.status, InvoiceJobStatus::Queued);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.next_attempt_at, start_time() + Duration::seconds(2));

    // Not due yet.
    assert_eq!(worker.process_due().await.unwrap(), 0);

    fx.clock.advance(Duration::seconds(2));
    assert_eq!(worker.process_due().await.unwrap(), 1);

    let job = fx.db.invoice_jobs().get_by_sale(&sale.sale.id).await.unwrap().unwrap();
    assert_eq!(job.status, InvoiceJobStatus::Done);
    let invoice = fx.db.invoices().find_by_sale(&sale.sale.id).await.unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Issued);
    assert_eq!(invoice.invoice_number, Some(1));
    assert_eq!(fx.fiscal.calls(), 2);
}

#[tokio::test]
async fn test_worker_gives_up_after_max_attempts() {
    let mut config = EngineConfig::default();
    config.fiscal.max_attempts = 2;
    let fx = Fixture::with_config(config).await;
    let sale = fx.engine.create_sale(&fx.cashier, fx.simple()).await.unwrap();
    fx.fiscal.push_rejection(FiscalRejection::retryable("Down"));
    fx.fiscal.push_rejection(FiscalRejection::retryable("Still down"));
    let (worker, _handle) = fx.engine.invoice_worker();

    worker.process_due().await.unwrap();
    fx.clock.advance(Duration::seconds(2));
    worker.process_due().await.unwrap();

    let job = fx.db.invoice_jobs().get_by_sale(&sale.sale.id).await.unwrap().unwrap();
    assert_eq!(job.status, InvoiceJobStatus::Failed);
    assert!(job.last_error.unwrap().starts_with("Gave up after 2 attempts"));

    let invoice = fx.db.invoices().find_by_sale(&sale.sale.id).await.unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Pending);

    let retried = fx
        .engine
        .retry_invoice(&fx.manager, &sale.sale.id)
        .await
        .unwrap();
    assert!(matches!(retried, TriggerOutcome::Issued(_)));
}

#[tokio::test]
async fn test_spawned_worker_is_nudged_by_new_sales() {
    let mut config = EngineConfig::default();
    config.fiscal.poll_interval_secs = 3600;
    let fx = Fixture::with_config(config).await;
    let handle = fx.engine.spawn_invoice_worker();

    let sale = fx.engine.create_sale(&fx.cashier, fx.simple()).await.unwrap();

    let mut issued = false;
    for _ in 0..100 {
        let invoice = fx.db.invoices().find_by_sale(&sale.sale.id).await.unwrap();
        if invoice.is_some_and(|i| i.status == InvoiceStatus::Issued) {
            issued = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(issued, "worker did not issue the invoice");

    handle.shutdown().await.unwrap();
}
