//! # Invoice Worker
//!
//! Drains the `invoice_jobs` queue in the background.
//!
//! ## How It Works
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Invoice Worker Flow                                  │
//! │                                                                         │
//! │  create_sale commits ──► invoice_jobs row (QUEUED, due now)            │
//! │         │                                                               │
//! │         └── nudge ──┐        interval tick ──┐                         │
//! │                     ▼                        ▼                          │
//! │               ┌─────────────────────────────────────┐                  │
//! │               │ get_due(now, batch_size)            │                  │
//! │               │   for each job: InvoiceTrigger      │                  │
//! │               └──────────────┬──────────────────────┘                  │
//! │                              │                                          │
//! │        ┌─────────────────────┼─────────────────────────┐               │
//! │        ▼                     ▼                         ▼                │
//! │  settled (issued,      retryable / error          attempts exhausted   │
//! │  failed, voided)       reschedule with            job FAILED, invoice  │
//! │  job DONE              exponential backoff        left for manual retry│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The fiscal call can block for as long as the authority takes; sales are
//! never waiting on it.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tally_core::fiscal::InvoiceJob;
use tally_db::Database;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::FiscalSettings;
use crate::error::{EngineError, EngineResult};
use crate::invoice::{InvoiceTrigger, TriggerOutcome};

/// Delay before the next attempt after `failures` failed attempts.
///
/// `initial_backoff_ms` doubles per failure and is capped at
/// `max_backoff_secs`.
pub fn backoff_delay(failures: u32, initial_backoff_ms: u64, max_backoff_secs: u64) -> Duration {
    let exponent = failures.saturating_sub(1).min(32);
    let millis = initial_backoff_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(millis.min(max_backoff_secs.saturating_mul(1000)))
}

/// Background task that issues queued invoices.
pub struct InvoiceWorker {
    trigger: InvoiceTrigger,
    db: Database,
    clock: Arc<dyn Clock>,
    settings: FiscalSettings,
    wake: Arc<Notify>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling the invoice worker.
#[derive(Clone)]
pub struct InvoiceWorkerHandle {
    wake: Arc<Notify>,
    shutdown_tx: mpsc::Sender<()>,
}

impl InvoiceWorkerHandle {
    /// Wakes the worker before its next tick.
    pub fn nudge(&self) {
        self.wake.notify_one();
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EngineError::internal("Invoice worker already stopped"))
    }
}

impl InvoiceWorker {
    /// Creates a worker and its handle. `wake` is shared with the engine so
    /// committed sales can nudge the worker.
    pub fn new(
        trigger: InvoiceTrigger,
        db: Database,
        clock: Arc<dyn Clock>,
        settings: FiscalSettings,
        wake: Arc<Notify>,
    ) -> (Self, InvoiceWorkerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let handle = InvoiceWorkerHandle {
            wake: Arc::clone(&wake),
            shutdown_tx,
        };

        let worker = InvoiceWorker {
            trigger,
            db,
            clock,
            settings,
            wake,
            shutdown_rx,
        };

        (worker, handle)
    }

    /// Runs the worker loop until shutdown.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!(
            poll_interval_secs = self.settings.poll_interval_secs,
            "Invoice worker starting"
        );

        let mut interval = tokio::time::interval(self.settings.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.process_due().await {
                        error!(?e, "Failed to process invoice jobs");
                    }
                }

                _ = self.wake.notified() => {
                    if let Err(e) = self.process_due().await {
                        error!(?e, "Failed to process invoice jobs");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Invoice worker shutting down");
                    break;
                }
            }
        }

        info!("Invoice worker stopped");
    }

    /// Processes one batch of due jobs. Returns how many were looked at.
    pub async fn process_due(&self) -> EngineResult<usize> {
        let now = self.clock.now();
        let jobs = self
            .db
            .invoice_jobs()
            .get_due(now, self.settings.batch_size)
            .await?;

        if jobs.is_empty() {
            debug!("No due invoice jobs");
            return Ok(0);
        }

        info!(count = jobs.len(), "Processing invoice jobs");

        for job in &jobs {
            if let Err(e) = self.process_job(job).await {
                error!(?e, job_id = %job.id, sale_id = %job.sale_id, "Invoice job bookkeeping failed");
            }
        }

        Ok(jobs.len())
    }

    async fn process_job(&self, job: &InvoiceJob) -> EngineResult<()> {
        let jobs = self.db.invoice_jobs();

        let error = match self.trigger.process(&job.sale_id, job.invoice_type).await {
            Ok(TriggerOutcome::Pending(invoice)) => invoice
                .last_error
                .unwrap_or_else(|| "Retryable fiscal rejection".to_string()),
            Ok(outcome) => {
                jobs.mark_done(&job.id, self.clock.now()).await?;
                debug!(job_id = %job.id, sale_id = %job.sale_id, outcome = outcome.label(), "Invoice job done");
                return Ok(());
            }
            Err(e) => {
                warn!(?e, job_id = %job.id, sale_id = %job.sale_id, "Invoice attempt failed");
                e.to_string()
            }
        };

        let now = self.clock.now();
        let failures = u32::try_from(job.attempts + 1).unwrap_or(u32::MAX);

        if failures >= self.settings.max_attempts {
            let reason = format!("Gave up after {} attempts: {}", failures, error);
            jobs.mark_failed(&job.id, &reason, now).await?;
            error!(
                job_id = %job.id,
                sale_id = %job.sale_id,
                attempts = failures,
                "Invoice job abandoned; invoice needs a manual retry"
            );
            return Ok(());
        }

        let next_attempt_at = self.next_attempt_at(now, failures);
        jobs.reschedule(&job.id, &error, next_attempt_at, now).await?;
        debug!(
            job_id = %job.id,
            sale_id = %job.sale_id,
            attempts = failures,
            next_attempt_at = %next_attempt_at,
            "Invoice job rescheduled"
        );

        Ok(())
    }

    fn next_attempt_at(&self, now: DateTime<Utc>, failures: u32) -> DateTime<Utc> {
        let delay = backoff_delay(
            failures,
            self.settings.initial_backoff_ms,
            self.settings.max_backoff_secs,
        );
        let delay = chrono::Duration::from_std(delay)
            .unwrap_or_else(|_| chrono::Duration::seconds(self.settings.max_backoff_secs as i64));
        now + delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_failure() {
        assert_eq!(backoff_delay(1, 2000, 900), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, 2000, 900), Duration::from_secs(4));
        assert_eq!(backoff_delay(4, 2000, 900), Duration::from_secs(16));
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff_delay(10, 2000, 900), Duration::from_secs(900));
        assert_eq!(backoff_delay(u32::MAX, 2000, 900), Duration::from_secs(900));
    }

    #[test]
    fn test_zeroth_failure_uses_initial_delay() {
        assert_eq!(backoff_delay(0, 500, 60), Duration::from_millis(500));
    }
}
