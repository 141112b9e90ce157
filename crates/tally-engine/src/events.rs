//! # Domain Events
//!
//! Notifications published after a sale or a void commits.
//!
//! ## Channels
//! ```text
//! SaleCreated / SaleVoided
//!        │
//!        ├──► branch:{branch_id}   dashboards, supervisors
//!        └──► user:{created_by}    the cashier who rang the sale
//! ```
//!
//! Publishing happens after commit and is best-effort: a failing publisher
//! is logged and never undoes the sale. [`BroadcastPublisher`] fans events
//! out in-process over a tokio broadcast channel; websocket or message-bus
//! bridges subscribe to it or implement [`EventPublisher`] directly.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tally_core::{Money, VoidAuthorization};
use tokio::sync::broadcast;
use tracing::debug;
use ts_rs::TS;

use crate::error::{EngineError, EngineResult};

/// A committed change to a sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleEvent {
    #[serde(rename_all = "camelCase")]
    SaleCreated {
        sale_id: String,
        branch_id: String,
        created_by: String,
        customer_id: Option<String>,
        total: Money,
        #[ts(as = "String")]
        business_date: NaiveDate,
        #[ts(as = "String")]
        at: DateTime<Utc>,
    },

    /// Carries the voided amount so subscribers can alert on large voids.
    #[serde(rename_all = "camelCase")]
    SaleVoided {
        sale_id: String,
        branch_id: String,
        created_by: String,
        voided_by: String,
        approved_by: Option<String>,
        authorization: VoidAuthorization,
        reason: String,
        amount: Money,
        credit_note_required: bool,
        #[ts(as = "String")]
        at: DateTime<Utc>,
    },
}

impl SaleEvent {
    pub fn sale_id(&self) -> &str {
        match self {
            SaleEvent::SaleCreated { sale_id, .. } | SaleEvent::SaleVoided { sale_id, .. } => {
                sale_id
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SaleEvent::SaleCreated { .. } => "SALE_CREATED",
            SaleEvent::SaleVoided { .. } => "SALE_VOIDED",
        }
    }

    /// Channels the event is delivered on.
    pub fn channels(&self) -> Vec<String> {
        let (branch_id, owner) = match self {
            SaleEvent::SaleCreated {
                branch_id,
                created_by,
                ..
            }
            | SaleEvent::SaleVoided {
                branch_id,
                created_by,
                ..
            } => (branch_id, created_by),
        };
        vec![format!("branch:{}", branch_id), format!("user:{}", owner)]
    }

    /// JSON payload as sent to external subscribers.
    pub fn to_json(&self) -> EngineResult<String> {
        serde_json::to_string(self)
            .map_err(|e| EngineError::internal(format!("Failed to serialize event: {}", e)))
    }
}

/// An event addressed to one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub channel: String,
    pub event: SaleEvent,
}

/// Sink for domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, channel: &str, event: &SaleEvent) -> EngineResult<()>;
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, _channel: &str, _event: &SaleEvent) -> EngineResult<()> {
        Ok(())
    }
}

/// In-process fan-out over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<Envelope>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        BroadcastPublisher { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, channel: &str, event: &SaleEvent) -> EngineResult<()> {
        let envelope = Envelope {
            channel: channel.to_string(),
            event: event.clone(),
        };

        // No subscribers is not an error.
        if self.tx.send(envelope).is_err() {
            debug!(channel, event = event.name(), "No event subscribers");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn created() -> SaleEvent {
        SaleEvent::SaleCreated {
            sale_id: "s1".to_string(),
            branch_id: "b1".to_string(),
            created_by: "u1".to_string(),
            customer_id: None,
            total: Money::from_cents(22500),
            business_date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            at: Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_channels_are_branch_and_owner_scoped() {
        assert_eq!(created().channels(), vec!["branch:b1", "user:u1"]);
    }

    #[test]
    fn test_payload_is_tagged() {
        let json: serde_json::Value = serde_json::from_str(&created().to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "SALE_CREATED");
        assert_eq!(json["saleId"], "s1");
        assert_eq!(json["total"], 22500);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();

        publisher.publish("branch:b1", &created()).await.unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.channel, "branch:b1");
        assert_eq!(envelope.event.sale_id(), "s1");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let publisher = BroadcastPublisher::new(8);
        assert!(publisher.publish("branch:b1", &created()).await.is_ok());
    }
}
