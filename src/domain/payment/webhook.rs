use chrono::{DateTime, Utc};
use derive_more::{Deref, Display, Error, From};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{serde_as, DisplayFromStr};

use crate::domain::{hashed_id, Aggregation, Entity, Event, EventQueue, Id};

/// Webhook ID, derived from the processor's event id.
#[serde_as]
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Deref, Default,
)]
pub struct WebhookId(#[serde_as(as = "DisplayFromStr")] u64);

impl WebhookId {
    pub fn from_event_id(event_id: &str) -> Self {
        hashed_id(event_id)
    }
}

impl Id for WebhookId {
    type Inner = u64;
}

/// Body of a processor notification. Only the fields routing needs are
/// typed, the object stays raw JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebhookData {
    pub object: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WebhookStatus {
    #[default]
    Received,
    Processed,
    Failed {
        message: String,
    },
}

/// Webhookイベント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StripeWebhookEvent {
    WebhookReceived {
        id: WebhookId,
        event_id: String,
        event_type: String,
        payload: String,
        received_at: DateTime<Utc>,
    },
    WebhookProcessed {
        id: WebhookId,
        processed_at: DateTime<Utc>,
    },
    WebhookFailed {
        id: WebhookId,
        message: String,
        failed_at: DateTime<Utc>,
    },
}

impl Event for StripeWebhookEvent {
    type Id = WebhookId;
}

/// Delivery log of one processor event.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StripeWebhook {
    id: WebhookId,
    event_id: String,
    event_type: String,
    payload: String,
    received_at: DateTime<Utc>,
    status: WebhookStatus,
    #[serde(skip)]
    events: EventQueue<StripeWebhookEvent>,
}

impl StripeWebhook {
    pub fn receive(
        event_id: String,
        event_type: String,
        payload: String,
        received_at: DateTime<Utc>,
    ) -> Result<Self, StripeWebhookError> {
        let mut entity = StripeWebhook::default();
        entity.record(StripeWebhookEvent::WebhookReceived {
            id: WebhookId::from_event_id(&event_id),
            event_id,
            event_type,
            payload,
            received_at,
        })?;
        Ok(entity)
    }

    pub fn mark_processed(&mut self, processed_at: DateTime<Utc>) -> Result<(), StripeWebhookError> {
        self.record(StripeWebhookEvent::WebhookProcessed {
            id: self.id,
            processed_at,
        })
    }

    pub fn mark_failed(
        &mut self,
        message: String,
        failed_at: DateTime<Utc>,
    ) -> Result<(), StripeWebhookError> {
        self.record(StripeWebhookEvent::WebhookFailed {
            id: self.id,
            message,
            failed_at,
        })
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn status(&self) -> &WebhookStatus {
        &self.status
    }

    pub fn is_processed(&self) -> bool {
        self.status == WebhookStatus::Processed
    }

    fn validate_pending(&self, id: &WebhookId) -> Result<(), StripeWebhookError> {
        if self.event_id.is_empty() || self.id != *id {
            return Err(StripeWebhookError::MismatchedId);
        }
        match self.is_processed() {
            true => Err(StripeWebhookError::AlreadyProcessed),
            false => Ok(()),
        }
    }
}

impl Entity for StripeWebhook {
    type Id = WebhookId;

    const ENTITY_NAME: &'static str = "stripe_webhook";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for StripeWebhook {
    type Event = StripeWebhookEvent;
    type Error = StripeWebhookError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            StripeWebhookEvent::WebhookReceived {
                id,
                event_id,
                event_type,
                ..
            } => {
                if !self.event_id.is_empty() {
                    return Err(StripeWebhookError::AlreadyReceived);
                }
                if event_id.is_empty() || event_type.is_empty() {
                    return Err(StripeWebhookError::MissingEventId);
                }
                match WebhookId::from_event_id(event_id) == *id {
                    true => Ok(()),
                    false => Err(StripeWebhookError::MismatchedId),
                }
            }
            StripeWebhookEvent::WebhookProcessed { id, .. }
            | StripeWebhookEvent::WebhookFailed { id, .. } => self.validate_pending(id),
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            StripeWebhookEvent::WebhookReceived {
                id,
                event_id,
                event_type,
                payload,
                received_at,
            } => {
                self.id = id;
                self.event_id = event_id;
                self.event_type = event_type;
                self.payload = payload;
                self.received_at = received_at;
                self.status = WebhookStatus::Received;
            }
            StripeWebhookEvent::WebhookProcessed { .. } => self.status = WebhookStatus::Processed,
            StripeWebhookEvent::WebhookFailed { message, .. } => {
                self.status = WebhookStatus::Failed { message }
            }
        }
    }

    fn events(&self) -> &EventQueue<Self::Event> {
        &self.events
    }

    fn events_mut(&mut self) -> &mut EventQueue<Self::Event> {
        &mut self.events
    }
}

#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum StripeWebhookError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Event id and type are required")]
    MissingEventId,
    #[display(fmt = "Webhook already received")]
    AlreadyReceived,
    #[display(fmt = "Webhook already processed")]
    AlreadyProcessed,
}
