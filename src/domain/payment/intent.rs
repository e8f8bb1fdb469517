use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

use crate::domain::{
    core::{Money, PaymentStatus, ReservationId},
    Aggregation, Entity, Event, EventQueue,
};

/// Payment intent status as reported by the processor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    #[default]
    RequiresPaymentMethod,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl IntentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentStatus::Succeeded | IntentStatus::Canceled)
    }

    /// Status the reservation's payment takes when the intent reaches `self`.
    pub fn payment_status(&self) -> PaymentStatus {
        match self {
            IntentStatus::RequiresPaymentMethod | IntentStatus::Canceled => PaymentStatus::Pending,
            IntentStatus::Processing => PaymentStatus::Processing,
            IntentStatus::Succeeded => PaymentStatus::Paid,
            IntentStatus::Failed => PaymentStatus::Failed,
        }
    }
}

/// Stripe決済イベント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StripePaymentEvent {
    PaymentIntentCreated {
        id: ReservationId,
        intent_id: String,
        client_secret: String,
        amount: Money,
        application_fee: Money,
        destination: String,
    },
    PaymentIntentStatusChanged {
        id: ReservationId,
        status: IntentStatus,
        message: Option<String>,
    },
}

impl Event for StripePaymentEvent {
    type Id = ReservationId;
}

/// Payment intent charged for one reservation.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StripePayment {
    id: ReservationId,
    intent_id: String,
    client_secret: String,
    amount: Money,
    application_fee: Money,
    destination: String,
    status: IntentStatus,
    message: Option<String>,
    #[serde(skip)]
    events: EventQueue<StripePaymentEvent>,
}

impl StripePayment {
    /// Records a new intent. A canceled intent may be replaced.
    pub fn create_intent(
        &mut self,
        id: ReservationId,
        intent_id: String,
        client_secret: String,
        amount: Money,
        application_fee: Money,
        destination: String,
    ) -> Result<(), StripePaymentError> {
        self.record(StripePaymentEvent::PaymentIntentCreated {
            id,
            intent_id,
            client_secret,
            amount,
            application_fee,
            destination,
        })
    }

    /// Returns `false` when the intent is already in `status`.
    pub fn change_status(
        &mut self,
        status: IntentStatus,
        message: Option<String>,
    ) -> Result<bool, StripePaymentError> {
        if self.status == status {
            return Ok(false);
        }
        self.record(StripePaymentEvent::PaymentIntentStatusChanged {
            id: self.id,
            status,
            message,
        })?;
        Ok(true)
    }

    pub fn intent_id(&self) -> &str {
        &self.intent_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn application_fee(&self) -> Money {
        self.application_fee
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn status(&self) -> IntentStatus {
        self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_created(&self) -> bool {
        !self.intent_id.is_empty()
    }

    /// An intent the booker can still pay.
    pub fn is_open(&self) -> bool {
        self.is_created() && !self.status.is_terminal()
    }
}

impl Entity for StripePayment {
    type Id = ReservationId;

    const ENTITY_NAME: &'static str = "stripe_payment";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for StripePayment {
    type Event = StripePaymentEvent;
    type Error = StripePaymentError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            StripePaymentEvent::PaymentIntentCreated {
                id,
                intent_id,
                amount,
                application_fee,
                ..
            } => {
                if self.is_created() && (self.id != *id || self.status != IntentStatus::Canceled) {
                    return Err(StripePaymentError::IntentExists);
                }
                if !intent_id.starts_with("pi_") {
                    return Err(StripePaymentError::InvalidIntentId);
                }
                if !amount.is_positive()
                    || application_fee.amount() < 0
                    || application_fee.currency() != amount.currency()
                    || application_fee.amount() > amount.amount()
                {
                    return Err(StripePaymentError::InvalidAmount);
                }
                Ok(())
            }
            StripePaymentEvent::PaymentIntentStatusChanged { id, .. } => {
                if !self.is_created() || self.id != *id {
                    return Err(StripePaymentError::MismatchedId);
                }
                match self.status.is_terminal() {
                    true => Err(StripePaymentError::IntentClosed),
                    false => Ok(()),
                }
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            StripePaymentEvent::PaymentIntentCreated {
                id,
                intent_id,
                client_secret,
                amount,
                application_fee,
                destination,
            } => {
                self.id = id;
                self.intent_id = intent_id;
                self.client_secret = client_secret;
                self.amount = amount;
                self.application_fee = application_fee;
                self.destination = destination;
                self.status = IntentStatus::RequiresPaymentMethod;
                self.message = None;
            }
            StripePaymentEvent::PaymentIntentStatusChanged {
                status, message, ..
            } => {
                self.status = status;
                self.message = message;
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
pub enum StripePaymentError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "A payment intent already exists for this reservation")]
    IntentExists,
    #[display(fmt = "Invalid payment intent id")]
    InvalidIntentId,
    #[display(fmt = "Invalid payment amount")]
    InvalidAmount,
    #[display(fmt = "Payment intent is closed")]
    IntentClosed,
}
