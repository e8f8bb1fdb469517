mod account;
mod gateway;
mod intent;
mod signature;
mod webhook;

pub use self::account::*;
pub use self::gateway::*;
pub use self::intent::*;
pub use self::signature::*;
pub use self::webhook::*;

/// Events of the payment processor integration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentEvent {
    StripeAccountEvent(StripeAccountEvent),
    StripePaymentEvent(StripePaymentEvent),
    StripeWebhookEvent(StripeWebhookEvent),
}

macro_rules! payment_event_from {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for PaymentEvent {
                fn from(value: $variant) -> Self {
                    PaymentEvent::$variant(value)
                }
            }

            impl From<$variant> for crate::domain::DomainEvent {
                fn from(value: $variant) -> Self {
                    crate::domain::DomainEvent::Payment(PaymentEvent::$variant(value))
                }
            }
        )*
    };
}

payment_event_from!(StripeAccountEvent, StripePaymentEvent, StripeWebhookEvent);
