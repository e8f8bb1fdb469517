use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::core::{Money, ProfileId, ReservationId};

/// Connected account as reported by the processor.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectedAccount {
    pub id: String,
    #[serde(default)]
    pub charges_enabled: bool,
    #[serde(default)]
    pub payouts_enabled: bool,
    #[serde(default)]
    pub details_submitted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPaymentIntent {
    pub reservation: ReservationId,
    pub amount: Money,
    /// Platform commission kept from the transfer.
    pub application_fee: Money,
    /// Connected account receiving the rest.
    pub destination: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub status: String,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Payment processor unreachable: {0}")]
    Transport(String),
    #[error("Payment processor rejected the request ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Unexpected payment processor response: {0}")]
    Decode(String),
}

/// Card processor with connected accounts for listing owners.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// The profile id is stored on the account so notifications can be
    /// routed back to it.
    async fn create_connected_account(
        &self,
        profile: ProfileId,
        email: &str,
    ) -> Result<ConnectedAccount, GatewayError>;
    /// Hosted onboarding URL for the account.
    async fn create_onboarding_link(&self, account_id: &str) -> Result<String, GatewayError>;
    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, GatewayError>;
    async fn create_payment_intent(
        &self,
        intent: &NewPaymentIntent,
    ) -> Result<PaymentIntent, GatewayError>;
}
