use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::core::ProfileId;
use crate::domain::payment::{
    ConnectedAccount, GatewayError, NewPaymentIntent, PaymentGateway, PaymentIntent,
};

/// Stripe REST client for Connect accounts and payment intents.
#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    api_base: String,
    secret_key: String,
    refresh_url: String,
    return_url: String,
}

impl StripeClient {
    pub fn new(config: &crate::Stripe) -> Self {
        Self {
            http: Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            secret_key: config.secret_key.clone(),
            refresh_url: config.refresh_url.clone(),
            return_url: config.return_url.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let response = request
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or_default();
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_owned();
            warn!("Stripe API エラー ({}): {}", status, message);
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[derive(Deserialize)]
struct AccountLink {
    url: String,
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_connected_account(
        &self,
        profile: ProfileId,
        email: &str,
    ) -> Result<ConnectedAccount, GatewayError> {
        let profile = profile.to_string();
        let request = self.http.post(self.url("/v1/accounts")).form(&[
            ("type", "express"),
            ("email", email),
            ("metadata[profile_id]", profile.as_str()),
            ("capabilities[card_payments][requested]", "true"),
            ("capabilities[transfers][requested]", "true"),
        ]);
        let account: ConnectedAccount = self.send(request).await?;
        debug!("連結アカウント {} を作成", account.id);
        Ok(account)
    }

    async fn create_onboarding_link(&self, account_id: &str) -> Result<String, GatewayError> {
        let request = self.http.post(self.url("/v1/account_links")).form(&[
            ("account", account_id),
            ("refresh_url", self.refresh_url.as_str()),
            ("return_url", self.return_url.as_str()),
            ("type", "account_onboarding"),
        ]);
        let link: AccountLink = self.send(request).await?;
        Ok(link.url)
    }

    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, GatewayError> {
        let request = self
            .http
            .get(self.url(&format!("/v1/accounts/{}", account_id)));
        self.send(request).await
    }

    async fn create_payment_intent(
        &self,
        intent: &NewPaymentIntent,
    ) -> Result<PaymentIntent, GatewayError> {
        let amount = intent.amount.amount().to_string();
        let fee = intent.application_fee.amount().to_string();
        let reservation = intent.reservation.to_string();
        let request = self.http.post(self.url("/v1/payment_intents")).form(&[
            ("amount", amount.as_str()),
            ("currency", intent.amount.currency().code()),
            ("application_fee_amount", fee.as_str()),
            ("transfer_data[destination]", intent.destination.as_str()),
            ("metadata[reservation_id]", reservation.as_str()),
            ("automatic_payment_methods[enabled]", "true"),
        ]);
        self.send(request).await
    }
}
