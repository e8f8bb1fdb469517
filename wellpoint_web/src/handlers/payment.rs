use axum::{extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use wellpoint::{
    application::{Checkout, Onboarding},
    domain::{core::ReservationId, payment::StripeAccount},
};

use crate::{
    error::AppError,
    extract::{CurrentUser, Payload},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct IntentForm {
    pub reservation: ReservationId,
}

pub async fn connect_account(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Onboarding>, AppError> {
    Ok(Json(state.payments.connect_account(user.id()).await?))
}

pub async fn get_account(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<StripeAccount>, AppError> {
    Ok(Json(state.payments.account(user.id()).await?))
}

pub async fn refresh_account(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<StripeAccount>, AppError> {
    Ok(Json(state.payments.refresh_account(user.id()).await?))
}

pub async fn create_payment_intent(
    State(state): State<AppState>,
    user: CurrentUser,
    Payload(form): Payload<IntentForm>,
) -> Result<Json<Checkout>, AppError> {
    Ok(Json(
        state
            .payments
            .create_payment_intent(user.id(), form.reservation)
            .await?,
    ))
}

/// The body must stay untouched for the signature check.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());
    let outcome = state
        .payments
        .handle_webhook(&body, signature, Utc::now())
        .await?;
    info!("Webhookを処理: {:?}", outcome);
    Ok(Json(json!({ "received": true, "outcome": outcome })))
}
