use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use wellpoint::{
    application::{RatingInput, RatingSummary},
    domain::core::ConsultorioId,
};

use crate::{
    error::AppError,
    extract::{CurrentUser, Payload, Segments},
    state::AppState,
};

pub async fn list_ratings(
    State(state): State<AppState>,
    Segments(id): Segments<ConsultorioId>,
) -> Result<Json<RatingSummary>, AppError> {
    Ok(Json(state.ratings.list(id).await?))
}

pub async fn submit_rating(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments(id): Segments<ConsultorioId>,
    Payload(input): Payload<RatingInput>,
) -> Result<(StatusCode, Json<RatingSummary>), AppError> {
    let summary = state
        .ratings
        .submit(user.id(), id, input, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn revise_rating(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments(id): Segments<ConsultorioId>,
    Payload(input): Payload<RatingInput>,
) -> Result<Json<RatingSummary>, AppError> {
    Ok(Json(
        state.ratings.revise(user.id(), id, input, Utc::now()).await?,
    ))
}

pub async fn withdraw_rating(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments(id): Segments<ConsultorioId>,
) -> Result<Json<RatingSummary>, AppError> {
    Ok(Json(state.ratings.withdraw(user.id(), id).await?))
}
