use axum::{extract::State, http::StatusCode, Json};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use wellpoint::{
    application::ReservationDocument,
    domain::core::{ConsultorioId, Reservation, ReservationId, Slot},
};

use crate::{
    error::AppError,
    extract::{CurrentUser, Params, Payload, Segments},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ReservationForm {
    pub consultorio: ConsultorioId,
    pub date: NaiveDate,
    /// Local hour the slot starts at.
    pub hour: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelForm {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn list_slots(
    State(state): State<AppState>,
    Segments(id): Segments<ConsultorioId>,
    Params(query): Params<SlotQuery>,
) -> Result<Json<Vec<Slot>>, AppError> {
    Ok(Json(state.bookings.slots(id, query.date, Utc::now()).await?))
}

pub async fn create_reservation(
    State(state): State<AppState>,
    user: CurrentUser,
    Payload(form): Payload<ReservationForm>,
) -> Result<(StatusCode, Json<Reservation>), AppError> {
    let reservation = state
        .bookings
        .create_hourly_reservation(user.id(), form.consultorio, form.date, form.hour, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

pub async fn get_reservation(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments(id): Segments<ReservationId>,
) -> Result<Json<Reservation>, AppError> {
    Ok(Json(state.bookings.get(user.id(), id).await?))
}

/// The reason is optional and so is the body.
pub async fn cancel_reservation(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments(id): Segments<ReservationId>,
    form: Option<Payload<CancelForm>>,
) -> Result<Json<Reservation>, AppError> {
    let Payload(form) = form.unwrap_or(Payload(CancelForm::default()));
    Ok(Json(state.bookings.cancel(user.id(), id, form.reason).await?))
}

pub async fn complete_reservation(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments(id): Segments<ReservationId>,
) -> Result<Json<Reservation>, AppError> {
    Ok(Json(state.bookings.complete(user.id(), id, Utc::now()).await?))
}

pub async fn my_reservations(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<ReservationDocument>>, AppError> {
    Ok(Json(state.bookings.of_booker(user.id()).await?))
}

pub async fn consultorio_reservations(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments(id): Segments<ConsultorioId>,
) -> Result<Json<Vec<ReservationDocument>>, AppError> {
    Ok(Json(state.bookings.of_consultorio(user.id(), id).await?))
}
