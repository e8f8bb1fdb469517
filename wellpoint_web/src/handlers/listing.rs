use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use wellpoint::{
    application::{ConsultorioDocument, ListingQuery},
    domain::core::{Consultorio, ConsultorioDraft, ConsultorioId, MediaId},
};

use crate::{
    error::AppError,
    extract::{CurrentUser, Params, Payload, Segments},
    state::AppState,
};

pub async fn search_consultorios(
    State(state): State<AppState>,
    Params(query): Params<ListingQuery>,
) -> Result<Json<Vec<ConsultorioDocument>>, AppError> {
    Ok(Json(state.listings.search(&query).await?))
}

pub async fn my_consultorios(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<ConsultorioDocument>>, AppError> {
    Ok(Json(state.listings.of_owner(user.id()).await?))
}

pub async fn create_consultorio(
    State(state): State<AppState>,
    user: CurrentUser,
    Payload(draft): Payload<ConsultorioDraft>,
) -> Result<(StatusCode, Json<Consultorio>), AppError> {
    let consultorio = state.listings.create(user.id(), draft).await?;
    Ok((StatusCode::CREATED, Json(consultorio)))
}

/// Anonymous callers only see bookable listings.
pub async fn get_consultorio(
    State(state): State<AppState>,
    user: Option<CurrentUser>,
    Segments(id): Segments<ConsultorioId>,
) -> Result<Json<Consultorio>, AppError> {
    let viewer = user.map(|u| u.id());
    Ok(Json(state.listings.get(id, viewer).await?))
}

pub async fn update_consultorio(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments(id): Segments<ConsultorioId>,
    Payload(draft): Payload<ConsultorioDraft>,
) -> Result<Json<Consultorio>, AppError> {
    Ok(Json(state.listings.revise(user.id(), id, draft).await?))
}

pub async fn delete_consultorio(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments(id): Segments<ConsultorioId>,
) -> Result<StatusCode, AppError> {
    state.listings.delete(user.id(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn approve_consultorio(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments(id): Segments<ConsultorioId>,
) -> Result<Json<Consultorio>, AppError> {
    Ok(Json(state.listings.approve(user.id(), id).await?))
}

pub async fn revoke_consultorio(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments(id): Segments<ConsultorioId>,
) -> Result<Json<Consultorio>, AppError> {
    Ok(Json(state.listings.revoke_approval(user.id(), id).await?))
}

pub async fn activate_consultorio(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments(id): Segments<ConsultorioId>,
) -> Result<Json<Consultorio>, AppError> {
    Ok(Json(state.listings.activate(user.id(), id).await?))
}

pub async fn deactivate_consultorio(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments(id): Segments<ConsultorioId>,
) -> Result<Json<Consultorio>, AppError> {
    Ok(Json(state.listings.deactivate(user.id(), id).await?))
}

/// The request body is the raw image.
pub async fn add_image(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments(id): Segments<ConsultorioId>,
    body: Bytes,
) -> Result<(StatusCode, Json<Consultorio>), AppError> {
    let consultorio = state
        .listings
        .add_image(user.id(), id, body.to_vec())
        .await?;
    Ok((StatusCode::CREATED, Json(consultorio)))
}

pub async fn remove_image(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments((id, image)): Segments<(ConsultorioId, MediaId)>,
) -> Result<Json<Consultorio>, AppError> {
    Ok(Json(state.listings.remove_image(user.id(), id, image).await?))
}

pub async fn get_media(
    State(state): State<AppState>,
    Segments(id): Segments<MediaId>,
) -> Result<impl IntoResponse, AppError> {
    let media = state.listings.media(id).await?;
    Ok((
        [(header::CONTENT_TYPE, media.mime().to_string())],
        media.data().to_vec(),
    ))
}
