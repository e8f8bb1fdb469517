use axum::{extract::State, Json};
use wellpoint::domain::core::ConsultorioId;

use crate::{
    error::AppError,
    extract::{CurrentUser, Segments},
    state::AppState,
};

pub async fn list_favorites(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<ConsultorioId>>, AppError> {
    Ok(Json(state.favorites.list(user.id()).await?))
}

pub async fn add_favorite(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments(id): Segments<ConsultorioId>,
) -> Result<Json<Vec<ConsultorioId>>, AppError> {
    Ok(Json(state.favorites.add(user.id(), id).await?))
}

pub async fn remove_favorite(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments(id): Segments<ConsultorioId>,
) -> Result<Json<Vec<ConsultorioId>>, AppError> {
    Ok(Json(state.favorites.remove(user.id(), id).await?))
}
