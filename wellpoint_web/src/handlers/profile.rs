use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde::Deserialize;
use wellpoint::{
    application::ProfileInput,
    domain::core::{Profile, ProfileId, Role},
};

use crate::{
    error::AppError,
    extract::{CurrentUser, Payload, Segments},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ContactForm {
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoleForm {
    pub role: Role,
}

pub async fn get_profile(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Profile>, AppError> {
    Ok(Json(state.profiles.get(user.id()).await?))
}

pub async fn register_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    Payload(input): Payload<ProfileInput>,
) -> Result<(StatusCode, Json<Profile>), AppError> {
    let profile = state.profiles.register(&user.0, input).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    Payload(form): Payload<ContactForm>,
) -> Result<Json<Profile>, AppError> {
    let profile = state
        .profiles
        .update_contact(user.id(), form.full_name, form.phone)
        .await?;
    Ok(Json(profile))
}

/// The request body is the raw image.
pub async fn change_avatar(
    State(state): State<AppState>,
    user: CurrentUser,
    body: Bytes,
) -> Result<Json<Profile>, AppError> {
    let profile = state.profiles.change_avatar(user.id(), body.to_vec()).await?;
    Ok(Json(profile))
}

pub async fn change_role(
    State(state): State<AppState>,
    user: CurrentUser,
    Segments(target): Segments<ProfileId>,
    Payload(form): Payload<RoleForm>,
) -> Result<Json<Profile>, AppError> {
    let profile = state
        .profiles
        .change_role(user.id(), target, form.role)
        .await?;
    Ok(Json(profile))
}
