pub mod error;
pub mod extract;
pub mod handlers;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};

use crate::handlers::*;
pub use crate::state::AppState;

/// Room left for headers and JSON framing on top of an image upload.
const BODY_SLACK: usize = 64 * 1024;

pub fn router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.media_max_bytes + BODY_SLACK);
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/me/profile",
            get(get_profile).post(register_profile).put(update_profile),
        )
        .route("/api/me/avatar", put(change_avatar))
        .route("/api/me/consultorios", get(my_consultorios))
        .route("/api/me/reservations", get(my_reservations))
        .route("/api/me/favorites", get(list_favorites))
        .route(
            "/api/me/favorites/:id",
            put(add_favorite).delete(remove_favorite),
        )
        .route("/api/profiles/:id/role", put(change_role))
        .route(
            "/api/consultorios",
            get(search_consultorios).post(create_consultorio),
        )
        .route(
            "/api/consultorios/:id",
            get(get_consultorio)
                .put(update_consultorio)
                .delete(delete_consultorio),
        )
        .route("/api/consultorios/:id/approve", post(approve_consultorio))
        .route("/api/consultorios/:id/revoke", post(revoke_consultorio))
        .route("/api/consultorios/:id/activate", post(activate_consultorio))
        .route(
            "/api/consultorios/:id/deactivate",
            post(deactivate_consultorio),
        )
        .route("/api/consultorios/:id/images", post(add_image))
        .route(
            "/api/consultorios/:id/images/:media",
            axum::routing::delete(remove_image),
        )
        .route("/api/consultorios/:id/slots", get(list_slots))
        .route(
            "/api/consultorios/:id/reservations",
            get(consultorio_reservations),
        )
        .route(
            "/api/consultorios/:id/ratings",
            get(list_ratings)
                .post(submit_rating)
                .put(revise_rating)
                .delete(withdraw_rating),
        )
        .route("/api/media/:id", get(get_media))
        .route("/api/reservations", post(create_reservation))
        .route("/api/reservations/:id", get(get_reservation))
        .route("/api/reservations/:id/cancel", post(cancel_reservation))
        .route("/api/reservations/:id/complete", post(complete_reservation))
        .route("/api/stripe/connect", post(connect_account))
        .route("/api/stripe/account", get(get_account))
        .route("/api/stripe/account/refresh", post(refresh_account))
        .route("/api/stripe/payment-intent", post(create_payment_intent))
        .route("/api/stripe/webhook", post(stripe_webhook))
        .layer(body_limit)
        .with_state(state)
}
