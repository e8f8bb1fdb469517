//! Axum handlers, one module per resource.

mod booking;
mod favorite;
mod listing;
mod payment;
mod profile;
mod rating;

use axum::Json;
use serde_json::{json, Value};

pub use self::booking::*;
pub use self::favorite::*;
pub use self::listing::*;
pub use self::payment::*;
pub use self::profile::*;
pub use self::rating::*;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
