use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;
use wellpoint::{
    application::{AuthError, ServiceError},
    domain::DataAccessError,
};

/// Error returned by every handler, rendered as `{"error": message}`.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        error!("内部エラー: {}", error);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(value: ServiceError) -> Self {
        let status = match &value {
            ServiceError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) | ServiceError::DataAccess(DataAccessError::Conflict(_)) => {
                StatusCode::CONFLICT
            }
            ServiceError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::DataAccess(_) | ServiceError::Gateway(_) => {
                return Self::internal(value)
            }
        };
        Self::new(status, value.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::InvalidToken => Self::new(StatusCode::UNAUTHORIZED, value.to_string()),
            AuthError::Unavailable(_) => Self::internal(value),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(value: JsonRejection) -> Self {
        Self::new(value.status(), value.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(value: QueryRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, value.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(value: PathRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, value.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServiceError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (ServiceError::Forbidden("no"), StatusCode::FORBIDDEN),
            (ServiceError::NotFound("Consultorio"), StatusCode::NOT_FOUND),
            (ServiceError::Conflict("taken".into()), StatusCode::CONFLICT),
            (
                ServiceError::DataAccess(DataAccessError::Conflict("agenda-1".into())),
                StatusCode::CONFLICT,
            ),
            (ServiceError::Invalid("bad".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (ServiceError::BadRequest("bad".into()), StatusCode::BAD_REQUEST),
        ];
        for (error, status) in cases {
            assert_eq!(AppError::from(error).status(), status);
        }
        let error = AppError::from(ServiceError::NotFound("Consultorio"));
        assert_eq!(error.message, "Consultorio not found");
    }
}
