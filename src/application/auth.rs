use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::core::ProfileId;

/// User as reported by the hosted auth provider.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AuthUser {
    /// Provider subject.
    #[serde(rename = "id")]
    pub subject: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl AuthUser {
    pub fn profile_id(&self) -> ProfileId {
        ProfileId::from_subject(&self.subject)
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Auth provider unavailable: {0}")]
    Unavailable(String),
}

/// Verifies bearer tokens.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<AuthUser, AuthError>;
}
