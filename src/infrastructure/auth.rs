use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::warn;

use crate::application::{AuthError, AuthUser, Authenticator};

/// Asks the hosted auth provider who owns a token.
#[derive(Clone)]
pub struct RemoteAuthenticator {
    http: Client,
    url: String,
    api_key: String,
}

impl RemoteAuthenticator {
    pub fn new(config: &crate::Auth) -> Self {
        Self {
            http: Client::new(),
            url: config.url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl Authenticator for RemoteAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<AuthUser, AuthError> {
        let response = self
            .http
            .get(format!("{}/auth/v1/user", self.url))
            .bearer_auth(token)
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        match response.status() {
            s if s.is_success() => response
                .json::<AuthUser>()
                .await
                .map_err(|e| AuthError::Unavailable(e.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthError::InvalidToken),
            s => {
                warn!("認証プロバイダーの応答が不正です: {}", s);
                Err(AuthError::Unavailable(s.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::domain::core::ProfileId;

    use super::*;

    fn authenticator(url: &str) -> RemoteAuthenticator {
        RemoteAuthenticator::new(&crate::Auth {
            url: url.to_owned(),
            api_key: "anon-key".to_owned(),
        })
    }

    #[tokio::test]
    async fn test_valid_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("Authorization", "Bearer good"))
            .and(header("apikey", "anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "0f6c1e52-8f1e-4b4e-9d36-6f0a7c1d2e3f",
                "email": "ana@example.com",
                "aud": "authenticated"
            })))
            .mount(&server)
            .await;

        let user = authenticator(&server.uri()).authenticate("good").await.unwrap();
        assert_eq!(user.email.as_deref(), Some("ana@example.com"));
        assert_eq!(
            user.profile_id(),
            ProfileId::from_subject("0f6c1e52-8f1e-4b4e-9d36-6f0a7c1d2e3f")
        );
    }

    #[tokio::test]
    async fn test_rejected_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = authenticator(&server.uri()).authenticate("expired").await;
        assert!(matches!(result, Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_provider_down() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let result = authenticator(&server.uri()).authenticate("any").await;
        assert!(matches!(result, Err(AuthError::Unavailable(_))));
    }
}
