use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::request::{ApiClient, ApiError, ApiRequest, ApiResult, Method};

pub const TOKEN_PATH: &str = "/api/v1/token/";
pub const LOGOUT_PATH: &str = "/api/v1/users/logout/";
pub const STATUS_PATH: &str = "/api/v1/status/";

/// Session and status operations against the server itself.
#[derive(Clone)]
pub struct ServerService {
    client: ApiClient,
}

impl ServerService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Exchange a username and password for an API token.
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<String> {
        let payload = json!({"username": username, "password": password});
        let request = ApiRequest::new(Method::Post, TOKEN_PATH).with_payload(payload);
        let outcome = self.client.dispatch(request).await?;
        let body = outcome.require_status(&[StatusCode::OK])?;
        body.get("token")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or(ApiError::UnexpectedStatus {
                status: outcome.status,
                detail: "login response did not include a token".to_owned(),
            })
    }

    /// Invalidate the server-side session for the current token.
    pub async fn logout(&self) -> ApiResult<()> {
        let request = ApiRequest::new(Method::Put, LOGOUT_PATH);
        let outcome = self.client.dispatch(request).await?;
        outcome.require_status(&[StatusCode::OK])?;
        Ok(())
    }

    pub async fn status(&self) -> ApiResult<Value> {
        let request = ApiRequest::new(Method::Get, STATUS_PATH);
        let outcome = self.client.dispatch(request).await?;
        Ok(outcome.require_status(&[StatusCode::OK])?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use httpmock::prelude::*;

    fn client(server: &MockServer, token: Option<&str>) -> ApiClient {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: server.port(),
            use_http: true,
            ssl_verify: None,
            require_token: true,
        };
        ApiClient::new(&config, token.map(str::to_owned)).unwrap()
    }

    #[tokio::test]
    async fn login_extracts_the_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/token/")
                .json_body_partial(r#"{"username": "admin"}"#);
            then.status(200)
                .json_body_obj(&serde_json::json!({"token": "opaque-token"}));
        });

        let service = ServerService::new(client(&server, None));
        let token = service.login("admin", "hunter2").await.unwrap();
        mock.assert();
        assert_eq!(token, "opaque-token");
    }

    #[tokio::test]
    async fn login_without_token_in_body_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/v1/token/");
            then.status(200).json_body_obj(&serde_json::json!({}));
        });

        let service = ServerService::new(client(&server, None));
        let err = service.login("admin", "hunter2").await.unwrap_err();
        assert!(matches!(err, ApiError::UnexpectedStatus { .. }));
    }

    #[tokio::test]
    async fn bad_credentials_surface_the_server_detail() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/v1/token/");
            then.status(400).json_body_obj(
                &serde_json::json!({"detail": "Unable to log in with provided credentials."}),
            );
        });

        let service = ServerService::new(client(&server, None));
        let err = service.login("admin", "wrong").await.unwrap_err();
        match err {
            ApiError::UnexpectedStatus { status, detail } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert!(detail.contains("provided credentials"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_returns_the_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/status/");
            then.status(200)
                .json_body_obj(&serde_json::json!({"api_version": 1, "build": "abc"}));
        });

        let service = ServerService::new(client(&server, Some("token")));
        let status = service.status().await.unwrap();
        assert_eq!(status["api_version"], 1);
    }
}
