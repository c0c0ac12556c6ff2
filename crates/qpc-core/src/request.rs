use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use reqwest::header::AUTHORIZATION;
use reqwest::{Certificate, Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::{ConfigError, ServerConfig, SslVerify};
use crate::version::{
    parse_version, ServerVersion, MIN_SERVER_VERSION, SERVER_VERSION_HEADER, UNVERSIONED,
};

const USER_AGENT: &str = "qpc/0.1.0";

/// Placeholder recorded when a response body is not valid JSON.
pub const OPAQUE_BODY: &str = "<unparseable response body>";

/// Exact body the server sends alongside a 400 when the API token has
/// lapsed; treated the same as a 401.
const TOKEN_EXPIRED_DETAIL: &str = "Token has expired";

/// Errors surfaced by the request dispatcher.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    UnsupportedMethod(#[from] UnsupportedMethod),
    #[error("unable to connect to {scheme}://{host}:{port} ({source}); verify the connection settings with `qpc server config`")]
    Connection {
        scheme: String,
        host: String,
        port: u16,
        source: reqwest::Error,
    },
    #[error("authentication token is missing or expired; log in again with `qpc server login`")]
    TokenExpired,
    #[error("the server reported an internal error: {detail}")]
    InternalServerError { detail: String },
    #[error("the server at version {server} is older than the required minimum {required}")]
    IncompatibleServer {
        server: ServerVersion,
        required: ServerVersion,
    },
    #[error("unexpected response status {status}: {detail}")]
    UnexpectedStatus { status: StatusCode, detail: String },
    #[error("unable to read CA bundle {path}: {detail}")]
    CaBundle { path: PathBuf, detail: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// HTTP verbs the dispatcher supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl FromStr for Method {
    type Err = UnsupportedMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PATCH" => Ok(Method::Patch),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(UnsupportedMethod(other.to_owned())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        write!(f, "{value}")
    }
}

/// Error reported when parsing an HTTP verb outside the supported set.
#[derive(Debug, Error)]
#[error("unsupported HTTP method '{0}'")]
pub struct UnsupportedMethod(pub String);

/// One request to hand to [`ApiClient::dispatch`].
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub payload: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub min_server_version: ServerVersion,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            payload: None,
            headers: Vec::new(),
            min_server_version: MIN_SERVER_VERSION,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_min_server_version(mut self, version: ServerVersion) -> Self {
        self.min_server_version = version;
        self
    }
}

/// The result of one dispatched request: status, best-effort JSON body,
/// and the version the server reported.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub status: StatusCode,
    pub body: Value,
    pub server_version: Option<ServerVersion>,
}

impl RequestOutcome {
    /// Judge the status against the codes the caller considers acceptable.
    /// The dispatcher itself never rejects ordinary HTTP error statuses.
    pub fn require_status(&self, accepted: &[StatusCode]) -> ApiResult<&Value> {
        if accepted.contains(&self.status) {
            Ok(&self.body)
        } else {
            Err(ApiError::UnexpectedStatus {
                status: self.status,
                detail: detail_of(&self.body),
            })
        }
    }
}

/// Extract the server-provided error detail from a response body, falling
/// back to the whole body rendered compactly.
pub(crate) fn detail_of(body: &Value) -> String {
    match body.get("detail") {
        Some(Value::String(detail)) => detail.clone(),
        Some(other) => other.to_string(),
        None => body.to_string(),
    }
}

/// Synchronous-feeling HTTP client wrapper for the inventory server:
/// attaches the auth header, enforces the minimum-version policy, and
/// normalizes the common error responses. Built once per command from the
/// persisted configuration.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
    command: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ServerConfig, token: Option<String>) -> ApiResult<Self> {
        config.validate()?;
        let base_url = Url::parse(&config.base_url())?;
        let mut builder = Client::builder().user_agent(USER_AGENT);
        builder = match &config.ssl_verify {
            Some(SslVerify::Flag(true)) => builder,
            Some(SslVerify::CaBundle(path)) => {
                let pem = fs::read(path).map_err(|err| ApiError::CaBundle {
                    path: path.clone(),
                    detail: err.to_string(),
                })?;
                let certificate =
                    Certificate::from_pem(&pem).map_err(|err| ApiError::CaBundle {
                        path: path.clone(),
                        detail: err.to_string(),
                    })?;
                builder.add_root_certificate(certificate)
            }
            Some(SslVerify::Flag(false)) | None => builder.danger_accept_invalid_certs(true),
        };
        let http = builder.build()?;
        Ok(Self {
            http,
            base_url,
            token,
            command: None,
        })
    }

    /// Name the originating command in the per-request log line.
    pub fn for_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Issue one request. Applies version gating to every response before
    /// any other interpretation, then normalizes auth-expiry and internal
    /// server errors. Never retries; callers judge all other statuses.
    pub async fn dispatch(&self, request: ApiRequest) -> ApiResult<RequestOutcome> {
        let url = self.base_url.join(&request.path)?;
        let mut builder = self.http.request(request.method.as_reqwest(), url.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &self.token {
            builder = builder.header(AUTHORIZATION, format!("Token {token}"));
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| self.connection_error(err))?;

        let status = response.status();
        let server_version = read_server_version(response.headers());
        let body = parse_body(response).await;

        tracing::debug!(
            method = %request.method,
            command = self.command.as_deref().unwrap_or("-"),
            url = %url,
            status = status.as_u16(),
            body = %body,
            "api request"
        );

        if let Some(server) = server_version {
            if server < request.min_server_version {
                return Err(ApiError::IncompatibleServer {
                    server,
                    required: request.min_server_version,
                });
            }
        }

        if status == StatusCode::UNAUTHORIZED
            || (status == StatusCode::BAD_REQUEST && is_token_expired_body(&body))
        {
            return Err(ApiError::TokenExpired);
        }
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            return Err(ApiError::InternalServerError {
                detail: detail_of(&body),
            });
        }

        Ok(RequestOutcome {
            status,
            body,
            server_version,
        })
    }

    fn connection_error(&self, source: reqwest::Error) -> ApiError {
        ApiError::Connection {
            scheme: self.base_url.scheme().to_owned(),
            host: self.base_url.host_str().unwrap_or_default().to_owned(),
            port: self.base_url.port_or_known_default().unwrap_or_default(),
            source,
        }
    }
}

fn read_server_version(headers: &reqwest::header::HeaderMap) -> Option<ServerVersion> {
    let raw = headers.get(SERVER_VERSION_HEADER)?.to_str().ok()?;
    if raw == UNVERSIONED {
        return None;
    }
    match parse_version(raw) {
        Ok(version) => Some(version),
        Err(err) => {
            tracing::debug!(header = raw, %err, "ignoring unparseable server version");
            None
        }
    }
}

async fn parse_body(response: reqwest::Response) -> Value {
    let text = response.text().await.unwrap_or_default();
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or_else(|_| Value::String(OPAQUE_BODY.to_owned()))
}

fn is_token_expired_body(body: &Value) -> bool {
    body.as_object()
        .is_some_and(|object| {
            object.len() == 1
                && object.get("detail").and_then(Value::as_str) == Some(TOKEN_EXPIRED_DETAIL)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::ServerVersion;
    use httpmock::prelude::*;

    fn mock_config(server: &MockServer) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: server.port(),
            use_http: true,
            ssl_verify: None,
            require_token: true,
        }
    }

    fn client(server: &MockServer, token: Option<&str>) -> ApiClient {
        ApiClient::new(&mock_config(server), token.map(str::to_owned)).unwrap()
    }

    #[test]
    fn unsupported_method_fails_without_network() {
        let err = "TRACE".parse::<Method>().unwrap_err();
        assert_eq!(err.0, "TRACE");
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("PATCH".parse::<Method>().unwrap(), Method::Patch);
    }

    #[tokio::test]
    async fn token_header_attached_when_present() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/status/")
                .header("authorization", "Token opaque");
            then.status(200)
                .json_body_obj(&serde_json::json!({"api_version": 1}));
        });

        let outcome = client(&server, Some("opaque"))
            .dispatch(ApiRequest::new(Method::Get, "/api/v1/status/"))
            .await
            .unwrap();
        mock.assert();
        assert_eq!(outcome.status, StatusCode::OK);
        assert_eq!(outcome.body["api_version"], 1);
    }

    #[tokio::test]
    async fn token_header_omitted_when_absent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/v1/status/").matches(|req| {
                req.headers.as_ref().map_or(true, |headers| {
                    !headers
                        .iter()
                        .any(|(name, _)| name.eq_ignore_ascii_case("authorization"))
                })
            });
            then.status(200).json_body_obj(&serde_json::json!({}));
        });

        client(&server, None)
            .dispatch(ApiRequest::new(Method::Get, "/api/v1/status/"))
            .await
            .unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn unauthorized_normalizes_to_token_expired() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/sources/");
            then.status(401)
                .json_body_obj(&serde_json::json!({"detail": "Invalid token."}));
        });

        let err = client(&server, Some("stale"))
            .dispatch(ApiRequest::new(Method::Get, "/api/v1/sources/"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::TokenExpired));
    }

    #[tokio::test]
    async fn expired_token_body_normalizes_like_unauthorized() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/sources/");
            then.status(400)
                .json_body_obj(&serde_json::json!({"detail": "Token has expired"}));
        });

        let err = client(&server, Some("stale"))
            .dispatch(ApiRequest::new(Method::Get, "/api/v1/sources/"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::TokenExpired));
    }

    #[tokio::test]
    async fn other_bad_requests_are_returned_to_the_caller() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/v1/credentials/");
            then.status(400)
                .json_body_obj(&serde_json::json!({"name": ["already exists"]}));
        });

        let outcome = client(&server, Some("token"))
            .dispatch(ApiRequest::new(Method::Post, "/api/v1/credentials/"))
            .await
            .unwrap();
        assert_eq!(outcome.status, StatusCode::BAD_REQUEST);
        let err = outcome
            .require_status(&[StatusCode::CREATED])
            .unwrap_err();
        assert!(matches!(err, ApiError::UnexpectedStatus { .. }));
    }

    #[tokio::test]
    async fn internal_server_error_surfaces_detail() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/scans/");
            then.status(500)
                .json_body_obj(&serde_json::json!({"detail": "database offline"}));
        });

        let err = client(&server, Some("token"))
            .dispatch(ApiRequest::new(Method::Get, "/api/v1/scans/"))
            .await
            .unwrap_err();
        match err {
            ApiError::InternalServerError { detail } => assert_eq!(detail, "database offline"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn old_server_version_fails_the_gate() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/status/");
            then.status(200)
                .header(SERVER_VERSION_HEADER, "0.9.0")
                .json_body_obj(&serde_json::json!({}));
        });

        let err = client(&server, None)
            .dispatch(
                ApiRequest::new(Method::Get, "/api/v1/status/")
                    .with_min_server_version(ServerVersion(1, 0, 0)),
            )
            .await
            .unwrap_err();
        match err {
            ApiError::IncompatibleServer { server, required } => {
                assert_eq!(server, ServerVersion(0, 9, 0));
                assert_eq!(required, ServerVersion(1, 0, 0));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn version_gate_runs_before_error_normalization() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/status/");
            then.status(401)
                .header(SERVER_VERSION_HEADER, "0.9.0")
                .json_body_obj(&serde_json::json!({}));
        });

        let err = client(&server, None)
            .dispatch(
                ApiRequest::new(Method::Get, "/api/v1/status/")
                    .with_min_server_version(ServerVersion(1, 0, 0)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::IncompatibleServer { .. }));
    }

    #[tokio::test]
    async fn missing_version_header_never_fails_the_gate() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/status/");
            then.status(200).json_body_obj(&serde_json::json!({}));
        });

        let outcome = client(&server, None)
            .dispatch(
                ApiRequest::new(Method::Get, "/api/v1/status/")
                    .with_min_server_version(ServerVersion(9, 9, 9)),
            )
            .await
            .unwrap();
        assert!(outcome.server_version.is_none());
    }

    #[tokio::test]
    async fn unversioned_sentinel_skips_the_gate() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/status/");
            then.status(200)
                .header(SERVER_VERSION_HEADER, UNVERSIONED)
                .json_body_obj(&serde_json::json!({}));
        });

        let outcome = client(&server, None)
            .dispatch(
                ApiRequest::new(Method::Get, "/api/v1/status/")
                    .with_min_server_version(ServerVersion(9, 9, 9)),
            )
            .await
            .unwrap();
        assert!(outcome.server_version.is_none());
    }

    #[tokio::test]
    async fn suffixed_version_header_is_parsed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/status/");
            then.status(200)
                .header(SERVER_VERSION_HEADER, "1.2.3+build.7")
                .json_body_obj(&serde_json::json!({}));
        });

        let outcome = client(&server, None)
            .dispatch(
                ApiRequest::new(Method::Get, "/api/v1/status/")
                    .with_min_server_version(ServerVersion(1, 2, 3)),
            )
            .await
            .unwrap();
        assert_eq!(outcome.server_version, Some(ServerVersion(1, 2, 3)));
    }

    #[tokio::test]
    async fn non_json_body_degrades_to_placeholder() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/status/");
            then.status(200).body("<html>proxy error</html>");
        });

        let outcome = client(&server, None)
            .dispatch(ApiRequest::new(Method::Get, "/api/v1/status/"))
            .await
            .unwrap();
        assert_eq!(outcome.body, Value::String(OPAQUE_BODY.to_owned()));
    }

    #[tokio::test]
    async fn connection_failure_names_the_target() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 1,
            use_http: true,
            ssl_verify: None,
            require_token: true,
        };
        let client = ApiClient::new(&config, None).unwrap();
        let err = client
            .dispatch(ApiRequest::new(Method::Get, "/api/v1/status/"))
            .await
            .unwrap_err();
        match err {
            ApiError::Connection { scheme, host, port, .. } => {
                assert_eq!(scheme, "http");
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
