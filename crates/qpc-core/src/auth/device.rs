use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::config::InsightsConfig;

use super::AuthError;

/// Public client id the identity provider knows this CLI by.
pub const SSO_CLIENT_ID: &str = "console-cli";
/// Identity realm the discovery document is fetched from.
pub const SSO_REALM: &str = "external";
/// Scope requested with the device authorization.
pub const SSO_SCOPE: &str = "api.console";

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const USER_AGENT: &str = "qpc/0.1.0";

fn default_interval() -> u64 {
    5
}

fn default_expires_in() -> u64 {
    600
}

/// Pending device authorization returned by the SSO host. Lives only for
/// the duration of one login attempt; never persisted.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationRequest {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscoveryDocument {
    #[serde(default)]
    device_authorization_endpoint: Option<String>,
    #[serde(default)]
    token_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenSuccess {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenErrorBody {
    fn describe(&self) -> String {
        match &self.error_description {
            Some(description) => format!("{} ({})", self.error, description),
            None => self.error.clone(),
        }
    }
}

/// Bounded polling client for the OAuth device-authorization grant.
///
/// Targets the SSO host, not the inventory server, so its two calls bypass
/// the request dispatcher. `request_auth` obtains a user/device code pair;
/// `wait_for_authorization` polls the token endpoint until the user
/// approves, the provider rejects, or the advertised lifetime elapses.
pub struct DeviceAuthFlow {
    http: Client,
    sso_base: Url,
    realm: String,
    authorization: Option<AuthorizationRequest>,
    discovery: Option<DiscoveryDocument>,
}

impl DeviceAuthFlow {
    pub fn new(config: &InsightsConfig) -> Result<Self, AuthError> {
        Self::with_sso_base(Url::parse(&format!("https://{}", config.sso_host))?)
    }

    /// Build a flow against an explicit SSO base URL (useful for testing).
    pub fn with_sso_base(sso_base: Url) -> Result<Self, AuthError> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            sso_base,
            realm: SSO_REALM.to_owned(),
            authorization: None,
            discovery: None,
        })
    }

    /// The pending authorization from the last successful [`Self::request_auth`].
    pub fn authorization(&self) -> Option<&AuthorizationRequest> {
        self.authorization.as_ref()
    }

    /// Ask the identity provider for a device/user code pair.
    pub async fn request_auth(&mut self) -> Result<&AuthorizationRequest, AuthError> {
        let context = "request device authorization";
        let endpoint = self
            .discovered_endpoint(context, DiscoveryKey::DeviceAuthorization)
            .await?;
        let form = [
            ("grant_type", DEVICE_GRANT_TYPE),
            ("client_id", SSO_CLIENT_ID),
            ("scope", SSO_SCOPE),
        ];
        let response = self
            .http
            .post(endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|source| AuthError::SsoConnection { context, source })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::AuthorizationRequest { status, body });
        }

        let authorization: AuthorizationRequest = response
            .json()
            .await
            .map_err(|_| AuthError::MalformedResponse)?;
        tracing::debug!(
            user_code = %authorization.user_code,
            expires_in = authorization.expires_in,
            interval = authorization.interval,
            "device authorization issued"
        );
        Ok(self.authorization.insert(authorization))
    }

    /// Poll the token endpoint until the pending authorization resolves.
    ///
    /// Elapsed time is the sum of nominal poll intervals, not wall-clock
    /// time: a slow token response does not count toward the expiry
    /// budget, so the loop can outlive `expires_in` in wall-clock terms.
    pub async fn wait_for_authorization(&mut self) -> Result<String, AuthError> {
        let context = "poll for the access token";
        let authorization = self
            .authorization
            .clone()
            .ok_or(AuthError::NotRequested)?;
        let endpoint = self
            .discovered_endpoint(context, DiscoveryKey::Token)
            .await?;
        let interval = Duration::from_secs(authorization.interval);
        let mut elapsed: u64 = 0;

        loop {
            let form = [
                ("grant_type", DEVICE_GRANT_TYPE),
                ("client_id", SSO_CLIENT_ID),
                ("device_code", authorization.device_code.as_str()),
            ];
            let response = self
                .http
                .post(endpoint.clone())
                .form(&form)
                .send()
                .await
                .map_err(|source| AuthError::SsoConnection { context, source })?;

            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            if status == StatusCode::OK {
                let token: TokenSuccess = serde_json::from_str(&text)
                    .map_err(|_| AuthError::MalformedResponse)?;
                return Ok(token.access_token);
            }

            if status == StatusCode::BAD_REQUEST {
                let body: TokenErrorBody = serde_json::from_str(&text)
                    .map_err(|_| AuthError::Denied {
                        reason: "unrecognized token endpoint response".to_owned(),
                    })?;
                match body.error.as_str() {
                    "authorization_pending" => {
                        tracing::debug!(elapsed, "authorization pending");
                        tokio::time::sleep(interval).await;
                        elapsed += authorization.interval;
                        if elapsed > authorization.expires_in {
                            return Err(AuthError::TimedOut);
                        }
                    }
                    // The provider reporting the code expired is the same
                    // outcome as our own budget running out.
                    "expired_token" => return Err(AuthError::TimedOut),
                    _ => {
                        return Err(AuthError::Denied {
                            reason: body.describe(),
                        })
                    }
                }
                continue;
            }

            return Err(AuthError::Denied {
                reason: format!("token endpoint returned status {status}"),
            });
        }
    }

    async fn discovered_endpoint(
        &mut self,
        context: &'static str,
        key: DiscoveryKey,
    ) -> Result<Url, AuthError> {
        self.ensure_discovery(context).await?;
        let raw = self
            .discovery
            .as_ref()
            .and_then(|document| match key {
                DiscoveryKey::DeviceAuthorization => {
                    document.device_authorization_endpoint.clone()
                }
                DiscoveryKey::Token => document.token_endpoint.clone(),
            })
            .ok_or(AuthError::DiscoveryKeyMissing(key.name()))?;
        Ok(Url::parse(&raw)?)
    }

    /// Fetch the well-known configuration once; later calls reuse it.
    async fn ensure_discovery(&mut self, context: &'static str) -> Result<(), AuthError> {
        if self.discovery.is_some() {
            return Ok(());
        }
        let url = self.sso_base.join(&format!(
            "auth/realms/{}/.well-known/openid-configuration",
            self.realm
        ))?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| AuthError::SsoConnection { context, source })?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Discovery { status });
        }
        let document: DiscoveryDocument = response
            .json()
            .await
            .map_err(|_| AuthError::MalformedResponse)?;
        self.discovery = Some(document);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum DiscoveryKey {
    DeviceAuthorization,
    Token,
}

impl DiscoveryKey {
    fn name(self) -> &'static str {
        match self {
            DiscoveryKey::DeviceAuthorization => "device_authorization_endpoint",
            DiscoveryKey::Token => "token_endpoint",
        }
    }
}
