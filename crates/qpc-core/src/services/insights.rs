use reqwest::{Client, StatusCode};
use serde_json::Value;
use url::Url;

use crate::config::InsightsConfig;
use crate::request::{detail_of, ApiError, ApiResult, OPAQUE_BODY};

const USER_AGENT: &str = "qpc/0.1.0";
pub const UPLOAD_PATH: &str = "/api/insights/v1/reports/";

/// Uploads validated details reports to the insights console. The console
/// is a different host with bearer authentication, so this bypasses the
/// server dispatcher.
pub struct InsightsService {
    http: Client,
    base_url: Url,
    token: String,
}

impl InsightsService {
    pub fn new(config: &InsightsConfig, token: String) -> ApiResult<Self> {
        let base_url = Url::parse(&config.base_url())?;
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub async fn publish(&self, payload: &Value) -> ApiResult<Value> {
        let url = self.base_url.join(UPLOAD_PATH)?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await
            .map_err(|source| ApiError::Connection {
                scheme: self.base_url.scheme().to_owned(),
                host: self.base_url.host_str().unwrap_or_default().to_owned(),
                port: self.base_url.port_or_known_default().unwrap_or_default(),
                source,
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body: Value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(OPAQUE_BODY.to_owned()))
        };

        if !matches!(
            status,
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED
        ) {
            return Err(ApiError::UnexpectedStatus {
                status,
                detail: detail_of(&body),
            });
        }
        Ok(body)
    }
}
