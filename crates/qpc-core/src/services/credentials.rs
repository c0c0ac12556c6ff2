use std::path::PathBuf;

use reqwest::StatusCode;
use serde_json::{json, Map, Value};

use crate::request::{ApiClient, ApiRequest, ApiResult, Method};

use super::{find_in_results, id_of, results_of, ProviderType};

pub const CREDENTIALS_PATH: &str = "/api/v1/credentials/";

/// Higher-level helpers around authentication credentials.
#[derive(Clone)]
pub struct CredentialService {
    client: ApiClient,
}

impl CredentialService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn list(&self, cred_type: Option<ProviderType>) -> ApiResult<Vec<Value>> {
        let mut request = ApiRequest::new(Method::Get, CREDENTIALS_PATH);
        if let Some(kind) = cred_type {
            request = request.with_query("cred_type", kind.to_string());
        }
        let outcome = self.client.dispatch(request).await?;
        Ok(results_of(outcome.require_status(&[StatusCode::OK])?))
    }

    pub async fn find_by_name(&self, name: &str) -> ApiResult<Option<Value>> {
        let request = ApiRequest::new(Method::Get, CREDENTIALS_PATH).with_query("name", name);
        let outcome = self.client.dispatch(request).await?;
        Ok(find_in_results(
            outcome.require_status(&[StatusCode::OK])?,
            name,
        ))
    }

    pub async fn resolve_id(&self, name: &str) -> ApiResult<Option<i64>> {
        Ok(self.find_by_name(name).await?.as_ref().and_then(id_of))
    }

    pub async fn add(&self, options: CredentialAddOptions) -> ApiResult<Value> {
        let request =
            ApiRequest::new(Method::Post, CREDENTIALS_PATH).with_payload(options.into_payload());
        let outcome = self.client.dispatch(request).await?;
        Ok(outcome.require_status(&[StatusCode::CREATED])?.clone())
    }

    pub async fn edit(&self, id: i64, options: CredentialEditOptions) -> ApiResult<Value> {
        let request = ApiRequest::new(Method::Patch, format!("{CREDENTIALS_PATH}{id}/"))
            .with_payload(options.into_payload());
        let outcome = self.client.dispatch(request).await?;
        Ok(outcome.require_status(&[StatusCode::OK])?.clone())
    }

    pub async fn delete(&self, id: i64) -> ApiResult<()> {
        let request = ApiRequest::new(Method::Delete, format!("{CREDENTIALS_PATH}{id}/"));
        let outcome = self.client.dispatch(request).await?;
        outcome.require_status(&[StatusCode::NO_CONTENT])?;
        Ok(())
    }
}

/// Fields for creating a credential.
#[derive(Debug, Clone)]
pub struct CredentialAddOptions {
    pub name: String,
    pub cred_type: ProviderType,
    pub username: String,
    pub password: Option<String>,
    pub ssh_keyfile: Option<PathBuf>,
    pub become_password: Option<String>,
}

impl CredentialAddOptions {
    pub fn new(
        name: impl Into<String>,
        cred_type: ProviderType,
        username: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cred_type,
            username: username.into(),
            password: None,
            ssh_keyfile: None,
            become_password: None,
        }
    }

    fn into_payload(self) -> Value {
        let mut payload = Map::new();
        payload.insert("name".into(), json!(self.name));
        payload.insert("cred_type".into(), json!(self.cred_type.to_string()));
        payload.insert("username".into(), json!(self.username));
        if let Some(password) = self.password {
            payload.insert("password".into(), json!(password));
        }
        if let Some(keyfile) = self.ssh_keyfile {
            payload.insert("ssh_keyfile".into(), json!(keyfile));
        }
        if let Some(become_password) = self.become_password {
            payload.insert("become_password".into(), json!(become_password));
        }
        Value::Object(payload)
    }
}

/// Fields for a partial credential update; only set fields are sent.
#[derive(Debug, Clone, Default)]
pub struct CredentialEditOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssh_keyfile: Option<PathBuf>,
    pub become_password: Option<String>,
}

impl CredentialEditOptions {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.password.is_none()
            && self.ssh_keyfile.is_none()
            && self.become_password.is_none()
    }

    fn into_payload(self) -> Value {
        let mut payload = Map::new();
        if let Some(username) = self.username {
            payload.insert("username".into(), json!(username));
        }
        if let Some(password) = self.password {
            payload.insert("password".into(), json!(password));
        }
        if let Some(keyfile) = self.ssh_keyfile {
            payload.insert("ssh_keyfile".into(), json!(keyfile));
        }
        if let Some(become_password) = self.become_password {
            payload.insert("become_password".into(), json!(become_password));
        }
        Value::Object(payload)
    }
}
