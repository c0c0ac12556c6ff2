use reqwest::StatusCode;
use serde_json::{json, Map, Value};

use crate::request::{ApiClient, ApiRequest, ApiResult, Method};

use super::{find_in_results, id_of, results_of, ProviderType};

pub const SOURCES_PATH: &str = "/api/v1/sources/";

/// Higher-level helpers around scan sources.
#[derive(Clone)]
pub struct SourceService {
    client: ApiClient,
}

impl SourceService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn list(&self, source_type: Option<ProviderType>) -> ApiResult<Vec<Value>> {
        let mut request = ApiRequest::new(Method::Get, SOURCES_PATH);
        if let Some(kind) = source_type {
            request = request.with_query("source_type", kind.to_string());
        }
        let outcome = self.client.dispatch(request).await?;
        Ok(results_of(outcome.require_status(&[StatusCode::OK])?))
    }

    pub async fn find_by_name(&self, name: &str) -> ApiResult<Option<Value>> {
        let request = ApiRequest::new(Method::Get, SOURCES_PATH).with_query("name", name);
        let outcome = self.client.dispatch(request).await?;
        Ok(find_in_results(
            outcome.require_status(&[StatusCode::OK])?,
            name,
        ))
    }

    pub async fn resolve_id(&self, name: &str) -> ApiResult<Option<i64>> {
        Ok(self.find_by_name(name).await?.as_ref().and_then(id_of))
    }

    pub async fn add(&self, options: SourceAddOptions) -> ApiResult<Value> {
        let request =
            ApiRequest::new(Method::Post, SOURCES_PATH).with_payload(options.into_payload());
        let outcome = self.client.dispatch(request).await?;
        Ok(outcome.require_status(&[StatusCode::CREATED])?.clone())
    }

    pub async fn edit(&self, id: i64, options: SourceEditOptions) -> ApiResult<Value> {
        let request = ApiRequest::new(Method::Patch, format!("{SOURCES_PATH}{id}/"))
            .with_payload(options.into_payload());
        let outcome = self.client.dispatch(request).await?;
        Ok(outcome.require_status(&[StatusCode::OK])?.clone())
    }

    pub async fn delete(&self, id: i64) -> ApiResult<()> {
        let request = ApiRequest::new(Method::Delete, format!("{SOURCES_PATH}{id}/"));
        let outcome = self.client.dispatch(request).await?;
        outcome.require_status(&[StatusCode::NO_CONTENT])?;
        Ok(())
    }
}

/// Fields for creating a source. Credential names are resolved to ids at
/// the CLI boundary before this struct is built.
#[derive(Debug, Clone)]
pub struct SourceAddOptions {
    pub name: String,
    pub source_type: ProviderType,
    pub hosts: Vec<String>,
    pub port: Option<u16>,
    pub credential_ids: Vec<i64>,
}

impl SourceAddOptions {
    fn into_payload(self) -> Value {
        let mut payload = Map::new();
        payload.insert("name".into(), json!(self.name));
        payload.insert("source_type".into(), json!(self.source_type.to_string()));
        payload.insert("hosts".into(), json!(self.hosts));
        payload.insert("credentials".into(), json!(self.credential_ids));
        if let Some(port) = self.port {
            payload.insert("port".into(), json!(port));
        }
        Value::Object(payload)
    }
}

/// Fields for a partial source update; only set fields are sent.
#[derive(Debug, Clone, Default)]
pub struct SourceEditOptions {
    pub hosts: Option<Vec<String>>,
    pub port: Option<u16>,
    pub credential_ids: Option<Vec<i64>>,
}

impl SourceEditOptions {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_none() && self.port.is_none() && self.credential_ids.is_none()
    }

    fn into_payload(self) -> Value {
        let mut payload = Map::new();
        if let Some(hosts) = self.hosts {
            payload.insert("hosts".into(), json!(hosts));
        }
        if let Some(port) = self.port {
            payload.insert("port".into(), json!(port));
        }
        if let Some(credential_ids) = self.credential_ids {
            payload.insert("credentials".into(), json!(credential_ids));
        }
        Value::Object(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> ApiClient {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: server.port(),
            use_http: true,
            ssl_verify: None,
            require_token: true,
        };
        ApiClient::new(&config, Some("token".into())).unwrap()
    }

    #[test]
    fn add_payload_carries_hosts_and_credentials() {
        let options = SourceAddOptions {
            name: "dc-east".into(),
            source_type: ProviderType::Network,
            hosts: vec!["10.0.0.0/24".into(), "bare-metal-7".into()],
            port: Some(2222),
            credential_ids: vec![9, 12],
        };
        let payload = options.into_payload();
        assert_eq!(payload["source_type"], "network");
        assert_eq!(payload["hosts"].as_array().unwrap().len(), 2);
        assert_eq!(payload["credentials"], json!([9, 12]));
        assert_eq!(payload["port"], 2222);
    }

    #[test]
    fn default_port_is_omitted() {
        let options = SourceAddOptions {
            name: "vc".into(),
            source_type: ProviderType::Vcenter,
            hosts: vec!["vcenter.example.com".into()],
            port: None,
            credential_ids: vec![1],
        };
        let payload = options.into_payload();
        assert!(payload.get("port").is_none());
    }

    #[tokio::test]
    async fn list_filters_by_type() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/sources/")
                .query_param("source_type", "satellite");
            then.status(200).json_body_obj(&serde_json::json!({
                "count": 1,
                "results": [{"id": 4, "name": "sat6"}],
            }));
        });

        let service = SourceService::new(client(&server));
        let sources = service.list(Some(ProviderType::Satellite)).await.unwrap();
        mock.assert();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0]["name"], "sat6");
    }
}
