use reqwest::StatusCode;
use serde_json::{json, Map, Value};

use crate::request::{ApiClient, ApiRequest, ApiResult, Method};

use super::{find_in_results, id_of, results_of};

pub const SCANS_PATH: &str = "/api/v1/scans/";
pub const JOBS_PATH: &str = "/api/v1/jobs/";

/// Lifecycle verbs a running scan job accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Pause,
    Cancel,
    Restart,
}

impl JobAction {
    fn as_segment(self) -> &'static str {
        match self {
            JobAction::Pause => "pause",
            JobAction::Cancel => "cancel",
            JobAction::Restart => "restart",
        }
    }
}

/// Higher-level helpers around scans and their jobs.
#[derive(Clone)]
pub struct ScanService {
    client: ApiClient,
}

impl ScanService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> ApiResult<Vec<Value>> {
        let outcome = self
            .client
            .dispatch(ApiRequest::new(Method::Get, SCANS_PATH))
            .await?;
        Ok(results_of(outcome.require_status(&[StatusCode::OK])?))
    }

    pub async fn find_by_name(&self, name: &str) -> ApiResult<Option<Value>> {
        let request = ApiRequest::new(Method::Get, SCANS_PATH).with_query("name", name);
        let outcome = self.client.dispatch(request).await?;
        Ok(find_in_results(
            outcome.require_status(&[StatusCode::OK])?,
            name,
        ))
    }

    pub async fn resolve_id(&self, name: &str) -> ApiResult<Option<i64>> {
        Ok(self.find_by_name(name).await?.as_ref().and_then(id_of))
    }

    pub async fn add(&self, options: ScanAddOptions) -> ApiResult<Value> {
        let request =
            ApiRequest::new(Method::Post, SCANS_PATH).with_payload(options.into_payload());
        let outcome = self.client.dispatch(request).await?;
        Ok(outcome.require_status(&[StatusCode::CREATED])?.clone())
    }

    /// Kick off a new job for the scan; returns the created job record.
    pub async fn start(&self, scan_id: i64) -> ApiResult<Value> {
        let request = ApiRequest::new(Method::Post, format!("{SCANS_PATH}{scan_id}/jobs/"));
        let outcome = self.client.dispatch(request).await?;
        Ok(outcome.require_status(&[StatusCode::CREATED])?.clone())
    }

    pub async fn job(&self, job_id: i64) -> ApiResult<Value> {
        let request = ApiRequest::new(Method::Get, format!("{JOBS_PATH}{job_id}/"));
        let outcome = self.client.dispatch(request).await?;
        Ok(outcome.require_status(&[StatusCode::OK])?.clone())
    }

    pub async fn job_action(&self, job_id: i64, action: JobAction) -> ApiResult<Value> {
        let request = ApiRequest::new(
            Method::Put,
            format!("{JOBS_PATH}{job_id}/{}/", action.as_segment()),
        );
        let outcome = self.client.dispatch(request).await?;
        Ok(outcome.require_status(&[StatusCode::OK])?.clone())
    }

    pub async fn delete(&self, id: i64) -> ApiResult<()> {
        let request = ApiRequest::new(Method::Delete, format!("{SCANS_PATH}{id}/"));
        let outcome = self.client.dispatch(request).await?;
        outcome.require_status(&[StatusCode::NO_CONTENT])?;
        Ok(())
    }
}

/// Fields for creating a scan. Source names are resolved to ids at the CLI
/// boundary before this struct is built.
#[derive(Debug, Clone)]
pub struct ScanAddOptions {
    pub name: String,
    pub source_ids: Vec<i64>,
    pub max_concurrency: Option<u32>,
}

impl ScanAddOptions {
    fn into_payload(self) -> Value {
        let mut payload = Map::new();
        payload.insert("name".into(), json!(self.name));
        payload.insert("sources".into(), json!(self.source_ids));
        if let Some(max_concurrency) = self.max_concurrency {
            payload.insert(
                "options".into(),
                json!({ "max_concurrency": max_concurrency }),
            );
        }
        Value::Object(payload)
    }
}
