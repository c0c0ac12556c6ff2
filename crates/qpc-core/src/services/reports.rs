use std::fs;
use std::path::{Path, PathBuf};

use reqwest::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

use crate::request::{ApiClient, ApiError, ApiRequest, ApiResult, Method};
use crate::version::ServerVersion;

pub const REPORTS_PATH: &str = "/api/v1/reports/";
pub const MERGE_PATH: &str = "/api/v1/reports/merge/";

/// Keys every details report file must carry at the top level.
const REQUIRED_KEYS: [&str; 3] = ["report_type", "report_version", "sources"];
const DETAILS_REPORT_TYPE: &str = "details";

/// The merge endpoint arrived after the 1.0 API.
const MERGE_MIN_SERVER_VERSION: ServerVersion = ServerVersion(1, 1, 0);

/// Errors surfaced by report retrieval and merge.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("unable to read report file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("report file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("report file {path} is missing required key '{key}'")]
    MissingKey { path: PathBuf, key: &'static str },
    #[error("report file {path} is not a details report")]
    NotDetailsReport { path: PathBuf },
    #[error("report file {path} has a non-array 'sources' section")]
    MalformedSources { path: PathBuf },
    #[error("no report files were given to merge")]
    NoReports,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Check a parsed details-report payload for the required shape.
pub fn check_details_payload(payload: &Value) -> Result<(), &'static str> {
    for key in REQUIRED_KEYS {
        if payload.get(key).is_none() {
            return Err(key);
        }
    }
    Ok(())
}

/// Higher-level helpers around finished reports.
#[derive(Clone)]
pub struct ReportService {
    client: ApiClient,
}

impl ReportService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Raw fact collection for a report.
    pub async fn details(&self, report_id: i64) -> ApiResult<Value> {
        self.fetch(report_id, "details").await
    }

    /// Deduplicated, fingerprinted system view for a report.
    pub async fn deployments(&self, report_id: i64) -> ApiResult<Value> {
        self.fetch(report_id, "deployments").await
    }

    async fn fetch(&self, report_id: i64, flavor: &str) -> ApiResult<Value> {
        let request = ApiRequest::new(Method::Get, format!("{REPORTS_PATH}{report_id}/{flavor}/"));
        let outcome = self.client.dispatch(request).await?;
        Ok(outcome.require_status(&[StatusCode::OK])?.clone())
    }

    /// Validate local details-report files and upload their combined
    /// sources as one merged report. Any invalid file aborts the merge
    /// before anything is uploaded.
    pub async fn merge(&self, paths: &[PathBuf]) -> Result<Value, ReportError> {
        if paths.is_empty() {
            return Err(ReportError::NoReports);
        }

        let mut sources = Vec::new();
        for path in paths {
            let report = load_details_report(path)?;
            match report.get("sources").and_then(Value::as_array) {
                Some(report_sources) => sources.extend(report_sources.iter().cloned()),
                None => {
                    return Err(ReportError::MalformedSources { path: path.clone() });
                }
            }
        }

        let payload = json!({
            "report_type": DETAILS_REPORT_TYPE,
            "sources": sources,
        });
        let request = ApiRequest::new(Method::Post, MERGE_PATH)
            .with_payload(payload)
            .with_min_server_version(MERGE_MIN_SERVER_VERSION);
        let outcome = self.client.dispatch(request).await?;
        Ok(outcome.require_status(&[StatusCode::CREATED])?.clone())
    }
}

fn load_details_report(path: &Path) -> Result<Value, ReportError> {
    let raw = fs::read_to_string(path).map_err(|source| ReportError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let report: Value = serde_json::from_str(&raw).map_err(|source| ReportError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if let Err(key) = check_details_payload(&report) {
        return Err(ReportError::MissingKey {
            path: path.to_path_buf(),
            key,
        });
    }
    if report.get("report_type").and_then(Value::as_str) != Some(DETAILS_REPORT_TYPE) {
        return Err(ReportError::NotDetailsReport {
            path: path.to_path_buf(),
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use httpmock::prelude::*;
    use std::io::Write;
    use tempfile::TempDir;

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

    fn write_report(dir: &TempDir, name: &str, payload: &Value) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(payload.to_string().as_bytes()).unwrap();
        path
    }

    fn valid_report(host: &str) -> Value {
        serde_json::json!({
            "report_type": "details",
            "report_version": "1.1.0+local",
            "sources": [{
                "source_name": "dc-east",
                "facts": [{"connection_host": host}],
            }],
        })
    }

    #[test]
    fn missing_key_is_named() {
        let temp_dir = TempDir::new().unwrap();
        let mut report = valid_report("h1");
        report.as_object_mut().unwrap().remove("report_version");
        let path = write_report(&temp_dir, "bad.json", &report);

        let err = load_details_report(&path).unwrap_err();
        match err {
            ReportError::MissingKey { key, .. } => assert_eq!(key, "report_version"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_details_report_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut report = valid_report("h1");
        report["report_type"] = serde_json::json!("deployments");
        let path = write_report(&temp_dir, "wrong.json", &report);

        assert!(matches!(
            load_details_report(&path).unwrap_err(),
            ReportError::NotDetailsReport { .. }
        ));
    }

    #[tokio::test]
    async fn merge_bundles_sources_from_every_file() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/reports/merge/")
                .json_body_partial(r#"{"report_type": "details"}"#);
            then.status(201)
                .json_body_obj(&serde_json::json!({"id": 42}));
        });

        let temp_dir = TempDir::new().unwrap();
        let first = write_report(&temp_dir, "one.json", &valid_report("h1"));
        let second = write_report(&temp_dir, "two.json", &valid_report("h2"));

        let service = ReportService::new(client(&server));
        let merged = service.merge(&[first, second]).await.unwrap();
        mock.assert();
        assert_eq!(merged["id"], 42);
    }

    #[tokio::test]
    async fn invalid_file_aborts_before_upload() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/v1/reports/merge/");
            then.status(201).json_body_obj(&serde_json::json!({"id": 1}));
        });

        let temp_dir = TempDir::new().unwrap();
        let good = write_report(&temp_dir, "good.json", &valid_report("h1"));
        let mut broken = valid_report("h2");
        broken.as_object_mut().unwrap().remove("sources");
        let bad = write_report(&temp_dir, "bad.json", &broken);

        let service = ReportService::new(client(&server));
        let err = service.merge(&[good, bad]).await.unwrap_err();
        assert!(matches!(err, ReportError::MissingKey { .. }));
        mock.assert_hits(0);
    }

    #[tokio::test]
    async fn merge_with_no_files_is_rejected() {
        let server = MockServer::start();
        let service = ReportService::new(client(&server));
        assert!(matches!(
            service.merge(&[]).await.unwrap_err(),
            ReportError::NoReports
        ));
    }
}
