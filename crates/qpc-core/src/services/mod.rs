mod credentials;
mod insights;
mod reports;
mod scans;
mod sources;
mod status;

use serde_json::Value;

pub use credentials::{
    CredentialAddOptions, CredentialEditOptions, CredentialService, CREDENTIALS_PATH,
};
pub use insights::{InsightsService, UPLOAD_PATH};
pub use reports::{check_details_payload, ReportError, ReportService, MERGE_PATH, REPORTS_PATH};
pub use scans::{JobAction, ScanAddOptions, ScanService, JOBS_PATH, SCANS_PATH};
pub use sources::{SourceAddOptions, SourceEditOptions, SourceService, SOURCES_PATH};
pub use status::{ServerService, LOGOUT_PATH, STATUS_PATH, TOKEN_PATH};

/// Kinds of inventory providers the server understands; used for both
/// credential and source types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    Network,
    Vcenter,
    Satellite,
}

impl std::str::FromStr for ProviderType {
    type Err = InvalidProviderType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "network" => Ok(ProviderType::Network),
            "vcenter" => Ok(ProviderType::Vcenter),
            "satellite" => Ok(ProviderType::Satellite),
            other => Err(InvalidProviderType(other.to_owned())),
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            ProviderType::Network => "network",
            ProviderType::Vcenter => "vcenter",
            ProviderType::Satellite => "satellite",
        };
        write!(f, "{value}")
    }
}

/// Error reported when parsing an unsupported provider type.
#[derive(Debug, thiserror::Error)]
#[error("invalid type '{0}'; expected network, vcenter, or satellite")]
pub struct InvalidProviderType(pub String);

/// Rows of a paginated `{count, next, previous, results}` list envelope.
pub(crate) fn results_of(body: &Value) -> Vec<Value> {
    body.get("results")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// The list endpoints match names by substring; pick the exact match.
pub(crate) fn find_in_results(body: &Value, name: &str) -> Option<Value> {
    results_of(body)
        .into_iter()
        .find(|item| item.get("name").and_then(Value::as_str) == Some(name))
}

pub(crate) fn id_of(item: &Value) -> Option<i64> {
    item.get("id").and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_provider_variants() {
        assert_eq!(
            "network".parse::<ProviderType>().unwrap(),
            ProviderType::Network
        );
        assert_eq!(
            "VCenter".parse::<ProviderType>().unwrap(),
            ProviderType::Vcenter
        );
        assert_eq!(
            "satellite".parse::<ProviderType>().unwrap(),
            ProviderType::Satellite
        );
        assert!("openshift".parse::<ProviderType>().is_err());
    }

    #[test]
    fn exact_name_match_skips_substring_hits() {
        let body = serde_json::json!({
            "count": 2,
            "results": [
                {"id": 1, "name": "prod-east-1"},
                {"id": 2, "name": "prod-east"},
            ],
        });
        let found = find_in_results(&body, "prod-east").unwrap();
        assert_eq!(id_of(&found), Some(2));
        assert!(find_in_results(&body, "prod-west").is_none());
    }
}
