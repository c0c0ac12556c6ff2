use std::fs::{self, OpenOptions};
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-specific configuration helpers.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    root: PathBuf,
}

impl ConfigLocator {
    /// Attempt to discover the persistent configuration directory, creating it if needed.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs =
            ProjectDirs::from("app", "qpc", "qpc").ok_or(ConfigError::MissingProjectDirs)?;
        let config_dir = dirs.config_dir();
        fs::create_dir_all(config_dir).map_err(ConfigError::CreateDir)?;
        set_user_only_permissions(config_dir)?;
        Ok(Self {
            root: config_dir.to_path_buf(),
        })
    }

    /// Path to the persisted server connection settings.
    pub fn server_config_file(&self) -> PathBuf {
        self.root.join("server.json")
    }

    /// Path to the API token obtained by `qpc server login`.
    pub fn client_token_file(&self) -> PathBuf {
        self.root.join("client_token.json")
    }

    /// Path to the persisted insights console settings.
    pub fn insights_config_file(&self) -> PathBuf {
        self.root.join("insights.json")
    }

    /// Path to the bearer token obtained by `qpc insights login`.
    pub fn insights_token_file(&self) -> PathBuf {
        self.root.join("insights_token.json")
    }

    #[cfg(test)]
    pub(crate) fn from_root_for_tests(root: PathBuf) -> Self {
        Self { root }
    }
}

fn set_user_only_permissions(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        let metadata = fs::metadata(path)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o700);
        fs::set_permissions(path, permissions)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// TLS verification policy for the configured server.
///
/// Verification stays off unless explicitly enabled; on-prem servers
/// routinely present self-signed certificates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SslVerify {
    Flag(bool),
    CaBundle(PathBuf),
}

/// Persisted connection settings for the inventory server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub use_http: bool,
    #[serde(default)]
    pub ssl_verify: Option<SslVerify>,
    #[serde(default = "default_require_token")]
    pub require_token: bool,
}

fn default_require_token() -> bool {
    true
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() || self.port == 0 {
            return Err(ConfigError::ServerNotConfigured);
        }
        Ok(())
    }

    pub fn scheme(&self) -> &'static str {
        if self.use_http {
            "http"
        } else {
            "https"
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme(), self.host, self.port)
    }
}

/// Persisted API token for the inventory server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientToken {
    pub token: String,
}

/// Persisted settings for the insights console and its SSO host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightsConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub use_http: bool,
    pub sso_host: String,
}

impl InsightsConfig {
    pub fn base_url(&self) -> String {
        let scheme = if self.use_http { "http" } else { "https" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Persisted bearer token produced by the device-authorization login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightsToken {
    pub token: String,
}

/// Filesystem-backed storage for the persisted qpc records.
///
/// Records are loaded once at process start and handed to the client
/// constructors; nothing re-reads these files mid-command.
pub struct ConfigStore {
    locator: ConfigLocator,
}

impl ConfigStore {
    pub fn new(locator: ConfigLocator) -> Self {
        Self { locator }
    }

    pub fn with_default_locator() -> Result<Self, ConfigError> {
        Ok(Self::new(ConfigLocator::new()?))
    }

    pub fn load_server_config(&self) -> Result<Option<ServerConfig>, ConfigError> {
        self.read(&self.locator.server_config_file())
    }

    /// Load the server configuration, failing when it is absent or invalid.
    pub fn require_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let config = self
            .load_server_config()?
            .ok_or(ConfigError::ServerNotConfigured)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_server_config(&self, config: &ServerConfig) -> Result<(), ConfigError> {
        self.write(&self.locator.server_config_file(), config)
    }

    pub fn load_client_token(&self) -> Result<Option<ClientToken>, ConfigError> {
        self.read(&self.locator.client_token_file())
    }

    pub fn save_client_token(&self, token: &ClientToken) -> Result<(), ConfigError> {
        self.write(&self.locator.client_token_file(), token)
    }

    pub fn delete_client_token(&self) -> Result<(), ConfigError> {
        delete_file(&self.locator.client_token_file())
    }

    pub fn load_insights_config(&self) -> Result<Option<InsightsConfig>, ConfigError> {
        self.read(&self.locator.insights_config_file())
    }

    pub fn save_insights_config(&self, config: &InsightsConfig) -> Result<(), ConfigError> {
        self.write(&self.locator.insights_config_file(), config)
    }

    pub fn load_insights_token(&self) -> Result<Option<InsightsToken>, ConfigError> {
        self.read(&self.locator.insights_token_file())
    }

    pub fn save_insights_token(&self, token: &InsightsToken) -> Result<(), ConfigError> {
        self.write(&self.locator.insights_token_file(), token)
    }

    pub fn delete_insights_token(&self) -> Result<(), ConfigError> {
        delete_file(&self.locator.insights_token_file())
    }

    fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        let record = serde_json::from_str(&raw).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(record))
    }

    fn write<T: Serialize>(&self, path: &Path, record: &T) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(record).map_err(|source| {
            ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(payload.as_bytes())?;

        #[cfg(unix)]
        {
            let mut perm = file.metadata()?.permissions();
            perm.set_mode(0o600);
            fs::set_permissions(path, perm)?;
        }

        Ok(())
    }
}

fn delete_file(path: &Path) -> Result<(), ConfigError> {
    match fs::remove_file(path) {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Errors that can occur when working with persisted configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine configuration directory for qpc")]
    MissingProjectDirs,
    #[error("failed to create configuration directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("server is not configured; run `qpc server config` first")]
    ServerNotConfigured,
    #[error("malformed configuration file {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("filesystem error: {0}")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp_dir: &TempDir) -> ConfigStore {
        ConfigStore::new(ConfigLocator::from_root_for_tests(
            temp_dir.path().to_path_buf(),
        ))
    }

    fn sample_server_config() -> ServerConfig {
        ServerConfig {
            host: "scan.example.com".into(),
            port: 9443,
            use_http: false,
            ssl_verify: None,
            require_token: true,
        }
    }

    #[test]
    fn server_config_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        store.save_server_config(&sample_server_config()).unwrap();
        let loaded = store.require_server_config().unwrap();
        assert_eq!(loaded.host, "scan.example.com");
        assert_eq!(loaded.port, 9443);
        assert!(loaded.require_token);
    }

    #[test]
    fn missing_server_config_reports_not_configured() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let err = store.require_server_config().unwrap_err();
        assert!(matches!(err, ConfigError::ServerNotConfigured));
    }

    #[test]
    fn empty_host_is_invalid() {
        let config = ServerConfig {
            host: "".into(),
            ..sample_server_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ServerNotConfigured)
        ));
    }

    #[test]
    fn zero_port_is_invalid() {
        let config = ServerConfig {
            port: 0,
            ..sample_server_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ServerNotConfigured)
        ));
    }

    #[test]
    fn base_url_reflects_protocol_choice() {
        let mut config = sample_server_config();
        assert_eq!(config.base_url(), "https://scan.example.com:9443");
        config.use_http = true;
        assert_eq!(config.base_url(), "http://scan.example.com:9443");
    }

    #[test]
    fn ssl_verify_accepts_flag_and_bundle_path() {
        let flag: ServerConfig = serde_json::from_str(
            r#"{"host": "h", "port": 1, "use_http": false, "ssl_verify": false, "require_token": true}"#,
        )
        .unwrap();
        assert_eq!(flag.ssl_verify, Some(SslVerify::Flag(false)));

        let bundle: ServerConfig = serde_json::from_str(
            r#"{"host": "h", "port": 1, "ssl_verify": "/etc/pki/ca.pem"}"#,
        )
        .unwrap();
        assert_eq!(
            bundle.ssl_verify,
            Some(SslVerify::CaBundle(PathBuf::from("/etc/pki/ca.pem")))
        );

        let absent: ServerConfig = serde_json::from_str(r#"{"host": "h", "port": 1}"#).unwrap();
        assert_eq!(absent.ssl_verify, None);
    }

    #[test]
    fn token_delete_missing_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        store.delete_client_token().unwrap();
    }

    #[test]
    fn client_token_round_trip_and_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        store
            .save_client_token(&ClientToken {
                token: "opaque".into(),
            })
            .unwrap();
        assert_eq!(
            store.load_client_token().unwrap().unwrap().token,
            "opaque"
        );
        store.delete_client_token().unwrap();
        assert!(store.load_client_token().unwrap().is_none());
    }

    #[test]
    fn insights_config_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        store
            .save_insights_config(&InsightsConfig {
                host: "console.example.com".into(),
                port: 443,
                use_http: false,
                sso_host: "sso.example.com".into(),
            })
            .unwrap();
        let loaded = store.load_insights_config().unwrap().unwrap();
        assert_eq!(loaded.sso_host, "sso.example.com");
        assert_eq!(loaded.base_url(), "https://console.example.com:443");
    }
}
