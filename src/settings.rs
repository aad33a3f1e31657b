use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::retryable::RetryOptions;

pub const DEFAULT_HOST: &str = "http://localhost";
pub const DEFAULT_PORT: u16 = 5984;
pub const DEFAULT_DB: &str = "tasks";
pub const DEFAULT_USER: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "admin";
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Prefix of environment variables read by [`Settings::load`].
pub const ENV_PREFIX: &str = "DOCSYNC";

fn default_db() -> String {
    DEFAULT_DB.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_write_attempts() -> usize {
    2
}

fn default_read_retries() -> usize {
    2
}

/// Connection parameters of one remote database.
///
/// Everything but `db` is optional; missing values fall back to the
/// `DEFAULT_*` constants when a client is built. The password is accepted on
/// input but never serialized back out.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct StorageConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_db")]
    pub db: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Only keys starting with this prefix take part in import.
    #[serde(default)]
    pub prefix_filter: Option<String>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Attempts for a conflicting write, first one included.
    #[serde(default = "default_write_attempts")]
    pub write_attempts: usize,
    /// Retries of idempotent reads on transient failures.
    #[serde(default = "default_read_retries")]
    pub read_retries: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DB)
    }
}

impl StorageConfig {
    pub fn new(db: impl Into<String>) -> Self {
        Self {
            host: None,
            port: None,
            db: db.into(),
            user: None,
            password: None,
            prefix_filter: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            page_size: default_page_size(),
            write_attempts: default_write_attempts(),
            read_retries: default_read_retries(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_prefix_filter(mut self, prefix: impl Into<String>) -> Self {
        self.prefix_filter = Some(prefix.into());
        self
    }

    /// `scheme://host:port`, with `http://` assumed when no scheme is given.
    pub fn base_url(&self) -> String {
        let host = self
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_HOST)
            .trim_end_matches('/');
        let port = self.port.unwrap_or(DEFAULT_PORT);
        if host.contains("://") {
            format!("{host}:{port}")
        } else {
            format!("http://{host}:{port}")
        }
    }

    pub fn user(&self) -> &str {
        self.user
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_USER)
    }

    pub fn password(&self) -> &str {
        self.password
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PASSWORD)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn read_retry_options(&self) -> RetryOptions {
        RetryOptions::new(self.read_retries)
    }

    /// Whether `key` passes the configured prefix filter.
    pub fn accepts_key(&self, key: &str) -> bool {
        match self.prefix_filter.as_deref() {
            Some(prefix) if !prefix.is_empty() => key.starts_with(prefix),
            _ => true,
        }
    }

    /// Structural checks that need no network round-trip.
    pub fn check(&self) -> Result<()> {
        if self.db.trim().is_empty() {
            return Err(Error::validation("Database name must not be empty."));
        }
        if self.db.starts_with('_') {
            return Err(Error::validation(
                "Database name must not start with an underscore.",
            ));
        }
        if self.page_size == 0 {
            return Err(Error::validation("Page size must be positive."));
        }
        if self.write_attempts == 0 {
            return Err(Error::validation("Write attempts must be positive."));
        }
        if self.connect_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(Error::validation("Timeouts must be positive."));
        }
        Ok(())
    }
}

/// Top-level settings, read from an optional file plus `DOCSYNC_*` variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub storage: StorageConfig,
    /// Connection URL of the link registry database, when one is used.
    #[serde(default)]
    pub registry_url: Option<String>,
    #[serde(default = "default_links_table")]
    pub links_table: String,
}

fn default_links_table() -> String {
    "docsync_links".to_string()
}

impl Settings {
    /// Loads settings. Environment variables use `__` as the nesting
    /// separator, e.g. `DOCSYNC_STORAGE__HOST`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        settings.storage.check()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_couchdb_conventions() {
        let config = StorageConfig::default();
        assert_eq!(config.db, "tasks");
        assert_eq!(config.base_url(), "http://localhost:5984");
        assert_eq!(config.user(), "admin");
        assert_eq!(config.password(), "admin");
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.write_attempts, 2);
    }

    #[test]
    fn test_base_url_adds_scheme() {
        let config = StorageConfig::new("db").with_host("couch.internal").with_port(6984);
        assert_eq!(config.base_url(), "http://couch.internal:6984");

        let config = StorageConfig::new("db").with_host("https://couch.example.com/");
        assert_eq!(config.base_url(), "https://couch.example.com:5984");
    }

    #[test]
    fn test_empty_credentials_fall_back() {
        let config = StorageConfig::new("db").with_credentials("", "");
        assert_eq!(config.user(), "admin");
        assert_eq!(config.password(), "admin");
    }

    #[test]
    fn test_password_never_serialized() -> Result<()> {
        let config = StorageConfig::new("db").with_credentials("alice", "s3cret");
        let json = serde_json::to_value(&config)?;
        assert_eq!(json["user"], "alice");
        assert!(json.get("password").is_none());
        assert!(!json.to_string().contains("s3cret"));
        Ok(())
    }

    #[test]
    fn test_deserialize_applies_defaults() -> Result<()> {
        let config: StorageConfig = serde_json::from_str(r#"{"host": "couch", "password": "pw"}"#)?;
        assert_eq!(config.db, "tasks");
        assert_eq!(config.password(), "pw");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn test_prefix_filter() {
        let config = StorageConfig::new("db").with_prefix_filter("task-");
        assert!(config.accepts_key("task-1"));
        assert!(!config.accepts_key("other-1"));
        assert!(StorageConfig::new("db").accepts_key("anything"));
    }

    #[test]
    fn test_check_rejects_bad_values() {
        assert!(StorageConfig::new("").check().is_err());
        assert!(StorageConfig::new("_users").check().is_err());
        let mut config = StorageConfig::new("db");
        config.page_size = 0;
        assert!(matches!(config.check(), Err(Error::Validation(_))));
        assert!(StorageConfig::new("db").check().is_ok());
    }

    #[test]
    fn test_check_rejects_zero_timeouts() {
        let mut config = StorageConfig::new("db");
        config.request_timeout_secs = 0;
        let err = config.check().unwrap_err();
        assert_eq!(err.to_string(), "Timeouts must be positive.");

        let mut config = StorageConfig::new("db");
        config.connect_timeout_secs = 0;
        assert!(matches!(config.check(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docsync.toml");
        std::fs::write(
            &path,
            r#"
registry_url = "postgres://localhost/docsync"

[storage]
host = "couch"
db = "annotations"
page_size = 50
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path))?;
        assert_eq!(
            settings.registry_url.as_deref(),
            Some("postgres://localhost/docsync")
        );
        assert_eq!(settings.links_table, "docsync_links");
        assert_eq!(settings.storage.db, "annotations");
        assert_eq!(settings.storage.page_size, 50);
        assert_eq!(settings.storage.base_url(), "http://couch:5984");
        Ok(())
    }

    #[test]
    fn test_load_rejects_invalid_storage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docsync.toml");
        std::fs::write(&path, "[storage]\ndb = \"_replicator\"\n").unwrap();
        assert!(matches!(
            Settings::load(Some(&path)),
            Err(Error::Validation(_))
        ));
    }
}
