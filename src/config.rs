//! Configuration management for Vitalgate
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//! Secrets (operator bearer token, client secret, encryption key) may come
//! from any of these sources; the process refuses to start without them.

use crate::auth::crypto::EncryptionKey;
use crate::error::{Result, VitalgateError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for Vitalgate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server and protocol session settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream OAuth client settings
    #[serde(default)]
    pub oauth: OAuthConfig,
    /// Token file settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Upstream data API settings
    #[serde(default)]
    pub api: ApiConfig,
}

// ---------------------------------------------------------------------------
// server
// ---------------------------------------------------------------------------

/// HTTP server configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Static secret every protocol request must present as a bearer token
    #[serde(default)]
    pub bearer_token: String,

    /// Interval between keep-alive comments on streaming sessions
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,

    /// Streaming sessions without activity for this long are closed
    #[serde(default = "default_session_idle_timeout")]
    pub session_idle_timeout_seconds: u64,

    /// Maximum number of concurrently open streaming sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Buffered events per streaming session before results are dropped
    #[serde(default = "default_session_channel_capacity")]
    pub session_channel_capacity: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_heartbeat_interval() -> u64 {
    15
}

fn default_session_idle_timeout() -> u64 {
    300
}

fn default_max_sessions() -> usize {
    64
}

fn default_session_channel_capacity() -> usize {
    32
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            bearer_token: String::new(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            session_idle_timeout_seconds: default_session_idle_timeout(),
            max_sessions: default_max_sessions(),
            session_channel_capacity: default_session_channel_capacity(),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("bearer_token", &"[redacted]")
            .field("heartbeat_interval_seconds", &self.heartbeat_interval_seconds)
            .field("session_idle_timeout_seconds", &self.session_idle_timeout_seconds)
            .field("max_sessions", &self.max_sessions)
            .field("session_channel_capacity", &self.session_channel_capacity)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// oauth
// ---------------------------------------------------------------------------

/// Upstream OAuth 2.0 client configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Client id registered with the authorization server
    #[serde(default)]
    pub client_id: String,

    /// Client secret registered with the authorization server
    #[serde(default)]
    pub client_secret: String,

    /// Public URL of this broker's `/oauth/callback`
    #[serde(default)]
    pub redirect_url: String,

    /// Upstream authorization endpoint
    #[serde(default = "default_authorization_url")]
    pub authorization_url: String,

    /// Upstream token endpoint
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Scopes requested during authorization
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Lifetime of a pending authorization attempt
    #[serde(default = "default_attempt_ttl")]
    pub attempt_ttl_seconds: u64,

    /// Refresh when less than this much access-token lifetime remains
    #[serde(default = "default_refresh_buffer")]
    pub refresh_buffer_seconds: u64,

    /// Interval of the expired-attempt purge task
    #[serde(default = "default_purge_interval")]
    pub purge_interval_seconds: u64,
}

fn default_authorization_url() -> String {
    "https://api.prod.whoop.com/oauth/oauth2/auth".to_string()
}

fn default_token_url() -> String {
    "https://api.prod.whoop.com/oauth/oauth2/token".to_string()
}

fn default_scopes() -> Vec<String> {
    [
        "offline",
        "read:profile",
        "read:body_measurement",
        "read:cycles",
        "read:recovery",
        "read:sleep",
        "read:workout",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_attempt_ttl() -> u64 {
    600
}

fn default_refresh_buffer() -> u64 {
    300
}

fn default_purge_interval() -> u64 {
    60
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: String::new(),
            authorization_url: default_authorization_url(),
            token_url: default_token_url(),
            scopes: default_scopes(),
            attempt_ttl_seconds: default_attempt_ttl(),
            refresh_buffer_seconds: default_refresh_buffer(),
            purge_interval_seconds: default_purge_interval(),
        }
    }
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("redirect_url", &self.redirect_url)
            .field("authorization_url", &self.authorization_url)
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .field("attempt_ttl_seconds", &self.attempt_ttl_seconds)
            .field("refresh_buffer_seconds", &self.refresh_buffer_seconds)
            .field("purge_interval_seconds", &self.purge_interval_seconds)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// storage
// ---------------------------------------------------------------------------

/// Token file configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Location of the encrypted token file
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,

    /// Standard-base64 encoding of a 32-byte key
    #[serde(default)]
    pub encryption_key: String,
}

/// Platform data directory, or the working directory when none exists.
fn default_token_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "vitalgate")
        .map(|dirs| dirs.data_dir().join("token.json"))
        .unwrap_or_else(|| PathBuf::from("vitalgate-token.json"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            token_path: default_token_path(),
            encryption_key: String::new(),
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("token_path", &self.token_path)
            .field("encryption_key", &"[redacted]")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// api
// ---------------------------------------------------------------------------

/// Upstream data API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL prepended to every data path
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// Per-request timeout
    #[serde(default = "default_api_timeout")]
    pub timeout_seconds: u64,
}

fn default_api_base_url() -> String {
    "https://api.prod.whoop.com/developer".to_string()
}

fn default_api_timeout() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            timeout_seconds: default_api_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration. Call
    /// [`Config::validate`] before using it to start the server.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| VitalgateError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| VitalgateError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(host) = std::env::var("VITALGATE_HOST") {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("VITALGATE_PORT") {
            if let Ok(value) = port.parse() {
                self.server.port = value;
            } else {
                tracing::warn!("Invalid VITALGATE_PORT: {}", port);
            }
        }

        if let Ok(token) = std::env::var("VITALGATE_BEARER_TOKEN") {
            self.server.bearer_token = token;
        }

        if let Ok(client_id) = std::env::var("VITALGATE_CLIENT_ID") {
            self.oauth.client_id = client_id;
        }

        if let Ok(secret) = std::env::var("VITALGATE_CLIENT_SECRET") {
            self.oauth.client_secret = secret;
        }

        if let Ok(url) = std::env::var("VITALGATE_REDIRECT_URL") {
            self.oauth.redirect_url = url;
        }

        if let Ok(url) = std::env::var("VITALGATE_AUTHORIZATION_URL") {
            self.oauth.authorization_url = url;
        }

        if let Ok(url) = std::env::var("VITALGATE_TOKEN_URL") {
            self.oauth.token_url = url;
        }

        if let Ok(scopes) = std::env::var("VITALGATE_SCOPES") {
            self.oauth.scopes = scopes.split_whitespace().map(str::to_string).collect();
        }

        if let Ok(key) = std::env::var("VITALGATE_ENCRYPTION_KEY") {
            self.storage.encryption_key = key;
        }

        if let Ok(path) = std::env::var("VITALGATE_TOKEN_PATH") {
            self.storage.token_path = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("VITALGATE_API_BASE_URL") {
            self.api.base_url = url;
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let crate::cli::Commands::Serve { host, port } = &cli.command {
            if let Some(host) = host {
                self.server.host = host.clone();
            }
            if let Some(port) = port {
                self.server.port = *port;
            }
        }
    }

    /// Validate the configuration
    ///
    /// Ensures every required secret is present, the encryption key has the
    /// right length, and the numeric limits are usable.
    ///
    /// # Errors
    ///
    /// Returns [`VitalgateError::Config`] naming the first problem found
    pub fn validate(&self) -> Result<()> {
        self.validate_storage()?;

        let required = [
            ("server.bearer_token", &self.server.bearer_token),
            ("oauth.client_id", &self.oauth.client_id),
            ("oauth.client_secret", &self.oauth.client_secret),
            ("oauth.redirect_url", &self.oauth.redirect_url),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(VitalgateError::Config(format!("{} is required", name)).into());
            }
        }

        for (name, value) in [
            ("oauth.redirect_url", &self.oauth.redirect_url),
            ("oauth.authorization_url", &self.oauth.authorization_url),
            ("oauth.token_url", &self.oauth.token_url),
            ("api.base_url", &self.api.base_url),
        ] {
            url::Url::parse(value).map_err(|e| {
                VitalgateError::Config(format!("{} is not a valid URL: {}", name, e))
            })?;
        }

        if self.server.heartbeat_interval_seconds == 0 {
            return Err(VitalgateError::Config(
                "server.heartbeat_interval_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.server.session_idle_timeout_seconds == 0 {
            return Err(VitalgateError::Config(
                "server.session_idle_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.server.max_sessions == 0 || self.server.session_channel_capacity == 0 {
            return Err(VitalgateError::Config(
                "server.max_sessions and server.session_channel_capacity must be greater than 0"
                    .to_string(),
            )
            .into());
        }

        if self.oauth.attempt_ttl_seconds == 0 || self.oauth.purge_interval_seconds == 0 {
            return Err(VitalgateError::Config(
                "oauth.attempt_ttl_seconds and oauth.purge_interval_seconds must be greater than 0"
                    .to_string(),
            )
            .into());
        }

        if self.api.timeout_seconds == 0 {
            return Err(VitalgateError::Config(
                "api.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// Validates only what the token file commands (`status`, `logout`) need.
    ///
    /// # Errors
    ///
    /// Returns [`VitalgateError::Config`] when the encryption key is missing
    /// or does not decode to 32 bytes
    pub fn validate_storage(&self) -> Result<()> {
        self.encryption_key().map(|_| ())
    }

    /// Decodes `storage.encryption_key`.
    ///
    /// # Errors
    ///
    /// Returns [`VitalgateError::Config`] when absent or malformed
    pub fn encryption_key(&self) -> Result<EncryptionKey> {
        if self.storage.encryption_key.trim().is_empty() {
            return Err(
                VitalgateError::Config("storage.encryption_key is required".to_string()).into(),
            );
        }
        EncryptionKey::from_base64(&self.storage.encryption_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.server.bearer_token = "operator-secret".to_string();
        config.oauth.client_id = "client".to_string();
        config.oauth.client_secret = "secret".to_string();
        config.oauth.redirect_url = "http://localhost:8080/oauth/callback".to_string();
        config.storage.encryption_key = EncryptionKey::generate().to_base64();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.heartbeat_interval_seconds, 15);
        assert_eq!(config.server.session_idle_timeout_seconds, 300);
        assert_eq!(config.server.max_sessions, 64);
        assert_eq!(config.oauth.attempt_ttl_seconds, 600);
        assert_eq!(config.oauth.refresh_buffer_seconds, 300);
        assert_eq!(config.api.timeout_seconds, 30);
        assert!(config.oauth.scopes.contains(&"offline".to_string()));
    }

    #[test]
    fn test_config_validation_success() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validation_requires_each_secret() {
        let cases: [fn(&mut Config); 5] = [
            |c| c.server.bearer_token.clear(),
            |c| c.oauth.client_id.clear(),
            |c| c.oauth.client_secret.clear(),
            |c| c.oauth.redirect_url.clear(),
            |c| c.storage.encryption_key.clear(),
        ];
        for clear in cases {
            let mut config = valid_config();
            clear(&mut config);
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("is required"), "got: {err}");
        }
    }

    #[test]
    fn test_validation_rejects_short_key() {
        let mut config = valid_config();
        config.storage.encryption_key = "c2hvcnQ=".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn test_validation_rejects_zero_limits() {
        let mut config = valid_config();
        config.server.heartbeat_interval_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.server.max_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_redirect_url() {
        let mut config = valid_config();
        config.oauth.redirect_url = "not a url".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("oauth.redirect_url"));
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
server:
  port: 9100
  bearer_token: "abc"
  max_sessions: 4
oauth:
  client_id: "id"
  client_secret: "secret"
  redirect_url: "https://broker.example.com/oauth/callback"
  scopes: ["offline", "read:sleep"]
storage:
  token_path: "/tmp/vg/token.json"
api:
  base_url: "http://localhost:1234"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.max_sessions, 4);
        assert_eq!(config.server.heartbeat_interval_seconds, 15);
        assert_eq!(config.oauth.scopes, vec!["offline", "read:sleep"]);
        assert_eq!(config.storage.token_path, PathBuf::from("/tmp/vg/token.json"));
        assert_eq!(config.api.base_url, "http://localhost:1234");
        assert_eq!(config.api.timeout_seconds, 30);
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file_uses_defaults() {
        let cli = crate::cli::Cli::default();
        let config = Config::load("nonexistent.yaml", &cli).unwrap();
        assert_eq!(config.server.heartbeat_interval_seconds, 15);
    }

    #[test]
    #[serial]
    fn test_cli_overrides_host_and_port() {
        let cli = crate::cli::Cli {
            command: crate::cli::Commands::Serve {
                host: Some("0.0.0.0".to_string()),
                port: Some(7777),
            },
            ..crate::cli::Cli::default()
        };
        let config = Config::load("nonexistent.yaml", &cli).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 7777);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = valid_config();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains(&config.storage.encryption_key));
        assert!(!rendered.contains("operator-secret"));
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("client"));
    }

    #[test]
    #[serial]
    fn test_apply_env_vars_overrides_secrets_and_urls() {
        let key = EncryptionKey::generate().to_base64();
        std::env::set_var("VITALGATE_BEARER_TOKEN", "env-bearer");
        std::env::set_var("VITALGATE_CLIENT_ID", "env-client");
        std::env::set_var("VITALGATE_SCOPES", "offline  read:cycles");
        std::env::set_var("VITALGATE_ENCRYPTION_KEY", &key);
        std::env::set_var("VITALGATE_PORT", "not-a-port");

        let mut config = Config::default();
        config.apply_env_vars();

        assert_eq!(config.server.bearer_token, "env-bearer");
        assert_eq!(config.oauth.client_id, "env-client");
        assert_eq!(config.oauth.scopes, vec!["offline", "read:cycles"]);
        assert_eq!(config.storage.encryption_key, key);
        assert_eq!(config.server.port, 8080);

        for var in [
            "VITALGATE_BEARER_TOKEN",
            "VITALGATE_CLIENT_ID",
            "VITALGATE_SCOPES",
            "VITALGATE_ENCRYPTION_KEY",
            "VITALGATE_PORT",
        ] {
            std::env::remove_var(var);
        }
    }
}
