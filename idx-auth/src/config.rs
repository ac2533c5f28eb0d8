//! Engine configuration
//!
//! Configuration is read from a TOML file, then overridden by `OKTA_IDX_*`
//! environment variables, then validated into an immutable [`IdxConfig`].
//!
//! ```toml
//! [client]
//! issuer = "https://example.okta.com/oauth2/default"
//! client_id = "0oa..."
//! redirect_uri = "http://localhost:8080/authorization-code/callback"
//! scopes = ["openid", "profile", "offline_access"]
//!
//! [transport]
//! timeout = "30s"
//!
//! [polling]
//! min_interval = "2s"
//! max_wait = "5m"
//! ```

use crate::error::ConfigError;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Environment variable overriding `client.issuer`
pub const ENV_ISSUER: &str = "OKTA_IDX_ISSUER";
/// Environment variable overriding `client.client_id`
pub const ENV_CLIENT_ID: &str = "OKTA_IDX_CLIENTID";
/// Environment variable overriding `client.client_secret`
pub const ENV_CLIENT_SECRET: &str = "OKTA_IDX_CLIENTSECRET";
/// Environment variable overriding `client.scopes` (space separated)
pub const ENV_SCOPES: &str = "OKTA_IDX_SCOPES";
/// Environment variable overriding `client.redirect_uri`
pub const ENV_REDIRECT_URI: &str = "OKTA_IDX_REDIRECTURI";

/// Complete engine configuration
#[derive(Debug, Clone)]
pub struct IdxConfig {
    /// OAuth client
    pub client: ClientConfig,
    /// HTTP transport
    pub transport: TransportSettings,
    /// Polling limits
    pub polling: PollPolicy,
}

impl IdxConfig {
    /// Configuration with default transport and polling settings
    pub fn new(client: ClientConfig) -> Self {
        Self {
            client,
            transport: TransportSettings::default(),
            polling: PollPolicy::default(),
        }
    }

    /// Load a TOML file, apply environment overrides, validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut raw: RawConfig = toml::from_str(&content)?;
        raw.client.apply_env();
        raw.validate()
    }

    /// Build from environment variables alone
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut raw = RawConfig::default();
        raw.client.apply_env();
        raw.validate()
    }

    /// Parse TOML without consulting the environment
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content)?;
        raw.validate()
    }
}

/// OAuth client registration
#[derive(Debug)]
pub struct ClientConfig {
    /// Authorization server issuer
    pub issuer: Url,
    /// Client id
    pub client_id: String,
    /// Client secret, for confidential clients
    pub client_secret: Option<SecretString>,
    /// Redirect URI registered for the client
    pub redirect_uri: Url,
    /// Requested scopes
    pub scopes: Vec<String>,
}

impl Clone for ClientConfig {
    fn clone(&self) -> Self {
        Self {
            issuer: self.issuer.clone(),
            client_id: self.client_id.clone(),
            client_secret: self
                .client_secret
                .as_ref()
                .map(|s| SecretString::from(s.expose_secret().to_string())),
            redirect_uri: self.redirect_uri.clone(),
            scopes: self.scopes.clone(),
        }
    }
}

impl ClientConfig {
    /// Validate and build a public client with the default scopes
    pub fn new(issuer: &str, client_id: &str, redirect_uri: &str) -> Result<Self, ConfigError> {
        RawClient {
            issuer: Some(issuer.to_string()),
            client_id: Some(client_id.to_string()),
            client_secret: None,
            redirect_uri: Some(redirect_uri.to_string()),
            scopes: None,
        }
        .validate()
    }

    /// Set the client secret
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::from(secret.into()));
        self
    }

    /// Replace the requested scopes
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the issuer is a custom authorization server (`/oauth2/<id>`)
    pub fn is_custom_authorization_server(&self) -> bool {
        self.issuer.path().contains("/oauth2/")
    }

    fn oauth_endpoint(&self, name: &str) -> Url {
        let base = self.issuer.path().trim_end_matches('/');
        let path = if self.is_custom_authorization_server() {
            format!("{}/v1/{}", base, name)
        } else {
            format!("{}/oauth2/v1/{}", base, name)
        };
        let mut url = self.issuer.clone();
        url.set_path(&path);
        url.set_query(None);
        url
    }

    /// `/v1/interact` endpoint of the issuer
    pub fn interact_endpoint(&self) -> Url {
        self.oauth_endpoint("interact")
    }

    /// `/v1/token` endpoint of the issuer
    pub fn token_endpoint(&self) -> Url {
        self.oauth_endpoint("token")
    }

    /// IDX endpoint on the issuer's origin (e.g. `introspect`)
    pub fn idx_endpoint(&self, name: &str) -> Url {
        let mut url = self.issuer.clone();
        url.set_path(&format!("/idp/idx/{}", name));
        url.set_query(None);
        url
    }

    /// Scopes joined for the wire
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

/// HTTP transport settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Whole-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// User agent override
    pub user_agent: Option<String>,
    /// Retries for timeouts and connection failures
    pub max_retries: u32,
    /// First retry delay, doubled per attempt
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    /// Device token sent as `X-Device-Token`
    pub device_token: Option<String>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: None,
            max_retries: 0,
            retry_backoff: Duration::from_millis(500),
            device_token: None,
        }
    }
}

/// Polling limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Shortest wait between polls, whatever the server asks for
    #[serde(with = "humantime_serde")]
    pub min_interval: Duration,
    /// Longest wait between polls
    #[serde(with = "humantime_serde")]
    pub max_interval: Duration,
    /// Total polling budget; `None` polls until resolved or cancelled
    #[serde(with = "humantime_serde")]
    pub max_wait: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(60),
            max_wait: Some(Duration::from_secs(300)),
        }
    }
}

/// Shortest wait between polls, even for a policy built with a smaller floor
pub const POLL_FLOOR: Duration = Duration::from_millis(10);

impl PollPolicy {
    /// Clamp a server-suggested interval into this policy's bounds
    ///
    /// No suggestion waits the floor.
    pub fn clamp(&self, refresh: Option<Duration>) -> Duration {
        let floor = self.min_interval.max(POLL_FLOOR);
        let ceiling = self.max_interval.max(floor);
        refresh.unwrap_or(floor).clamp(floor, ceiling)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    client: RawClient,
    transport: TransportSettings,
    polling: PollPolicy,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawClient {
    issuer: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
    scopes: Option<Vec<String>>,
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl RawClient {
    fn apply_env(&mut self) {
        if let Some(v) = env_value(ENV_ISSUER) {
            self.issuer = Some(v);
        }
        if let Some(v) = env_value(ENV_CLIENT_ID) {
            self.client_id = Some(v);
        }
        if let Some(v) = env_value(ENV_CLIENT_SECRET) {
            self.client_secret = Some(v);
        }
        if let Some(v) = env_value(ENV_REDIRECT_URI) {
            self.redirect_uri = Some(v);
        }
        if let Some(v) = env_value(ENV_SCOPES) {
            self.scopes = Some(v.split_whitespace().map(str::to_string).collect());
        }
    }

    fn validate(self) -> Result<ClientConfig, ConfigError> {
        let issuer = self.issuer.ok_or(ConfigError::Missing("client.issuer"))?;
        let issuer = Url::parse(issuer.trim()).map_err(|e| ConfigError::Invalid {
            key: "client.issuer",
            reason: e.to_string(),
        })?;
        if !matches!(issuer.scheme(), "http" | "https") || issuer.host_str().is_none() {
            return Err(ConfigError::Invalid {
                key: "client.issuer",
                reason: format!("{} is not an http(s) URL", issuer),
            });
        }

        let client_id = self
            .client_id
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(ConfigError::Missing("client.client_id"))?;

        let redirect_uri = self
            .redirect_uri
            .ok_or(ConfigError::Missing("client.redirect_uri"))?;
        let redirect_uri = Url::parse(redirect_uri.trim()).map_err(|e| ConfigError::Invalid {
            key: "client.redirect_uri",
            reason: e.to_string(),
        })?;

        let scopes = self
            .scopes
            .unwrap_or_else(|| vec!["openid".to_string(), "profile".to_string()]);
        if scopes.is_empty() {
            return Err(ConfigError::Invalid {
                key: "client.scopes",
                reason: "at least one scope is required".to_string(),
            });
        }

        Ok(ClientConfig {
            issuer,
            client_id,
            client_secret: self
                .client_secret
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
            redirect_uri,
            scopes,
        })
    }
}

impl RawConfig {
    fn validate(self) -> Result<IdxConfig, ConfigError> {
        if self.polling.min_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "polling.min_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.polling.max_interval < self.polling.min_interval {
            return Err(ConfigError::Invalid {
                key: "polling.max_interval",
                reason: "must not be shorter than polling.min_interval".to_string(),
            });
        }

        Ok(IdxConfig {
            client: self.client.validate()?,
            transport: self.transport,
            polling: self.polling,
        })
    }
}
