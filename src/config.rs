use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::SessionError;

pub const DEFAULT_EXCHANGE_PATH: &str = "/api/oauth/kakao/token";
pub const DEFAULT_USER_LOGIN_PATH: &str = "/api/users/login";
pub const DEFAULT_ADMIN_LOGIN_PATH: &str = "/api/admins/login";
pub const DEFAULT_PROFILE_PATH: &str = "/api/mypage/profile";
pub const DEFAULT_EXPIRED_MARKER: &str = "EXPIRED";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub base_url: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default = "default_exchange_path")]
    pub exchange_path: String,
    #[serde(default = "default_user_login_path")]
    pub user_login_path: String,
    #[serde(default = "default_admin_login_path")]
    pub admin_login_path: String,
    #[serde(default = "default_profile_path")]
    pub profile_path: String,
    #[serde(default = "default_expired_marker")]
    pub expired_marker: String,
    #[serde(default = "default_timeout", rename = "timeoutSecs", with = "secs")]
    pub timeout: Duration,
}

impl SessionConfig {
    pub fn new(base_url: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            redirect_uri: redirect_uri.into(),
            client_id: String::new(),
            scope: None,
            exchange_path: default_exchange_path(),
            user_login_path: default_user_login_path(),
            admin_login_path: default_admin_login_path(),
            profile_path: default_profile_path(),
            expired_marker: default_expired_marker(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| SessionError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_exchange_path(mut self, path: impl Into<String>) -> Self {
        self.exchange_path = path.into();
        self
    }

    pub fn with_expired_marker(mut self, marker: impl Into<String>) -> Self {
        self.expired_marker = marker.into();
        self
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        self.base_url()?;
        let redirect = Url::parse(&self.redirect_uri)
            .map_err(|err| SessionError::InvalidRedirectUri(err.to_string()))?;
        if !matches!(redirect.scheme(), "http" | "https") {
            return Err(SessionError::InvalidRedirectUri(
                "redirect uri must use http or https".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(SessionError::Config("timeout must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Base URL normalized to end with `/` so relative joins keep its path.
    pub fn base_url(&self) -> Result<Url, SessionError> {
        let mut raw = self.base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Ok(Url::parse(&raw)?)
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, SessionError> {
        Ok(self.base_url()?.join(path.trim_start_matches('/'))?)
    }
}

fn default_exchange_path() -> String {
    DEFAULT_EXCHANGE_PATH.to_string()
}

fn default_user_login_path() -> String {
    DEFAULT_USER_LOGIN_PATH.to_string()
}

fn default_admin_login_path() -> String {
    DEFAULT_ADMIN_LOGIN_PATH.to_string()
}

fn default_profile_path() -> String {
    DEFAULT_PROFILE_PATH.to_string()
}

fn default_expired_marker() -> String {
    DEFAULT_EXPIRED_MARKER.to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
