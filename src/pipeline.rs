use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::broadcaster::SessionBroadcaster;
use crate::session::SessionStore;
use crate::{Result, SessionConfig, SessionError};

const MARKER_FIELDS: &[&str] = &["code", "error"];

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|err| SessionError::InvalidResponse {
            message: err.to_string(),
            body: self.body.clone(),
        })
    }
}

/// Attaches the stored bearer token. A 401, or an error body carrying the
/// expired marker, on an authenticated request resets the session before the
/// failure is returned.
pub struct AuthenticatedClient {
    http: Client,
    base_url: Url,
    expired_marker: String,
    sessions: Arc<SessionStore>,
    broadcaster: Arc<SessionBroadcaster>,
}

impl AuthenticatedClient {
    pub fn new(
        config: &SessionConfig,
        sessions: Arc<SessionStore>,
        broadcaster: Arc<SessionBroadcaster>,
    ) -> Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Self::with_http_client(config, http, sessions, broadcaster)
    }

    pub fn with_http_client(
        config: &SessionConfig,
        http: Client,
        sessions: Arc<SessionStore>,
        broadcaster: Arc<SessionBroadcaster>,
    ) -> Result<Self> {
        Ok(Self {
            http,
            base_url: config.base_url()?,
            expired_marker: config.expired_marker.clone(),
            sessions,
            broadcaster,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// Unsent request for `path`; pass it to [`AuthenticatedClient::send`].
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        Ok(self.http.request(method, self.url(path)?))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.request(Method::GET, path)?).await?.json()
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(self.request(Method::POST, path)?.json(body))
            .await?
            .json()
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(self.request(Method::PUT, path)?.json(body))
            .await?
            .json()
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.send(self.request(Method::DELETE, path)?).await
    }

    /// Runs both pipeline stages around `builder`.
    pub async fn send(&self, builder: RequestBuilder) -> Result<ApiResponse> {
        let token = self.sessions.token().await?;
        let authenticated = token.is_some();
        let builder = match token {
            Some(token) => {
                let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                    SessionError::InvalidHeader {
                        name: AUTHORIZATION.to_string(),
                    }
                })?;
                builder.header(AUTHORIZATION, value)
            }
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if authenticated && self.signals_expiry(status, &body) {
            warn!(status = status.as_u16(), "server reported the session as expired");
            if let Err(err) = self.broadcaster.session_expired().await {
                warn!(error = %err, "session reset after expiry was incomplete");
            }
            return Err(SessionError::SessionExpired {
                status: status.as_u16(),
                body,
            });
        }

        if !status.is_success() {
            debug!(status = status.as_u16(), "request failed");
            return Err(SessionError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }

    fn signals_expiry(&self, status: StatusCode, body: &str) -> bool {
        status == StatusCode::UNAUTHORIZED
            || (!status.is_success() && has_marker(body, &self.expired_marker))
    }
}

impl std::fmt::Debug for AuthenticatedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedClient")
            .field("base_url", &self.base_url.as_str())
            .field("expired_marker", &self.expired_marker)
            .finish_non_exhaustive()
    }
}

fn has_marker(body: &str, marker: &str) -> bool {
    let trimmed = body.trim();
    if trimmed == marker {
        return true;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::String(value)) => value == marker,
        Ok(serde_json::Value::Object(fields)) => MARKER_FIELDS
            .iter()
            .any(|field| fields.get(*field).and_then(|v| v.as_str()) == Some(marker)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::has_marker;

    #[test]
    fn marker_detection() {
        assert!(has_marker("EXPIRED", "EXPIRED"));
        assert!(has_marker(r#""EXPIRED""#, "EXPIRED"));
        assert!(has_marker(r#"{"code":"EXPIRED","message":"token"}"#, "EXPIRED"));
        assert!(has_marker(r#"{"error":"EXPIRED"}"#, "EXPIRED"));
        assert!(!has_marker(r#"{"message":"EXPIRED soon"}"#, "EXPIRED"));
        assert!(!has_marker(r#"{"status":"EXPIRED","title":"flu shot"}"#, "EXPIRED"));
        assert!(!has_marker(r#"[{"code":"EXPIRED"}]"#, "EXPIRED"));
        assert!(!has_marker("", "EXPIRED"));
    }
}
