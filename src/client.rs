use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, header};
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::nonce::generate_state;
use crate::{
    AuthorizationRequest, IdentityProvider, Result, SessionConfig, SessionCredential,
    SessionError, TokenResponse,
};

/// Trades a single-use authorization code for a session credential.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, code: &str) -> Result<SessionCredential>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordLogin<'a> {
    user_email: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone)]
pub struct ExchangeClient<P: IdentityProvider> {
    provider: P,
    config: SessionConfig,
    http: Client,
}

impl<P: IdentityProvider> ExchangeClient<P> {
    pub fn new(provider: P, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            provider,
            config,
            http,
        })
    }

    pub fn with_http_client(provider: P, config: SessionConfig, http: Client) -> Self {
        Self {
            provider,
            config,
            http,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn authorization_url(&self) -> Result<AuthorizationRequest> {
        self.authorization_url_with_state(None)
    }

    pub fn authorization_url_with_state(
        &self,
        state: Option<String>,
    ) -> Result<AuthorizationRequest> {
        let state = match state {
            Some(state) => state,
            None => generate_state()?,
        };

        let mut params: HashMap<String, String> = HashMap::new();
        for (key, value) in self.provider.authorize_params() {
            params.insert(key, value);
        }

        params.insert("response_type".to_string(), "code".to_string());
        params.insert("client_id".to_string(), self.config.client_id.clone());
        params.insert("redirect_uri".to_string(), self.config.redirect_uri.clone());
        params.insert("state".to_string(), state.clone());
        if let Some(scope) = self
            .config
            .scope
            .as_deref()
            .or(self.provider.default_scope())
        {
            params.insert("scope".to_string(), scope.to_string());
        }

        let mut url = Url::parse(self.provider.authorize_url())?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(&key, &value);
            }
        }

        Ok(AuthorizationRequest {
            authorization_url: url.to_string(),
            state,
        })
    }

    /// Posts the code to the backend exchange endpoint. The code travels as a
    /// query parameter; the backend holds the provider secret.
    pub async fn exchange_code(&self, code: &str) -> Result<SessionCredential> {
        let mut url = self.config.endpoint(&self.config.exchange_path)?;
        url.query_pairs_mut().append_pair("code", code);

        debug!(provider = self.provider.id(), "exchanging authorization code");
        let builder = self.http.post(url).header(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded;charset=utf-8",
        );
        self.send_token_request(builder, None).await
    }

    /// Email/password login against the user or admin endpoint.
    pub async fn password_login(
        &self,
        email: &str,
        password: &str,
        as_admin: bool,
    ) -> Result<SessionCredential> {
        let path = if as_admin {
            &self.config.admin_login_path
        } else {
            &self.config.user_login_path
        };
        let url = self.config.endpoint(path)?;
        let builder = self.http.post(url).json(&PasswordLogin {
            user_email: email,
            password,
        });
        self.send_token_request(builder, Some(email)).await
    }

    async fn send_token_request(
        &self,
        builder: RequestBuilder,
        fallback_identity: Option<&str>,
    ) -> Result<SessionCredential> {
        let response = builder
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "token request rejected");
            return Err(SessionError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|err| SessionError::InvalidResponse {
                message: err.to_string(),
                body,
            })?;

        token.into_credential(fallback_identity)
    }
}

#[async_trait]
impl<P: IdentityProvider> TokenExchange for ExchangeClient<P> {
    async fn exchange(&self, code: &str) -> Result<SessionCredential> {
        self.exchange_code(code).await
    }
}
