use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::SessionError;

#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub authorization_url: String,
    pub state: String,
}

/// Query parameters carried by the provider's redirect back to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResponse {
    pub code: String,
    pub state: Option<String>,
}

impl AuthorizationResponse {
    /// Extracts the URL-decoded `code` (and optional `state`) from a redirect URL.
    ///
    /// A redirect carrying `error` instead of `code` means the user declined
    /// consent and is reported as [`SessionError::AuthorizationDenied`].
    pub fn from_url(redirect_url: &str) -> Result<Self, SessionError> {
        let url = Url::parse(redirect_url)?;
        let mut code = None;
        let mut state = None;
        let mut error = None;
        let mut description = None;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" if !value.is_empty() => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => description = Some(value.into_owned()),
                _ => {}
            }
        }

        match (code, error) {
            (Some(code), _) => Ok(Self { code, state }),
            (None, Some(error)) => Err(SessionError::AuthorizationDenied { error, description }),
            (None, None) => Err(SessionError::MissingAuthorizationCode),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::User => "USER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = SessionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "USER" => Ok(Role::User),
            _ => Err(SessionError::UnknownRole(value.to_string())),
        }
    }
}

/// Bearer token plus the identity and role it was issued for.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    pub token: String,
    pub identity: String,
    pub role: Role,
}

impl SessionCredential {
    pub fn new(token: impl Into<String>, identity: impl Into<String>, role: Role) -> Self {
        Self {
            token: token.into(),
            identity: identity.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("token", &"<redacted>")
            .field("identity", &self.identity)
            .field("role", &self.role)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Exchanging,
    Authenticated,
}

/// Body returned by the code exchange and password login endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default, alias = "sessionToken")]
    pub token: Option<String>,
    #[serde(default, rename = "userEmail", alias = "identity")]
    pub identity: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl TokenResponse {
    /// Turns the response into a credential. `fallback_identity` is used when
    /// the body does not echo the identity back (password login).
    pub fn into_credential(
        self,
        fallback_identity: Option<&str>,
    ) -> Result<SessionCredential, SessionError> {
        let token = match self.token {
            Some(token) if !token.trim().is_empty() => token,
            _ => {
                return Err(SessionError::ExchangeRejected {
                    reason: self
                        .error
                        .unwrap_or_else(|| "response carried no token".to_string()),
                });
            }
        };

        let identity = self
            .identity
            .filter(|identity| !identity.is_empty())
            .or_else(|| fallback_identity.map(str::to_string))
            .ok_or_else(|| SessionError::InvalidResponse {
                message: "response carried no identity".to_string(),
                body: String::new(),
            })?;

        let role = self
            .role
            .ok_or_else(|| SessionError::InvalidResponse {
                message: "response carried no role".to_string(),
                body: String::new(),
            })?
            .parse()?;

        Ok(SessionCredential {
            token,
            identity,
            role,
        })
    }
}
