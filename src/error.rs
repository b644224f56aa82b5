use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("os rng error: {message}")]
    OsRng { message: String },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid redirect uri: {0}")]
    InvalidRedirectUri(String),

    #[error("invalid header: {name}")]
    InvalidHeader { name: String },

    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("invalid response: {message}")]
    InvalidResponse { message: String, body: String },

    #[error("exchange rejected: {reason}")]
    ExchangeRejected { reason: String },

    #[error("authorization denied: {error}")]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    #[error("missing authorization code in redirect url")]
    MissingAuthorizationCode,

    #[error("state mismatch (expected={expected}, received={received})")]
    StateMismatch { expected: String, received: String },

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("session expired (status {status})")]
    SessionExpired { status: u16, body: String },

    #[error("invalid config: {0}")]
    Config(String),
}

impl SessionError {
    pub(crate) fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// True for failures the request pipeline reported as an invalidated session.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired { .. })
    }

    /// True for network-level failures, including timeouts.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}
