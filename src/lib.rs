//! Authorization-code login and session lifecycle for the CareLink client.
//!
//! An embedded browser is driven to the identity provider; the provider
//! redirects back with a single-use code that must be exchanged exactly once,
//! even when the browser reports the redirect several times. The resulting
//! session is persisted and broadcast to every interested screen.
//!
//! Start with [`SessionContext::builder`].

mod broadcaster;
mod client;
mod config;
mod context;
mod error;
mod events;
mod flow;
mod guard;
mod interceptor;
mod ledger;
mod nonce;
mod notice;
mod pipeline;
mod providers;
mod session;
mod store;
mod types;

pub use broadcaster::{SessionBroadcaster, SessionEvent};
pub use client::{ExchangeClient, TokenExchange};
pub use config::SessionConfig;
pub use context::{SessionContext, SessionContextBuilder};
pub use error::{Result, SessionError};
pub use events::{EventBus, SubscriptionId};
pub use flow::{ExchangeOutcome, LoginFlow};
pub use guard::{ExchangeGuard, ExchangePermit};
pub use interceptor::{Interception, NavigationDecision, NavigationInterceptor};
pub use ledger::UsedCodeLedger;
pub use notice::{Notice, NoticeGate, NoticeKind, Notifier, RecordingNotifier, SilentNotifier};
pub use pipeline::{ApiResponse, AuthenticatedClient};
pub use providers::{IdentityProvider, KakaoProvider};
pub use session::{ProfileCache, SessionStore};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use types::{
    AuthorizationRequest, AuthorizationResponse, Role, SessionCredential, SessionState,
    TokenResponse,
};
