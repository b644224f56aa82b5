use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::SessionError;
use crate::flow::{ExchangeOutcome, LoginFlow};
use crate::guard::ExchangeGuard;
use crate::notice::{Notice, NoticeGate};
use crate::types::AuthorizationResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationDecision {
    Proceed,
    Veto,
}

#[derive(Debug)]
pub struct Interception {
    pub decision: NavigationDecision,
    /// Set only when this navigation started an exchange.
    pub exchange: Option<JoinHandle<ExchangeOutcome>>,
}

impl Interception {
    fn proceed() -> Self {
        Self {
            decision: NavigationDecision::Proceed,
            exchange: None,
        }
    }

    fn veto() -> Self {
        Self {
            decision: NavigationDecision::Veto,
            exchange: None,
        }
    }
}

/// Decides synchronously whether the embedded browser may load a URL. The
/// redirect URL itself is never loaded; its code is handed to the login flow.
pub struct NavigationInterceptor {
    redirect_prefix: String,
    guard: ExchangeGuard,
    flow: Arc<LoginFlow>,
    notices: Arc<NoticeGate>,
    expected_state: Arc<Mutex<Option<String>>>,
}

impl NavigationInterceptor {
    pub fn new(
        redirect_prefix: impl Into<String>,
        guard: ExchangeGuard,
        flow: Arc<LoginFlow>,
        notices: Arc<NoticeGate>,
    ) -> Self {
        Self {
            redirect_prefix: redirect_prefix.into(),
            guard,
            flow,
            notices,
            expected_state: Arc::new(Mutex::new(None)),
        }
    }

    /// Records the `state` sent with the authorization request. Redirects
    /// carrying a different `state` are vetoed without an exchange.
    pub fn expect_state(&self, state: Option<String>) {
        if let Ok(mut expected) = self.expected_state.lock() {
            *expected = state;
        }
    }

    /// Navigation-callback form: true lets the browser load `url`.
    pub fn should_start_load(&self, url: &str) -> bool {
        self.intercept(url).decision == NavigationDecision::Proceed
    }

    /// Must be called from within a tokio runtime for the exchange to start.
    pub fn intercept(&self, url: &str) -> Interception {
        if !url.starts_with(&self.redirect_prefix) {
            return Interception::proceed();
        }

        let response = match AuthorizationResponse::from_url(url) {
            Ok(response) => response,
            Err(SessionError::AuthorizationDenied { error, description }) => {
                if !self.guard.is_busy() {
                    warn!(%error, ?description, "authorization denied by provider");
                    self.notices.raise(Notice::login_failed(
                        "Authorization was cancelled. Please try again.",
                    ));
                }
                return Interception::veto();
            }
            Err(err) => {
                debug!(error = %err, "redirect without authorization code, letting it load");
                return Interception::proceed();
            }
        };

        let Some(permit) = self.guard.try_acquire() else {
            debug!("exchange already in flight, vetoing duplicate redirect");
            return Interception::veto();
        };

        if let Err(err) = self.check_state(response.state.as_deref()) {
            warn!(error = %err, "redirect state does not match, ignoring code");
            return Interception::veto();
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                error!(error = %err, "no async runtime available for the code exchange");
                return Interception::veto();
            }
        };

        debug!("authorization code received, starting exchange");
        let flow = self.flow.clone();
        let code = response.code;
        let task = handle.spawn(async move { flow.complete(code, permit).await });

        Interception {
            decision: NavigationDecision::Veto,
            exchange: Some(task),
        }
    }

    fn check_state(&self, received: Option<&str>) -> Result<(), SessionError> {
        let expected = match self.expected_state.lock() {
            Ok(expected) => expected.clone(),
            Err(_) => None,
        };
        match (expected, received) {
            (Some(expected), Some(received)) if expected != received => {
                Err(SessionError::StateMismatch {
                    expected,
                    received: received.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for NavigationInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavigationInterceptor")
            .field("redirect_prefix", &self.redirect_prefix)
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}
