use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::SessionError;
use crate::client::TokenExchange;
use crate::guard::ExchangePermit;
use crate::ledger::UsedCodeLedger;
use crate::notice::{Notice, NoticeGate};
use crate::session::SessionStore;
use crate::types::SessionCredential;

#[derive(Debug)]
pub enum ExchangeOutcome {
    /// The credential was stored and `SessionChanged` raised.
    Authenticated(SessionCredential),
    /// The code was already in the ledger. Not an error.
    Duplicate,
    /// The ledger could not be written, so the exchange was refused.
    Blocked(SessionError),
    /// Transport failure, timeout or rejection. The code is spent.
    Failed(SessionError),
    /// A logout or expiry reset the guard while the exchange was in flight.
    Discarded,
}

impl ExchangeOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, ExchangeOutcome::Authenticated(_))
    }
}

pub struct LoginFlow {
    exchange: Arc<dyn TokenExchange>,
    ledger: Arc<UsedCodeLedger>,
    sessions: Arc<SessionStore>,
    notices: Arc<NoticeGate>,
}

impl LoginFlow {
    pub fn new(
        exchange: Arc<dyn TokenExchange>,
        ledger: Arc<UsedCodeLedger>,
        sessions: Arc<SessionStore>,
        notices: Arc<NoticeGate>,
    ) -> Self {
        Self {
            exchange,
            ledger,
            sessions,
            notices,
        }
    }

    /// Runs while `permit` is held and drops it on return, whatever the outcome.
    pub async fn complete(&self, code: String, permit: ExchangePermit) -> ExchangeOutcome {
        let outcome = self.run(&code, &permit).await;
        drop(permit);
        outcome
    }

    async fn run(&self, code: &str, permit: &ExchangePermit) -> ExchangeOutcome {
        match self.ledger.mark_used(code).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("authorization code already consumed, ignoring");
                return ExchangeOutcome::Duplicate;
            }
            Err(err) => {
                error!(error = %err, "used-code ledger unavailable, refusing exchange");
                self.notices.raise(Notice::login_blocked());
                return ExchangeOutcome::Blocked(err);
            }
        }

        let credential = match self.exchange.exchange(code).await {
            Ok(credential) => credential,
            Err(err) => {
                warn!(error = %err, transport = err.is_transport(), "code exchange failed");
                self.notices.raise(Notice::login_failed(failure_message(&err)));
                return ExchangeOutcome::Failed(err);
            }
        };

        if !permit.is_current() {
            info!("session was reset during the exchange, discarding credential");
            return ExchangeOutcome::Discarded;
        }

        if let Err(err) = self.sessions.set_session(&credential).await {
            error!(error = %err, "failed to store session after exchange");
            self.notices.raise(Notice::login_failed(failure_message(&err)));
            return ExchangeOutcome::Failed(err);
        }

        info!(
            identity = %credential.identity,
            role = %credential.role,
            "signed in with authorization code"
        );
        self.notices.raise(Notice::login_succeeded());
        ExchangeOutcome::Authenticated(credential)
    }
}

impl std::fmt::Debug for LoginFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginFlow").finish_non_exhaustive()
    }
}

fn failure_message(err: &SessionError) -> String {
    match err {
        SessionError::Http(_) => {
            "Could not reach the server. Please start the login again.".to_string()
        }
        SessionError::HttpStatus { status, .. } => format!(
            "The server rejected the login (CODE: {status}). Please start the login again."
        ),
        _ => "Login could not be completed. Please start the login again.".to_string(),
    }
}
