use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::broadcaster::{SessionBroadcaster, SessionEvent};
use crate::client::{ExchangeClient, TokenExchange};
use crate::events::{EventBus, SubscriptionId};
use crate::flow::LoginFlow;
use crate::guard::ExchangeGuard;
use crate::interceptor::NavigationInterceptor;
use crate::ledger::UsedCodeLedger;
use crate::notice::{NoticeGate, NoticeKind, Notifier, SilentNotifier};
use crate::pipeline::AuthenticatedClient;
use crate::session::{ProfileCache, SessionStore};
use crate::store::{KeyValueStore, MemoryStore};
use crate::{
    AuthorizationRequest, IdentityProvider, Result, Role, SessionConfig, SessionCredential,
    SessionState,
};

#[derive(Debug, Deserialize)]
struct Profile {
    #[serde(default)]
    nickname: Option<String>,
}

pub struct SessionContextBuilder<P: IdentityProvider> {
    provider: P,
    config: SessionConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    exchange: Option<Arc<dyn TokenExchange>>,
    http: Option<Client>,
}

impl<P: IdentityProvider + 'static> SessionContextBuilder<P> {
    /// Durable store; defaults to an in-memory one.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Replaces the network code exchange, e.g. with a fake in tests.
    pub fn exchange(mut self, exchange: Arc<dyn TokenExchange>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    pub fn http_client(mut self, http: Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Builds every component and reports the restored session state.
    pub async fn init(self) -> Result<SessionContext<P>> {
        self.config.validate()?;

        let http = match self.http {
            Some(http) => http,
            None => Client::builder().timeout(self.config.timeout).build()?,
        };
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(SilentNotifier));

        let events = EventBus::new();
        let guard = ExchangeGuard::new();
        let sessions = Arc::new(SessionStore::new(store.clone(), events.clone()));
        let ledger = Arc::new(UsedCodeLedger::new(store.clone()));
        let profile = Arc::new(ProfileCache::new(store));
        let notices = Arc::new(NoticeGate::new(notifier));
        let broadcaster = Arc::new(SessionBroadcaster::new(
            events.clone(),
            sessions.clone(),
            ledger.clone(),
            guard.clone(),
            profile.clone(),
            notices.clone(),
        ));

        let client = Arc::new(ExchangeClient::with_http_client(
            self.provider,
            self.config.clone(),
            http.clone(),
        ));
        let exchange = self
            .exchange
            .unwrap_or_else(|| client.clone() as Arc<dyn TokenExchange>);
        let flow = Arc::new(LoginFlow::new(
            exchange,
            ledger,
            sessions.clone(),
            notices.clone(),
        ));
        let interceptor = NavigationInterceptor::new(
            self.config.redirect_uri.clone(),
            guard.clone(),
            flow,
            notices.clone(),
        );
        let requests = AuthenticatedClient::with_http_client(
            &self.config,
            http,
            sessions.clone(),
            broadcaster.clone(),
        )?;

        let context = SessionContext {
            events,
            guard,
            sessions,
            profile,
            notices,
            broadcaster,
            client,
            interceptor,
            requests,
        };

        match context.get_session().await? {
            Some(credential) => info!(
                identity = %credential.identity,
                role = %credential.role,
                "restored stored session"
            ),
            None => info!("starting without a session"),
        }
        Ok(context)
    }
}

pub struct SessionContext<P: IdentityProvider> {
    events: EventBus<SessionEvent>,
    guard: ExchangeGuard,
    sessions: Arc<SessionStore>,
    profile: Arc<ProfileCache>,
    notices: Arc<NoticeGate>,
    broadcaster: Arc<SessionBroadcaster>,
    client: Arc<ExchangeClient<P>>,
    interceptor: NavigationInterceptor,
    requests: AuthenticatedClient,
}

impl<P: IdentityProvider + 'static> SessionContext<P> {
    pub fn builder(provider: P, config: SessionConfig) -> SessionContextBuilder<P> {
        SessionContextBuilder {
            provider,
            config,
            store: None,
            notifier: None,
            exchange: None,
            http: None,
        }
    }

    pub async fn get_session(&self) -> Result<Option<SessionCredential>> {
        self.sessions.get_session().await
    }

    pub async fn is_authenticated(&self) -> Result<bool> {
        Ok(self.get_session().await?.is_some())
    }

    pub async fn current_role(&self) -> Result<Option<Role>> {
        Ok(self.get_session().await?.map(|credential| credential.role))
    }

    pub async fn state(&self) -> Result<SessionState> {
        if self.is_authenticated().await? {
            Ok(SessionState::Authenticated)
        } else if self.guard.is_busy() {
            Ok(SessionState::Exchanging)
        } else {
            Ok(SessionState::Anonymous)
        }
    }

    /// Calls `listener` after every session change. Re-read the session from
    /// inside it; the store already reflects the change.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.broadcaster.on_session_changed(listener)
    }

    /// Raw access to both signals, including [`SessionEvent::Expired`].
    pub fn subscribe_events<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.broadcaster.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.broadcaster.unsubscribe(id)
    }

    pub async fn logout(&self) -> Result<()> {
        self.broadcaster.logout().await
    }

    /// Builds the provider URL to load in the embedded browser and arms the
    /// interceptor with its `state`.
    pub fn begin_authorization(&self) -> Result<AuthorizationRequest> {
        let request = self.client.authorization_url()?;
        self.interceptor.expect_state(Some(request.state.clone()));
        Ok(request)
    }

    pub fn interceptor(&self) -> &NavigationInterceptor {
        &self.interceptor
    }

    pub fn requests(&self) -> &AuthenticatedClient {
        &self.requests
    }

    /// Email/password sign-in. Regular users also get their nickname cached.
    pub async fn login_with_password(
        &self,
        email: &str,
        password: &str,
        as_admin: bool,
    ) -> Result<SessionCredential> {
        let credential = self.client.password_login(email, password, as_admin).await?;
        self.sessions.set_session(&credential).await?;
        info!(
            identity = %credential.identity,
            role = %credential.role,
            "signed in with password"
        );

        if credential.role == Role::User {
            if let Err(err) = self.refresh_profile().await {
                warn!(error = %err, "failed to load profile after sign-in");
            }
        }
        Ok(credential)
    }

    /// Fetches the profile through the authenticated pipeline and caches the nickname.
    pub async fn refresh_profile(&self) -> Result<Option<String>> {
        let path = self.client.config().profile_path.clone();
        let profile: Profile = self.requests.get(&path).await?;
        if let Some(nickname) = &profile.nickname {
            self.profile.set_nickname(nickname).await?;
        }
        Ok(profile.nickname)
    }

    pub async fn nickname(&self) -> Result<Option<String>> {
        self.profile.nickname().await
    }

    /// Called when the user dismisses a notice so the next one of that kind shows.
    pub fn acknowledge_notice(&self, kind: NoticeKind) {
        self.notices.acknowledge(kind);
    }

    pub fn listener_count(&self) -> usize {
        self.events.listener_count()
    }

    /// Drops every listener, frees the guard and re-arms all notices.
    /// Stored data is left alone; use [`SessionContext::logout`] for that.
    pub fn reset(&self) {
        self.events.reset();
        self.guard.reset();
        self.notices.acknowledge_all();
        debug!("session context reset");
    }
}

impl<P: IdentityProvider> std::fmt::Debug for SessionContext<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("guard", &self.guard)
            .field("interceptor", &self.interceptor)
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}
