use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::Result;
use crate::events::{EventBus, SubscriptionId};
use crate::guard::ExchangeGuard;
use crate::ledger::UsedCodeLedger;
use crate::notice::{Notice, NoticeGate};
use crate::session::{ProfileCache, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The stored session was replaced or cleared. Re-read the store.
    Changed,
    /// The server rejected the current credential.
    Expired,
}

/// Fans session signals out to the rest of the app and owns the reset paths
/// (server-reported expiry and explicit logout).
pub struct SessionBroadcaster {
    events: EventBus<SessionEvent>,
    sessions: Arc<SessionStore>,
    ledger: Arc<UsedCodeLedger>,
    guard: ExchangeGuard,
    profile: Arc<ProfileCache>,
    notices: Arc<NoticeGate>,
    expiring: AtomicBool,
}

impl SessionBroadcaster {
    pub fn new(
        events: EventBus<SessionEvent>,
        sessions: Arc<SessionStore>,
        ledger: Arc<UsedCodeLedger>,
        guard: ExchangeGuard,
        profile: Arc<ProfileCache>,
        notices: Arc<NoticeGate>,
    ) -> Self {
        Self {
            events,
            sessions,
            ledger,
            guard,
            profile,
            notices,
            expiring: AtomicBool::new(false),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    /// Registers `listener` for [`SessionEvent::Changed`] only.
    pub fn on_session_changed<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.subscribe(move |event| {
            if *event == SessionEvent::Changed {
                listener();
            }
        })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Runs the expiry reset, raising [`SessionEvent::Expired`] once per
    /// session actually cleared.
    ///
    /// Returns true if this call cleared a live session. A second expiry while
    /// the first is still being handled, or after the session is already gone,
    /// clears nothing further and raises no second event or notice.
    pub async fn session_expired(&self) -> Result<bool> {
        if self.expiring.swap(true, Ordering::AcqRel) {
            debug!("session expiry already being handled");
            return Ok(false);
        }
        let _handling = ClearOnDrop(&self.expiring);

        let had_session = match self.sessions.get_session().await {
            Ok(session) => session.is_some(),
            Err(err) => {
                warn!(error = %err, "failed to read session during expiry, resetting anyway");
                true
            }
        };

        let ledger = self.ledger.clear().await;
        self.guard.reset();
        if !had_session {
            debug!("session already cleared, nothing to expire");
            return ledger.map(|_| false);
        }

        self.events.publish(&SessionEvent::Expired);

        let session = self.sessions.clear_session().await;
        info!("session expired, returned to anonymous");
        self.notices.raise(Notice::session_expired());
        ledger.and(session).map(|_| true)
    }

    /// Explicit sign-out: same reset as expiry plus the cached profile.
    pub async fn logout(&self) -> Result<()> {
        let ledger = self.ledger.clear().await;
        self.guard.reset();
        let profile = self.profile.clear().await;
        let session = self.sessions.clear_session().await;

        for err in [&ledger, &profile, &session]
            .into_iter()
            .filter_map(|result| result.as_ref().err())
        {
            warn!(error = %err, "logout step failed");
        }

        info!("signed out");
        self.notices.raise(Notice::logged_out());
        ledger.and(profile).and(session)
    }
}

impl std::fmt::Debug for SessionBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBroadcaster")
            .field("events", &self.events)
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

struct ClearOnDrop<'a>(&'a AtomicBool);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::notice::{NoticeKind, RecordingNotifier};
    use crate::store::{KeyValueStore, MemoryStore};
    use crate::types::{Role, SessionCredential};

    struct Fixture {
        broadcaster: SessionBroadcaster,
        sessions: Arc<SessionStore>,
        ledger: Arc<UsedCodeLedger>,
        guard: ExchangeGuard,
        profile: Arc<ProfileCache>,
        recorder: RecordingNotifier,
        changed: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let events = EventBus::new();
        let sessions = Arc::new(SessionStore::new(kv.clone(), events.clone()));
        let ledger = Arc::new(UsedCodeLedger::new(kv.clone()));
        let guard = ExchangeGuard::new();
        let profile = Arc::new(ProfileCache::new(kv));
        let recorder = RecordingNotifier::new();
        let notices = Arc::new(NoticeGate::new(Arc::new(recorder.clone())));
        let broadcaster = SessionBroadcaster::new(
            events,
            sessions.clone(),
            ledger.clone(),
            guard.clone(),
            profile.clone(),
            notices,
        );

        let changed = Arc::new(AtomicUsize::new(0));
        let counter = changed.clone();
        broadcaster.on_session_changed(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        Fixture {
            broadcaster,
            sessions,
            ledger,
            guard,
            profile,
            recorder,
            changed,
        }
    }

    #[tokio::test]
    async fn expiry_resets_session_ledger_and_guard() {
        let fx = fixture();
        fx.sessions
            .set_session(&SessionCredential::new("T1", "u@x.com", Role::User))
            .await
            .unwrap();
        fx.ledger.mark_used("abc123").await.unwrap();
        let _permit = fx.guard.try_acquire().unwrap();
        fx.changed.store(0, Ordering::SeqCst);

        assert!(fx.broadcaster.session_expired().await.unwrap());

        assert_eq!(fx.sessions.get_session().await.unwrap(), None);
        assert!(fx.ledger.is_empty().await.unwrap());
        assert!(!fx.guard.is_busy());
        assert_eq!(fx.changed.load(Ordering::SeqCst), 1);
        assert_eq!(fx.recorder.count(NoticeKind::SessionExpired), 1);
    }

    #[tokio::test]
    async fn repeated_expiry_is_idempotent() {
        let fx = fixture();
        fx.sessions
            .set_session(&SessionCredential::new("T1", "u@x.com", Role::User))
            .await
            .unwrap();
        fx.changed.store(0, Ordering::SeqCst);

        let (first, second) = tokio::join!(
            fx.broadcaster.session_expired(),
            fx.broadcaster.session_expired()
        );
        assert!(first.unwrap() ^ second.unwrap());
        assert!(!fx.broadcaster.session_expired().await.unwrap());

        assert_eq!(fx.changed.load(Ordering::SeqCst), 1);
        assert_eq!(fx.recorder.count(NoticeKind::SessionExpired), 1);
    }

    #[tokio::test]
    async fn expiry_is_published_once_before_the_change() {
        let fx = fixture();
        fx.sessions
            .set_session(&SessionCredential::new("T1", "u@x.com", Role::User))
            .await
            .unwrap();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = seen.clone();
        fx.broadcaster.subscribe(move |event| log.lock().unwrap().push(*event));

        let (first, second) = tokio::join!(
            fx.broadcaster.session_expired(),
            fx.broadcaster.session_expired()
        );
        first.unwrap();
        second.unwrap();
        fx.broadcaster.session_expired().await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![SessionEvent::Expired, SessionEvent::Changed]
        );
    }

    #[tokio::test]
    async fn expiry_without_session_is_silent() {
        let fx = fixture();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        fx.broadcaster.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        fx.ledger.mark_used("abc123").await.unwrap();

        assert!(!fx.broadcaster.session_expired().await.unwrap());
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert!(fx.ledger.is_empty().await.unwrap());
        assert!(fx.recorder.notices().is_empty());
    }

    #[tokio::test]
    async fn logout_clears_profile_and_notifies() {
        let fx = fixture();
        fx.sessions
            .set_session(&SessionCredential::new("T1", "u@x.com", Role::User))
            .await
            .unwrap();
        fx.profile.set_nickname("sunny").await.unwrap();
        fx.ledger.mark_used("abc123").await.unwrap();

        fx.broadcaster.logout().await.unwrap();

        assert_eq!(fx.sessions.get_session().await.unwrap(), None);
        assert_eq!(fx.profile.nickname().await.unwrap(), None);
        assert!(fx.ledger.is_empty().await.unwrap());
        assert_eq!(fx.recorder.count(NoticeKind::LoggedOut), 1);
    }

    #[tokio::test]
    async fn unsubscribed_listener_stops_hearing_changes() {
        let fx = fixture();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = fx.broadcaster.on_session_changed(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        fx.sessions.clear_session().await.unwrap();
        assert!(fx.broadcaster.unsubscribe(id));
        fx.sessions.clear_session().await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
