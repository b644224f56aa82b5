use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeKind {
    LoginSucceeded,
    LoginFailed,
    LoginBlocked,
    SessionExpired,
    LoggedOut,
}

impl NoticeKind {
    /// Failure notices stay single until the user dismisses them.
    pub fn is_deduplicated(&self) -> bool {
        matches!(
            self,
            NoticeKind::LoginFailed | NoticeKind::LoginBlocked | NoticeKind::SessionExpired
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn login_succeeded() -> Self {
        Self::new(NoticeKind::LoginSucceeded, "Login", "Signed in successfully.")
    }

    pub fn login_failed(detail: impl Into<String>) -> Self {
        Self::new(NoticeKind::LoginFailed, "Login failed", detail)
    }

    pub fn login_blocked() -> Self {
        Self::new(
            NoticeKind::LoginBlocked,
            "Login unavailable",
            "Local storage is unavailable. Please retry the login flow.",
        )
    }

    pub fn session_expired() -> Self {
        Self::new(
            NoticeKind::SessionExpired,
            "Session expired",
            "Your session has expired. Please sign in again.",
        )
    }

    pub fn logged_out() -> Self {
        Self::new(NoticeKind::LoggedOut, "Logout", "Signed out successfully.")
    }
}

/// Presents notices to the user (an alert dialog on device).
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Discards every notice.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, _notice: &Notice) {}
}

/// Keeps every notice in memory, mostly useful in tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|notices| notices.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: NoticeKind) -> usize {
        self.notices()
            .iter()
            .filter(|notice| notice.kind == kind)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &Notice) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice.clone());
        }
    }
}

/// Forwards at most one failure notice per kind until that kind is acknowledged.
pub struct NoticeGate {
    inner: Arc<dyn Notifier>,
    outstanding: Mutex<HashSet<NoticeKind>>,
}

impl NoticeGate {
    pub fn new(inner: Arc<dyn Notifier>) -> Self {
        Self {
            inner,
            outstanding: Mutex::new(HashSet::new()),
        }
    }

    /// Returns true if the notice was shown.
    pub fn raise(&self, notice: Notice) -> bool {
        if !notice.kind.is_deduplicated() {
            self.inner.notify(&notice);
            return true;
        }
        let fresh = match self.outstanding.lock() {
            Ok(mut outstanding) => outstanding.insert(notice.kind),
            Err(_) => true,
        };
        if !fresh {
            debug!(kind = ?notice.kind, "notice suppressed, previous one still showing");
            return false;
        }
        self.inner.notify(&notice);
        true
    }

    /// Re-arms `kind` once the user dismissed its notice.
    pub fn acknowledge(&self, kind: NoticeKind) {
        if let Ok(mut outstanding) = self.outstanding.lock() {
            outstanding.remove(&kind);
        }
    }

    pub fn acknowledge_all(&self) {
        if let Ok(mut outstanding) = self.outstanding.lock() {
            outstanding.clear();
        }
    }
}

impl std::fmt::Debug for NoticeGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoticeGate").finish_non_exhaustive()
    }
}
