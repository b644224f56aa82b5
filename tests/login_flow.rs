//! End-to-end authorization-code login through the navigation interceptor.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use carelink_session::{
    ExchangeOutcome, FileStore, KakaoProvider, KeyValueStore, NavigationDecision, NoticeKind,
    RecordingNotifier, Result, Role, SessionConfig, SessionContext, SessionCredential,
    SessionError, SessionState, TokenExchange,
};

const TOKEN_PATH: &str = "/api/oauth/kakao/token";

fn config(server: &MockServer) -> SessionConfig {
    SessionConfig::new(
        server.uri(),
        format!("{}/api/oauth/kakao/callback", server.uri()),
    )
    .with_timeout(Duration::from_millis(300))
}

fn redirect(config: &SessionConfig, code: &str) -> String {
    format!("{}?code={code}", config.redirect_uri)
}

async fn context(
    server: &MockServer,
    recorder: &RecordingNotifier,
) -> SessionContext<KakaoProvider> {
    SessionContext::builder(KakaoProvider::new(), config(server))
        .notifier(Arc::new(recorder.clone()))
        .init()
        .await
        .unwrap()
}

fn user_token() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "token": "T1",
        "userEmail": "u@x.com",
        "role": "USER"
    }))
}

#[tokio::test]
async fn code_is_exchanged_once_and_redelivery_is_ignored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(query_param("code", "abc123"))
        .respond_with(user_token())
        .expect(1)
        .mount(&server)
        .await;

    let recorder = RecordingNotifier::new();
    let context = context(&server, &recorder).await;
    let changes = Arc::new(AtomicUsize::new(0));
    let counter = changes.clone();
    context.subscribe(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let url = redirect(&config(&server), "abc123");
    let first = context.interceptor().intercept(&url);
    assert_eq!(first.decision, NavigationDecision::Veto);
    let outcome = first.exchange.unwrap().await.unwrap();
    assert!(outcome.is_authenticated());

    let session = context.get_session().await.unwrap().unwrap();
    assert_eq!(session.token, "T1");
    assert_eq!(session.identity, "u@x.com");
    assert_eq!(session.role, Role::User);
    assert_eq!(context.state().await.unwrap(), SessionState::Authenticated);
    assert_eq!(changes.load(Ordering::SeqCst), 1);

    let again = context.interceptor().intercept(&url);
    assert_eq!(again.decision, NavigationDecision::Veto);
    let outcome = again.exchange.unwrap().await.unwrap();
    assert!(matches!(outcome, ExchangeOutcome::Duplicate));
    assert_eq!(changes.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.count(NoticeKind::LoginSucceeded), 1);
}

#[tokio::test]
async fn timed_out_exchange_leaves_anonymous_and_spends_the_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(query_param("code", "def456"))
        .respond_with(user_token().set_delay(Duration::from_secs(2)))
        .expect(1)
        .mount(&server)
        .await;

    let recorder = RecordingNotifier::new();
    let context = context(&server, &recorder).await;
    let url = redirect(&config(&server), "def456");

    let outcome = context
        .interceptor()
        .intercept(&url)
        .exchange
        .unwrap()
        .await
        .unwrap();
    match outcome {
        ExchangeOutcome::Failed(err) => assert!(err.is_transport()),
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert!(context.get_session().await.unwrap().is_none());
    assert_eq!(context.state().await.unwrap(), SessionState::Anonymous);
    assert_eq!(recorder.count(NoticeKind::LoginFailed), 1);

    let again = context.interceptor().intercept(&url);
    let outcome = again.exchange.unwrap().await.unwrap();
    assert!(matches!(outcome, ExchangeOutcome::Duplicate));
    assert_eq!(recorder.count(NoticeKind::LoginFailed), 1);
}

#[tokio::test]
async fn second_code_during_exchange_is_vetoed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(query_param("code", "c1"))
        .respond_with(user_token().set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(query_param("code", "c2"))
        .respond_with(user_token())
        .expect(0)
        .mount(&server)
        .await;

    let recorder = RecordingNotifier::new();
    let context = context(&server, &recorder).await;
    let config = config(&server);

    let first = context.interceptor().intercept(&redirect(&config, "c1"));
    assert_eq!(context.state().await.unwrap(), SessionState::Exchanging);

    let second = context.interceptor().intercept(&redirect(&config, "c2"));
    assert_eq!(second.decision, NavigationDecision::Veto);
    assert!(second.exchange.is_none());

    assert!(first.exchange.unwrap().await.unwrap().is_authenticated());
    assert_eq!(context.state().await.unwrap(), SessionState::Authenticated);
}

#[tokio::test]
async fn rejected_exchange_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let recorder = RecordingNotifier::new();
    let context = context(&server, &recorder).await;
    let outcome = context
        .interceptor()
        .intercept(&redirect(&config(&server), "bad"))
        .exchange
        .unwrap()
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        ExchangeOutcome::Failed(SessionError::HttpStatus { status: 500, .. })
    ));
    let notices = recorder.notices();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].message.contains("500"));
}

/// Panics on the first call, succeeds afterwards.
struct FlakyExchange {
    calls: AtomicUsize,
}

#[async_trait]
impl TokenExchange for FlakyExchange {
    async fn exchange(&self, _code: &str) -> Result<SessionCredential> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("exchange blew up");
        }
        Ok(SessionCredential::new("T2", "v@x.com", Role::Admin))
    }
}

#[tokio::test]
async fn panicking_exchange_releases_the_guard() {
    let server = MockServer::start().await;
    let context = SessionContext::builder(KakaoProvider::new(), config(&server))
        .exchange(Arc::new(FlakyExchange {
            calls: AtomicUsize::new(0),
        }))
        .init()
        .await
        .unwrap();
    let config = config(&server);

    let crashed = context.interceptor().intercept(&redirect(&config, "p1"));
    assert!(crashed.exchange.unwrap().await.unwrap_err().is_panic());
    assert_eq!(context.state().await.unwrap(), SessionState::Anonymous);

    let next = context.interceptor().intercept(&redirect(&config, "p2"));
    assert!(next.exchange.unwrap().await.unwrap().is_authenticated());
    assert_eq!(
        context.current_role().await.unwrap(),
        Some(Role::Admin)
    );
}

#[tokio::test]
async fn used_codes_survive_a_restart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(query_param("code", "abc123"))
        .respond_with(user_token())
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("session.json");
    let url = redirect(&config(&server), "abc123");

    {
        let context = SessionContext::builder(KakaoProvider::new(), config(&server))
            .store(Arc::new(FileStore::new(&file)))
            .init()
            .await
            .unwrap();
        let outcome = context.interceptor().intercept(&url).exchange.unwrap();
        assert!(outcome.await.unwrap().is_authenticated());
    }

    let restarted = SessionContext::builder(KakaoProvider::new(), config(&server))
        .store(Arc::new(FileStore::new(&file)))
        .init()
        .await
        .unwrap();
    assert!(restarted.is_authenticated().await.unwrap());

    let outcome = restarted.interceptor().intercept(&url).exchange.unwrap();
    assert!(matches!(outcome.await.unwrap(), ExchangeOutcome::Duplicate));
}

#[tokio::test]
async fn authorization_url_arms_state_check() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(user_token())
        .expect(0)
        .mount(&server)
        .await;

    let recorder = RecordingNotifier::new();
    let context = context(&server, &recorder).await;
    let request = context.begin_authorization().unwrap();
    assert!(request.authorization_url.starts_with("https://kauth.kakao.com/oauth/authorize?"));
    assert!(request.authorization_url.contains("response_type=code"));

    let forged = format!("{}&state=forged", redirect(&config(&server), "abc123"));
    let interception = context.interceptor().intercept(&forged);
    assert_eq!(interception.decision, NavigationDecision::Veto);
    assert!(interception.exchange.is_none());
    assert_eq!(context.state().await.unwrap(), SessionState::Anonymous);
}

/// Reads succeed, every write fails.
struct ReadOnlyStore;

#[async_trait]
impl KeyValueStore for ReadOnlyStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(SessionError::Storage {
            message: "read-only filesystem".to_string(),
        })
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        Err(SessionError::Storage {
            message: "read-only filesystem".to_string(),
        })
    }
}

#[tokio::test]
async fn unrecordable_code_is_never_exchanged() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(user_token())
        .expect(0)
        .mount(&server)
        .await;

    let recorder = RecordingNotifier::new();
    let context = SessionContext::builder(KakaoProvider::new(), config(&server))
        .store(Arc::new(ReadOnlyStore))
        .notifier(Arc::new(recorder.clone()))
        .init()
        .await
        .unwrap();
    let url = redirect(&config(&server), "abc123");

    for _ in 0..2 {
        let interception = context.interceptor().intercept(&url);
        assert_eq!(interception.decision, NavigationDecision::Veto);
        let outcome = interception.exchange.unwrap().await.unwrap();
        assert!(matches!(
            outcome,
            ExchangeOutcome::Blocked(SessionError::Storage { .. })
        ));
        assert_eq!(context.state().await.unwrap(), SessionState::Anonymous);
    }

    assert_eq!(recorder.count(NoticeKind::LoginBlocked), 1);
    assert_eq!(recorder.count(NoticeKind::LoginFailed), 0);
}
