use std::sync::{Arc, Weak};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, Subscription};
use crate::models::{AvatarUpload, ProfileForm, SignUpForm, TokenPair, User, ValidationError};
use crate::storage::{SessionRecords, Storage, StorageError};

use super::state::{LoadingGuard, SessionSnapshot};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid sign-in response: {0}")]
    InvalidResponse(String),

    #[error("Not signed in")]
    NotSignedIn,
}

impl SessionError {
    /// Message to show the user, `fallback` unless something more specific
    /// is known.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            SessionError::Api(e) => e.user_message(fallback),
            SessionError::Validation(e) => e.to_string(),
            SessionError::NotSignedIn => "Please sign in first.".to_string(),
            SessionError::Storage(_) | SessionError::InvalidResponse(_) => fallback.to_string(),
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, SessionError::Api(e) if e.is_session_expired())
    }
}

/// Single source of truth for who is signed in.
///
/// Owns the in-memory user, the loading flag and all writes to the `user`
/// and `auth_token` records. Every mutation reaches storage before the
/// in-memory state changes, except `update_profile`, which updates
/// memory first and does not roll back.
pub struct SessionManager {
    shared: Arc<Shared>,
    _subscriptions: Vec<Subscription>,
}

struct Shared {
    api: ApiClient,
    records: SessionRecords,
    state: watch::Sender<SessionSnapshot>,
}

impl SessionManager {
    /// Create a manager in the initial loading state and hook it up to the
    /// client's session events. Call `restore_session` to resolve it.
    pub fn new(api: ApiClient, storage: Arc<dyn Storage>) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        let shared = Arc::new(Shared {
            api,
            records: SessionRecords::new(storage),
            state,
        });

        let subscriptions = vec![
            Self::subscribe_forced_sign_out(&shared),
            Self::subscribe_token_refresh(&shared),
        ];

        Self {
            shared,
            _subscriptions: subscriptions,
        }
    }

    /// Create a manager and immediately restore the stored session
    pub fn restore(api: ApiClient, storage: Arc<dyn Storage>) -> Self {
        let manager = Self::new(api, storage);
        manager.restore_session();
        manager
    }

    fn subscribe_forced_sign_out(shared: &Arc<Shared>) -> Subscription {
        let weak: Weak<Shared> = Arc::downgrade(shared);
        shared.api.on_session_expired(move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            info!("Session expired, signing out");
            if let Err(e) = shared.sign_out() {
                warn!(error = %e, "Forced sign-out could not clear stored session");
            }
        })
    }

    fn subscribe_token_refresh(shared: &Arc<Shared>) -> Subscription {
        let weak: Weak<Shared> = Arc::downgrade(shared);
        shared.api.on_tokens_refreshed(move |tokens: &TokenPair| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            // A sign-out may land between the refresh finishing and this
            // handler running; its removal of the records must stand.
            let signed_in = shared.state.borrow().is_authenticated();
            let current = shared.api.access_token();
            if !signed_in || current.as_deref() != Some(tokens.token.as_str()) {
                debug!("Session changed during refresh, not persisting tokens");
                return;
            }
            if let Err(e) = shared.records.save_auth_token(tokens) {
                warn!(error = %e, "Failed to persist refreshed tokens");
            }
        })
    }

    // =========================================================================
    // State
    // =========================================================================

    pub fn api(&self) -> &ApiClient {
        &self.shared.api
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.state.borrow().clone()
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.state.subscribe()
    }

    pub fn user(&self) -> Option<User> {
        self.shared.state.borrow().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.shared.state.borrow().is_authenticated()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.state.borrow().is_loading()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Sign in and persist the new session. On any failure the previous
    /// session, in memory and in storage, is left as it was.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, SessionError> {
        let _loading = LoadingGuard::begin(&self.shared.state);
        debug!(email, "Signing in");

        let response = self.shared.api.create_session(email, password).await?;
        let (user, tokens) = response.into_parts().ok_or_else(|| {
            SessionError::InvalidResponse("missing user, token or refresh_token".to_string())
        })?;

        self.shared.persist_session(&user, &tokens)?;
        self.shared.api.set_tokens(tokens);
        self.shared.set_user(Some(user.clone()));

        info!(user_id = %user.id, "Signed in");
        Ok(user)
    }

    /// Sign out: forget the user and tokens in memory and in storage.
    /// Safe to call when already signed out.
    pub fn sign_out(&self) -> Result<(), SessionError> {
        self.shared.sign_out()
    }

    /// Replace the signed-in user and persist it. The in-memory user is
    /// updated first and is not rolled back if the write fails.
    pub fn update_profile(&self, user: User) -> Result<(), SessionError> {
        let _loading = LoadingGuard::begin(&self.shared.state);
        self.shared.set_user(Some(user.clone()));
        self.shared.records.save_user(&user)?;
        debug!(user_id = %user.id, "Profile updated");
        Ok(())
    }

    /// Re-establish the stored session, if any. Returns whether a session
    /// was restored. Storage failures degrade to signed out.
    pub fn restore_session(&self) -> bool {
        let _loading = LoadingGuard::begin(&self.shared.state);

        let user = self.shared.records.user().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read stored user");
            None
        });
        let tokens = self.shared.records.auth_token().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read stored tokens");
            None
        });

        let restored = match (user, tokens) {
            (Some(user), Some(tokens)) if user.is_authenticated() => {
                debug!(user_id = %user.id, "Restoring stored session");
                self.shared.api.set_tokens(tokens);
                self.shared.set_user(Some(user));
                true
            }
            _ => {
                debug!("No stored session");
                false
            }
        };

        self.shared.state.send_modify(SessionSnapshot::mark_restored);
        restored
    }

    /// Create an account, then sign into it
    pub async fn sign_up(&self, form: &SignUpForm) -> Result<User, SessionError> {
        let form = SignUpForm {
            name: form.name.trim().to_string(),
            email: form.email.trim().to_string(),
            ..form.clone()
        };
        form.validate()?;
        let _loading = LoadingGuard::begin(&self.shared.state);

        self.shared.api.create_user(&form).await?;
        info!(email = %form.email, "Account created");
        self.sign_in(&form.email, &form.password).await
    }

    /// Send a profile edit to the backend, then record the new name locally
    pub async fn update_profile_remote(&self, form: &ProfileForm) -> Result<User, SessionError> {
        form.validate()?;
        let mut user = self.user().ok_or(SessionError::NotSignedIn)?;

        self.shared.api.update_user(form).await?;

        user.name = form.name.trim().to_string();
        self.update_profile(user.clone())?;
        Ok(user)
    }

    /// Upload a new avatar, then record the new avatar reference locally
    pub async fn update_avatar(&self, upload: &AvatarUpload) -> Result<User, SessionError> {
        let mut user = self.user().ok_or(SessionError::NotSignedIn)?;

        let updated = self.shared.api.upload_avatar(upload).await?;

        user.avatar = updated.avatar;
        self.update_profile(user.clone())?;
        Ok(user)
    }
}

impl Shared {
    fn set_user(&self, user: Option<User>) {
        self.state.send_modify(|s| s.user = user);
    }

    fn sign_out(&self) -> Result<(), SessionError> {
        let _loading = LoadingGuard::begin(&self.state);

        self.set_user(None);
        self.api.clear_tokens();

        // Attempt both removals; report the first failure
        let user_removed = self.records.remove_user();
        let tokens_removed = self.records.remove_auth_token();
        user_removed?;
        tokens_removed?;

        info!("Signed out");
        Ok(())
    }

    /// Write both records or neither
    fn persist_session(&self, user: &User, tokens: &TokenPair) -> Result<(), StorageError> {
        let previous_user = match self.records.user() {
            Ok(previous) => previous,
            Err(StorageError::Corrupt { .. }) => None,
            Err(e) => return Err(e),
        };

        self.records.save_user(user)?;

        if let Err(e) = self.records.save_auth_token(tokens) {
            let rollback = match previous_user {
                Some(ref previous) => self.records.save_user(previous),
                None => self.records.remove_user(),
            };
            if let Err(rollback_err) = rollback {
                warn!(error = %rollback_err, "Failed to roll back user record");
            }
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::storage::{MemoryStorage, AUTH_TOKEN_KEY, USER_KEY};

    /// Memory store that can be told to fail writes to one record, or
    /// every removal
    #[derive(Default)]
    struct FlakyStorage {
        records: MemoryStorage,
        fail_saves_to: Mutex<Option<&'static str>>,
        fail_removes: AtomicBool,
    }

    impl FlakyStorage {
        fn fail_saves_to(&self, key: Option<&'static str>) {
            *self.fail_saves_to.lock().expect("lock") = key;
        }

        fn fail_removes(&self, fail: bool) {
            self.fail_removes.store(fail, Ordering::SeqCst);
        }
    }

    impl Storage for FlakyStorage {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.records.get(key)
        }

        fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if *self.fail_saves_to.lock().expect("lock") == Some(key) {
                return Err(StorageError::Unavailable("disk full".to_string()));
            }
            self.records.save(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            if self.fail_removes.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("read-only".to_string()));
            }
            self.records.remove(key)
        }
    }

    fn ana() -> User {
        User {
            id: "1".to_string(),
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
            avatar: None,
        }
    }

    fn session_body(token: &str, refresh: &str) -> serde_json::Value {
        json!({
            "user": {"id": 1, "name": "Ana", "email": "ana@example.com", "avatar": null},
            "token": token,
            "refresh_token": refresh
        })
    }

    async fn mount_sign_in(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    fn manager(server: &MockServer, storage: Arc<dyn Storage>) -> SessionManager {
        let api = ApiClient::new(&server.uri()).expect("client");
        SessionManager::restore(api, storage)
    }

    fn stored(storage: Arc<dyn Storage>) -> (Option<User>, Option<TokenPair>) {
        let records = SessionRecords::new(storage);
        (
            records.user().expect("read user"),
            records.auth_token().expect("read tokens"),
        )
    }

    #[tokio::test]
    async fn test_sign_in_persists_and_authenticates() {
        let server = MockServer::start().await;
        mount_sign_in(&server, session_body("t1", "r1")).await;
        let storage = Arc::new(MemoryStorage::new());
        let manager = manager(&server, storage.clone());

        let user = manager.sign_in("ana@example.com", "123456").await.expect("sign in");

        assert_eq!(user, ana());
        assert!(manager.is_authenticated());
        assert!(!manager.is_loading());
        assert_eq!(manager.api().access_token().as_deref(), Some("t1"));
        assert_eq!(
            stored(storage.clone()),
            (Some(ana()), Some(TokenPair::new("t1", "r1")))
        );
    }

    #[tokio::test]
    async fn test_sign_in_with_missing_token_persists_nothing() {
        let server = MockServer::start().await;
        mount_sign_in(
            &server,
            json!({"user": {"id": 1, "name": "Ana", "email": "ana@example.com"}, "token": "t1"}),
        )
        .await;
        let storage = Arc::new(MemoryStorage::new());
        let manager = manager(&server, storage.clone());

        let err = manager
            .sign_in("ana@example.com", "123456")
            .await
            .expect_err("should fail");

        assert!(matches!(err, SessionError::InvalidResponse(_)));
        assert!(!manager.is_authenticated());
        assert!(!manager.is_loading());
        assert!(storage.is_empty());
        assert_eq!(manager.api().access_token(), None);
    }

    #[tokio::test]
    async fn test_sign_in_rejection_keeps_prior_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(
                json!({"status": "error", "message": "Incorrect e-mail or password."}),
            ))
            .mount(&server)
            .await;

        let storage = Arc::new(MemoryStorage::new());
        let records = SessionRecords::new(storage.clone());
        records.save_user(&ana()).expect("seed user");
        records
            .save_auth_token(&TokenPair::new("t0", "r0"))
            .expect("seed tokens");
        let manager = manager(&server, storage.clone());
        assert!(manager.is_authenticated());

        let err = manager
            .sign_in("bruno@example.com", "wrong")
            .await
            .expect_err("should fail");

        assert_eq!(err.user_message("fallback"), "Incorrect e-mail or password.");
        assert_eq!(manager.user(), Some(ana()));
        assert_eq!(manager.api().access_token().as_deref(), Some("t0"));
        assert_eq!(
            stored(storage.clone()),
            (Some(ana()), Some(TokenPair::new("t0", "r0")))
        );
    }

    #[tokio::test]
    async fn test_sign_in_token_write_failure_rolls_back_user() {
        let server = MockServer::start().await;
        mount_sign_in(&server, session_body("t1", "r1")).await;
        let storage = Arc::new(FlakyStorage::default());
        storage.fail_saves_to(Some(AUTH_TOKEN_KEY));
        let manager = manager(&server, storage.clone());

        let err = manager
            .sign_in("ana@example.com", "123456")
            .await
            .expect_err("should fail");

        assert!(matches!(err, SessionError::Storage(_)));
        assert!(!manager.is_authenticated());
        assert!(!manager.is_loading());
        assert_eq!(manager.api().access_token(), None);
        assert_eq!(stored(storage.clone()), (None, None));
    }

    #[tokio::test]
    async fn test_sign_out_is_idempotent() {
        let server = MockServer::start().await;
        mount_sign_in(&server, session_body("t1", "r1")).await;
        let storage = Arc::new(MemoryStorage::new());
        let manager = manager(&server, storage.clone());
        manager.sign_in("ana@example.com", "123456").await.expect("sign in");

        manager.sign_out().expect("first sign-out");
        let after_once = manager.snapshot();
        manager.sign_out().expect("second sign-out");

        assert_eq!(manager.snapshot(), after_once);
        assert!(!manager.is_authenticated());
        assert!(!manager.is_loading());
        assert!(storage.is_empty());
        assert_eq!(manager.api().access_token(), None);
    }

    #[tokio::test]
    async fn test_sign_out_storage_failure_propagates() {
        let server = MockServer::start().await;
        mount_sign_in(&server, session_body("t1", "r1")).await;
        let storage = Arc::new(FlakyStorage::default());
        let manager = manager(&server, storage.clone());
        manager.sign_in("ana@example.com", "123456").await.expect("sign in");

        storage.fail_removes(true);
        let err = manager.sign_out().expect_err("should fail");

        assert!(matches!(err, SessionError::Storage(StorageError::Unavailable(_))));
        assert_eq!(manager.user(), None);
        assert!(!manager.is_loading());
        assert_eq!(manager.api().access_token(), None);
    }

    #[tokio::test]
    async fn test_refresh_after_sign_out_is_not_persisted() {
        let server = MockServer::start().await;
        mount_sign_in(&server, session_body("t1", "r1")).await;
        let storage = Arc::new(MemoryStorage::new());
        let manager = manager(&server, storage.clone());
        manager.sign_in("ana@example.com", "123456").await.expect("sign in");
        manager.sign_out().expect("sign out");

        manager.api().emit_tokens_refreshed(&TokenPair::new("t2", "r2"));

        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_update_profile_survives_restart() {
        let server = MockServer::start().await;
        mount_sign_in(&server, session_body("t1", "r1")).await;
        let storage = Arc::new(MemoryStorage::new());
        let manager = manager(&server, storage.clone());
        manager.sign_in("ana@example.com", "123456").await.expect("sign in");

        let mut renamed = ana();
        renamed.name = "Ana Silva".to_string();
        renamed.avatar = Some("ana.png".to_string());
        manager.update_profile(renamed.clone()).expect("update profile");
        drop(manager);

        let restarted = SessionManager::restore(
            ApiClient::new(&server.uri()).expect("client"),
            storage.clone(),
        );
        assert_eq!(restarted.user(), Some(renamed));
        assert_eq!(restarted.api().access_token().as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_update_profile_failure_keeps_optimistic_user() {
        let server = MockServer::start().await;
        mount_sign_in(&server, session_body("t1", "r1")).await;
        let storage = Arc::new(FlakyStorage::default());
        let manager = manager(&server, storage.clone());
        manager.sign_in("ana@example.com", "123456").await.expect("sign in");

        storage.fail_saves_to(Some(USER_KEY));
        let mut renamed = ana();
        renamed.name = "Ana Silva".to_string();
        let err = manager.update_profile(renamed.clone()).expect_err("should fail");

        assert!(matches!(err, SessionError::Storage(_)));
        assert_eq!(manager.user(), Some(renamed));
        assert!(!manager.is_loading());
        assert_eq!(stored(storage.clone()).0, Some(ana()));
    }

    #[test]
    fn test_restore_without_records() {
        let api = ApiClient::new("http://localhost:3333").expect("client");
        let manager = SessionManager::new(api, Arc::new(MemoryStorage::new()));
        assert!(manager.is_loading());

        assert!(!manager.restore_session());
        assert!(!manager.is_authenticated());
        assert!(!manager.is_loading());
    }

    #[test]
    fn test_restore_requires_both_records() {
        let storage = Arc::new(MemoryStorage::new());
        SessionRecords::new(storage.clone())
            .save_user(&ana())
            .expect("seed user");

        let api = ApiClient::new("http://localhost:3333").expect("client");
        let manager = SessionManager::restore(api, storage);
        assert!(!manager.is_authenticated());
        assert_eq!(manager.api().access_token(), None);
    }

    #[test]
    fn test_restore_with_corrupt_record_degrades() {
        let storage = Arc::new(MemoryStorage::new());
        storage.save(USER_KEY, "{\"id\":").expect("seed corrupt user");
        SessionRecords::new(storage.clone())
            .save_auth_token(&TokenPair::new("t0", "r0"))
            .expect("seed tokens");

        let api = ApiClient::new("http://localhost:3333").expect("client");
        let manager = SessionManager::restore(api, storage);
        assert!(!manager.is_authenticated());
        assert!(!manager.is_loading());
    }

    #[tokio::test]
    async fn test_failed_refresh_forces_sign_out() {
        let server = MockServer::start().await;
        mount_sign_in(&server, session_body("t1", "r1")).await;
        Mock::given(method("GET"))
            .and(path("/groups"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"status": "error", "message": "token.expired"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sessions/refresh-token"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"status": "error", "message": "Invalid refresh token."})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let storage = Arc::new(MemoryStorage::new());
        let manager = manager(&server, storage.clone());
        manager.sign_in("ana@example.com", "123456").await.expect("sign in");
        let mut changes = manager.subscribe();
        let _ = changes.borrow_and_update();

        let err = manager.api().fetch_groups().await.expect_err("should fail");

        assert!(matches!(err, ApiError::SessionExpired));
        assert!(changes.has_changed().expect("sender alive"));
        assert!(!manager.is_authenticated());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_refreshed_tokens_are_persisted() {
        let server = MockServer::start().await;
        mount_sign_in(&server, session_body("t1", "r1")).await;
        Mock::given(method("GET"))
            .and(path("/history"))
            .and(header("authorization", "Bearer t1"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"status": "error", "message": "token.expired"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/history"))
            .and(header("authorization", "Bearer t2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sessions/refresh-token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"token": "t2", "refresh_token": "r2"})),
            )
            .mount(&server)
            .await;

        let storage = Arc::new(MemoryStorage::new());
        let manager = manager(&server, storage.clone());
        manager.sign_in("ana@example.com", "123456").await.expect("sign in");

        let history = manager.api().fetch_history().await.expect("history");
        assert!(history.is_empty());
        assert!(manager.is_authenticated());
        assert_eq!(
            stored(storage.clone()),
            (Some(ana()), Some(TokenPair::new("t2", "r2")))
        );
    }

    #[tokio::test]
    async fn test_dropped_manager_ignores_session_events() {
        let server = MockServer::start().await;
        mount_sign_in(&server, session_body("t1", "r1")).await;
        Mock::given(method("GET"))
            .and(path("/groups"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"status": "error", "message": "token.invalid"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sessions/refresh-token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let storage = Arc::new(MemoryStorage::new());
        let manager = manager(&server, storage.clone());
        manager.sign_in("ana@example.com", "123456").await.expect("sign in");
        let api = manager.api().clone();
        drop(manager);

        let err = api.fetch_groups().await.expect_err("should fail");
        assert!(err.is_session_expired());
        assert_eq!(stored(storage.clone()).0, Some(ana()));
    }

    #[tokio::test]
    async fn test_loading_flag_while_signing_in() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(session_body("t1", "r1"))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let manager = Arc::new(manager(&server, Arc::new(MemoryStorage::new())));
        assert!(!manager.is_loading());

        let signing_in = manager.clone();
        let task = tokio::spawn(async move {
            signing_in.sign_in("ana@example.com", "123456").await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.is_loading());

        task.await.expect("join").expect("sign in");
        assert!(!manager.is_loading());
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_sign_up_validates_before_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let manager = manager(&server, Arc::new(MemoryStorage::new()));
        let form = SignUpForm {
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
            password: "123".to_string(),
            confirm_password: "123".to_string(),
        };

        let err = manager.sign_up(&form).await.expect_err("should fail");
        assert!(matches!(err, SessionError::Validation(ValidationError::PasswordTooShort)));
        assert_eq!(err.user_message("fallback"), "Password must be at least 6 characters");
    }

    #[tokio::test]
    async fn test_sign_up_then_signed_in() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        mount_sign_in(&server, session_body("t1", "r1")).await;

        let manager = manager(&server, Arc::new(MemoryStorage::new()));
        let form = SignUpForm {
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
            password: "123456".to_string(),
            confirm_password: "123456".to_string(),
        };

        let user = manager.sign_up(&form).await.expect("sign up");
        assert_eq!(user, ana());
        assert!(manager.is_authenticated());
        assert!(!manager.is_loading());
    }

    #[tokio::test]
    async fn test_sign_up_trims_name_and_email() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users"))
            .and(body_json(json!({
                "name": "Ana",
                "email": "ana@example.com",
                "password": "123456"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .and(body_json(json!({"email": "ana@example.com", "password": "123456"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_body("t1", "r1")))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager(&server, Arc::new(MemoryStorage::new()));
        let form = SignUpForm {
            name: "  Ana ".to_string(),
            email: " ana@example.com  ".to_string(),
            password: "123456".to_string(),
            confirm_password: "123456".to_string(),
        };

        let user = manager.sign_up(&form).await.expect("sign up");
        assert_eq!(user, ana());
    }

    #[tokio::test]
    async fn test_profile_and_avatar_updates() {
        let server = MockServer::start().await;
        mount_sign_in(&server, session_body("t1", "r1")).await;
        Mock::given(method("PUT"))
            .and(path("/users"))
            .and(header("authorization", "Bearer t1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/users/avatar"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 1, "name": "Ana Silva", "email": "ana@example.com", "avatar": "1-ana.png"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let storage = Arc::new(MemoryStorage::new());
        let manager = manager(&server, storage.clone());

        let form = ProfileForm {
            name: "Ana Silva".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            manager.update_profile_remote(&form).await,
            Err(SessionError::NotSignedIn)
        ));

        manager.sign_in("ana@example.com", "123456").await.expect("sign in");
        let user = manager.update_profile_remote(&form).await.expect("update profile");
        assert_eq!(user.name, "Ana Silva");

        let upload = AvatarUpload::new(&user.name, "png", vec![1, 2, 3]).expect("upload");
        let user = manager.update_avatar(&upload).await.expect("update avatar");
        assert_eq!(user.avatar.as_deref(), Some("1-ana.png"));
        assert_eq!(stored(storage.clone()).0, Some(user));
    }
}
