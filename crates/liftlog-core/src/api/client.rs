//! API client for the workout backend.
//!
//! This module provides the `ApiClient` struct for signing in and making
//! authenticated requests for exercises, history and profile data.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use reqwest::{header, multipart, Client, RequestBuilder, Response, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{AvatarUpload, Exercise, HistoryDay, ProfileForm, SignUpForm, TokenPair, User};

use super::events::{Listeners, Subscription};
use super::refresh::{NextStep, RefreshFailed, RefreshFuture, TokenState};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Body of `POST /sessions`. Every field is optional so that an incomplete
/// payload can be told apart from a transport failure.
#[derive(Debug, Default, Deserialize)]
pub struct SessionResponse {
    pub user: Option<User>,
    pub token: Option<String>,
    pub refresh_token: Option<String>,
}

impl SessionResponse {
    /// Split into user and tokens, or None if any part is missing or empty
    pub fn into_parts(self) -> Option<(User, TokenPair)> {
        let user = self.user.filter(User::is_authenticated)?;
        let token = self.token.filter(|t| !t.is_empty())?;
        let refresh_token = self.refresh_token.filter(|t| !t.is_empty())?;
        Some((user, TokenPair::new(token, refresh_token)))
    }
}

/// API client for the workout backend.
/// Clone is cheap - clones share the connection pool, credentials and
/// event subscriptions.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: Client,
    base_url: Url,
    tokens: Mutex<TokenState>,
    expired: Arc<Listeners<()>>,
    refreshed: Arc<Listeners<TokenPair>>,
}

impl ApiClient {
    /// Create a new API client for the backend at `base_url`
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::with_timeout(&config.api_url, config.request_timeout())
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let parsed = Url::parse(base_url).map_err(|e| {
            ApiError::InvalidRequest(format!("Invalid API URL '{}': {}", base_url, e))
        })?;
        if parsed.cannot_be_a_base() {
            return Err(ApiError::InvalidRequest(format!(
                "API URL cannot be used as a base: {}",
                base_url
            )));
        }

        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: parsed,
                tokens: Mutex::new(TokenState::default()),
                expired: Listeners::new(),
                refreshed: Listeners::new(),
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        self.inner.base_url.as_str()
    }

    // ===== Credentials =====

    /// Install the token pair used for authenticated requests
    pub fn set_tokens(&self, tokens: TokenPair) {
        self.inner.state().replace(Some(tokens));
    }

    /// Drop credentials; subsequent requests go out without a bearer header
    pub fn clear_tokens(&self) {
        self.inner.state().replace(None);
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.state().credentials().access_token
    }

    /// Register a handler for forced sign-out. It runs once per failed
    /// refresh, after credentials have been cleared.
    pub fn on_session_expired<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.expired.subscribe(move |_| handler())
    }

    /// Register a handler that receives every token pair minted by a refresh
    pub fn on_tokens_refreshed<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TokenPair) + Send + Sync + 'static,
    {
        self.inner.refreshed.subscribe(handler)
    }

    #[cfg(test)]
    pub(crate) fn emit_tokens_refreshed(&self, tokens: &TokenPair) {
        self.inner.refreshed.emit(tokens);
    }

    // ===== Request plumbing =====

    /// Send an authenticated request. A rejected access token is refreshed
    /// (sharing any refresh already running) and the request replayed once.
    async fn send<F>(&self, build: F) -> Result<Response, ApiError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let sent_with = self.inner.state().credentials();
        let response = self
            .inner
            .dispatch(&build, sent_with.access_token.as_deref())
            .await?;

        match check_response(response).await {
            Err(ApiError::TokenExpired) => debug!("Access token rejected"),
            other => return other,
        }

        let token = self.refreshed_token(sent_with.generation).await?;
        let replayed_at = self.inner.state().credentials().generation;
        let response = self.inner.dispatch(&build, Some(&token)).await?;

        match check_response(response).await {
            Err(ApiError::TokenExpired) => {
                warn!("Replayed request rejected the refreshed token");
                self.inner.expire_session(replayed_at);
                Err(ApiError::SessionExpired)
            }
            other => other,
        }
    }

    /// Send a request that must never carry credentials or trigger a refresh
    async fn send_public<F>(&self, build: F) -> Result<Response, ApiError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let response = self.inner.dispatch(&build, None).await?;
        check_response(response).await.map_err(|e| match e {
            ApiError::TokenExpired => ApiError::Unauthorized,
            other => other,
        })
    }

    /// Access token to replay with after the one sent at `seen_generation`
    /// was rejected.
    async fn refreshed_token(&self, seen_generation: u64) -> Result<String, ApiError> {
        let flight = {
            let mut state = self.inner.state();
            match state.next_step(seen_generation) {
                NextStep::Replay(token) => return Ok(token),
                NextStep::SignedOut => return Err(ApiError::SessionExpired),
                NextStep::Join(flight) => {
                    debug!("Joining token refresh in flight");
                    flight
                }
                NextStep::Start {
                    refresh_token,
                    generation,
                } => {
                    let flight = Inner::refresh_flight(self.inner.clone(), refresh_token, generation);
                    state.begin(flight.clone());
                    flight
                }
            }
        };

        flight.await.map_err(|RefreshFailed| ApiError::SessionExpired)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ApiError> {
        let url = self.inner.endpoint(segments)?;
        let response = self.send(|c: &Client| c.get(url.clone())).await?;
        parse_json(response).await
    }

    // ===== Sessions & Users =====

    /// Exchange e-mail and password for a user and token pair
    pub async fn create_session(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SessionResponse, ApiError> {
        let url = self.inner.endpoint(&["sessions"])?;
        let body = serde_json::json!({ "email": email, "password": password });

        let response = self
            .send_public(|c: &Client| c.post(url.clone()).json(&body))
            .await?;
        parse_json(response).await
    }

    /// Register a new account
    pub async fn create_user(&self, form: &SignUpForm) -> Result<(), ApiError> {
        let url = self.inner.endpoint(&["users"])?;
        self.send_public(|c: &Client| c.post(url.clone()).json(form))
            .await?;
        Ok(())
    }

    /// Update the name and, optionally, the password of the signed-in user
    pub async fn update_user(&self, form: &ProfileForm) -> Result<(), ApiError> {
        let url = self.inner.endpoint(&["users"])?;
        let body = form.body();
        self.send(|c: &Client| c.put(url.clone()).json(&body)).await?;
        Ok(())
    }

    /// Upload a new avatar image; returns the user with its new avatar file
    pub async fn upload_avatar(&self, upload: &AvatarUpload) -> Result<User, ApiError> {
        let url = self.inner.endpoint(&["users", "avatar"])?;

        let mut part_headers = header::HeaderMap::new();
        let content_type = header::HeaderValue::from_str(&upload.mime_type).map_err(|e| {
            ApiError::InvalidRequest(format!("Invalid image type '{}': {}", upload.mime_type, e))
        })?;
        part_headers.insert(header::CONTENT_TYPE, content_type);

        let response = self
            .send(|c: &Client| {
                let part = multipart::Part::bytes(upload.bytes.clone())
                    .file_name(upload.file_name.clone())
                    .headers(part_headers.clone());
                c.patch(url.clone())
                    .multipart(multipart::Form::new().part("avatar", part))
            })
            .await?;
        parse_json(response).await
    }

    // ===== Exercises & History =====

    /// Fetch the muscle groups exercises are filed under
    pub async fn fetch_groups(&self) -> Result<Vec<String>, ApiError> {
        self.get(&["groups"]).await
    }

    pub async fn fetch_exercises_by_group(&self, group: &str) -> Result<Vec<Exercise>, ApiError> {
        self.get(&["exercises", "bygroup", group]).await
    }

    pub async fn fetch_exercise(&self, exercise_id: &str) -> Result<Exercise, ApiError> {
        self.get(&["exercises", exercise_id]).await
    }

    /// Record that the signed-in user completed an exercise
    pub async fn register_history(&self, exercise_id: &str) -> Result<(), ApiError> {
        let url = self.inner.endpoint(&["history"])?;
        let body = serde_json::json!({ "exercise_id": exercise_id });
        self.send(|c: &Client| c.post(url.clone()).json(&body))
            .await?;
        Ok(())
    }

    /// Fetch the signed-in user's history, grouped by day
    pub async fn fetch_history(&self) -> Result<Vec<HistoryDay>, ApiError> {
        self.get(&["history"]).await
    }

    // ===== Media =====

    pub fn avatar_url(&self, avatar: &str) -> String {
        self.inner.media_url(&["avatar", avatar])
    }

    pub fn exercise_thumb_url(&self, exercise: &Exercise) -> String {
        self.inner.media_url(&["exercise", "thumb", &exercise.thumb])
    }

    pub fn exercise_demo_url(&self, exercise: &Exercise) -> String {
        self.inner.media_url(&["exercise", "demo", &exercise.demo])
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, TokenState> {
        self.tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Join path segments onto the base URL, percent-encoding each one
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ApiError::InvalidRequest(format!("API URL cannot be used as a base: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn media_url(&self, segments: &[&str]) -> String {
        match self.endpoint(segments) {
            Ok(url) => url.into(),
            Err(_) => format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), segments.join("/")),
        }
    }

    /// Send a request, backing off and retrying while rate limited.
    async fn dispatch<F>(&self, build: &F, token: Option<&str>) -> Result<Response, ApiError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = build(&self.http);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            let response = request.send().await?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(url = %response.url(), retry = retries, backoff_ms, "Rate limited, backing off");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2; // Exponential backoff
        }
    }

    /// Clear credentials the backend keeps rejecting and force a sign-out,
    /// unless they were already replaced since `generation`.
    fn expire_session(&self, generation: u64) {
        let expired = self.state().expire(generation);
        if expired {
            warn!("Credentials rejected after refresh, forcing sign-out");
            self.expired.emit(&());
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let url = self.endpoint(&["sessions", "refresh-token"])?;
        let body = serde_json::json!({ "refresh_token": refresh_token });

        let response = self
            .dispatch(&|c: &Client| c.post(url.clone()).json(&body), None)
            .await?;
        let response = check_response(response).await?;
        parse_json(response).await
    }

    /// Build the shared refresh future. It runs at most once no matter how
    /// many requests await it.
    fn refresh_flight(
        inner: Arc<Inner>,
        refresh_token: Option<String>,
        started_at: u64,
    ) -> RefreshFuture {
        async move {
            let outcome = match refresh_token {
                Some(refresh_token) => {
                    info!("Refreshing access token");
                    inner.request_refresh(&refresh_token).await
                }
                None => Err(ApiError::SessionExpired),
            };
            inner.complete_refresh(started_at, outcome)
        }
        .boxed()
        .shared()
    }

    fn complete_refresh(
        &self,
        started_at: u64,
        outcome: Result<TokenPair, ApiError>,
    ) -> Result<String, RefreshFailed> {
        let mut state = self.state();
        let installed = outcome.as_ref().ok().cloned();

        if !state.finish(started_at, installed) {
            // Credentials were replaced mid-refresh (sign-in or sign-out);
            // those win and this result is discarded.
            debug!("Discarding orphaned token refresh");
            return state
                .tokens()
                .map(|t| t.token.clone())
                .ok_or(RefreshFailed);
        }
        drop(state);

        match outcome {
            Ok(tokens) => {
                debug!("Access token refreshed");
                self.refreshed.emit(&tokens);
                Ok(tokens.token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, forcing sign-out");
                self.expired.emit(&());
                Err(RefreshFailed)
            }
        }
    }
}

/// Check if response is successful, returning an error with body if not.
async fn check_response(response: Response) -> Result<Response, ApiError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status, &body))
    }
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let url = response.url().clone();
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| {
        ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", url.path(), e))
    })
}
